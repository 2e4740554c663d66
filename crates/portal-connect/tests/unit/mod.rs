mod decode_test;
