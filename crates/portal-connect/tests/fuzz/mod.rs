//! Property-based tests using proptest
//!
//! - Inbound frame decoding on arbitrary input
