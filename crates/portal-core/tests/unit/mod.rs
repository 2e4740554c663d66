//! Unit tests for portal-core
