//! Property-based tests using proptest
//!
//! - Event bus delivery under arbitrary emit sequences

pub mod bus_fuzz;
