//! Helpers shared by the tests of the MPT circuits.
pub mod circuit;
pub mod eth;
pub mod log;
pub mod mpt;
pub mod utils;
