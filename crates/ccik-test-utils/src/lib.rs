//! Shared test fixtures and utilities for the ccik crates.
//!
//! Provides mechanism builders (serial chains, a four-bar linkage) and
//! deterministic RNG setup.

pub mod mechanisms;
pub mod rng;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use mechanisms::{
    FourBar, SerialChain, four_bar_linkage, planar_three_link, planar_two_link, serial_chain,
};
pub use rng::{deterministic_vec, seeded_rng};
