//! Closed-chain inverse kinematics solver.
//!
//! Gathers every closure reachable from a set of tree roots, builds one
//! residual vector over all of them, and drives it to zero with damped least
//! squares (Levenberg-Marquardt) on a finite-difference Jacobian.
//!
//! # Architecture
//!
//! ```text
//! KinematicGraph ──► find_roots ──► Solver ──► DOF values (in place)
//! ```
//!
//! Scratch matrices come from a [`MatrixPool`](ccik_core::MatrixPool) owned
//! by the [`Solver`] and are released at the end of every iteration.

mod system;

pub mod solver;

pub use solver::{SolveReport, SolveStatus, Solver};
