//! Kinematic graph for closed-chain inverse kinematics.
//!
//! Links, joints and goals live in a single [`KinematicGraph`] arena and are
//! addressed by [`NodeId`]. Parent/child edges form a forest; a joint may
//! instead *close* onto a link anywhere in the graph, which is how loops
//! (parallel mechanisms, goals attached to end effectors) are expressed.
//!
//! # Transforms
//!
//! ```text
//! world(link)  = world(parent) * local
//! world(joint) = world(parent) * local * dof
//! ```
//!
//! Writes mark the node and its whole subtree dirty; reads refresh the node
//! and any dirty ancestors on demand.

mod goal;
pub mod graph;
pub mod joint;
pub mod node;
pub mod roots;

pub use graph::KinematicGraph;
pub use joint::{ClosureError, JointState, closure_error_between};
pub use node::{DirtyState, Node, NodeId, NodeKind};
pub use roots::find_roots;
