use thiserror::Error;

use crate::types::Dof;

/// Top-level error type for the ccik crates.
#[derive(Debug, Error)]
pub enum CcikError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Axis error: {0}")]
    Axis(#[from] AxisError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Matrix pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Structural-invariant violations on the kinematic graph.
///
/// Every graph operation that returns one of these leaves the graph exactly
/// as it was before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Unknown node: {0}")]
    UnknownNode(usize),

    #[error("Node {0} is not a link")]
    NotALink(usize),

    #[error("Node {0} is not a joint")]
    NotAJoint(usize),

    #[error("Joint {0} already has a child")]
    JointHasChild(usize),

    #[error("Joint {0} is already a closure")]
    JointIsClosure(usize),

    #[error("Joint {0} is not a closure")]
    NotAClosure(usize),

    #[error("Node {0} is not a goal")]
    NotAGoal(usize),

    #[error("Node {child} is not the child of joint {joint}")]
    ChildMismatch { joint: usize, child: usize },

    #[error("Node {child} is not a child of node {parent}")]
    NotAChild { parent: usize, child: usize },

    #[error("Adding node {child} under node {parent} would create a cycle")]
    WouldCreateCycle { parent: usize, child: usize },

    #[error("Channel {dof} is not active on joint {joint}")]
    InactiveDof { joint: usize, dof: Dof },
}

/// Degenerate direction vectors when inferring a DOF channel.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum AxisError {
    #[error("Axis cannot be zero-length")]
    ZeroLength,

    #[error("Axis {axis:?} is ambiguous across multiple components")]
    Ambiguous { axis: [f64; 3] },
}

/// Solver configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Misuse of [`MatrixPool`](crate::pool::MatrixPool) handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("Matrix handle {0} was not issued by this pool")]
    UnknownHandle(usize),

    #[error("Matrix handle {0} requested more than once")]
    DuplicateHandle(usize),
}
