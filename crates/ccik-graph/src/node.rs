//! Node storage for the kinematic graph.

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};

use ccik_core::DofSet;

use crate::joint::JointState;

/// Index of a node inside a [`KinematicGraph`](crate::KinematicGraph).
///
/// Ids are only meaningful for the graph that issued them. Nodes are never
/// removed, so an id stays valid for the lifetime of its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub const fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Rigid body frame. Any number of children.
    Link,
    /// Parametrized transform with at most one child or one closure target.
    Joint,
    /// Joint that acts as a solver target; its own DOFs are never solved.
    Goal,
}

/// Cache state of a node's transforms.
///
/// Dirtiness is pushed down to every descendant on write and resolved
/// lazily on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirtyState {
    #[default]
    Clean,
    /// `matrix_world` is stale.
    World,
    /// Both the DOF matrix and `matrix_world` are stale (joints only).
    DofAndWorld,
}

/// A single frame in the graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) name: String,
    pub(crate) position: Vector3<f64>,
    pub(crate) quaternion: UnitQuaternion<f64>,
    pub(crate) matrix: Isometry3<f64>,
    pub(crate) matrix_world: Isometry3<f64>,
    pub(crate) dirty: DirtyState,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) closure_joints: Vec<NodeId>,
    pub(crate) joint: Option<JointState>,
    pub(crate) goal_dof: DofSet,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        let (joint, dirty, goal_dof) = match kind {
            NodeKind::Link => (None, DirtyState::World, DofSet::EMPTY),
            NodeKind::Joint => (Some(JointState::new()), DirtyState::DofAndWorld, DofSet::EMPTY),
            NodeKind::Goal => (Some(JointState::new()), DirtyState::DofAndWorld, DofSet::ALL),
        };
        Self {
            kind,
            name: String::new(),
            position: Vector3::zeros(),
            quaternion: UnitQuaternion::identity(),
            matrix: Isometry3::identity(),
            matrix_world: Isometry3::identity(),
            dirty,
            parent: None,
            children: Vec::new(),
            closure_joints: Vec::new(),
            joint,
            goal_dof,
        }
    }

    pub(crate) fn update_matrix(&mut self) {
        self.matrix = Isometry3::from_parts(Translation3::from(self.position), self.quaternion);
    }

    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    pub const fn is_link(&self) -> bool {
        matches!(self.kind, NodeKind::Link)
    }

    /// True for joints and goals.
    pub const fn is_joint(&self) -> bool {
        matches!(self.kind, NodeKind::Joint | NodeKind::Goal)
    }

    pub const fn is_goal(&self) -> bool {
        matches!(self.kind, NodeKind::Goal)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local position relative to the parent.
    pub const fn position(&self) -> &Vector3<f64> {
        &self.position
    }

    /// Local orientation relative to the parent.
    pub const fn quaternion(&self) -> &UnitQuaternion<f64> {
        &self.quaternion
    }

    /// Local transform built from `position` and `quaternion`.
    pub const fn matrix(&self) -> &Isometry3<f64> {
        &self.matrix
    }

    /// Cached world transform. May be stale; check [`Node::dirty`] or read
    /// through [`KinematicGraph::matrix_world`](crate::KinematicGraph::matrix_world).
    pub const fn cached_matrix_world(&self) -> &Isometry3<f64> {
        &self.matrix_world
    }

    pub const fn dirty(&self) -> DirtyState {
        self.dirty
    }

    pub fn matrix_world_needs_update(&self) -> bool {
        self.dirty != DirtyState::Clean
    }

    pub fn matrix_dof_needs_update(&self) -> bool {
        self.dirty == DirtyState::DofAndWorld
    }

    pub const fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Owned children, in insertion order. Closure targets are not children.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Joints elsewhere in the graph that close onto this node.
    pub fn closure_joints(&self) -> &[NodeId] {
        &self.closure_joints
    }

    /// Joint state for joints and goals.
    pub const fn joint(&self) -> Option<&JointState> {
        self.joint.as_ref()
    }

    /// Error channels a goal constrains. Empty for non-goals.
    pub const fn goal_dof(&self) -> DofSet {
        self.goal_dof
    }
}
