//! Goal constraint masks.

use ccik_core::{Dof, DofSet, GraphError};

use crate::graph::KinematicGraph;
use crate::node::NodeId;

impl KinematicGraph {
    /// Restrict which error channels a goal's closure contributes.
    ///
    /// Channels outside the mask are left free for the solver.
    pub fn set_goal_dof(&mut self, goal: NodeId, channels: &[Dof]) -> Result<(), GraphError> {
        let node = self.try_node_mut(goal)?;
        if !node.is_goal() {
            return Err(GraphError::NotAGoal(goal.0));
        }
        node.goal_dof = DofSet::from_slice(channels);
        Ok(())
    }

    /// Error channels the closure on `joint` must drive to zero.
    pub fn closure_mask(&self, joint: NodeId) -> DofSet {
        match self.get(joint) {
            Some(node) if node.is_goal() => node.goal_dof,
            _ => DofSet::ALL,
        }
    }
}
