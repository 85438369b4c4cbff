//! Joint DOF state and the joint-specific graph operations.

use nalgebra::{Isometry3, Quaternion, Vector3};

use ccik_core::math::{
    compose_dof_transform, quaternion_difference, quaternion_distance, rotation_error_vector,
};
use ccik_core::{Dof, DofSet, GraphError};

use crate::graph::KinematicGraph;
use crate::node::{DirtyState, NodeId};

// ---------------------------------------------------------------------------
// JointState
// ---------------------------------------------------------------------------

/// Per-channel DOF buffers of a joint, plus its child/closure slot.
///
/// All six-wide buffers are indexed by [`Dof::index`]. Only the channels in
/// [`JointState::dof`] are active; the others keep their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct JointState {
    dof: Vec<Dof>,
    dof_flags: DofSet,
    translation_dof_count: usize,
    rotation_dof_count: usize,
    dof_values: [f64; 6],
    min_dof_limit: [f64; 6],
    max_dof_limit: [f64; 6],
    dof_target: [f64; 6],
    dof_rest_pose: [f64; 6],
    matrix_dof: Isometry3<f64>,
    child: Option<NodeId>,
    is_closure: bool,
}

impl Default for JointState {
    fn default() -> Self {
        Self::new()
    }
}

impl JointState {
    pub fn new() -> Self {
        Self {
            dof: Vec::new(),
            dof_flags: DofSet::EMPTY,
            translation_dof_count: 0,
            rotation_dof_count: 0,
            dof_values: [0.0; 6],
            min_dof_limit: [f64::NEG_INFINITY; 6],
            max_dof_limit: [f64::INFINITY; 6],
            dof_target: [0.0; 6],
            dof_rest_pose: [0.0; 6],
            matrix_dof: Isometry3::identity(),
            child: None,
            is_closure: false,
        }
    }

    fn reset_dof(&mut self, channels: &[Dof]) {
        let child = self.child;
        let is_closure = self.is_closure;
        *self = Self {
            child,
            is_closure,
            ..Self::new()
        };

        for &dof in channels {
            if !self.dof_flags.contains(dof) {
                self.dof.push(dof);
                self.dof_flags.insert(dof);
            }
        }
        self.translation_dof_count = self.dof.iter().filter(|d| d.is_translation()).count();
        self.rotation_dof_count = self.dof.len() - self.translation_dof_count;
    }

    /// Active channels in declaration order.
    pub fn dof(&self) -> &[Dof] {
        &self.dof
    }

    pub const fn dof_flags(&self) -> DofSet {
        self.dof_flags
    }

    pub const fn translation_dof_count(&self) -> usize {
        self.translation_dof_count
    }

    pub const fn rotation_dof_count(&self) -> usize {
        self.rotation_dof_count
    }

    pub const fn dof_values(&self) -> &[f64; 6] {
        &self.dof_values
    }

    pub const fn min_dof_limit(&self) -> &[f64; 6] {
        &self.min_dof_limit
    }

    pub const fn max_dof_limit(&self) -> &[f64; 6] {
        &self.max_dof_limit
    }

    pub const fn dof_target(&self) -> &[f64; 6] {
        &self.dof_target
    }

    pub const fn dof_rest_pose(&self) -> &[f64; 6] {
        &self.dof_rest_pose
    }

    pub fn dof_value(&self, dof: Dof) -> f64 {
        self.dof_values[dof.index()]
    }

    /// Transform produced by the DOF values alone, as of the last
    /// DOF-matrix update.
    pub const fn matrix_dof(&self) -> &Isometry3<f64> {
        &self.matrix_dof
    }

    /// The owned child, or the closure target when [`JointState::is_closure`].
    pub const fn child(&self) -> Option<NodeId> {
        self.child
    }

    pub const fn is_closure(&self) -> bool {
        self.is_closure
    }

    pub(crate) fn set_child(&mut self, child: Option<NodeId>, is_closure: bool) {
        self.child = child;
        self.is_closure = is_closure;
    }

    pub(crate) fn refresh_matrix_dof(&mut self) {
        self.matrix_dof = compose_dof_transform(&self.dof, &self.dof_values);
    }

    fn clamp(&self, dof: Dof, value: f64) -> f64 {
        let i = dof.index();
        value.max(self.min_dof_limit[i]).min(self.max_dof_limit[i])
    }

    fn is_within_limits(&self, dof: Dof, value: f64) -> bool {
        let i = dof.index();
        value >= self.min_dof_limit[i] && value <= self.max_dof_limit[i]
    }
}

// ---------------------------------------------------------------------------
// ClosureError
// ---------------------------------------------------------------------------

/// Pose discrepancy between a closure joint and its target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosureError {
    /// `joint world position - target world position`.
    pub position: Vector3<f64>,
    /// Component-wise quaternion difference on the shortest arc.
    pub quaternion: Quaternion<f64>,
    /// Rotation taking the target orientation onto the joint's, as axis * angle.
    pub rotation: Vector3<f64>,
    /// Angular distance between both orientations, radians.
    pub angle: f64,
}

// ---------------------------------------------------------------------------
// DOF operations
// ---------------------------------------------------------------------------

impl KinematicGraph {
    pub(crate) fn joint_state(&self, joint: NodeId) -> Result<&JointState, GraphError> {
        self.try_node(joint)?
            .joint
            .as_ref()
            .ok_or(GraphError::NotAJoint(joint.0))
    }

    fn joint_state_mut(&mut self, joint: NodeId) -> Result<&mut JointState, GraphError> {
        self.try_node_mut(joint)?
            .joint
            .as_mut()
            .ok_or(GraphError::NotAJoint(joint.0))
    }

    fn active_joint_state_mut(
        &mut self,
        joint: NodeId,
        dof: Dof,
    ) -> Result<&mut JointState, GraphError> {
        let state = self.joint_state_mut(joint)?;
        if !state.dof_flags.contains(dof) {
            return Err(GraphError::InactiveDof { joint: joint.0, dof });
        }
        Ok(state)
    }

    /// Activate exactly `channels`, in order, and reset every per-channel
    /// buffer to its default. Repeated channels are only counted once.
    pub fn set_dof(&mut self, joint: NodeId, channels: &[Dof]) -> Result<(), GraphError> {
        self.joint_state_mut(joint)?.reset_dof(channels);
        self.set_matrix_dof_needs_update(joint)
    }

    pub fn clear_dof(&mut self, joint: NodeId) -> Result<(), GraphError> {
        self.set_dof(joint, &[])
    }

    /// Write one DOF value, clamped to the channel's limits.
    pub fn set_dof_value(&mut self, joint: NodeId, dof: Dof, value: f64) -> Result<(), GraphError> {
        let state = self.active_joint_state_mut(joint, dof)?;
        state.dof_values[dof.index()] = state.clamp(dof, value);
        self.set_matrix_dof_needs_update(joint)
    }

    /// Write values for the active channels in declaration order. Extra
    /// values are ignored; missing ones leave their channel untouched.
    pub fn set_dof_values(&mut self, joint: NodeId, values: &[f64]) -> Result<(), GraphError> {
        let state = self.joint_state_mut(joint)?;
        for i in 0..state.dof.len().min(values.len()) {
            let dof = state.dof[i];
            state.dof_values[dof.index()] = state.clamp(dof, values[i]);
        }
        self.set_matrix_dof_needs_update(joint)
    }

    /// Set a lower bound; the current value is re-clamped.
    pub fn set_min_limit(&mut self, joint: NodeId, dof: Dof, value: f64) -> Result<(), GraphError> {
        let state = self.active_joint_state_mut(joint, dof)?;
        state.min_dof_limit[dof.index()] = value;
        let clamped = state.clamp(dof, state.dof_values[dof.index()]);
        state.dof_values[dof.index()] = clamped;
        self.set_matrix_dof_needs_update(joint)
    }

    /// Set an upper bound; the current value is re-clamped.
    pub fn set_max_limit(&mut self, joint: NodeId, dof: Dof, value: f64) -> Result<(), GraphError> {
        let state = self.active_joint_state_mut(joint, dof)?;
        state.max_dof_limit[dof.index()] = value;
        let clamped = state.clamp(dof, state.dof_values[dof.index()]);
        state.dof_values[dof.index()] = clamped;
        self.set_matrix_dof_needs_update(joint)
    }

    pub fn set_min_limits(&mut self, joint: NodeId, values: &[f64]) -> Result<(), GraphError> {
        for (dof, &value) in self.active_channels(joint)?.into_iter().zip(values) {
            self.set_min_limit(joint, dof, value)?;
        }
        Ok(())
    }

    pub fn set_max_limits(&mut self, joint: NodeId, values: &[f64]) -> Result<(), GraphError> {
        for (dof, &value) in self.active_channels(joint)?.into_iter().zip(values) {
            self.set_max_limit(joint, dof, value)?;
        }
        Ok(())
    }

    /// Set the value an under-constrained channel is biased toward.
    pub fn set_target_value(
        &mut self,
        joint: NodeId,
        dof: Dof,
        value: f64,
    ) -> Result<(), GraphError> {
        self.active_joint_state_mut(joint, dof)?.dof_target[dof.index()] = value;
        Ok(())
    }

    pub fn set_target_values(&mut self, joint: NodeId, values: &[f64]) -> Result<(), GraphError> {
        for (dof, &value) in self.active_channels(joint)?.into_iter().zip(values) {
            self.set_target_value(joint, dof, value)?;
        }
        Ok(())
    }

    pub fn set_rest_pose_value(
        &mut self,
        joint: NodeId,
        dof: Dof,
        value: f64,
    ) -> Result<(), GraphError> {
        self.active_joint_state_mut(joint, dof)?.dof_rest_pose[dof.index()] = value;
        Ok(())
    }

    pub fn set_rest_pose_values(
        &mut self,
        joint: NodeId,
        values: &[f64],
    ) -> Result<(), GraphError> {
        for (dof, &value) in self.active_channels(joint)?.into_iter().zip(values) {
            self.set_rest_pose_value(joint, dof, value)?;
        }
        Ok(())
    }

    /// Copy the rest pose into the DOF values (clamped).
    pub fn restore_rest_pose(&mut self, joint: NodeId) -> Result<(), GraphError> {
        let state = self.joint_state_mut(joint)?;
        for i in 0..state.dof.len() {
            let dof = state.dof[i];
            state.dof_values[dof.index()] = state.clamp(dof, state.dof_rest_pose[dof.index()]);
        }
        self.set_matrix_dof_needs_update(joint)
    }

    fn active_channels(&self, joint: NodeId) -> Result<Vec<Dof>, GraphError> {
        Ok(self.joint_state(joint)?.dof.clone())
    }

    /// Mark the DOF matrix and the world matrix stale, and every descendant's
    /// world matrix with them.
    pub fn set_matrix_dof_needs_update(&mut self, joint: NodeId) -> Result<(), GraphError> {
        self.joint_state(joint)?;
        self.mark_world_dirty(joint);
        self.nodes[joint.0].dirty = DirtyState::DofAndWorld;
        Ok(())
    }

    /// Recompute the DOF matrix from the current values. The world matrix
    /// stays stale until the next world update.
    pub fn update_dof_matrix(&mut self, joint: NodeId) -> Result<(), GraphError> {
        let node = self.try_node_mut(joint)?;
        let state = node.joint.as_mut().ok_or(GraphError::NotAJoint(joint.0))?;
        state.refresh_matrix_dof();
        if node.dirty == DirtyState::DofAndWorld {
            node.dirty = DirtyState::World;
        }
        Ok(())
    }

    /// World transform the joint would have with `delta` added to one DOF.
    ///
    /// If `value + delta` leaves the channel's limits, `-delta` is used
    /// instead and the returned flag is `true`. DOF values are not modified.
    pub fn delta_world_matrix(
        &mut self,
        joint: NodeId,
        dof: Dof,
        delta: f64,
    ) -> Result<(Isometry3<f64>, bool), GraphError> {
        let state = self.joint_state(joint)?;
        if !state.dof_flags.contains(dof) {
            return Err(GraphError::InactiveDof { joint: joint.0, dof });
        }

        let mut values = state.dof_values;
        let current = values[dof.index()];
        let inverted = !state.is_within_limits(dof, current + delta);
        values[dof.index()] = if inverted { current - delta } else { current + delta };
        let matrix_dof = compose_dof_transform(&state.dof, &values);

        let parent_world = self.parent_world(joint);
        Ok((parent_world * self.nodes[joint.0].matrix * matrix_dof, inverted))
    }

    // -----------------------------------------------------------------------
    // Closures
    // -----------------------------------------------------------------------

    /// Close `joint` onto an existing link elsewhere in the graph.
    ///
    /// The target is not re-parented; it records the joint in its
    /// `closure_joints` instead.
    pub fn make_closure(&mut self, joint: NodeId, target: NodeId) -> Result<(), GraphError> {
        let state = self.joint_state(joint)?;
        if state.is_closure {
            return Err(GraphError::JointIsClosure(joint.0));
        }
        if state.child.is_some() {
            return Err(GraphError::JointHasChild(joint.0));
        }
        if !self.try_node(target)?.is_link() {
            return Err(GraphError::NotALink(target.0));
        }

        self.joint_state_mut(joint)?.set_child(Some(target), true);
        self.nodes[target.0].closure_joints.push(joint);
        Ok(())
    }

    pub fn is_closure(&self, joint: NodeId) -> bool {
        self.get(joint)
            .and_then(|n| n.joint.as_ref())
            .is_some_and(|j| j.is_closure)
    }

    /// Pose error between a closure joint and its target.
    pub fn closure_error(&mut self, joint: NodeId) -> Result<ClosureError, GraphError> {
        let state = self.joint_state(joint)?;
        let target = match (state.is_closure, state.child) {
            (true, Some(target)) => target,
            _ => return Err(GraphError::NotAClosure(joint.0)),
        };

        let joint_world = self.matrix_world(joint);
        let target_world = self.matrix_world(target);
        Ok(closure_error_between(&joint_world, &target_world))
    }
}

/// Pose error of `joint_world` relative to `target_world`.
pub fn closure_error_between(
    joint_world: &Isometry3<f64>,
    target_world: &Isometry3<f64>,
) -> ClosureError {
    ClosureError {
        position: joint_world.translation.vector - target_world.translation.vector,
        quaternion: quaternion_difference(&joint_world.rotation, &target_world.rotation),
        rotation: rotation_error_vector(&joint_world.rotation, &target_world.rotation),
        angle: quaternion_distance(&joint_world.rotation, &target_world.rotation),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;
    use std::f64::consts::{FRAC_PI_4, PI};

    const INF: f64 = f64::INFINITY;

    // ---- set_dof / clear_dof ----

    #[test]
    fn set_dof_activates_channels_in_order() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        graph.set_dof(joint, &[Dof::X, Dof::Z, Dof::Ex]).unwrap();

        let state = graph.node(joint).joint().unwrap();
        assert_eq!(state.dof(), &[Dof::X, Dof::Z, Dof::Ex]);
        assert_eq!(state.dof_flags().flags(), [true, false, true, true, false, false]);
        assert_eq!(state.translation_dof_count(), 2);
        assert_eq!(state.rotation_dof_count(), 1);
    }

    #[test]
    fn set_dof_resets_buffers() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        graph.set_dof(joint, &[Dof::X, Dof::Z, Dof::Ex]).unwrap();

        graph.set_min_limits(joint, &[1.0, 2.0, 3.0]).unwrap();
        graph.set_max_limits(joint, &[2.0, 4.0, 6.0]).unwrap();
        graph.set_target_values(joint, &[2.0, 4.0, 6.0]).unwrap();
        graph.set_rest_pose_values(joint, &[2.0, 4.0, 6.0]).unwrap();
        graph.set_dof_values(joint, &[1.0, 2.0, 3.0]).unwrap();

        let state = graph.node(joint).joint().unwrap();
        assert_eq!(state.min_dof_limit(), &[1.0, -INF, 2.0, 3.0, -INF, -INF]);
        assert_eq!(state.max_dof_limit(), &[2.0, INF, 4.0, 6.0, INF, INF]);
        assert_eq!(state.dof_target(), &[2.0, 0.0, 4.0, 6.0, 0.0, 0.0]);
        assert_eq!(state.dof_rest_pose(), &[2.0, 0.0, 4.0, 6.0, 0.0, 0.0]);
        assert_eq!(state.dof_values(), &[1.0, 0.0, 2.0, 3.0, 0.0, 0.0]);

        graph.set_dof(joint, &[Dof::X, Dof::Z, Dof::Ex]).unwrap();

        let state = graph.node(joint).joint().unwrap();
        assert_eq!(state.min_dof_limit(), &[-INF; 6]);
        assert_eq!(state.max_dof_limit(), &[INF; 6]);
        assert_eq!(state.dof_target(), &[0.0; 6]);
        assert_eq!(state.dof_rest_pose(), &[0.0; 6]);
        assert_eq!(state.dof_values(), &[0.0; 6]);
    }

    #[test]
    fn set_dof_ignores_repeated_channels() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        graph.set_dof(joint, &[Dof::Ey, Dof::Ey, Dof::Y]).unwrap();

        let state = graph.node(joint).joint().unwrap();
        assert_eq!(state.dof(), &[Dof::Ey, Dof::Y]);
        assert_eq!(state.translation_dof_count() + state.rotation_dof_count(), 2);
    }

    #[test]
    fn clear_dof_matches_empty_set_dof() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        graph.set_dof(joint, &[Dof::X, Dof::Z, Dof::Ex]).unwrap();
        graph.clear_dof(joint).unwrap();

        let state = graph.node(joint).joint().unwrap();
        assert!(state.dof().is_empty());
        assert_eq!(state.dof_flags().flags(), [false; 6]);
        assert_eq!(state.translation_dof_count(), 0);
        assert_eq!(state.rotation_dof_count(), 0);
    }

    #[test]
    fn set_dof_keeps_child() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        let link = graph.add_link();
        graph.add_child(joint, link).unwrap();
        graph.set_dof(joint, &[Dof::Ez]).unwrap();
        assert_eq!(graph.node(joint).joint().unwrap().child(), Some(link));
    }

    #[test]
    fn dof_ops_reject_links() {
        let mut graph = KinematicGraph::new();
        let link = graph.add_link();
        assert_eq!(
            graph.set_dof(link, &[Dof::X]).unwrap_err(),
            GraphError::NotAJoint(link.index())
        );
    }

    // ---- values and limits ----

    #[test]
    fn set_dof_value_clamps_to_limits() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        graph.set_dof(joint, &[Dof::Ez]).unwrap();
        graph.set_min_limit(joint, Dof::Ez, -0.5).unwrap();
        graph.set_max_limit(joint, Dof::Ez, 0.5).unwrap();

        graph.set_dof_value(joint, Dof::Ez, 2.0).unwrap();
        assert_eq!(graph.node(joint).joint().unwrap().dof_value(Dof::Ez), 0.5);

        graph.set_dof_value(joint, Dof::Ez, -2.0).unwrap();
        assert_eq!(graph.node(joint).joint().unwrap().dof_value(Dof::Ez), -0.5);
    }

    #[test]
    fn tightening_a_limit_reclamps_the_value() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        graph.set_dof(joint, &[Dof::X]).unwrap();
        graph.set_dof_value(joint, Dof::X, 3.0).unwrap();
        graph.set_max_limit(joint, Dof::X, 1.0).unwrap();
        assert_eq!(graph.node(joint).joint().unwrap().dof_value(Dof::X), 1.0);
    }

    #[test]
    fn inactive_channel_is_rejected() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        graph.set_dof(joint, &[Dof::X]).unwrap();
        assert_eq!(
            graph.set_dof_value(joint, Dof::Y, 1.0).unwrap_err(),
            GraphError::InactiveDof {
                joint: joint.index(),
                dof: Dof::Y
            }
        );
        assert_eq!(graph.node(joint).joint().unwrap().dof_values(), &[0.0; 6]);
    }

    #[test]
    fn restore_rest_pose_copies_values() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        graph.set_dof(joint, &[Dof::Ex, Dof::Ey]).unwrap();
        graph.set_rest_pose_values(joint, &[0.2, -0.3]).unwrap();
        graph.set_dof_values(joint, &[1.0, 1.0]).unwrap();
        graph.restore_rest_pose(joint).unwrap();
        let state = graph.node(joint).joint().unwrap();
        assert_eq!(state.dof_value(Dof::Ex), 0.2);
        assert_eq!(state.dof_value(Dof::Ey), -0.3);
    }

    // ---- dirty flags ----

    #[test]
    fn set_matrix_dof_needs_update_marks_joint_and_descendants() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        let child = graph.add_link();
        graph.add_child(joint, child).unwrap();

        graph.update_matrix_world(joint, true);
        assert!(!graph.node(joint).matrix_world_needs_update());
        assert!(!graph.node(joint).matrix_dof_needs_update());
        assert!(!graph.node(child).matrix_world_needs_update());

        graph.set_matrix_dof_needs_update(joint).unwrap();
        assert!(graph.node(joint).matrix_world_needs_update());
        assert!(graph.node(joint).matrix_dof_needs_update());
        assert!(graph.node(child).matrix_world_needs_update());

        graph.update_dof_matrix(joint).unwrap();
        assert!(graph.node(joint).matrix_world_needs_update());
        assert!(!graph.node(joint).matrix_dof_needs_update());
        assert!(graph.node(child).matrix_world_needs_update());
    }

    #[test]
    fn update_matrix_world_refreshes_dof_matrix() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        graph.update_matrix_world(joint, false);
        graph.set_matrix_dof_needs_update(joint).unwrap();
        assert!(graph.node(joint).matrix_dof_needs_update());

        graph.update_matrix_world(joint, false);
        assert!(!graph.node(joint).matrix_dof_needs_update());
    }

    #[test]
    fn update_dof_matrix_composes_channels() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        graph.set_dof(joint, &[Dof::X, Dof::Ez]).unwrap();
        graph.set_dof_values(joint, &[0.3, FRAC_PI_4]).unwrap();
        graph.update_dof_matrix(joint).unwrap();

        let matrix_dof = *graph.node(joint).joint().unwrap().matrix_dof();
        let expected = UnitQuaternion::from_euler_angles(0.0, 0.0, FRAC_PI_4);
        assert_relative_eq!(
            matrix_dof.translation.vector,
            Vector3::new(0.3, 0.0, 0.0),
            epsilon = 1e-12
        );
        assert!(quaternion_distance(&matrix_dof.rotation, &expected) < 1e-6);
        assert!(!graph.node(joint).matrix_dof_needs_update());
    }

    // ---- delta_world_matrix ----

    #[test]
    fn delta_world_matrix_inverts_at_limit() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        graph.set_dof(joint, &[Dof::X]).unwrap();
        graph.set_min_limit(joint, Dof::X, 0.0).unwrap();
        graph.set_max_limit(joint, Dof::X, 0.5).unwrap();
        graph.set_dof_value(joint, Dof::X, 0.4).unwrap();
        graph.update_matrix_world(joint, false);

        let (world, inverted) = graph.delta_world_matrix(joint, Dof::X, 0.2).unwrap();
        assert!(inverted);
        assert_relative_eq!(world.translation.vector, Vector3::new(0.2, 0.0, 0.0), epsilon = 1e-12);
        assert_eq!(graph.node(joint).joint().unwrap().dof_value(Dof::X), 0.4);
    }

    #[test]
    fn delta_world_matrix_within_limits() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        graph.set_position(joint, [0.1, -0.2, 0.3]);
        graph.set_dof(joint, &[Dof::Ey]).unwrap();
        graph.update_matrix_world(joint, false);

        let (world, inverted) = graph.delta_world_matrix(joint, Dof::Ey, 0.25).unwrap();
        let expected = UnitQuaternion::from_euler_angles(0.0, 0.25, 0.0);
        assert!(!inverted);
        assert_relative_eq!(
            world.translation.vector,
            Vector3::new(0.1, -0.2, 0.3),
            epsilon = 1e-12
        );
        assert!(quaternion_distance(&world.rotation, &expected) < 1e-6);
    }

    #[test]
    fn delta_world_matrix_includes_parent() {
        let mut graph = KinematicGraph::new();
        let root = graph.add_link();
        let joint = graph.add_joint();
        graph.set_position(root, [1.0, 0.0, 0.0]);
        graph.add_child(root, joint).unwrap();
        graph.set_dof(joint, &[Dof::Z]).unwrap();

        let (world, inverted) = graph.delta_world_matrix(joint, Dof::Z, 0.5).unwrap();
        assert!(!inverted);
        assert_relative_eq!(world.translation.vector, Vector3::new(1.0, 0.0, 0.5), epsilon = 1e-12);
    }

    #[test]
    fn delta_world_matrix_rejects_inactive_channel() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        graph.set_dof(joint, &[Dof::X]).unwrap();
        assert!(matches!(
            graph.delta_world_matrix(joint, Dof::Ez, 0.1),
            Err(GraphError::InactiveDof { .. })
        ));
    }

    // ---- closures ----

    #[test]
    fn make_closure_sets_child_and_back_reference() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        let link = graph.add_link();

        assert!(!graph.is_closure(joint));
        graph.make_closure(joint, link).unwrap();

        assert!(graph.is_closure(joint));
        assert_eq!(graph.node(joint).joint().unwrap().child(), Some(link));
        assert_eq!(graph.node(link).closure_joints(), &[joint]);
        assert!(graph.node(link).parent().is_none());
    }

    #[test]
    fn make_closure_rejects_non_link() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        let joint2 = graph.add_joint();
        assert_eq!(
            graph.make_closure(joint, joint2).unwrap_err(),
            GraphError::NotALink(joint2.index())
        );
        assert!(!graph.is_closure(joint));
    }

    #[test]
    fn make_closure_rejects_joint_with_child() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        let child = graph.add_link();
        let child2 = graph.add_link();
        graph.add_child(joint, child).unwrap();

        assert_eq!(
            graph.make_closure(joint, child2).unwrap_err(),
            GraphError::JointHasChild(joint.index())
        );
        assert!(graph.node(child2).closure_joints().is_empty());
        assert!(graph.node(child).closure_joints().is_empty());
    }

    #[test]
    fn make_closure_rejects_existing_closure() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        let a = graph.add_link();
        let b = graph.add_link();
        graph.make_closure(joint, a).unwrap();
        assert_eq!(
            graph.make_closure(joint, b).unwrap_err(),
            GraphError::JointIsClosure(joint.index())
        );
        assert!(graph.node(b).closure_joints().is_empty());
    }

    #[test]
    fn closure_error_requires_closure() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        assert_eq!(
            graph.closure_error(joint).unwrap_err(),
            GraphError::NotAClosure(joint.index())
        );
    }

    #[test]
    fn closure_error_is_joint_minus_target() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        let link = graph.add_link();
        graph.set_position(joint, [0.25, -0.5, 0.75]);
        graph.set_position(link, [1.25, -0.25, 0.5]);
        graph.set_quaternion(link, UnitQuaternion::identity());
        graph.make_closure(joint, link).unwrap();

        let err = graph.closure_error(joint).unwrap();
        assert_relative_eq!(err.position, Vector3::new(-1.0, -0.25, 0.25), epsilon = 1e-12);
        assert_relative_eq!(err.quaternion.coords.norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(err.angle, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn closure_error_measures_rotation() {
        let mut graph = KinematicGraph::new();
        let joint = graph.add_joint();
        let link = graph.add_link();
        graph.set_dof(joint, &[Dof::Ez]).unwrap();
        graph.set_dof_value(joint, Dof::Ez, 0.3).unwrap();
        graph.set_quaternion(link, UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -0.1));
        graph.make_closure(joint, link).unwrap();

        let err = graph.closure_error(joint).unwrap();
        assert_relative_eq!(err.angle, 0.4, epsilon = 1e-9);
        assert_relative_eq!(err.rotation, Vector3::new(0.0, 0.0, 0.4), epsilon = 1e-9);
    }

    #[test]
    fn closure_error_angle_is_shortest_arc() {
        let joint_world = Isometry3::rotation(Vector3::z() * (PI - 0.1));
        let target_world = Isometry3::rotation(Vector3::z() * (-PI + 0.1));
        let err = closure_error_between(&joint_world, &target_world);
        assert_relative_eq!(err.angle, 0.2, epsilon = 1e-9);
    }
}
