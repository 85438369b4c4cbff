//! The node arena, structural edits and lazily cached world transforms.

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};

use ccik_core::GraphError;

use crate::node::{DirtyState, Node, NodeId, NodeKind};

/// Owner of every link, joint and goal in a mechanism.
///
/// Parent/child edges form a forest. Closure edges (joint to target link)
/// are stored as ids on both sides and may close loops across that forest.
#[derive(Debug, Clone, Default)]
pub struct KinematicGraph {
    pub(crate) nodes: Vec<Node>,
}

impl KinematicGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Creation and lookup
    // -----------------------------------------------------------------------

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(kind));
        id
    }

    pub fn add_link(&mut self) -> NodeId {
        self.push(NodeKind::Link)
    }

    pub fn add_joint(&mut self) -> NodeId {
        self.push(NodeKind::Joint)
    }

    pub fn add_goal(&mut self) -> NodeId {
        self.push(NodeKind::Goal)
    }

    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) {
        self.nodes[id.0].name = name.into();
    }

    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub(crate) fn try_node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(id.0).ok_or(GraphError::UnknownNode(id.0))
    }

    pub(crate) fn try_node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes.get_mut(id.0).ok_or(GraphError::UnknownNode(id.0))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every id in creation order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + use<> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// First node with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    // -----------------------------------------------------------------------
    // Local transforms
    // -----------------------------------------------------------------------

    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    pub fn set_position(&mut self, id: NodeId, position: impl Into<Vector3<f64>>) {
        let node = &mut self.nodes[id.0];
        node.position = position.into();
        node.update_matrix();
        self.mark_world_dirty(id);
    }

    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    pub fn set_quaternion(&mut self, id: NodeId, quaternion: UnitQuaternion<f64>) {
        let node = &mut self.nodes[id.0];
        node.quaternion = quaternion;
        node.update_matrix();
        self.mark_world_dirty(id);
    }

    fn set_local(&mut self, id: NodeId, local: &Isometry3<f64>) {
        let node = &mut self.nodes[id.0];
        node.position = local.translation.vector;
        node.quaternion = local.rotation;
        node.update_matrix();
        self.mark_world_dirty(id);
    }

    /// Move the node so its world position becomes `position`, keeping its
    /// world orientation.
    pub fn set_world_position(&mut self, id: NodeId, position: impl Into<Vector3<f64>>) {
        let world = self.matrix_world(id);
        let target = Isometry3::from_parts(Translation3::from(position.into()), world.rotation);
        let local = self.local_for_world(self.nodes[id.0].parent, id, &target);
        self.set_local(id, &local);
    }

    /// Rotate the node so its world orientation becomes `quaternion`, keeping
    /// its world position.
    pub fn set_world_quaternion(&mut self, id: NodeId, quaternion: UnitQuaternion<f64>) {
        let world = self.matrix_world(id);
        let target = Isometry3::from_parts(world.translation, quaternion);
        let local = self.local_for_world(self.nodes[id.0].parent, id, &target);
        self.set_local(id, &local);
    }

    /// Local transform that puts `id` at `world` when parented to `parent`.
    fn local_for_world(
        &mut self,
        parent: Option<NodeId>,
        id: NodeId,
        world: &Isometry3<f64>,
    ) -> Isometry3<f64> {
        let parent_world = parent.map_or_else(Isometry3::identity, |p| self.matrix_world(p));
        let matrix_dof = self.fresh_matrix_dof(id);
        parent_world.inverse() * world * matrix_dof.inverse()
    }

    /// DOF matrix of a joint (identity for links), refreshed if stale.
    fn fresh_matrix_dof(&mut self, id: NodeId) -> Isometry3<f64> {
        let node = &mut self.nodes[id.0];
        match node.joint.as_mut() {
            Some(state) => {
                if node.dirty == DirtyState::DofAndWorld {
                    state.refresh_matrix_dof();
                    node.dirty = DirtyState::World;
                }
                *state.matrix_dof()
            }
            None => Isometry3::identity(),
        }
    }

    // -----------------------------------------------------------------------
    // Structure
    // -----------------------------------------------------------------------

    /// True if `ancestor` lies strictly above `id` in the forest.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = self.nodes[id.0].parent;
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.nodes[p.0].parent;
        }
        false
    }

    /// Topmost ancestor of `id` (itself if it has no parent).
    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(p) = self.nodes[current.0].parent {
            current = p;
        }
        current
    }

    fn check_add_child(&self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        let parent_node = self.try_node(parent)?;
        let child_node = self.try_node(child)?;

        if let Some(state) = parent_node.joint.as_ref() {
            if !child_node.is_link() {
                return Err(GraphError::NotALink(child.0));
            }
            if state.is_closure() {
                return Err(GraphError::JointIsClosure(parent.0));
            }
            if state.child().is_some() {
                return Err(GraphError::JointHasChild(parent.0));
            }
        }
        if parent == child || self.is_ancestor(child, parent) {
            return Err(GraphError::WouldCreateCycle {
                parent: parent.0,
                child: child.0,
            });
        }
        Ok(())
    }

    /// Re-parent `child` under `parent`, keeping its local transform.
    ///
    /// Links accept any number of children of any kind. A joint accepts one
    /// link child, and none once it is a closure. A child that already has
    /// a parent is detached from it first.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        self.check_add_child(parent, child)?;

        if let Some(old) = self.nodes[child.0].parent {
            self.unlink(old, child);
        }

        self.nodes[child.0].parent = Some(parent);
        let parent_node = &mut self.nodes[parent.0];
        parent_node.children.push(child);
        if let Some(state) = parent_node.joint.as_mut() {
            state.set_child(Some(child), false);
        }
        self.mark_world_dirty(child);
        Ok(())
    }

    /// Undo a parent edge or a closure edge.
    ///
    /// For a closure joint this only drops the closure; the target keeps its
    /// place in the forest.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        let parent_node = self.try_node(parent)?;
        self.try_node(child)?;

        if let Some(state) = parent_node.joint.as_ref() {
            if state.child() != Some(child) {
                return Err(GraphError::ChildMismatch {
                    joint: parent.0,
                    child: child.0,
                });
            }
            if state.is_closure() {
                if let Some(state) = self.nodes[parent.0].joint.as_mut() {
                    state.set_child(None, false);
                }
                self.nodes[child.0].closure_joints.retain(|&j| j != parent);
                return Ok(());
            }
        } else if !parent_node.children.contains(&child) {
            return Err(GraphError::NotAChild {
                parent: parent.0,
                child: child.0,
            });
        }

        self.unlink(parent, child);
        self.nodes[child.0].parent = None;
        self.mark_world_dirty(child);
        Ok(())
    }

    fn unlink(&mut self, parent: NodeId, child: NodeId) {
        let parent_node = &mut self.nodes[parent.0];
        parent_node.children.retain(|&c| c != child);
        if let Some(state) = parent_node.joint.as_mut() {
            state.set_child(None, false);
        }
    }

    /// Like [`KinematicGraph::add_child`], but rewrites the child's local
    /// transform so its world pose does not change.
    pub fn attach_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        self.check_add_child(parent, child)?;

        let world = self.matrix_world(child);
        let local = self.local_for_world(Some(parent), child, &world);
        self.add_child(parent, child)?;
        self.set_local(child, &local);
        Ok(())
    }

    /// Like [`KinematicGraph::remove_child`], but the detached child becomes a
    /// root whose local transform is its former world transform.
    pub fn detach_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        let was_closure = self.try_node(parent)?.joint.as_ref().is_some_and(|j| j.is_closure());
        self.try_node(child)?;

        let world = self.matrix_world(child);
        self.remove_child(parent, child)?;
        if !was_closure {
            let local = self.local_for_world(None, child, &world);
            self.set_local(child, &local);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // World transforms
    // -----------------------------------------------------------------------

    /// Mark `id` and its whole subtree world-dirty. Pending DOF updates are
    /// kept.
    pub(crate) fn mark_world_dirty(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = &mut self.nodes[current.0];
            if node.dirty == DirtyState::Clean {
                node.dirty = DirtyState::World;
            }
            stack.extend_from_slice(&node.children);
        }
    }

    /// Recompute one node from its parent's cached world matrix.
    fn recompute_world(&mut self, id: NodeId) {
        let parent_world = self.nodes[id.0]
            .parent
            .map_or_else(Isometry3::identity, |p| self.nodes[p.0].matrix_world);
        let matrix_dof = self.fresh_matrix_dof(id);
        let node = &mut self.nodes[id.0];
        node.matrix_world = parent_world * node.matrix * matrix_dof;
        node.dirty = DirtyState::Clean;
    }

    /// Bring `id` up to date, along with any dirty ancestors.
    fn ensure_world(&mut self, id: NodeId) {
        let mut path = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            if self.nodes[c.0].dirty == DirtyState::Clean {
                break;
            }
            path.push(c);
            current = self.nodes[c.0].parent;
        }
        for &c in path.iter().rev() {
            self.recompute_world(c);
        }
    }

    /// Refresh the world matrices of `id` and its subtree.
    ///
    /// Dirty ancestors are refreshed first. With `force`, every node in the
    /// subtree is recomputed even if it was clean.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    pub fn update_matrix_world(&mut self, id: NodeId, force: bool) {
        if let Some(parent) = self.nodes[id.0].parent {
            self.ensure_world(parent);
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if force || self.nodes[current.0].dirty != DirtyState::Clean {
                self.recompute_world(current);
            }
            stack.extend(self.nodes[current.0].children.iter().rev());
        }
    }

    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    pub fn matrix_world(&mut self, id: NodeId) -> Isometry3<f64> {
        self.ensure_world(id);
        self.nodes[id.0].matrix_world
    }

    pub fn world_position(&mut self, id: NodeId) -> Vector3<f64> {
        self.matrix_world(id).translation.vector
    }

    pub fn world_quaternion(&mut self, id: NodeId) -> UnitQuaternion<f64> {
        self.matrix_world(id).rotation
    }

    pub(crate) fn parent_world(&mut self, id: NodeId) -> Isometry3<f64> {
        match self.nodes[id.0].parent {
            Some(p) => self.matrix_world(p),
            None => Isometry3::identity(),
        }
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    /// Visit `id` and its descendants depth-first, pre-order, children in
    /// insertion order. Closure edges are not followed.
    pub fn traverse(&self, id: NodeId, mut f: impl FnMut(NodeId, &Node)) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = &self.nodes[current.0];
            f(current, node);
            stack.extend(node.children.iter().rev());
        }
    }

    /// Collect [`KinematicGraph::traverse`] order into a `Vec`.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut ids = Vec::new();
        self.traverse(id, |n, _| ids.push(n));
        ids
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
