//! Discovery of every tree that participates in a closed-chain system.

use std::collections::VecDeque;

use crate::graph::KinematicGraph;
use crate::node::NodeId;

/// Roots of every tree reachable from `seeds` through closure edges.
///
/// Each seed is first climbed to its root. Trees are then scanned in
/// breadth-first order: every node visited pre-order enqueues the roots of
/// the joints closing onto it, then, for a closure joint, the root of its
/// target. The result is de-duplicated and in discovery order.
///
/// # Panics
///
/// Panics if a seed was not issued by `graph`.
pub fn find_roots(graph: &KinematicGraph, seeds: &[NodeId]) -> Vec<NodeId> {
    fn enqueue(root: NodeId, roots: &mut Vec<NodeId>, queue: &mut VecDeque<NodeId>) {
        if !roots.contains(&root) {
            roots.push(root);
            queue.push_back(root);
        }
    }

    let mut roots = Vec::new();
    let mut queue = VecDeque::new();

    for &seed in seeds {
        enqueue(graph.root_of(seed), &mut roots, &mut queue);
    }

    while let Some(root) = queue.pop_front() {
        for id in graph.subtree(root) {
            let node = graph.node(id);
            for &joint in node.closure_joints() {
                enqueue(graph.root_of(joint), &mut roots, &mut queue);
            }
            if let Some(state) = node.joint().filter(|j| j.is_closure()) {
                if let Some(target) = state.child() {
                    enqueue(graph.root_of(target), &mut roots, &mut queue);
                }
            }
        }
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `parent` owns two joints; each closes onto a link in its own tree.
    fn two_closures() -> (KinematicGraph, [NodeId; 3]) {
        let mut graph = KinematicGraph::new();
        let parent = graph.add_link();
        let joint = graph.add_joint();
        let joint2 = graph.add_joint();
        let closure_child = graph.add_link();
        let closure_child2 = graph.add_link();
        let nested = graph.add_link();

        graph.add_child(parent, joint).unwrap();
        graph.add_child(parent, joint2).unwrap();
        graph.add_child(closure_child2, nested).unwrap();
        graph.make_closure(joint, closure_child).unwrap();
        graph.make_closure(joint2, nested).unwrap();

        (graph, [parent, closure_child, closure_child2])
    }

    #[test]
    fn roots_from_parent() {
        let (graph, [parent, closure_child, closure_child2]) = two_closures();
        assert_eq!(
            find_roots(&graph, &[parent]),
            vec![parent, closure_child, closure_child2]
        );
    }

    #[test]
    fn roots_from_closure_target() {
        let (graph, [parent, closure_child, closure_child2]) = two_closures();
        assert_eq!(
            find_roots(&graph, &[closure_child]),
            vec![closure_child, parent, closure_child2]
        );
    }

    #[test]
    fn seeds_are_climbed_and_deduplicated() {
        let (graph, [parent, closure_child, closure_child2]) = two_closures();
        let nested = graph.node(closure_child2).children()[0];
        assert_eq!(
            find_roots(&graph, &[nested, closure_child2, parent]),
            vec![closure_child2, parent, closure_child]
        );
    }

    /// `parent -> joint => closure_child -> joint2 => closure_child2`: the
    /// second tree is only reachable through a joint owned by a closure target.
    fn chained_closures() -> (KinematicGraph, [NodeId; 3]) {
        let mut graph = KinematicGraph::new();
        let parent = graph.add_link();
        let joint = graph.add_joint();
        let closure_child = graph.add_link();
        let joint2 = graph.add_joint();
        let closure_child2 = graph.add_link();

        graph.add_child(parent, joint).unwrap();
        graph.make_closure(joint, closure_child).unwrap();
        graph.add_child(closure_child, joint2).unwrap();
        graph.make_closure(joint2, closure_child2).unwrap();

        (graph, [parent, closure_child, closure_child2])
    }

    #[test]
    fn chained_closures_from_parent() {
        let (graph, [parent, closure_child, closure_child2]) = chained_closures();
        assert_eq!(
            find_roots(&graph, &[parent]),
            vec![parent, closure_child, closure_child2]
        );
    }

    #[test]
    fn chained_closures_from_closure_target() {
        let (graph, [parent, closure_child, closure_child2]) = chained_closures();
        assert_eq!(
            find_roots(&graph, &[closure_child]),
            vec![closure_child, parent, closure_child2]
        );
        assert_eq!(
            find_roots(&graph, &[closure_child2]),
            vec![closure_child2, closure_child, parent]
        );
    }

    #[test]
    fn isolated_tree_is_its_own_root() {
        let mut graph = KinematicGraph::new();
        let root = graph.add_link();
        let joint = graph.add_joint();
        graph.add_child(root, joint).unwrap();
        assert_eq!(find_roots(&graph, &[joint]), vec![root]);
        assert!(find_roots(&graph, &[]).is_empty());
    }
}
