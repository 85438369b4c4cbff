//! Ready-made mechanisms for solver and graph tests.

use std::f64::consts::FRAC_PI_2;

use nalgebra::{UnitQuaternion, Vector3};

use ccik_core::{CcikError, Dof};
use ccik_graph::{KinematicGraph, NodeId, find_roots};

/// Open chain of single-axis revolute joints closed by a goal.
#[derive(Debug, Clone)]
pub struct SerialChain {
    pub root: NodeId,
    pub joints: Vec<NodeId>,
    /// Link driven toward the goal.
    pub end: NodeId,
    /// Goal parented to `root`, closed onto `end`.
    pub goal: NodeId,
    pub roots: Vec<NodeId>,
}

/// Build a chain `root -> joint -> link -> joint -> link ... -> end`.
///
/// Joint `i` rotates about the dominant component of `axes[i]` and sits at
/// `offsets[i]` in its parent's frame. The last link is placed at `tip`
/// relative to the last joint. The goal starts on top of `end`, so the
/// closure is satisfied until the goal is moved.
pub fn serial_chain(
    graph: &mut KinematicGraph,
    axes: &[[f64; 3]],
    offsets: &[[f64; 3]],
    tip: [f64; 3],
    goal_dof: &[Dof],
) -> Result<SerialChain, CcikError> {
    let root = graph.add_link();
    graph.set_name(root, "root");

    let mut parent = root;
    let mut joints = Vec::with_capacity(axes.len());
    for (i, (axis, offset)) in axes.iter().zip(offsets).enumerate() {
        let joint = graph.add_joint();
        graph.set_name(joint, format!("joint{i}"));
        graph.set_dof(joint, &[Dof::from_axis(*axis)?])?;
        graph.set_position(joint, *offset);
        graph.add_child(parent, joint)?;

        let link = graph.add_link();
        graph.set_name(link, format!("link{i}"));
        graph.add_child(joint, link)?;
        joints.push(joint);
        parent = link;
    }
    let end = parent;
    graph.set_position(end, tip);

    let goal = graph.add_goal();
    graph.set_name(goal, "goal");
    graph.add_child(root, goal)?;
    let end_world = graph.matrix_world(end);
    graph.set_world_position(goal, end_world.translation.vector);
    graph.set_world_quaternion(goal, end_world.rotation);
    graph.make_closure(goal, end)?;
    graph.set_goal_dof(goal, goal_dof)?;

    let roots = find_roots(graph, &[root]);
    Ok(SerialChain {
        root,
        joints,
        end,
        goal,
        roots,
    })
}

/// Two unit-length links rotating about Z in the XY plane, base at the
/// origin, reaching to `(2, 0, 0)` when straight. Only the goal position is
/// constrained.
pub fn planar_two_link(graph: &mut KinematicGraph) -> Result<SerialChain, CcikError> {
    serial_chain(
        graph,
        &[[0.0, 0.0, 1.0], [0.0, 0.0, 1.0]],
        &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
        [1.0, 0.0, 0.0],
        &Dof::TRANSLATION,
    )
}

/// Three unit-length links rotating about Z, one more joint than a planar
/// position goal needs.
pub fn planar_three_link(graph: &mut KinematicGraph) -> Result<SerialChain, CcikError> {
    serial_chain(
        graph,
        &[[0.0, 0.0, 1.0]; 3],
        &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
        [1.0, 0.0, 0.0],
        &Dof::TRANSLATION,
    )
}

/// Planar parallelogram four-bar linkage spread over two trees.
#[derive(Debug, Clone)]
pub struct FourBar {
    pub ground_a: NodeId,
    pub ground_b: NodeId,
    /// Input joint with no free channels; its angle is set by orientation.
    pub crank: NodeId,
    pub elbow: NodeId,
    /// Coupler end, closed onto `target`.
    pub closure: NodeId,
    pub rocker: NodeId,
    pub target: NodeId,
    pub roots: Vec<NodeId>,
}

/// Build a four-bar with ground pivots at the origin and `(2, 0, 0)`,
/// unit crank and rocker, and a coupler of length 2.
///
/// The free joints start in the upright parallelogram (`crank_angle` of
/// pi/2). Any other `crank_angle` leaves the loop open for the solver to
/// close; the parallelogram solution is `elbow = -crank_angle`,
/// `closure = rocker = crank_angle`.
pub fn four_bar_linkage(
    graph: &mut KinematicGraph,
    crank_angle: f64,
) -> Result<FourBar, CcikError> {
    let ground_a = graph.add_link();
    let crank = graph.add_joint();
    let crank_link = graph.add_link();
    let elbow = graph.add_joint();
    let coupler = graph.add_link();
    let closure = graph.add_joint();

    graph.set_quaternion(crank, UnitQuaternion::from_axis_angle(&Vector3::z_axis(), crank_angle));
    graph.add_child(ground_a, crank)?;
    graph.add_child(crank, crank_link)?;

    graph.set_position(elbow, [1.0, 0.0, 0.0]);
    graph.set_dof(elbow, &[Dof::Ez])?;
    graph.set_dof_value(elbow, Dof::Ez, -FRAC_PI_2)?;
    graph.add_child(crank_link, elbow)?;
    graph.add_child(elbow, coupler)?;

    graph.set_position(closure, [2.0, 0.0, 0.0]);
    graph.set_dof(closure, &[Dof::Ez])?;
    graph.set_dof_value(closure, Dof::Ez, FRAC_PI_2)?;
    graph.add_child(coupler, closure)?;

    let ground_b = graph.add_link();
    let rocker = graph.add_joint();
    let target = graph.add_link();
    graph.set_position(ground_b, [2.0, 0.0, 0.0]);
    graph.set_dof(rocker, &[Dof::Ez])?;
    graph.set_dof_value(rocker, Dof::Ez, FRAC_PI_2)?;
    graph.add_child(ground_b, rocker)?;
    graph.set_position(target, [1.0, 0.0, 0.0]);
    graph.add_child(rocker, target)?;

    graph.make_closure(closure, target)?;

    let roots = find_roots(graph, &[ground_a]);
    Ok(FourBar {
        ground_a,
        ground_b,
        crank,
        elbow,
        closure,
        rocker,
        target,
        roots,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
