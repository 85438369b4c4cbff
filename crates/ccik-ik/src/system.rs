//! The closure equations a solve drives to zero: which closures exist, which
//! DOFs move them, how residuals are laid out, and their finite-difference
//! Jacobian.

use nalgebra::{DMatrix, DVector, Isometry3, Vector3};

use ccik_core::math::clamp_norm;
use ccik_core::{Dof, DofSet, GraphError, SolverConfig};
use ccik_graph::{ClosureError, KinematicGraph, NodeId, closure_error_between};

/// One closure edge and the rows it owns.
#[derive(Debug, Clone)]
pub(crate) struct Closure {
    pub joint: NodeId,
    pub target: NodeId,
    pub mask: DofSet,
    pub row: usize,
}

/// A closure endpoint moved by some column's joint.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Influence {
    closure: usize,
    moves_joint: bool,
    moves_target: bool,
}

/// One free channel and the closures it moves.
#[derive(Debug, Clone)]
pub(crate) struct Column {
    pub joint: NodeId,
    pub dof: Dof,
    influences: Vec<Influence>,
}

/// Residuals and endpoint poses at one configuration.
#[derive(Debug, Clone)]
pub(crate) struct Evaluation {
    /// Weighted, masked residual.
    pub error: DVector<f64>,
    /// Same layout with the translation and rotation parts norm-clamped.
    pub clamped: DVector<f64>,
    /// `(joint world, target world)` per closure.
    pub worlds: Vec<(Isometry3<f64>, Isometry3<f64>)>,
    /// Worst masked translation error over all closures.
    pub translation_error: f64,
    /// Worst masked rotation error over all closures.
    pub rotation_error: f64,
}

impl Evaluation {
    pub fn new(rows: usize) -> Self {
        Self {
            error: DVector::zeros(rows),
            clamped: DVector::zeros(rows),
            worlds: Vec::new(),
            translation_error: 0.0,
            rotation_error: 0.0,
        }
    }

    pub fn cost(&self) -> f64 {
        self.error.norm_squared()
    }

    pub fn converged(&self, config: &SolverConfig) -> bool {
        self.translation_error < config.translation_converge_threshold
            && self.rotation_error < config.rotation_converge_threshold
    }
}

/// Closures and free columns gathered from a root set.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClosureSystem {
    pub closures: Vec<Closure>,
    pub columns: Vec<Column>,
    pub rows: usize,
}

impl ClosureSystem {
    /// Walk every tree under `roots` once, pre-order.
    ///
    /// Columns are the active channels of non-goal joints whose subtree holds
    /// at least one closure endpoint.
    pub fn collect(graph: &KinematicGraph, roots: &[NodeId]) -> Self {
        let mut seen = vec![false; graph.len()];
        let mut order = Vec::new();
        for &root in roots {
            graph.traverse(root, |id, _| {
                if !seen[id.index()] {
                    seen[id.index()] = true;
                    order.push(id);
                }
            });
        }

        let mut closures = Vec::new();
        let mut rows = 0;
        for &id in &order {
            let Some(state) = graph.node(id).joint() else {
                continue;
            };
            if let (true, Some(target)) = (state.is_closure(), state.child()) {
                let mask = graph.closure_mask(id);
                closures.push(Closure {
                    joint: id,
                    target,
                    mask,
                    row: rows,
                });
                rows += mask.len();
            }
        }

        let mut columns = Vec::new();
        for &id in &order {
            let node = graph.node(id);
            let Some(state) = node.joint().filter(|_| !node.is_goal()) else {
                continue;
            };
            if state.dof().is_empty() {
                continue;
            }

            let in_subtree = |endpoint: NodeId| endpoint == id || graph.is_ancestor(id, endpoint);
            let influences: Vec<Influence> = closures
                .iter()
                .enumerate()
                .filter_map(|(i, c)| {
                    let moves_joint = in_subtree(c.joint);
                    let moves_target = in_subtree(c.target);
                    (moves_joint || moves_target).then_some(Influence {
                        closure: i,
                        moves_joint,
                        moves_target,
                    })
                })
                .collect();
            if influences.is_empty() {
                continue;
            }

            for &dof in state.dof() {
                columns.push(Column {
                    joint: id,
                    dof,
                    influences: influences.clone(),
                });
            }
        }

        Self {
            closures,
            columns,
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.closures.is_empty()
    }

    /// Fill `eval` from the current graph state.
    pub fn evaluate(
        &self,
        graph: &mut KinematicGraph,
        config: &SolverConfig,
        eval: &mut Evaluation,
    ) {
        if eval.error.len() != self.rows {
            eval.error = DVector::zeros(self.rows);
            eval.clamped = DVector::zeros(self.rows);
        }
        eval.worlds.clear();
        eval.translation_error = 0.0;
        eval.rotation_error = 0.0;

        for closure in &self.closures {
            let joint_world = graph.matrix_world(closure.joint);
            let target_world = graph.matrix_world(closure.target);
            let error = closure_error_between(&joint_world, &target_world);
            eval.worlds.push((joint_world, target_world));

            let translation = masked(error.position, closure.mask, &Dof::TRANSLATION);
            let rotation = masked(error.rotation, closure.mask, &Dof::ROTATION);
            eval.translation_error = eval.translation_error.max(translation.norm());
            eval.rotation_error = eval.rotation_error.max(rotation.norm());

            write_rows(eval.error.as_mut_slice(), closure, &error, config);
            let clamped = ClosureError {
                position: clamp_norm(translation, config.translation_error_clamp),
                rotation: clamp_norm(rotation, config.rotation_error_clamp),
                ..error
            };
            write_rows(eval.clamped.as_mut_slice(), closure, &clamped, config);
        }
    }

    /// Forward-difference Jacobian of the residual with respect to every
    /// column, around the configuration captured in `eval`.
    ///
    /// Each probe carries the joint's world change onto the endpoints in its
    /// subtree instead of refreshing the whole graph.
    pub fn jacobian(
        &self,
        graph: &mut KinematicGraph,
        config: &SolverConfig,
        eval: &Evaluation,
        jacobian: &mut DMatrix<f64>,
        probed: &mut DMatrix<f64>,
    ) -> Result<(), GraphError> {
        for (col, column) in self.columns.iter().enumerate() {
            let (delta_world, inverted) =
                graph.delta_world_matrix(column.joint, column.dof, config.probe_delta)?;
            let step = if inverted { -config.probe_delta } else { config.probe_delta };
            let carry = delta_world * graph.matrix_world(column.joint).inverse();

            for influence in &column.influences {
                let closure = &self.closures[influence.closure];
                let (mut joint_world, mut target_world) = eval.worlds[influence.closure];
                if influence.moves_joint {
                    joint_world = carry * joint_world;
                }
                if influence.moves_target {
                    target_world = carry * target_world;
                }

                let error = closure_error_between(&joint_world, &target_world);
                write_rows(probed.as_mut_slice(), closure, &error, config);
                for row in closure.row..closure.row + closure.mask.len() {
                    jacobian[(row, col)] = (probed[row] - eval.error[row]) / step;
                }
            }
        }
        Ok(())
    }
}

/// Zero the components of `v` whose channel is not in `mask`.
fn masked(v: Vector3<f64>, mask: DofSet, channels: &[Dof; 3]) -> Vector3<f64> {
    Vector3::from_fn(|i, _| if mask.contains(channels[i]) { v[i] } else { 0.0 })
}

/// Write a closure's weighted residual rows, one per masked channel in
/// channel order.
fn write_rows(out: &mut [f64], closure: &Closure, error: &ClosureError, config: &SolverConfig) {
    for (offset, dof) in closure.mask.iter().enumerate() {
        out[closure.row + offset] = if dof.is_translation() {
            config.translation_factor * error.position[dof.axis_index()]
        } else {
            config.rotation_factor * error.rotation[dof.axis_index()]
        };
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
