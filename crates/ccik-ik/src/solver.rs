//! Damped Least Squares (Levenberg-Marquardt) solver over closure errors.
//!
//! All closures reachable from the root set are solved together: one
//! residual vector, one Jacobian, one DOF update per iteration.

use ccik_core::math::{project_to_null_space, solve_spd_in_place};
use ccik_core::{CcikError, GraphError, MatrixPool, SolverConfig};
use ccik_graph::{KinematicGraph, NodeId};

use crate::system::{ClosureSystem, Evaluation};

/// Damping used after a rejected step when the current damping is zero.
const MIN_RETRY_DAMPING: f64 = 1e-6;

/// Factor applied to the target bias for the rest of a solve after each
/// rejected step.
const BIAS_BACKOFF: f64 = 0.1;

/// Weights of one damped step.
#[derive(Debug, Clone, Copy)]
struct StepWeights {
    /// Levenberg-Marquardt damping.
    lambda: f64,
    /// Gain of the null-space pull toward `dof_target`.
    bias: f64,
}

/// Why a solve stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Every closure is within both thresholds.
    Converged,
    /// An accepted step barely moved any DOF.
    Stalled,
    /// Damping grew past `max_damping`.
    Diverged,
    /// `max_iterations` ran out.
    Timeout,
}

/// Result of a solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    pub status: SolveStatus,
    /// Number of iterations used.
    pub iterations: u32,
    /// Worst masked translation error over all closures (meters).
    pub translation_error: f64,
    /// Worst masked rotation error over all closures (radians).
    pub rotation_error: f64,
}

impl SolveReport {
    pub fn converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }

    fn new(status: SolveStatus, iterations: u32, eval: &Evaluation) -> Self {
        Self {
            status,
            iterations,
            translation_error: eval.translation_error,
            rotation_error: eval.rotation_error,
        }
    }
}

/// Closed-chain solver bound to a set of tree roots.
///
/// Use [`find_roots`](ccik_graph::find_roots) to gather every tree that
/// shares a closure with the trees you care about.
#[derive(Debug)]
pub struct Solver {
    roots: Vec<NodeId>,
    pub config: SolverConfig,
    pool: MatrixPool,
}

impl Solver {
    /// Create a solver with default configuration.
    pub fn new(roots: Vec<NodeId>) -> Self {
        Self::with_config(roots, SolverConfig::default())
    }

    pub fn with_config(roots: Vec<NodeId>, config: SolverConfig) -> Self {
        Self {
            roots,
            config,
            pool: MatrixPool::new(),
        }
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Drive every closure under the roots toward zero error.
    ///
    /// DOF values of the graph are updated in place. The configuration is
    /// validated first.
    pub fn solve(&mut self, graph: &mut KinematicGraph) -> Result<SolveReport, CcikError> {
        let config = self.config.clone();
        config.validate()?;
        for &root in &self.roots {
            graph.get(root).ok_or(GraphError::UnknownNode(root.index()))?;
        }

        let system = ClosureSystem::collect(graph, &self.roots);
        let mut current = Evaluation::new(system.rows);
        if system.is_empty() {
            return Ok(SolveReport::new(SolveStatus::Converged, 0, &current));
        }

        tracing::debug!(
            closures = system.closures.len(),
            columns = system.columns.len(),
            rows = system.rows,
            "solve started"
        );

        let mut candidate = Evaluation::new(system.rows);
        let mut previous = vec![0.0; system.columns.len()];
        let mut lambda = config.damping;
        let mut bias = config.rest_pose_factor;
        system.evaluate(graph, &config, &mut current);

        let mut iteration = 0;
        let status = loop {
            if current.converged(&config) {
                break SolveStatus::Converged;
            }
            if iteration == config.max_iterations {
                break SolveStatus::Timeout;
            }
            if system.columns.is_empty() {
                break SolveStatus::Stalled;
            }
            iteration += 1;

            tracing::trace!(iteration, cost = current.cost(), lambda, bias, "iteration");

            let weights = StepWeights { lambda, bias };
            let step = self.apply_step(graph, &system, &config, &current, weights, &mut previous);
            self.pool.release_all();

            let Some(step_size) = step? else {
                bias *= BIAS_BACKOFF;
                match next_damping(lambda, false, &config) {
                    Some(next) if config.adaptive_damping => {
                        lambda = next;
                        continue;
                    }
                    _ => break SolveStatus::Diverged,
                }
            };

            system.evaluate(graph, &config, &mut candidate);
            if config.adaptive_damping && candidate.cost() > current.cost() {
                restore(graph, &system, &previous)?;
                bias *= BIAS_BACKOFF;
                match next_damping(lambda, false, &config) {
                    Some(next) => lambda = next,
                    None => break SolveStatus::Diverged,
                }
                continue;
            }

            std::mem::swap(&mut current, &mut candidate);
            lambda = next_damping(lambda, true, &config).unwrap_or(lambda);

            if current.converged(&config) {
                break SolveStatus::Converged;
            }
            if step_size < config.stall_threshold {
                break SolveStatus::Stalled;
            }
        };

        let report = SolveReport::new(status, iteration, &current);
        tracing::debug!(
            status = ?report.status,
            iterations = report.iterations,
            translation_error = report.translation_error,
            rotation_error = report.rotation_error,
            "solve finished"
        );
        Ok(report)
    }

    /// Solve for one damped step and write it through the clamped setters.
    ///
    /// Returns the largest change actually applied to any DOF, or `None` if
    /// the damped normal equations could not be factored (nothing applied).
    /// Previous values are saved into `previous` for a possible rollback.
    fn apply_step(
        &mut self,
        graph: &mut KinematicGraph,
        system: &ClosureSystem,
        config: &SolverConfig,
        current: &Evaluation,
        weights: StepWeights,
        previous: &mut [f64],
    ) -> Result<Option<f64>, CcikError> {
        let rows = system.rows;
        let cols = system.columns.len();
        let handles = [
            self.pool.get(rows, cols),
            self.pool.get(rows, 1),
            self.pool.get(cols, cols),
            self.pool.get(cols, 1),
            self.pool.get(cols, 1),
        ];
        let [jacobian, probed, lhs, rhs, bias] = self.pool.disjoint_mut(handles)?;

        system.jacobian(graph, config, current, jacobian, probed)?;

        // (J^T J + lambda^2 I) dq = -J^T e
        let error = probed;
        error.as_mut_slice().copy_from_slice(current.clamped.as_slice());
        lhs.gemm_tr(1.0, &*jacobian, &*jacobian, 0.0);
        rhs.gemm_tr(-1.0, &*jacobian, &*error, 0.0);
        for (i, column) in system.columns.iter().enumerate() {
            let state = graph
                .node(column.joint)
                .joint()
                .ok_or(GraphError::NotAJoint(column.joint.index()))?;
            let value = state.dof_value(column.dof);
            lhs[(i, i)] += weights.lambda * weights.lambda;
            bias[i] = state.dof_target()[column.dof.index()] - value;
            previous[i] = value;
        }

        if !solve_spd_in_place(lhs, rhs) {
            return Ok(None);
        }

        // Pull toward the targets only along directions no closure sees.
        let weight = weights.bias;
        if weight > 0.0 {
            project_to_null_space(jacobian, bias.as_mut_slice());
        } else {
            bias.fill(0.0);
        }

        let mut step_size: f64 = 0.0;
        for (i, column) in system.columns.iter().enumerate() {
            let value = previous[i] + rhs[i] + weight * bias[i];
            graph.set_dof_value(column.joint, column.dof, value)?;
            let applied = graph
                .node(column.joint)
                .joint()
                .map_or(previous[i], |state| state.dof_value(column.dof));
            step_size = step_size.max((applied - previous[i]).abs());
        }
        Ok(Some(step_size))
    }
}

/// Write back the DOF values saved before a rejected step.
fn restore(
    graph: &mut KinematicGraph,
    system: &ClosureSystem,
    previous: &[f64],
) -> Result<(), GraphError> {
    for (column, &value) in system.columns.iter().zip(previous) {
        graph.set_dof_value(column.joint, column.dof, value)?;
    }
    Ok(())
}

/// Damping after an accepted or rejected step, or `None` once it would
/// exceed `max_damping`.
fn next_damping(lambda: f64, accepted: bool, config: &SolverConfig) -> Option<f64> {
    if !config.adaptive_damping {
        return Some(lambda);
    }
    let next = if accepted {
        (lambda / 2.0).max(config.damping)
    } else {
        (lambda * 10.0).max(MIN_RETRY_DAMPING)
    };
    (next <= config.max_damping).then_some(next)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
