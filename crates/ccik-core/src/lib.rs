// ccik-core: DOF types, errors, solver config and pooled numerics for closed-chain IK.

pub mod config;
pub mod error;
pub mod math;
pub mod pool;
pub mod types;

pub use config::SolverConfig;
pub use error::{AxisError, CcikError, ConfigError, GraphError, PoolError};
pub use pool::{MatrixHandle, MatrixPool};
pub use types::{Dof, DofSet};
