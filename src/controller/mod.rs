pub mod apply;
pub mod clustering;
pub mod context;
pub mod error;
pub mod reconciler;
pub mod validation;

pub use clustering::{ClusterKey, ClusterManager, NopClusterManager};
pub use context::{Context, OperatorImages};
pub use error::{BackoffConfig, Error, Result};
pub use reconciler::{error_policy, reconcile, CURRENT_RECONCILE_VERSION};
