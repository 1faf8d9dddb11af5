//! Tower middleware for the mediation service.
//!
//! - [`metrics`]: message timing and outcome via `tracing` spans
//! - [`load_shed`]: semaphore-based concurrency limit
//! - [`pipeline`]: composes the layers into one service stack

pub mod load_shed;
pub mod metrics;
pub mod pipeline;

pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::build_mediation_pipeline;
