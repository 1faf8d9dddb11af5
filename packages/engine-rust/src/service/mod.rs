//! Async surface around the synchronous engine.
//!
//! 1. **Mediation** (`mediation`): `tower::Service<MessageContext>` running
//!    the engine on the blocking pool
//! 2. **Middleware** (`middleware`): load shedding and metrics layers
//! 3. **Background workers** (`worker`, `recovery`): periodic endpoint
//!    recovery sweeps

pub mod mediation;
pub mod middleware;
pub mod recovery;
pub mod worker;

pub use mediation::{DispatchError, MediationOutcome, MediationService};
pub use middleware::{build_mediation_pipeline, LoadShedLayer, MetricsLayer};
pub use recovery::{RecoveryTask, RecoveryWorker};
pub use worker::{BackgroundRunnable, BackgroundWorker};
