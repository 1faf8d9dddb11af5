//! Composes the middleware layers around [`MediationService`].

use std::sync::Arc;

use switchyard_core::MessageContext;
use tower::ServiceBuilder;

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::service::mediation::{DispatchError, MediationOutcome, MediationService};

/// Builds the per-message service stack.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- time and label every message, shed ones included
/// 2. `LoadShedLayer` -- reject when at capacity, before any work
#[must_use]
pub fn build_mediation_pipeline(
    engine: Arc<Engine>,
    config: &EngineConfig,
) -> impl tower::Service<MessageContext, Response = MediationOutcome, Error = DispatchError> + Clone
{
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(LoadShedLayer::new(config.max_concurrent_messages))
        .service(MediationService::new(engine))
}
