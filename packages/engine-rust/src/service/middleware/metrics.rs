//! Per-message timing and outcome, recorded on `tracing` spans.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use switchyard_core::MessageContext;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::mediation::{DispatchError, MediationOutcome};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Wraps each message in a `mediation` span carrying duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Outcome label recorded for a finished message.
fn outcome_label(result: &Result<MediationOutcome, DispatchError>) -> &'static str {
    match result {
        Ok(out) if out.proceed => "continue",
        Ok(_) => "stopped",
        Err(DispatchError::Overloaded) => "shed",
        Err(_) => "error",
    }
}

impl<S> Service<MessageContext> for MetricsService<S>
where
    S: Service<MessageContext, Response = MediationOutcome, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = MediationOutcome;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<MediationOutcome, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, ctx: MessageContext) -> Self::Future {
        let message_id = ctx.message_id.clone();
        let span = info_span!(
            "mediation",
            message_id = %message_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(ctx);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                let outcome = outcome_label(&result);

                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);
                tracing::info!(
                    message_id = %message_id,
                    duration_ms,
                    outcome,
                    "mediation complete"
                );

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
