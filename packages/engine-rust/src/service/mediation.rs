//! `tower::Service` wrapper around [`Engine::mediate`].
//!
//! Mediation is synchronous and may call a blocking transport, so each
//! message runs on tokio's blocking pool.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use switchyard_core::MessageContext;
use tower::Service;

use crate::engine::Engine;
use crate::error::MediationError;

/// Message context after mediation, plus the pipeline's continue flag.
#[derive(Debug)]
pub struct MediationOutcome {
    pub ctx: MessageContext,
    pub proceed: bool,
}

/// Errors surfaced by the service stack.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("engine overloaded, message rejected")]
    Overloaded,
    #[error("mediation of message {message_id} failed: {source}")]
    Mediation {
        message_id: String,
        #[source]
        source: MediationError,
    },
    #[error("mediation worker failed: {0}")]
    Worker(String),
}

/// Innermost service of the pipeline: runs one message through the engine.
#[derive(Debug, Clone)]
pub struct MediationService {
    engine: Arc<Engine>,
}

impl MediationService {
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

impl Service<MessageContext> for MediationService {
    type Response = MediationOutcome;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<MediationOutcome, DispatchError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut ctx: MessageContext) -> Self::Future {
        let engine = Arc::clone(&self.engine);
        Box::pin(async move {
            let (ctx, result) = tokio::task::spawn_blocking(move || {
                let result = engine.mediate(&mut ctx);
                (ctx, result)
            })
            .await
            .map_err(|err| DispatchError::Worker(err.to_string()))?;

            match result {
                Ok(proceed) => Ok(MediationOutcome { ctx, proceed }),
                Err(source) => Err(DispatchError::Mediation {
                    message_id: ctx.message_id,
                    source,
                }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;
    use crate::config::ConfigurationBuilder;
    use crate::registry::Registry;
    use crate::testing::RecordingTransport;

    fn engine(json: &str) -> Arc<Engine> {
        let config = ConfigurationBuilder::new().build_json(json).unwrap();
        Arc::new(Engine::new(
            Arc::new(Registry::new(config)),
            Arc::new(RecordingTransport::new()),
        ))
    }

    #[tokio::test]
    async fn returns_context_and_flag() {
        let svc = MediationService::new(engine(
            r#"{"sequences": {"main": {"children": [
                {"kind": "property", "name": "stamped", "value": true},
                {"kind": "drop"}
            ]}}}"#,
        ));
        let out = svc.oneshot(MessageContext::new("body")).await.unwrap();
        assert!(!out.proceed);
        assert!(out.ctx.property("stamped").is_some());
        assert_eq!(out.ctx.payload, "body");
    }

    #[tokio::test]
    async fn mediation_errors_carry_message_id() {
        let svc = MediationService::new(engine("{}"));
        let ctx = MessageContext::new("");
        let id = ctx.message_id.clone();
        let err = svc.oneshot(ctx).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Mediation { message_id, source: MediationError::NoMainSequence { .. } }
                if message_id == id
        ));
    }
}
