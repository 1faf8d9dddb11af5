//! Background re-activation of suspended endpoints.
//!
//! Address endpoints already recover lazily when a send finds their
//! suspension over. The sweep makes recovery visible without traffic, so an
//! idle endpoint does not report itself down long after it came back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::worker::{BackgroundRunnable, BackgroundWorker};
use crate::engine::Engine;

/// Work accepted by the recovery worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryTask {
    /// Re-activate every address endpoint whose suspension has ended.
    Sweep,
    /// Force the named endpoint back to active.
    Reactivate { key: String },
}

/// Sweeps the live configuration's endpoint tree on every tick.
pub struct RecoveryWorker {
    engine: Arc<Engine>,
    recovered: Arc<AtomicU64>,
}

impl RecoveryWorker {
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            recovered: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared count of endpoints this worker has brought back.
    #[must_use]
    pub fn recovered_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.recovered)
    }

    /// Starts the worker at the configured sweep interval.
    ///
    /// The interval is read from the configuration live at spawn time. Later
    /// swaps change what each sweep walks but not how often it runs; restart
    /// the worker to pick up a new interval.
    #[must_use]
    pub fn spawn(self) -> BackgroundWorker<Self> {
        let interval_ms = self
            .engine
            .registry()
            .snapshot()
            .settings()
            .recovery_sweep_interval_ms;
        BackgroundWorker::start(self, Duration::from_millis(interval_ms.max(1)))
    }

    fn sweep(&self) {
        let config = self.engine.registry().snapshot();
        let recovered = config.endpoints().recover_expired(self.engine.clock().now());
        if recovered.is_empty() {
            return;
        }
        self.recovered
            .fetch_add(recovered.len() as u64, Ordering::Relaxed);
        debug!(count = recovered.len(), "recovery sweep re-activated endpoints");
    }
}

#[async_trait]
impl BackgroundRunnable for RecoveryWorker {
    type Task = RecoveryTask;

    fn name(&self) -> &'static str {
        "endpoint-recovery"
    }

    async fn run(&mut self, task: RecoveryTask) {
        match task {
            RecoveryTask::Sweep => self.sweep(),
            RecoveryTask::Reactivate { key } => match self.engine.reactivate(&key) {
                Ok(()) => {
                    self.recovered.fetch_add(1, Ordering::Relaxed);
                    info!(endpoint = %key, "endpoint re-activated on request");
                }
                Err(err) => warn!(endpoint = %key, error = %err, "cannot re-activate endpoint"),
            },
        }
    }

    async fn on_tick(&mut self) {
        self.sweep();
    }
}

#[cfg(test)]
mod tests {
    use switchyard_core::{ManualClock, MessageContext};

    use super::*;
    use crate::config::ConfigurationBuilder;
    use crate::registry::Registry;
    use crate::testing::RecordingTransport;

    fn setup() -> (Arc<Engine>, Arc<RecordingTransport>, Arc<ManualClock>) {
        let config = ConfigurationBuilder::new()
            .build_json(
                r#"{"endpoints": {
                    "timed": {"kind": "address", "target": "t", "suspend_on_failure_ms": 1000},
                    "manual": {"kind": "address", "target": "m"}
                }}"#,
            )
            .unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let clock = Arc::new(ManualClock::new(0));
        let engine = Engine::new(Arc::new(Registry::new(config)), transport.clone())
            .with_clock(clock.clone());
        (Arc::new(engine), transport, clock)
    }

    fn is_active(engine: &Engine, key: &str) -> bool {
        let config = engine.registry().snapshot();
        let id = config.resolve_endpoint(key).unwrap();
        config.endpoints().is_active(id, 0).unwrap()
    }

    #[tokio::test]
    async fn sweep_restores_expired_suspensions() {
        let (engine, transport, clock) = setup();
        transport.fail("t");
        assert!(engine.send(&mut MessageContext::new(""), "timed").is_err());
        assert!(!is_active(&engine, "timed"));

        let worker = RecoveryWorker::new(Arc::clone(&engine));
        let recovered = worker.recovered_counter();
        let mut handle = BackgroundWorker::start(worker, Duration::from_secs(60));

        handle.submit(RecoveryTask::Sweep).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(recovered.load(Ordering::Relaxed), 0);

        clock.advance(1_001);
        handle.submit(RecoveryTask::Sweep).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(recovered.load(Ordering::Relaxed), 1);
        // Checked at time zero: only the sweep can have re-armed the flag.
        assert!(is_active(&engine, "timed"));

        handle.stop().await;
    }

    #[tokio::test]
    async fn reactivate_task_clears_indefinite_suspension() {
        let (engine, transport, _clock) = setup();
        transport.fail("m");
        assert!(engine.send(&mut MessageContext::new(""), "manual").is_err());
        transport.heal("m");

        let worker = RecoveryWorker::new(Arc::clone(&engine));
        let recovered = worker.recovered_counter();
        let mut handle = BackgroundWorker::start(worker, Duration::from_secs(60));
        handle
            .submit(RecoveryTask::Reactivate {
                key: "manual".to_string(),
            })
            .await
            .unwrap();
        handle
            .submit(RecoveryTask::Reactivate {
                key: "unknown".to_string(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop().await;

        assert_eq!(recovered.load(Ordering::Relaxed), 1);
        engine.send(&mut MessageContext::new(""), "manual").unwrap();
        assert_eq!(transport.delivered(), vec!["m"]);
    }

    #[tokio::test]
    async fn periodic_sweep_runs_without_tasks() {
        let (engine, transport, clock) = setup();
        transport.fail("t");
        assert!(engine.send(&mut MessageContext::new(""), "timed").is_err());
        clock.advance(5_000);

        let worker = RecoveryWorker::new(Arc::clone(&engine));
        let recovered = worker.recovered_counter();
        let mut handle = BackgroundWorker::start(worker, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.stop().await;

        assert_eq!(recovered.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn spawned_worker_keeps_its_interval_across_swaps() {
        let builder = ConfigurationBuilder::new();
        let config = builder
            .build_json(r#"{"engine": {"recovery_sweep_interval_ms": 10}}"#)
            .unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let clock = Arc::new(ManualClock::new(0));
        let engine = Arc::new(
            Engine::new(Arc::new(Registry::new(config)), transport.clone()).with_clock(clock.clone()),
        );

        let worker = RecoveryWorker::new(Arc::clone(&engine));
        let recovered = worker.recovered_counter();
        let mut handle = worker.spawn();

        engine.registry().swap(
            builder
                .build_json(
                    r#"{
                        "engine": {"recovery_sweep_interval_ms": 60000},
                        "endpoints": {
                            "timed": {"kind": "address", "target": "t", "suspend_on_failure_ms": 1000}
                        }
                    }"#,
                )
                .unwrap(),
        );
        transport.fail("t");
        assert!(engine.send(&mut MessageContext::new(""), "timed").is_err());
        clock.advance(5_000);

        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.stop().await;

        assert_eq!(recovered.load(Ordering::Relaxed), 1);
        assert!(is_active(&engine, "timed"));
    }
}
