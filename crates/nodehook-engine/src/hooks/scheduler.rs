use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::chain::{ChainExecutor, ChainOutcome};
use super::context::{ContextBuilder, LogRecord};
use super::events::HookEvent;
use super::registry::HookRegistry;
use crate::config::EngineConfig;
use crate::error::{HookError, Result};

/// An event to run hooks for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub event: HookEvent,
    #[serde(default)]
    pub job_id: Option<String>,
    /// Passed through to hooks untouched
    #[serde(default)]
    pub data: Value,
}

impl TriggerRequest {
    pub fn job(event: HookEvent, job_id: impl Into<String>) -> Self {
        Self {
            event,
            job_id: Some(job_id.into()),
            data: Value::Null,
        }
    }

    pub fn host(event: HookEvent) -> Self {
        Self {
            event,
            job_id: None,
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Completion callback for the subsystem that owns job state
#[async_trait]
pub trait ChainObserver: Send + Sync {
    async fn on_complete(&self, outcome: &ChainOutcome);
}

/// Resolves to the chain's outcome once it reaches a terminal state
pub struct ChainHandle {
    chain_id: u64,
    rx: oneshot::Receiver<ChainOutcome>,
}

impl ChainHandle {
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

impl Future for ChainHandle {
    type Output = Result<ChainOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| HookError::ShutDown))
    }
}

type SerialKey = (String, HookEvent);

/// Where a job-scoped chain sits in its (job, event) queue
struct SerialSlot {
    key: SerialKey,
    previous: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

/// Concurrency front door: each trigger gets its own chain task.
///
/// Chains for the same job and event run one after another in trigger order;
/// everything else runs concurrently.
pub struct EventScheduler {
    registry: Arc<HookRegistry>,
    executor: ChainExecutor,
    builder: ContextBuilder,
    observers: Vec<Arc<dyn ChainObserver>>,
    serial: Arc<DashMap<SerialKey, (u64, oneshot::Receiver<()>)>>,
    log_tx: broadcast::Sender<LogRecord>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    shutdown_grace: Duration,
}

impl EventScheduler {
    pub fn new(registry: Arc<HookRegistry>, config: &EngineConfig) -> Self {
        let (log_tx, _) = broadcast::channel(config.log_capacity.max(1));
        let shutdown = CancellationToken::new();

        Self {
            registry,
            executor: ChainExecutor::from_config(config),
            builder: ContextBuilder::new(config.node_name.clone(), log_tx.clone(), shutdown.clone()),
            observers: Vec::new(),
            serial: Arc::new(DashMap::new()),
            log_tx,
            tracker: TaskTracker::new(),
            shutdown,
            shutdown_grace: config.shutdown_grace(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ChainObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    /// Stream of every hook and engine log line
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogRecord> {
        self.log_tx.subscribe()
    }

    /// Fires when [`shutdown`](Self::shutdown) is called
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Chains accepted but not finished
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Dispatch an event. Returns as soon as the chain task is spawned; must
    /// be called from within a tokio runtime.
    pub fn trigger(&self, request: TriggerRequest) -> Result<ChainHandle> {
        if self.shutdown.is_cancelled() {
            return Err(HookError::ShutDown);
        }

        let ctx = self
            .builder
            .build(request.event, request.job_id, request.data)?;
        let chain_id = ctx.chain_id();

        let serial = ctx.job_id().map(|job| {
            let key = (job.to_string(), ctx.event());
            let (done, waiter) = oneshot::channel();
            let previous = self
                .serial
                .insert(key.clone(), (chain_id, waiter))
                .map(|(_, rx)| rx);
            SerialSlot {
                key,
                previous,
                done,
            }
        });

        debug!(
            chain = chain_id,
            event = %ctx.event(),
            job = ctx.job_id().unwrap_or("-"),
            "Event triggered"
        );

        let (tx, rx) = oneshot::channel();
        let registry = self.registry.clone();
        let executor = self.executor.clone();
        let observers = self.observers.clone();
        let serial_map = self.serial.clone();

        self.tracker.spawn(async move {
            let mut serial = serial;
            if let Some(previous) = serial.as_mut().and_then(|slot| slot.previous.take()) {
                debug!(chain = chain_id, "Chain pending behind earlier chain for the same job");
                // Err just means the earlier chain's task went away
                let _ = previous.await;
            }

            // Snapshot taken when the chain actually starts
            let chain = registry.lookup_chain(ctx.event());
            let outcome = executor.execute(&chain, &ctx).await;

            if let Some(slot) = serial {
                let _ = slot.done.send(());
                serial_map.remove_if(&slot.key, |_, (id, _)| *id == chain_id);
            }

            // Caller may have dropped the handle
            let _ = tx.send(outcome.clone());

            for observer in &observers {
                observer.on_complete(&outcome).await;
            }
        });

        Ok(ChainHandle { chain_id, rx })
    }

    /// Cancel in-flight hooks, refuse new triggers, and wait (bounded) for
    /// chains to finish
    pub async fn shutdown(&self) {
        info!(in_flight = self.tracker.len(), "Shutting down event scheduler");
        self.shutdown.cancel();
        self.tracker.close();

        if tokio::time::timeout(self.shutdown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.tracker.len(),
                "Chains still running after shutdown grace"
            );
        }
    }
}
