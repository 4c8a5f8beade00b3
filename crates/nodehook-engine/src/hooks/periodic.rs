use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::events::HookEvent;
use super::scheduler::{EventScheduler, TriggerRequest};
use crate::error::HookError;

/// Trigger a host-scoped event every `period` until the scheduler shuts down.
///
/// A tick is skipped while the previous periodic chain is still running, so
/// a slow periodic hook never stacks up behind itself.
pub fn spawn_periodic(
    scheduler: Arc<EventScheduler>,
    event: HookEvent,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if event.is_job_scoped() {
            error!(%event, "Periodic trigger needs a host-scoped event");
            return;
        }

        let shutdown = scheduler.shutdown_signal();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(%event, period_secs = period.as_secs_f64(), "Periodic trigger started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !scheduler.registry().has_hooks(event) {
                continue;
            }

            let handle = match scheduler.trigger(TriggerRequest::host(event)) {
                Ok(handle) => handle,
                Err(HookError::ShutDown) => break,
                Err(e) => {
                    warn!(%event, error = %e, "Periodic trigger failed");
                    continue;
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = handle => match outcome {
                    Ok(outcome) => debug!(
                        %event,
                        accepted = outcome.is_accepted(),
                        "Periodic chain finished"
                    ),
                    Err(e) => warn!(%event, error = %e, "Periodic chain lost"),
                },
            }
        }

        info!(%event, "Periodic trigger stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::hooks::definition::HookDefinition;
    use crate::hooks::hook::hook_fn;
    use crate::hooks::registry::HookRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_periodic_runs_until_shutdown() {
        let registry = Arc::new(HookRegistry::new());
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        registry
            .register(HookDefinition::new(
                "host_check",
                HookEvent::ExechostPeriodic,
                hook_fn(move |ev| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        ev.log("executed exechost_periodic hook");
                        Ok(())
                    }
                }),
            ))
            .unwrap();

        let scheduler = Arc::new(EventScheduler::new(registry, &EngineConfig::default()));
        let task = spawn_periodic(
            scheduler.clone(),
            HookEvent::ExechostPeriodic,
            Duration::from_millis(50),
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.shutdown().await;
        task.await.unwrap();

        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_job_scoped_event_is_refused() {
        let scheduler = Arc::new(EventScheduler::new(
            Arc::new(HookRegistry::new()),
            &EngineConfig::default(),
        ));
        // Returns straight away instead of ticking forever
        spawn_periodic(scheduler, HookEvent::ExecjobEnd, Duration::from_millis(10))
            .await
            .unwrap();
    }
}
