use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::engine::session::{SessionHandle, TickOutcome};

/// Periodic analysis loop for one session.
pub struct AnalysisTicker {
    handle: SessionHandle,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl AnalysisTicker {
    /// Must be called inside a tokio runtime. The first cycle runs one `period` after spawn.
    pub fn spawn(handle: SessionHandle, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let period = period.max(Duration::from_millis(1));
        let session = handle.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => {
                        match session.tick() {
                            Ok(TickOutcome::Completed(_)) => {}
                            Ok(TickOutcome::Stale) => break,
                            Err(e) => error!(session_id = %session.id(), error = %e, "analysis cycle failed"),
                        }
                    }
                }
            }
            info!(session_id = %session.id(), "analysis ticker exited");
        });

        info!(session_id = %handle.id(), period_ms = period.as_millis() as u64, "analysis ticker started");
        Self {
            handle,
            shutdown_tx,
            task,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the session and waits for the loop to exit. Buffered events are kept.
    pub async fn stop(self) -> SessionHandle {
        self.handle.cancel();
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!(session_id = %self.handle.id(), error = %e, "analysis ticker task failed");
        }
        self.handle
    }
}
