#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use adgate_engines::gate::GateStopReason;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::session::{PlaybackSession, TickOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateLoopExit {
    Cancelled,
    Interrupted,
    Stopped(GateStopReason),
    Degraded,
    SessionPoisoned,
}

/// Owns one running gate loop. Dropping the handle cancels the loop.
#[derive(Debug)]
pub struct GateLoopHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<GateLoopExit>>,
}

impl GateLoopHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub async fn join(mut self) -> Option<GateLoopExit> {
        let task = self.task.take()?;
        task.await.ok()
    }
}

impl Drop for GateLoopHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawns the per-session tick loop on the current tokio runtime.
pub fn spawn_gate_loop(session: Arc<Mutex<PlaybackSession>>, tick: Duration) -> GateLoopHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_gate_loop(session, tick, cancel.clone()));
    GateLoopHandle {
        cancel,
        task: Some(task),
    }
}

async fn run_gate_loop(
    session: Arc<Mutex<PlaybackSession>>,
    tick: Duration,
    cancel: CancellationToken,
) -> GateLoopExit {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick resolves immediately; evaluation starts one period in.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("gate loop cancelled");
                return GateLoopExit::Cancelled;
            }
            _ = ticker.tick() => {}
        }

        let outcome = {
            let Ok(mut session) = session.lock() else {
                return GateLoopExit::SessionPoisoned;
            };
            // A cancel issued while this tick waited on the lock wins.
            if cancel.is_cancelled() {
                return GateLoopExit::Cancelled;
            }
            session.tick()
        };

        match outcome {
            TickOutcome::Continue => {}
            TickOutcome::Interrupted => return GateLoopExit::Interrupted,
            TickOutcome::Stopped(reason) => return GateLoopExit::Stopped(reason),
            TickOutcome::Degraded => return GateLoopExit::Degraded,
        }
    }
}
