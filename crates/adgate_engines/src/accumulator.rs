#![forbid(unsafe_code)]

use adgate_contracts::playback::{AccumulatorState, PlaybackCheckpoint};
use adgate_contracts::UnixTimeMs;

/// Watch-time accumulated since the last ad. Time only advances while
/// `Running`; every transition takes the current wall-clock instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElapsedTimeAccumulator {
    state: AccumulatorState,
    accumulated_ms: u64,
    last_checkpoint: Option<UnixTimeMs>,
}

impl Default for ElapsedTimeAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ElapsedTimeAccumulator {
    pub fn new() -> Self {
        Self {
            state: AccumulatorState::Idle,
            accumulated_ms: 0,
            last_checkpoint: None,
        }
    }

    /// Resumes from a persisted checkpoint. The gap between the stored
    /// `last_checkpoint` and now is offline time and is never counted.
    pub fn restore(checkpoint: PlaybackCheckpoint) -> Self {
        let state = if checkpoint.accumulated_ms > 0 {
            AccumulatorState::Paused
        } else {
            AccumulatorState::Idle
        };
        Self {
            state,
            accumulated_ms: checkpoint.accumulated_ms,
            last_checkpoint: Some(checkpoint.last_checkpoint),
        }
    }

    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == AccumulatorState::Running
    }

    /// Accumulation frozen at the last fold; excludes the live run.
    pub fn accumulated_ms(&self) -> u64 {
        self.accumulated_ms
    }

    pub fn last_checkpoint(&self) -> Option<UnixTimeMs> {
        self.last_checkpoint
    }

    /// Returns `true` when the call changed state.
    pub fn start(&mut self, now: UnixTimeMs) -> bool {
        match self.state {
            AccumulatorState::Idle | AccumulatorState::Paused => {
                self.last_checkpoint = Some(now);
                self.state = AccumulatorState::Running;
                true
            }
            AccumulatorState::Running => false,
        }
    }

    /// Folds the live run into the total and yields the checkpoint to
    /// persist. A no-op outside `Running`.
    pub fn pause(&mut self, now: UnixTimeMs) -> Option<PlaybackCheckpoint> {
        if self.state != AccumulatorState::Running {
            return None;
        }
        let checkpoint = self.fold(now);
        self.state = AccumulatorState::Paused;
        Some(checkpoint)
    }

    /// Periodic checkpoint while `Running`: moves live time into the total
    /// so a reload neither loses nor double-counts it.
    pub fn checkpoint_running(&mut self, now: UnixTimeMs) -> Option<PlaybackCheckpoint> {
        if self.state != AccumulatorState::Running {
            return None;
        }
        Some(self.fold(now))
    }

    pub fn reset(&mut self) {
        self.state = AccumulatorState::Idle;
        self.accumulated_ms = 0;
        self.last_checkpoint = None;
    }

    pub fn total_ms(&self, now: UnixTimeMs) -> u64 {
        match (self.state, self.last_checkpoint) {
            (AccumulatorState::Running, Some(last)) => self
                .accumulated_ms
                .saturating_add(now.saturating_since(last)),
            _ => self.accumulated_ms,
        }
    }

    pub fn snapshot(&self) -> PlaybackCheckpoint {
        PlaybackCheckpoint {
            accumulated_ms: self.accumulated_ms,
            last_checkpoint: self.last_checkpoint.unwrap_or_default(),
        }
    }

    fn fold(&mut self, now: UnixTimeMs) -> PlaybackCheckpoint {
        if let Some(last) = self.last_checkpoint {
            self.accumulated_ms = self.accumulated_ms.saturating_add(now.saturating_since(last));
        }
        // A clock that went backwards must not rewind the checkpoint.
        let anchor = self.last_checkpoint.map_or(now, |last| last.max(now));
        self.last_checkpoint = Some(anchor);
        self.snapshot()
    }
}
