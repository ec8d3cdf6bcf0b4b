#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{ContractViolation, UnixTimeMs, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccumulatorState {
    Idle,
    Running,
    Paused,
}

/// Durable snapshot of watch-time accumulated since the last ad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackCheckpoint {
    pub accumulated_ms: u64,
    pub last_checkpoint: UnixTimeMs,
}

impl PlaybackCheckpoint {
    pub fn v1(accumulated_ms: u64, last_checkpoint: UnixTimeMs) -> Result<Self, ContractViolation> {
        let checkpoint = Self {
            accumulated_ms,
            last_checkpoint,
        };
        checkpoint.validate()?;
        Ok(checkpoint)
    }
}

impl Validate for PlaybackCheckpoint {
    fn validate(&self) -> Result<(), ContractViolation> {
        // One week of continuous playback; anything larger is a corrupted row.
        if self.accumulated_ms > 7 * 24 * 3_600_000 {
            return Err(ContractViolation::InvalidValue {
                field: "playback_checkpoint.accumulated_ms",
                reason: "must be <= 604_800_000",
            });
        }
        Ok(())
    }
}
