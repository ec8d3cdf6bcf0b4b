#![forbid(unsafe_code)]

use adgate_contracts::policy::{AdSourceList, GatingPolicy};
use adgate_contracts::profile::{GatingMode, ViewerAdProfile};
use adgate_contracts::{ReasonCodeId, UnixTimeMs};

use crate::accumulator::ElapsedTimeAccumulator;
use crate::entitlement::is_ad_free;

pub mod reason_codes {
    use adgate_contracts::ReasonCodeId;

    pub const GATE_OK_CONTINUE: ReasonCodeId = ReasonCodeId(0x4741_0001);
    pub const GATE_INTERVAL_REACHED: ReasonCodeId = ReasonCodeId(0x4741_0002);

    pub const GATE_STOP_NOT_AUTHENTICATED: ReasonCodeId = ReasonCodeId(0x4741_0010);
    pub const GATE_STOP_AD_FREE: ReasonCodeId = ReasonCodeId(0x4741_0011);
    pub const GATE_STOP_BATCH_MODE: ReasonCodeId = ReasonCodeId(0x4741_0012);
    pub const GATE_STOP_NOT_RUNNING: ReasonCodeId = ReasonCodeId(0x4741_0013);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    pub tick_ms: u64,
    pub checkpoint_every_ms: u64,
}

impl GateConfig {
    pub fn mvp_v1() -> Self {
        Self {
            tick_ms: 1_000,
            checkpoint_every_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStopReason {
    NotAuthenticated,
    AdFree,
    BatchMode,
    NotRunning,
}

impl GateStopReason {
    pub fn reason_code(self) -> ReasonCodeId {
        match self {
            GateStopReason::NotAuthenticated => reason_codes::GATE_STOP_NOT_AUTHENTICATED,
            GateStopReason::AdFree => reason_codes::GATE_STOP_AD_FREE,
            GateStopReason::BatchMode => reason_codes::GATE_STOP_BATCH_MODE,
            GateStopReason::NotRunning => reason_codes::GATE_STOP_NOT_RUNNING,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GateTickInput<'a> {
    /// `None` for anonymous viewers.
    pub profile: Option<&'a ViewerAdProfile>,
    pub policy: &'a GatingPolicy,
    pub accumulator: &'a ElapsedTimeAccumulator,
    pub last_flushed_at: Option<UnixTimeMs>,
    pub now: UnixTimeMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTickDecision {
    /// The loop must be cancelled without raising anything.
    Stop(GateStopReason),
    Continue { total_ms: u64, checkpoint_due: bool },
    Interrupt { total_ms: u64 },
}

impl GateTickDecision {
    pub fn reason_code(&self) -> ReasonCodeId {
        match self {
            GateTickDecision::Stop(reason) => reason.reason_code(),
            GateTickDecision::Continue { .. } => reason_codes::GATE_OK_CONTINUE,
            GateTickDecision::Interrupt { .. } => reason_codes::GATE_INTERVAL_REACHED,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateRuntime {
    config: GateConfig,
}

impl GateRuntime {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> GateConfig {
        self.config
    }

    /// One evaluation of the gate. Entitlement is re-checked first on every
    /// tick so a window granted elsewhere stops the loop before it fires.
    pub fn evaluate(&self, input: &GateTickInput<'_>) -> GateTickDecision {
        let Some(profile) = input.profile else {
            return GateTickDecision::Stop(GateStopReason::NotAuthenticated);
        };
        if is_ad_free(profile, input.now) {
            return GateTickDecision::Stop(GateStopReason::AdFree);
        }
        if profile.mode != GatingMode::TimedInterval {
            return GateTickDecision::Stop(GateStopReason::BatchMode);
        }
        if !input.accumulator.is_running() {
            return GateTickDecision::Stop(GateStopReason::NotRunning);
        }

        let total_ms = input.accumulator.total_ms(input.now);
        if interval_reached(total_ms, input.policy.interval_ms()) {
            return GateTickDecision::Interrupt { total_ms };
        }

        let checkpoint_due = match input.last_flushed_at {
            Some(last) => input.now.saturating_since(last) >= self.config.checkpoint_every_ms,
            None => true,
        };
        GateTickDecision::Continue {
            total_ms,
            checkpoint_due,
        }
    }
}

pub fn interval_reached(total_ms: u64, interval_ms: u64) -> bool {
    total_ms >= interval_ms
}

/// Picks the ad for a timed interrupt: the policy redirect when set,
/// otherwise round-robin over the active sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdSourceCursor {
    next: usize,
}

impl AdSourceCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, policy: &GatingPolicy, sources: &AdSourceList) -> Option<String> {
        if let Some(url) = &policy.redirect_url {
            return Some(url.clone());
        }
        if sources.is_empty() {
            return None;
        }
        let index = self.next % sources.len();
        self.next = self.next.wrapping_add(1);
        sources.get(index).map(|s| s.url.clone())
    }
}
