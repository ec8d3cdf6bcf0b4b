#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use adgate_contracts::interrupt::{
    IncompleteBatchView, SessionEffect, TimedInterruptView, PLAYER_PAUSE_MESSAGES,
};
use adgate_contracts::playback::{AccumulatorState, PlaybackCheckpoint};
use adgate_contracts::policy::{AdSourceList, GatingPolicy};
use adgate_contracts::profile::{GatingMode, RemainingFreeTime, ViewerAdProfile};
use adgate_contracts::viewer::Viewer;
use adgate_contracts::UnixTimeMs;
use adgate_engines::accumulator::ElapsedTimeAccumulator;
use adgate_engines::batch;
use adgate_engines::entitlement;
use adgate_engines::gate::{
    AdSourceCursor, GateConfig, GateRuntime, GateStopReason, GateTickDecision, GateTickInput,
};
use adgate_storage::CheckpointStore;
use tracing::{debug, info, warn};

use crate::accessor::EntitlementAccessor;
use crate::error::GatingError;
use crate::interrupt::{
    ads_unavailable_notice, allows_dismiss, free_time_earned_notice, incomplete_batch_view,
    store_failure_notice, timed_interrupt_view, DismissRequest, InterruptKind,
};

pub type SharedCheckpoints = Arc<Mutex<dyn CheckpointStore + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Interrupted,
    Stopped(GateStopReason),
    /// Interval reached with nothing to show; playback carries on ungated.
    Degraded,
}

/// Derived values the page renders from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub authenticated: bool,
    pub mode: Option<GatingMode>,
    pub is_ad_free: bool,
    pub remaining_free_time: Option<RemainingFreeTime>,
    pub ads_watched_count: u32,
    pub needs_completion: bool,
    pub accumulator_state: AccumulatorState,
    pub elapsed_ms: u64,
    pub interval_ms: u64,
    pub in_player: bool,
    pub timed_interrupt: Option<TimedInterruptView>,
    pub incomplete_batch: Option<IncompleteBatchView>,
    pub interrupts_fired: u32,
}

/// One player's gating state: the accumulator, the open interrupts, and
/// the policy and ad sources snapshotted when the page opened.
///
/// Effects raised by ticks are queued and drained with `take_effects`.
pub struct PlaybackSession {
    viewer: Option<Viewer>,
    accessor: Arc<EntitlementAccessor>,
    checkpoints: SharedCheckpoints,
    gate: GateRuntime,
    policy: GatingPolicy,
    ad_sources: AdSourceList,
    profile: Option<ViewerAdProfile>,
    accumulator: ElapsedTimeAccumulator,
    cursor: AdSourceCursor,
    last_flushed_at: Option<UnixTimeMs>,
    playback_attempted: bool,
    in_player: bool,
    timed_interrupt: Option<TimedInterruptView>,
    incomplete_batch: Option<IncompleteBatchView>,
    interrupts_fired: u32,
    degraded: bool,
    pending: Vec<SessionEffect>,
}

impl PlaybackSession {
    pub fn open(
        viewer: Option<Viewer>,
        accessor: Arc<EntitlementAccessor>,
        checkpoints: SharedCheckpoints,
        gate_config: GateConfig,
    ) -> Self {
        let policy = accessor.load_policy();
        let ad_sources = accessor.load_ad_sources();
        let mut session = Self {
            viewer,
            accessor,
            checkpoints,
            gate: GateRuntime::new(gate_config),
            policy,
            ad_sources,
            profile: None,
            accumulator: ElapsedTimeAccumulator::new(),
            cursor: AdSourceCursor::new(),
            last_flushed_at: None,
            playback_attempted: false,
            in_player: false,
            timed_interrupt: None,
            incomplete_batch: None,
            interrupts_fired: 0,
            degraded: false,
            pending: Vec::new(),
        };
        session.refresh_profile();
        session.accumulator = session.restore_accumulator();
        session
    }

    fn restore_accumulator(&self) -> ElapsedTimeAccumulator {
        let Some(viewer) = &self.viewer else {
            return ElapsedTimeAccumulator::new();
        };
        let loaded = match self.checkpoints.lock() {
            Ok(store) => store.load(&viewer.id).map_err(GatingError::from),
            Err(_) => Err(GatingError::LockPoisoned("checkpoint store")),
        };
        match loaded {
            Ok(Some(checkpoint)) => {
                debug!(
                    viewer = viewer.id.as_str(),
                    accumulated_ms = checkpoint.accumulated_ms,
                    "playback checkpoint restored"
                );
                ElapsedTimeAccumulator::restore(checkpoint)
            }
            Ok(None) => ElapsedTimeAccumulator::new(),
            Err(err) => {
                warn!(viewer = viewer.id.as_str(), error = %err, "checkpoint load failed");
                ElapsedTimeAccumulator::new()
            }
        }
    }

    fn now(&self) -> UnixTimeMs {
        self.accessor.now()
    }

    fn refresh_profile(&mut self) {
        let Some(viewer) = &self.viewer else {
            return;
        };
        match self.accessor.get_profile(Some(viewer)) {
            Ok(read) => {
                self.pending
                    .extend(read.notices.into_iter().map(SessionEffect::Notify));
                self.profile = Some(read.profile);
            }
            Err(err) => {
                warn!(viewer = viewer.id.as_str(), error = %err, "profile refresh failed");
            }
        }
    }

    fn persist(&mut self, checkpoint: PlaybackCheckpoint) {
        let Some(viewer) = &self.viewer else {
            return;
        };
        let saved = match self.checkpoints.lock() {
            Ok(mut store) => store.save(&viewer.id, checkpoint).map_err(GatingError::from),
            Err(_) => Err(GatingError::LockPoisoned("checkpoint store")),
        };
        match saved {
            Ok(()) => self.last_flushed_at = Some(checkpoint.last_checkpoint),
            Err(err) => warn!(viewer = viewer.id.as_str(), error = %err, "checkpoint save failed"),
        }
    }

    fn clear_checkpoint(&mut self) {
        self.last_flushed_at = None;
        let Some(viewer) = &self.viewer else {
            return;
        };
        let cleared = match self.checkpoints.lock() {
            Ok(mut store) => store.clear(&viewer.id).map_err(GatingError::from),
            Err(_) => Err(GatingError::LockPoisoned("checkpoint store")),
        };
        if let Err(err) = cleared {
            warn!(viewer = viewer.id.as_str(), error = %err, "checkpoint clear failed");
        }
    }

    pub fn viewer(&self) -> Option<&Viewer> {
        self.viewer.as_ref()
    }

    pub fn policy(&self) -> &GatingPolicy {
        &self.policy
    }

    pub fn accumulator(&self) -> &ElapsedTimeAccumulator {
        &self.accumulator
    }

    pub fn gate_config(&self) -> GateConfig {
        self.gate.config()
    }

    pub fn take_effects(&mut self) -> Vec<SessionEffect> {
        std::mem::take(&mut self.pending)
    }

    /// Enters the player and starts accumulating, unless batch mode still
    /// owes ads or a timed interrupt is waiting on its ad.
    pub fn start_playback(&mut self) -> Vec<SessionEffect> {
        self.playback_attempted = true;
        if self.viewer.is_none() {
            self.in_player = true;
            return vec![SessionEffect::EnterPlayer];
        }
        if let Some(view) = &self.timed_interrupt {
            return vec![SessionEffect::ShowTimedInterrupt(view.clone())];
        }

        self.refresh_profile();
        let now = self.now();
        let grant_pending = self
            .profile
            .as_ref()
            .is_some_and(|p| batch::grant_pending(p, &self.policy, now));
        if grant_pending {
            if let Some(viewer) = self.viewer.clone() {
                return self.finish_batch(&viewer, Vec::new());
            }
        }
        if let Some(profile) = &self.profile {
            if batch::needs_completion(profile, &self.policy, now, self.playback_attempted) {
                let view = incomplete_batch_view(profile, &self.policy, &self.ad_sources, now);
                self.incomplete_batch = Some(view.clone());
                let mut effects = Vec::with_capacity(2);
                if !view.ads_available {
                    effects.push(SessionEffect::Notify(ads_unavailable_notice()));
                }
                effects.push(SessionEffect::ShowIncompleteBatch(view));
                return effects;
            }
        }

        self.incomplete_batch = None;
        self.in_player = true;
        if self.accumulator.start(now) {
            debug!(
                accumulated_ms = self.accumulator.accumulated_ms(),
                "playback accumulator started"
            );
        }
        vec![SessionEffect::EnterPlayer]
    }

    pub fn pause_playback(&mut self) {
        let now = self.now();
        if let Some(checkpoint) = self.accumulator.pause(now) {
            self.persist(checkpoint);
        }
    }

    /// Discards accumulated time and the persisted checkpoint.
    pub fn reset_playback(&mut self) {
        self.accumulator.reset();
        self.clear_checkpoint();
        self.in_player = false;
    }

    /// Page teardown: folds and persists running time.
    pub fn close(&mut self) {
        self.pause_playback();
        self.in_player = false;
    }

    /// Completes the open timed interrupt: opens its ad, restarts the
    /// interval from zero, and closes the modal.
    pub fn handle_ad_watched(&mut self) -> Vec<SessionEffect> {
        let Some(view) = self.timed_interrupt.take() else {
            debug!("ad watched with no timed interrupt open");
            return Vec::new();
        };
        let mut effects = Vec::with_capacity(2);
        if let Some(url) = view.ad_url {
            effects.push(SessionEffect::OpenAd { url });
        }
        self.accumulator.reset();
        self.clear_checkpoint();
        if self.in_player {
            let now = self.now();
            self.accumulator.start(now);
        }
        effects.push(SessionEffect::CloseTimedInterrupt);
        effects
    }

    /// Opens the next batch ad and counts it. Reaching the requirement
    /// grants the free window; store failures surface as notifications.
    pub fn record_batch_ad(&mut self) -> Result<Vec<SessionEffect>, GatingError> {
        let viewer = self.viewer.clone().ok_or(GatingError::NotAuthenticated)?;
        self.refresh_profile();
        let now = self.now();
        let profile = self.profile.clone().ok_or(GatingError::NotAuthenticated)?;

        if batch::grant_pending(&profile, &self.policy, now) {
            return Ok(self.finish_batch(&viewer, Vec::new()));
        }
        if batch::remaining_count(&profile, &self.policy, now) == 0 {
            self.incomplete_batch = None;
            return Ok(vec![SessionEffect::CloseIncompleteBatch]);
        }

        let Some(index) = batch::next_ad_index(profile.ads_watched_count, self.ad_sources.len())
        else {
            warn!(
                viewer = viewer.id.as_str(),
                error = %GatingError::NoAdSourceAvailable,
                "batch ad requested with no active sources"
            );
            let view = incomplete_batch_view(&profile, &self.policy, &self.ad_sources, now);
            self.incomplete_batch = Some(view.clone());
            return Ok(vec![
                SessionEffect::Notify(ads_unavailable_notice()),
                SessionEffect::ShowIncompleteBatch(view),
            ]);
        };

        let mut effects = Vec::new();
        if let Some(source) = self.ad_sources.get(index) {
            effects.push(SessionEffect::OpenAd {
                url: source.url.clone(),
            });
        }

        let new_count = match self.accessor.increment_ads_watched(Some(&viewer)) {
            Ok(count) => count,
            Err(err) => {
                warn!(viewer = viewer.id.as_str(), error = %err, "batch ad count failed");
                effects.push(SessionEffect::Notify(store_failure_notice(
                    "record the ad",
                    &err.to_string(),
                )));
                return Ok(effects);
            }
        };

        let mut updated = profile;
        updated.ads_watched_count = new_count;
        self.profile = Some(updated);
        if batch::completes_batch(new_count, &self.policy) {
            return Ok(self.finish_batch(&viewer, effects));
        }

        if let Some(profile) = &self.profile {
            let view = incomplete_batch_view(profile, &self.policy, &self.ad_sources, now);
            self.incomplete_batch = Some(view.clone());
            effects.push(SessionEffect::ShowIncompleteBatch(view));
        }
        Ok(effects)
    }

    /// Writes the earned free window. Until that write lands the batch
    /// modal stays up and the player stays closed; the next start or
    /// record retries it.
    fn finish_batch(&mut self, viewer: &Viewer, mut effects: Vec<SessionEffect>) -> Vec<SessionEffect> {
        let hours = self.policy.free_time_hours;
        match self.accessor.grant_free_time(Some(viewer), hours) {
            Ok(updated) => {
                self.profile = Some(updated);
                self.incomplete_batch = None;
                effects.push(SessionEffect::Notify(free_time_earned_notice(hours)));
                effects.push(SessionEffect::CloseIncompleteBatch);
                if self.playback_attempted {
                    self.in_player = true;
                    effects.push(SessionEffect::EnterPlayer);
                }
            }
            Err(err) => {
                warn!(viewer = viewer.id.as_str(), error = %err, "free time grant failed");
                effects.push(SessionEffect::Notify(store_failure_notice(
                    "unlock free time",
                    &err.to_string(),
                )));
                let now = self.now();
                if let Some(profile) = &self.profile {
                    let view = incomplete_batch_view(profile, &self.policy, &self.ad_sources, now);
                    self.incomplete_batch = Some(view.clone());
                    effects.push(SessionEffect::ShowIncompleteBatch(view));
                }
            }
        }
        effects
    }

    pub fn switch_mode_from_batch(&mut self) -> Vec<SessionEffect> {
        self.incomplete_batch = None;
        vec![
            SessionEffect::CloseIncompleteBatch,
            SessionEffect::NavigateToPreferences,
        ]
    }

    pub fn dismiss_interrupt(&mut self, request: DismissRequest) -> Vec<SessionEffect> {
        if self.timed_interrupt.is_some() {
            debug!(?request, "timed interrupt dismissal ignored");
            return Vec::new();
        }
        if self.incomplete_batch.is_some()
            && allows_dismiss(InterruptKind::IncompleteBatch, request)
        {
            self.incomplete_batch = None;
            return vec![SessionEffect::CloseIncompleteBatch];
        }
        Vec::new()
    }

    /// Re-reads the profile after a write made elsewhere and queues a close
    /// for any interrupt that no longer applies.
    pub fn profile_changed(&mut self) {
        self.refresh_profile();
        let now = self.now();
        let Some(profile) = &self.profile else {
            return;
        };
        let timed_applies =
            profile.mode == GatingMode::TimedInterval && !entitlement::is_ad_free(profile, now);
        let batch_cleared = !batch::needs_completion(profile, &self.policy, now, true);
        if self.timed_interrupt.is_some() && !timed_applies {
            self.timed_interrupt = None;
            self.pending.push(SessionEffect::CloseTimedInterrupt);
        }
        if self.incomplete_batch.is_some() && batch_cleared {
            self.incomplete_batch = None;
            self.pending.push(SessionEffect::CloseIncompleteBatch);
        }
    }

    /// Whether a gate loop should be running for this session right now.
    /// A degraded session never restarts its loop.
    pub fn gate_eligible(&self) -> bool {
        let Some(profile) = &self.profile else {
            return false;
        };
        if self.degraded {
            debug!(
                accumulated_ms = self.accumulator.accumulated_ms(),
                "gate loop stays off after degraded tick"
            );
            return false;
        }
        self.viewer.is_some()
            && self.timed_interrupt.is_none()
            && self.accumulator.is_running()
            && profile.mode == GatingMode::TimedInterval
            && !entitlement::is_ad_free(profile, self.now())
    }

    /// One gate evaluation. On interrupt the accumulator is paused and
    /// flushed before the modal and player pause messages are queued.
    pub fn tick(&mut self) -> TickOutcome {
        self.refresh_profile();
        let now = self.now();
        let decision = self.gate.evaluate(&GateTickInput {
            profile: self.profile.as_ref(),
            policy: &self.policy,
            accumulator: &self.accumulator,
            last_flushed_at: self.last_flushed_at,
            now,
        });

        match decision {
            GateTickDecision::Stop(reason) => {
                debug!(reason_code = decision.reason_code().0, ?reason, "gate loop stopping");
                TickOutcome::Stopped(reason)
            }
            GateTickDecision::Continue { checkpoint_due, .. } => {
                if checkpoint_due {
                    if let Some(checkpoint) = self.accumulator.checkpoint_running(now) {
                        self.persist(checkpoint);
                    }
                }
                TickOutcome::Continue
            }
            GateTickDecision::Interrupt { total_ms } => {
                let Some(url) = self.cursor.select(&self.policy, &self.ad_sources) else {
                    if !self.degraded {
                        warn!(
                            total_ms,
                            error = %GatingError::NoAdSourceAvailable,
                            "interval reached; playback continues without an ad"
                        );
                    }
                    // No further ticks for this session: the accumulator keeps
                    // running and is only flushed by the next pause or teardown.
                    self.degraded = true;
                    return TickOutcome::Degraded;
                };
                if let Some(checkpoint) = self.accumulator.pause(now) {
                    self.persist(checkpoint);
                }
                let view = timed_interrupt_view(&self.policy, Some(url));
                self.timed_interrupt = Some(view.clone());
                self.interrupts_fired = self.interrupts_fired.saturating_add(1);
                self.pending.extend(
                    PLAYER_PAUSE_MESSAGES
                        .iter()
                        .map(|msg| SessionEffect::PostPlayerMessage((*msg).to_string())),
                );
                self.pending.push(SessionEffect::ShowTimedInterrupt(view));
                info!(
                    reason_code = decision.reason_code().0,
                    total_ms,
                    interrupts_fired = self.interrupts_fired,
                    "timed interrupt raised"
                );
                TickOutcome::Interrupted
            }
        }
    }

    pub fn view(&self) -> SessionView {
        let now = self.now();
        let profile = self.profile.as_ref();
        SessionView {
            authenticated: self.viewer.is_some(),
            mode: profile.map(|p| p.mode),
            is_ad_free: profile.is_some_and(|p| entitlement::is_ad_free(p, now)),
            remaining_free_time: profile.and_then(|p| entitlement::remaining_free_time(p, now)),
            ads_watched_count: profile.map_or(0, |p| p.ads_watched_count),
            needs_completion: profile.is_some_and(|p| {
                batch::needs_completion(p, &self.policy, now, self.playback_attempted)
            }),
            accumulator_state: self.accumulator.state(),
            elapsed_ms: self.accumulator.total_ms(now),
            interval_ms: self.policy.interval_ms(),
            in_player: self.in_player,
            timed_interrupt: self.timed_interrupt.clone(),
            incomplete_batch: self.incomplete_batch.clone(),
            interrupts_fired: self.interrupts_fired,
        }
    }
}
