#![forbid(unsafe_code)]

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use adgate_contracts::interrupt::{
    IncompleteBatchView, Notification, SessionEffect, TimedInterruptView,
};
use adgate_contracts::playback::AccumulatorState;
use adgate_contracts::policy::{AdSource, GatingPolicy, VipSettings};
use adgate_contracts::profile::{GatingMode, RemainingFreeTime, ViewerAdProfile};
use adgate_contracts::viewer::{Viewer, ViewerId};
use adgate_contracts::{ContractViolation, UnixTimeMs};
use adgate_engines::gate::GateConfig;
use adgate_os::{
    EntitlementAccessor, GatingError, PlaybackController, PlaybackSession, SharedCheckpoints,
    SharedClock, SharedRepo, SystemClock,
};
use adgate_storage::{
    AdProfileStore, InMemoryCheckpointStore, JsonFileCheckpointStore, StorageError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const MAX_PLAYER_ID_LEN: usize = 128;

/// Why the adapter refused a request. Each variant maps to one HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterRejection {
    BadRequest(String),
    Unauthorized,
    Forbidden(String),
    Unavailable(String),
    Internal(String),
}

impl AdapterRejection {
    pub fn status_code(&self) -> u16 {
        match self {
            AdapterRejection::BadRequest(_) => 400,
            AdapterRejection::Unauthorized => 401,
            AdapterRejection::Forbidden(_) => 403,
            AdapterRejection::Unavailable(_) => 503,
            AdapterRejection::Internal(_) => 500,
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            AdapterRejection::BadRequest(_) => "REJECTED",
            AdapterRejection::Unauthorized => "UNAUTHENTICATED",
            AdapterRejection::Forbidden(_) => "FORBIDDEN",
            AdapterRejection::Unavailable(_) => "UNAVAILABLE",
            AdapterRejection::Internal(_) => "FAILED",
        }
    }

    pub fn reason(&self) -> String {
        match self {
            AdapterRejection::BadRequest(reason)
            | AdapterRejection::Forbidden(reason)
            | AdapterRejection::Unavailable(reason)
            | AdapterRejection::Internal(reason) => reason.clone(),
            AdapterRejection::Unauthorized => "sign in required".to_string(),
        }
    }

    pub fn to_response(&self) -> AdapterErrorResponse {
        AdapterErrorResponse {
            status: "error".to_string(),
            outcome: self.outcome().to_string(),
            reason: Some(self.reason()),
        }
    }
}

impl From<GatingError> for AdapterRejection {
    fn from(err: GatingError) -> Self {
        match err {
            GatingError::NotAuthenticated => AdapterRejection::Unauthorized,
            GatingError::PaymentUnavailable => {
                AdapterRejection::Forbidden("payment integration not available".to_string())
            }
            GatingError::Contract(violation) => AdapterRejection::BadRequest(violation.to_string()),
            GatingError::NoAdSourceAvailable
            | GatingError::Store(
                StorageError::NotFound { .. }
                | StorageError::DuplicateKey { .. }
                | StorageError::ContractViolation(_),
            ) => AdapterRejection::BadRequest(err.to_string()),
            GatingError::Store(_) | GatingError::Checkpoint(_) | GatingError::LockPoisoned(_) => {
                AdapterRejection::Internal(err.to_string())
            }
        }
    }
}

impl From<ContractViolation> for AdapterRejection {
    fn from(violation: ContractViolation) -> Self {
        AdapterRejection::BadRequest(violation.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub http_bind: String,
    pub gate: GateConfig,
    pub checkpoint_path: Option<PathBuf>,
    pub viewer_tokens: BTreeMap<String, Viewer>,
    pub admin_viewers: BTreeSet<ViewerId>,
    pub ad_urls: Vec<String>,
    pub vip: VipSettings,
    pub session_idle_ms: u64,
    pub max_sessions: usize,
}

impl AdapterConfig {
    pub fn mvp_v1() -> Self {
        Self {
            http_bind: "127.0.0.1:8080".to_string(),
            gate: GateConfig::mvp_v1(),
            checkpoint_path: None,
            viewer_tokens: BTreeMap::new(),
            admin_viewers: BTreeSet::new(),
            ad_urls: Vec::new(),
            vip: VipSettings::mvp_default(),
            session_idle_ms: 30 * 60 * 1_000,
            max_sessions: 10_000,
        }
    }

    pub fn from_env() -> Result<Self, String> {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Out-of-range numbers fall back
    /// to defaults; malformed token, admin, or URL lists are errors.
    pub fn from_env_var_map<F>(mut env_getter: F) -> Result<Self, String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = Self::mvp_v1();
        let http_bind = non_empty(env_getter("ADGATE_HTTP_BIND")).unwrap_or(defaults.http_bind);
        let gate = GateConfig {
            tick_ms: parse_ranged_u64(
                env_getter("ADGATE_GATE_TICK_MS"),
                100..=60_000,
                defaults.gate.tick_ms,
            ),
            checkpoint_every_ms: parse_ranged_u64(
                env_getter("ADGATE_CHECKPOINT_EVERY_MS"),
                1_000..=600_000,
                defaults.gate.checkpoint_every_ms,
            ),
        };
        let checkpoint_path = non_empty(env_getter("ADGATE_CHECKPOINT_PATH")).map(PathBuf::from);
        let viewer_tokens = match non_empty(env_getter("ADGATE_VIEWER_TOKENS")) {
            Some(raw) => parse_viewer_tokens(&raw)?,
            None => BTreeMap::new(),
        };
        let admin_viewers = match non_empty(env_getter("ADGATE_ADMIN_VIEWERS")) {
            Some(raw) => parse_admin_viewers(&raw)?,
            None => BTreeSet::new(),
        };
        let ad_urls = non_empty(env_getter("ADGATE_AD_URLS"))
            .map(|raw| split_list(&raw))
            .unwrap_or_default();
        let test_payment_enabled = parse_bool(
            env_getter("ADGATE_VIP_TEST_PAYMENT_ENABLED"),
            defaults.vip.test_payment_enabled,
        );
        let vip_duration_days = parse_ranged_u64(
            env_getter("ADGATE_VIP_DURATION_DAYS"),
            1..=3_650,
            u64::from(defaults.vip.vip_duration_days),
        ) as u32;
        let vip = VipSettings::v1(test_payment_enabled, vip_duration_days)
            .map_err(|err| format!("invalid vip settings: {err}"))?;
        let session_idle_ms = parse_ranged_u64(
            env_getter("ADGATE_SESSION_IDLE_SECS"),
            60..=86_400,
            defaults.session_idle_ms / 1_000,
        ) * 1_000;
        let max_sessions = parse_ranged_u64(
            env_getter("ADGATE_MAX_SESSIONS"),
            1..=1_000_000,
            defaults.max_sessions as u64,
        ) as usize;

        Ok(Self {
            http_bind,
            gate,
            checkpoint_path,
            viewer_tokens,
            admin_viewers,
            ad_urls,
            vip,
            session_idle_ms,
            max_sessions,
        })
    }
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => true,
            "0" | "false" | "off" | "no" => false,
            _ => default,
        },
        None => default,
    }
}

fn parse_ranged_u64(raw: Option<String>, range: std::ops::RangeInclusive<u64>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| range.contains(v))
        .unwrap_or(default)
}

/// `token=viewer_id[:email]` entries separated by commas.
fn parse_viewer_tokens(raw: &str) -> Result<BTreeMap<String, Viewer>, String> {
    let mut tokens = BTreeMap::new();
    for entry in split_list(raw) {
        let (token, identity) = entry
            .split_once('=')
            .ok_or_else(|| format!("viewer token entry '{entry}' must be token=viewer_id"))?;
        let token = token.trim();
        if token.is_empty() {
            return Err(format!("viewer token entry '{entry}' has an empty token"));
        }
        let (id, email) = match identity.split_once(':') {
            Some((id, email)) => (id.trim(), non_empty(Some(email.to_string()))),
            None => (identity.trim(), None),
        };
        let id = ViewerId::new(id).map_err(|err| format!("invalid viewer id in '{entry}': {err}"))?;
        let viewer =
            Viewer::v1(id, email).map_err(|err| format!("invalid viewer in '{entry}': {err}"))?;
        if tokens.insert(token.to_string(), viewer).is_some() {
            return Err(format!("viewer token '{token}' is listed twice"));
        }
    }
    Ok(tokens)
}

fn parse_admin_viewers(raw: &str) -> Result<BTreeSet<ViewerId>, String> {
    split_list(raw)
        .into_iter()
        .map(|id| ViewerId::new(id.clone()).map_err(|err| format!("invalid admin viewer '{id}': {err}")))
        .collect()
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header_value: Option<&str>) -> Option<&str> {
    let value = header_value?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Maps opaque bearer tokens to viewers. Unknown tokens are anonymous.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuth {
    viewers: BTreeMap<String, Viewer>,
}

impl StaticTokenAuth {
    pub fn new(viewers: BTreeMap<String, Viewer>) -> Self {
        Self { viewers }
    }

    pub fn authenticate(&self, token: Option<&str>) -> Option<Viewer> {
        token.and_then(|t| self.viewers.get(t)).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SessionKey {
    viewer_id: Option<ViewerId>,
    player_id: String,
}

struct PlayerSlot {
    controller: PlaybackController,
    last_touched: UnixTimeMs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRequest {
    pub player_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetModeRequest {
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyUpdateRequest {
    pub interval_minutes: u32,
    pub ads_required_for_free_time: u32,
    pub free_time_hours: u32,
    pub redirect_url: Option<String>,
}

/// With `url` set a new source is added; without it the existing source's
/// `is_active` flag is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdSourceRequest {
    pub id: String,
    pub url: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterErrorResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub outcome: String,
    pub active_sessions: usize,
    pub active_gate_loops: usize,
    pub checkpoint_backend: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectsResponse {
    pub status: String,
    pub player_id: String,
    pub effects: Vec<SessionEffect>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStateResponse {
    pub status: String,
    pub player_id: String,
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
    pub gate_loop_active: bool,
    pub timed_interrupt: Option<TimedInterruptView>,
    pub incomplete_batch: Option<IncompleteBatchView>,
    pub interrupts_fired: u32,
    pub effects: Vec<SessionEffect>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub status: String,
    pub viewer_id: String,
    pub mode: GatingMode,
    pub ads_watched_count: u32,
    pub is_ad_free: bool,
    pub remaining_free_time: Option<RemainingFreeTime>,
    pub ad_free_until_ms: Option<u64>,
    pub is_vip: bool,
    pub vip_expires_at_ms: Option<u64>,
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyResponse {
    pub status: String,
    pub policy: GatingPolicy,
    pub ad_sources: Vec<AdSource>,
}

/// HTTP-facing runtime: resolves viewers, owns one `PlaybackController`
/// per signed-in `(viewer, player_id)`, and shapes responses.
///
/// Anonymous players are never gated and are not kept between calls.
/// Signed-in players idle for `session_idle_ms` are torn down.
pub struct AdapterRuntime {
    config: AdapterConfig,
    auth: StaticTokenAuth,
    accessor: Arc<EntitlementAccessor>,
    checkpoints: SharedCheckpoints,
    checkpoint_backend: &'static str,
    sessions: BTreeMap<SessionKey, PlayerSlot>,
}

impl AdapterRuntime {
    pub fn default_from_env() -> Result<Self, String> {
        Self::from_config(AdapterConfig::from_env()?)
    }

    /// In-memory profile store seeded from config; checkpoints go to the
    /// configured JSON file when one is set.
    pub fn from_config(config: AdapterConfig) -> Result<Self, String> {
        let (checkpoints, backend): (SharedCheckpoints, &'static str) = match &config.checkpoint_path {
            Some(path) => {
                let store = JsonFileCheckpointStore::open(path.clone()).map_err(|err| {
                    format!(
                        "failed to open checkpoint store '{}': {}",
                        path.display(),
                        err
                    )
                })?;
                let shared: SharedCheckpoints = Arc::new(Mutex::new(store));
                (shared, "json_file")
            }
            None => {
                let shared: SharedCheckpoints = Arc::new(Mutex::new(InMemoryCheckpointStore::new()));
                (shared, "in_memory")
            }
        };
        let repo: SharedRepo = Arc::new(Mutex::new(AdProfileStore::new_in_memory()));
        let clock: SharedClock = Arc::new(SystemClock);
        let mut runtime = Self::with_parts(config, repo, checkpoints, clock);
        runtime.checkpoint_backend = backend;
        runtime.seed_from_config()?;
        Ok(runtime)
    }

    pub fn with_parts(
        config: AdapterConfig,
        repo: SharedRepo,
        checkpoints: SharedCheckpoints,
        clock: SharedClock,
    ) -> Self {
        let auth = StaticTokenAuth::new(config.viewer_tokens.clone());
        Self {
            config,
            auth,
            accessor: Arc::new(EntitlementAccessor::new(repo, clock)),
            checkpoints,
            checkpoint_backend: "custom",
            sessions: BTreeMap::new(),
        }
    }

    fn seed_from_config(&mut self) -> Result<(), String> {
        self.accessor
            .replace_vip_settings(self.config.vip)
            .map_err(|err| format!("failed to seed vip settings: {err}"))?;
        for (index, url) in self.config.ad_urls.iter().enumerate() {
            let source = AdSource::v1(format!("seed_{}", index + 1), url.clone(), true)
                .map_err(|err| format!("invalid ad url '{url}': {err}"))?;
            self.accessor
                .add_ad_source(source)
                .map_err(|err| format!("failed to seed ad source '{url}': {err}"))?;
        }
        info!(
            ad_sources = self.config.ad_urls.len(),
            test_payment_enabled = self.config.vip.test_payment_enabled,
            "adapter store seeded"
        );
        Ok(())
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn accessor(&self) -> Arc<EntitlementAccessor> {
        Arc::clone(&self.accessor)
    }

    pub fn viewer_for(&self, bearer: Option<&str>) -> Option<Viewer> {
        self.auth.authenticate(bearer)
    }

    fn require_viewer(&self, bearer: Option<&str>) -> Result<Viewer, AdapterRejection> {
        self.viewer_for(bearer).ok_or(AdapterRejection::Unauthorized)
    }

    fn require_admin(&self, bearer: Option<&str>) -> Result<Viewer, AdapterRejection> {
        let viewer = self.require_viewer(bearer)?;
        if !self.config.admin_viewers.contains(&viewer.id) {
            warn!(viewer = viewer.id.as_str(), "admin action refused");
            return Err(AdapterRejection::Forbidden("admin access required".to_string()));
        }
        Ok(viewer)
    }

    fn session_key(viewer: Option<&Viewer>, player_id: &str) -> Result<SessionKey, AdapterRejection> {
        let player_id = player_id.trim();
        if player_id.is_empty() || player_id.len() > MAX_PLAYER_ID_LEN {
            return Err(AdapterRejection::BadRequest(format!(
                "player_id must be 1..={MAX_PLAYER_ID_LEN} chars"
            )));
        }
        if !player_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'))
        {
            return Err(AdapterRejection::BadRequest(
                "player_id has unsupported characters".to_string(),
            ));
        }
        Ok(SessionKey {
            viewer_id: viewer.map(|v| v.id.clone()),
            player_id: player_id.to_string(),
        })
    }

    fn open_session(&self, viewer: Option<Viewer>) -> PlaybackSession {
        PlaybackSession::open(
            viewer,
            Arc::clone(&self.accessor),
            Arc::clone(&self.checkpoints),
            self.config.gate,
        )
    }

    /// Tears down signed-in players nobody has touched for the idle window.
    fn evict_idle(&mut self, now: UnixTimeMs) {
        let idle_ms = self.config.session_idle_ms;
        let stale: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter(|(_, slot)| now.0.saturating_sub(slot.last_touched.0) >= idle_ms)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some(mut slot) = self.sessions.remove(&key) {
                if let Err(err) = slot.controller.teardown() {
                    warn!(player_id = key.player_id.as_str(), error = %err, "idle player teardown failed");
                }
                debug!(player_id = key.player_id.as_str(), "idle player session evicted");
            }
        }
    }

    /// Runs `f` against the player's controller, opening it on first use.
    fn with_player<T>(
        &mut self,
        viewer: Option<Viewer>,
        player_id: &str,
        f: impl FnOnce(&mut PlaybackController) -> Result<T, GatingError>,
    ) -> Result<T, AdapterRejection> {
        let key = Self::session_key(viewer.as_ref(), player_id)?;
        if key.viewer_id.is_none() {
            let mut controller = PlaybackController::new(self.open_session(None));
            return f(&mut controller).map_err(AdapterRejection::from);
        }

        let now = self.accessor.now();
        self.evict_idle(now);
        let at_capacity = self.sessions.len() >= self.config.max_sessions;
        let accessor = Arc::clone(&self.accessor);
        let checkpoints = Arc::clone(&self.checkpoints);
        let gate = self.config.gate;
        let slot = match self.sessions.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                if at_capacity {
                    warn!(max_sessions = self.config.max_sessions, "player session refused");
                    return Err(AdapterRejection::Unavailable(
                        "too many open players".to_string(),
                    ));
                }
                debug!(player_id = entry.key().player_id.as_str(), "player session opened");
                let session = PlaybackSession::open(viewer, accessor, checkpoints, gate);
                entry.insert(PlayerSlot {
                    controller: PlaybackController::new(session),
                    last_touched: now,
                })
            }
        };
        slot.last_touched = now;
        f(&mut slot.controller).map_err(AdapterRejection::from)
    }

    /// Tells every open player of `viewer_id` that the profile changed.
    fn fan_out_profile_change(&mut self, viewer_id: &ViewerId) -> Result<(), AdapterRejection> {
        for (key, slot) in self.sessions.iter_mut() {
            if key.viewer_id.as_ref() == Some(viewer_id) {
                slot.controller.profile_changed()?;
            }
        }
        Ok(())
    }

    fn effects_response(player_id: &str, effects: Vec<SessionEffect>) -> EffectsResponse {
        EffectsResponse {
            status: "ok".to_string(),
            player_id: player_id.to_string(),
            effects,
        }
    }

    fn profile_response(&self, profile: &ViewerAdProfile, notifications: Vec<Notification>) -> ProfileResponse {
        ProfileResponse {
            status: "ok".to_string(),
            viewer_id: profile.viewer_id.as_str().to_string(),
            mode: profile.mode,
            ads_watched_count: profile.ads_watched_count,
            is_ad_free: self.accessor.is_ad_free(profile),
            remaining_free_time: self.accessor.remaining_free_time(profile),
            ad_free_until_ms: profile.ad_free_until.map(|t| t.0),
            is_vip: profile.is_vip,
            vip_expires_at_ms: profile.vip_expires_at.map(|t| t.0),
            notifications,
        }
    }

    pub fn health_report(&self) -> AdapterHealthResponse {
        AdapterHealthResponse {
            status: "ok".to_string(),
            outcome: "HEALTHY".to_string(),
            active_sessions: self.sessions.len(),
            active_gate_loops: self
                .sessions
                .values()
                .filter(|slot| slot.controller.gate_loop_active())
                .count(),
            checkpoint_backend: self.checkpoint_backend.to_string(),
        }
    }

    /// Read-only: a player with no open session gets a fresh view that is
    /// not kept.
    pub fn gate_state(
        &mut self,
        bearer: Option<&str>,
        player_id: &str,
    ) -> Result<GateStateResponse, AdapterRejection> {
        let viewer = self.viewer_for(bearer);
        let key = Self::session_key(viewer.as_ref(), player_id)?;
        let now = self.accessor.now();
        self.evict_idle(now);
        let (effects, view, gate_loop_active) = match self.sessions.get_mut(&key) {
            Some(slot) => {
                slot.last_touched = now;
                let effects = slot.controller.poll_effects()?;
                let view = slot.controller.view()?;
                (effects, view, slot.controller.gate_loop_active())
            }
            None => {
                let mut session = self.open_session(viewer);
                (session.take_effects(), session.view(), false)
            }
        };
        Ok(GateStateResponse {
            status: "ok".to_string(),
            player_id: player_id.trim().to_string(),
            authenticated: view.authenticated,
            mode: view.mode,
            is_ad_free: view.is_ad_free,
            remaining_free_time: view.remaining_free_time,
            ads_watched_count: view.ads_watched_count,
            needs_completion: view.needs_completion,
            accumulator_state: view.accumulator_state,
            elapsed_ms: view.elapsed_ms,
            interval_ms: view.interval_ms,
            in_player: view.in_player,
            gate_loop_active,
            timed_interrupt: view.timed_interrupt,
            incomplete_batch: view.incomplete_batch,
            interrupts_fired: view.interrupts_fired,
            effects,
        })
    }

    pub fn start_playback(
        &mut self,
        bearer: Option<&str>,
        request: PlayerRequest,
    ) -> Result<EffectsResponse, AdapterRejection> {
        let viewer = self.viewer_for(bearer);
        let effects =
            self.with_player(viewer, &request.player_id, PlaybackController::start_playback)?;
        Ok(Self::effects_response(&request.player_id, effects))
    }

    pub fn pause_playback(
        &mut self,
        bearer: Option<&str>,
        request: PlayerRequest,
    ) -> Result<EffectsResponse, AdapterRejection> {
        let viewer = self.viewer_for(bearer);
        let effects =
            self.with_player(viewer, &request.player_id, PlaybackController::pause_playback)?;
        Ok(Self::effects_response(&request.player_id, effects))
    }

    pub fn reset_playback(
        &mut self,
        bearer: Option<&str>,
        request: PlayerRequest,
    ) -> Result<EffectsResponse, AdapterRejection> {
        let viewer = self.viewer_for(bearer);
        let effects =
            self.with_player(viewer, &request.player_id, PlaybackController::reset_playback)?;
        Ok(Self::effects_response(&request.player_id, effects))
    }

    pub fn ad_watched(
        &mut self,
        bearer: Option<&str>,
        request: PlayerRequest,
    ) -> Result<EffectsResponse, AdapterRejection> {
        let viewer = self.viewer_for(bearer);
        let effects = self.with_player(
            viewer,
            &request.player_id,
            PlaybackController::handle_ad_watched,
        )?;
        Ok(Self::effects_response(&request.player_id, effects))
    }

    /// Page teardown: flushes the player's time and drops its session.
    pub fn close_player(
        &mut self,
        bearer: Option<&str>,
        request: PlayerRequest,
    ) -> Result<EffectsResponse, AdapterRejection> {
        let viewer = self.viewer_for(bearer);
        let key = Self::session_key(viewer.as_ref(), &request.player_id)?;
        if let Some(mut slot) = self.sessions.remove(&key) {
            slot.controller.teardown()?;
            debug!(player_id = request.player_id.as_str(), "player session closed");
        }
        Ok(Self::effects_response(&request.player_id, Vec::new()))
    }

    pub fn record_batch_ad(
        &mut self,
        bearer: Option<&str>,
        request: PlayerRequest,
    ) -> Result<EffectsResponse, AdapterRejection> {
        let viewer = self.require_viewer(bearer)?;
        let viewer_id = viewer.id.clone();
        let effects = self.with_player(
            Some(viewer),
            &request.player_id,
            PlaybackController::record_batch_ad,
        )?;
        if effects.contains(&SessionEffect::CloseIncompleteBatch) {
            self.fan_out_profile_change(&viewer_id)?;
        }
        Ok(Self::effects_response(&request.player_id, effects))
    }

    pub fn switch_mode_from_batch(
        &mut self,
        bearer: Option<&str>,
        request: PlayerRequest,
    ) -> Result<EffectsResponse, AdapterRejection> {
        let viewer = self.require_viewer(bearer)?;
        let effects = self.with_player(
            Some(viewer),
            &request.player_id,
            PlaybackController::switch_mode_from_batch,
        )?;
        Ok(Self::effects_response(&request.player_id, effects))
    }

    pub fn set_mode(
        &mut self,
        bearer: Option<&str>,
        request: SetModeRequest,
    ) -> Result<ProfileResponse, AdapterRejection> {
        let viewer = self.require_viewer(bearer)?;
        let mode = GatingMode::parse(&request.mode).ok_or_else(|| {
            AdapterRejection::BadRequest(format!("unknown gating mode '{}'", request.mode))
        })?;
        let profile = self.accessor.set_mode(Some(&viewer), mode)?;
        self.fan_out_profile_change(&viewer.id)?;
        let saved = Notification::success(
            "Preferences saved",
            format!("Ad mode set to {}.", mode.as_str()),
        );
        Ok(self.profile_response(&profile, vec![saved]))
    }

    pub fn activate_vip(&mut self, bearer: Option<&str>) -> Result<ProfileResponse, AdapterRejection> {
        let viewer = self.require_viewer(bearer)?;
        let profile = self.accessor.activate_vip(Some(&viewer))?;
        self.fan_out_profile_change(&viewer.id)?;
        let days = self
            .accessor
            .load_vip_settings()
            .map(|s| s.vip_duration_days)
            .unwrap_or(self.config.vip.vip_duration_days);
        let notice = Notification::success(
            "VIP activated",
            format!("Enjoy {days} days without ads."),
        );
        Ok(self.profile_response(&profile, vec![notice]))
    }

    pub fn policy(&self, bearer: Option<&str>) -> Result<PolicyResponse, AdapterRejection> {
        self.require_admin(bearer)?;
        Ok(PolicyResponse {
            status: "ok".to_string(),
            policy: self.accessor.load_policy(),
            ad_sources: self.accessor.load_ad_sources().iter().cloned().collect(),
        })
    }

    /// Open players keep the policy they loaded with; the update applies
    /// from the next page load.
    pub fn update_policy(
        &mut self,
        bearer: Option<&str>,
        request: PolicyUpdateRequest,
    ) -> Result<PolicyResponse, AdapterRejection> {
        let admin = self.require_admin(bearer)?;
        let policy = GatingPolicy::v1(
            request.interval_minutes,
            request.ads_required_for_free_time,
            request.free_time_hours,
            request.redirect_url,
        )?;
        self.accessor.update_policy(policy)?;
        info!(admin = admin.id.as_str(), "policy updated via adapter");
        self.policy(bearer)
    }

    pub fn upsert_ad_source(
        &mut self,
        bearer: Option<&str>,
        request: AdSourceRequest,
    ) -> Result<PolicyResponse, AdapterRejection> {
        self.require_admin(bearer)?;
        match request.url {
            Some(url) => {
                let source = AdSource::v1(request.id, url, request.is_active.unwrap_or(true))?;
                self.accessor.add_ad_source(source)?;
            }
            None => {
                let is_active = request.is_active.ok_or_else(|| {
                    AdapterRejection::BadRequest("is_active is required without url".to_string())
                })?;
                self.accessor.set_ad_source_active(&request.id, is_active)?;
            }
        }
        self.policy(bearer)
    }

    /// Cancels every gate loop and flushes every player; used on shutdown.
    pub fn shutdown(&mut self) {
        for (key, mut slot) in std::mem::take(&mut self.sessions) {
            if let Err(err) = slot.controller.teardown() {
                warn!(player_id = key.player_id.as_str(), error = %err, "player teardown failed");
            }
        }
    }
}
