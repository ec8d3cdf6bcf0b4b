#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use adgate_contracts::interrupt::Notification;
use adgate_contracts::policy::{AdSource, AdSourceList, GatingPolicy, VipSettings};
use adgate_contracts::profile::{GatingMode, ProfilePatch, RemainingFreeTime, ViewerAdProfile};
use adgate_contracts::viewer::{Viewer, ViewerId};
use adgate_contracts::{UnixTimeMs, Validate};
use adgate_engines::entitlement;
use adgate_storage::AdProfileRepo;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::error::GatingError;

pub type SharedRepo = Arc<Mutex<dyn AdProfileRepo + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileReadSource {
    Store,
    /// No row yet; defaults were synthesized.
    Defaults,
    /// The store read failed; the last value seen for this viewer is served.
    LastKnownGood,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRead {
    pub profile: ViewerAdProfile,
    pub source: ProfileReadSource,
    pub notices: Vec<Notification>,
}

/// Reads and writes the viewer's gating preferences and entitlements.
///
/// Every read-modify-write holds the repo lock for its whole duration, so
/// a mode change and its counter reset land as one row update.
pub struct EntitlementAccessor {
    repo: SharedRepo,
    clock: SharedClock,
    last_known: Mutex<BTreeMap<ViewerId, ViewerAdProfile>>,
}

impl EntitlementAccessor {
    pub fn new(repo: SharedRepo, clock: SharedClock) -> Self {
        Self {
            repo,
            clock,
            last_known: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn now(&self) -> UnixTimeMs {
        self.clock.now()
    }

    pub fn clock(&self) -> SharedClock {
        Arc::clone(&self.clock)
    }

    fn lock_repo(&self) -> Result<MutexGuard<'_, dyn AdProfileRepo + Send + 'static>, GatingError> {
        self.repo
            .lock()
            .map_err(|_| GatingError::LockPoisoned("profile repo"))
    }

    fn remember(&self, profile: &ViewerAdProfile) {
        if let Ok(mut cache) = self.last_known.lock() {
            cache.insert(profile.viewer_id.clone(), profile.clone());
        }
    }

    fn last_known(&self, viewer_id: &ViewerId) -> Option<ViewerAdProfile> {
        self.last_known
            .lock()
            .ok()
            .and_then(|cache| cache.get(viewer_id).cloned())
    }

    fn defaults_for(viewer: &Viewer) -> ViewerAdProfile {
        let mut profile = ViewerAdProfile::default_for(viewer.id.clone());
        profile.email = viewer.email.clone();
        profile
    }

    fn with_email(viewer: &Viewer, mut patch: ProfilePatch) -> ProfilePatch {
        if patch.email.is_none() {
            patch.email = viewer.email.clone();
        }
        patch
    }

    fn require(viewer: Option<&Viewer>) -> Result<&Viewer, GatingError> {
        viewer.ok_or(GatingError::NotAuthenticated)
    }

    /// Profile for `viewer`, or defaults when no row exists yet.
    ///
    /// A failed read falls back to the last value seen for this viewer, then
    /// to defaults. An expired VIP flag is cleared in the store best-effort.
    pub fn get_profile(&self, viewer: Option<&Viewer>) -> Result<ProfileRead, GatingError> {
        let viewer = Self::require(viewer)?;
        let now = self.now();
        let row = {
            let repo = self.lock_repo()?;
            repo.profile_row(&viewer.id)
        };
        let (mut profile, source) = match row {
            Ok(Some(profile)) => (profile, ProfileReadSource::Store),
            Ok(None) => (Self::defaults_for(viewer), ProfileReadSource::Defaults),
            Err(err) => {
                warn!(viewer = viewer.id.as_str(), error = %err, "profile read failed");
                return Ok(match self.last_known(&viewer.id) {
                    Some(profile) => ProfileRead {
                        profile,
                        source: ProfileReadSource::LastKnownGood,
                        notices: Vec::new(),
                    },
                    None => ProfileRead {
                        profile: Self::defaults_for(viewer),
                        source: ProfileReadSource::Defaults,
                        notices: Vec::new(),
                    },
                });
            }
        };

        let mut notices = Vec::new();
        if profile.vip_expired(now) {
            info!(viewer = viewer.id.as_str(), "vip plan expired");
            let write = self
                .lock_repo()
                .and_then(|mut repo| {
                    repo.upsert_profile_patch(&viewer.id, &ProfilePatch::vip_cleared(), now)
                        .map_err(GatingError::from)
                });
            match write {
                Ok(updated) => profile = updated,
                Err(err) => {
                    warn!(viewer = viewer.id.as_str(), error = %err, "vip expiry write-back failed");
                    profile.is_vip = false;
                }
            }
            notices.push(Notification::info(
                "VIP plan expired",
                "Your VIP plan has ended. Ads are back on.",
            ));
        }

        if source == ProfileReadSource::Store {
            self.remember(&profile);
        }
        Ok(ProfileRead {
            profile,
            source,
            notices,
        })
    }

    /// Switches the gating mode and resets the batch counter in one write.
    /// Setting the mode already stored is a no-op and keeps the counter.
    pub fn set_mode(
        &self,
        viewer: Option<&Viewer>,
        mode: GatingMode,
    ) -> Result<ViewerAdProfile, GatingError> {
        let viewer = Self::require(viewer)?;
        let now = self.now();
        let mut repo = self.lock_repo()?;
        if let Some(current) = repo.profile_row(&viewer.id)? {
            if current.mode == mode {
                debug!(viewer = viewer.id.as_str(), mode = mode.as_str(), "mode unchanged");
                drop(repo);
                self.remember(&current);
                return Ok(current);
            }
        }
        let patch = Self::with_email(viewer, ProfilePatch::mode_change(mode));
        let profile = repo.upsert_profile_patch(&viewer.id, &patch, now)?;
        drop(repo);
        info!(viewer = viewer.id.as_str(), mode = mode.as_str(), "gating mode saved");
        self.remember(&profile);
        Ok(profile)
    }

    pub fn increment_ads_watched(&self, viewer: Option<&Viewer>) -> Result<u32, GatingError> {
        let viewer = Self::require(viewer)?;
        let now = self.now();
        let count = self.lock_repo()?.increment_ads_watched(&viewer.id, now)?;
        debug!(viewer = viewer.id.as_str(), count, "batch ad recorded");
        Ok(count)
    }

    /// Opens a free window of `hours` from now and resets the counter.
    pub fn grant_free_time(
        &self,
        viewer: Option<&Viewer>,
        hours: u32,
    ) -> Result<ViewerAdProfile, GatingError> {
        let viewer = Self::require(viewer)?;
        let now = self.now();
        let until = now.plus_hours(hours);
        let patch = Self::with_email(viewer, ProfilePatch::free_time_grant(until));
        let profile = self
            .lock_repo()?
            .upsert_profile_patch(&viewer.id, &patch, now)?;
        info!(viewer = viewer.id.as_str(), hours, until = until.0, "free time granted");
        self.remember(&profile);
        Ok(profile)
    }

    pub fn activate_vip(&self, viewer: Option<&Viewer>) -> Result<ViewerAdProfile, GatingError> {
        let viewer = Self::require(viewer)?;
        let now = self.now();
        let mut repo = self.lock_repo()?;
        let settings = repo
            .vip_settings_row()?
            .unwrap_or_else(VipSettings::mvp_default);
        if !settings.test_payment_enabled {
            return Err(GatingError::PaymentUnavailable);
        }
        let expires = now.plus_days(settings.vip_duration_days);
        let patch = Self::with_email(viewer, ProfilePatch::vip_activation(expires));
        let profile = repo.upsert_profile_patch(&viewer.id, &patch, now)?;
        drop(repo);
        info!(viewer = viewer.id.as_str(), expires = expires.0, "vip activated");
        self.remember(&profile);
        Ok(profile)
    }

    pub fn is_ad_free(&self, profile: &ViewerAdProfile) -> bool {
        entitlement::is_ad_free(profile, self.now())
    }

    pub fn remaining_free_time(&self, profile: &ViewerAdProfile) -> Option<RemainingFreeTime> {
        entitlement::remaining_free_time(profile, self.now())
    }

    /// Stored policy, or the built-in defaults when none is stored or the
    /// read fails.
    pub fn load_policy(&self) -> GatingPolicy {
        let row = self.lock_repo().and_then(|repo| repo.policy_row().map_err(GatingError::from));
        match row {
            Ok(Some(policy)) => policy,
            Ok(None) => GatingPolicy::mvp_default(),
            Err(err) => {
                warn!(error = %err, "policy read failed; using defaults");
                GatingPolicy::mvp_default()
            }
        }
    }

    pub fn load_ad_sources(&self) -> AdSourceList {
        let rows = self
            .lock_repo()
            .and_then(|repo| repo.ad_source_rows().map_err(GatingError::from));
        match rows {
            Ok(rows) => AdSourceList::from_rows(rows.iter()),
            Err(err) => {
                warn!(error = %err, "ad source read failed");
                AdSourceList::default()
            }
        }
    }

    pub fn load_vip_settings(&self) -> Result<VipSettings, GatingError> {
        Ok(self
            .lock_repo()?
            .vip_settings_row()?
            .unwrap_or_else(VipSettings::mvp_default))
    }

    pub fn update_policy(&self, policy: GatingPolicy) -> Result<GatingPolicy, GatingError> {
        policy.validate()?;
        self.lock_repo()?.replace_policy_row(policy.clone())?;
        info!(
            interval_minutes = policy.interval_minutes,
            ads_required = policy.ads_required_for_free_time,
            free_time_hours = policy.free_time_hours,
            "gating policy replaced"
        );
        Ok(policy)
    }

    pub fn add_ad_source(&self, source: AdSource) -> Result<(), GatingError> {
        source.validate()?;
        let id = source.id.clone();
        self.lock_repo()?.insert_ad_source_row(source)?;
        info!(ad_source = id.as_str(), "ad source added");
        Ok(())
    }

    pub fn set_ad_source_active(&self, id: &str, is_active: bool) -> Result<(), GatingError> {
        self.lock_repo()?.set_ad_source_active(id, is_active)?;
        info!(ad_source = id, is_active, "ad source toggled");
        Ok(())
    }

    pub fn replace_vip_settings(&self, settings: VipSettings) -> Result<(), GatingError> {
        settings.validate()?;
        self.lock_repo()?.replace_vip_settings_row(settings)?;
        Ok(())
    }
}
