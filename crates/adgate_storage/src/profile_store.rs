#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use adgate_contracts::policy::{AdSource, GatingPolicy, VipSettings};
use adgate_contracts::profile::{ProfilePatch, ViewerAdProfile};
use adgate_contracts::viewer::ViewerId;
use adgate_contracts::{ContractViolation, UnixTimeMs, Validate};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("{table}: no row for key {key}")]
    NotFound { table: &'static str, key: String },
    #[error("{table}: duplicate key {key}")]
    DuplicateKey { table: &'static str, key: String },
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("contract violation: {0}")]
    ContractViolation(#[from] ContractViolation),
}

/// In-memory tables for viewer profiles, the global policy row, the ad
/// source list, and VIP settings. Every mutation is applied as a whole or
/// not at all, so a reader holding the store never sees a half-written row.
#[derive(Debug, Clone, Default)]
pub struct AdProfileStore {
    profiles: BTreeMap<ViewerId, ViewerAdProfile>,
    policy: Option<GatingPolicy>,
    ad_sources: Vec<AdSource>,
    vip_settings: Option<VipSettings>,
}

impl AdProfileStore {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    pub fn profile_get(&self, viewer_id: &ViewerId) -> Option<&ViewerAdProfile> {
        self.profiles.get(viewer_id)
    }

    pub fn profile_rows(&self) -> &BTreeMap<ViewerId, ViewerAdProfile> {
        &self.profiles
    }

    /// Creates the default row on first write, then applies only the fields
    /// the patch sets.
    pub fn profile_upsert_patch(
        &mut self,
        viewer_id: &ViewerId,
        patch: &ProfilePatch,
        now: UnixTimeMs,
    ) -> Result<ViewerAdProfile, StorageError> {
        viewer_id.validate()?;
        patch.validate()?;

        let mut next = self
            .profiles
            .get(viewer_id)
            .cloned()
            .unwrap_or_else(|| ViewerAdProfile::default_for(viewer_id.clone()));
        patch.apply_to(&mut next, now);
        next.validate()?;

        self.profiles.insert(viewer_id.clone(), next.clone());
        debug!(
            viewer_id = viewer_id.as_str(),
            mode = next.mode.as_str(),
            ads_watched_count = next.ads_watched_count,
            "profile row upserted"
        );
        Ok(next)
    }

    /// Returns the count produced by this write.
    pub fn profile_increment_ads_watched(
        &mut self,
        viewer_id: &ViewerId,
        now: UnixTimeMs,
    ) -> Result<u32, StorageError> {
        viewer_id.validate()?;
        let row = self
            .profiles
            .entry(viewer_id.clone())
            .or_insert_with(|| ViewerAdProfile::default_for(viewer_id.clone()));
        row.ads_watched_count = row.ads_watched_count.saturating_add(1);
        row.updated_at = now;
        debug!(
            viewer_id = viewer_id.as_str(),
            ads_watched_count = row.ads_watched_count,
            "ads watched incremented"
        );
        Ok(row.ads_watched_count)
    }

    pub fn policy_get(&self) -> Option<&GatingPolicy> {
        self.policy.as_ref()
    }

    pub fn policy_replace(&mut self, policy: GatingPolicy) -> Result<(), StorageError> {
        policy.validate()?;
        self.policy = Some(policy);
        Ok(())
    }

    pub fn ad_sources(&self) -> &[AdSource] {
        &self.ad_sources
    }

    pub fn ad_source_insert(&mut self, source: AdSource) -> Result<(), StorageError> {
        source.validate()?;
        if self.ad_sources.iter().any(|s| s.id == source.id) {
            return Err(StorageError::DuplicateKey {
                table: "ad_sources",
                key: source.id,
            });
        }
        self.ad_sources.push(source);
        Ok(())
    }

    pub fn ad_source_set_active(&mut self, id: &str, is_active: bool) -> Result<(), StorageError> {
        let row = self
            .ad_sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StorageError::NotFound {
                table: "ad_sources",
                key: id.to_string(),
            })?;
        row.is_active = is_active;
        Ok(())
    }

    pub fn vip_settings_get(&self) -> Option<&VipSettings> {
        self.vip_settings.as_ref()
    }

    pub fn vip_settings_replace(&mut self, settings: VipSettings) -> Result<(), StorageError> {
        settings.validate()?;
        self.vip_settings = Some(settings);
        Ok(())
    }
}
