#![forbid(unsafe_code)]

use adgate_contracts::policy::{AdSource, GatingPolicy, VipSettings};
use adgate_contracts::profile::{ProfilePatch, ViewerAdProfile};
use adgate_contracts::viewer::ViewerId;
use adgate_contracts::UnixTimeMs;

use crate::profile_store::{AdProfileStore, StorageError};

/// Typed repository interface for the persisted profile, policy, and ad
/// source tables. Reads are fallible so remote backends can surface
/// transport failures.
pub trait AdProfileRepo {
    fn profile_row(&self, viewer_id: &ViewerId) -> Result<Option<ViewerAdProfile>, StorageError>;

    fn upsert_profile_patch(
        &mut self,
        viewer_id: &ViewerId,
        patch: &ProfilePatch,
        now: UnixTimeMs,
    ) -> Result<ViewerAdProfile, StorageError>;

    fn increment_ads_watched(
        &mut self,
        viewer_id: &ViewerId,
        now: UnixTimeMs,
    ) -> Result<u32, StorageError>;

    fn policy_row(&self) -> Result<Option<GatingPolicy>, StorageError>;
    fn replace_policy_row(&mut self, policy: GatingPolicy) -> Result<(), StorageError>;

    fn ad_source_rows(&self) -> Result<Vec<AdSource>, StorageError>;
    fn insert_ad_source_row(&mut self, source: AdSource) -> Result<(), StorageError>;
    fn set_ad_source_active(&mut self, id: &str, is_active: bool) -> Result<(), StorageError>;

    fn vip_settings_row(&self) -> Result<Option<VipSettings>, StorageError>;
    fn replace_vip_settings_row(&mut self, settings: VipSettings) -> Result<(), StorageError>;
}

impl AdProfileRepo for AdProfileStore {
    fn profile_row(&self, viewer_id: &ViewerId) -> Result<Option<ViewerAdProfile>, StorageError> {
        Ok(self.profile_get(viewer_id).cloned())
    }

    fn upsert_profile_patch(
        &mut self,
        viewer_id: &ViewerId,
        patch: &ProfilePatch,
        now: UnixTimeMs,
    ) -> Result<ViewerAdProfile, StorageError> {
        self.profile_upsert_patch(viewer_id, patch, now)
    }

    fn increment_ads_watched(
        &mut self,
        viewer_id: &ViewerId,
        now: UnixTimeMs,
    ) -> Result<u32, StorageError> {
        self.profile_increment_ads_watched(viewer_id, now)
    }

    fn policy_row(&self) -> Result<Option<GatingPolicy>, StorageError> {
        Ok(self.policy_get().cloned())
    }

    fn replace_policy_row(&mut self, policy: GatingPolicy) -> Result<(), StorageError> {
        self.policy_replace(policy)
    }

    fn ad_source_rows(&self) -> Result<Vec<AdSource>, StorageError> {
        Ok(self.ad_sources().to_vec())
    }

    fn insert_ad_source_row(&mut self, source: AdSource) -> Result<(), StorageError> {
        self.ad_source_insert(source)
    }

    fn set_ad_source_active(&mut self, id: &str, is_active: bool) -> Result<(), StorageError> {
        self.ad_source_set_active(id, is_active)
    }

    fn vip_settings_row(&self) -> Result<Option<VipSettings>, StorageError> {
        Ok(self.vip_settings_get().copied())
    }

    fn replace_vip_settings_row(&mut self, settings: VipSettings) -> Result<(), StorageError> {
        self.vip_settings_replace(settings)
    }
}
