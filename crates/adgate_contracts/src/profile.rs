#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::viewer::ViewerId;
use crate::{ContractViolation, SchemaVersion, UnixTimeMs, Validate};

pub const PROFILE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Per-viewer gating strategy. The two modes are mutually exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatingMode {
    BatchUpFront,
    #[default]
    TimedInterval,
}

impl GatingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GatingMode::BatchUpFront => "BATCH_UP_FRONT",
            GatingMode::TimedInterval => "TIMED_INTERVAL",
        }
    }

    /// Accepts the canonical names plus the legacy preference values
    /// still stored in older profile rows.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BATCH_UP_FRONT" | "FIVE_AT_ONCE" => Some(GatingMode::BatchUpFront),
            "TIMED_INTERVAL" | "ONE_PER_40MIN" => Some(GatingMode::TimedInterval),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerAdProfile {
    pub schema_version: SchemaVersion,
    pub viewer_id: ViewerId,
    pub email: Option<String>,
    pub mode: GatingMode,
    pub ad_free_until: Option<UnixTimeMs>,
    /// Progress toward the batch threshold. Only meaningful in `BatchUpFront`.
    pub ads_watched_count: u32,
    pub is_vip: bool,
    pub vip_expires_at: Option<UnixTimeMs>,
    pub updated_at: UnixTimeMs,
}

impl ViewerAdProfile {
    /// The row a viewer gets before anything was ever written for them.
    pub fn default_for(viewer_id: ViewerId) -> Self {
        Self {
            schema_version: PROFILE_CONTRACT_VERSION,
            viewer_id,
            email: None,
            mode: GatingMode::default(),
            ad_free_until: None,
            ads_watched_count: 0,
            is_vip: false,
            vip_expires_at: None,
            updated_at: UnixTimeMs(0),
        }
    }

    pub fn vip_active(&self, now: UnixTimeMs) -> bool {
        self.is_vip && self.vip_expires_at.is_some_and(|expires| now < expires)
    }

    pub fn vip_expired(&self, now: UnixTimeMs) -> bool {
        self.is_vip && !self.vip_active(now)
    }
}

impl Validate for ViewerAdProfile {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != PROFILE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "viewer_ad_profile.schema_version",
                reason: "must match PROFILE_CONTRACT_VERSION",
            });
        }
        self.viewer_id.validate()?;
        if let Some(email) = &self.email {
            if email.len() > 254 {
                return Err(ContractViolation::InvalidValue {
                    field: "viewer_ad_profile.email",
                    reason: "must be <= 254 chars",
                });
            }
        }
        Ok(())
    }
}

/// Partial-field upsert. `None` leaves the stored field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
    pub email: Option<String>,
    pub mode: Option<GatingMode>,
    pub ad_free_until: Option<UnixTimeMs>,
    pub ads_watched_count: Option<u32>,
    pub is_vip: Option<bool>,
    pub vip_expires_at: Option<UnixTimeMs>,
}

impl ProfilePatch {
    /// Mode change always travels with a counter reset.
    pub fn mode_change(mode: GatingMode) -> Self {
        Self {
            mode: Some(mode),
            ads_watched_count: Some(0),
            ..Self::default()
        }
    }

    pub fn free_time_grant(until: UnixTimeMs) -> Self {
        Self {
            ad_free_until: Some(until),
            ads_watched_count: Some(0),
            ..Self::default()
        }
    }

    pub fn vip_activation(expires_at: UnixTimeMs) -> Self {
        Self {
            is_vip: Some(true),
            vip_expires_at: Some(expires_at),
            ..Self::default()
        }
    }

    pub fn vip_cleared() -> Self {
        Self {
            is_vip: Some(false),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply_to(&self, profile: &mut ViewerAdProfile, now: UnixTimeMs) {
        if let Some(email) = &self.email {
            profile.email = Some(email.clone());
        }
        if let Some(mode) = self.mode {
            profile.mode = mode;
        }
        if let Some(until) = self.ad_free_until {
            profile.ad_free_until = Some(until);
        }
        if let Some(count) = self.ads_watched_count {
            profile.ads_watched_count = count;
        }
        if let Some(is_vip) = self.is_vip {
            profile.is_vip = is_vip;
        }
        if let Some(expires) = self.vip_expires_at {
            profile.vip_expires_at = Some(expires);
        }
        profile.updated_at = now;
    }
}

impl Validate for ProfilePatch {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "profile_patch",
                reason: "must set at least one field",
            });
        }
        if let Some(email) = &self.email {
            if email.len() > 254 {
                return Err(ContractViolation::InvalidValue {
                    field: "profile_patch.email",
                    reason: "must be <= 254 chars",
                });
            }
        }
        if self.is_vip == Some(true) && self.vip_expires_at.is_none() {
            return Err(ContractViolation::InvalidValue {
                field: "profile_patch.vip_expires_at",
                reason: "must be present when is_vip=true",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemainingFreeTime {
    pub hours: u64,
    pub minutes: u64,
}
