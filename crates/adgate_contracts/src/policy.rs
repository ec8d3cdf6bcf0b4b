#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::{validate_http_url, validate_token, MS_PER_MINUTE};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const POLICY_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Upper bound on how many active sources a session rotates through.
pub const MAX_ACTIVE_AD_SOURCES: usize = 5;

const MAX_URL_LEN: usize = 2048;

/// Global gating configuration. Read once per playback session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatingPolicy {
    pub schema_version: SchemaVersion,
    pub interval_minutes: u32,
    pub ads_required_for_free_time: u32,
    pub free_time_hours: u32,
    pub redirect_url: Option<String>,
}

impl GatingPolicy {
    pub fn v1(
        interval_minutes: u32,
        ads_required_for_free_time: u32,
        free_time_hours: u32,
        redirect_url: Option<String>,
    ) -> Result<Self, ContractViolation> {
        let policy = Self {
            schema_version: POLICY_CONTRACT_VERSION,
            interval_minutes,
            ads_required_for_free_time,
            free_time_hours,
            redirect_url: redirect_url.filter(|url| !url.trim().is_empty()),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Served whenever no policy row has been written yet.
    pub fn mvp_default() -> Self {
        Self {
            schema_version: POLICY_CONTRACT_VERSION,
            interval_minutes: 40,
            ads_required_for_free_time: 5,
            free_time_hours: 24,
            redirect_url: None,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        u64::from(self.interval_minutes).saturating_mul(MS_PER_MINUTE)
    }
}

impl Validate for GatingPolicy {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != POLICY_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "gating_policy.schema_version",
                reason: "must match POLICY_CONTRACT_VERSION",
            });
        }
        if self.interval_minutes == 0 || self.interval_minutes > 24 * 60 {
            return Err(ContractViolation::InvalidValue {
                field: "gating_policy.interval_minutes",
                reason: "must be within 1..=1440",
            });
        }
        if self.ads_required_for_free_time == 0 || self.ads_required_for_free_time > 100 {
            return Err(ContractViolation::InvalidValue {
                field: "gating_policy.ads_required_for_free_time",
                reason: "must be within 1..=100",
            });
        }
        if self.free_time_hours == 0 || self.free_time_hours > 24 * 365 {
            return Err(ContractViolation::InvalidValue {
                field: "gating_policy.free_time_hours",
                reason: "must be within 1..=8760",
            });
        }
        if let Some(url) = &self.redirect_url {
            validate_http_url("gating_policy.redirect_url", url, MAX_URL_LEN)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdSource {
    pub id: String,
    pub url: String,
    pub is_active: bool,
}

impl AdSource {
    pub fn v1(id: String, url: String, is_active: bool) -> Result<Self, ContractViolation> {
        let source = Self { id, url, is_active };
        source.validate()?;
        Ok(source)
    }
}

impl Validate for AdSource {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("ad_source.id", &self.id, 64)?;
        validate_http_url("ad_source.url", &self.url, MAX_URL_LEN)
    }
}

/// Ordered snapshot of the sources a session may open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdSourceList {
    sources: Vec<AdSource>,
}

impl AdSourceList {
    /// Keeps active rows in order, capped at `MAX_ACTIVE_AD_SOURCES`.
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a AdSource>) -> Self {
        Self {
            sources: rows
                .into_iter()
                .filter(|s| s.is_active)
                .take(MAX_ACTIVE_AD_SOURCES)
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AdSource> {
        self.sources.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AdSource> {
        self.sources.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VipSettings {
    pub test_payment_enabled: bool,
    pub vip_duration_days: u32,
}

impl VipSettings {
    pub fn v1(
        test_payment_enabled: bool,
        vip_duration_days: u32,
    ) -> Result<Self, ContractViolation> {
        let settings = Self {
            test_payment_enabled,
            vip_duration_days,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn mvp_default() -> Self {
        Self {
            test_payment_enabled: false,
            vip_duration_days: 30,
        }
    }
}

impl Validate for VipSettings {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.vip_duration_days == 0 || self.vip_duration_days > 3650 {
            return Err(ContractViolation::InvalidValue {
                field: "vip_settings.vip_duration_days",
                reason: "must be within 1..=3650",
            });
        }
        Ok(())
    }
}
