#![forbid(unsafe_code)]

use adgate_contracts::common::{MS_PER_HOUR, MS_PER_MINUTE};
use adgate_contracts::profile::{RemainingFreeTime, ViewerAdProfile};
use adgate_contracts::UnixTimeMs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitlementSource {
    Vip,
    EarnedFreeTime,
    None,
}

/// VIP wins over earned free time when both are active.
pub fn entitlement_source(profile: &ViewerAdProfile, now: UnixTimeMs) -> EntitlementSource {
    if profile.vip_active(now) {
        EntitlementSource::Vip
    } else if free_time_active(profile, now) {
        EntitlementSource::EarnedFreeTime
    } else {
        EntitlementSource::None
    }
}

pub fn is_ad_free(profile: &ViewerAdProfile, now: UnixTimeMs) -> bool {
    entitlement_source(profile, now) != EntitlementSource::None
}

fn free_time_active(profile: &ViewerAdProfile, now: UnixTimeMs) -> bool {
    profile.ad_free_until.is_some_and(|until| now < until)
}

/// Time left in the furthest-reaching active window, `None` when not ad-free.
pub fn remaining_free_time(profile: &ViewerAdProfile, now: UnixTimeMs) -> Option<RemainingFreeTime> {
    let vip_end = profile.vip_expires_at.filter(|_| profile.vip_active(now));
    let free_end = profile.ad_free_until.filter(|_| free_time_active(profile, now));
    let end = vip_end.max(free_end)?;
    let left_ms = end.saturating_since(now);
    Some(RemainingFreeTime {
        hours: left_ms / MS_PER_HOUR,
        minutes: (left_ms % MS_PER_HOUR) / MS_PER_MINUTE,
    })
}
