#![forbid(unsafe_code)]

use adgate_contracts::policy::GatingPolicy;
use adgate_contracts::profile::{GatingMode, ViewerAdProfile};
use adgate_contracts::UnixTimeMs;

use crate::entitlement::is_ad_free;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub watched: u32,
    pub required: u32,
    pub remaining: u32,
}

fn batch_applies(profile: &ViewerAdProfile, now: UnixTimeMs) -> bool {
    profile.mode == GatingMode::BatchUpFront && !is_ad_free(profile, now)
}

/// Zero whenever batch gating does not apply.
pub fn remaining_count(profile: &ViewerAdProfile, policy: &GatingPolicy, now: UnixTimeMs) -> u32 {
    if !batch_applies(profile, now) {
        return 0;
    }
    policy
        .ads_required_for_free_time
        .saturating_sub(profile.ads_watched_count)
}

pub fn progress(profile: &ViewerAdProfile, policy: &GatingPolicy, now: UnixTimeMs) -> BatchProgress {
    let required = policy.ads_required_for_free_time;
    let watched = profile.ads_watched_count.min(required);
    BatchProgress {
        watched,
        required,
        remaining: remaining_count(profile, policy, now),
    }
}

/// Enough ads are counted but the free window was never written, e.g. a
/// failed grant or a lowered requirement.
pub fn grant_pending(profile: &ViewerAdProfile, policy: &GatingPolicy, now: UnixTimeMs) -> bool {
    batch_applies(profile, now) && profile.ads_watched_count >= policy.ads_required_for_free_time
}

/// Blocks player entry until the free window exists; it never interrupts
/// playback already underway.
pub fn needs_completion(
    profile: &ViewerAdProfile,
    policy: &GatingPolicy,
    now: UnixTimeMs,
    playback_attempted: bool,
) -> bool {
    playback_attempted
        && (remaining_count(profile, policy, now) > 0 || grant_pending(profile, policy, now))
}

/// Index of the next source to open, cycling through the list.
pub fn next_ad_index(ads_watched_count: u32, source_count: usize) -> Option<usize> {
    if source_count == 0 {
        return None;
    }
    Some(ads_watched_count as usize % source_count)
}

pub fn completes_batch(new_count: u32, policy: &GatingPolicy) -> bool {
    new_count >= policy.ads_required_for_free_time
}
