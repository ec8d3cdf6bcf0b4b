#![forbid(unsafe_code)]

use adgate_contracts::interrupt::{IncompleteBatchView, Notification, TimedInterruptView};
use adgate_contracts::policy::{AdSourceList, GatingPolicy};
use adgate_contracts::profile::ViewerAdProfile;
use adgate_contracts::UnixTimeMs;
use adgate_engines::batch;

pub const ADS_UNAVAILABLE_MESSAGE: &str = "No ads are configured right now. Please try again later.";
pub const GRANT_PENDING_MESSAGE: &str =
    "Your ads are counted but free time could not be unlocked yet. Try again.";

/// How the viewer tried to close an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissRequest {
    OutsideClick,
    Escape,
    CloseButton,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    Timed,
    IncompleteBatch,
}

/// The timed interrupt ignores every dismissal. The batch modal only closes
/// through its own button, and closing it never enters the player.
pub fn allows_dismiss(kind: InterruptKind, request: DismissRequest) -> bool {
    match kind {
        InterruptKind::Timed => false,
        InterruptKind::IncompleteBatch => request == DismissRequest::CloseButton,
    }
}

pub fn timed_interrupt_view(policy: &GatingPolicy, ad_url: Option<String>) -> TimedInterruptView {
    let message = if ad_url.is_some() {
        format!(
            "Watch a short ad to keep going. The next break comes after {} minutes of playback.",
            policy.interval_minutes
        )
    } else {
        ADS_UNAVAILABLE_MESSAGE.to_string()
    };
    TimedInterruptView {
        ad_url,
        interval_minutes: policy.interval_minutes,
        dismissible: false,
        message,
    }
}

pub fn incomplete_batch_view(
    profile: &ViewerAdProfile,
    policy: &GatingPolicy,
    sources: &AdSourceList,
    now: UnixTimeMs,
) -> IncompleteBatchView {
    let progress = batch::progress(profile, policy, now);
    let next_ad_url = batch::next_ad_index(profile.ads_watched_count, sources.len())
        .and_then(|i| sources.get(i))
        .map(|s| s.url.clone());
    let ads_available = next_ad_url.is_some();
    let grant_pending = batch::grant_pending(profile, policy, now);
    let message = if grant_pending {
        GRANT_PENDING_MESSAGE.to_string()
    } else if !ads_available {
        ADS_UNAVAILABLE_MESSAGE.to_string()
    } else if progress.remaining == 1 {
        format!(
            "Watch 1 more ad to unlock {} hours without ads.",
            policy.free_time_hours
        )
    } else {
        format!(
            "Watch {} more ads to unlock {} hours without ads.",
            progress.remaining, policy.free_time_hours
        )
    };
    IncompleteBatchView {
        watched: progress.watched,
        required: progress.required,
        remaining: progress.remaining,
        free_time_hours: policy.free_time_hours,
        next_ad_url,
        ads_available,
        can_enter_player: progress.remaining == 0 && !grant_pending,
        message,
    }
}

pub fn free_time_earned_notice(hours: u32) -> Notification {
    Notification::success(
        "Free time unlocked",
        format!("You earned {hours} hours without ads!"),
    )
}

pub fn ads_unavailable_notice() -> Notification {
    Notification::error("Ads unavailable", ADS_UNAVAILABLE_MESSAGE)
}

pub fn store_failure_notice(action: &str, detail: &str) -> Notification {
    Notification::error(format!("Could not {action}"), detail.to_string())
}
