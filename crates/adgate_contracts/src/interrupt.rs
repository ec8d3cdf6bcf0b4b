#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{ContractViolation, Validate};

/// Best-effort pause commands understood by common embedded players.
pub const PLAYER_PAUSE_MESSAGES: [&str; 2] = [
    r#"{"event":"command","func":"pauseVideo","args":""}"#,
    r#"{"method":"pause"}"#,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationLevel {
    Info,
    Success,
    Error,
}

/// Dismissible toast shown by the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn success(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Modal raised mid-playback in timed mode. Never dismissible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedInterruptView {
    pub ad_url: Option<String>,
    pub interval_minutes: u32,
    pub dismissible: bool,
    pub message: String,
}

impl Validate for TimedInterruptView {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.dismissible {
            return Err(ContractViolation::InvalidValue {
                field: "timed_interrupt_view.dismissible",
                reason: "must be false",
            });
        }
        if self.interval_minutes == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "timed_interrupt_view.interval_minutes",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// Pre-entry modal for batch mode, carrying live progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteBatchView {
    pub watched: u32,
    pub required: u32,
    pub remaining: u32,
    pub free_time_hours: u32,
    pub next_ad_url: Option<String>,
    pub ads_available: bool,
    pub can_enter_player: bool,
    pub message: String,
}

impl Validate for IncompleteBatchView {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.required == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "incomplete_batch_view.required",
                reason: "must be > 0",
            });
        }
        if self.remaining != self.required.saturating_sub(self.watched) {
            return Err(ContractViolation::InvalidValue {
                field: "incomplete_batch_view.remaining",
                reason: "must equal required - watched",
            });
        }
        if self.can_enter_player && self.remaining > 0 {
            return Err(ContractViolation::InvalidValue {
                field: "incomplete_batch_view.can_enter_player",
                reason: "must be false while ads remain",
            });
        }
        if self.ads_available != self.next_ad_url.is_some() {
            return Err(ContractViolation::InvalidValue {
                field: "incomplete_batch_view.next_ad_url",
                reason: "must be present iff ads_available",
            });
        }
        Ok(())
    }
}

/// Side effects the page performs on behalf of the gating core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEffect {
    OpenAd { url: String },
    PostPlayerMessage(String),
    ShowTimedInterrupt(TimedInterruptView),
    CloseTimedInterrupt,
    ShowIncompleteBatch(IncompleteBatchView),
    CloseIncompleteBatch,
    EnterPlayer,
    NavigateToPreferences,
    Notify(Notification),
}
