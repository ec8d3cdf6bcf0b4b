#![forbid(unsafe_code)]

pub mod accessor;
pub mod clock;
pub mod controller;
pub mod error;
pub mod gate_loop;
pub mod interrupt;
pub mod session;

pub use accessor::{EntitlementAccessor, ProfileRead, ProfileReadSource, SharedRepo};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use controller::PlaybackController;
pub use error::GatingError;
pub use gate_loop::{spawn_gate_loop, GateLoopExit, GateLoopHandle};
pub use session::{PlaybackSession, SessionView, SharedCheckpoints, TickOutcome};
