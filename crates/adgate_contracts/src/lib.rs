#![forbid(unsafe_code)]

pub mod common;
pub mod interrupt;
pub mod playback;
pub mod policy;
pub mod profile;
pub mod viewer;

pub use common::{ContractViolation, ReasonCodeId, SchemaVersion, UnixTimeMs, Validate};
