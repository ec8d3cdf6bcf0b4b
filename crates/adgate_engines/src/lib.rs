#![forbid(unsafe_code)]

pub mod accumulator;
pub mod batch;
pub mod entitlement;
pub mod gate;
