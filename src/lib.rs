// Part of cia402-rs. Copyright 2018-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Building blocks for driving CiA 402 servo drives: the power stage
//! state machine, motion profile generation and per-node SDO
//! configuration tables.
//!
//! The pieces here are plain values and pure functions with no I/O of
//! their own. The cyclic control loop that ties them to a fieldbus
//! lives in the `cia402-plc` crate.

mod config;
mod profile;
mod states;
mod types;

pub use self::{
    config::{SdoConfig, SdoParam},
    profile::{rpm_to_ticks, ticks_to_rpm, MotionProfile, ProfileLimits},
    states::*,
    types::*,
};
