// Part of cia402-rs. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Config holds no parameter rows")]
    EmptyConfig,
    #[error("Config holds no node value columns")]
    NoNodes,
    #[error("Config line {0}: expected {1} fields, found {2}")]
    FieldCount(usize, usize, usize),
    #[error("Config line {line}: invalid number {field:?}")]
    BadNumber { line: usize, field: String },
    #[error("Config is for {0} nodes, but the bus has {1} slaves")]
    NodeCount(usize, usize),
    #[error("Master: {0}")]
    Master(String),
    #[error("SDO 0x{index:04X}:{subindex} of slave {slave} failed")]
    Sdo {
        slave: usize,
        index: u16,
        subindex: u8,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        io::Error::new(io::ErrorKind::Other, e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Modes of operation of a CiA 402 drive.
///
/// Only the cyclic synchronous modes are handled here; every other mode
/// reported by a device maps to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum OpMode {
    None = 0,
    CyclicSynchronousPosition = 8,
    CyclicSynchronousVelocity = 9,
    CyclicSynchronousTorque = 10,
}

impl OpMode {
    /// Decode the raw mode value from the op mode display PDO.
    pub fn from_raw(raw: i8) -> Self {
        match raw {
            8 => OpMode::CyclicSynchronousPosition,
            9 => OpMode::CyclicSynchronousVelocity,
            10 => OpMode::CyclicSynchronousTorque,
            _ => OpMode::None,
        }
    }

    pub fn as_raw(self) -> i8 {
        self as i8
    }

    /// True for the three cyclic synchronous modes.
    pub fn is_cyclic(self) -> bool {
        self != OpMode::None
    }
}

impl Default for OpMode {
    fn default() -> Self {
        OpMode::None
    }
}

// Error codes reported by the drive in the user MISO PDO.
pub const ERROR_CODE_DC_LINK_OVER_VOLTAGE: u32 = 0x3210;
pub const ERROR_CODE_DC_LINK_UNDER_VOLTAGE: u32 = 0x3220;
pub const ERROR_CODE_PHASE_FAILURE_L1: u32 = 0x3131;
pub const ERROR_CODE_PHASE_FAILURE_L2: u32 = 0x3132;
pub const ERROR_CODE_PHASE_FAILURE_L3: u32 = 0x3133;
pub const ERROR_CODE_EXCESS_TEMPERATURE_DEVICE: u32 = 0x4210;
pub const ERROR_CODE_MOTOR_BLOCKED: u32 = 0x7121;
pub const ERROR_CODE_MOTOR_COMMUTATION: u32 = 0x7122;
pub const ERROR_CODE_SENSOR: u32 = 0x7300;
pub const ERROR_CODE_COMMUNICATION: u32 = 0x7500;
/// Catch-all for control errors with no more specific code.
pub const ERROR_CODE_CONTROL: u32 = 0x8A00;
