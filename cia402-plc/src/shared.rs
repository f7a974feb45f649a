// Part of cia402-rs. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! The state shared between the cycle thread and its supervisor.

use std::sync::{Arc, Mutex, MutexGuard};

use cia402::{DeviceState, OpMode};

/// Actual values of the selected drive, published once per cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct DriveStatus {
    pub state: DeviceState,
    pub op_mode: OpMode,
    pub position: i32,
    pub velocity: i32,
    pub torque: i16,
    pub secondary_position: i32,
    pub secondary_velocity: i32,
    pub error_code: u32,
}

#[derive(Debug)]
pub(crate) struct Shared {
    pub running: bool,
    pub abort: bool,
    pub num_slaves: usize,
    pub select: usize,
    pub op_mode: OpMode,
    pub target_state: DeviceState,
    pub torque_ref: i16,
    pub fault_ack: bool,
    pub target: Option<i32>,
    pub status: DriveStatus,
}

impl Default for Shared {
    fn default() -> Self {
        Shared {
            running: false,
            abort: false,
            num_slaves: 0,
            select: 0,
            op_mode: OpMode::None,
            target_state: DeviceState::SwitchOnDisabled,
            torque_ref: 0,
            fault_ack: false,
            target: None,
            status: DriveStatus::default(),
        }
    }
}

/// Handle for supervising a running control loop.
///
/// All methods take the snapshot lock briefly and never touch the bus;
/// the cycle thread picks the requests up on its next pass.  Requests
/// are directed at the currently selected drive.
#[derive(Clone)]
pub struct Supervisor(pub(crate) Arc<Mutex<Shared>>);

impl Supervisor {
    pub(crate) fn new() -> Self {
        Supervisor(Arc::new(Mutex::new(Shared::default())))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared> {
        self.0.lock().unwrap()
    }

    /// True while the cycle thread is exchanging frames.
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Ask the cycle thread to wind the drives down and stop.
    pub fn abort(&self) {
        self.lock().abort = true;
    }

    /// Number of drives found on the bus.
    pub fn slave_count(&self) -> usize {
        self.lock().num_slaves
    }

    /// Direct the supervisory interface at one drive.  Selections past
    /// the end of the bus address the last drive.
    pub fn select_slave(&self, slave: usize) {
        self.lock().select = slave;
    }

    /// Request an operation mode for the selected drive.  A cyclic
    /// mode also requests OperationEnabled; leaving the cyclic modes
    /// requests SwitchOnDisabled.
    pub fn set_op_mode(&self, mode: OpMode) {
        let mut shared = self.lock();
        shared.op_mode = mode;
        shared.target_state = if mode.is_cyclic() {
            DeviceState::OperationEnabled
        } else {
            DeviceState::SwitchOnDisabled
        };
    }

    /// Hand a new profile target to the selected drive, interpreted in
    /// its currently displayed operation mode.
    pub fn set_target(&self, target: i32) {
        self.lock().target = Some(target);
    }

    /// Standing torque reference for the selected drive, applied to
    /// its target torque every cycle while enabled.
    pub fn set_torque_reference(&self, torque: i16) {
        self.lock().torque_ref = torque;
    }

    /// Reset a pending fault of the selected drive.
    pub fn fault_acknowledge(&self) {
        self.lock().fault_ack = true;
    }

    /// Actual values of the selected drive from the last cycle.
    pub fn status(&self) -> DriveStatus {
        self.lock().status
    }

    pub fn position_actual(&self) -> i32 {
        self.lock().status.position
    }

    pub fn secondary_position_actual(&self) -> i32 {
        self.lock().status.secondary_position
    }

    pub fn velocity_actual(&self) -> i32 {
        self.lock().status.velocity
    }

    pub fn secondary_velocity_actual(&self) -> i32 {
        self.lock().status.secondary_velocity
    }

    pub fn torque_actual(&self) -> i16 {
        self.lock().status.torque
    }
}
