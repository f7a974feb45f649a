// Part of cia402-rs. Copyright 2018-2019 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! The per-cycle control passes over all axes: startup gate, state
//! machine control, profile target generation and shutdown settling.

use log::*;

use cia402::{go_to_state, DeviceState, MotionProfile, OpMode, ProfileLimits,
             CONTROL_BIT_FAULT_RESET, ERROR_CODE_COMMUNICATION};

use crate::master::{PdoInput, PdoOutput};

/// Everything the control loop keeps per drive: the process data
/// snapshots, the requested device state and the motion profile.
#[derive(Debug)]
pub struct Axis {
    pub input: PdoInput,
    pub output: PdoOutput,
    pub target_state: DeviceState,
    pub profile: MotionProfile,
    pub ticks_per_turn: i32,
    pub profile_speed: i32,
    pub profile_acceleration: i32,
    pub profile_torque_acceleration: i32,
}

impl Axis {
    pub fn new(limits: ProfileLimits, ticks_per_turn: i32, profile_speed: i32,
               profile_acceleration: i32, profile_torque_acceleration: i32) -> Self {
        Self {
            input: PdoInput::default(),
            output: PdoOutput::default(),
            target_state: DeviceState::SwitchOnDisabled,
            profile: MotionProfile::new(limits),
            ticks_per_turn,
            profile_speed,
            profile_acceleration,
            profile_torque_acceleration,
        }
    }

    /// Device state decoded from the last input snapshot.
    pub fn state(&self) -> DeviceState {
        DeviceState::from_statusword(self.input.statusword)
    }

    /// (Re)initialize the profile for a new target in the currently
    /// displayed mode, starting from the current actual values.
    /// Returns the number of samples the profile will produce.
    pub fn start_profile(&mut self, target: i32) -> u32 {
        match self.input.op_mode_display {
            OpMode::CyclicSynchronousPosition => self.profile.init_position(
                target, self.input.position_value, self.profile_speed,
                self.profile_acceleration, self.profile_acceleration, self.ticks_per_turn),
            OpMode::CyclicSynchronousVelocity => self.profile.init_velocity(
                target, self.input.velocity_value, self.profile_acceleration,
                self.profile_acceleration, self.ticks_per_turn),
            OpMode::CyclicSynchronousTorque => self.profile.init_torque(
                target, i32::from(self.input.torque_value),
                self.profile_torque_acceleration, self.profile_torque_acceleration),
            OpMode::None => 0,
        }
    }
}

/// One pass of the startup gate: push every slave toward a clean
/// SwitchOnDisabled state.  Faults caused by a communication loss (the
/// drive lost the link to the old master instance) are reset here,
/// other faults are left for an explicit acknowledge.  Returns true
/// when no correction was necessary.
pub fn init_pass(axes: &mut [Axis]) -> bool {
    let mut settled = true;
    for (i, axis) in axes.iter_mut().enumerate() {
        let state = axis.state();
        if (state == DeviceState::Fault && axis.input.user_miso == ERROR_CODE_COMMUNICATION)
            || (state != DeviceState::Fault && state != DeviceState::SwitchOnDisabled)
        {
            debug!("init: slave {} in {:?}, requesting SwitchOnDisabled", i, state);
            axis.output.controlword =
                go_to_state(DeviceState::SwitchOnDisabled, state, axis.output.controlword, false);
            settled = false;
        }
    }
    settled
}

/// State machine control for all axes.
///
/// A Fault waits for the operator acknowledge of the selected axis, no
/// matter which mode is requested.  In the cyclic modes, a mismatch
/// between requested and displayed mode drives toward SwitchOnDisabled
/// since the drive only latches a new mode there; otherwise the axis
/// walks toward its requested state, with targets frozen to the actual
/// values below OperationEnabled so that enabling cannot jerk the
/// motor.  Axes without a cyclic mode request are kept in
/// SwitchOnDisabled.
///
/// Returns whether the fault acknowledge was consumed.
pub fn control_pass(axes: &mut [Axis], select: usize, fault_ack: bool) -> bool {
    let mut ack_used = false;
    for (i, axis) in axes.iter_mut().enumerate() {
        let state = axis.state();
        if state == DeviceState::Fault {
            if i == select && fault_ack {
                info!("slave {}: acknowledging fault (code 0x{:04X})", i, axis.input.user_miso);
                axis.output.controlword = go_to_state(
                    DeviceState::SwitchOnDisabled, state, axis.output.controlword, false);
                ack_used = true;
            }
            continue;
        }
        // fault reset is edge triggered, take the bit back once the
        // fault state is gone
        axis.output.controlword &= !CONTROL_BIT_FAULT_RESET;
        if !axis.output.op_mode.is_cyclic() {
            axis.output.controlword =
                go_to_state(DeviceState::SwitchOnDisabled, state, axis.output.controlword, false);
            continue;
        }
        if axis.output.op_mode != axis.input.op_mode_display {
            axis.output.controlword = go_to_state(
                DeviceState::SwitchOnDisabled, state, axis.output.controlword, false);
        } else {
            if state != DeviceState::OperationEnabled {
                axis.output.target_position = axis.input.position_value;
                axis.output.target_velocity = 0;
                axis.output.target_torque = 0;
            }
            axis.output.controlword = go_to_state(
                axis.target_state, state, axis.output.controlword, false);
        }
    }
    ack_used
}

/// Feed the next sample of every active profile into the target that
/// matches the displayed mode.  In position mode, a follow error
/// beyond 1.5 revolutions drops the rest of the profile and snaps the
/// target back to the measured position.
pub fn target_pass(axes: &mut [Axis]) {
    for (i, axis) in axes.iter_mut().enumerate() {
        let sample = match axis.profile.advance() {
            Some(sample) => sample,
            None => continue,
        };
        match axis.input.op_mode_display {
            OpMode::CyclicSynchronousPosition => {
                axis.output.target_position = sample;
                let max_follow_error = i64::from(axis.ticks_per_turn) * 3 / 2;
                let follow_error = i64::from(sample) - i64::from(axis.input.position_value);
                if follow_error.abs() > max_follow_error {
                    warn!("slave {}: follow error {} over limit, dropping profile",
                          i, follow_error);
                    axis.profile.cancel();
                    axis.output.target_position = axis.input.position_value;
                }
            }
            OpMode::CyclicSynchronousVelocity => axis.output.target_velocity = sample,
            OpMode::CyclicSynchronousTorque => axis.output.target_torque = sample as i16,
            OpMode::None => {}
        }
    }
}

/// One pass of the shutdown sequence: every axis whose displayed mode
/// is cyclic is commanded one step toward SwitchOnDisabled.  Returns
/// true while any axis still has to move (a faulted axis counts as
/// settled).
pub fn quit_pass(axes: &mut [Axis]) -> bool {
    let mut moving = false;
    for axis in axes.iter_mut() {
        if !axis.input.op_mode_display.is_cyclic() {
            continue;
        }
        let state = axis.state();
        if state != DeviceState::Fault && state != DeviceState::SwitchOnDisabled {
            axis.output.controlword =
                go_to_state(DeviceState::SwitchOnDisabled, state, axis.output.controlword, false);
            moving = true;
        }
    }
    moving
}


#[cfg(test)]
use cia402::{STATUS_FAULT, STATUS_OP_ENABLED, STATUS_QUICK_STOP, STATUS_READY_SWITCH_ON,
             STATUS_SWITCHED_ON, STATUS_SWITCH_ON_DISABLED};

#[cfg(test)]
fn test_axis() -> Axis {
    let limits = ProfileLimits::new(1000, 50, 50, 10000, i32::MAX, -i32::MAX, 65536);
    Axis::new(limits, 65536, 50, 50, 50)
}

#[test]
fn test_init_pass() {
    let mut axes = vec![test_axis(), test_axis(), test_axis()];
    axes[0].input.statusword = STATUS_SWITCH_ON_DISABLED;
    axes[1].input.statusword = STATUS_OP_ENABLED;
    axes[2].input.statusword = STATUS_FAULT;
    assert!(!init_pass(&mut axes));
    assert_eq!(axes[0].output.controlword, 0x0000);
    assert_eq!(axes[1].output.controlword, 0x0002);
    // a plain fault is not touched by the gate
    assert_eq!(axes[2].output.controlword, 0x0000);

    // but a communication loss fault is reset
    axes[2].input.user_miso = ERROR_CODE_COMMUNICATION;
    assert!(!init_pass(&mut axes));
    assert_eq!(axes[2].output.controlword & CONTROL_BIT_FAULT_RESET, CONTROL_BIT_FAULT_RESET);

    axes[1].input.statusword = STATUS_SWITCH_ON_DISABLED;
    axes[2].input.statusword = STATUS_SWITCH_ON_DISABLED;
    assert!(init_pass(&mut axes));
}

#[test]
fn test_control_pass_walks_up() {
    let mut axes = vec![test_axis()];
    axes[0].output.op_mode = OpMode::CyclicSynchronousVelocity;
    axes[0].target_state = DeviceState::OperationEnabled;
    axes[0].input.statusword = STATUS_SWITCH_ON_DISABLED;

    // mode not latched by the drive yet: stay down
    control_pass(&mut axes, 0, false);
    assert_eq!(axes[0].output.controlword, 0x0000);

    // mode displayed: one edge per pass, targets frozen on the way
    axes[0].input.op_mode_display = OpMode::CyclicSynchronousVelocity;
    axes[0].input.position_value = 4242;
    axes[0].output.target_velocity = 999;
    control_pass(&mut axes, 0, false);
    assert_eq!(axes[0].output.controlword, 0x0006);
    assert_eq!(axes[0].output.target_position, 4242);
    assert_eq!(axes[0].output.target_velocity, 0);
    assert_eq!(axes[0].output.target_torque, 0);

    axes[0].input.statusword = STATUS_READY_SWITCH_ON;
    control_pass(&mut axes, 0, false);
    assert_eq!(axes[0].output.controlword, 0x0007);

    axes[0].input.statusword = STATUS_SWITCHED_ON;
    control_pass(&mut axes, 0, false);
    assert_eq!(axes[0].output.controlword, 0x000f);

    // enabled: targets are not frozen any more
    axes[0].input.statusword = STATUS_OP_ENABLED;
    axes[0].output.target_velocity = 123;
    control_pass(&mut axes, 0, false);
    assert_eq!(axes[0].output.controlword, 0x000f);
    assert_eq!(axes[0].output.target_velocity, 123);
}

#[test]
fn test_control_pass_fault_ack() {
    let mut axes = vec![test_axis(), test_axis()];
    for axis in &mut axes {
        axis.output.op_mode = OpMode::CyclicSynchronousTorque;
        axis.input.op_mode_display = OpMode::CyclicSynchronousTorque;
        axis.input.statusword = STATUS_FAULT;
        axis.output.controlword = 0x000f;
    }

    // without an acknowledge, faults are left alone
    assert!(!control_pass(&mut axes, 0, false));
    assert_eq!(axes[0].output.controlword, 0x000f);
    assert_eq!(axes[1].output.controlword, 0x000f);

    // the acknowledge resets only the selected axis
    assert!(control_pass(&mut axes, 0, true));
    assert_eq!(axes[0].output.controlword, 0x008f);
    assert_eq!(axes[1].output.controlword, 0x000f);
}

#[test]
fn test_control_pass_non_cyclic() {
    let mut axes = vec![test_axis()];
    axes[0].output.op_mode = OpMode::None;
    axes[0].input.statusword = STATUS_OP_ENABLED;
    axes[0].output.controlword = 0x000f;
    control_pass(&mut axes, 0, false);
    assert_eq!(axes[0].output.controlword, 0x000b);
}

#[test]
fn test_control_pass_fault_without_mode() {
    // a fault on an axis without a mode request is not reset on the
    // way to SwitchOnDisabled; it waits for the acknowledge like any
    // other fault
    let mut axes = vec![test_axis()];
    axes[0].input.statusword = STATUS_FAULT;
    assert!(!control_pass(&mut axes, 0, false));
    assert_eq!(axes[0].output.controlword, 0x0000);

    assert!(control_pass(&mut axes, 0, true));
    assert_eq!(axes[0].output.controlword, 0x0080);

    // once the fault is gone the reset bit is taken back even with no
    // mode requested, so the next reset has a fresh edge
    axes[0].input.statusword = STATUS_SWITCH_ON_DISABLED;
    control_pass(&mut axes, 0, false);
    assert_eq!(axes[0].output.controlword, 0x0000);
}

#[test]
fn test_target_pass_position() {
    let mut axes = vec![test_axis()];
    axes[0].input.op_mode_display = OpMode::CyclicSynchronousPosition;
    axes[0].profile.init_position(10000, 0, 3000, 3000, 3000, 65536);

    // the drive follows: the profile runs to the end
    let mut last = 0;
    while axes[0].profile.is_active() {
        target_pass(&mut axes);
        last = axes[0].output.target_position;
        axes[0].input.position_value = last;
    }
    assert_eq!(last, 10000);
}

#[test]
fn test_target_pass_follow_error() {
    let mut axes = vec![test_axis()];
    axes[0].input.op_mode_display = OpMode::CyclicSynchronousPosition;
    axes[0].profile.init_position(400_000, 0, 3000, 3000, 3000, 65536);

    // the motor never moves: once the target is more than 1.5 turns
    // ahead, the profile is dropped and the target snaps back
    for _ in 0..200 {
        target_pass(&mut axes);
    }
    assert!(!axes[0].profile.is_active());
    assert_eq!(axes[0].output.target_position, 0);
}

#[test]
fn test_target_pass_velocity() {
    let mut axes = vec![test_axis()];
    axes[0].input.op_mode_display = OpMode::CyclicSynchronousVelocity;
    axes[0].profile.init_velocity(100, 0, 50, 50, 65536);
    while axes[0].profile.is_active() {
        target_pass(&mut axes);
    }
    assert_eq!(axes[0].output.target_velocity, 100);
}

#[test]
fn test_quit_pass() {
    let mut axes = vec![test_axis(), test_axis()];
    axes[0].input.op_mode_display = OpMode::CyclicSynchronousVelocity;
    axes[0].input.statusword = STATUS_OP_ENABLED;
    axes[0].output.controlword = 0x000f;
    // a slave that never entered a cyclic mode is ignored
    axes[1].input.statusword = STATUS_OP_ENABLED;
    assert!(quit_pass(&mut axes));
    assert_eq!(axes[0].output.controlword, 0x000b);
    assert_eq!(axes[1].output.controlword, 0x0000);

    // quick stop completes on its own, the pass just waits
    axes[0].input.statusword = STATUS_QUICK_STOP;
    assert!(quit_pass(&mut axes));

    axes[0].input.statusword = STATUS_SWITCH_ON_DISABLED;
    assert!(!quit_pass(&mut axes));
}
