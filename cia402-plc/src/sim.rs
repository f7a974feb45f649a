// Part of cia402-rs. Copyright 2019-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! A simulated bus with idealized CiA 402 drives, for tests and for
//! development without hardware.
//!
//! The drives keep their process data in little endian byte images
//! like a real bus would, answer controlword commands with the
//! standard state transitions and track their targets instantly while
//! operation is enabled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use byteorder::{ByteOrder, LittleEndian as LE};

use cia402::{DeviceState, Error, OpMode, Result, CONTROL_BIT_FAULT_RESET,
             STATUS_FAULT, STATUS_FAULT_REACTION_ACTIVE, STATUS_NOT_READY,
             STATUS_OP_ENABLED, STATUS_QUICK_STOP, STATUS_READY_SWITCH_ON,
             STATUS_SWITCHED_ON, STATUS_SWITCH_ON_DISABLED};

use crate::master::{CyclicMaster, PdoIn, PdoOut, DICT_FEEDBACK_SENSOR_PORTS,
                    SUB_ENCODER_FUNCTION, SUB_ENCODER_RESOLUTION};

const IN_IMAGE_SIZE: usize = 41;
const OUT_IMAGE_SIZE: usize = 29;

/// Remote bit, always on in the synthesized statusword.
const STATUS_BIT_REMOTE: u16 = 0x0200;

/// Cycles a simulated drive spends ramping down in QuickStop.
pub const QUICK_STOP_CYCLES: u32 = 5;
/// Cycles between fault injection and the Fault state.
pub const FAULT_REACTION_CYCLES: u32 = 2;

/// Sensor configuration object the default dictionary points to.
const SIM_SENSOR_OBJECT: u16 = 0x2110;
/// Resolution of the simulated encoder.
pub const SIM_TICKS_PER_TURN: i32 = 0x40000;

fn in_spec(idx: PdoIn) -> (usize, usize) {
    match idx {
        PdoIn::Statusword => (0, 2),
        PdoIn::OpModeDisplay => (2, 1),
        PdoIn::PositionValue => (3, 4),
        PdoIn::VelocityValue => (7, 4),
        PdoIn::TorqueValue => (11, 2),
        PdoIn::SecondaryPositionValue => (13, 4),
        PdoIn::SecondaryVelocityValue => (17, 4),
        PdoIn::AnalogInput1 => (21, 2),
        PdoIn::AnalogInput2 => (23, 2),
        PdoIn::AnalogInput3 => (25, 2),
        PdoIn::AnalogInput4 => (27, 2),
        PdoIn::TuningStatus => (29, 4),
        PdoIn::DigitalInput1 => (33, 1),
        PdoIn::DigitalInput2 => (34, 1),
        PdoIn::DigitalInput3 => (35, 1),
        PdoIn::DigitalInput4 => (36, 1),
        PdoIn::UserMiso => (37, 4),
    }
}

fn out_spec(idx: PdoOut) -> (usize, usize) {
    match idx {
        PdoOut::Controlword => (0, 2),
        PdoOut::OpMode => (2, 1),
        PdoOut::TargetTorque => (3, 2),
        PdoOut::TargetPosition => (5, 4),
        PdoOut::TargetVelocity => (9, 4),
        PdoOut::OffsetTorque => (13, 4),
        PdoOut::TuningCommand => (17, 4),
        PdoOut::DigitalOutput1 => (21, 1),
        PdoOut::DigitalOutput2 => (22, 1),
        PdoOut::DigitalOutput3 => (23, 1),
        PdoOut::DigitalOutput4 => (24, 1),
        PdoOut::UserMosi => (25, 4),
    }
}

fn read_image(image: &[u8], off: usize, len: usize) -> i32 {
    match len {
        1 => i32::from(image[off] as i8),
        2 => i32::from(LE::read_i16(&image[off..off + 2])),
        _ => LE::read_i32(&image[off..off + 4]),
    }
}

fn write_image(image: &mut [u8], off: usize, len: usize, value: i32) {
    match len {
        1 => image[off] = value as u8,
        2 => LE::write_i16(&mut image[off..off + 2], value as i16),
        _ => LE::write_i32(&mut image[off..off + 4], value),
    }
}

// controlword command decoding, as the drive side sees it
fn cmd_shutdown(cw: u16) -> bool { cw & 0x87 == 0x06 }
fn cmd_switch_on(cw: u16) -> bool { cw & 0x8f == 0x07 }
fn cmd_enable_op(cw: u16) -> bool { cw & 0x8f == 0x0f }
fn cmd_disable_voltage(cw: u16) -> bool { cw & 0x82 == 0x00 }
fn cmd_quick_stop(cw: u16) -> bool { cw & 0x86 == 0x02 }

fn status_pattern(state: DeviceState) -> u16 {
    match state {
        DeviceState::NotReady => STATUS_NOT_READY,
        DeviceState::SwitchOnDisabled => STATUS_SWITCH_ON_DISABLED,
        DeviceState::ReadySwitchOn => STATUS_READY_SWITCH_ON,
        DeviceState::SwitchedOn => STATUS_SWITCHED_ON,
        DeviceState::OperationEnabled => STATUS_OP_ENABLED,
        DeviceState::QuickStop => STATUS_QUICK_STOP,
        DeviceState::FaultReactionActive => STATUS_FAULT_REACTION_ACTIVE,
        DeviceState::Fault => STATUS_FAULT,
    }
}

struct SimSlave {
    inputs: [u8; IN_IMAGE_SIZE],
    outputs: [u8; OUT_IMAGE_SIZE],
    state: DeviceState,
    op_mode: OpMode,
    position: i32,
    velocity: i32,
    torque: i16,
    fault_code: u32,
    timer: u32,
    last_controlword: u16,
    sdo: HashMap<(u16, u8), i32>,
}

impl SimSlave {
    fn new() -> Self {
        let mut sdo = HashMap::new();
        sdo.insert((DICT_FEEDBACK_SENSOR_PORTS, 1), i32::from(SIM_SENSOR_OBJECT));
        sdo.insert((SIM_SENSOR_OBJECT, SUB_ENCODER_FUNCTION), 1);
        sdo.insert((SIM_SENSOR_OBJECT, SUB_ENCODER_RESOLUTION), SIM_TICKS_PER_TURN);
        SimSlave {
            inputs: [0; IN_IMAGE_SIZE],
            outputs: [0; OUT_IMAGE_SIZE],
            state: DeviceState::NotReady,
            op_mode: OpMode::None,
            position: 0,
            velocity: 0,
            torque: 0,
            fault_code: 0,
            timer: 0,
            last_controlword: 0,
            sdo,
        }
    }

    fn inject_fault(&mut self, code: u32) {
        self.fault_code = code;
        self.timer = FAULT_REACTION_CYCLES;
        self.state = DeviceState::FaultReactionActive;
    }

    fn step(&mut self) {
        let cw = LE::read_u16(&self.outputs[0..2]);
        let rising_reset = cw & CONTROL_BIT_FAULT_RESET != 0
            && self.last_controlword & CONTROL_BIT_FAULT_RESET == 0;
        self.last_controlword = cw;

        // a new mode is latched only while operation is not enabled
        if self.state != DeviceState::OperationEnabled {
            self.op_mode = OpMode::from_raw(self.outputs[2] as i8);
        }

        self.state = match self.state {
            DeviceState::NotReady => DeviceState::SwitchOnDisabled,
            DeviceState::SwitchOnDisabled => {
                if cmd_shutdown(cw) {
                    DeviceState::ReadySwitchOn
                } else {
                    self.state
                }
            }
            DeviceState::ReadySwitchOn => {
                if cmd_switch_on(cw) {
                    DeviceState::SwitchedOn
                } else if cmd_disable_voltage(cw) || cmd_quick_stop(cw) {
                    DeviceState::SwitchOnDisabled
                } else {
                    self.state
                }
            }
            DeviceState::SwitchedOn => {
                if cmd_enable_op(cw) {
                    DeviceState::OperationEnabled
                } else if cmd_shutdown(cw) {
                    DeviceState::ReadySwitchOn
                } else if cmd_disable_voltage(cw) || cmd_quick_stop(cw) {
                    DeviceState::SwitchOnDisabled
                } else {
                    self.state
                }
            }
            DeviceState::OperationEnabled => {
                if cmd_switch_on(cw) {
                    DeviceState::SwitchedOn
                } else if cmd_shutdown(cw) {
                    DeviceState::ReadySwitchOn
                } else if cmd_disable_voltage(cw) {
                    DeviceState::SwitchOnDisabled
                } else if cmd_quick_stop(cw) {
                    self.timer = QUICK_STOP_CYCLES;
                    DeviceState::QuickStop
                } else {
                    self.state
                }
            }
            DeviceState::QuickStop => {
                if cmd_disable_voltage(cw) || self.timer == 0 {
                    DeviceState::SwitchOnDisabled
                } else {
                    self.timer -= 1;
                    self.state
                }
            }
            DeviceState::FaultReactionActive => {
                if self.timer == 0 {
                    DeviceState::Fault
                } else {
                    self.timer -= 1;
                    self.state
                }
            }
            DeviceState::Fault => {
                if rising_reset {
                    self.fault_code = 0;
                    DeviceState::SwitchOnDisabled
                } else {
                    self.state
                }
            }
        };

        // ideal tracking while enabled, dead motor otherwise
        if self.state == DeviceState::OperationEnabled {
            match self.op_mode {
                OpMode::CyclicSynchronousPosition => {
                    self.position = LE::read_i32(&self.outputs[5..9]);
                }
                OpMode::CyclicSynchronousVelocity => {
                    self.velocity = LE::read_i32(&self.outputs[9..13]);
                }
                OpMode::CyclicSynchronousTorque => {
                    self.torque = LE::read_i16(&self.outputs[3..5]);
                }
                OpMode::None => {}
            }
        } else {
            self.velocity = 0;
            self.torque = 0;
        }

        let statusword = status_pattern(self.state) | STATUS_BIT_REMOTE;
        LE::write_u16(&mut self.inputs[0..2], statusword);
        self.inputs[2] = self.op_mode.as_raw() as u8;
        LE::write_i32(&mut self.inputs[3..7], self.position);
        LE::write_i32(&mut self.inputs[7..11], self.velocity);
        LE::write_i16(&mut self.inputs[11..13], self.torque);
        LE::write_i32(&mut self.inputs[13..17], self.position);
        LE::write_i32(&mut self.inputs[17..21], self.velocity);
        LE::write_u32(&mut self.inputs[37..41], self.fault_code);
    }
}

struct SimBus {
    slaves: Vec<SimSlave>,
    started: bool,
}

impl SimBus {
    fn get(&self, slave: usize) -> Result<&SimSlave> {
        self.slaves.get(slave)
            .ok_or_else(|| Error::Master(format!("no slave {}", slave)))
    }

    fn get_mut(&mut self, slave: usize) -> Result<&mut SimSlave> {
        self.slaves.get_mut(slave)
            .ok_or_else(|| Error::Master(format!("no slave {}", slave)))
    }
}

/// A handle to a simulated bus.  Clones address the same bus, so a
/// test can keep one handle while the control loop owns another.
#[derive(Clone)]
pub struct SimMaster {
    bus: Arc<Mutex<SimBus>>,
}

impl SimMaster {
    pub fn new(num_slaves: usize) -> Self {
        let slaves = (0..num_slaves).map(|_| SimSlave::new()).collect();
        SimMaster { bus: Arc::new(Mutex::new(SimBus { slaves, started: false })) }
    }

    /// Make a slave fail with the given vendor error code.  The drive
    /// runs its fault reaction first and then lands in Fault.
    pub fn inject_fault(&self, slave: usize, code: u32) {
        self.bus.lock().unwrap().slaves[slave].inject_fault(code);
    }

    /// Device-side state of a slave.
    pub fn device_state(&self, slave: usize) -> DeviceState {
        self.bus.lock().unwrap().slaves[slave].state
    }

    /// Device-side position of a slave.
    pub fn position(&self, slave: usize) -> i32 {
        self.bus.lock().unwrap().slaves[slave].position
    }

    /// Add or replace an object dictionary entry of a slave.
    pub fn set_sdo_entry(&self, slave: usize, index: u16, subindex: u8, value: i32) {
        self.bus.lock().unwrap().slaves[slave].sdo.insert((index, subindex), value);
    }

    /// Remove an object dictionary entry of a slave, making reads of
    /// it fail.
    pub fn remove_sdo_entry(&self, slave: usize, index: u16, subindex: u8) {
        self.bus.lock().unwrap().slaves[slave].sdo.remove(&(index, subindex));
    }
}

impl CyclicMaster for SimMaster {
    fn slave_count(&self) -> usize {
        self.bus.lock().unwrap().slaves.len()
    }

    fn start(&mut self) -> Result<()> {
        self.bus.lock().unwrap().started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.bus.lock().unwrap().started = false;
    }

    fn cyclic_step(&mut self) -> Result<()> {
        let mut bus = self.bus.lock().unwrap();
        if !bus.started {
            return Err(Error::Master("cyclic operation not started".into()));
        }
        for slave in &mut bus.slaves {
            slave.step();
        }
        Ok(())
    }

    fn in_value(&self, slave: usize, idx: PdoIn) -> Result<i32> {
        let bus = self.bus.lock().unwrap();
        let (off, len) = in_spec(idx);
        Ok(read_image(&bus.get(slave)?.inputs, off, len))
    }

    fn set_out_value(&mut self, slave: usize, idx: PdoOut, value: i32) -> Result<()> {
        let mut bus = self.bus.lock().unwrap();
        let (off, len) = out_spec(idx);
        write_image(&mut bus.get_mut(slave)?.outputs, off, len, value);
        Ok(())
    }

    fn sdo_read(&mut self, slave: usize, index: u16, subindex: u8) -> Result<i32> {
        self.bus.lock().unwrap().get(slave)?
            .sdo.get(&(index, subindex)).copied()
            .ok_or(Error::Sdo { slave, index, subindex })
    }

    fn sdo_write(&mut self, slave: usize, index: u16, subindex: u8, value: u32) -> Result<()> {
        self.bus.lock().unwrap().get_mut(slave)?
            .sdo.insert((index, subindex), value as i32);
        Ok(())
    }
}


#[cfg(test)]
use crate::master::detect_ticks_per_turn;

#[test]
fn test_device_state_chain() {
    let mut master = SimMaster::new(1);
    master.start().unwrap();
    master.cyclic_step().unwrap();
    assert_eq!(master.device_state(0), DeviceState::SwitchOnDisabled);

    master.set_out_value(0, PdoOut::Controlword, 0x0006).unwrap();
    master.cyclic_step().unwrap();
    assert_eq!(master.device_state(0), DeviceState::ReadySwitchOn);

    master.set_out_value(0, PdoOut::Controlword, 0x0007).unwrap();
    master.cyclic_step().unwrap();
    assert_eq!(master.device_state(0), DeviceState::SwitchedOn);

    master.set_out_value(0, PdoOut::Controlword, 0x000f).unwrap();
    master.cyclic_step().unwrap();
    assert_eq!(master.device_state(0), DeviceState::OperationEnabled);

    // quick stop ramps down, then the device disables itself
    master.set_out_value(0, PdoOut::Controlword, 0x000b).unwrap();
    master.cyclic_step().unwrap();
    assert_eq!(master.device_state(0), DeviceState::QuickStop);
    for _ in 0..=QUICK_STOP_CYCLES {
        master.cyclic_step().unwrap();
    }
    assert_eq!(master.device_state(0), DeviceState::SwitchOnDisabled);
}

#[test]
fn test_device_mode_latch() {
    let mut master = SimMaster::new(1);
    master.start().unwrap();
    master.set_out_value(0, PdoOut::OpMode, 9).unwrap();
    master.cyclic_step().unwrap();
    assert_eq!(master.in_value(0, PdoIn::OpModeDisplay).unwrap(), 9);

    for cw in &[0x0006, 0x0007, 0x000f] {
        master.set_out_value(0, PdoOut::Controlword, *cw).unwrap();
        master.cyclic_step().unwrap();
    }
    assert_eq!(master.device_state(0), DeviceState::OperationEnabled);

    // a mode change is refused while operation is enabled
    master.set_out_value(0, PdoOut::OpMode, 8).unwrap();
    master.cyclic_step().unwrap();
    assert_eq!(master.in_value(0, PdoIn::OpModeDisplay).unwrap(), 9);
}

#[test]
fn test_device_fault_reset_edge() {
    let mut master = SimMaster::new(1);
    master.start().unwrap();
    master.cyclic_step().unwrap();

    // consume an edge before the fault happens
    master.set_out_value(0, PdoOut::Controlword, 0x0080).unwrap();
    master.cyclic_step().unwrap();

    master.inject_fault(0, 0x7121);
    for _ in 0..=FAULT_REACTION_CYCLES {
        master.cyclic_step().unwrap();
    }
    assert_eq!(master.device_state(0), DeviceState::Fault);
    assert_eq!(master.in_value(0, PdoIn::UserMiso).unwrap(), 0x7121);

    // the bit is still set from before, a reset needs a fresh edge
    master.cyclic_step().unwrap();
    assert_eq!(master.device_state(0), DeviceState::Fault);

    master.set_out_value(0, PdoOut::Controlword, 0x0000).unwrap();
    master.cyclic_step().unwrap();
    master.set_out_value(0, PdoOut::Controlword, 0x0080).unwrap();
    master.cyclic_step().unwrap();
    assert_eq!(master.device_state(0), DeviceState::SwitchOnDisabled);
    assert_eq!(master.in_value(0, PdoIn::UserMiso).unwrap(), 0);
}

#[test]
fn test_device_tracks_targets() {
    let mut master = SimMaster::new(1);
    master.start().unwrap();
    master.set_out_value(0, PdoOut::OpMode, 8).unwrap();
    master.cyclic_step().unwrap();
    for cw in &[0x0006, 0x0007, 0x000f] {
        master.set_out_value(0, PdoOut::Controlword, *cw).unwrap();
        master.cyclic_step().unwrap();
    }
    assert_eq!(master.device_state(0), DeviceState::OperationEnabled);

    master.set_out_value(0, PdoOut::TargetPosition, 12345).unwrap();
    master.cyclic_step().unwrap();
    assert_eq!(master.in_value(0, PdoIn::PositionValue).unwrap(), 12345);
    assert_eq!(master.in_value(0, PdoIn::SecondaryPositionValue).unwrap(), 12345);
}

#[test]
fn test_encoder_scan() {
    let mut master = SimMaster::new(3);
    assert_eq!(detect_ticks_per_turn(&mut master, 0), SIM_TICKS_PER_TURN);

    // no sensor objects at all: fall back to the default
    master.remove_sdo_entry(1, DICT_FEEDBACK_SENSOR_PORTS, 1);
    assert_eq!(detect_ticks_per_turn(&mut master, 1), 65536);

    // a sensor that is not a motion control encoder does not count
    master.set_sdo_entry(2, SIM_SENSOR_OBJECT, SUB_ENCODER_FUNCTION, 4);
    assert_eq!(detect_ticks_per_turn(&mut master, 2), 65536);
}
