// Part of cia402-rs. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! What the control loop needs from a fieldbus master, and typed
//! access to the process data of CiA 402 drives.

use log::*;

use cia402::{OpMode, Result, SdoParam};

/// Object dictionary index of the feedback sensor port list.
pub const DICT_FEEDBACK_SENSOR_PORTS: u16 = 0x2100;
/// Subindex of the sensor function inside a sensor configuration object.
pub const SUB_ENCODER_FUNCTION: u8 = 2;
/// Subindex of the sensor resolution inside a sensor configuration object.
pub const SUB_ENCODER_RESOLUTION: u8 = 3;

/// Encoder resolution assumed when no sensor answers the port scan.
pub const DEFAULT_TICKS_PER_TURN: i32 = 65536;

/// Logical indices of the cyclic input values of a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdoIn {
    Statusword,
    OpModeDisplay,
    PositionValue,
    VelocityValue,
    TorqueValue,
    SecondaryPositionValue,
    SecondaryVelocityValue,
    AnalogInput1,
    AnalogInput2,
    AnalogInput3,
    AnalogInput4,
    TuningStatus,
    DigitalInput1,
    DigitalInput2,
    DigitalInput3,
    DigitalInput4,
    UserMiso,
}

/// Logical indices of the cyclic output values of a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdoOut {
    Controlword,
    OpMode,
    TargetTorque,
    TargetPosition,
    TargetVelocity,
    OffsetTorque,
    TuningCommand,
    DigitalOutput1,
    DigitalOutput2,
    DigitalOutput3,
    DigitalOutput4,
    UserMosi,
}

/// Input process data of one drive, refreshed every cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdoInput {
    pub statusword: u16,
    pub op_mode_display: OpMode,
    pub position_value: i32,
    pub velocity_value: i32,
    pub torque_value: i16,
    pub secondary_position_value: i32,
    pub secondary_velocity_value: i32,
    pub analog_input1: u16,
    pub analog_input2: u16,
    pub analog_input3: u16,
    pub analog_input4: u16,
    pub tuning_status: u32,
    pub digital_input1: u8,
    pub digital_input2: u8,
    pub digital_input3: u8,
    pub digital_input4: u8,
    pub user_miso: u32,
}

/// Output process data of one drive, written every cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdoOutput {
    pub controlword: u16,
    pub op_mode: OpMode,
    pub target_torque: i16,
    pub target_position: i32,
    pub target_velocity: i32,
    pub offset_torque: i32,
    pub tuning_command: u32,
    pub digital_output1: u8,
    pub digital_output2: u8,
    pub digital_output3: u8,
    pub digital_output4: u8,
    pub user_mosi: u32,
}

/// The capability surface of a cyclic master.
///
/// Implementations wrap a real fieldbus master and its PDO mapping;
/// `sim::SimMaster` provides a bus-less stand-in.  All cyclic values
/// travel as `i32` and are cast at the call sites, like the underlying
/// master APIs do it.
pub trait CyclicMaster {
    /// Number of slaves found on the bus.
    fn slave_count(&self) -> usize;

    /// Bring the bus into cyclic operation.
    fn start(&mut self) -> Result<()>;

    /// End cyclic operation.
    fn stop(&mut self);

    /// Run one frame exchange with the bus.
    fn cyclic_step(&mut self) -> Result<()>;

    /// Read one cyclic input value of a slave.
    fn in_value(&self, slave: usize, idx: PdoIn) -> Result<i32>;

    /// Write one cyclic output value of a slave.
    fn set_out_value(&mut self, slave: usize, idx: PdoOut, value: i32) -> Result<()>;

    /// Read an object dictionary entry of a slave.
    fn sdo_read(&mut self, slave: usize, index: u16, subindex: u8) -> Result<i32>;

    /// Write an object dictionary entry of a slave.
    fn sdo_write(&mut self, slave: usize, index: u16, subindex: u8, value: u32) -> Result<()>;

    /// Read the full input snapshot of a slave.
    fn read_inputs(&self, slave: usize) -> Result<PdoInput> {
        Ok(PdoInput {
            statusword: self.in_value(slave, PdoIn::Statusword)? as u16,
            op_mode_display: OpMode::from_raw(self.in_value(slave, PdoIn::OpModeDisplay)? as i8),
            position_value: self.in_value(slave, PdoIn::PositionValue)?,
            velocity_value: self.in_value(slave, PdoIn::VelocityValue)?,
            torque_value: self.in_value(slave, PdoIn::TorqueValue)? as i16,
            secondary_position_value: self.in_value(slave, PdoIn::SecondaryPositionValue)?,
            secondary_velocity_value: self.in_value(slave, PdoIn::SecondaryVelocityValue)?,
            analog_input1: self.in_value(slave, PdoIn::AnalogInput1)? as u16,
            analog_input2: self.in_value(slave, PdoIn::AnalogInput2)? as u16,
            analog_input3: self.in_value(slave, PdoIn::AnalogInput3)? as u16,
            analog_input4: self.in_value(slave, PdoIn::AnalogInput4)? as u16,
            tuning_status: self.in_value(slave, PdoIn::TuningStatus)? as u32,
            digital_input1: self.in_value(slave, PdoIn::DigitalInput1)? as u8,
            digital_input2: self.in_value(slave, PdoIn::DigitalInput2)? as u8,
            digital_input3: self.in_value(slave, PdoIn::DigitalInput3)? as u8,
            digital_input4: self.in_value(slave, PdoIn::DigitalInput4)? as u8,
            user_miso: self.in_value(slave, PdoIn::UserMiso)? as u32,
        })
    }

    /// Write the full output snapshot of a slave.
    fn write_outputs(&mut self, slave: usize, out: &PdoOutput) -> Result<()> {
        self.set_out_value(slave, PdoOut::Controlword, i32::from(out.controlword))?;
        self.set_out_value(slave, PdoOut::OpMode, i32::from(out.op_mode.as_raw()))?;
        self.set_out_value(slave, PdoOut::TargetTorque, i32::from(out.target_torque))?;
        self.set_out_value(slave, PdoOut::TargetPosition, out.target_position)?;
        self.set_out_value(slave, PdoOut::TargetVelocity, out.target_velocity)?;
        self.set_out_value(slave, PdoOut::OffsetTorque, out.offset_torque)?;
        self.set_out_value(slave, PdoOut::TuningCommand, out.tuning_command as i32)?;
        self.set_out_value(slave, PdoOut::DigitalOutput1, i32::from(out.digital_output1))?;
        self.set_out_value(slave, PdoOut::DigitalOutput2, i32::from(out.digital_output2))?;
        self.set_out_value(slave, PdoOut::DigitalOutput3, i32::from(out.digital_output3))?;
        self.set_out_value(slave, PdoOut::DigitalOutput4, i32::from(out.digital_output4))?;
        self.set_out_value(slave, PdoOut::UserMosi, out.user_mosi as i32)?;
        Ok(())
    }
}

/// Read an SDO, mapping failures to the usual -1 sentinel with a warning.
pub fn read_sdo<M: CyclicMaster>(master: &mut M, slave: usize, index: u16, subindex: u8) -> i32 {
    match master.sdo_read(slave, index, subindex) {
        Ok(value) => value,
        Err(e) => {
            warn!("slave {}: could not read object 0x{:04X}:{}: {}",
                  slave, index, subindex, e);
            -1
        }
    }
}

/// Download a parameter list to one slave, stopping at the first
/// object the slave refuses.
pub fn write_sdo_config<M: CyclicMaster>(master: &mut M, slave: usize,
                                         params: &[SdoParam]) -> Result<()> {
    for param in params {
        if let Err(e) = master.sdo_write(slave, param.index, param.subindex, param.value) {
            warn!("slave {}: could not download object 0x{:04X}:{} (value {})",
                  slave, param.index, param.subindex, param.value);
            return Err(e);
        }
        debug!("slave {}: downloaded object 0x{:04X}:{} = {}",
               slave, param.index, param.subindex, param.value);
    }
    Ok(())
}

/// Find the resolution of the motion control encoder of a slave.
///
/// Probes the three sensor ports; the first sensor that reports
/// function 1 or 3 (motion control) provides the resolution.  Falls
/// back to the 16 bit default when nothing suitable answers.
pub fn detect_ticks_per_turn<M: CyclicMaster>(master: &mut M, slave: usize) -> i32 {
    for port in 1..=3 {
        let sensor_config = read_sdo(master, slave, DICT_FEEDBACK_SENSOR_PORTS, port);
        if sensor_config <= 0 {
            continue;
        }
        let function = read_sdo(master, slave, sensor_config as u16, SUB_ENCODER_FUNCTION);
        if function == 1 || function == 3 {
            let resolution = read_sdo(master, slave, sensor_config as u16,
                                      SUB_ENCODER_RESOLUTION);
            if resolution > 0 {
                debug!("slave {}: encoder on port {} with {} ticks/turn",
                       slave, port, resolution);
                return resolution;
            }
            break;
        }
    }
    warn!("slave {}: no position encoder found, assuming {} ticks/turn",
          slave, DEFAULT_TICKS_PER_TURN);
    DEFAULT_TICKS_PER_TURN
}
