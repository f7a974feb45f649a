// Part of cia402-rs. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Wrap a cyclic master and a set of CiA 402 drives and provide a
//! PLC-like environment for running them.

use std::{mem, thread, time::Duration};
use time::precise_time_ns;
use mlzlog;
use log::*;

use cia402::{DeviceState, Error, ProfileLimits, Result, SdoConfig};

use crate::master::{detect_ticks_per_turn, write_sdo_config, CyclicMaster};
use crate::operation::{control_pass, init_pass, quit_pass, target_pass, Axis};
use crate::shared::{DriveStatus, Shared, Supervisor};

/// Shutdown passes tolerated before dead devices are given up on.
const QUIT_PASS_LIMIT: u32 = 5000;

#[derive(Default)]
pub struct PlcBuilder {
    name: String,
    cycle_freq: Option<u32>,
    logfile_base: Option<String>,
    debug_logging: bool,
    sdo_config: Option<SdoConfig>,
    profile_speed: Option<i32>,
    profile_acceleration: Option<i32>,
    profile_torque_acceleration: Option<i32>,
}

impl PlcBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            .. Self::default()
        }
    }

    pub fn cycle_freq(mut self, freq: u32) -> Self {
        self.cycle_freq = Some(freq);
        self
    }

    pub fn logging_cfg(mut self, logfile_base: Option<String>, debug_logging: bool) -> Self {
        self.logfile_base = logfile_base;
        self.debug_logging = debug_logging;
        self
    }

    /// Startup parameters to download to the slaves before cyclic
    /// operation, usually from `SdoConfig::load`.
    pub fn sdo_config(mut self, config: SdoConfig) -> Self {
        self.sdo_config = Some(config);
        self
    }

    /// Default speed for position profiles, in rpm.
    pub fn profile_speed(mut self, rpm: i32) -> Self {
        self.profile_speed = Some(rpm);
        self
    }

    /// Default (and maximum) acceleration for position and velocity
    /// profiles, in rpm/s.
    pub fn profile_acceleration(mut self, rpm_per_s: i32) -> Self {
        self.profile_acceleration = Some(rpm_per_s);
        self
    }

    /// Default (and maximum) torque slope for torque ramps.
    pub fn profile_torque_acceleration(mut self, slope: i32) -> Self {
        self.profile_torque_acceleration = Some(slope);
        self
    }

    pub fn build<M: CyclicMaster>(self, mut master: M) -> Result<(Plc<M>, Supervisor)> {
        mlzlog::init(self.logfile_base, &self.name, false, self.debug_logging, true)?;

        let num_slaves = master.slave_count();
        info!("PLC: {} slaves on the bus", num_slaves);

        if let Some(config) = &self.sdo_config {
            if config.node_count() != num_slaves {
                return Err(Error::NodeCount(config.node_count(), num_slaves));
            }
            for slave in 0..num_slaves {
                if write_sdo_config(&mut master, slave, config.node_params(slave)).is_err() {
                    warn!("slave {}: startup parameters incomplete", slave);
                }
            }
            info!("PLC: startup parameters downloaded");
        }

        let profile_speed = self.profile_speed.unwrap_or(50);
        let profile_acc = self.profile_acceleration.unwrap_or(50);
        let profile_torque_acc = self.profile_torque_acceleration.unwrap_or(50);

        let axes = (0..num_slaves).map(|slave| {
            let ticks_per_turn = detect_ticks_per_turn(&mut master, slave);
            let limits = ProfileLimits::new(1000, profile_torque_acc, profile_acc, 10000,
                                            0x7fff_ffff, -0x7fff_ffff, ticks_per_turn);
            Axis::new(limits, ticks_per_turn, profile_speed, profile_acc, profile_torque_acc)
        }).collect();

        let supervisor = Supervisor::new();
        supervisor.lock().num_slaves = num_slaves;

        Ok((Plc {
            master,
            axes,
            shared: supervisor.clone(),
            settled: false,
            sleep: 1000_000_000 / self.cycle_freq.unwrap_or(1000) as u64,
        }, supervisor))
    }
}


pub struct Plc<M> {
    master: M,
    axes: Vec<Axis>,
    shared: Supervisor,
    settled: bool,
    sleep: u64,
}

impl<M: CyclicMaster> Plc<M> {
    /// Run the control loop until the supervisor aborts it.
    ///
    /// Brings the bus into cyclic operation, settles all drives into
    /// SwitchOnDisabled, then runs the control passes every cycle.  On
    /// abort, the drives are wound down again before the bus is
    /// released.
    pub fn run(&mut self) {
        if let Err(e) = self.master.start() {
            error!("could not start cyclic operation: {}", e);
        } else {
            self.shared.lock().running = true;
            self.main_loop();
            self.wind_down();
        }
        self.master.stop();
        self.shared.lock().running = false;
        info!("PLC: cycle stopped");
    }

    fn main_loop(&mut self) {
        let mut cycle_start = precise_time_ns();

        loop {
            if self.shared.lock().abort {
                info!("PLC: abort requested");
                return;
            }

            if let Err(e) = self.single_cycle() {
                // XXX: logging unconditionally here is bad, could repeat endlessly
                warn!("error in cycle: {}", e);
            }

            // wait until next cycle
            let now = precise_time_ns();
            cycle_start += self.sleep;
            if cycle_start > now {
                thread::sleep(Duration::from_nanos(cycle_start - now));
            }
        }
    }

    fn single_cycle(&mut self) -> Result<()> {
        self.master.cyclic_step()?;
        for (i, axis) in self.axes.iter_mut().enumerate() {
            axis.input = self.master.read_inputs(i)?;
        }

        if self.settled {
            self.control();
        } else {
            let mut shared = self.shared.lock();
            Self::publish_status(&mut shared, &self.axes);
            drop(shared);
            if init_pass(&mut self.axes) {
                info!("PLC: all slaves settled, control active");
                self.settled = true;
            }
        }

        for (i, axis) in self.axes.iter().enumerate() {
            self.master.write_outputs(i, &axis.output)?;
        }
        Ok(())
    }

    fn publish_status(shared: &mut Shared, axes: &[Axis]) {
        if axes.is_empty() {
            return;
        }
        let axis = &axes[shared.select.min(axes.len() - 1)];
        shared.status = DriveStatus {
            state: axis.state(),
            op_mode: axis.input.op_mode_display,
            position: axis.input.position_value,
            velocity: axis.input.velocity_value,
            torque: axis.input.torque_value,
            secondary_position: axis.input.secondary_position_value,
            secondary_velocity: axis.input.secondary_velocity_value,
            error_code: axis.input.user_miso,
        };
    }

    /// The in-memory part of the cycle: exchange requests and actuals
    /// with the supervisor, then run the control passes.
    fn control(&mut self) {
        if self.axes.is_empty() {
            return;
        }
        let (select, target, fault_ack) = {
            let mut shared = self.shared.lock();
            Self::publish_status(&mut shared, &self.axes);

            let select = shared.select.min(self.axes.len() - 1);
            let axis = &mut self.axes[select];
            axis.output.op_mode = shared.op_mode;
            axis.target_state = shared.target_state;
            // the torque reference goes out directly; the state pass
            // zeroes it again below OperationEnabled
            axis.output.target_torque = shared.torque_ref;
            (select, shared.target.take(),
             mem::replace(&mut shared.fault_ack, false))
        };

        // the profile math runs outside the lock, like the passes below
        if let Some(target) = target {
            let steps = self.axes[select].start_profile(target);
            debug!("slave {}: new target {}, profile over {} samples",
                   select, target, steps);
        }

        let ack_used = control_pass(&mut self.axes, select, fault_ack);
        if fault_ack && !ack_used {
            // nothing was in Fault, keep the acknowledge pending
            self.shared.lock().fault_ack = true;
        }
        target_pass(&mut self.axes);
    }

    /// Command every drive back to SwitchOnDisabled, continuing the
    /// cyclic exchange until all of them report it.
    fn wind_down(&mut self) {
        for passes in 0.. {
            match self.quit_cycle() {
                Ok(false) => {
                    info!("PLC: all slaves wound down after {} passes", passes);
                    return;
                }
                Ok(true) => {}
                Err(e) => warn!("error in wind-down cycle: {}", e),
            }
            if passes >= QUIT_PASS_LIMIT {
                warn!("PLC: wind-down did not settle, giving up");
                return;
            }
            thread::sleep(Duration::from_nanos(self.sleep));
        }
    }

    fn quit_cycle(&mut self) -> Result<bool> {
        self.master.cyclic_step()?;
        for (i, axis) in self.axes.iter_mut().enumerate() {
            axis.input = self.master.read_inputs(i)?;
        }
        let moving = quit_pass(&mut self.axes);
        for (i, axis) in self.axes.iter().enumerate() {
            self.master.write_outputs(i, &axis.output)?;
        }
        Ok(moving)
    }
}

impl<M> Plc<M> {
    /// Device state of one axis as of the last exchanged snapshot.
    pub fn axis_state(&self, slave: usize) -> Option<DeviceState> {
        self.axes.get(slave).map(Axis::state)
    }
}
