// Part of cia402-rs. Copyright 2019-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Full control loop test against the simulated bus.

use std::thread;

use cia402::{DeviceState, OpMode, SdoConfig};
use cia402_plc::{CyclicMaster, PlcBuilder, SimMaster};

mod common;
use common::wait_for;

const SDO_TABLE: &str = "
# motor startup parameters
0x2001, 0, 11, 22
0x2002, 3, 0x10, 0x20
";

#[test]
fn test_full_cycle() {
    let mut handle = SimMaster::new(2);
    let config = SdoConfig::parse(SDO_TABLE).unwrap();
    let (mut plc, sup) = PlcBuilder::new("cycletest")
        .cycle_freq(5000)
        .sdo_config(config)
        .build(handle.clone())
        .unwrap();

    assert_eq!(sup.slave_count(), 2);
    // the startup parameters were downloaded per node
    assert_eq!(handle.sdo_read(0, 0x2001, 0).unwrap(), 11);
    assert_eq!(handle.sdo_read(1, 0x2001, 0).unwrap(), 22);
    assert_eq!(handle.sdo_read(1, 0x2002, 3).unwrap(), 0x20);

    let worker = thread::spawn(move || { plc.run(); plc });
    wait_for("cycle start", || sup.is_running());

    // enable the first drive in position mode
    sup.select_slave(0);
    sup.set_op_mode(OpMode::CyclicSynchronousPosition);
    wait_for("operation enabled", || {
        let st = sup.status();
        st.state == DeviceState::OperationEnabled
            && st.op_mode == OpMode::CyclicSynchronousPosition
    });
    // the second drive is left alone
    assert_eq!(handle.device_state(1), DeviceState::SwitchOnDisabled);

    // run a position profile to its target
    sup.set_target(20000);
    wait_for("position reached", || sup.position_actual() == 20000);
    assert_eq!(sup.secondary_position_actual(), 20000);
    assert_eq!(handle.position(0), 20000);

    // switching to velocity mode takes the drive down, re-modes it
    // and brings it back up
    sup.set_op_mode(OpMode::CyclicSynchronousVelocity);
    wait_for("velocity mode enabled", || {
        let st = sup.status();
        st.state == DeviceState::OperationEnabled
            && st.op_mode == OpMode::CyclicSynchronousVelocity
    });
    sup.set_target(30);
    wait_for("velocity reached", || sup.velocity_actual() == 30);

    // an injected fault surfaces with its code, the acknowledge
    // brings the drive back up
    handle.inject_fault(0, 0x7122);
    wait_for("fault reported", || {
        let st = sup.status();
        st.state == DeviceState::Fault && st.error_code == 0x7122
    });
    sup.fault_acknowledge();
    wait_for("fault cleared", || sup.status().state == DeviceState::OperationEnabled);

    // shutdown leaves every drive disabled
    sup.abort();
    let plc = worker.join().unwrap();
    assert!(!sup.is_running());
    assert_eq!(handle.device_state(0), DeviceState::SwitchOnDisabled);
    assert_eq!(handle.device_state(1), DeviceState::SwitchOnDisabled);
    assert_eq!(plc.axis_state(0), Some(DeviceState::SwitchOnDisabled));
}
