// Part of cia402-rs. Copyright 2019-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Startup gate test: a drive left faulted by a lost master session
//! is cleaned up without operator help.

use std::thread;

use cia402::{DeviceState, ERROR_CODE_COMMUNICATION};
use cia402_plc::{PlcBuilder, SimMaster};

mod common;
use common::wait_for;

#[test]
fn test_startup_resets_communication_fault() {
    let handle = SimMaster::new(1);
    handle.inject_fault(0, ERROR_CODE_COMMUNICATION);

    let (mut plc, sup) = PlcBuilder::new("startuptest")
        .cycle_freq(5000)
        .build(handle.clone())
        .unwrap();
    let worker = thread::spawn(move || plc.run());

    wait_for("gate settles the drive", || {
        let st = sup.status();
        st.state == DeviceState::SwitchOnDisabled && st.error_code == 0
    });

    sup.abort();
    worker.join().unwrap();
    assert!(!sup.is_running());
    assert_eq!(handle.device_state(0), DeviceState::SwitchOnDisabled);
}
