// Part of cia402-rs. Copyright 2020-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! A fault that predates the control program stays standing: only the
//! operator acknowledge may reset it.

use std::thread;
use std::time::Duration;

use cia402::{DeviceState, ERROR_CODE_EXCESS_TEMPERATURE_DEVICE};
use cia402_plc::{PlcBuilder, SimMaster};

mod common;
use common::wait_for;

#[test]
fn test_startup_keeps_plain_fault_standing() {
    let handle = SimMaster::new(1);
    handle.inject_fault(0, ERROR_CODE_EXCESS_TEMPERATURE_DEVICE);

    let (mut plc, sup) = PlcBuilder::new("faulttest")
        .cycle_freq(5000)
        .build(handle.clone())
        .unwrap();
    let worker = thread::spawn(move || plc.run());

    wait_for("fault reported", || {
        let st = sup.status();
        st.state == DeviceState::Fault
            && st.error_code == ERROR_CODE_EXCESS_TEMPERATURE_DEVICE
    });

    // hundreds of cycles without an acknowledge: the fault stays put
    thread::sleep(Duration::from_millis(50));
    assert_eq!(handle.device_state(0), DeviceState::Fault);
    assert_eq!(sup.status().error_code, ERROR_CODE_EXCESS_TEMPERATURE_DEVICE);

    sup.fault_acknowledge();
    wait_for("fault cleared", || {
        let st = sup.status();
        st.state == DeviceState::SwitchOnDisabled && st.error_code == 0
    });

    sup.abort();
    worker.join().unwrap();
    assert_eq!(handle.device_state(0), DeviceState::SwitchOnDisabled);
}
