// Part of cia402-rs. Copyright 2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! The startup parameter table has to match the bus.

use cia402::{Error, SdoConfig};
use cia402_plc::{PlcBuilder, SimMaster};

#[test]
fn test_node_count_mismatch() {
    let master = SimMaster::new(2);
    let config = SdoConfig::parse("0x2001, 0, 1, 2, 3").unwrap();
    match PlcBuilder::new("cfgtest").sdo_config(config).build(master) {
        Err(Error::NodeCount(nodes, slaves)) => assert_eq!((nodes, slaves), (3, 2)),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("mismatched table accepted"),
    }
}
