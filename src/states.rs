// Part of cia402-rs. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! The CiA 402 power stage state machine: statusword decoding and
//! controlword generation.

/// Statusword mask covering the state bits including bit 5 (quick stop).
pub const STATUS_WORD_MASK_A: u16 = 0x6f;
/// Statusword mask for the states where bit 5 carries no information.
pub const STATUS_WORD_MASK_B: u16 = 0x4f;

pub const STATUS_NOT_READY: u16 = 0x00; // mask B
pub const STATUS_SWITCH_ON_DISABLED: u16 = 0x40; // mask B
pub const STATUS_READY_SWITCH_ON: u16 = 0x21;
pub const STATUS_SWITCHED_ON: u16 = 0x23;
pub const STATUS_OP_ENABLED: u16 = 0x27;
pub const STATUS_QUICK_STOP: u16 = 0x07;
pub const STATUS_FAULT_REACTION_ACTIVE: u16 = 0x0f; // mask B
pub const STATUS_FAULT: u16 = 0x08; // mask B

pub const CONTROL_BIT_ENABLE_OP: u16 = 0x08;
pub const CONTROL_BIT_QUICK_STOP: u16 = 0x04;
pub const CONTROL_BIT_ENABLE_VOLTAGE: u16 = 0x02;
pub const CONTROL_BIT_SWITCH_ON: u16 = 0x01;
pub const CONTROL_BIT_FAULT_RESET: u16 = 0x80;

/// States of the CiA 402 power stage.
///
/// The four states reachable by explicit commands are ordered, with
/// `SwitchOnDisabled` the lowest and `OperationEnabled` the highest, so
/// that driving up or down the chain is a simple comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceState {
    NotReady,
    SwitchOnDisabled,
    ReadySwitchOn,
    SwitchedOn,
    OperationEnabled,
    QuickStop,
    FaultReactionActive,
    Fault,
}

impl DeviceState {
    /// Decode the state from a reported statusword.
    ///
    /// The fault group is matched first under mask B, since for those
    /// states bit 5 is not significant; the remaining states are then
    /// matched under mask A. Unknown patterns read as `NotReady`.
    pub fn from_statusword(statusword: u16) -> Self {
        match statusword & STATUS_WORD_MASK_B {
            STATUS_NOT_READY => DeviceState::NotReady,
            STATUS_SWITCH_ON_DISABLED => DeviceState::SwitchOnDisabled,
            STATUS_FAULT_REACTION_ACTIVE => DeviceState::FaultReactionActive,
            STATUS_FAULT => DeviceState::Fault,
            _ => match statusword & STATUS_WORD_MASK_A {
                STATUS_READY_SWITCH_ON => DeviceState::ReadySwitchOn,
                STATUS_SWITCHED_ON => DeviceState::SwitchedOn,
                STATUS_OP_ENABLED => DeviceState::OperationEnabled,
                STATUS_QUICK_STOP => DeviceState::QuickStop,
                _ => DeviceState::NotReady,
            },
        }
    }

    /// True for the four states reachable by explicit commands.
    pub fn is_commandable(self) -> bool {
        DeviceState::SwitchOnDisabled <= self && self <= DeviceState::OperationEnabled
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        DeviceState::NotReady
    }
}

/// Controlword commands of the CiA 402 profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    None,
    Shutdown,
    SwitchOn,
    DisableVoltage,
    QuickStop,
    DisableOperation,
    EnableOperation,
    FaultReset,
}

impl Command {
    /// Apply the command to a controlword.
    ///
    /// Each command touches only the four control bits and the fault
    /// reset bit; manufacturer specific bits pass through untouched.
    pub fn apply(self, controlword: u16) -> u16 {
        match self {
            Command::Shutdown => {
                (controlword & !CONTROL_BIT_FAULT_RESET & !CONTROL_BIT_SWITCH_ON)
                    | CONTROL_BIT_QUICK_STOP
                    | CONTROL_BIT_ENABLE_VOLTAGE
            }
            // disable operation is the same bit pattern as switch on
            Command::SwitchOn | Command::DisableOperation => {
                (controlword & !CONTROL_BIT_FAULT_RESET & !CONTROL_BIT_ENABLE_OP)
                    | CONTROL_BIT_QUICK_STOP
                    | CONTROL_BIT_ENABLE_VOLTAGE
                    | CONTROL_BIT_SWITCH_ON
            }
            Command::DisableVoltage => {
                controlword & !CONTROL_BIT_FAULT_RESET & !CONTROL_BIT_ENABLE_VOLTAGE
            }
            Command::QuickStop => {
                (controlword & !CONTROL_BIT_FAULT_RESET & !CONTROL_BIT_QUICK_STOP)
                    | CONTROL_BIT_ENABLE_VOLTAGE
            }
            Command::EnableOperation => {
                (controlword & !CONTROL_BIT_FAULT_RESET)
                    | CONTROL_BIT_ENABLE_OP
                    | CONTROL_BIT_QUICK_STOP
                    | CONTROL_BIT_ENABLE_VOLTAGE
                    | CONTROL_BIT_SWITCH_ON
            }
            Command::FaultReset => controlword | CONTROL_BIT_FAULT_RESET,
            Command::None => controlword,
        }
    }
}

/// Generate the controlword that moves the device one transition from
/// `current` toward `target`.
///
/// Only the four commandable states are meaningful targets; any other
/// target is treated as `SwitchOnDisabled`. From `Fault` the reset is
/// issued (transition 15). Between commandable states one edge of the
/// chain is commanded per call: transitions 2, 3, 4 on the way up, 6, 7
/// and the quick stop 11 on the way down. With `skip_state` the
/// shortcut transitions 5, 8, 9 and 10 are used instead, and transition
/// 12 out of `QuickStop` is forced rather than waited for. States with
/// automatic transitions leave the controlword untouched.
pub fn go_to_state(
    target: DeviceState,
    current: DeviceState,
    controlword: u16,
    skip_state: bool,
) -> u16 {
    let target = if target.is_commandable() {
        target
    } else {
        DeviceState::SwitchOnDisabled
    };

    if current == DeviceState::Fault {
        Command::FaultReset.apply(controlword) // transition 15
    } else if current.is_commandable() && current < target {
        match current {
            DeviceState::SwitchOnDisabled => Command::Shutdown.apply(controlword), // transition 2
            DeviceState::ReadySwitchOn => Command::SwitchOn.apply(controlword), // transition 3
            DeviceState::SwitchedOn => Command::EnableOperation.apply(controlword), // transition 4
            _ => controlword,
        }
    } else if current.is_commandable() && current > target {
        match current {
            DeviceState::OperationEnabled => {
                if skip_state && target == DeviceState::SwitchedOn {
                    Command::DisableOperation.apply(controlword) // transition 5
                } else if skip_state && target == DeviceState::ReadySwitchOn {
                    Command::Shutdown.apply(controlword) // transition 8
                } else if skip_state && target == DeviceState::SwitchOnDisabled {
                    Command::DisableVoltage.apply(controlword) // transition 9
                } else {
                    Command::QuickStop.apply(controlword) // transition 11
                }
            }
            DeviceState::SwitchedOn => {
                if skip_state && target == DeviceState::SwitchOnDisabled {
                    Command::DisableVoltage.apply(controlword) // transition 10
                } else {
                    Command::Shutdown.apply(controlword) // transition 6
                }
            }
            DeviceState::ReadySwitchOn => Command::DisableVoltage.apply(controlword), // transition 7
            _ => controlword,
        }
    } else if skip_state && current == DeviceState::QuickStop && target == DeviceState::SwitchOnDisabled
    {
        Command::DisableVoltage.apply(controlword) // forced transition 12
    } else {
        // transitions 0, 1, 12, 13, 14 happen in the device
        controlword
    }
}

#[test]
fn test_read_state() {
    // the canonical patterns
    assert_eq!(DeviceState::from_statusword(0x0000), DeviceState::NotReady);
    assert_eq!(DeviceState::from_statusword(0x0040), DeviceState::SwitchOnDisabled);
    assert_eq!(DeviceState::from_statusword(0x0021), DeviceState::ReadySwitchOn);
    assert_eq!(DeviceState::from_statusword(0x0023), DeviceState::SwitchedOn);
    assert_eq!(DeviceState::from_statusword(0x0027), DeviceState::OperationEnabled);
    assert_eq!(DeviceState::from_statusword(0x0007), DeviceState::QuickStop);
    assert_eq!(DeviceState::from_statusword(0x000f), DeviceState::FaultReactionActive);
    assert_eq!(DeviceState::from_statusword(0x0008), DeviceState::Fault);

    // the fault group wins over bit 5
    assert_eq!(DeviceState::from_statusword(0x0028), DeviceState::Fault);
    assert_eq!(DeviceState::from_statusword(0x002f), DeviceState::FaultReactionActive);

    // voltage, warning and manufacturer bits do not disturb the decode
    assert_eq!(DeviceState::from_statusword(0x0660), DeviceState::SwitchOnDisabled);
    assert_eq!(DeviceState::from_statusword(0xe237), DeviceState::OperationEnabled);
}

#[test]
fn test_read_state_depends_on_masked_bits_only() {
    for sw in 0..=0xffffu16 {
        assert_eq!(
            DeviceState::from_statusword(sw),
            DeviceState::from_statusword(sw & STATUS_WORD_MASK_A)
        );
    }
}

#[test]
fn test_command_bits() {
    assert_eq!(Command::Shutdown.apply(0x0000), 0x0006);
    assert_eq!(Command::SwitchOn.apply(0x0006), 0x0007);
    assert_eq!(Command::EnableOperation.apply(0x0007), 0x000f);
    assert_eq!(Command::DisableOperation.apply(0x000f), 0x0007);
    assert_eq!(Command::QuickStop.apply(0x000f), 0x000b);
    assert_eq!(Command::DisableVoltage.apply(0x000f), 0x000d);
    assert_eq!(Command::FaultReset.apply(0x0000), 0x0080);
    assert_eq!(Command::None.apply(0x1234), 0x1234);

    // manufacturer bits (e.g. halt) survive every transform
    assert_eq!(Command::Shutdown.apply(0x0100), 0x0106);
    assert_eq!(Command::EnableOperation.apply(0x0180), 0x010f);
}

#[test]
fn test_go_to_state_up() {
    use DeviceState::*;

    // one edge per call on the way up
    assert_eq!(go_to_state(OperationEnabled, SwitchOnDisabled, 0x0000, false), 0x0006);
    assert_eq!(go_to_state(OperationEnabled, ReadySwitchOn, 0x0006, false), 0x0007);
    assert_eq!(go_to_state(OperationEnabled, SwitchedOn, 0x0007, false), 0x000f);
    // already there
    assert_eq!(go_to_state(OperationEnabled, OperationEnabled, 0x000f, false), 0x000f);
}

#[test]
fn test_go_to_state_down() {
    use DeviceState::*;

    // leaving OperationEnabled goes through the quick stop by default
    assert_eq!(go_to_state(SwitchOnDisabled, OperationEnabled, 0x000f, false), 0x000b);
    // below that, shutdown and disable voltage walk the chain down
    assert_eq!(go_to_state(SwitchOnDisabled, SwitchedOn, 0x0007, false), 0x0006);
    assert_eq!(go_to_state(SwitchOnDisabled, ReadySwitchOn, 0x0006, false), 0x0004);
    // QuickStop normally waits for the automatic transition
    assert_eq!(go_to_state(SwitchOnDisabled, QuickStop, 0x000b, false), 0x000b);
}

#[test]
fn test_go_to_state_skip() {
    use DeviceState::*;

    // shortcut transitions 5, 8 and 9 out of OperationEnabled
    assert_eq!(go_to_state(SwitchedOn, OperationEnabled, 0x000f, true), 0x0007);
    assert_eq!(go_to_state(ReadySwitchOn, OperationEnabled, 0x000f, true), 0x000e);
    assert_eq!(go_to_state(SwitchOnDisabled, OperationEnabled, 0x000f, true), 0x000d);
    // transition 10
    assert_eq!(go_to_state(SwitchOnDisabled, SwitchedOn, 0x0007, true), 0x0005);
    // forced transition 12
    assert_eq!(go_to_state(SwitchOnDisabled, QuickStop, 0x000b, true), 0x0009);
}

#[test]
fn test_go_to_state_fault_and_coercion() {
    use DeviceState::*;

    // fault reset is the only way out of Fault
    assert_eq!(go_to_state(OperationEnabled, Fault, 0x0000, false), 0x0080);
    // non commandable targets are coerced to SwitchOnDisabled
    assert_eq!(go_to_state(Fault, OperationEnabled, 0x000f, false), 0x000b);
    assert_eq!(go_to_state(QuickStop, SwitchedOn, 0x0007, false), 0x0006);
    // automatic states are waited out
    assert_eq!(go_to_state(SwitchOnDisabled, NotReady, 0x0000, false), 0x0000);
    assert_eq!(go_to_state(SwitchOnDisabled, FaultReactionActive, 0x0000, false), 0x0000);
}
