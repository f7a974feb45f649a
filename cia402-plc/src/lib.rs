mod plc;
mod shared;

pub mod master;
pub mod operation;
pub mod sim;

pub use self::master::{CyclicMaster, PdoIn, PdoInput, PdoOut, PdoOutput};
pub use self::operation::Axis;
pub use self::plc::{Plc, PlcBuilder};
pub use self::shared::{DriveStatus, Supervisor};
pub use self::sim::SimMaster;
