//! The I/O dispatch core: IRPs, driver stacks, devices, and the
//! synchronous helpers built on top of them.

pub mod device;
pub mod driver;
pub mod helpers;
pub mod irp;
pub mod params;

pub use device::{Device, DeviceState, VolumeState};
pub use driver::{Driver, IrpContext};
pub use irp::{Direction, Irp, IrpFlags};
pub use params::{
    AddedRequirement, AllocatedResources, FileProperties, FileType, IrpParameters, MajorCode,
    MinorCode, ReadWriteDirection, ReadWriteParams, Resource, ResourceRequirement,
    ResourceRequirementsList, StateChangeParams, SystemControlParams, UserControlParams,
};
