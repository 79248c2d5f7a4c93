//! Per-major-code IRP parameters.
//!
//! Mirrors the shape of the original `IO_STACK_LOCATION::Parameters`
//! union: one struct per major code holding every field any minor
//! code under that major might need, rather than a nested enum per
//! minor. Which fields are meaningful is determined by the IRP's
//! minor code; unrelated fields are left at their default.

use crate::facade::iobuffer::IoBuffer;
use crate::io::device::Device;
use std::cell::RefCell;
use std::sync::Arc;

/// The operation an IRP represents, independent of its minor code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MajorCode {
    StateChange,
    Open,
    Close,
    Io,
    SystemControl,
    UserControl,
}

impl MajorCode {
    pub const ALL: [MajorCode; 6] = [
        MajorCode::StateChange,
        MajorCode::Open,
        MajorCode::Close,
        MajorCode::Io,
        MajorCode::SystemControl,
        MajorCode::UserControl,
    ];
}

/// Minor code, scoped to a particular major code. `sendSynchronous`
/// requires one to be set before the IRP is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MinorCode {
    Open,
    Close,
    QueryResources,
    StartDevice,
    QueryChildren,
    RemoveDevice,
    Read,
    Write,
    Lookup,
    WriteFileProperties,
    Delete,
    Truncate,
    Synchronize,
    DeviceInformation,
    UserControl(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadWriteDirection {
    Read,
    Write,
}

pub struct ReadWriteParams {
    pub direction: ReadWriteDirection,
    pub buffer: Option<IoBuffer>,
    pub offset: u64,
    pub length: u64,
    pub bytes_completed: u64,
    pub new_offset: u64,
}

impl ReadWriteParams {
    pub fn new(direction: ReadWriteDirection, buffer: Option<IoBuffer>, offset: u64, length: u64) -> Self {
        Self {
            direction,
            buffer,
            offset,
            length,
            bytes_completed: 0,
            new_offset: offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceRequirement {
    InterruptLine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddedRequirement {
    InterruptVector { min: u64, max: u64, length: u32 },
}

#[derive(Default)]
pub struct ResourceRequirementsList {
    pub requirements: Vec<ResourceRequirement>,
    pub added: RefCell<Vec<AddedRequirement>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    PhysicalAddress { base: u64, length: u64 },
    InterruptLine { line: u32 },
    InterruptVector { vector: u32 },
}

#[derive(Default)]
pub struct AllocatedResources {
    pub resources: Vec<Resource>,
}

#[derive(Default)]
pub struct StateChangeParams {
    pub requirements: Option<ResourceRequirementsList>,
    pub resources: Option<AllocatedResources>,
    pub children: RefCell<Vec<Arc<Device>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    BlockDevice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileProperties {
    pub file_type: FileType,
    pub hard_link_count: u32,
    pub file_id: u64,
    pub block_size: u32,
    pub block_count: u64,
    pub file_size: u64,
}

#[derive(Default)]
pub struct SystemControlParams {
    /// For `WriteFileProperties`: the values the caller is proposing.
    pub proposed: Option<FileProperties>,
    /// For `Lookup`: the properties the driver synthesized.
    pub result: RefCell<Option<FileProperties>>,
}

pub struct UserControlParams {
    pub code: u32,
    pub input: Vec<u8>,
    pub output: RefCell<Vec<u8>>,
}

/// The per-major discriminated union of parameters carried by an IRP.
pub enum IrpParameters {
    None,
    Open,
    Close,
    ReadWrite(ReadWriteParams),
    StateChange(StateChangeParams),
    SystemControl(SystemControlParams),
    UserControl(UserControlParams),
}

impl IrpParameters {
    pub fn as_read_write(&self) -> Option<&ReadWriteParams> {
        match self {
            IrpParameters::ReadWrite(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_read_write_mut(&mut self) -> Option<&mut ReadWriteParams> {
        match self {
            IrpParameters::ReadWrite(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_state_change(&self) -> Option<&StateChangeParams> {
        match self {
            IrpParameters::StateChange(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_system_control(&self) -> Option<&SystemControlParams> {
        match self {
            IrpParameters::SystemControl(p) => Some(p),
            _ => None,
        }
    }
}
