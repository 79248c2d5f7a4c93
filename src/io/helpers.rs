//! Synchronous one-shot IRP helpers.
//!
//! Builds and sends a single IRP for the common operations, taking
//! the target device's shared lock for the duration of submission —
//! the same "helpers hold the device lock, state transitions take it
//! exclusive" split the original uses around `IopSendXxxIrp`.

use crate::facade::iobuffer::IoBuffer;
use crate::io::device::{Device, DeviceState};
use crate::io::irp::Irp;
use crate::io::params::{
    IrpParameters, MajorCode, MinorCode, ReadWriteDirection, ReadWriteParams, SystemControlParams,
    UserControlParams,
};
use crate::status::Status;
use std::sync::Arc;

fn unmounting_allows(minor: MinorCode) -> bool {
    matches!(minor, MinorCode::WriteFileProperties | MinorCode::Delete)
}

/// Build, send, and tear down a one-shot IRP, returning its final
/// status and whatever parameters it carried back.
fn submit(
    device: &Arc<Device>,
    major: MajorCode,
    minor: MinorCode,
    params: IrpParameters,
) -> Result<(Status, IrpParameters), Status> {
    let guard = device.lock_shared();

    if *guard == DeviceState::Removed {
        return Err(Status::DeviceNotConnected);
    }

    if let Some(volume) = device.volume_state() {
        if volume.is_unmounting() && !(major == MajorCode::SystemControl && unmounting_allows(minor)) {
            return Err(Status::DeviceNotConnected);
        }
    }

    let irp = Irp::create(device, major)?;
    irp.initialize();
    irp.set_minor(minor);
    irp.set_params(params);
    let status = Irp::send_synchronous(&irp);
    let returned = irp.with_params_mut(|p| std::mem::replace(p, IrpParameters::None));
    Irp::destroy(&irp);

    drop(guard);
    Ok((status, returned))
}

pub fn open(device: &Arc<Device>) -> Status {
    match submit(device, MajorCode::Open, MinorCode::Open, IrpParameters::Open) {
        Ok((status, _)) => status,
        Err(status) => status,
    }
}

pub fn close(device: &Arc<Device>) -> Status {
    match submit(device, MajorCode::Close, MinorCode::Close, IrpParameters::Close) {
        Ok((status, _)) => status,
        Err(status) => status,
    }
}

/// Outcome of a read or write helper call.
pub struct TransferResult {
    pub status: Status,
    pub bytes_completed: u64,
    pub new_offset: u64,
}

/// Clamp a read's reported progress against the device's file-size
/// property, per the minimum-of-both rule: a read that ran past
/// end-of-file is reported as having stopped at end-of-file.
fn clamp_read(device: &Arc<Device>, offset: u64, rw: &mut ReadWriteParams) {
    let remaining = device.file_size().saturating_sub(offset);
    if rw.bytes_completed > remaining {
        rw.bytes_completed = remaining;
    }
    rw.new_offset = offset + rw.bytes_completed;
}

pub fn read(device: &Arc<Device>, buffer: IoBuffer, offset: u64, length: u64) -> TransferResult {
    let params = IrpParameters::ReadWrite(ReadWriteParams::new(
        ReadWriteDirection::Read,
        Some(buffer),
        offset,
        length,
    ));
    match submit(device, MajorCode::Io, MinorCode::Read, params) {
        Ok((status, IrpParameters::ReadWrite(mut rw))) => {
            clamp_read(device, offset, &mut rw);
            TransferResult {
                status,
                bytes_completed: rw.bytes_completed,
                new_offset: rw.new_offset,
            }
        }
        Ok(_) => unreachable!("read helper always submits ReadWrite parameters"),
        Err(status) => TransferResult {
            status,
            bytes_completed: 0,
            new_offset: offset,
        },
    }
}

pub fn write(device: &Arc<Device>, buffer: IoBuffer, offset: u64, length: u64) -> TransferResult {
    let params = IrpParameters::ReadWrite(ReadWriteParams::new(
        ReadWriteDirection::Write,
        Some(buffer),
        offset,
        length,
    ));
    match submit(device, MajorCode::Io, MinorCode::Write, params) {
        Ok((status, IrpParameters::ReadWrite(rw))) => TransferResult {
            status,
            bytes_completed: rw.bytes_completed,
            new_offset: rw.new_offset,
        },
        Ok(_) => unreachable!("write helper always submits ReadWrite parameters"),
        Err(status) => TransferResult {
            status,
            bytes_completed: 0,
            new_offset: offset,
        },
    }
}

pub fn system_control(
    device: &Arc<Device>,
    minor: MinorCode,
    params: SystemControlParams,
) -> (Status, SystemControlParams) {
    match submit(device, MajorCode::SystemControl, minor, IrpParameters::SystemControl(params)) {
        Ok((status, IrpParameters::SystemControl(result))) => (status, result),
        Ok(_) => unreachable!("system_control helper always submits SystemControl parameters"),
        Err(status) => (status, SystemControlParams::default()),
    }
}

pub fn user_control(device: &Arc<Device>, code: u32, input: Vec<u8>) -> (Status, Vec<u8>) {
    let params = IrpParameters::UserControl(UserControlParams {
        code,
        input,
        output: Default::default(),
    });
    match submit(device, MajorCode::UserControl, MinorCode::UserControl(code), params) {
        Ok((status, IrpParameters::UserControl(result))) => (status, result.output.into_inner()),
        Ok(_) => unreachable!("user_control helper always submits UserControl parameters"),
        Err(status) => (status, Vec::new()),
    }
}
