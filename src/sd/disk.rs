//! SD disk node (C7): the block-device façade over a slot's
//! controller instance, with DMA and polled I/O paths.
//!
//! Grounded on `drivers/sd/core/sd.c`'s DMA completion chain (buffer
//! substitution, pend-then-continueIrp, copy-back on the way up) and
//! `kernel/src/pnp/irp.rs`'s Open/Close refcounting and
//! SystemControl/Lookup handling.

use crate::facade::controller::{Controller, DmaCompletion, DmaCompletionCallback};
use crate::facade::iobuffer::{BufferConstraint, IoBuffer};
use crate::io::device::Device;
use crate::io::driver::IrpContext;
use crate::io::irp::{Direction, Irp};
use crate::io::params::{
    FileProperties, FileType, IrpParameters, MajorCode, MinorCode, ReadWriteDirection,
};
use crate::sd::context::{ActiveTransfer, DiskState, TransferState};
use crate::sd::slot;
use crate::status::Status;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Highest physical address the controller's DMA engine can address;
/// a buffer outside this range is substituted with a bounce buffer.
const DMA_MAX_PHYSICAL_ADDRESS: u64 = 0xFFFF_FFFF;

/// Largest transfer moved by one `block_io_dma` call; longer requests
/// are walked in chunks by the completion callback.
const MAX_BLOCKS_PER_CHUNK: u32 = 256;

pub fn create_irp(_disk: &Arc<DiskState>, _device: &Arc<Device>, _irp: &Irp) -> Result<Option<IrpContext>, Status> {
    Ok(None)
}

pub fn destroy_irp(_disk: &Arc<DiskState>, _device: &Arc<Device>, _irp: &Irp, _context: Option<IrpContext>) {}

pub fn dispatch(disk: &Arc<DiskState>, device: &Arc<Device>, irp: &Arc<Irp>, _context: &mut Option<IrpContext>) {
    match irp.major() {
        MajorCode::Open => {
            disk.refcount.fetch_add(1, Ordering::AcqRel);
            irp.complete(Status::Success);
        }
        MajorCode::Close => {
            slot::release_disk(disk);
            irp.complete(Status::Success);
        }
        MajorCode::StateChange => dispatch_state_change(disk, device, irp),
        MajorCode::SystemControl => dispatch_system_control(disk, irp),
        MajorCode::Io => match irp.direction() {
            Direction::Down => dispatch_io_down(disk, irp),
            Direction::Up => dispatch_io_up(disk, irp),
        },
        MajorCode::UserControl => irp.complete(Status::NotSupported),
    }
}

fn dispatch_state_change(disk: &Arc<DiskState>, _device: &Arc<Device>, irp: &Arc<Irp>) {
    match irp.minor() {
        Some(MinorCode::StartDevice) => {
            publish_interface(disk);
            irp.complete(Status::Success);
        }
        Some(MinorCode::RemoveDevice) => {
            disk.interface_published.store(false, Ordering::Release);
            slot::release_disk(disk);
            irp.complete(Status::Success);
        }
        _ => irp.complete(Status::NotSupported),
    }
}

/// Publish the disk interface — token, block size, block count, and
/// the reset/read/write entry points a kernel topology layer would
/// bind to — the first time the disk starts. Idempotent on replay.
fn publish_interface(disk: &Arc<DiskState>) {
    if disk.interface_published.swap(true, Ordering::AcqRel) {
        return;
    }
    log::info!(
        "SD disk slot {}: publishing interface, block_size={} block_count={}",
        disk.slot.index,
        disk.block_size(),
        disk.block_count,
    );
}

fn dispatch_system_control(disk: &Arc<DiskState>, irp: &Arc<Irp>) {
    match irp.minor() {
        Some(MinorCode::Lookup) => {
            let properties = FileProperties {
                file_type: FileType::BlockDevice,
                hard_link_count: 1,
                file_id: disk.slot.index as u64,
                block_size: disk.block_size(),
                block_count: disk.block_count,
                file_size: disk.block_count * disk.block_size() as u64,
            };
            irp.with_params(|params| {
                if let IrpParameters::SystemControl(sc) = params {
                    *sc.result.borrow_mut() = Some(properties);
                }
            });
            irp.complete(Status::Success);
        }
        Some(MinorCode::WriteFileProperties) | Some(MinorCode::Truncate) => {
            let matches = irp.with_params(|params| {
                params
                    .as_system_control()
                    .and_then(|sc| sc.proposed)
                    .map(|proposed| proposed.block_size == disk.block_size() && proposed.block_count == disk.block_count)
                    .unwrap_or(false)
            });
            irp.complete(if matches { Status::Success } else { Status::NotSupported });
        }
        Some(MinorCode::Delete) => irp.complete(Status::NotSupported),
        Some(MinorCode::Synchronize) => irp.complete(Status::Success),
        // No description worth exposing to a caller without a real
        // topology layer behind it; see the matching open question.
        Some(MinorCode::DeviceInformation) => irp.complete(Status::NotSupported),
        _ => irp.complete(Status::NotSupported),
    }
}

/// Validate preconditions common to both I/O paths, then hand off to
/// the DMA or polled path depending on what this disk's controller
/// supports.
fn dispatch_io_down(disk: &Arc<DiskState>, irp: &Arc<Irp>) {
    let block_size = disk.block_size() as u64;

    let precheck = irp.with_params(|params| {
        let Some(rw) = params.as_read_write() else {
            return Err(Status::InvalidParameter);
        };
        if rw.buffer.is_none() {
            return Err(Status::InvalidParameter);
        }
        if !disk.media_present.load(Ordering::Acquire) {
            return Err(Status::NoMedia);
        }
        if block_size == 0 || rw.offset % block_size != 0 || rw.length % block_size != 0 {
            return Err(Status::InvalidParameter);
        }
        Ok(())
    });

    if let Err(status) = precheck {
        irp.complete(status);
        return;
    }

    if disk.dma_supported.load(Ordering::Acquire) {
        start_dma(disk, irp);
    } else {
        let status = super::polled::block_io(disk, irp, true);
        irp.complete(status);
    }
}

/// Reached only after a DMA transfer's completion chain called
/// `continue_irp`: pick up the finished transfer, copy a read's data
/// back into the caller's original buffer, flush to the point of
/// unification, and complete with the transfer's final status.
fn dispatch_io_up(disk: &Arc<DiskState>, irp: &Arc<Irp>) {
    let transfer = disk.active.lock().take();
    let Some(transfer) = transfer else {
        irp.complete(Status::NotHandled);
        return;
    };

    if transfer.result.is_success() && !transfer.write {
        if transfer.working_buffer.physical_base() != transfer.original_buffer.physical_base() {
            IoBuffer::copy(
                &transfer.original_buffer,
                0,
                &transfer.working_buffer,
                0,
                transfer.original_buffer.len(),
            );
        }
        transfer.working_buffer.flush_for_data_in(0, transfer.working_buffer.len());
    }
    transfer.working_buffer.flush_to_point_of_unification(0, transfer.working_buffer.len());

    irp.complete(transfer.result);
}

/// Steps 1-3 of the DMA algorithm: validate (and possibly substitute)
/// the buffer against the controller's physical-address/alignment
/// constraint, flush a write's data out before the device reads it,
/// then — holding the controller lock just long enough to accept the
/// transfer — recheck media presence, pend the IRP, record the
/// transfer, and kick off the first chunk.
///
/// The controller lock is released again once this returns rather
/// than held across the whole asynchronous round trip: a
/// `std::sync::MutexGuard` cannot cross the completion callback's
/// thread boundary. `DiskState::active` being occupied is what
/// actually keeps a second transfer from starting concurrently.
fn start_dma(disk: &Arc<DiskState>, irp: &Arc<Irp>) {
    let (write, original, offset, length) = irp.with_params(|params| {
        let rw = params.as_read_write().expect("checked by dispatch_io_down");
        (
            rw.direction == ReadWriteDirection::Write,
            rw.buffer.clone().expect("checked by dispatch_io_down"),
            rw.offset,
            rw.length,
        )
    });

    let constraint = BufferConstraint {
        min_physical_address: 0,
        max_physical_address: DMA_MAX_PHYSICAL_ADDRESS,
        alignment: disk.block_size() as u64,
        size: length as usize,
        allow_remap: true,
    };
    let working = match original.validate(constraint) {
        Ok(buffer) => buffer,
        Err(status) => {
            irp.complete(status);
            return;
        }
    };
    working.map();

    if write {
        if working.physical_base() != original.physical_base() {
            IoBuffer::copy(&working, 0, &original, 0, length as usize);
        }
        working.flush_for_data_out(0, length as usize);
    }

    let controller = disk.slot.controller.lock().clone();
    let Some(controller) = controller else {
        irp.complete(Status::DeviceNotConnected);
        return;
    };

    {
        let _accept = disk.slot.controller_lock.lock();
        if !disk.media_present.load(Ordering::Acquire) {
            irp.complete(Status::NoMedia);
            return;
        }
        if disk.active.lock().is_some() {
            irp.complete(Status::InsufficientResources);
            return;
        }
        irp.pend();
        *disk.active.lock() = Some(ActiveTransfer {
            irp: irp.clone(),
            original_buffer: original,
            working_buffer: working.clone(),
            write,
            state: TransferState::InFlight,
            result: Status::NotHandled,
        });
    }

    let _ = offset;
    submit_next_chunk(disk.clone(), controller, working, irp.clone());
}

/// Submit one chunk of the remaining transfer, sized to the smaller
/// of what's left and `MAX_BLOCKS_PER_CHUNK`, reading progress
/// straight out of the IRP's own read/write parameters.
fn submit_next_chunk(disk: Arc<DiskState>, controller: Arc<dyn Controller>, buffer: IoBuffer, irp: Arc<Irp>) {
    let block_size = disk.block_size() as u64;
    let (device_block_offset, buffer_offset, block_count, write) = irp.with_params(|params| {
        let rw = params.as_read_write().expect("read/write params outlive the transfer");
        let remaining_bytes = rw.length - rw.bytes_completed;
        let device_offset_bytes = rw.offset + rw.bytes_completed;
        let blocks_remaining = (remaining_bytes / block_size) as u32;
        (
            device_offset_bytes / block_size,
            rw.bytes_completed as usize,
            blocks_remaining.min(MAX_BLOCKS_PER_CHUNK),
            rw.direction == ReadWriteDirection::Write,
        )
    });

    let chunk_bytes = block_count as u64 * block_size;

    let cb_disk = disk.clone();
    let cb_controller = controller.clone();
    let cb_buffer = buffer.clone();
    let cb_irp = irp.clone();

    let callback: DmaCompletionCallback = Box::new(move |completion: DmaCompletion| {
        on_chunk_complete(cb_disk, cb_controller, cb_buffer, cb_irp, completion, chunk_bytes);
    });

    controller.block_io_dma(device_block_offset, block_count, buffer, buffer_offset, write, callback);
}

fn on_chunk_complete(
    disk: Arc<DiskState>,
    controller: Arc<dyn Controller>,
    buffer: IoBuffer,
    irp: Arc<Irp>,
    completion: DmaCompletion,
    attempted_bytes: u64,
) {
    if !completion.status.is_success() {
        if let Some(transfer) = disk.active.lock().as_mut() {
            transfer.state = TransferState::Failed;
            transfer.result = completion.status;
        }
        irp.continue_irp();
        return;
    }

    let transferred = u64::from(completion.bytes_transferred).min(attempted_bytes);
    let (done, total) = irp.with_params_mut(|params| {
        let IrpParameters::ReadWrite(rw) = params else {
            return (0, 0);
        };
        rw.bytes_completed += transferred;
        rw.new_offset = rw.offset + rw.bytes_completed;
        (rw.bytes_completed, rw.length)
    });

    if done >= total {
        if let Some(transfer) = disk.active.lock().as_mut() {
            transfer.state = TransferState::Done;
            transfer.result = Status::Success;
        }
        irp.continue_irp();
    } else {
        submit_next_chunk(disk, controller, buffer, irp);
    }
}
