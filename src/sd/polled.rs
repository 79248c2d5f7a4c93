//! Shared polled block I/O (§4.6).
//!
//! Used directly by the disk's I/O dispatch when DMA isn't available,
//! and by [`reset`], which the kernel calls from crash-dump or
//! frozen-thread context above dispatch level — no blocking locks, no
//! allocation it isn't already willing to fail past.

use crate::facade::iobuffer::{BufferConstraint, IoBuffer};
use crate::io::irp::Irp;
use crate::io::params::{IrpParameters, ReadWriteDirection};
use crate::sd::context::DiskState;
use crate::status::Status;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Run `irp`'s read/write to completion over the polled path, one
/// fragment at a time. `lock_required` is false only when called from
/// [`reset`].
pub fn block_io(disk: &Arc<DiskState>, irp: &Arc<Irp>, lock_required: bool) -> Status {
    let Some((write, Some(original), offset, length)) = irp.with_params(|params| {
        params.as_read_write().map(|rw| {
            (
                rw.direction == ReadWriteDirection::Write,
                rw.buffer.clone(),
                rw.offset,
                rw.length,
            )
        })
    }) else {
        return Status::InvalidParameter;
    };

    let block_size = disk.block_size() as u64;
    if block_size == 0 {
        return Status::InvalidConfiguration;
    }

    let constraint = BufferConstraint {
        min_physical_address: 0,
        max_physical_address: u64::MAX,
        alignment: block_size,
        size: length as usize,
        allow_remap: true,
    };
    let working = match original.validate(constraint) {
        Ok(buffer) => buffer,
        Err(status) => return status,
    };
    working.map();

    if write && working.physical_base() != original.physical_base() {
        IoBuffer::copy(&working, 0, &original, 0, length as usize);
    }

    let _guard = if lock_required {
        Some(disk.slot.controller_lock.lock())
    } else {
        None
    };

    if !disk.media_present.load(Ordering::Acquire) {
        return Status::NoMedia;
    }

    let Some(controller) = disk.slot.controller.lock().clone() else {
        return Status::DeviceNotConnected;
    };

    let shift = disk.block_shift;
    let mut blocks_done: u64 = 0;
    let mut remaining_blocks = length / block_size;
    let mut buffer_cursor: usize = 0;
    let mut final_status = Status::Success;

    for fragment in working.fragments() {
        if remaining_blocks == 0 {
            break;
        }
        let fragment_blocks = (fragment.size as u64) >> shift;
        if fragment_blocks == 0 {
            continue;
        }
        let block_count = remaining_blocks.min(fragment_blocks) as u32;
        let chunk_len = block_count as usize * block_size as usize;

        let mut scratch = working.read_at(buffer_cursor, chunk_len);
        let block_offset = offset / block_size + blocks_done;
        let status = controller.block_io_polled(block_offset, block_count, &mut scratch, write);

        if !status.is_success() {
            let _ = controller.abort_transaction(true);
            final_status = status;
            break;
        }

        if !write {
            working.write_at(buffer_cursor, &scratch);
        }

        blocks_done += block_count as u64;
        remaining_blocks -= block_count as u64;
        buffer_cursor += chunk_len;
    }

    irp.with_params_mut(|params| {
        if let IrpParameters::ReadWrite(rw) = params {
            rw.bytes_completed = blocks_done * block_size;
            rw.new_offset = rw.offset + rw.bytes_completed;
        }
    });

    if final_status.is_success() && !write && working.physical_base() != original.physical_base() {
        IoBuffer::copy(&original, 0, &working, 0, (blocks_done * block_size) as usize);
    }

    final_status
}

/// The polled reset entry point: abort any in-flight transaction and
/// force the controller into critical (non-interrupt-driven) mode.
/// Runs at high level — no locks, no blocking, callable from a frozen
/// or crash-dump thread.
pub fn reset(disk: &Arc<DiskState>) -> Status {
    let Some(controller) = disk.slot.controller.try_lock().and_then(|guard| guard.clone()) else {
        return Status::DeviceNotConnected;
    };
    controller.set_critical_mode(true);
    controller.abort_transaction(false)
}
