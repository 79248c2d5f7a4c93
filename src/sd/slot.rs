//! SD slot node (C6): the per-socket driver that owns a controller
//! instance and runs card insertion/removal enumeration.
//!
//! Grounded on `drivers/sd/core/sd.c`'s slot-level `StartDevice` and
//! its card enumeration state machine, and on `kernel/src/pnp/irp.rs`
//! for the `QueryChildren` merge-into-children-list pattern.

use crate::facade::controller::{Controller, ControllerCapabilities, ControllerInit, MediaChangeCallback};
use crate::facade::workitem::queue_work_item;
use crate::io::device::Device;
use crate::io::driver::IrpContext;
use crate::io::irp::Irp;
use crate::io::params::{IrpParameters, MajorCode, MinorCode, StateChangeParams};
use crate::sd::context::{slot_flags, CARD_DEVICE_CLASS, DeviceContext, DiskState, SdFunctionDriver, SlotState};
use crate::status::Status;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a freshly inserted card is given to settle before the
/// controller is reinitialized against it.
const INSERTION_SETTLE_DELAY: Duration = Duration::from_millis(50);

pub fn create_irp(_slot: &Arc<SlotState>, _device: &Arc<Device>, _irp: &Irp) -> Result<Option<IrpContext>, Status> {
    Ok(None)
}

pub fn destroy_irp(_slot: &Arc<SlotState>, _device: &Arc<Device>, _irp: &Irp, _context: Option<IrpContext>) {}

pub fn dispatch(slot: &Arc<SlotState>, device: &Arc<Device>, irp: &Arc<Irp>) {
    match irp.major() {
        MajorCode::StateChange => dispatch_state_change(slot, device, irp),
        _ => irp.complete(Status::NotSupported),
    }
}

fn dispatch_state_change(slot: &Arc<SlotState>, _device: &Arc<Device>, irp: &Arc<Irp>) {
    match irp.minor() {
        Some(MinorCode::StartDevice) => {
            let status = start_device(slot);
            irp.complete(status);
        }
        Some(MinorCode::QueryChildren) => {
            query_children(slot, irp);
            irp.complete(Status::Success);
        }
        _ => irp.complete(Status::NotSupported),
    }
}

/// Create the controller instance for this slot's register window,
/// with a media-change callback that routes back into this module, and
/// connect the bus's interrupt handle to it.
fn start_device(slot: &Arc<SlotState>) -> Status {
    let weak_slot = Arc::downgrade(slot);
    let callback: MediaChangeCallback = Arc::new(move |removal, insertion| {
        if let Some(slot) = weak_slot.upgrade() {
            on_media_change(&slot, removal, insertion);
        }
    });

    let init = ControllerInit {
        capabilities: ControllerCapabilities::AUTO_CMD12
            | ControllerCapabilities::BUS_WIDTH_4BIT
            | ControllerCapabilities::RESPONSE_136_SHIFTED,
        media_change_callback: callback,
    };

    let controller = slot.bus.controller_factory.create(init, slot.window.base);
    if let Some(handle) = slot.bus.interrupt.lock().clone() {
        controller.set_interrupt_handle(handle);
    }
    *slot.controller.lock() = Some(controller);
    Status::Success
}

/// Dispatch-level media-change callback: OR the pending bits in and
/// get off dispatch level before re-enumerating, since enumeration
/// calls into the controller and may sleep.
fn on_media_change(slot: &Arc<SlotState>, removal: bool, insertion: bool) {
    let mut bits = 0u32;
    if removal {
        bits |= slot_flags::REMOVAL_PENDING;
    }
    if insertion {
        bits |= slot_flags::INSERTION_PENDING;
    }
    if bits == 0 {
        return;
    }
    slot.flags.fetch_or(bits, Ordering::AcqRel);

    let slot = slot.clone();
    queue_work_item(move || {
        let Some(device) = slot.self_device.lock().as_ref().and_then(|weak| weak.upgrade()) else {
            return;
        };
        reenumerate(&device);
    });
}

/// Re-issue `QueryChildren` against the slot's own device, the way a
/// real topology-change notification causes the PnP manager to do.
fn reenumerate(device: &Arc<Device>) {
    let Ok(irp) = Irp::create(device, MajorCode::StateChange) else {
        return;
    };
    irp.initialize();
    irp.set_minor(MinorCode::QueryChildren);
    irp.set_params(IrpParameters::StateChange(StateChangeParams::default()));
    Irp::send_synchronous(&irp);
    Irp::destroy(&irp);
}

/// Clear and observe the pending insertion/removal bits, detach and
/// release any existing disk if either fired, then, on insertion,
/// settle/reinitialize/enumerate a fresh one. Always writes the
/// slot's current child list (zero or one disk) into the IRP.
fn query_children(slot: &Arc<SlotState>, irp: &Irp) {
    let previous = slot.flags.fetch_and(!(slot_flags::INSERTION_PENDING | slot_flags::REMOVAL_PENDING), Ordering::AcqRel);
    let insertion = previous & slot_flags::INSERTION_PENDING != 0;
    let removal = previous & slot_flags::REMOVAL_PENDING != 0;

    if insertion || removal {
        if let Some((_, disk)) = slot.current_disk.lock().take() {
            disk.media_present.store(false, Ordering::Release);
            release_disk(&disk);
        }
    }

    if insertion {
        std::thread::sleep(INSERTION_SETTLE_DELAY);

        let controller = slot.controller.lock().clone();
        if let Some(controller) = controller {
            let status = controller.initialize(true);
            if status.is_success() {
                if let Some(child) = enumerate_disk(slot, &controller) {
                    *slot.current_disk.lock() = Some(child);
                }
            } else if status != Status::Timeout {
                log::warn!("SD slot {}: controller reinitialize failed: {status}", slot.index);
            }
            // Timeout: no card actually present despite the interrupt;
            // benign, leave current_disk empty.
        }
    }

    let children = slot
        .current_disk
        .lock()
        .as_ref()
        .map(|(device, _)| device.clone())
        .into_iter()
        .collect();
    irp.with_params(|params| {
        if let IrpParameters::StateChange(state_change) = params {
            *state_change.children.borrow_mut() = children;
        }
    });
}

/// Build a fresh disk context for a just-inserted card: read its media
/// parameters, derive the block shift, try DMA, and wrap it in an OS
/// device. Returns `None` for any `NoMedia` outcome along the way —
/// the card disappeared before enumeration finished, which is treated
/// as "no device" rather than an error.
fn enumerate_disk(slot: &Arc<SlotState>, controller: &Arc<dyn Controller>) -> Option<(Arc<Device>, Arc<DiskState>)> {
    let params = match controller.get_media_parameters() {
        Ok(params) => params,
        Err(Status::NoMedia) => return None,
        Err(status) => {
            log::warn!("SD slot {}: get_media_parameters failed: {status}", slot.index);
            return None;
        }
    };

    if !params.block_size.is_power_of_two() {
        log::error!("SD slot {}: block size {} is not a power of two", slot.index, params.block_size);
        return None;
    }
    let block_shift = params.block_size.trailing_zeros();

    let dma_status = controller.initialize_dma();
    let dma_supported = match dma_status {
        Status::Success => true,
        Status::NoMedia => return None,
        _ => false,
    };

    let disk = Arc::new(DiskState {
        slot: slot.clone(),
        refcount: AtomicU32::new(1),
        media_present: AtomicBool::new(true),
        dma_supported: AtomicBool::new(dma_supported),
        block_shift,
        block_count: params.block_count,
        active: crate::ke::SpinLock::new(None),
        interface_published: AtomicBool::new(false),
    });

    let driver = SdFunctionDriver::new(DeviceContext::Disk(disk.clone()));
    let device = Device::new(format!("{CARD_DEVICE_CLASS}\\{}", slot.index), vec![driver]);
    device.set_file_size(disk.block_count * disk.block_size() as u64);
    Some((device, disk))
}

/// Drop a disk's logical reference. The disk is only ever handed to
/// [`query_children`]'s caller while its refcount is at least 1; once
/// the last reference is released — here or from `disk::close` — the
/// last `Arc<DiskState>` drops and the context is freed.
pub fn release_disk(disk: &Arc<DiskState>) {
    let previous = disk.refcount.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(previous > 0, "disk refcount underflowed");
}
