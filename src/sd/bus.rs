//! SD bus node (C5): the function driver for the PCI/SOC device that
//! owns the interrupt and holds N controller slots.
//!
//! Grounded on `drivers/sd/core/sd.c`'s bus-level `StartDevice`
//! resource walk and the PnP `QueryResources`/`QueryChildren`
//! handling visible in `kernel/src/pnp/irp.rs`.

use crate::facade::controller::InterruptResult;
use crate::io::device::Device;
use crate::io::driver::IrpContext;
use crate::io::irp::Irp;
use crate::io::params::{AddedRequirement, MajorCode, MinorCode, Resource, ResourceRequirement};
use crate::sd::context::{BusState, DeviceContext, SdFunctionDriver, SlotState, SlotWindow, MAX_SLOTS, SLOT_DEVICE_CLASS};
use crate::status::Status;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub fn create_irp(_bus: &Arc<BusState>, _device: &Arc<Device>, _irp: &Irp) -> Result<Option<IrpContext>, Status> {
    Ok(None)
}

pub fn destroy_irp(_bus: &Arc<BusState>, _device: &Arc<Device>, _irp: &Irp, _context: Option<IrpContext>) {}

pub fn dispatch(bus: &Arc<BusState>, device: &Arc<Device>, irp: &Arc<Irp>) {
    match irp.major() {
        MajorCode::StateChange => dispatch_state_change(bus, device, irp),
        _ => irp.complete(Status::NotSupported),
    }
}

fn dispatch_state_change(bus: &Arc<BusState>, device: &Arc<Device>, irp: &Arc<Irp>) {
    match irp.minor() {
        Some(MinorCode::QueryResources) => {
            query_resources(irp);
            irp.complete(Status::Success);
        }
        Some(MinorCode::StartDevice) => {
            let status = start_device(bus, irp);
            irp.complete(status);
        }
        Some(MinorCode::QueryChildren) => {
            query_children(bus, device, irp);
            irp.complete(Status::Success);
        }
        _ => irp.complete(Status::NotSupported),
    }
}

/// For each interrupt-line requirement, add a matching
/// interrupt-vector requirement spanning the whole vector space.
fn query_resources(irp: &Irp) {
    irp.with_params(|params| {
        let Some(state_change) = params.as_state_change() else {
            return;
        };
        let Some(requirements) = &state_change.requirements else {
            return;
        };
        let interrupt_lines = requirements
            .requirements
            .iter()
            .filter(|r| matches!(r, ResourceRequirement::InterruptLine))
            .count();
        let mut added = requirements.added.borrow_mut();
        for _ in 0..interrupt_lines {
            added.push(AddedRequirement::InterruptVector {
                min: 0,
                max: u64::MAX,
                length: 1,
            });
        }
    });
}

/// Walk the allocated resources: physical-address ranges become slot
/// register windows, and the (interrupt line, interrupt vector) pair
/// is connected as the bus's interrupt handle.
fn start_device(bus: &Arc<BusState>, irp: &Irp) -> Status {
    let resources = irp.with_params(|params| {
        params
            .as_state_change()
            .and_then(|sc| sc.resources.as_ref())
            .map(|r| r.resources.clone())
    });
    let Some(resources) = resources else {
        return Status::InvalidConfiguration;
    };

    let mut windows = Vec::new();
    let mut line = None;
    let mut vector = None;
    for resource in &resources {
        match *resource {
            Resource::PhysicalAddress { base, length } if length > 0 => {
                if windows.len() < MAX_SLOTS {
                    windows.push(SlotWindow { base, length });
                }
            }
            Resource::InterruptLine { line: l } => line = Some(l),
            Resource::InterruptVector { vector: v } => vector = Some(v),
            _ => {}
        }
    }

    match (line, vector) {
        (Some(_), Some(_)) => {
            *bus.slot_windows.lock() = windows;
            *bus.interrupt.lock() = Some(crate::facade::controller::InterruptHandle(Arc::new(())));
            bus.interrupt_resources_found.store(true, Ordering::Release);
            Status::Success
        }
        _ => {
            log::error!("SD bus: expected exactly one interrupt line/vector pair, found none");
            Status::InsufficientResources
        }
    }
}

/// Lazily create a slot device per captured register window on the
/// first call, and return the full set of present slot devices on
/// every call.
fn query_children(bus: &Arc<BusState>, _device: &Arc<Device>, irp: &Irp) {
    let windows = bus.slot_windows.lock().clone();

    let mut slot_devices = bus.slot_devices.lock();
    let mut slot_states = bus.slot_states.lock();
    if slot_devices.is_empty() {
        slot_devices.resize(windows.len(), None);
        slot_states.resize(windows.len(), None);
    }

    for (index, window) in windows.iter().enumerate() {
        if slot_devices[index].is_none() {
            let slot_state = SlotState::new(bus.clone(), index, *window);
            let driver = SdFunctionDriver::new(DeviceContext::Slot(slot_state.clone()));
            let slot_device = Device::new(format!("{SLOT_DEVICE_CLASS}\\{index}"), vec![driver]);
            *slot_state.self_device.lock() = Some(Arc::downgrade(&slot_device));
            slot_devices[index] = Some(slot_device);
            slot_states[index] = Some(slot_state);
        }
    }

    let children: Vec<_> = slot_devices.iter().cloned().flatten().collect();
    drop(slot_devices);
    drop(slot_states);

    irp.with_params(|params| {
        if let Some(state_change) = params.as_state_change() {
            *state_change.children.borrow_mut() = children;
        }
    });
}

/// Fan the interrupt out to every slot's controller; claimed iff any
/// slot's controller claims it. Runs above dispatch level.
pub fn interrupt_service(bus: &Arc<BusState>) -> InterruptResult {
    let slot_states = bus.slot_states.lock().clone();
    let mut claimed = false;
    for slot in slot_states.into_iter().flatten() {
        if let Some(controller) = slot.controller.lock().as_ref() {
            if controller.interrupt_service() == InterruptResult::Claimed {
                claimed = true;
            }
        }
    }
    if claimed {
        InterruptResult::Claimed
    } else {
        InterruptResult::NotClaimed
    }
}
