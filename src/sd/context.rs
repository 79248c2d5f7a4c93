//! Tag-discriminated SD device contexts.
//!
//! The bus, slot, and disk nodes are all served by the same function
//! driver; the original distinguishes them with a leading tag field
//! on an otherwise-cast context pointer. Here that collapses into one
//! `DeviceContext` sum type and one `SdFunctionDriver::dispatch` that
//! matches on it, per the tagged-variant design note: no cast, no
//! untyped context pointer, and the compiler — not a runtime tag
//! check — guarantees `BusState`/`SlotState`/`DiskState` are never
//! confused for one another.

use crate::facade::controller::{Controller, ControllerInit};
use crate::io::device::Device;
use crate::io::driver::{Driver, IrpContext};
use crate::io::irp::Irp;
use crate::ke::{QueuedLock, SpinLock};
use std::sync::atomic::{AtomicBool, AtomicU32};
use std::sync::{Arc, Weak};

/// Upper bound on slots a bus node can enumerate, matching the
/// number of memory BARs the platform exposes to the function driver.
pub const MAX_SLOTS: usize = 6;

pub const SLOT_DEVICE_CLASS: &str = "SD\\Slot";
pub const CARD_DEVICE_CLASS: &str = "SD\\Card";
pub const DISK_CLASS_ID: &str = "disk";

pub mod slot_flags {
    pub const INSERTION_PENDING: u32 = 0b01;
    pub const REMOVAL_PENDING: u32 = 0b10;
}

/// Constructs a `Controller` instance for a slot's register window.
/// Stands in for the SD core library's `Create(init)` operation.
pub trait ControllerFactory: Send + Sync {
    fn create(&self, init: ControllerInit, register_base: u64) -> Arc<dyn Controller>;
}

#[derive(Default, Clone, Copy)]
pub struct SlotWindow {
    pub base: u64,
    pub length: u64,
}

/// SD bus context (tag = Bus). One per PCI/SOC function device; owns
/// the connected interrupt and the captured per-slot register
/// windows discovered during `StartDevice`.
pub struct BusState {
    pub controller_factory: Arc<dyn ControllerFactory>,
    pub slot_windows: SpinLock<Vec<SlotWindow>>,
    pub slot_devices: SpinLock<Vec<Option<Arc<Device>>>>,
    pub slot_states: SpinLock<Vec<Option<Arc<SlotState>>>>,
    pub interrupt: SpinLock<Option<crate::facade::controller::InterruptHandle>>,
    pub interrupt_resources_found: AtomicBool,
}

impl BusState {
    pub fn new(controller_factory: Arc<dyn ControllerFactory>) -> Arc<BusState> {
        Arc::new(BusState {
            controller_factory,
            slot_windows: SpinLock::new(Vec::new()),
            slot_devices: SpinLock::new(Vec::new()),
            slot_states: SpinLock::new(Vec::new()),
            interrupt: SpinLock::new(None),
            interrupt_resources_found: AtomicBool::new(false),
        })
    }
}

/// SD slot context (tag = Slot). One per physical socket; owns the
/// controller instance and the lock that serializes all I/O against
/// it.
pub struct SlotState {
    pub bus: Arc<BusState>,
    pub index: usize,
    pub window: SlotWindow,
    pub controller_lock: QueuedLock<()>,
    pub controller: SpinLock<Option<Arc<dyn Controller>>>,
    pub flags: AtomicU32,
    pub current_disk: SpinLock<Option<(Arc<Device>, Arc<DiskState>)>>,
    /// Set once the slot's own `Device` wrapper exists, so the
    /// media-change work item can re-issue `QueryChildren` against it.
    pub self_device: SpinLock<Option<Weak<Device>>>,
}

impl SlotState {
    pub fn new(bus: Arc<BusState>, index: usize, window: SlotWindow) -> Arc<SlotState> {
        Arc::new(SlotState {
            bus,
            index,
            window,
            controller_lock: QueuedLock::new(()),
            controller: SpinLock::new(None),
            flags: AtomicU32::new(0),
            current_disk: SpinLock::new(None),
            self_device: SpinLock::new(None),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    InFlight,
    Done,
    Failed,
}

/// The DMA traversal's working state: the IRP being pumped, the
/// buffer actually handed to the controller (which may differ from
/// the caller's original buffer), and an explicit state machine for
/// the pend/kick/resume/repeat cycle.
pub struct ActiveTransfer {
    pub irp: Arc<Irp>,
    pub original_buffer: crate::facade::iobuffer::IoBuffer,
    pub working_buffer: crate::facade::iobuffer::IoBuffer,
    pub write: bool,
    pub state: TransferState,
    /// Set by the DMA completion chain once `state` reaches `Done` or
    /// `Failed`; read back by the IRP's upward-pass dispatch to decide
    /// the final status it completes with.
    pub result: crate::status::Status,
}

/// SD disk context (tag = Disk). Publishes the block-device facade;
/// shared between the owning slot and the OS device node via
/// `refcount`.
pub struct DiskState {
    pub slot: Arc<SlotState>,
    pub refcount: AtomicU32,
    pub media_present: AtomicBool,
    pub dma_supported: AtomicBool,
    pub block_shift: u32,
    pub block_count: u64,
    pub active: SpinLock<Option<ActiveTransfer>>,
    pub interface_published: AtomicBool,
}

impl DiskState {
    pub fn block_size(&self) -> u32 {
        1u32 << self.block_shift
    }
}

/// Which kind of node this driver instance is attached as.
pub enum DeviceContext {
    Bus(Arc<BusState>),
    Slot(Arc<SlotState>),
    Disk(Arc<DiskState>),
}

/// The single function driver shared by all three SD device node
/// kinds; `dispatch` matches on `context` to route to the right
/// node-specific handler.
pub struct SdFunctionDriver {
    pub context: DeviceContext,
}

impl SdFunctionDriver {
    pub fn new(context: DeviceContext) -> Arc<SdFunctionDriver> {
        Arc::new(SdFunctionDriver { context })
    }
}

impl Driver for SdFunctionDriver {
    fn create_irp(&self, device: &Arc<Device>, irp: &Irp) -> Result<Option<IrpContext>, crate::status::Status> {
        match &self.context {
            DeviceContext::Bus(bus) => super::bus::create_irp(bus, device, irp),
            DeviceContext::Slot(slot) => super::slot::create_irp(slot, device, irp),
            DeviceContext::Disk(disk) => super::disk::create_irp(disk, device, irp),
        }
    }

    fn destroy_irp(&self, device: &Arc<Device>, irp: &Irp, context: Option<IrpContext>) {
        match &self.context {
            DeviceContext::Bus(bus) => super::bus::destroy_irp(bus, device, irp, context),
            DeviceContext::Slot(slot) => super::slot::destroy_irp(slot, device, irp, context),
            DeviceContext::Disk(disk) => super::disk::destroy_irp(disk, device, irp, context),
        }
    }

    fn dispatch(&self, device: &Arc<Device>, irp: &Arc<Irp>, context: &mut Option<IrpContext>) {
        match &self.context {
            DeviceContext::Bus(bus) => super::bus::dispatch(bus, device, irp),
            DeviceContext::Slot(slot) => super::slot::dispatch(slot, device, irp),
            DeviceContext::Disk(disk) => super::disk::dispatch(disk, device, irp, context),
        }
    }
}
