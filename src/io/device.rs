//! Device objects and driver stacks.
//!
//! A `Device` bundles the ordered stack of drivers that IRPs against
//! it will traverse, a lifecycle state, and the shared/exclusive lock
//! that synchronous helpers and state transitions serialize against.
//! `TargetDevice` chaining — a device pointing at the next device down
//! in a layered stack — is represented by `target_device`; the IRP
//! engine walks it when computing stack size. None of the three SD
//! device nodes (bus, slot, disk) use it, since each is served by
//! exactly one driver with nothing layered beneath it in this crate's
//! scope, but the IRP engine supports it generically, matching
//! `IoCreateIrp`'s walk in the original.

use crate::io::driver::Driver;
use crate::ke::SharedExclusiveLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Lifecycle state of a device. `Removed` is terminal: once set, no
/// new IRP may be submitted against the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Started,
    Removed,
}

/// Extra state carried only by volume-class devices: the
/// `Unmounting` sub-state that narrows which system-control minor
/// codes the synchronous helpers will still let through.
#[derive(Default)]
pub struct VolumeState {
    unmounting: AtomicBool,
}

impl VolumeState {
    pub fn is_unmounting(&self) -> bool {
        self.unmounting.load(Ordering::Acquire)
    }

    pub fn set_unmounting(&self, value: bool) {
        self.unmounting.store(value, Ordering::Release);
    }
}

pub struct Device {
    name: String,
    driver_stack: Vec<Arc<dyn Driver>>,
    target_device: Option<Arc<Device>>,
    state: SharedExclusiveLock<DeviceState>,
    volume: Option<VolumeState>,
    file_size: AtomicU64,
}

impl Device {
    pub fn new(name: impl Into<String>, driver_stack: Vec<Arc<dyn Driver>>) -> Arc<Device> {
        Self::with_target(name, driver_stack, None)
    }

    pub fn with_target(
        name: impl Into<String>,
        driver_stack: Vec<Arc<dyn Driver>>,
        target_device: Option<Arc<Device>>,
    ) -> Arc<Device> {
        Arc::new(Device {
            name: name.into(),
            driver_stack,
            target_device,
            state: SharedExclusiveLock::new(DeviceState::Started),
            volume: None,
            file_size: AtomicU64::new(0),
        })
    }

    /// A device representing a mounted volume, which carries the
    /// `Unmounting` sub-state the synchronous helpers gate on.
    pub fn new_volume(name: impl Into<String>, driver_stack: Vec<Arc<dyn Driver>>) -> Arc<Device> {
        Arc::new(Device {
            name: name.into(),
            driver_stack,
            target_device: None,
            state: SharedExclusiveLock::new(DeviceState::Started),
            volume: Some(VolumeState::default()),
            file_size: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver_stack(&self) -> &[Arc<dyn Driver>] {
        &self.driver_stack
    }

    pub fn target_device(&self) -> Option<&Arc<Device>> {
        self.target_device.as_ref()
    }

    pub fn state(&self) -> DeviceState {
        *self.state.read()
    }

    /// Hold the device's shared lock, as the synchronous helpers do
    /// for the duration of IRP submission.
    pub fn lock_shared(&self) -> std::sync::RwLockReadGuard<'_, DeviceState> {
        self.state.read()
    }

    pub fn set_state(&self, state: DeviceState) {
        *self.state.write() = state;
    }

    /// Take the device's shared lock for the duration of a closure, as
    /// the synchronous helpers do while submitting an IRP.
    pub fn with_shared_lock<R>(&self, f: impl FnOnce(DeviceState) -> R) -> R {
        let guard = self.state.read();
        f(*guard)
    }

    pub fn volume_state(&self) -> Option<&VolumeState> {
        self.volume.as_ref()
    }

    pub fn file_size(&self) -> u64 {
        self.file_size.load(Ordering::Acquire)
    }

    pub fn set_file_size(&self, size: u64) {
        self.file_size.store(size, Ordering::Release);
    }
}
