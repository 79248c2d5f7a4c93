//! Driver dispatch.
//!
//! A driver is anything that can sit in a device's stack: it gets a
//! chance to allocate a per-IRP context when the IRP is created, a
//! chance to dispatch the IRP when its stack slot is active, and a
//! chance to tear the context down symmetrically when the IRP is
//! destroyed. Compare `DriverObject`/`DriverDispatch`/`io_call_driver`
//! in the original, which keep the same three-hook shape but as raw
//! function pointers indexed by major-function number; here the
//! dispatch table collapses to a single trait method because Rust
//! gives us a real vtable.

use crate::io::device::Device;
use crate::io::irp::Irp;
use crate::status::Status;
use std::any::Any;
use std::sync::Arc;

/// Opaque per-driver, per-IRP state allocated in `create_irp` and
/// handed back in `dispatch`/`destroy_irp`.
pub type IrpContext = Box<dyn Any + Send + Sync>;

/// One entry in a device's driver stack.
///
/// Implementors must not block past "dispatch" scheduling level in
/// `dispatch`, `create_irp`, or `destroy_irp` (see the scheduling
/// table in the crate's top-level documentation).
pub trait Driver: Send + Sync {
    /// Called once per IRP, in stack order, when the IRP is created
    /// against a device whose stack includes this driver. Returning
    /// `Err` unwinds: every driver that already ran `create_irp` for
    /// this IRP has `destroy_irp` called on it, in reverse order.
    fn create_irp(&self, _device: &Arc<Device>, _irp: &Irp) -> Result<Option<IrpContext>, Status> {
        Ok(None)
    }

    /// Called once per IRP at destroy time, for every driver that
    /// successfully ran `create_irp`, in the same order `create_irp`
    /// ran (forward, not reversed — symmetry is about pairing, not
    /// ordering).
    fn destroy_irp(&self, _device: &Arc<Device>, _irp: &Irp, _context: Option<IrpContext>) {}

    /// Handle the IRP while this driver owns its current stack slot.
    /// The driver must eventually call exactly one of
    /// [`Irp::complete`], [`Irp::pend`], or let dispatch return so the
    /// engine advances the stack location on its own.
    fn dispatch(&self, device: &Arc<Device>, irp: &Arc<Irp>, context: &mut Option<IrpContext>);
}
