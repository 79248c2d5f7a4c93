//! The IRP engine.
//!
//! Routes an I/O Request Packet down a device's driver stack and back
//! up again, with explicit support for a driver to retain ownership
//! of an in-flight IRP across dispatch returns (`pend`/`continueIrp`)
//! and for synchronous callers to block until the whole traversal
//! settles (`send_synchronous`). Grounded directly on
//! `kernel/io/irp.c`'s `IoCreateIrp`/`IoDestroyIrp`/
//! `IoSendSynchronousIrp`/`IopPumpIrpThroughStack`/`IopCallDriver`/
//! `IopAdvanceIrpStackLocation`/`IoPendIrp`/`IoContinueIrp`, and on
//! the field layout of `kernel/src/io/irp.rs`'s `Irp`
//! (`IRP_MAX_STACK_SIZE`, the flag word, current stack location).
//!
//! Two structural simplifications relative to both sources, made
//! possible by Rust's ownership model rather than bolted on:
//!
//! - No magic/shadow-field comparison to detect a corrupted device or
//!   major code. `device` and `major` have no setter once the IRP is
//!   built, so there is nothing for a caller to corrupt them into; the
//!   magic word is kept only as a guard against an `Irp` that was
//!   never passed through [`Irp::create`].
//! - No explicit "is this the calling driver's slot" pointer check in
//!   `complete`/`pend`/`continueIrp`. The engine only ever hands a
//!   driver a live `&Irp` while that driver owns the current stack
//!   slot, so ownership is enforced by the call graph instead of by
//!   comparing identities at the call site.

use crate::fatal::{self, BugCheck, InvalidIrpReason};
use crate::io::device::Device;
use crate::io::driver::IrpContext;
use crate::io::params::{IrpParameters, MajorCode, MinorCode};
use crate::ke::WaitEvent;
use crate::status::Status;
use bitflags::bitflags;
use std::sync::{Arc, Mutex};

const IRP_MAGIC: u32 = 0x5052_4921;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrpFlags: u32 {
        const ACTIVE               = 0b0001;
        const COMPLETE              = 0b0010;
        const PENDING                = 0b0100;
        const DRIVER_STACK_COMPLETE = 0b1000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Down,
    Up,
}

struct StackEntry {
    driver: Arc<dyn crate::io::driver::Driver>,
    device: Arc<Device>,
    context: Mutex<Option<IrpContext>>,
}

type CompletionRoutine = Box<dyn FnOnce(&Irp) + Send>;

struct IrpState {
    minor: Option<MinorCode>,
    direction: Direction,
    status: Status,
    flags: IrpFlags,
    stack_index: usize,
    params: IrpParameters,
    completion: Option<CompletionRoutine>,
}

/// An in-flight I/O Request Packet.
///
/// `device` and `major` are fixed at creation; everything else lives
/// behind `state`, which the engine serializes so that at most one
/// stack slot's worth of mutation is visible at a time.
pub struct Irp {
    magic: u32,
    device: Arc<Device>,
    major: MajorCode,
    stack: Vec<StackEntry>,
    state: Mutex<IrpState>,
    wait: WaitEvent,
}

impl Irp {
    /// Create an IRP bound to `device` and `major`. Fails with
    /// `InvalidConfiguration` if `device` has no driver stack.
    ///
    /// Walks `device`, then `device.target_device()`, and so on,
    /// summing each device's driver-stack length to size the IRP's
    /// stack, then gives each driver a chance to allocate a per-IRP
    /// context via `create_irp`, in stack order. If any driver's
    /// `create_irp` fails, every driver that already succeeded has
    /// `destroy_irp` called on it, in reverse order, before the
    /// failure is returned.
    pub fn create(device: &Arc<Device>, major: MajorCode) -> Result<Arc<Irp>, Status> {
        if device.driver_stack().is_empty() {
            return Err(Status::InvalidConfiguration);
        }

        let mut stack = Vec::new();
        let mut cursor = Some(device.clone());
        while let Some(current) = cursor {
            for driver in current.driver_stack() {
                stack.push(StackEntry {
                    driver: driver.clone(),
                    device: current.clone(),
                    context: Mutex::new(None),
                });
            }
            cursor = current.target_device().cloned();
        }

        let irp = Arc::new(Irp {
            magic: IRP_MAGIC,
            device: device.clone(),
            major,
            stack,
            state: Mutex::new(IrpState {
                minor: None,
                direction: Direction::Down,
                status: Status::NotHandled,
                flags: IrpFlags::empty(),
                stack_index: 0,
                params: IrpParameters::None,
                completion: None,
            }),
            wait: WaitEvent::new(),
        });

        for index in 0..irp.stack.len() {
            let entry = &irp.stack[index];
            match entry.driver.create_irp(&entry.device, &irp) {
                Ok(context) => *entry.context.lock().unwrap() = context,
                Err(status) => {
                    for prior in (0..index).rev() {
                        let prior_entry = &irp.stack[prior];
                        let context = prior_entry.context.lock().unwrap().take();
                        prior_entry.driver.destroy_irp(&prior_entry.device, &irp, context);
                    }
                    return Err(status);
                }
            }
        }

        Ok(irp)
    }

    /// Tear an IRP down: call every driver's `destroy_irp`, in stack
    /// order, then let it drop. Requires `Active` to be clear.
    pub fn destroy(irp: &Arc<Irp>) {
        if irp.magic != IRP_MAGIC {
            fatal::crash(
                BugCheck::InvalidIrp(InvalidIrpReason::ImproperlyAllocated),
                "Irp::destroy called on a value that did not come from Irp::create",
            );
        }

        let active = irp.state.lock().unwrap().flags.contains(IrpFlags::ACTIVE);
        if active {
            fatal::crash(
                BugCheck::InvalidIrp(InvalidIrpReason::DestroyedWhileActive),
                "Irp::destroy called while the IRP is still Active",
            );
        }

        for entry in &irp.stack {
            let context = entry.context.lock().unwrap().take();
            entry.driver.destroy_irp(&entry.device, irp, context);
        }
    }

    /// Reset direction to `Down`, status to `NotHandled`, stack index
    /// to 0, clear `{Complete, Pending, DriverStackComplete}`, and
    /// drop any completion callback. Does not touch the stack's
    /// allocated per-driver contexts, and does not set a minor code
    /// or parameters — callers do that separately before sending.
    pub fn initialize(&self) {
        let mut state = self.state.lock().unwrap();
        state.direction = Direction::Down;
        state.status = Status::NotHandled;
        state.stack_index = 0;
        state
            .flags
            .remove(IrpFlags::COMPLETE | IrpFlags::PENDING | IrpFlags::DRIVER_STACK_COMPLETE);
        state.completion = None;
        state.minor = None;
        state.params = IrpParameters::None;
    }

    pub fn set_minor(&self, minor: MinorCode) {
        self.state.lock().unwrap().minor = Some(minor);
    }

    pub fn set_params(&self, params: IrpParameters) {
        self.state.lock().unwrap().params = params;
    }

    pub fn set_completion(&self, routine: impl FnOnce(&Irp) + Send + 'static) {
        self.state.lock().unwrap().completion = Some(Box::new(routine));
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn major(&self) -> MajorCode {
        self.major
    }

    pub fn minor(&self) -> Option<MinorCode> {
        self.state.lock().unwrap().minor
    }

    pub fn status(&self) -> Status {
        self.state.lock().unwrap().status
    }

    pub fn direction(&self) -> Direction {
        self.state.lock().unwrap().direction
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    pub fn stack_index(&self) -> usize {
        self.state.lock().unwrap().stack_index
    }

    pub fn flags(&self) -> IrpFlags {
        self.state.lock().unwrap().flags
    }

    pub fn with_params<R>(&self, f: impl FnOnce(&IrpParameters) -> R) -> R {
        f(&self.state.lock().unwrap().params)
    }

    pub fn with_params_mut<R>(&self, f: impl FnOnce(&mut IrpParameters) -> R) -> R {
        f(&mut self.state.lock().unwrap().params)
    }

    /// Mark the IRP complete. Only meaningful while a driver owns the
    /// current stack slot during dispatch, or asynchronously after
    /// that driver called `pend` — the engine only ever shares a live
    /// `&Irp` with the driver that currently has this right.
    pub fn complete(&self, status: Status) {
        let was_pending = {
            let mut state = self.state.lock().unwrap();
            assert!(
                state.flags.contains(IrpFlags::ACTIVE),
                "complete called on an IRP that is not Active"
            );
            assert!(
                !state.flags.contains(IrpFlags::COMPLETE),
                "complete called twice in the same traversal"
            );
            state.flags.insert(IrpFlags::COMPLETE);
            state.direction = Direction::Up;
            state.status = status;
            state.flags.contains(IrpFlags::PENDING)
        };
        if was_pending {
            self.wait.signal();
        }
    }

    /// Retain ownership of the IRP past the current dispatch return.
    pub fn pend(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(
            state.flags.contains(IrpFlags::ACTIVE),
            "pend called on an IRP that is not Active"
        );
        state.flags.insert(IrpFlags::PENDING);
    }

    /// Resume a pended IRP: advance its stack location as if dispatch
    /// had just returned cleanly, then wake the sender. May be called
    /// from any thread.
    pub fn continue_irp(self: &Arc<Self>) {
        {
            let state = self.state.lock().unwrap();
            assert!(
                state.flags.contains(IrpFlags::ACTIVE),
                "continueIrp called on an IRP that is not Active"
            );
            assert!(
                state.flags.contains(IrpFlags::PENDING),
                "continueIrp called on an IRP that was not pended"
            );
        }
        Self::advance(self);
        self.wait.signal();
    }

    /// Send the IRP synchronously: set `Active`, drive the stack via
    /// `pump_once` until `DriverStackComplete`, blocking on the IRP's
    /// wait object whenever a driver pends it, then clear `Active` and
    /// return the final status.
    pub fn send_synchronous(irp: &Arc<Irp>) -> Status {
        {
            let mut state = irp.state.lock().unwrap();
            assert!(
                !state
                    .flags
                    .intersects(IrpFlags::COMPLETE | IrpFlags::PENDING | IrpFlags::DRIVER_STACK_COMPLETE),
                "IRP already sent this cycle"
            );
            assert!(state.minor.is_some(), "IRP has no minor code set");
            assert_eq!(state.direction, Direction::Down, "IRP direction must be Down to send");
            assert!(state.completion.is_none(), "sendSynchronous requires no completion callback");
            state.flags.insert(IrpFlags::ACTIVE);
        }

        irp.wait.reset();
        while !irp.state.lock().unwrap().flags.contains(IrpFlags::DRIVER_STACK_COMPLETE) {
            Self::pump_once(irp);

            let pending = irp.state.lock().unwrap().flags.contains(IrpFlags::PENDING);
            if pending {
                irp.wait.wait();
                irp.wait.reset();
                irp.state.lock().unwrap().flags.remove(IrpFlags::PENDING);
            }
        }

        let mut state = irp.state.lock().unwrap();
        state.flags.remove(IrpFlags::ACTIVE);
        state.status
    }

    /// Drive the stack as far as it will go without blocking: call
    /// the driver at the current slot; if it pended the IRP, return;
    /// otherwise advance and repeat. Fires the completion callback,
    /// if any, exactly when `DriverStackComplete` is first observed.
    fn pump_once(irp: &Arc<Irp>) {
        loop {
            if irp.state.lock().unwrap().flags.contains(IrpFlags::DRIVER_STACK_COMPLETE) {
                return;
            }

            let index = irp.state.lock().unwrap().stack_index;
            let entry = &irp.stack[index];
            let mut context = entry.context.lock().unwrap().take();
            entry.driver.dispatch(&entry.device, irp, &mut context);
            *entry.context.lock().unwrap() = context;

            if irp.state.lock().unwrap().flags.contains(IrpFlags::PENDING) {
                return;
            }

            Self::advance(irp);

            if irp.state.lock().unwrap().flags.contains(IrpFlags::DRIVER_STACK_COMPLETE) {
                let routine = irp.state.lock().unwrap().completion.take();
                if let Some(routine) = routine {
                    routine(irp);
                }
                return;
            }
        }
    }

    /// The traversal geometry: down until the bottom, then the same
    /// slot again going up, then up to the top, where the stack is
    /// declared complete. `complete` drives this exact transition
    /// early by forcing `direction = Up` without moving the index, so
    /// the completing slot is revisited once more on the way up —
    /// the same "deepest driver sees it twice" shape as reaching the
    /// real bottom of the stack.
    fn advance(irp: &Irp) {
        let mut state = irp.state.lock().unwrap();
        match state.direction {
            Direction::Down => {
                if state.stack_index + 1 < irp.stack.len() {
                    state.stack_index += 1;
                } else {
                    state.direction = Direction::Up;
                }
            }
            Direction::Up => {
                if state.stack_index == 0 {
                    state.flags.insert(IrpFlags::DRIVER_STACK_COMPLETE);
                } else {
                    state.stack_index -= 1;
                }
            }
        }
    }
}
