//! `sdcore`: the I/O request packet engine and SD/MMC block-storage
//! bus driver underneath it.
//!
//! Three layers, bottom to top:
//!
//! - [`ke`] — the locking primitives the rest of the crate is built
//!   from.
//! - [`io`] — device objects, driver stacks, and the IRP engine that
//!   routes a request down a stack and back up: [`io::irp::Irp`],
//!   [`io::device::Device`], the [`io::driver::Driver`] trait, and the
//!   one-shot synchronous helpers in [`io::helpers`].
//! - [`sd`] — the SD/MMC bus driver built on top: the bus node (C5),
//!   slot node (C6), and disk node (C7), plus the [`facade`] seam they
//!   call through to the controller hardware library, the I/O buffer
//!   manager, and the deferred-work queue.
//!
//! # Scheduling levels
//!
//! | Level | May block | Typical callers |
//! |---|---|---|
//! | Low | Yes | Synchronous helpers, slot enumeration, work items |
//! | Dispatch | No (may pend/resume async) | `Driver::dispatch`, DMA completion callbacks |
//! | High | No (no locking at all) | `interrupt_service`, [`sd::polled::reset`] |
//!
//! A driver's `dispatch` must never call anything that blocks; if it
//! needs to, it pends the IRP and resumes it later from low level
//! (see [`sd::disk`]'s DMA path). Nothing in this crate enforces that
//! split at runtime — it's an API-shape contract, the same one the
//! original kernel documents rather than checks.
//!
//! # Errors
//!
//! Recoverable outcomes are [`status::Status`]. Programming-invariant
//! violations — a corrupted IRP, completing one twice — are not
//! statuses; they go through [`fatal::crash`] instead. See that
//! module's doc comment for why the two channels stay separate.

pub mod facade;
pub mod fatal;
pub mod io;
pub mod ke;
pub mod sd;
pub mod status;

pub use status::Status;
