//! Kernel executive primitives: locking and wait objects.
//!
//! Analogous to the original kernel's `ke` module, trimmed to the
//! synchronization types the I/O stack actually needs. The scheduler,
//! DPC queue, and dispatcher-object machinery backing the original
//! `KEvent`/`SpinLock` are not reproduced; see `DESIGN.md`.

mod sync;

pub use sync::{QueuedLock, SharedExclusiveLock, SpinLock, WaitEvent};
