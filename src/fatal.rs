//! Fatal invariant violations.
//!
//! A handful of conditions in the I/O stack are not recoverable
//! failures but programming errors: a corrupted IRP, an unknown
//! major code, completing an IRP that is not owned by the caller.
//! The original kernel handles these with `KeBugCheckEx`, which halts
//! the system with a stop code. There is no "system" to halt in this
//! crate, so the equivalent here is a structured panic: the invariant
//! and its offending values are logged before unwinding, so the two
//! error channels (statuses vs. bugchecks) stay visibly disjoint.

use core::fmt;

/// Stop codes, mirrored from the bugcheck taxonomy the IRP engine
/// and SD driver raise against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BugCheck {
    /// An IRP's device or major code no longer matches what it was
    /// created with, or was destroyed without the `Active` flag clear.
    InvalidIrp(InvalidIrpReason),
    /// `IoCallDriver`-equivalent dispatch hit a major code with no
    /// dispatch routine and no default handler.
    IrpCorruption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidIrpReason {
    /// The magic word does not match: the IRP was never properly
    /// allocated through `Irp::create`.
    ImproperlyAllocated,
    /// The device/major-code shadow does not match the live fields.
    ConstantStateModified,
    /// `destroy` was called while the IRP was still `Active`.
    DestroyedWhileActive,
}

impl fmt::Display for BugCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BugCheck::InvalidIrp(reason) => write!(f, "INVALID_IRP: {reason:?}"),
            BugCheck::IrpCorruption => write!(f, "IRP_CORRUPTION"),
        }
    }
}

/// Raise a bug check: log it at `error` level and panic.
///
/// This is the single place the crate turns a programming-invariant
/// violation into an unwind; callers never construct their own panic
/// message for these conditions.
#[cold]
#[track_caller]
pub fn crash(code: BugCheck, detail: &str) -> ! {
    log::error!("kernel-fatal {code}: {detail}");
    panic!("kernel-fatal {code}: {detail}");
}
