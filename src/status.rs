//! Status codes returned by I/O operations.
//!
//! Mirrors the NTSTATUS-style taxonomy used throughout the I/O stack:
//! a small closed set of recoverable outcomes, distinct from the
//! fatal conditions raised through [`crate::fatal`].

use core::fmt;

/// Outcome of an I/O operation.
///
/// `Success` is the only status that indicates the operation actually
/// did what was asked; every other variant is a reason it did not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Status {
    Success,
    NoMedia,
    NotSupported,
    PathNotFound,
    DeviceNotConnected,
    InsufficientResources,
    InvalidParameter,
    InvalidConfiguration,
    NotHandled,
    Timeout,
}

impl Status {
    /// `true` for [`Status::Success`], `false` for everything else.
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Success => "success",
            Status::NoMedia => "no media present",
            Status::NotSupported => "operation not supported",
            Status::PathNotFound => "path not found",
            Status::DeviceNotConnected => "device not connected",
            Status::InsufficientResources => "insufficient resources",
            Status::InvalidParameter => "invalid parameter",
            Status::InvalidConfiguration => "invalid configuration",
            Status::NotHandled => "not handled",
            Status::Timeout => "timed out",
        };
        f.write_str(s)
    }
}

impl std::error::Error for Status {}
