//! I/O buffer façade (C2).
//!
//! A scatter/gather buffer over memory the memory manager owns in the
//! real kernel; here it owns its storage directly (`Arc<Mutex<Vec<u8>>>`)
//! so it can be cloned cheaply and handed across the DMA completion
//! callback boundary without lifetime gymnastics, while still
//! presenting the same validate/map/copy/flush/fragment-iteration
//! surface described in §6.

use crate::status::Status;
use std::sync::{Arc, Mutex, MutexGuard};

/// One contiguous scatter/gather run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub offset: usize,
    pub physical_address: u64,
    pub size: usize,
}

/// Constraints `validate` must satisfy, either by confirming the
/// existing buffer already meets them or by substituting one that
/// does.
#[derive(Debug, Clone, Copy)]
pub struct BufferConstraint {
    pub min_physical_address: u64,
    pub max_physical_address: u64,
    pub alignment: u64,
    pub size: usize,
    pub allow_remap: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushKind {
    ForDataIn,
    ForDataOut,
    ToPointOfUnification,
}

struct Inner {
    storage: Mutex<Vec<u8>>,
    physical_base: u64,
    fragments: Vec<Fragment>,
}

/// A mapped scatter/gather I/O buffer.
#[derive(Clone)]
pub struct IoBuffer {
    inner: Arc<Inner>,
    current_offset: usize,
}

impl IoBuffer {
    /// A single contiguous fragment of `size` bytes at physical
    /// address 0.
    pub fn new(size: usize) -> Self {
        Self::with_physical_base(size, 0)
    }

    pub fn with_physical_base(size: usize, physical_base: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage: Mutex::new(vec![0u8; size]),
                physical_base,
                fragments: vec![Fragment {
                    offset: 0,
                    physical_address: physical_base,
                    size,
                }],
            }),
            current_offset: 0,
        }
    }

    /// A buffer split into several non-uniform fragments, each
    /// contiguous in physical memory with the next (for polled-path
    /// fragment-walking tests).
    pub fn with_fragment_sizes(sizes: &[usize], physical_base: u64) -> Self {
        let mut fragments = Vec::with_capacity(sizes.len());
        let mut offset = 0usize;
        let mut physical = physical_base;
        for &size in sizes {
            fragments.push(Fragment {
                offset,
                physical_address: physical,
                size,
            });
            offset += size;
            physical += size as u64;
        }
        Self {
            inner: Arc::new(Inner {
                storage: Mutex::new(vec![0u8; offset]),
                physical_base,
                fragments,
            }),
            current_offset: 0,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>, physical_base: u64) -> Self {
        let size = bytes.len();
        Self {
            inner: Arc::new(Inner {
                storage: Mutex::new(bytes),
                physical_base,
                fragments: vec![Fragment {
                    offset: 0,
                    physical_address: physical_base,
                    size,
                }],
            }),
            current_offset: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.storage.lock().expect("io buffer poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn physical_base(&self) -> u64 {
        self.inner.physical_base
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.inner.fragments
    }

    pub fn current_offset(&self) -> usize {
        self.current_offset
    }

    pub fn set_current_offset(&mut self, offset: usize) {
        self.current_offset = offset;
    }

    /// Map the buffer for CPU/device access. A no-op on this
    /// in-process backing store; kept for API parity with the real
    /// facade, which performs a VA mapping here.
    pub fn map(&self) {}

    fn storage(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner.storage.lock().expect("io buffer poisoned")
    }

    pub fn read_at(&self, offset: usize, len: usize) -> Vec<u8> {
        self.storage()[offset..offset + len].to_vec()
    }

    pub fn write_at(&self, offset: usize, data: &[u8]) {
        self.storage()[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Validate the buffer against `constraint`, returning either
    /// `self` (cloned — cheap, shared storage) if it already
    /// satisfies the constraint, a freshly allocated substitute if
    /// `allow_remap` is set, or `InsufficientResources`.
    pub fn validate(&self, constraint: BufferConstraint) -> Result<IoBuffer, Status> {
        let satisfies = self.inner.physical_base >= constraint.min_physical_address
            && self
                .inner
                .physical_base
                .saturating_add(self.len() as u64)
                <= constraint.max_physical_address
            && self.inner.physical_base % constraint.alignment == 0
            && self.len() >= constraint.size;

        if satisfies {
            return Ok(self.clone());
        }

        if constraint.allow_remap {
            Ok(IoBuffer::with_physical_base(constraint.size, constraint.min_physical_address))
        } else {
            Err(Status::InsufficientResources)
        }
    }

    pub fn copy(dst: &IoBuffer, dst_offset: usize, src: &IoBuffer, src_offset: usize, size: usize) {
        let data = src.read_at(src_offset, size);
        dst.write_at(dst_offset, &data);
    }

    pub fn flush_for_data_in(&self, offset: usize, size: usize) {
        log::trace!("flush ForDataIn offset={offset} size={size}");
    }

    pub fn flush_for_data_out(&self, offset: usize, size: usize) {
        log::trace!("flush ForDataOut offset={offset} size={size}");
    }

    pub fn flush_to_point_of_unification(&self, offset: usize, size: usize) {
        log::trace!("flush ToPointOfUnification offset={offset} size={size}");
    }

    pub fn flush(&self, kind: FlushKind, offset: usize, size: usize) {
        match kind {
            FlushKind::ForDataIn => self.flush_for_data_in(offset, size),
            FlushKind::ForDataOut => self.flush_for_data_out(offset, size),
            FlushKind::ToPointOfUnification => self.flush_to_point_of_unification(offset, size),
        }
    }
}
