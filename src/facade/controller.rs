//! Controller façade (C1).
//!
//! The SD/MMC host-controller hardware library lives outside this
//! crate's scope; this module is the seam the core calls through.
//! Named and shaped directly after §6 of the driver's external
//! interface: `Create`/`Destroy`/`Initialize`/`GetMediaParameters`/
//! `InitializeDma`/`BlockIoPolled`/`BlockIoDma`/`AbortTransaction`/
//! `SetCriticalMode`/`InterruptService`/`SetInterruptHandle`.

use crate::facade::iobuffer::IoBuffer;
use crate::status::Status;
use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControllerCapabilities: u32 {
        /// The controller issues CMD12 automatically at the end of a
        /// multi-block transfer.
        const AUTO_CMD12 = 0b001;
        /// Operate the data bus in 4-bit mode rather than 1-bit.
        const BUS_WIDTH_4BIT = 0b010;
        /// The controller's 136-bit response register is pre-shifted
        /// by 8 bits (CRC already stripped).
        const RESPONSE_136_SHIFTED = 0b100;
    }
}

/// Callback a slot registers with its controller instance; invoked at
/// dispatch level with the `(removal, insertion)` booleans the
/// controller observed.
pub type MediaChangeCallback = Arc<dyn Fn(bool, bool) + Send + Sync>;

pub struct ControllerInit {
    pub capabilities: ControllerCapabilities,
    pub media_change_callback: MediaChangeCallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaParameters {
    pub block_count: u64,
    pub block_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaCompletion {
    pub status: Status,
    pub bytes_transferred: u32,
}

/// Invoked at dispatch level when a DMA transfer this driver started
/// finishes.
pub type DmaCompletionCallback = Box<dyn FnOnce(DmaCompletion) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptResult {
    Claimed,
    NotClaimed,
}

/// A connected interrupt handle, shared by the bus across its slots.
#[derive(Clone)]
pub struct InterruptHandle(pub Arc<()>);

/// One SD/MMC host-controller instance.
///
/// All methods except `interrupt_service` run at or below dispatch
/// level; `interrupt_service` runs above dispatch, in interrupt
/// context, and must not block.
pub trait Controller: Send + Sync {
    fn initialize(&self, reset_hardware: bool) -> Status;

    fn get_media_parameters(&self) -> Result<MediaParameters, Status>;

    /// `NoMedia` is an expected, non-fatal outcome of this call.
    fn initialize_dma(&self) -> Status;

    fn block_io_polled(&self, block_offset: u64, block_count: u32, buffer: &mut [u8], write: bool) -> Status;

    /// Starts an asynchronous transfer; `completion` is invoked from
    /// dispatch level, possibly on another thread, when it finishes.
    /// `buffer` is cheaply cloned (shared storage) so the controller
    /// can retain it past this call's return.
    fn block_io_dma(
        &self,
        block_offset: u64,
        block_count: u32,
        buffer: IoBuffer,
        buffer_offset: usize,
        write: bool,
        completion: DmaCompletionCallback,
    );

    fn abort_transaction(&self, synchronous: bool) -> Status;

    fn set_critical_mode(&self, enabled: bool);

    fn interrupt_service(&self) -> InterruptResult;

    fn set_interrupt_handle(&self, handle: InterruptHandle);
}
