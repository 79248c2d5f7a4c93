//! The SD/MMC bus driver: bus node (C5), slot node (C6), and disk
//! node (C7), all served by the single [`context::SdFunctionDriver`].

pub mod bus;
pub mod context;
pub mod disk;
pub mod polled;
pub mod slot;

pub use context::{
    ActiveTransfer, BusState, ControllerFactory, DeviceContext, DiskState, SdFunctionDriver, SlotState, SlotWindow,
    TransferState, CARD_DEVICE_CLASS, DISK_CLASS_ID, MAX_SLOTS, SLOT_DEVICE_CLASS,
};
