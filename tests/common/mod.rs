//! Shared test doubles for the controller façade: a backing-store
//! `MockController` plus a factory that hands pre-configured
//! instances out to the bus/slot enumeration code under test.

use sdcore::facade::controller::{
    Controller, ControllerInit, DmaCompletion, DmaCompletionCallback, InterruptHandle, InterruptResult,
    MediaChangeCallback, MediaParameters,
};
use sdcore::facade::iobuffer::IoBuffer;
use sdcore::sd::ControllerFactory;
use sdcore::status::Status;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// An in-memory stand-in for SD/MMC host-controller hardware: reads
/// and writes go against a `Vec<u8>` rather than real silicon.
pub struct MockController {
    pub storage: Mutex<Vec<u8>>,
    pub block_size: u32,
    pub media: Mutex<Option<MediaParameters>>,
    pub dma_status: Mutex<Status>,
    pub polled_status: Mutex<Status>,
    pub calls: Mutex<Vec<&'static str>>,
    pub media_change_callback: Mutex<Option<MediaChangeCallback>>,
    pub dma_delay: Duration,
}

impl MockController {
    pub fn new(block_size: u32, block_count: u64) -> Arc<MockController> {
        let storage_len = block_size as u64 * block_count;
        Arc::new(MockController {
            storage: Mutex::new(vec![0u8; storage_len as usize]),
            block_size,
            media: Mutex::new(Some(MediaParameters { block_count, block_size })),
            dma_status: Mutex::new(Status::Success),
            polled_status: Mutex::new(Status::Success),
            calls: Mutex::new(Vec::new()),
            media_change_callback: Mutex::new(None),
            dma_delay: Duration::from_millis(5),
        })
    }

    pub fn no_media() -> Arc<MockController> {
        Arc::new(MockController {
            storage: Mutex::new(Vec::new()),
            block_size: 512,
            media: Mutex::new(None),
            dma_status: Mutex::new(Status::Success),
            polled_status: Mutex::new(Status::Success),
            calls: Mutex::new(Vec::new()),
            media_change_callback: Mutex::new(None),
            dma_delay: Duration::from_millis(5),
        })
    }

    pub fn fire_media_change(&self, removal: bool, insertion: bool) {
        if let Some(callback) = self.media_change_callback.lock().unwrap().as_ref() {
            callback(removal, insertion);
        }
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Controller for MockController {
    fn initialize(&self, _reset_hardware: bool) -> Status {
        self.record("initialize");
        Status::Success
    }

    fn get_media_parameters(&self) -> Result<MediaParameters, Status> {
        self.record("get_media_parameters");
        self.media.lock().unwrap().ok_or(Status::NoMedia)
    }

    fn initialize_dma(&self) -> Status {
        self.record("initialize_dma");
        *self.dma_status.lock().unwrap()
    }

    fn block_io_polled(&self, block_offset: u64, block_count: u32, buffer: &mut [u8], write: bool) -> Status {
        self.record("block_io_polled");
        let status = *self.polled_status.lock().unwrap();
        if !status.is_success() {
            return status;
        }
        let byte_offset = block_offset as usize * self.block_size as usize;
        let len = block_count as usize * self.block_size as usize;
        let mut storage = self.storage.lock().unwrap();
        if write {
            storage[byte_offset..byte_offset + len].copy_from_slice(&buffer[..len]);
        } else {
            buffer[..len].copy_from_slice(&storage[byte_offset..byte_offset + len]);
        }
        Status::Success
    }

    fn block_io_dma(
        &self,
        block_offset: u64,
        block_count: u32,
        buffer: IoBuffer,
        buffer_offset: usize,
        write: bool,
        completion: DmaCompletionCallback,
    ) {
        self.record("block_io_dma");
        let status = *self.dma_status.lock().unwrap();
        let byte_offset = block_offset as usize * self.block_size as usize;
        let len = block_count as usize * self.block_size as usize;
        let delay = self.dma_delay;

        if status.is_success() {
            let mut storage = self.storage.lock().unwrap();
            if write {
                let data = buffer.read_at(buffer_offset, len);
                storage[byte_offset..byte_offset + len].copy_from_slice(&data);
            } else {
                let data = storage[byte_offset..byte_offset + len].to_vec();
                buffer.write_at(buffer_offset, &data);
            }
        }

        std::thread::spawn(move || {
            std::thread::sleep(delay);
            completion(DmaCompletion {
                status,
                bytes_transferred: if status.is_success() { len as u32 } else { 0 },
            });
        });
    }

    fn abort_transaction(&self, _synchronous: bool) -> Status {
        self.record("abort_transaction");
        Status::Success
    }

    fn set_critical_mode(&self, _enabled: bool) {
        self.record("set_critical_mode");
    }

    fn interrupt_service(&self) -> InterruptResult {
        self.record("interrupt_service");
        InterruptResult::NotClaimed
    }

    fn set_interrupt_handle(&self, _handle: InterruptHandle) {
        self.record("set_interrupt_handle");
    }
}

/// Hands out pre-built `MockController`s in the order `start_device`
/// requests them, one per captured slot window, and captures each
/// slot's media-change callback onto the controller it was given.
pub struct MockControllerFactory {
    pub controllers: Mutex<Vec<Arc<MockController>>>,
    pub next: Mutex<usize>,
}

impl MockControllerFactory {
    pub fn new(controllers: Vec<Arc<MockController>>) -> Arc<MockControllerFactory> {
        Arc::new(MockControllerFactory {
            controllers: Mutex::new(controllers),
            next: Mutex::new(0),
        })
    }
}

impl ControllerFactory for MockControllerFactory {
    fn create(&self, init: ControllerInit, _register_base: u64) -> Arc<dyn Controller> {
        let mut next = self.next.lock().unwrap();
        let controller = self.controllers.lock().unwrap()[*next].clone();
        *next += 1;
        *controller.media_change_callback.lock().unwrap() = Some(init.media_change_callback);
        controller
    }
}
