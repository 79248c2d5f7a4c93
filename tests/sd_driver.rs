//! Scenario tests for the SD bus/slot/disk driver stack, built on the
//! `MockController` test double in `tests/common`.

mod common;

use common::{MockController, MockControllerFactory};
use sdcore::facade::iobuffer::IoBuffer;
use sdcore::io::{
    AllocatedResources, Device, Irp, IrpParameters, MajorCode, MinorCode, Resource, ResourceRequirementsList,
    StateChangeParams,
};
use sdcore::sd::{BusState, DeviceContext, SdFunctionDriver};
use sdcore::status::Status;
use std::sync::Arc;
use std::time::Duration;

fn send_state_change(device: &Arc<Device>, minor: MinorCode, params: StateChangeParams) -> (Status, StateChangeParams) {
    let irp = Irp::create(device, MajorCode::StateChange).expect("create");
    irp.initialize();
    irp.set_minor(minor);
    irp.set_params(IrpParameters::StateChange(params));
    let status = Irp::send_synchronous(&irp);
    let result = irp.with_params_mut(|p| std::mem::replace(p, IrpParameters::None));
    Irp::destroy(&irp);
    let state_change = match result {
        IrpParameters::StateChange(sc) => sc,
        _ => StateChangeParams::default(),
    };
    (status, state_change)
}

/// Build a bus device backed by `factory`, start it with one slot
/// window per controller the factory was given, and return the bus
/// device alongside its enumerated slot devices.
fn make_started_bus(factory: Arc<MockControllerFactory>, slot_count: usize) -> (Arc<Device>, Vec<Arc<Device>>) {
    let bus_state = BusState::new(factory);
    let driver = SdFunctionDriver::new(DeviceContext::Bus(bus_state));
    let bus_device = Device::new("test\\sd-bus", vec![driver]);

    let mut resources = vec![Resource::InterruptLine { line: 0 }, Resource::InterruptVector { vector: 0 }];
    for i in 0..slot_count {
        resources.push(Resource::PhysicalAddress { base: 0x1000 * i as u64, length: 0x100 });
    }
    let start_params = StateChangeParams {
        requirements: Some(ResourceRequirementsList::default()),
        resources: Some(AllocatedResources { resources }),
        children: Default::default(),
    };
    let (status, _) = send_state_change(&bus_device, MinorCode::StartDevice, start_params);
    assert_eq!(status, Status::Success, "bus StartDevice failed");

    let (status, result) = send_state_change(&bus_device, MinorCode::QueryChildren, StateChangeParams::default());
    assert_eq!(status, Status::Success);
    let slots = result.children.into_inner();
    assert_eq!(slots.len(), slot_count);

    for slot_device in &slots {
        let (status, _) = send_state_change(slot_device, MinorCode::StartDevice, StateChangeParams::default());
        assert_eq!(status, Status::Success, "slot StartDevice failed");
    }

    (bus_device, slots)
}

fn query_slot_children(slot_device: &Arc<Device>) -> Vec<Arc<Device>> {
    let (status, result) = send_state_change(slot_device, MinorCode::QueryChildren, StateChangeParams::default());
    assert_eq!(status, Status::Success);
    result.children.into_inner()
}

/// S4 (happy path): a slot that observes an insertion interrupt
/// enumerates exactly one disk once the controller settles.
#[test]
fn insertion_enumerates_one_disk() {
    let controller = MockController::new(512, 64);
    let factory = MockControllerFactory::new(vec![controller.clone()]);
    let (_bus, slots) = make_started_bus(factory, 1);

    controller.fire_media_change(false, true);
    std::thread::sleep(Duration::from_millis(150));

    let disks = query_slot_children(&slots[0]);
    assert_eq!(disks.len(), 1);
}

/// S4 (benign failure): media that disappears between the controller
/// reinitializing and `GetMediaParameters` being read back produces no
/// disk at all, not an error.
#[test]
fn insertion_with_no_media_enumerates_nothing() {
    let controller = MockController::no_media();
    let factory = MockControllerFactory::new(vec![controller.clone()]);
    let (_bus, slots) = make_started_bus(factory, 1);

    controller.fire_media_change(false, true);
    std::thread::sleep(Duration::from_millis(150));

    let disks = query_slot_children(&slots[0]);
    assert!(disks.is_empty());
}

/// Removal clears a previously enumerated disk.
#[test]
fn removal_clears_the_enumerated_disk() {
    let controller = MockController::new(512, 64);
    let factory = MockControllerFactory::new(vec![controller.clone()]);
    let (_bus, slots) = make_started_bus(factory, 1);

    controller.fire_media_change(false, true);
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(query_slot_children(&slots[0]).len(), 1);

    controller.fire_media_change(true, false);
    std::thread::sleep(Duration::from_millis(150));
    assert!(query_slot_children(&slots[0]).is_empty());
}

/// S5: a round trip through the DMA path returns exactly the bytes
/// that were written.
#[test]
fn dma_write_then_read_round_trips() {
    let controller = MockController::new(512, 64);
    let factory = MockControllerFactory::new(vec![controller.clone()]);
    let (_bus, slots) = make_started_bus(factory, 1);

    controller.fire_media_change(false, true);
    std::thread::sleep(Duration::from_millis(150));
    let disk = query_slot_children(&slots[0]).remove(0);

    assert_eq!(sdcore::io::helpers::open(&disk), Status::Success);

    let pattern: Vec<u8> = (0..1024u32).map(|b| (b % 251) as u8).collect();
    let write_buffer = IoBuffer::from_bytes(pattern.clone(), 0);
    let write_result = sdcore::io::helpers::write(&disk, write_buffer, 0, 1024);
    assert_eq!(write_result.status, Status::Success);
    assert_eq!(write_result.bytes_completed, 1024);

    let read_buffer = IoBuffer::new(1024);
    let read_result = sdcore::io::helpers::read(&disk, read_buffer.clone(), 0, 1024);
    assert_eq!(read_result.status, Status::Success);
    assert_eq!(read_buffer.read_at(0, 1024), pattern);

    assert_eq!(sdcore::io::helpers::close(&disk), Status::Success);
}

/// A controller that cannot initialize DMA (for any reason besides
/// `NoMedia`) still gets a disk, just one that falls back to the
/// polled I/O path.
#[test]
fn polled_fallback_write_then_read_round_trips() {
    let controller = MockController::new(512, 64);
    *controller.dma_status.lock().unwrap() = Status::NotSupported;
    let factory = MockControllerFactory::new(vec![controller.clone()]);
    let (_bus, slots) = make_started_bus(factory, 1);

    controller.fire_media_change(false, true);
    std::thread::sleep(Duration::from_millis(150));
    let disk = query_slot_children(&slots[0]).remove(0);

    assert_eq!(sdcore::io::helpers::open(&disk), Status::Success);

    let pattern: Vec<u8> = (0..512u32).map(|b| (b % 200) as u8).collect();
    let write_buffer = IoBuffer::from_bytes(pattern.clone(), 0);
    let write_result = sdcore::io::helpers::write(&disk, write_buffer, 0, 512);
    assert_eq!(write_result.status, Status::Success);

    let read_buffer = IoBuffer::new(512);
    let read_result = sdcore::io::helpers::read(&disk, read_buffer.clone(), 0, 512);
    assert_eq!(read_result.status, Status::Success);
    assert_eq!(read_buffer.read_at(0, 512), pattern);

    assert_eq!(sdcore::io::helpers::close(&disk), Status::Success);
}

/// A disk cannot be read once its media is gone, but the device keeps
/// answering administrative requests.
#[test]
fn read_after_removal_reports_no_media() {
    let controller = MockController::new(512, 64);
    let factory = MockControllerFactory::new(vec![controller.clone()]);
    let (_bus, slots) = make_started_bus(factory, 1);

    controller.fire_media_change(false, true);
    std::thread::sleep(Duration::from_millis(150));
    let disk = query_slot_children(&slots[0]).remove(0);

    controller.fire_media_change(true, false);
    std::thread::sleep(Duration::from_millis(150));

    let read_result = sdcore::io::helpers::read(&disk, IoBuffer::new(512), 0, 512);
    assert_eq!(read_result.status, Status::NoMedia);
}

/// `Lookup` synthesizes file properties from the disk's own media
/// parameters.
#[test]
fn lookup_reports_disk_geometry() {
    let controller = MockController::new(512, 64);
    let factory = MockControllerFactory::new(vec![controller.clone()]);
    let (_bus, slots) = make_started_bus(factory, 1);

    controller.fire_media_change(false, true);
    std::thread::sleep(Duration::from_millis(150));
    let disk = query_slot_children(&slots[0]).remove(0);

    let (status, result) = sdcore::io::helpers::system_control(
        &disk,
        MinorCode::Lookup,
        sdcore::io::SystemControlParams::default(),
    );
    assert_eq!(status, Status::Success);
    let properties = result.result.into_inner().expect("Lookup should synthesize properties");
    assert_eq!(properties.block_size, 512);
    assert_eq!(properties.block_count, 64);
    assert_eq!(properties.file_size, 512 * 64);
}

/// Multiple opens against the same disk are each balanced by a
/// close; nothing panics, and the disk answers I/O throughout.
#[test]
fn repeated_open_close_does_not_panic() {
    let controller = MockController::new(512, 64);
    let factory = MockControllerFactory::new(vec![controller.clone()]);
    let (_bus, slots) = make_started_bus(factory, 1);

    controller.fire_media_change(false, true);
    std::thread::sleep(Duration::from_millis(150));
    let disk = query_slot_children(&slots[0]).remove(0);

    for _ in 0..5 {
        assert_eq!(sdcore::io::helpers::open(&disk), Status::Success);
    }
    for _ in 0..5 {
        assert_eq!(sdcore::io::helpers::close(&disk), Status::Success);
    }
}
