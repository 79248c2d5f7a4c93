//! Scenario tests for the IRP engine's traversal geometry, completion
//! semantics, and create/destroy symmetry.

use sdcore::io::{Device, Direction, Driver, Irp, IrpContext, IrpParameters, MajorCode, MinorCode};
use sdcore::status::Status;
use std::panic;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A driver that records every dispatch as `"<name>-<down|up>"` and,
/// if `complete_status` is set, completes on its very first dispatch.
struct RecordingDriver {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    complete_status: Option<Status>,
}

impl Driver for RecordingDriver {
    fn dispatch(&self, _device: &Arc<Device>, irp: &Arc<Irp>, _context: &mut Option<IrpContext>) {
        let direction = match irp.direction() {
            Direction::Down => "down",
            Direction::Up => "up",
        };
        self.log.lock().unwrap().push(format!("{}-{direction}", self.name));
        if let Some(status) = self.complete_status {
            irp.complete(status);
        }
    }
}

fn send(device: &Arc<Device>, minor: MinorCode) -> Status {
    let irp = Irp::create(device, MajorCode::StateChange).expect("create");
    irp.initialize();
    irp.set_minor(minor);
    irp.set_params(IrpParameters::None);
    let status = Irp::send_synchronous(&irp);
    Irp::destroy(&irp);
    status
}

/// S1: a full three-driver stack with nobody completing the IRP
/// traverses all the way down, turns at the bottom, and comes all the
/// way back up — dispatching the bottom driver twice in a row.
#[test]
fn full_stack_traversal_revisits_the_bottom_driver() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let stack: Vec<Arc<dyn Driver>> = vec![
        Arc::new(RecordingDriver { name: "A", log: log.clone(), complete_status: None }),
        Arc::new(RecordingDriver { name: "B", log: log.clone(), complete_status: None }),
        Arc::new(RecordingDriver { name: "C", log: log.clone(), complete_status: None }),
    ];
    let device = Device::new("test\\full-stack", stack);

    let status = send(&device, MinorCode::StartDevice);

    assert_eq!(status, Status::NotHandled);
    let observed = log.lock().unwrap().clone();
    assert_eq!(
        observed,
        vec!["A-down", "B-down", "C-down", "C-up", "B-up", "A-up"]
    );
}

/// S2: a driver that completes mid-stack, on its way down, is never
/// dispatched again, and anything deeper in the stack is never
/// dispatched at all.
#[test]
fn mid_stack_completion_skips_the_rest_of_the_down_pass() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let stack: Vec<Arc<dyn Driver>> = vec![
        Arc::new(RecordingDriver { name: "A", log: log.clone(), complete_status: None }),
        Arc::new(RecordingDriver { name: "B", log: log.clone(), complete_status: Some(Status::Success) }),
        Arc::new(RecordingDriver { name: "C", log: log.clone(), complete_status: None }),
    ];
    let device = Device::new("test\\mid-stack", stack);

    let status = send(&device, MinorCode::StartDevice);

    assert_eq!(status, Status::Success);
    let observed = log.lock().unwrap().clone();
    assert_eq!(observed, vec!["A-down", "B-down", "A-up"]);
}

/// A driver that pends on the way down, from another thread, only
/// continues the IRP after `sendSynchronous`'s caller has genuinely
/// blocked — not spun — waiting for it.
struct PendingDriver {
    log: Arc<Mutex<Vec<String>>>,
}

impl Driver for PendingDriver {
    fn dispatch(&self, _device: &Arc<Device>, irp: &Arc<Irp>, _context: &mut Option<IrpContext>) {
        match irp.direction() {
            Direction::Down => {
                self.log.lock().unwrap().push("pend".to_string());
                irp.pend();
                let irp = irp.clone();
                let log = self.log.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(30));
                    log.lock().unwrap().push("continue".to_string());
                    irp.continue_irp();
                });
            }
            Direction::Up => {
                self.log.lock().unwrap().push("complete".to_string());
                irp.complete(Status::Success);
            }
        }
    }
}

/// S3: `sendSynchronous` blocks on a pended IRP until another thread
/// calls `continueIrp`, and the resumed traversal re-dispatches the
/// pending driver once more, now going up, to finish the job.
#[test]
fn pend_and_continue_blocks_the_sender_until_resumed() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let stack: Vec<Arc<dyn Driver>> = vec![Arc::new(PendingDriver { log: log.clone() })];
    let device = Device::new("test\\pend-continue", stack);

    let started = Instant::now();
    let status = send(&device, MinorCode::StartDevice);
    let elapsed = started.elapsed();

    assert_eq!(status, Status::Success);
    assert!(elapsed >= Duration::from_millis(25), "sendSynchronous returned before the IRP was continued");
    assert_eq!(*log.lock().unwrap(), vec!["pend", "continue", "complete"]);
}

/// A driver whose `create_irp` always fails; used to exercise the
/// unwind path in `Irp::create`.
struct FailingDriver {
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Driver for FailingDriver {
    fn create_irp(&self, _device: &Arc<Device>, _irp: &Irp) -> Result<Option<IrpContext>, Status> {
        Err(Status::InsufficientResources)
    }

    fn destroy_irp(&self, _device: &Arc<Device>, _irp: &Irp, _context: Option<IrpContext>) {
        self.log.lock().unwrap().push("destroy-failing");
    }

    fn dispatch(&self, _device: &Arc<Device>, _irp: &Arc<Irp>, _context: &mut Option<IrpContext>) {
        unreachable!("an IRP that failed to create is never dispatched");
    }
}

struct CountingDriver {
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Driver for CountingDriver {
    fn create_irp(&self, _device: &Arc<Device>, _irp: &Irp) -> Result<Option<IrpContext>, Status> {
        self.log.lock().unwrap().push("create-counting");
        Ok(None)
    }

    fn destroy_irp(&self, _device: &Arc<Device>, _irp: &Irp, _context: Option<IrpContext>) {
        self.log.lock().unwrap().push("destroy-counting");
    }

    fn dispatch(&self, _device: &Arc<Device>, irp: &Arc<Irp>, _context: &mut Option<IrpContext>) {
        irp.complete(Status::Success);
    }
}

/// Every driver that successfully ran `create_irp` for a stack whose
/// creation later fails gets `destroy_irp` called on it, in reverse
/// order, before the error surfaces.
#[test]
fn create_failure_unwinds_prior_drivers_in_reverse_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let stack: Vec<Arc<dyn Driver>> = vec![
        Arc::new(CountingDriver { log: log.clone() }),
        Arc::new(FailingDriver { log: log.clone() }),
    ];
    let device = Device::new("test\\create-failure", stack);

    let result = Irp::create(&device, MajorCode::StateChange);

    assert!(matches!(result, Err(Status::InsufficientResources)));
    assert_eq!(*log.lock().unwrap(), vec!["create-counting", "destroy-counting"]);
}

struct DoubleCompleteDriver;

impl Driver for DoubleCompleteDriver {
    fn dispatch(&self, _device: &Arc<Device>, irp: &Arc<Irp>, _context: &mut Option<IrpContext>) {
        irp.complete(Status::Success);
        irp.complete(Status::Success);
    }
}

/// Completing an IRP twice in the same traversal is a programming
/// error, not a recoverable status.
#[test]
fn completing_twice_panics() {
    let stack: Vec<Arc<dyn Driver>> = vec![Arc::new(DoubleCompleteDriver)];
    let device = Device::new("test\\double-complete", stack);
    let irp = Irp::create(&device, MajorCode::StateChange).expect("create");
    irp.initialize();
    irp.set_minor(MinorCode::StartDevice);

    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        Irp::send_synchronous(&irp);
    }));
    assert!(result.is_err(), "expected a panic on double completion");
}

struct NeverCompleteDriver;

impl Driver for NeverCompleteDriver {
    fn dispatch(&self, _device: &Arc<Device>, irp: &Arc<Irp>, _context: &mut Option<IrpContext>) {
        // Pends and never resolves: Active stays set for the rest of
        // this test.
        irp.pend();
    }
}

/// Destroying an IRP while it's still `Active` is a fatal bug check,
/// not a recoverable status.
#[test]
fn destroying_an_active_irp_panics() {
    let stack: Vec<Arc<dyn Driver>> = vec![Arc::new(NeverCompleteDriver)];
    let device = Device::new("test\\destroy-active", stack);
    let irp = Irp::create(&device, MajorCode::StateChange).expect("create");
    irp.initialize();
    irp.set_minor(MinorCode::StartDevice);

    let background = {
        let irp = irp.clone();
        std::thread::spawn(move || {
            Irp::send_synchronous(&irp);
        })
    };
    std::thread::sleep(Duration::from_millis(20));

    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| Irp::destroy(&irp)));
    assert!(result.is_err(), "expected a panic destroying an Active IRP");

    drop(background);
}
