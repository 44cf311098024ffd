//! Image-device orchestrator (§4.5) — drives `S` through
//! `*Starting -> *ing -> *Stopping -> Initialized` for the four operations,
//! and enqueues orchestrator-issued imaging sub-state changes behind a
//! 10ms debounce timer so a currently executing SSM can unwind before the
//! driver is told to switch direction. Autonomous per-frame sub-state
//! cycling (`AwaitFingerOn -> Capture -> AwaitFingerOff -> AwaitFingerOn`)
//! is not this module's concern — it happens inside `DeviceHandle`'s own
//! `finger_on`/`image_captured` bookkeeping, driven directly by the driver.
//!
//! Every driver callback argument here is expected to resolve
//! asynchronously (through a transfer completion or a timer), never from
//! within the call that hands it the closure — calling back synchronously
//! would re-enter a `DeviceHandle` that's still mutably borrowed by the
//! orchestrator, which is exactly the re-entrancy §4.1 rules out.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::device::DeviceHandle;
use crate::driver::{Dev, ImagingDriver, ImagingSubState};
use crate::error::Result;
use crate::state::{DeviceState, Operation};

/// Deferred-transition delay called out in §9's open question: "treat this
/// as a semantic requirement, not an implementation detail."
pub const SUBSTATE_DEBOUNCE: Duration = Duration::from_millis(10);

/// Begins `op` on an already-open, `Initialized` device. Panics if `dev` is
/// not `Initialized` — starting an operation on a device mid-operation is a
/// caller bug, not a recoverable runtime condition.
pub fn start_operation(
    dev: Rc<RefCell<DeviceHandle>>,
    driver: Rc<dyn ImagingDriver>,
    op: Operation,
    on_started: Box<dyn FnOnce(Result<()>)>,
) {
    {
        let mut d = dev.borrow_mut();
        assert_eq!(
            d.state(),
            DeviceState::Initialized,
            "start_operation requires an Initialized device"
        );
        d.set_state(op.starting_state());
    }

    let dev2 = dev.clone();
    driver.activate(
        &dev,
        ImagingSubState::AwaitFingerOn,
        Box::new(move |res| match res {
            Ok(()) => {
                let mut d = dev2.borrow_mut();
                d.set_state(op.running_state());
                d.set_imaging_state(Some(ImagingSubState::AwaitFingerOn));
                drop(d);
                on_started(Ok(()));
            }
            Err(e) => {
                dev2.borrow_mut().set_state(DeviceState::Error);
                on_started(Err(e));
            }
        }),
    );
}

/// Stops whatever operation `dev` is currently running. Enqueues the
/// `Inactive` sub-state change behind the debounce timer, invokes
/// `change_state` once it fires, then deactivates and returns `S` to
/// `Initialized`. Panics if `dev` is not in one of the four running states.
pub fn stop_operation(
    events: &Rc<RefCell<crate::event_loop::EventLoop>>,
    dev: Rc<RefCell<DeviceHandle>>,
    driver: Rc<dyn ImagingDriver>,
    on_stopped: Box<dyn FnOnce()>,
) {
    let op = {
        let d = dev.borrow();
        running_op(d.state()).expect("stop_operation requires a running device")
    };
    dev.borrow_mut().set_state(op.stopping_state());

    let dev2 = dev.clone();
    let driver2 = driver.clone();
    let handle = events.borrow_mut().timer_add(SUBSTATE_DEBOUNCE, move || {
        dev2.borrow_mut().set_pending_debounce_timer(None);
        dev2.borrow_mut().set_imaging_state(Some(ImagingSubState::Inactive));
        driver2.change_state(&dev2, ImagingSubState::Inactive);

        let dev3 = dev2.clone();
        driver2.deactivate(
            &dev2,
            Box::new(move || {
                let mut d = dev3.borrow_mut();
                d.set_state(DeviceState::Initialized);
                d.set_imaging_state(None);
                drop(d);
                on_stopped();
            }),
        );
    });
    // Tracked so `Library::close` can cancel this timer if the device is
    // closed while the debounce is still outstanding.
    dev.borrow_mut().set_pending_debounce_timer(Some(handle));
}

fn running_op(state: DeviceState) -> Option<Operation> {
    match state {
        DeviceState::Enrolling => Some(Operation::Enroll),
        DeviceState::Verifying => Some(Operation::Verify),
        DeviceState::Identifying => Some(Operation::Identify),
        DeviceState::Capturing => Some(Operation::Capture),
        _ => None,
    }
}
