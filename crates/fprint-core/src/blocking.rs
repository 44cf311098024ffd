//! Blocking façade (§1: "a blocking façade is a thin wrapper over the async
//! core"). Every function here just pumps [`Library::pump`] until the
//! operation's callback has fired, storing the result in a `Cell` the
//! closure captures. Nothing here is a second implementation of the
//! orchestrator — it exists purely so a synchronous caller (a CLI, a test)
//! doesn't have to hand-roll this loop itself.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::device::{DeviceDescriptor, DeviceHandle, DriverEntry};
use crate::driver::{Dev, ImagingDriver};
use crate::error::{Error, Result};
use crate::library::{DeviceId, Library};
use crate::orchestrator;
use crate::state::Operation;
use crate::usb::UsbTransport;

const PUMP_SLICE: Duration = Duration::from_millis(50);

/// Pumps `lib`'s event loop in `PUMP_SLICE` increments, calling `poll` after
/// each slice, until `poll` returns `Some`. There is no overall timeout
/// here; a caller that wants one wraps this in its own deadline check —
/// nothing in the core knows how long a human will take to swipe a finger.
fn pump_until<T>(lib: &Library, mut poll: impl FnMut() -> Option<T>) -> T {
    loop {
        if let Some(v) = poll() {
            return v;
        }
        lib.pump(PUMP_SLICE);
    }
}

pub fn open(
    lib: &mut Library,
    descriptor: &DeviceDescriptor,
    transport: Box<dyn UsbTransport>,
) -> Result<DeviceId> {
    let result = Rc::new(RefCell::new(None));
    let r = result.clone();
    lib.open(descriptor, transport, Box::new(move |res| *r.borrow_mut() = Some(res)));
    pump_until(lib, || result.borrow_mut().take())
}

pub fn close(lib: &mut Library, id: DeviceId, driver: DriverEntry) {
    let done = Rc::new(RefCell::new(false));
    let d = done.clone();
    lib.close(id, driver, Box::new(move || *d.borrow_mut() = true));
    pump_until(lib, || if *done.borrow() { Some(()) } else { None });
}

pub fn start_operation(
    lib: &Library,
    dev: Rc<RefCell<DeviceHandle>>,
    driver: Rc<dyn ImagingDriver>,
    op: Operation,
) -> Result<()> {
    let result = Rc::new(RefCell::new(None));
    let r = result.clone();
    orchestrator::start_operation(dev, driver, op, Box::new(move |res| *r.borrow_mut() = Some(res)));
    pump_until(lib, || result.borrow_mut().take())
}

pub fn stop_operation(lib: &Library, dev: Rc<RefCell<DeviceHandle>>, driver: Rc<dyn ImagingDriver>) {
    let done = Rc::new(RefCell::new(false));
    let d = done.clone();
    orchestrator::stop_operation(lib.events(), dev, driver, Box::new(move || *d.borrow_mut() = true));
    pump_until(lib, || if *done.borrow() { Some(()) } else { None });
}

/// Blocks until the next image is captured, or an error/abort ends the
/// scan. Installs a temporary sink and tears it down before returning.
pub fn capture_one_image(
    lib: &Library,
    dev: Rc<RefCell<DeviceHandle>>,
) -> Result<crate::image::Image> {
    let result: Rc<RefCell<Option<Result<crate::image::Image>>>> = Rc::new(RefCell::new(None));

    let r1 = result.clone();
    let r2 = result.clone();
    let r3 = result.clone();
    dev.borrow_mut().set_sink(crate::driver::ImagingSink {
        on_finger: Box::new(|_| {}),
        on_image: Box::new(move |img| *r1.borrow_mut() = Some(Ok(img))),
        on_abort: Box::new(move |hint| *r2.borrow_mut() = Some(Err(Error::RetryScan(hint)))),
        on_error: Box::new(move |err| *r3.borrow_mut() = Some(Err(err))),
    });

    let out = pump_until(lib, || result.borrow_mut().take());
    dev.borrow_mut().clear_sink();
    out
}
