//! Process-wide context (§9 design notes: "encapsulate in a `Library`
//! context created at init, passed explicitly to every entry point; no
//! process-wide singletons"). Owns the driver registry, the one event loop,
//! the set of currently-open devices, and the print store's base path.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use crate::device::{DeviceDescriptor, DeviceHandle, DriverEntry, DriverRegistry};
use crate::driver::Dev;
use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::state::DeviceState;
use crate::storage::PrintStore;
use crate::usb::UsbTransport;

/// Opaque key for an open device within one `Library`. Not derived from any
/// OS handle — just an incrementing counter — because multiple descriptors
/// can legitimately share a `(driver_id, devtype)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u64);

type OpenSet = Rc<RefCell<HashMap<DeviceId, Dev>>>;

pub struct Library {
    registry: DriverRegistry,
    events: Rc<RefCell<EventLoop>>,
    open: OpenSet,
    next_id: u64,
    store: PrintStore,
}

impl Library {
    pub fn new() -> Result<Self> {
        Ok(Library {
            registry: DriverRegistry::new(),
            events: Rc::new(RefCell::new(EventLoop::new())),
            open: Rc::new(RefCell::new(HashMap::new())),
            next_id: 0,
            store: PrintStore::new()?,
        })
    }

    /// A `Library` rooted at an explicit print-store directory, bypassing
    /// `$HOME` resolution — what tests and the driver crates' own test
    /// suites use.
    pub fn with_store_at(base: PathBuf) -> Self {
        Library {
            registry: DriverRegistry::new(),
            events: Rc::new(RefCell::new(EventLoop::new())),
            open: Rc::new(RefCell::new(HashMap::new())),
            next_id: 0,
            store: PrintStore::at(base),
        }
    }

    pub fn register_driver(&mut self, entry: DriverEntry) {
        self.registry.register(entry);
    }

    pub fn discover(&self, usb_candidates: &[(u16, u16)]) -> Vec<DeviceDescriptor> {
        self.registry.discover(usb_candidates)
    }

    pub fn store(&self) -> &PrintStore {
        &self.store
    }

    pub fn events(&self) -> &Rc<RefCell<EventLoop>> {
        &self.events
    }

    /// Runs the event loop for up to `deadline`. Callers own the pump —
    /// nothing in this crate spawns a background thread (§5).
    pub fn pump(&self, deadline: Duration) -> usize {
        self.events.borrow_mut().handle_events(deadline)
    }

    /// Opens `descriptor` against `transport`, claims whichever kind of
    /// driver is registered for it, runs its `open` hook, and inserts it
    /// into the open-devices set only on success (§4.4). The caller
    /// supplies the transport because only it knows how to turn a
    /// descriptor back into a live USB handle — that binding is
    /// `fprint-usb`'s job, not this crate's. Imaging and primitive drivers
    /// share the same `open`/`close` shape, so both kinds go through this
    /// one entry point — only the enroll/verify/identify surface differs
    /// between them (§4.6).
    pub fn open(
        &mut self,
        descriptor: &DeviceDescriptor,
        transport: Box<dyn UsbTransport>,
        on_open: Box<dyn FnOnce(Result<DeviceId>)>,
    ) {
        let entry = match self.registry.by_id(descriptor.driver_id) {
            Some(e) => e,
            None => {
                on_open(Err(Error::invalid("no driver registered for this descriptor")));
                return;
            }
        };

        let id = DeviceId(self.next_id);
        self.next_id += 1;
        let dev = Rc::new(RefCell::new(DeviceHandle::new(
            descriptor.driver_id,
            descriptor.devtype,
            transport,
            self.events.clone(),
        )));
        dev.borrow_mut().set_state(DeviceState::Initializing);

        let dev2 = dev.clone();
        let open_set = self.open.clone();
        let on_complete: Box<dyn FnOnce(Result<()>)> = Box::new(move |res| match res {
            Ok(()) => {
                dev2.borrow_mut().set_state(DeviceState::Initialized);
                open_set.borrow_mut().insert(id, dev2.clone());
                on_open(Ok(id));
            }
            Err(e) => {
                dev2.borrow_mut().set_state(DeviceState::Error);
                on_open(Err(e));
            }
        });

        match entry {
            DriverEntry::Imaging(d) => d.open(&dev, on_complete),
            DriverEntry::Primitive(d) => d.open(&dev, on_complete),
        }
    }

    pub fn device(&self, id: DeviceId) -> Option<Rc<RefCell<DeviceHandle>>> {
        self.open.borrow().get(&id).cloned()
    }

    /// Cancels the orchestrator's pending stop-operation debounce timer, if
    /// one is still outstanding (a caller closing a device mid-`*Stopping`
    /// would otherwise let that timer fire after close and invoke driver
    /// methods against a `Dev` the registry no longer tracks), invokes the
    /// driver's own `close`, and removes the device from the open set
    /// regardless of the driver's own bookkeeping (§4.4).
    pub fn close(&mut self, id: DeviceId, driver: DriverEntry, on_closed: Box<dyn FnOnce()>) {
        let dev = match self.open.borrow_mut().remove(&id) {
            Some(d) => d,
            None => {
                on_closed();
                return;
            }
        };
        if let Some(handle) = dev.borrow_mut().take_pending_debounce_timer() {
            dev.borrow_mut().timer_cancel(handle);
        }
        dev.borrow_mut().set_state(DeviceState::Deinitializing);
        let dev2 = dev.clone();
        let on_complete: Box<dyn FnOnce()> = Box::new(move || {
            dev2.borrow_mut().set_state(DeviceState::Deinitialized);
            on_closed();
        });
        match &driver {
            DriverEntry::Imaging(d) => d.close(&dev, on_complete),
            DriverEntry::Primitive(d) => d.close(&dev, on_complete),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverCaps, DriverInfo, ImagingSubState, ScanType};
    use crate::usb::mock::MockTransport;
    use std::cell::Cell;

    struct ImmediateOpenDriver(DriverInfo);

    impl crate::driver::ImagingDriver for ImmediateOpenDriver {
        fn info(&self) -> &DriverInfo {
            &self.0
        }
        fn open(&self, _dev: &Dev, on_complete: Box<dyn FnOnce(Result<()>)>) {
            on_complete(Ok(()));
        }
        fn close(&self, _dev: &Dev, on_complete: Box<dyn FnOnce()>) {
            on_complete();
        }
        fn activate(&self, _dev: &Dev, _initial: ImagingSubState, on_complete: Box<dyn FnOnce(Result<()>)>) {
            on_complete(Ok(()));
        }
        fn deactivate(&self, _dev: &Dev, on_complete: Box<dyn FnOnce()>) {
            on_complete();
        }
        fn change_state(&self, _dev: &Dev, _new_state: ImagingSubState) {}
    }

    fn library_with_driver() -> (Library, Rc<dyn crate::driver::ImagingDriver>) {
        let mut lib = Library::with_store_at(std::env::temp_dir().join("fprint-core-lib-test"));
        let driver: Rc<dyn crate::driver::ImagingDriver> = Rc::new(ImmediateOpenDriver(DriverInfo {
            id: 7,
            name: "imm",
            full_name: "Immediate Test Sensor",
            usb_ids: &[(0x1, 0x2)],
            scan_type: ScanType::Press,
            kind: crate::driver::DriverKind::Imaging,
            caps: DriverCaps::SUPPORTS_VERIFY,
        }));
        lib.register_driver(DriverEntry::Imaging(driver.clone()));
        (lib, driver)
    }

    #[test]
    fn open_then_close_round_trips_through_open_set() {
        let (mut lib, driver) = library_with_driver();
        let descriptors = lib.discover(&[(0x1, 0x2)]);
        assert_eq!(descriptors.len(), 1);

        let opened_id = Rc::new(Cell::new(None));
        let o = opened_id.clone();
        lib.open(
            &descriptors[0],
            Box::new(MockTransport::new()),
            Box::new(move |res| o.set(Some(res.unwrap()))),
        );
        let id = opened_id.get().expect("open completed synchronously");
        assert!(lib.device(id).is_some());

        let closed = Rc::new(Cell::new(false));
        let c = closed.clone();
        lib.close(id, DriverEntry::Imaging(driver), Box::new(move || c.set(true)));
        assert!(closed.get());
        assert!(lib.device(id).is_none());
    }

    #[test]
    fn close_cancels_a_pending_stop_operation_debounce_timer() {
        use crate::orchestrator::{start_operation, stop_operation};
        use crate::state::Operation;

        struct DeferredDriver(DriverInfo);
        impl crate::driver::ImagingDriver for DeferredDriver {
            fn info(&self) -> &DriverInfo {
                &self.0
            }
            fn open(&self, _dev: &Dev, on_complete: Box<dyn FnOnce(Result<()>)>) {
                on_complete(Ok(()));
            }
            fn close(&self, _dev: &Dev, on_complete: Box<dyn FnOnce()>) {
                on_complete();
            }
            fn activate(&self, dev: &Dev, _initial: ImagingSubState, on_complete: Box<dyn FnOnce(Result<()>)>) {
                dev.borrow_mut().timer_add(Duration::from_millis(0), move || on_complete(Ok(())));
            }
            fn deactivate(&self, dev: &Dev, on_complete: Box<dyn FnOnce()>) {
                dev.borrow_mut().timer_add(Duration::from_millis(0), move || on_complete());
            }
            fn change_state(&self, _dev: &Dev, _new_state: ImagingSubState) {}
        }

        let mut lib = Library::with_store_at(std::env::temp_dir().join("fprint-core-lib-test-debounce"));
        let driver: Rc<dyn crate::driver::ImagingDriver> = Rc::new(DeferredDriver(DriverInfo {
            id: 9,
            name: "deferred",
            full_name: "Deferred Test Sensor",
            usb_ids: &[(0x3, 0x4)],
            scan_type: ScanType::Swipe,
            kind: crate::driver::DriverKind::Imaging,
            caps: DriverCaps::SUPPORTS_CAPTURE,
        }));
        lib.register_driver(DriverEntry::Imaging(driver.clone()));

        let descriptors = lib.discover(&[(0x3, 0x4)]);
        let opened_id = Rc::new(Cell::new(None));
        let o = opened_id.clone();
        lib.open(
            &descriptors[0],
            Box::new(MockTransport::new()),
            Box::new(move |res| o.set(Some(res.unwrap()))),
        );
        let id = opened_id.get().expect("open completed synchronously");
        let dev = lib.device(id).expect("device registered on open");

        start_operation(dev.clone(), driver.clone(), Operation::Capture, Box::new(|_| {}));
        lib.pump(Duration::from_millis(50));
        assert_eq!(dev.borrow().state(), DeviceState::Capturing);

        let stop_completed = Rc::new(Cell::new(false));
        let sc = stop_completed.clone();
        stop_operation(lib.events(), dev.clone(), driver.clone(), Box::new(move || sc.set(true)));
        assert_eq!(dev.borrow().state(), DeviceState::CaptureStopping);

        let closed = Rc::new(Cell::new(false));
        let c = closed.clone();
        lib.close(id, DriverEntry::Imaging(driver), Box::new(move || c.set(true)));
        assert!(closed.get());

        lib.pump(Duration::from_millis(50));
        assert!(
            !stop_completed.get(),
            "close must cancel the orchestrator's outstanding debounce timer"
        );
    }

    #[test]
    fn open_with_unknown_driver_id_fails_synchronously() {
        let (mut lib, _driver) = library_with_driver();
        let bogus = DeviceDescriptor {
            driver_id: 0xffff,
            devtype: 0,
            usb_vendor: 0,
            usb_product: 0,
            driver_data: Vec::new(),
        };
        let failed = Rc::new(Cell::new(false));
        let f = failed.clone();
        lib.open(
            &bogus,
            Box::new(MockTransport::new()),
            Box::new(move |res| f.set(res.is_err())),
        );
        assert!(failed.get());
    }
}
