//! Device descriptor, open device and driver registry (§4.4, §3's `D`/`O`
//! entities). `DeviceHandle` is the one thing a driver actually touches:
//! it carries the SSM arena, the transport, the type-erased per-driver
//! instance blob, and the inherent methods that enforce the §8 invariants
//! (`finger_on` alternation, exactly-one `image_captured` per scan) before
//! forwarding to whichever sink the orchestrator currently has installed.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::driver::{DriverInfo, ImagingSink, ImagingSubState};
use crate::error::{Error, RetryHint};
use crate::event_loop::EventLoop;
use crate::image::Image;
use crate::state::DeviceState;
use crate::timer::TimerHandle;
use crate::usb::{Completion, Transfer, TransferId, UsbTransport};

/// The discovered-but-not-opened representation (§3's `D`). Immutable
/// post-discovery.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub driver_id: u16,
    pub devtype: u32,
    pub usb_vendor: u16,
    pub usb_product: u16,
    pub driver_data: Vec<u8>,
}

/// Registry entry: either surface of §4.6, tagged so the core can dispatch
/// without every caller needing to know which kind a driver is up front.
pub enum DriverEntry {
    Imaging(Rc<dyn crate::driver::ImagingDriver>),
    Primitive(Rc<dyn crate::driver::PrimitiveDriver>),
}

impl DriverEntry {
    pub fn info(&self) -> &DriverInfo {
        match self {
            DriverEntry::Imaging(d) => d.info(),
            DriverEntry::Primitive(d) => d.info(),
        }
    }
}

/// Process-wide driver table (§4.4). A `Library` owns exactly one of these.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: Vec<DriverEntry>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: DriverEntry) {
        self.drivers.push(entry);
    }

    pub fn by_id(&self, driver_id: u16) -> Option<&DriverEntry> {
        self.drivers.iter().find(|d| d.info().id == driver_id)
    }

    /// Matches every registered driver's USB ID table against candidate
    /// `(vendor, product)` pairs discovered by the (out-of-scope) USB
    /// enumeration step, yielding one descriptor per match. `devtype` is
    /// left at 0 unless a caller supplies a finer discriminator — real
    /// drivers disambiguate sub-models via their own `discover` hook,
    /// which this core does not mandate a signature for since it depends
    /// entirely on vendor-specific descriptor bytes (out of scope, §1).
    pub fn discover(&self, candidates: &[(u16, u16)]) -> Vec<DeviceDescriptor> {
        let mut found = Vec::new();
        for &(vendor, product) in candidates {
            for entry in &self.drivers {
                if entry.info().matches_usb_id(vendor, product) {
                    found.push(DeviceDescriptor {
                        driver_id: entry.info().id,
                        devtype: 0,
                        usb_vendor: vendor,
                        usb_product: product,
                        driver_data: Vec::new(),
                    });
                }
            }
        }
        found
    }
}

/// Exclusively owned by the caller between open and close (§3's `O`).
pub struct DeviceHandle {
    pub driver_id: u16,
    pub devtype: u32,
    state: DeviceState,
    imaging_state: Option<ImagingSubState>,
    ssm: crate::ssm::SsmArena,
    transport: Box<dyn UsbTransport>,
    events: Rc<RefCell<EventLoop>>,
    instance: Option<Box<dyn Any>>,
    sink: Option<ImagingSink>,
    last_finger_on: Option<bool>,
    image_captured_this_scan: bool,
    pending_debounce_timer: Option<TimerHandle>,
}

impl DeviceHandle {
    pub fn new(
        driver_id: u16,
        devtype: u32,
        transport: Box<dyn UsbTransport>,
        events: Rc<RefCell<EventLoop>>,
    ) -> Self {
        DeviceHandle {
            driver_id,
            devtype,
            state: DeviceState::Initial,
            imaging_state: None,
            ssm: crate::ssm::SsmArena::new(),
            transport,
            events,
            instance: None,
            sink: None,
            last_finger_on: None,
            image_captured_this_scan: false,
            pending_debounce_timer: None,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub(crate) fn set_state(&mut self, s: DeviceState) {
        self.state = s;
    }

    pub fn imaging_state(&self) -> Option<ImagingSubState> {
        self.imaging_state
    }

    pub(crate) fn set_imaging_state(&mut self, s: Option<ImagingSubState>) {
        self.imaging_state = s;
    }

    pub fn ssm(&mut self) -> &mut crate::ssm::SsmArena {
        &mut self.ssm
    }

    pub fn submit(
        &mut self,
        transfer: Transfer,
        on_complete: Box<dyn FnOnce(Completion)>,
    ) -> TransferId {
        self.transport.submit(transfer, on_complete)
    }

    pub fn cancel_transfer(&mut self, id: TransferId) {
        self.transport.cancel(id);
    }

    pub fn timer_add(&mut self, delay: Duration, cb: impl FnOnce() + 'static) -> TimerHandle {
        self.events.borrow_mut().timer_add(delay, cb)
    }

    pub fn timer_cancel(&mut self, handle: TimerHandle) {
        self.events.borrow_mut().timer_cancel(handle);
    }

    /// Tracks the orchestrator's pending stop-operation debounce timer so
    /// `Library::close` can cancel it if a caller closes the device while
    /// the debounce is still outstanding (§4.4, §4.5).
    pub(crate) fn set_pending_debounce_timer(&mut self, handle: Option<TimerHandle>) {
        self.pending_debounce_timer = handle;
    }

    pub(crate) fn take_pending_debounce_timer(&mut self) -> Option<TimerHandle> {
        self.pending_debounce_timer.take()
    }

    pub fn set_instance_data<T: 'static>(&mut self, data: T) {
        self.instance = Some(Box::new(data));
    }

    pub fn instance_data<T: 'static>(&self) -> Option<&T> {
        self.instance.as_ref().and_then(|b| b.downcast_ref::<T>())
    }

    pub fn instance_data_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.instance.as_mut().and_then(|b| b.downcast_mut::<T>())
    }

    pub fn clear_instance_data(&mut self) {
        self.instance = None;
    }

    pub(crate) fn set_sink(&mut self, sink: ImagingSink) {
        self.last_finger_on = None;
        self.image_captured_this_scan = false;
        self.sink = Some(sink);
    }

    pub(crate) fn clear_sink(&mut self) {
        self.sink = None;
    }

    /// Edge-triggered finger presence (§4.6). Panics if two consecutive
    /// calls report the same presence — the alternation invariant in §8 is
    /// a driver-authoring bug, not a recoverable runtime condition.
    pub fn finger_on(&mut self, present: bool) {
        assert_ne!(
            self.last_finger_on,
            Some(present),
            "finger_on must alternate true/false within one session"
        );
        self.last_finger_on = Some(present);
        self.imaging_state = Some(if present {
            self.image_captured_this_scan = false;
            ImagingSubState::Capture
        } else {
            ImagingSubState::AwaitFingerOn
        });
        if let Some(sink) = self.sink.as_mut() {
            (sink.on_finger)(present);
        }
    }

    /// Hands off one fully-assembled image (§4.6). Panics if called
    /// outside a `finger_on(true)`..`finger_on(false)` window or more than
    /// once within one (§8: "exactly one `image_captured`... unless
    /// `abort_scan` intervenes").
    pub fn image_captured(&mut self, image: Image) {
        assert_eq!(
            self.last_finger_on,
            Some(true),
            "image_captured must occur while the finger is on"
        );
        assert!(
            !self.image_captured_this_scan,
            "at most one image_captured per finger-on window"
        );
        self.image_captured_this_scan = true;
        self.imaging_state = Some(ImagingSubState::AwaitFingerOff);
        if let Some(sink) = self.sink.as_mut() {
            (sink.on_image)(image);
        }
    }

    pub fn abort_scan(&mut self, hint: RetryHint) {
        if let Some(sink) = self.sink.as_mut() {
            (sink.on_abort)(hint);
        }
    }

    pub fn session_error(&mut self, err: Error) {
        if let Some(sink) = self.sink.as_mut() {
            (sink.on_error)(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::mock::MockTransport;
    use std::cell::Cell;

    fn handle() -> DeviceHandle {
        DeviceHandle::new(
            1,
            1,
            Box::new(MockTransport::new()),
            Rc::new(RefCell::new(EventLoop::new())),
        )
    }

    #[test]
    #[should_panic(expected = "must alternate")]
    fn finger_on_must_alternate() {
        let mut dev = handle();
        dev.set_sink(ImagingSink {
            on_finger: Box::new(|_| {}),
            on_image: Box::new(|_| {}),
            on_abort: Box::new(|_| {}),
            on_error: Box::new(|_| {}),
        });
        dev.finger_on(true);
        dev.finger_on(true);
    }

    #[test]
    #[should_panic(expected = "at most one image_captured")]
    fn only_one_image_per_scan() {
        let mut dev = handle();
        dev.set_sink(ImagingSink {
            on_finger: Box::new(|_| {}),
            on_image: Box::new(|_| {}),
            on_abort: Box::new(|_| {}),
            on_error: Box::new(|_| {}),
        });
        dev.finger_on(true);
        dev.image_captured(Image::blank(1, 1));
        dev.image_captured(Image::blank(1, 1));
    }

    #[test]
    fn instance_data_round_trips_by_type() {
        let mut dev = handle();
        dev.set_instance_data::<u32>(42);
        assert_eq!(dev.instance_data::<u32>(), Some(&42));
        assert_eq!(dev.instance_data::<String>(), None);
    }

    #[test]
    fn sink_forwards_image_captured() {
        let mut dev = handle();
        let seen = Rc::new(Cell::new(false));
        let s = seen.clone();
        dev.set_sink(ImagingSink {
            on_finger: Box::new(|_| {}),
            on_image: Box::new(move |_| s.set(true)),
            on_abort: Box::new(|_| {}),
            on_error: Box::new(|_| {}),
        });
        dev.finger_on(true);
        dev.image_captured(Image::blank(1, 1));
        assert!(seen.get());
    }

    #[test]
    fn discover_matches_registered_usb_ids() {
        use crate::driver::{DriverCaps, DriverInfo, ScanType};
        struct Dummy(DriverInfo);
        impl crate::driver::ImagingDriver for Dummy {
            fn info(&self) -> &DriverInfo {
                &self.0
            }
            fn open(&self, _dev: &crate::driver::Dev, on_complete: Box<dyn FnOnce(crate::error::Result<()>)>) {
                on_complete(Ok(()));
            }
            fn close(&self, _dev: &crate::driver::Dev, on_complete: Box<dyn FnOnce()>) {
                on_complete();
            }
            fn activate(
                &self,
                _dev: &crate::driver::Dev,
                _initial: ImagingSubState,
                on_complete: Box<dyn FnOnce(crate::error::Result<()>)>,
            ) {
                on_complete(Ok(()));
            }
            fn deactivate(&self, _dev: &crate::driver::Dev, on_complete: Box<dyn FnOnce()>) {
                on_complete();
            }
            fn change_state(&self, _dev: &crate::driver::Dev, _new_state: ImagingSubState) {}
        }
        let mut reg = DriverRegistry::new();
        reg.register(DriverEntry::Imaging(Rc::new(Dummy(DriverInfo {
            id: 1,
            name: "dummy",
            full_name: "Dummy Sensor",
            usb_ids: &[(0x08ff, 0x2810)],
            scan_type: ScanType::Swipe,
            kind: crate::driver::DriverKind::Imaging,
            caps: DriverCaps::SUPPORTS_VERIFY,
        }))));
        let found = reg.discover(&[(0x08ff, 0x2810), (0x1234, 0x5678)]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].driver_id, 1);
    }
}
