//! Driver contract (§4.6) — what a concrete sensor driver provides, and
//! what it gets handed back to call into the core. Raw callbacks + `void*`
//! user data become typed `FnOnce`/`FnMut` closures and a type-erased slot
//! retrieved through a driver-side accessor, per the design notes in §9.

use std::cell::RefCell;
use std::rc::Rc;

use crate::device::DeviceHandle;
use crate::error::{Error, IdentifyResult, RetryHint, Result, VerifyResult};
use crate::image::Image;

/// Every driver entry point gets the device this way rather than `&mut
/// DeviceHandle`: a driver's own completion closures (one submitted
/// transfer chaining the next) need to reach the device again on a later
/// event-loop tick, long after the call that handed them the reference has
/// returned, which only `Rc<RefCell<_>>` can give them (§9 design notes).
pub type Dev = Rc<RefCell<DeviceHandle>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    Press,
    Swipe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// Drivers that hand the core raw frames to assemble into an `Image`.
    Imaging,
    /// Drivers that do their own matching on-chip and only report a
    /// verdict (§4.6's "alternate surface").
    Primitive,
}

/// A driver's operation support, as a typed bitset rather than a bare `u32`
/// so a caller can't accidentally pass through an unrelated integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverCaps(u32);

impl DriverCaps {
    pub const NONE: DriverCaps = DriverCaps(0);
    pub const SUPPORTS_ENROLL: DriverCaps = DriverCaps(1 << 0);
    pub const SUPPORTS_VERIFY: DriverCaps = DriverCaps(1 << 1);
    pub const SUPPORTS_IDENTIFY: DriverCaps = DriverCaps(1 << 2);
    pub const SUPPORTS_CAPTURE: DriverCaps = DriverCaps(1 << 3);

    pub fn supports(self, cap: DriverCaps) -> bool {
        self.0 & cap.0 != 0
    }
}

impl std::ops::BitOr for DriverCaps {
    type Output = DriverCaps;

    fn bitor(self, rhs: DriverCaps) -> DriverCaps {
        DriverCaps(self.0 | rhs.0)
    }
}

/// Static facts about a driver, analogous to the teacher's `oa_driver_vtable`
/// capability query but expressed as data rather than a function pointer,
/// since none of this varies at runtime.
#[derive(Debug, Clone, Copy)]
pub struct DriverInfo {
    pub id: u16,
    pub name: &'static str,
    pub full_name: &'static str,
    pub usb_ids: &'static [(u16, u16)],
    pub scan_type: ScanType,
    pub kind: DriverKind,
    pub caps: DriverCaps,
}

impl DriverInfo {
    pub fn caps(&self) -> DriverCaps {
        self.caps
    }

    pub fn supports(&self, cap: DriverCaps) -> bool {
        self.caps.supports(cap)
    }

    pub fn matches_usb_id(&self, vendor: u16, product: u16) -> bool {
        self.usb_ids.iter().any(|&(v, p)| v == vendor && p == product)
    }
}

/// Imaging sub-state (§3's IS), an axis orthogonal to the high-level device
/// state, owned by the orchestrator and handed to the driver at
/// `activate`/`change_state` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagingSubState {
    Inactive,
    AwaitFingerOn,
    Capture,
    AwaitFingerOff,
}

/// Callbacks the core exposes back to an imaging driver (§4.6). Held by the
/// `DeviceHandle` for the duration of one enroll/verify/identify/capture
/// operation; `finger_on`/`image_captured`/`abort_scan`/`session_error` are
/// exposed as inherent methods on `DeviceHandle` itself so the driver calls
/// `dev.image_captured(img)` rather than reaching into this struct, which
/// lets the handle enforce the alternation/one-image invariants in §8
/// before forwarding to the caller.
pub struct ImagingSink {
    pub on_finger: Box<dyn FnMut(bool)>,
    pub on_image: Box<dyn FnMut(Image)>,
    pub on_abort: Box<dyn FnMut(RetryHint)>,
    pub on_error: Box<dyn FnMut(Error)>,
}

/// What a concrete imaging driver provides (§4.6).
pub trait ImagingDriver {
    fn info(&self) -> &DriverInfo;

    fn open(&self, dev: &Dev, on_complete: Box<dyn FnOnce(Result<()>)>);
    fn close(&self, dev: &Dev, on_complete: Box<dyn FnOnce()>);

    /// Begins imaging. `initial` is always `AwaitFingerOn` per §4.5 step 1.
    fn activate(&self, dev: &Dev, initial: ImagingSubState, on_complete: Box<dyn FnOnce(Result<()>)>);

    fn deactivate(&self, dev: &Dev, on_complete: Box<dyn FnOnce()>);

    /// Hint delivered between frames once the orchestrator's 10ms debounce
    /// timer (§4.5, §9) fires.
    fn change_state(&self, dev: &Dev, new_state: ImagingSubState);
}

/// What a concrete primitive (on-chip matching) driver provides — the
/// alternate surface of §4.6. The state model (`S`) is identical to
/// imaging drivers; only the intermediate work differs, so there is no
/// `IS` axis here and no frame assembly.
pub trait PrimitiveDriver {
    fn info(&self) -> &DriverInfo;

    fn open(&self, dev: &Dev, on_complete: Box<dyn FnOnce(Result<()>)>);
    fn close(&self, dev: &Dev, on_complete: Box<dyn FnOnce()>);

    fn enroll_start(&self, dev: &Dev, on_complete: Box<dyn FnOnce(Result<()>)>);
    fn enroll_stop(&self, dev: &Dev, on_complete: Box<dyn FnOnce()>);

    fn verify_start(&self, dev: &Dev, on_result: Box<dyn FnOnce(Result<VerifyResult>)>);
    fn verify_stop(&self, dev: &Dev, on_complete: Box<dyn FnOnce()>);

    fn identify_start(&self, dev: &Dev, on_result: Box<dyn FnOnce(Result<IdentifyResult>)>);
    fn identify_stop(&self, dev: &Dev, on_complete: Box<dyn FnOnce()>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_union_supports_each_member() {
        let caps = DriverCaps::SUPPORTS_ENROLL | DriverCaps::SUPPORTS_IDENTIFY;
        assert!(caps.supports(DriverCaps::SUPPORTS_ENROLL));
        assert!(caps.supports(DriverCaps::SUPPORTS_IDENTIFY));
        assert!(!caps.supports(DriverCaps::SUPPORTS_VERIFY));
        assert!(!caps.supports(DriverCaps::SUPPORTS_CAPTURE));
    }

    #[test]
    fn none_supports_nothing() {
        assert!(!DriverCaps::NONE.supports(DriverCaps::SUPPORTS_ENROLL));
    }
}
