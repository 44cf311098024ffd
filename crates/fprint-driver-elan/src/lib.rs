//! Driver for Elan-family USB swipe sensors. Unlike the AuthenTec family,
//! these sensors prefix each stripe with a two-byte signed `(dx, dy)` motion
//! hint relative to the previous stripe, so frames are stitched by
//! [`fprint_core::assembly::motion`] (Strategy B) onto a canvas wide enough
//! to absorb horizontal drift, rather than searched for vertical overlap.

use std::rc::Rc;
use std::time::Duration;

use fprint_core::assembly::{self, AssemblyPolicy, Stripe};
use fprint_core::driver::{Dev, DriverCaps, DriverInfo, DriverKind, ImagingDriver, ImagingSubState, ScanType};
use fprint_core::error::{Error, Result, RetryHint};
use fprint_core::image::Image;
use fprint_core::usb::{Completion, Direction, Transfer, TransferId, TransferKind, TransferStatus};

pub const VENDOR_ID: u16 = 0x04f3;
pub const PRODUCT_ID: u16 = 0x0c03;
pub const DEVTYPE: u32 = 0x0000_0c03;

const STRIPE_ENDPOINT: u8 = 0x02;
const FRAME_WIDTH: usize = 96;
const FRAME_HEIGHT: usize = 16;
const MOTION_HEADER_LEN: usize = 2;
const TRANSFER_LEN: usize = MOTION_HEADER_LEN + FRAME_WIDTH * FRAME_HEIGHT;
/// Canvas width handed to the motion assembler, wide enough to absorb a
/// swipe that drifts sideways by up to 32px in either direction.
const IMAGE_WIDTH: usize = FRAME_WIDTH + 64;
const STRIPE_TIMEOUT: Duration = Duration::from_millis(500);

const FINGER_PRESENT_MEAN: u32 = 128;

const POLICY: AssemblyPolicy = AssemblyPolicy {
    drop_last: 1,
    min_frames: 3,
    max_frames: 256,
};

#[derive(Default)]
struct ElanState {
    stripes: Vec<Stripe>,
    present: bool,
    draining: bool,
    stopped: bool,
    pending: Option<TransferId>,
}

pub struct ElanDriver {
    info: DriverInfo,
}

impl Default for ElanDriver {
    fn default() -> Self {
        ElanDriver {
            info: DriverInfo {
                id: 0x0e1a,
                name: "elan0c03",
                full_name: "Elan 0C03",
                usb_ids: &[(VENDOR_ID, PRODUCT_ID)],
                scan_type: ScanType::Swipe,
                kind: DriverKind::Imaging,
                caps: DriverCaps::SUPPORTS_CAPTURE | DriverCaps::SUPPORTS_ENROLL | DriverCaps::SUPPORTS_VERIFY,
            },
        }
    }
}

pub fn create_driver() -> Rc<dyn ImagingDriver> {
    Rc::new(ElanDriver::default())
}

/// Splits a raw transfer buffer into its `(dx, dy)` motion header and pixel
/// payload. Returns `None` if the buffer is shorter than the header, which
/// `handle_stripe` treats as a protocol error.
fn split_motion_header(buf: &[u8]) -> Option<(i32, i32, &[u8])> {
    if buf.len() < MOTION_HEADER_LEN {
        return None;
    }
    let dx = buf[0] as i8 as i32;
    let dy = buf[1] as i8 as i32;
    Some((dx, dy, &buf[MOTION_HEADER_LEN..]))
}

fn mean_intensity(buf: &[u8]) -> u32 {
    if buf.is_empty() {
        return u32::MAX;
    }
    buf.iter().map(|&b| b as u32).sum::<u32>() / buf.len() as u32
}

fn submit_next_stripe(dev: Dev) {
    let buffer = vec![0u8; TRANSFER_LEN];
    let dev_cb = dev.clone();
    let id = dev.borrow_mut().submit(
        Transfer {
            endpoint: STRIPE_ENDPOINT,
            direction: Direction::In,
            kind: TransferKind::Bulk,
            buffer,
            requested_length: TRANSFER_LEN,
            timeout: STRIPE_TIMEOUT,
        },
        Box::new(move |completion| handle_stripe(dev_cb, completion)),
    );
    if let Some(state) = dev.borrow_mut().instance_data_mut::<ElanState>() {
        state.pending = Some(id);
    }
}

fn assemble_now(stripes: Vec<Stripe>) -> std::result::Result<Image, Option<RetryHint>> {
    match assembly::motion::assemble(&stripes, FRAME_WIDTH, FRAME_HEIGHT, IMAGE_WIDTH, &POLICY) {
        Ok(img) => Ok(img),
        Err(Error::RetryScan(hint)) => Err(Some(hint)),
        Err(_) => Err(None),
    }
}

fn handle_stripe(dev: Dev, completion: Completion) {
    if dev.borrow().instance_data::<ElanState>().map_or(true, |s| s.stopped) {
        return;
    }
    if completion.status != TransferStatus::Completed || completion.short_transfer(TRANSFER_LEN) {
        log::warn!("elan0c03: stripe read failed: {:?}", completion.status);
        dev.borrow_mut().session_error(Error::Io("stripe read failed".into()));
        return;
    }
    let Some((dx, dy, pixels)) = split_motion_header(&completion.buffer) else {
        dev.borrow_mut().session_error(Error::protocol("stripe shorter than motion header"));
        return;
    };

    let mean = mean_intensity(pixels);
    let present_now = mean < FINGER_PRESENT_MEAN;
    let stripe = Stripe::with_motion(pixels.to_vec(), dx, dy);

    let mut d = dev.borrow_mut();
    let was_present = d.instance_data::<ElanState>().expect("activate sets instance data").present;

    if present_now && !was_present {
        log::debug!("elan0c03: finger landed");
        if let Some(state) = d.instance_data_mut::<ElanState>() {
            state.stripes.clear();
            state.draining = false;
        }
        d.finger_on(true);
    }

    let mut capped: Option<Vec<Stripe>> = None;
    if present_now {
        if let Some(state) = d.instance_data_mut::<ElanState>() {
            if !state.draining {
                state.stripes.push(stripe);
                if assembly::cap_to_max_frames(&mut state.stripes, &POLICY) {
                    state.draining = true;
                    capped = Some(std::mem::take(&mut state.stripes));
                }
            }
        }
    }
    if let Some(stripes) = capped {
        log::debug!("elan0c03: max_frames reached, assembling early");
        match assemble_now(stripes) {
            Ok(img) => d.image_captured(img),
            Err(Some(hint)) => d.abort_scan(hint),
            Err(None) => d.session_error(Error::protocol("frame assembly failed")),
        }
    }

    if !present_now && was_present {
        log::debug!("elan0c03: finger lifted");
        let stripes = d.instance_data_mut::<ElanState>().map(|s| std::mem::take(&mut s.stripes));
        if let Some(stripes) = stripes {
            if !stripes.is_empty() {
                match assemble_now(stripes) {
                    Ok(img) => d.image_captured(img),
                    Err(Some(hint)) => d.abort_scan(hint),
                    Err(None) => d.session_error(Error::protocol("frame assembly failed")),
                }
            }
        }
        if let Some(state) = d.instance_data_mut::<ElanState>() {
            state.draining = false;
        }
        d.finger_on(false);
    }

    if let Some(state) = d.instance_data_mut::<ElanState>() {
        state.present = present_now;
    }
    drop(d);
    submit_next_stripe(dev);
}

impl ImagingDriver for ElanDriver {
    fn info(&self) -> &DriverInfo {
        &self.info
    }

    fn open(&self, dev: &Dev, on_complete: Box<dyn FnOnce(Result<()>)>) {
        log::debug!("elan0c03: open, probing device");
        dev.borrow_mut().submit(
            Transfer {
                endpoint: STRIPE_ENDPOINT,
                direction: Direction::In,
                kind: TransferKind::Bulk,
                buffer: vec![0u8; TRANSFER_LEN],
                requested_length: TRANSFER_LEN,
                timeout: STRIPE_TIMEOUT,
            },
            Box::new(move |completion| {
                let result = if completion.status == TransferStatus::Completed {
                    Ok(())
                } else {
                    Err(Error::Io(format!("device probe failed: {:?}", completion.status)))
                };
                on_complete(result);
            }),
        );
    }

    fn close(&self, dev: &Dev, on_complete: Box<dyn FnOnce()>) {
        dev.borrow_mut().clear_instance_data();
        on_complete();
    }

    fn activate(&self, dev: &Dev, _initial: ImagingSubState, on_complete: Box<dyn FnOnce(Result<()>)>) {
        dev.borrow_mut().set_instance_data(ElanState::default());
        submit_next_stripe(dev.clone());
        on_complete(Ok(()));
    }

    fn deactivate(&self, dev: &Dev, on_complete: Box<dyn FnOnce()>) {
        let pending = {
            let mut d = dev.borrow_mut();
            d.instance_data_mut::<ElanState>().and_then(|s| {
                s.stopped = true;
                s.pending.take()
            })
        };
        if let Some(id) = pending {
            dev.borrow_mut().cancel_transfer(id);
        }
        on_complete();
    }

    fn change_state(&self, _dev: &Dev, new_state: ImagingSubState) {
        log::trace!("elan0c03: change_state({:?})", new_state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fprint_core::device::DeviceHandle;
    use fprint_core::driver::ImagingSink;
    use fprint_core::event_loop::EventLoop;
    use fprint_core::usb::mock::MockTransport;
    use std::cell::{Cell, RefCell};

    fn stripe_transfer(mean: u8, dx: i8, dy: i8) -> Completion {
        let mut buf = Vec::with_capacity(TRANSFER_LEN);
        buf.push(dx as u8);
        buf.push(dy as u8);
        buf.extend(std::iter::repeat(mean).take(FRAME_WIDTH * FRAME_HEIGHT));
        Completion {
            status: TransferStatus::Completed,
            actual_length: buf.len(),
            buffer: buf,
        }
    }

    fn dev_with_sink() -> (Dev, Rc<Cell<bool>>, Rc<RefCell<Vec<Image>>>) {
        let dev: Dev = Rc::new(RefCell::new(DeviceHandle::new(
            1,
            DEVTYPE,
            Box::new(MockTransport::new()),
            Rc::new(RefCell::new(EventLoop::new())),
        )));
        dev.borrow_mut().set_instance_data(ElanState::default());

        let finger_seen = Rc::new(Cell::new(false));
        let images = Rc::new(RefCell::new(Vec::new()));

        let f1 = finger_seen.clone();
        let imgs = images.clone();
        dev.borrow_mut().set_sink(ImagingSink {
            on_finger: Box::new(move |present| f1.set(present)),
            on_image: Box::new(move |img| imgs.borrow_mut().push(img)),
            on_abort: Box::new(|_| {}),
            on_error: Box::new(|_| {}),
        });
        (dev, finger_seen, images)
    }

    #[test]
    fn split_motion_header_separates_deltas_from_pixels() {
        let buf = [5u8, 251u8, 1, 2, 3];
        let (dx, dy, pixels) = split_motion_header(&buf).unwrap();
        assert_eq!((dx, dy), (5, -5));
        assert_eq!(pixels, &[1, 2, 3]);
    }

    #[test]
    fn too_short_buffer_has_no_motion_header() {
        assert!(split_motion_header(&[1u8]).is_none());
    }

    #[test]
    fn drifting_swipe_assembles_on_lift() {
        let (dev, finger_seen, images) = dev_with_sink();

        handle_stripe(dev.clone(), stripe_transfer(10, 0, 0));
        handle_stripe(dev.clone(), stripe_transfer(10, 2, 1));
        handle_stripe(dev.clone(), stripe_transfer(10, -1, 2));
        handle_stripe(dev.clone(), stripe_transfer(10, 1, 0));
        assert!(finger_seen.get());
        assert!(images.borrow().is_empty());

        handle_stripe(dev.clone(), stripe_transfer(240, 0, 0));
        assert!(!finger_seen.get());
        assert_eq!(images.borrow().len(), 1);
        assert_eq!(images.borrow()[0].width, IMAGE_WIDTH);
    }

    #[test]
    fn short_swipe_aborts_without_an_image() {
        let (dev, _finger_seen, images) = dev_with_sink();
        let aborted = Rc::new(Cell::new(false));
        let a = aborted.clone();
        dev.borrow_mut().set_sink(ImagingSink {
            on_finger: Box::new(|_| {}),
            on_image: Box::new(|_| {}),
            on_abort: Box::new(move |_| a.set(true)),
            on_error: Box::new(|_| {}),
        });

        handle_stripe(dev.clone(), stripe_transfer(10, 0, 0));
        handle_stripe(dev.clone(), stripe_transfer(240, 0, 0));

        assert!(images.borrow().is_empty());
        assert!(aborted.get());
    }
}
