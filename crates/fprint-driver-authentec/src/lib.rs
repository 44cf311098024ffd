//! Driver for AuthenTec AES-family USB swipe sensors (e.g. AES2810). Frames
//! arrive as small horizontal stripes read back-to-back off one bulk IN
//! endpoint; this driver classifies each stripe as finger-present or
//! finger-absent by its mean brightness and hands the accumulated run to
//! [`fprint_core::assembly::overlap`] (Strategy A) once the swipe ends.

use std::rc::Rc;
use std::time::Duration;

use fprint_core::assembly::{self, AssemblyPolicy, Stripe};
use fprint_core::driver::{Dev, DriverCaps, DriverInfo, DriverKind, ImagingDriver, ImagingSubState, ScanType};
use fprint_core::error::{Error, Result, RetryHint};
use fprint_core::image::Image;
use fprint_core::usb::{Completion, Direction, Transfer, TransferId, TransferKind, TransferStatus};

pub const VENDOR_ID: u16 = 0x08ff;
pub const PRODUCT_ID: u16 = 0x2810;
/// `devtype` for the only sub-model this driver currently targets; other
/// AES27xx/28xx variants would get their own devtype once their frame
/// geometry is known.
pub const DEVTYPE: u32 = 0x0000_2580;

const STRIPE_ENDPOINT: u8 = 0x01;
const FRAME_WIDTH: usize = 128;
const FRAME_HEIGHT: usize = 8;
const FRAME_SIZE: usize = FRAME_WIDTH * FRAME_HEIGHT;
const STRIPE_TIMEOUT: Duration = Duration::from_millis(500);

/// Below this mean pixel value a stripe is classed as finger-present — AES
/// sensors read darker once ridge contact displaces the idle reflectance.
const FINGER_PRESENT_MEAN: u32 = 128;

const POLICY: AssemblyPolicy = AssemblyPolicy {
    drop_last: 1,
    min_frames: 3,
    max_frames: 200,
};

#[derive(Default)]
struct AesState {
    stripes: Vec<Stripe>,
    present: bool,
    /// Set once a scan has already produced an image (via the `max_frames`
    /// cap) so further stripes before the physical lift are ignored rather
    /// than starting a second image in the same `finger_on` window.
    draining: bool,
    stopped: bool,
    pending: Option<TransferId>,
}

pub struct AuthentecDriver {
    info: DriverInfo,
}

impl Default for AuthentecDriver {
    fn default() -> Self {
        AuthentecDriver {
            info: DriverInfo {
                id: 0x0a51,
                name: "aes2810",
                full_name: "AuthenTec AES2810",
                usb_ids: &[(VENDOR_ID, PRODUCT_ID)],
                scan_type: ScanType::Swipe,
                kind: DriverKind::Imaging,
                caps: DriverCaps::SUPPORTS_CAPTURE
                    | DriverCaps::SUPPORTS_ENROLL
                    | DriverCaps::SUPPORTS_VERIFY
                    | DriverCaps::SUPPORTS_IDENTIFY,
            },
        }
    }
}

/// Analogue of the teacher's `openasio_driver_create` factory, minus the FFI
/// boundary: drivers here are linked into the workspace, not `dlopen`ed, so
/// the constructor just returns a ready-to-register `Rc`.
pub fn create_driver() -> Rc<dyn ImagingDriver> {
    Rc::new(AuthentecDriver::default())
}

fn mean_intensity(buf: &[u8]) -> u32 {
    if buf.is_empty() {
        return u32::MAX;
    }
    buf.iter().map(|&b| b as u32).sum::<u32>() / buf.len() as u32
}

fn submit_next_stripe(dev: Dev) {
    let buffer = vec![0u8; FRAME_SIZE];
    let dev_cb = dev.clone();
    let id = dev.borrow_mut().submit(
        Transfer {
            endpoint: STRIPE_ENDPOINT,
            direction: Direction::In,
            kind: TransferKind::Bulk,
            buffer,
            requested_length: FRAME_SIZE,
            timeout: STRIPE_TIMEOUT,
        },
        Box::new(move |completion| handle_stripe(dev_cb, completion)),
    );
    if let Some(state) = dev.borrow_mut().instance_data_mut::<AesState>() {
        state.pending = Some(id);
    }
}

fn assemble_now(stripes: Vec<Stripe>) -> std::result::Result<Image, Option<RetryHint>> {
    match assembly::overlap::assemble_or_retry(&stripes, FRAME_WIDTH, FRAME_HEIGHT, &POLICY) {
        Ok(img) => Ok(img),
        Err(Error::RetryScan(hint)) => Err(Some(hint)),
        Err(_) => Err(None),
    }
}

fn handle_stripe(dev: Dev, completion: Completion) {
    if dev.borrow().instance_data::<AesState>().map_or(true, |s| s.stopped) {
        return;
    }
    if completion.status != TransferStatus::Completed || completion.short_transfer(FRAME_SIZE) {
        log::warn!("aes2810: stripe read failed: {:?}", completion.status);
        dev.borrow_mut().session_error(Error::Io("stripe read failed".into()));
        return;
    }

    let mean = mean_intensity(&completion.buffer);
    let present_now = mean < FINGER_PRESENT_MEAN;

    let mut d = dev.borrow_mut();
    let was_present = d.instance_data::<AesState>().expect("activate sets instance data").present;

    if present_now && !was_present {
        log::debug!("aes2810: finger landed");
        if let Some(state) = d.instance_data_mut::<AesState>() {
            state.stripes.clear();
            state.draining = false;
        }
        d.finger_on(true);
    }

    let mut capped: Option<Vec<Stripe>> = None;
    if present_now {
        if let Some(state) = d.instance_data_mut::<AesState>() {
            if !state.draining {
                state.stripes.push(Stripe::new(completion.buffer));
                if assembly::cap_to_max_frames(&mut state.stripes, &POLICY) {
                    state.draining = true;
                    capped = Some(std::mem::take(&mut state.stripes));
                }
            }
        }
    }
    if let Some(stripes) = capped {
        log::debug!("aes2810: max_frames reached, assembling early");
        match assemble_now(stripes) {
            Ok(img) => d.image_captured(img),
            Err(Some(hint)) => d.abort_scan(hint),
            Err(None) => d.session_error(Error::protocol("frame assembly failed")),
        }
    }

    if !present_now && was_present {
        log::debug!("aes2810: finger lifted");
        let stripes = d.instance_data_mut::<AesState>().map(|s| std::mem::take(&mut s.stripes));
        if let Some(stripes) = stripes {
            if !stripes.is_empty() {
                match assemble_now(stripes) {
                    Ok(img) => d.image_captured(img),
                    Err(Some(hint)) => d.abort_scan(hint),
                    Err(None) => d.session_error(Error::protocol("frame assembly failed")),
                }
            }
        }
        if let Some(state) = d.instance_data_mut::<AesState>() {
            state.draining = false;
        }
        d.finger_on(false);
    }

    if let Some(state) = d.instance_data_mut::<AesState>() {
        state.present = present_now;
    }
    drop(d);
    submit_next_stripe(dev);
}

impl ImagingDriver for AuthentecDriver {
    fn info(&self) -> &DriverInfo {
        &self.info
    }

    fn open(&self, dev: &Dev, on_complete: Box<dyn FnOnce(Result<()>)>) {
        log::debug!("aes2810: open, probing device");
        dev.borrow_mut().submit(
            Transfer {
                endpoint: STRIPE_ENDPOINT,
                direction: Direction::In,
                kind: TransferKind::Bulk,
                buffer: vec![0u8; FRAME_SIZE],
                requested_length: FRAME_SIZE,
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
        dev.borrow_mut().set_instance_data(AesState::default());
        submit_next_stripe(dev.clone());
        on_complete(Ok(()));
    }

    fn deactivate(&self, dev: &Dev, on_complete: Box<dyn FnOnce()>) {
        let pending = {
            let mut d = dev.borrow_mut();
            d.instance_data_mut::<AesState>().and_then(|s| {
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
        log::trace!("aes2810: change_state({:?})", new_state);
    }
}
