//! Driver for Validity VFS-family USB sensors. Unlike the swipe-sensor
//! drivers, these chips match fingerprints on-chip: the host only issues a
//! command opcode and reads back a short status reply, never raw pixel
//! stripes, so there is no frame assembly here at all — this is the
//! `PrimitiveDriver` alternate surface of §4.6.
//!
//! Every operation follows the same two-step shape: a one-byte command is
//! written to the command endpoint, then a short status reply is read back
//! from the response endpoint. `send_command` captures that shape once;
//! each operation differs only in which opcode it sends and how it
//! interprets the reply. Each operation also runs behind its own single-state
//! `SsmArena` handle: the enroll sequence's `ENROLL_CONTINUE` retry is
//! expressed as a `jump_to_state` loop rather than an ad-hoc recursive call,
//! per §9's guidance on re-expressing goto-style retry loops as explicit SSM
//! states. The handler itself stays a no-op — submitting the next transfer
//! from inside a dispatched handler would mean re-entering this device's
//! `RefCell` while the arena borrow from `ssm()` is still live — so the
//! actual resubmission happens in the driver's own completion closures,
//! with the arena used purely for the sequencing bookkeeping and the
//! exactly-one-completion invariant.

use std::rc::Rc;
use std::time::Duration;

use fprint_core::driver::{Dev, DriverCaps, DriverInfo, DriverKind, PrimitiveDriver};
use fprint_core::error::{Error, IdentifyResult, Result, VerifyResult};
use fprint_core::ssm::SsmHandle;
use fprint_core::usb::{Completion, Direction, Transfer, TransferId, TransferKind, TransferStatus};

pub const VENDOR_ID: u16 = 0x138a;
pub const PRODUCT_ID: u16 = 0x0011;
pub const DEVTYPE: u32 = 0x0000_0011;

const CMD_ENDPOINT: u8 = 0x01;
const REPLY_ENDPOINT: u8 = 0x02;
const CMD_TIMEOUT: Duration = Duration::from_millis(1000);

const OP_PROBE: u8 = 0x00;
const OP_ENROLL_STEP: u8 = 0x10;
const OP_VERIFY: u8 = 0x20;
const OP_IDENTIFY: u8 = 0x21;

const REPLY_LEN: usize = 2;

/// Reply status byte for an enroll step.
const ENROLL_CONTINUE: u8 = 0;
const ENROLL_DONE: u8 = 1;
const ENROLL_FAILED: u8 = 2;

/// Reply status byte for verify/identify.
const MATCH_NONE: u8 = 0;
const MATCH_FOUND: u8 = 1;

/// On-chip enrollment takes this many successful touches before the chip
/// reports `ENROLL_DONE`.
const ENROLL_STAGES: u8 = 4;

/// Arbitrary non-zero SSM error codes; the completion callbacks are no-ops,
/// so nothing downstream interprets these beyond "not zero" — the actual
/// error detail travels through the ordinary `Result`/`on_result` channel.
const SSM_ERR_TRANSPORT: u32 = 1;
const SSM_ERR_PROTOCOL: u32 = 2;

#[derive(Default)]
struct VfsState {
    stopped: bool,
    pending: Option<TransferId>,
    enroll_stage: u8,
    /// The single in-flight operation's SSM handle, if any. At most one of
    /// enroll/verify/identify ever runs at a time on a primitive driver.
    active_ssm: Option<SsmHandle>,
}

pub struct VfsDriver {
    info: DriverInfo,
}

impl Default for VfsDriver {
    fn default() -> Self {
        VfsDriver {
            info: DriverInfo {
                id: 0x0451,
                name: "vfs5011",
                full_name: "Validity VFS5011",
                usb_ids: &[(VENDOR_ID, PRODUCT_ID)],
                scan_type: fprint_core::driver::ScanType::Press,
                kind: DriverKind::Primitive,
                caps: DriverCaps::SUPPORTS_ENROLL | DriverCaps::SUPPORTS_VERIFY | DriverCaps::SUPPORTS_IDENTIFY,
            },
        }
    }
}

pub fn create_driver() -> Rc<dyn PrimitiveDriver> {
    Rc::new(VfsDriver::default())
}

fn is_stopped(dev: &Dev) -> bool {
    dev.borrow().instance_data::<VfsState>().map_or(true, |s| s.stopped)
}

/// Creates and starts a fresh one-state SSM for a single command/response
/// round trip (or, for enrollment, a looping sequence of them), and records
/// its handle on the instance data. The handler and completion callback are
/// both no-ops; see the module doc comment for why.
fn begin_ssm(dev: &Dev) -> SsmHandle {
    let handle = dev.borrow_mut().ssm().create(1, Box::new(|_arena, _h| {}));
    dev.borrow_mut().ssm().start(handle, Box::new(|_arena, _h, _error| {}));
    if let Some(state) = dev.borrow_mut().instance_data_mut::<VfsState>() {
        state.active_ssm = Some(handle);
    }
    handle
}

/// Writes `opcode` to the command endpoint, then reads a `REPLY_LEN`-byte
/// status reply and hands it to `on_reply`. The write's own completion is
/// only checked for transport failure; the opcode byte itself carries no
/// response, the chip always replies on the separate IN endpoint.
fn send_command(dev: Dev, opcode: u8, on_reply: Box<dyn FnOnce(Dev, Completion)>) {
    let dev_cb = dev.clone();
    let id = dev.borrow_mut().submit(
        Transfer {
            endpoint: CMD_ENDPOINT,
            direction: Direction::Out,
            kind: TransferKind::Bulk,
            buffer: vec![opcode],
            requested_length: 1,
            timeout: CMD_TIMEOUT,
        },
        Box::new(move |write_completion| {
            if write_completion.status != TransferStatus::Completed {
                log::warn!("vfs5011: command write failed: {:?}", write_completion.status);
                dev_cb.borrow_mut().session_error(Error::Io("command write failed".into()));
                return;
            }
            let reply_dev = dev_cb.clone();
            let reply_id = dev_cb.borrow_mut().submit(
                Transfer {
                    endpoint: REPLY_ENDPOINT,
                    direction: Direction::In,
                    kind: TransferKind::Bulk,
                    buffer: vec![0u8; REPLY_LEN],
                    requested_length: REPLY_LEN,
                    timeout: CMD_TIMEOUT,
                },
                Box::new(move |reply_completion| on_reply(reply_dev, reply_completion)),
            );
            if let Some(state) = dev_cb.borrow_mut().instance_data_mut::<VfsState>() {
                state.pending = Some(reply_id);
            }
        }),
    );
    if let Some(state) = dev.borrow_mut().instance_data_mut::<VfsState>() {
        state.pending = Some(id);
    }
}

/// Finalizes `handle` (completed or failed, only for the arena's own
/// bookkeeping) and frees its slot. Called from every terminal branch of a
/// reply handler.
fn finish_ssm(dev: &Dev, handle: SsmHandle, error: u32) {
    if error == 0 {
        dev.borrow_mut().ssm().mark_completed(handle);
    } else {
        dev.borrow_mut().ssm().mark_failed(handle, error);
    }
    dev.borrow_mut().ssm().free(handle);
    if let Some(state) = dev.borrow_mut().instance_data_mut::<VfsState>() {
        state.active_ssm = None;
    }
}

fn handle_enroll_reply(
    dev: Dev,
    completion: Completion,
    handle: SsmHandle,
    on_complete: Box<dyn FnOnce(Result<()>)>,
) {
    if is_stopped(&dev) {
        return;
    }
    if completion.status != TransferStatus::Completed || completion.short_transfer(REPLY_LEN) {
        log::warn!("vfs5011: enroll reply failed: {:?}", completion.status);
        finish_ssm(&dev, handle, SSM_ERR_TRANSPORT);
        on_complete(Err(Error::Io("enroll reply failed".into())));
        return;
    }
    match completion.buffer[0] {
        ENROLL_DONE => {
            log::debug!("vfs5011: enrollment complete");
            finish_ssm(&dev, handle, 0);
            on_complete(Ok(()));
        }
        ENROLL_CONTINUE => {
            if let Some(state) = dev.borrow_mut().instance_data_mut::<VfsState>() {
                state.enroll_stage += 1;
            }
            log::debug!("vfs5011: enroll stage {} accepted", completion.buffer[1]);
            dev.borrow_mut().ssm().jump_to_state(handle, 0);
            send_command(
                dev,
                OP_ENROLL_STEP,
                Box::new(move |d, c| handle_enroll_reply(d, c, handle, on_complete)),
            );
        }
        ENROLL_FAILED => {
            finish_ssm(&dev, handle, SSM_ERR_PROTOCOL);
            on_complete(Err(Error::protocol("enrollment rejected by sensor")));
        }
        other => {
            finish_ssm(&dev, handle, SSM_ERR_PROTOCOL);
            on_complete(Err(Error::protocol(format!("unexpected enroll status {other}"))));
        }
    }
}

fn handle_verify_reply(
    dev: Dev,
    completion: Completion,
    handle: SsmHandle,
    on_result: Box<dyn FnOnce(Result<VerifyResult>)>,
) {
    if is_stopped(&dev) {
        return;
    }
    if completion.status != TransferStatus::Completed || completion.short_transfer(REPLY_LEN) {
        log::warn!("vfs5011: verify reply failed: {:?}", completion.status);
        finish_ssm(&dev, handle, SSM_ERR_TRANSPORT);
        on_result(Err(Error::Io("verify reply failed".into())));
        return;
    }
    match completion.buffer[0] {
        MATCH_FOUND => {
            finish_ssm(&dev, handle, 0);
            on_result(Ok(VerifyResult::Match));
        }
        MATCH_NONE => {
            finish_ssm(&dev, handle, 0);
            on_result(Ok(VerifyResult::NoMatch));
        }
        other => {
            finish_ssm(&dev, handle, SSM_ERR_PROTOCOL);
            on_result(Err(Error::protocol(format!("unexpected verify status {other}"))));
        }
    }
}

fn handle_identify_reply(
    dev: Dev,
    completion: Completion,
    handle: SsmHandle,
    on_result: Box<dyn FnOnce(Result<IdentifyResult>)>,
) {
    if is_stopped(&dev) {
        return;
    }
    if completion.status != TransferStatus::Completed || completion.short_transfer(REPLY_LEN) {
        log::warn!("vfs5011: identify reply failed: {:?}", completion.status);
        finish_ssm(&dev, handle, SSM_ERR_TRANSPORT);
        on_result(Err(Error::Io("identify reply failed".into())));
        return;
    }
    match completion.buffer[0] {
        MATCH_FOUND => {
            finish_ssm(&dev, handle, 0);
            on_result(Ok(IdentifyResult::Match {
                finger_index: completion.buffer[1] as usize,
            }));
        }
        MATCH_NONE => {
            finish_ssm(&dev, handle, 0);
            on_result(Ok(IdentifyResult::NoMatch));
        }
        other => {
            finish_ssm(&dev, handle, SSM_ERR_PROTOCOL);
            on_result(Err(Error::protocol(format!("unexpected identify status {other}"))));
        }
    }
}

fn stop(dev: &Dev) {
    let (pending, ssm_handle) = {
        let mut d = dev.borrow_mut();
        match d.instance_data_mut::<VfsState>() {
            Some(s) => {
                s.stopped = true;
                (s.pending.take(), s.active_ssm.take())
            }
            None => (None, None),
        }
    };
    if let Some(id) = pending {
        dev.borrow_mut().cancel_transfer(id);
    }
    if let Some(handle) = ssm_handle {
        // Freed without marking complete/failed: a stopped operation never
        // resolves its caller's callback, matching the cancelled transfer.
        dev.borrow_mut().ssm().free(handle);
    }
}

impl PrimitiveDriver for VfsDriver {
    fn info(&self) -> &DriverInfo {
        &self.info
    }

    fn open(&self, dev: &Dev, on_complete: Box<dyn FnOnce(Result<()>)>) {
        log::debug!("vfs5011: open, probing device");
        dev.borrow_mut().set_instance_data(VfsState::default());
        let handle = begin_ssm(dev);
        send_command(
            dev.clone(),
            OP_PROBE,
            Box::new(move |d, completion| {
                let result = if completion.status == TransferStatus::Completed {
                    finish_ssm(&d, handle, 0);
                    Ok(())
                } else {
                    finish_ssm(&d, handle, SSM_ERR_TRANSPORT);
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

    fn enroll_start(&self, dev: &Dev, on_complete: Box<dyn FnOnce(Result<()>)>) {
        if let Some(state) = dev.borrow_mut().instance_data_mut::<VfsState>() {
            state.stopped = false;
            state.enroll_stage = 0;
        }
        let handle = begin_ssm(dev);
        send_command(
            dev.clone(),
            OP_ENROLL_STEP,
            Box::new(move |d, c| handle_enroll_reply(d, c, handle, on_complete)),
        );
    }

    fn enroll_stop(&self, dev: &Dev, on_complete: Box<dyn FnOnce()>) {
        stop(dev);
        on_complete();
    }

    fn verify_start(&self, dev: &Dev, on_result: Box<dyn FnOnce(Result<VerifyResult>)>) {
        if let Some(state) = dev.borrow_mut().instance_data_mut::<VfsState>() {
            state.stopped = false;
        }
        let handle = begin_ssm(dev);
        send_command(
            dev.clone(),
            OP_VERIFY,
            Box::new(move |d, c| handle_verify_reply(d, c, handle, on_result)),
        );
    }

    fn verify_stop(&self, dev: &Dev, on_complete: Box<dyn FnOnce()>) {
        stop(dev);
        on_complete();
    }

    fn identify_start(&self, dev: &Dev, on_result: Box<dyn FnOnce(Result<IdentifyResult>)>) {
        if let Some(state) = dev.borrow_mut().instance_data_mut::<VfsState>() {
            state.stopped = false;
        }
        let handle = begin_ssm(dev);
        send_command(
            dev.clone(),
            OP_IDENTIFY,
            Box::new(move |d, c| handle_identify_reply(d, c, handle, on_result)),
        );
    }

    fn identify_stop(&self, dev: &Dev, on_complete: Box<dyn FnOnce()>) {
        stop(dev);
        on_complete();
    }
}
