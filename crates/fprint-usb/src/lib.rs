//! Real-hardware `UsbTransport` backed by `rusb` (libusb). `rusb`'s bulk and
//! interrupt calls are blocking, so a submitted transfer is handed to a
//! dedicated worker thread — the same shape as the teacher's ALSA driver
//! running its I/O loop on its own thread — and the result is posted back
//! onto the core's event loop only once the main thread drains it, keeping
//! every `fprint-core` callback on the single thread that owns it (§5).

use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use fprint_core::event_loop::EventLoop;
use fprint_core::usb::{Completion, Direction, Transfer, TransferId, TransferKind, TransferStatus, UsbTransport};

struct Job {
    id: TransferId,
    endpoint_address: u8,
    kind: TransferKind,
    direction: Direction,
    buffer: Vec<u8>,
    timeout: Duration,
}

fn endpoint_address(endpoint: u8, direction: Direction) -> u8 {
    match direction {
        Direction::In => endpoint | 0x80,
        Direction::Out => endpoint & 0x7f,
    }
}

fn run_job(handle: &rusb::DeviceHandle<rusb::GlobalContext>, job: Job) -> Completion {
    let outcome = match (job.kind, job.direction) {
        (TransferKind::Bulk, Direction::In) => {
            let mut buf = job.buffer;
            handle
                .read_bulk(job.endpoint_address, &mut buf, job.timeout)
                .map(|n| (n, buf))
        }
        (TransferKind::Bulk, Direction::Out) => handle
            .write_bulk(job.endpoint_address, &job.buffer, job.timeout)
            .map(|n| (n, job.buffer)),
        (TransferKind::Interrupt, Direction::In) => {
            let mut buf = job.buffer;
            handle
                .read_interrupt(job.endpoint_address, &mut buf, job.timeout)
                .map(|n| (n, buf))
        }
        (TransferKind::Interrupt, Direction::Out) => handle
            .write_interrupt(job.endpoint_address, &job.buffer, job.timeout)
            .map(|n| (n, job.buffer)),
        // Control transfers carry vendor-specific request/value/index bytes
        // that are per-driver data, not part of this core's design (§1).
        // Backends that need them build the request out-of-band and submit
        // it as a bulk/interrupt transfer against the control endpoint, or
        // extend `Transfer` in their own fork of this crate.
        (TransferKind::Control, _) => Err(rusb::Error::NotSupported),
    };

    match outcome {
        // A short transfer still reports `Completed`; `Completion::short_transfer`
        // is how callers detect the length mismatch (§4.2).
        Ok((actual_length, buffer)) => Completion {
            status: TransferStatus::Completed,
            actual_length,
            buffer,
        },
        Err(rusb::Error::Timeout) => Completion {
            status: TransferStatus::TimedOut,
            actual_length: 0,
            buffer: job.buffer,
        },
        Err(rusb::Error::Pipe) => Completion {
            status: TransferStatus::Stall,
            actual_length: 0,
            buffer: job.buffer,
        },
        Err(_) => Completion {
            status: TransferStatus::OtherError,
            actual_length: 0,
            buffer: job.buffer,
        },
    }
}

/// `UsbTransport` over a claimed `rusb` device handle.
pub struct RusbTransport {
    next_id: u64,
    to_worker: mpsc::Sender<Option<Job>>,
    from_worker: mpsc::Receiver<(TransferId, Completion)>,
    worker: Option<JoinHandle<()>>,
    pending: HashMap<TransferId, Box<dyn FnOnce(Completion)>>,
    cancelled: HashSet<TransferId>,
}

impl RusbTransport {
    pub fn new(handle: rusb::DeviceHandle<rusb::GlobalContext>) -> Self {
        let (to_worker, worker_rx) = mpsc::channel::<Option<Job>>();
        let (worker_tx, from_worker) = mpsc::channel();

        let worker = std::thread::spawn(move || {
            while let Ok(Some(job)) = worker_rx.recv() {
                let id = job.id;
                let completion = run_job(&handle, job);
                if worker_tx.send((id, completion)).is_err() {
                    break;
                }
            }
        });

        RusbTransport {
            next_id: 0,
            to_worker,
            from_worker,
            worker: Some(worker),
            pending: HashMap::new(),
            cancelled: HashSet::new(),
        }
    }

    /// Moves every completion the worker thread has finished onto `events`,
    /// so its callback runs on the thread that owns the device (§5). Call
    /// this once per pump, the way `Library::pump` drives the core's own
    /// event loop.
    pub fn drain_into(&mut self, events: &mut EventLoop) {
        while let Ok((id, mut completion)) = self.from_worker.try_recv() {
            if self.cancelled.remove(&id) {
                completion.status = TransferStatus::Cancelled;
            }
            if let Some(cb) = self.pending.remove(&id) {
                events.post_completion(move || cb(completion));
            }
        }
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        let _ = self.to_worker.send(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl UsbTransport for RusbTransport {
    fn submit(&mut self, transfer: Transfer, on_complete: Box<dyn FnOnce(Completion)>) -> TransferId {
        let id = TransferId(self.next_id);
        self.next_id += 1;
        self.pending.insert(id, on_complete);

        let job = Job {
            id,
            endpoint_address: endpoint_address(transfer.endpoint, transfer.direction),
            kind: transfer.kind,
            direction: transfer.direction,
            buffer: transfer.buffer,
            timeout: transfer.timeout,
        };
        // A closed worker channel means the transport is being torn down;
        // the pending callback simply never fires, matching close()
        // cancelling every outstanding transfer for the device (§4.4).
        let _ = self.to_worker.send(Some(job));
        id
    }

    fn cancel(&mut self, id: TransferId) {
        self.cancelled.insert(id);
    }
}

#[cfg(test)]
mod tests {
    use super::endpoint_address;
    use fprint_core::usb::Direction;

    #[test]
    fn in_direction_sets_high_bit() {
        assert_eq!(endpoint_address(0x02, Direction::In), 0x82);
    }

    #[test]
    fn out_direction_clears_high_bit() {
        assert_eq!(endpoint_address(0x82, Direction::Out), 0x02);
    }
}
