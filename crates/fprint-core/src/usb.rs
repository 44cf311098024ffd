//! USB transfer adapter (§4.2). `fprint-core` never talks to a kernel driver
//! directly — it defines the `UsbTransport` boundary a concrete backend
//! (e.g. `fprint-usb`, built on `rusb`) implements, and a `MockTransport`
//! used by driver unit tests and by this crate's own orchestrator tests.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Bulk,
    Interrupt,
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Cancelled,
    TimedOut,
    Stall,
    OtherError,
}

/// One pending (or just-completed) USB I/O, per §3's Transfer (T) entity.
/// The adapter owns `buffer` until the completion callback fires; by the
/// time a driver's callback runs, ownership has moved back into the
/// callback argument.
pub struct Transfer {
    pub endpoint: u8,
    pub direction: Direction,
    pub kind: TransferKind,
    pub buffer: Vec<u8>,
    pub requested_length: usize,
    pub timeout: Duration,
}

/// Outcome handed to a transfer's completion callback.
pub struct Completion {
    pub status: TransferStatus,
    pub actual_length: usize,
    pub buffer: Vec<u8>,
}

impl Completion {
    /// A `Completed` status with `actual_length < requested` is a protocol
    /// error in every driver's eyes (§4.2); this helper centralizes that
    /// check rather than re-deriving it in each driver.
    pub fn short_transfer(&self, requested: usize) -> bool {
        self.status == TransferStatus::Completed && self.actual_length < requested
    }
}

/// Handle to a transfer that has been submitted but has not completed yet.
/// Backends hand these out from `submit` and accept them back in `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(pub u64);

/// The boundary `fprint-core` requires of a USB backend. Only one transfer
/// may be outstanding per (device, endpoint) at a time; backends are not
/// required to enforce this themselves because every driver in this
/// workspace already does so by construction (§4.2).
pub trait UsbTransport {
    /// Submits a transfer. `on_complete` is invoked exactly once, from the
    /// same thread that drives the event loop, once the transfer finishes,
    /// times out, or is cancelled.
    fn submit(
        &mut self,
        transfer: Transfer,
        on_complete: Box<dyn FnOnce(Completion)>,
    ) -> TransferId;

    /// Requests cancellation of an in-flight transfer. The completion
    /// callback still fires, with `TransferStatus::Cancelled`, from the
    /// normal event-loop dispatch path — cancellation is never synchronous.
    fn cancel(&mut self, id: TransferId);
}

/// In-memory transport for driver unit tests, exported (not `cfg(test)`-gated)
/// so downstream driver crates can exercise their SSMs without real hardware.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;

    struct Pending {
        id: TransferId,
        cb: Box<dyn FnOnce(Completion)>,
        requested_length: usize,
    }

    /// A fully synchronous, in-memory transport for tests: `submit` queues
    /// the transfer, and the test drives completion explicitly via
    /// `complete_next` or `cancel`. This mirrors how the teacher's
    /// `openasio` drivers are exercised: the host supplies a fake callback
    /// plumbing and steps it by hand rather than needing real hardware.
    #[derive(Default)]
    pub struct MockTransport {
        queue: VecDeque<Pending>,
        next_id: u64,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn pending_count(&self) -> usize {
            self.queue.len()
        }

        /// Completes the oldest still-pending transfer with `status` and
        /// `data` as the returned buffer contents.
        pub fn complete_next(&mut self, status: TransferStatus, data: Vec<u8>) {
            if let Some(p) = self.queue.pop_front() {
                let actual_length = data.len();
                (p.cb)(Completion {
                    status,
                    actual_length,
                    buffer: data,
                });
            }
        }
    }

    impl UsbTransport for MockTransport {
        fn submit(
            &mut self,
            transfer: Transfer,
            on_complete: Box<dyn FnOnce(Completion)>,
        ) -> TransferId {
            let id = TransferId(self.next_id);
            self.next_id += 1;
            let requested_length = transfer.requested_length;
            self.queue.push_back(Pending {
                id,
                cb: on_complete,
                requested_length,
            });
            id
        }

        fn cancel(&mut self, id: TransferId) {
            // In the real loop cancellation still completes asynchronously
            // from the normal dispatch path; the mock fires immediately
            // since tests only care that it eventually happens with
            // `Cancelled` status.
            if let Some(pos) = self.queue.iter().position(|p| p.id == id) {
                let p = self.queue.remove(pos).unwrap();
                let len = p.requested_length;
                (p.cb)(Completion {
                    status: TransferStatus::Cancelled,
                    actual_length: 0,
                    buffer: vec![0u8; len],
                });
            }
        }
    }

    #[cfg(test)]
    #[test]
    fn short_transfer_is_flagged() {
        let c = Completion {
            status: TransferStatus::Completed,
            actual_length: 3,
            buffer: vec![0; 3],
        };
        assert!(c.short_transfer(4));
        assert!(!c.short_transfer(3));
    }
}
