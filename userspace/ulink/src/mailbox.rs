// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Single-slot hardware mailbox model
//!
//! OWNERS: @runtime
//!
//! Each direction is one message register: a write fills it and raises the
//! peer's "message pending" interrupt, a read empties it. A second write
//! before the peer has consumed the first is refused with `Busy`; callers
//! that pass `Wait::Timeout` get a budgeted retry instead, and still see
//! `Busy` if the slot never drains.
//!
//! ERROR CONDITIONS:
//!   - IpcError::Busy: previous message not consumed yet
//!   - IpcError::Invalid: frame larger than MAILBOX_MAX_FRAME
//!   - IpcError::Disconnected: the opposite end was dropped

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sdrv_ipc::budget::{self, HostClock};
use sdrv_ipc::{IpcError, Result, Transport, Wait};
use sdrv_sync::Completion;

/// Largest frame (header included) one mailbox write can carry.
pub const MAILBOX_MAX_FRAME: usize = 516;

const RECHECK: Duration = Duration::from_millis(5);

#[derive(Default)]
struct MailboxSlot {
    message: Mutex<Option<Vec<u8>>>,
    pending: Completion,
    writes: AtomicU64,
}

/// Creates both ends of a mailbox link.
pub fn mailbox_pair() -> (MailboxTransport, MailboxTransport) {
    let a_to_b = Arc::new(MailboxSlot::default());
    let b_to_a = Arc::new(MailboxSlot::default());
    let a_alive = Arc::new(AtomicBool::new(true));
    let b_alive = Arc::new(AtomicBool::new(true));
    (
        MailboxTransport {
            tx: Arc::clone(&a_to_b),
            rx: Arc::clone(&b_to_a),
            alive: Arc::clone(&a_alive),
            peer_alive: Arc::clone(&b_alive),
        },
        MailboxTransport { tx: b_to_a, rx: a_to_b, alive: b_alive, peer_alive: a_alive },
    )
}

/// One end of a mailbox link.
pub struct MailboxTransport {
    tx: Arc<MailboxSlot>,
    rx: Arc<MailboxSlot>,
    alive: Arc<AtomicBool>,
    peer_alive: Arc<AtomicBool>,
}

impl MailboxTransport {
    fn try_send(&self, frame: &[u8]) -> Result<()> {
        if frame.len() > MAILBOX_MAX_FRAME {
            return Err(IpcError::Invalid("frame exceeds mailbox size"));
        }
        if !self.ready() {
            return Err(IpcError::Disconnected);
        }
        let mut message = self.tx.message.lock();
        if message.is_some() {
            return Err(IpcError::Busy);
        }
        *message = Some(frame.to_vec());
        self.tx.writes.fetch_add(1, Ordering::AcqRel);
        self.tx.pending.complete();
        Ok(())
    }

    fn try_recv(&self) -> Result<Vec<u8>> {
        match self.rx.message.lock().take() {
            Some(frame) => Ok(frame),
            None if !self.ready() => Err(IpcError::Disconnected),
            None => Err(IpcError::WouldBlock),
        }
    }

    /// Messages written by this end so far.
    pub fn writes(&self) -> u64 {
        self.tx.writes.load(Ordering::Acquire)
    }
}

impl Drop for MailboxTransport {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        // Wake a peer parked on our direction so it notices.
        self.tx.pending.complete();
    }
}

impl Transport for MailboxTransport {
    fn send(&self, frame: &[u8], wait: Wait) -> Result<()> {
        let clock = HostClock::new();
        match wait {
            Wait::NonBlocking => self.try_send(frame),
            Wait::Timeout(timeout) => budget::retry_budgeted(&clock, timeout, || self.try_send(frame)),
            Wait::Blocking => loop {
                match budget::retry_budgeted(&clock, RECHECK, || self.try_send(frame)) {
                    Err(IpcError::Busy) => continue,
                    other => break other,
                }
            },
        }
    }

    fn recv(&self, wait: Wait) -> Result<Vec<u8>> {
        let deadline = match wait {
            Wait::NonBlocking => return self.try_recv(),
            // Past the clock's range there is no deadline.
            Wait::Timeout(timeout) => Instant::now().checked_add(timeout),
            Wait::Blocking => None,
        };
        loop {
            match self.try_recv() {
                Err(IpcError::WouldBlock) => {}
                other => return other,
            }
            let slice = match deadline {
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(left) if !left.is_zero() => left.min(RECHECK),
                    _ => return Err(IpcError::Timeout),
                },
                None => RECHECK,
            };
            self.rx.pending.wait_timeout(slice);
        }
    }

    fn poll(&self) -> bool {
        self.rx.message.lock().is_some()
    }

    fn ready(&self) -> bool {
        self.peer_alive.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occupied_slot_is_busy() {
        let (a, b) = mailbox_pair();
        a.send(b"one", Wait::NonBlocking).unwrap();
        assert_eq!(a.send(b"two", Wait::NonBlocking), Err(IpcError::Busy));
        assert!(b.poll());
        assert_eq!(b.recv(Wait::NonBlocking).unwrap(), b"one");
        a.send(b"two", Wait::NonBlocking).unwrap();
        assert_eq!(a.writes(), 2);
    }

    #[test]
    fn contended_send_reports_busy_after_timeout() {
        let (a, _b) = mailbox_pair();
        a.send(b"one", Wait::NonBlocking).unwrap();
        let err = a.send(b"two", Wait::Timeout(Duration::from_millis(5))).unwrap_err();
        assert_eq!(err, IpcError::Busy);
        assert_eq!(err.errno(), -16);
    }

    #[test]
    fn unbounded_timeout_recv_waits_for_message() {
        let (a, b) = mailbox_pair();
        let reader = std::thread::spawn(move || b.recv(Wait::Timeout(Duration::MAX)));
        std::thread::sleep(Duration::from_millis(10));
        a.send(b"late", Wait::Blocking).unwrap();
        assert_eq!(reader.join().unwrap().unwrap(), b"late");
    }

    #[test]
    fn timeout_send_retries_until_drained() {
        let (a, b) = mailbox_pair();
        a.send(b"one", Wait::NonBlocking).unwrap();
        let reader = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            let first = b.recv(Wait::Blocking).unwrap();
            let second = b.recv(Wait::Timeout(Duration::from_secs(1))).unwrap();
            (first, second)
        });
        a.send(b"two", Wait::Timeout(Duration::from_secs(1))).unwrap();
        let (first, second) = reader.join().unwrap();
        assert_eq!(first, b"one");
        assert_eq!(second, b"two");
    }

    #[test]
    fn oversize_and_disconnect() {
        let (a, b) = mailbox_pair();
        assert_eq!(
            a.send(&[0; MAILBOX_MAX_FRAME + 1], Wait::NonBlocking),
            Err(IpcError::Invalid("frame exceeds mailbox size"))
        );
        assert_eq!(a.recv(Wait::Timeout(Duration::from_millis(5))), Err(IpcError::Timeout));
        drop(b);
        assert!(!a.ready());
        assert_eq!(a.send(b"x", Wait::NonBlocking), Err(IpcError::Disconnected));
        assert_eq!(a.recv(Wait::Blocking), Err(IpcError::Disconnected));
    }
}
