// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: In-process transport pair for host-based testing
//!
//! OWNERS: @runtime
//!
//! PUBLIC API:
//!   - loopback_pair(): two connected ends backed by bounded in-memory queues
//!   - loopback_pair_with_depth(): same, with an explicit queue depth
//!
//! ERROR CONDITIONS:
//!   - IpcError::Disconnected: the opposite end was dropped
//!   - IpcError::Busy: queue full (non-blocking, or still full when a send timeout expires)
//!   - IpcError::WouldBlock: nothing to receive in non-blocking mode
//!   - IpcError::Timeout: operation timed out
//!
//! TEST SCENARIOS:
//!   - loopback_roundtrip(), recv_timeout(), dropped_peer_not_ready(), full_queue_busy()

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::budget::{self, HostClock};
use crate::{IpcError, Result, Transport, Wait};

/// Default number of frames buffered per direction.
pub const DEFAULT_DEPTH: usize = 32;

/// Creates two connected loopback ends.
pub fn loopback_pair() -> (LoopbackTransport, LoopbackTransport) {
    loopback_pair_with_depth(DEFAULT_DEPTH)
}

/// Creates two connected loopback ends buffering `depth` frames per direction.
pub fn loopback_pair_with_depth(depth: usize) -> (LoopbackTransport, LoopbackTransport) {
    let (a_tx, b_rx) = mpsc::sync_channel::<Vec<u8>>(depth);
    let (b_tx, a_rx) = mpsc::sync_channel::<Vec<u8>>(depth);
    let a_alive = Arc::new(AtomicBool::new(true));
    let b_alive = Arc::new(AtomicBool::new(true));
    (
        LoopbackTransport::new(a_tx, a_rx, Arc::clone(&a_alive), Arc::clone(&b_alive)),
        LoopbackTransport::new(b_tx, b_rx, b_alive, a_alive),
    )
}

/// One end of an in-memory link.
pub struct LoopbackTransport {
    tx: SyncSender<Vec<u8>>,
    rx: Mutex<Receiver<Vec<u8>>>,
    // Frame taken by `poll()` but not yet handed out.
    peeked: Mutex<Option<Vec<u8>>>,
    alive: Arc<AtomicBool>,
    peer_alive: Arc<AtomicBool>,
}

impl LoopbackTransport {
    fn new(
        tx: SyncSender<Vec<u8>>,
        rx: Receiver<Vec<u8>>,
        alive: Arc<AtomicBool>,
        peer_alive: Arc<AtomicBool>,
    ) -> Self {
        Self { tx, rx: Mutex::new(rx), peeked: Mutex::new(None), alive, peer_alive }
    }

    fn try_send(&self, frame: &[u8]) -> Result<()> {
        if !self.ready() {
            return Err(IpcError::Disconnected);
        }
        self.tx.try_send(frame.to_vec()).map_err(|err| match err {
            TrySendError::Full(_) => IpcError::Busy,
            TrySendError::Disconnected(_) => IpcError::Disconnected,
        })
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, frame: &[u8], wait: Wait) -> Result<()> {
        match wait {
            Wait::NonBlocking => self.try_send(frame),
            Wait::Blocking => {
                if !self.ready() {
                    return Err(IpcError::Disconnected);
                }
                self.tx.send(frame.to_vec()).map_err(|_| IpcError::Disconnected)
            }
            Wait::Timeout(timeout) => {
                let clock = HostClock::new();
                let deadline = budget::deadline_after(&clock, timeout)?;
                budget::retry_until(&clock, deadline, || self.try_send(frame))
            }
        }
    }

    fn recv(&self, wait: Wait) -> Result<Vec<u8>> {
        if let Some(frame) = self.peeked.lock().take() {
            return Ok(frame);
        }
        let receiver = self.rx.lock();
        let try_recv = || {
            receiver.try_recv().map_err(|err| match err {
                TryRecvError::Empty => IpcError::WouldBlock,
                TryRecvError::Disconnected => IpcError::Disconnected,
            })
        };
        match wait {
            Wait::Blocking => receiver.recv().map_err(|_| IpcError::Disconnected),
            Wait::NonBlocking => try_recv(),
            Wait::Timeout(timeout) if timeout.is_zero() => try_recv(),
            Wait::Timeout(timeout) => receiver.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => IpcError::Timeout,
                RecvTimeoutError::Disconnected => IpcError::Disconnected,
            }),
        }
    }

    fn poll(&self) -> bool {
        let mut peeked = self.peeked.lock();
        if peeked.is_some() {
            return true;
        }
        // A blocked receiver already owns the queue; report nothing pending.
        let Some(receiver) = self.rx.try_lock() else {
            return false;
        };
        match receiver.try_recv() {
            Ok(frame) => {
                *peeked = Some(frame);
                true
            }
            Err(_) => false,
        }
    }

    fn ready(&self) -> bool {
        self.peer_alive.load(Ordering::Acquire)
    }
}
