// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared-memory transport (SPSC rings + GPIO doorbell)
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! Each direction has one ring and one IRQ status table. The sender pushes a
//! frame into its tx ring and rings [`RING_IRQ`] on the peer's table; the
//! peer's doorbell handler completes `rx_ready`, which wakes `recv()`.
//!
//! The peer is present while the table it receives on carries the magic.
//! Dropping a transport withdraws the magic, so the other end reports
//! `ready() == false` and `recv()` drains what is left, then yields
//! `Disconnected`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use parking_lot::Mutex;
use sdrv_ipc::budget::{self, HostClock};
use sdrv_ipc::{IpcError, Result, Transport, Wait};
use sdrv_sync::Completion;

use crate::doorbell::{DoorbellConfig, DoorbellRx, DoorbellTx, IrqLine, ProbeError};
use crate::irq_table::IrqStatusTable;
use crate::ring::{RingError, ShmRing};

/// Irq number announcing "frames available" in slot 0.
pub const RING_IRQ: u32 = 0x20;
const RING_SLOT: usize = 0;

/// Geometry and timing of a shared-memory link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShmConfig {
    /// Records per ring; power of two.
    pub ring_slots: usize,
    /// Bytes per record; multiple of 4, at least one header.
    pub slot_bytes: usize,
    /// Doorbell thread timing.
    pub doorbell: DoorbellConfig,
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self { ring_slots: 16, slot_bytes: 516, doorbell: DoorbellConfig::default() }
    }
}

struct Direction {
    ring: Arc<ShmRing>,
    table: Arc<IrqStatusTable>,
    line: Arc<IrqLine>,
}

impl Direction {
    fn new(config: &ShmConfig) -> std::result::Result<Self, ProbeError> {
        Ok(Self {
            ring: Arc::new(ShmRing::new(config.ring_slots, config.slot_bytes)?),
            table: Arc::new(IrqStatusTable::new()),
            line: Arc::new(IrqLine::new()),
        })
    }
}

/// Receiving half of one domain, probed before either side starts sending.
fn probe_rx(dir: &Direction, config: &ShmConfig) -> std::result::Result<(DoorbellRx, Arc<Completion>), ProbeError> {
    let rx = DoorbellRx::spawn(Arc::clone(&dir.table), Arc::clone(&dir.line), config.doorbell)?;
    let rx_ready = Arc::new(Completion::new());
    let notify = Arc::clone(&rx_ready);
    rx.request_irq(RING_SLOT, RING_IRQ, move |_| notify.complete())?;
    Ok((rx, rx_ready))
}

/// Builds both domains of a shared-memory link in-process.
pub fn shm_pair(config: ShmConfig) -> std::result::Result<(ShmTransport, ShmTransport), ProbeError> {
    let a_to_b = Direction::new(&config)?;
    let b_to_a = Direction::new(&config)?;

    let (a_rx, a_ready) = probe_rx(&b_to_a, &config)?;
    let (b_rx, b_ready) = probe_rx(&a_to_b, &config)?;
    let a_tx = DoorbellTx::spawn(Arc::clone(&a_to_b.table), Arc::clone(&a_to_b.line), config.doorbell)?;
    let b_tx = DoorbellTx::spawn(Arc::clone(&b_to_a.table), Arc::clone(&b_to_a.line), config.doorbell)?;
    info!(
        "shm: link up ({} slots x {} bytes per direction)",
        config.ring_slots, config.slot_bytes
    );

    Ok((
        ShmTransport::new(&a_to_b, &b_to_a, a_tx, a_rx, a_ready, config),
        ShmTransport::new(&b_to_a, &a_to_b, b_tx, b_rx, b_ready, config),
    ))
}

/// One domain's end of a shared-memory link.
pub struct ShmTransport {
    tx_ring: Arc<ShmRing>,
    rx_ring: Arc<ShmRing>,
    // Declared before `doorbell_rx` so the tx thread stops first.
    doorbell_tx: DoorbellTx,
    doorbell_rx: DoorbellRx,
    rx_ready: Arc<Completion>,
    send_lock: Mutex<()>,
    recv_lock: Mutex<()>,
    poll: Duration,
}

impl ShmTransport {
    fn new(
        tx: &Direction,
        rx: &Direction,
        doorbell_tx: DoorbellTx,
        doorbell_rx: DoorbellRx,
        rx_ready: Arc<Completion>,
        config: ShmConfig,
    ) -> Self {
        Self {
            tx_ring: Arc::clone(&tx.ring),
            rx_ring: Arc::clone(&rx.ring),
            doorbell_tx,
            doorbell_rx,
            rx_ready,
            send_lock: Mutex::new(()),
            recv_lock: Mutex::new(()),
            poll: config.doorbell.poll.max(Duration::from_millis(1)),
        }
    }

    fn try_send(&self, frame: &[u8]) -> Result<()> {
        if !self.ready() {
            return Err(IpcError::Disconnected);
        }
        let _guard = self.send_lock.lock();
        self.tx_ring.push(frame).map_err(|err| match err {
            RingError::Full => IpcError::Busy,
            RingError::TooLarge { .. } => IpcError::Invalid("frame exceeds shm slot"),
            RingError::BadGeometry => IpcError::Invalid("bad ring geometry"),
        })?;
        self.doorbell_tx.trigger_irq(RING_IRQ).map_err(|err| {
            debug!("shm: doorbell failed: {err}");
            IpcError::Disconnected
        })
    }

    fn try_recv(&self) -> Result<Vec<u8>> {
        match self.rx_ring.pop() {
            Some(frame) => Ok(frame),
            None if !self.ready() => Err(IpcError::Disconnected),
            None => Err(IpcError::WouldBlock),
        }
    }

    /// Doorbell interrupts handled on the receive side.
    pub fn doorbells_handled(&self) -> u64 {
        self.doorbell_rx.handled()
    }
}

impl Transport for ShmTransport {
    fn send(&self, frame: &[u8], wait: Wait) -> Result<()> {
        let clock = HostClock::new();
        match wait {
            Wait::NonBlocking => self.try_send(frame),
            Wait::Timeout(timeout) => budget::retry_budgeted(&clock, timeout, || self.try_send(frame)),
            Wait::Blocking => loop {
                match budget::retry_budgeted(&clock, self.poll, || self.try_send(frame)) {
                    Err(IpcError::Busy) => continue,
                    other => break other,
                }
            },
        }
    }

    fn recv(&self, wait: Wait) -> Result<Vec<u8>> {
        let _guard = self.recv_lock.lock();
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
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(IpcError::Timeout);
                    }
                    (deadline - now).min(self.poll)
                }
                None => self.poll,
            };
            self.rx_ready.wait_timeout(slice);
        }
    }

    fn poll(&self) -> bool {
        !self.rx_ring.is_empty()
    }

    fn ready(&self) -> bool {
        self.doorbell_tx.table().is_valid()
    }
}
