// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: GPIO doorbell bridge over a shared IRQ status table
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! The sending domain owns a [`DoorbellTx`]: `trigger_irq()` queues a request
//! and wakes the tx thread, which bumps the slot's trigger counter and raises
//! the GPIO. A slot is only triggered again once the peer has cleared every
//! outstanding trigger in the table, so each trigger is observed exactly once.
//! The GPIO is deasserted when the table is done and asserted for the next
//! batch; the peer sees edges only on level changes.
//!
//! The receiving domain owns a [`DoorbellRx`]: probing publishes the table
//! magic; the rx thread wakes on an edge (or after `poll` as a fallback),
//! runs the handler of each pending slot, then writes `clear = trigger`.
//!
//! ERROR CONDITIONS:
//!   - ProbeError::BadMagic: tx probe before the peer published its table
//!   - ProbeError::GpioBusy / IrqBusy: line already claimed by another driver
//!   - ProbeError::Table: bad slot or duplicate irq on `request_irq`
//!   - ProbeError::Ring: shared ring geometry rejected
//!   - ProbeError::Thread: worker thread could not be spawned

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, trace};
use parking_lot::Mutex;
use sdrv_sync::Completion;
use thiserror::Error;

use crate::irq_table::{IrqStatusTable, TableError, MAX_IRQ_SLOTS};
use crate::ring::RingError;

/// Fatal conditions while bringing up either side of the bridge.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The peer has not published its table.
    #[error("peer irq table has no valid magic")]
    BadMagic,
    /// Another sender owns the GPIO.
    #[error("gpio output already requested")]
    GpioBusy,
    /// Another receiver owns the interrupt line.
    #[error("irq line already requested")]
    IrqBusy,
    /// Slot registration failed.
    #[error("irq table: {0}")]
    Table(#[from] TableError),
    /// Ring geometry was rejected.
    #[error("shared ring: {0}")]
    Ring(#[from] RingError),
    /// A worker thread could not be started.
    #[error("failed to spawn {0} thread")]
    Thread(&'static str),
}

/// Output pin driven by the sending domain.
pub trait Gpio: Send + Sync {
    /// Claims the pin for output. Returns `false` when already owned.
    fn request_output(&self) -> bool;
    /// Releases a claim taken by [`Gpio::request_output`].
    fn free_output(&self);
    /// Drives the pin high (`true`) or low.
    fn set(&self, level: bool);
    /// Current pin level.
    fn level(&self) -> bool;
}

/// Simulated GPIO wire routed to the peer's interrupt input.
///
/// Every level change counts as one edge and wakes the interrupt side.
#[derive(Default)]
pub struct IrqLine {
    level: AtomicBool,
    edges: AtomicU64,
    edge: Completion,
    output_claimed: AtomicBool,
    irq_claimed: AtomicBool,
}

impl IrqLine {
    /// A low, unclaimed line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of level transitions seen so far.
    pub fn edges(&self) -> u64 {
        self.edges.load(Ordering::Acquire)
    }

    /// Blocks until the next edge or `timeout`; `false` on timeout.
    pub fn wait_edge(&self, timeout: Duration) -> bool {
        self.edge.wait_timeout(timeout)
    }

    fn request_irq(&self) -> bool {
        !self.irq_claimed.swap(true, Ordering::AcqRel)
    }

    fn free_irq(&self) {
        self.irq_claimed.store(false, Ordering::Release);
    }

    // Wakes the interrupt side without an edge.
    fn kick(&self) {
        self.edge.complete();
    }
}

impl Gpio for IrqLine {
    fn request_output(&self) -> bool {
        !self.output_claimed.swap(true, Ordering::AcqRel)
    }

    fn free_output(&self) {
        self.output_claimed.store(false, Ordering::Release);
    }

    fn set(&self, level: bool) {
        if self.level.swap(level, Ordering::AcqRel) != level {
            self.edges.fetch_add(1, Ordering::AcqRel);
            self.edge.complete();
        }
    }

    fn level(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }
}

/// Timing of the doorbell threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DoorbellConfig {
    /// Interval at which the tx thread re-checks the table while the peer is
    /// still clearing, and the rx thread's fallback scan period.
    pub poll: Duration,
}

impl Default for DoorbellConfig {
    fn default() -> Self {
        Self { poll: Duration::from_micros(200) }
    }
}

struct TxShared {
    table: Arc<IrqStatusTable>,
    requests: Mutex<[u32; MAX_IRQ_SLOTS]>,
    wake: Completion,
    stop: AtomicBool,
    signals: AtomicU64,
}

/// Sending half of the doorbell.
pub struct DoorbellTx {
    shared: Arc<TxShared>,
    gpio: Arc<dyn Gpio>,
    worker: Option<JoinHandle<()>>,
}

impl DoorbellTx {
    /// Probes the sending side over the peer's `table`.
    pub fn spawn<G>(table: Arc<IrqStatusTable>, gpio: Arc<G>, config: DoorbellConfig) -> Result<Self, ProbeError>
    where
        G: Gpio + 'static,
    {
        if !table.is_valid() {
            return Err(ProbeError::BadMagic);
        }
        if !gpio.request_output() {
            return Err(ProbeError::GpioBusy);
        }
        gpio.set(false);
        let shared = Arc::new(TxShared {
            table,
            requests: Mutex::new([0; MAX_IRQ_SLOTS]),
            wake: Completion::new(),
            stop: AtomicBool::new(false),
            signals: AtomicU64::new(0),
        });
        let gpio: Arc<dyn Gpio> = gpio;
        let worker = {
            let shared = Arc::clone(&shared);
            let pin = Arc::clone(&gpio);
            thread::Builder::new()
                .name("ulink-doorbell-tx".into())
                .spawn(move || tx_loop(&shared, pin.as_ref(), config))
                .map_err(|err| {
                    error!("doorbell: tx thread spawn failed: {err}");
                    gpio.free_output();
                    ProbeError::Thread("doorbell tx")
                })?
        };
        Ok(Self { shared, gpio, worker: Some(worker) })
    }

    /// Queues one interrupt for the peer's handler bound to `irq`.
    pub fn trigger_irq(&self, irq: u32) -> Result<(), TableError> {
        let slot = self.shared.table.find(irq).ok_or(TableError::NotRegistered(irq))?;
        {
            let mut requests = self.shared.requests.lock();
            requests[slot] = requests[slot].saturating_add(1);
        }
        self.shared.wake.complete();
        Ok(())
    }

    /// Number of GPIO assertions so far.
    pub fn signals(&self) -> u64 {
        self.shared.signals.load(Ordering::Acquire)
    }

    /// Requests queued but not yet triggered.
    pub fn backlog(&self) -> u32 {
        self.shared.requests.lock().iter().sum()
    }

    /// The peer's table this side triggers into.
    pub fn table(&self) -> &Arc<IrqStatusTable> {
        &self.shared.table
    }
}

impl Drop for DoorbellTx {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake.complete_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.gpio.set(false);
        self.gpio.free_output();
    }
}

fn tx_loop(shared: &TxShared, gpio: &dyn Gpio, config: DoorbellConfig) {
    let mut asserted = false;
    while !shared.stop.load(Ordering::Acquire) {
        if shared.table.is_done() {
            if asserted {
                gpio.set(false);
                asserted = false;
            }
            let mut triggered = 0;
            {
                let mut requests = shared.requests.lock();
                for (slot, count) in requests.iter_mut().enumerate() {
                    if *count == 0 {
                        continue;
                    }
                    *count -= 1;
                    match shared.table.trigger(slot) {
                        Ok(value) => {
                            trace!("doorbell: slot {slot} trigger -> {value}");
                            triggered += 1;
                        }
                        Err(err) => debug!("doorbell: slot {slot} dropped: {err}"),
                    }
                }
            }
            if triggered > 0 {
                gpio.set(true);
                asserted = true;
                shared.signals.fetch_add(1, Ordering::AcqRel);
            }
        }
        let outstanding = asserted || shared.requests.lock().iter().any(|&c| c != 0);
        if outstanding {
            shared.wake.wait_timeout(config.poll);
        } else {
            shared.wake.wait();
        }
    }
}

type IrqHandler = Arc<dyn Fn(u32) + Send + Sync>;

struct RxShared {
    table: Arc<IrqStatusTable>,
    handlers: Mutex<[Option<IrqHandler>; MAX_IRQ_SLOTS]>,
    stop: AtomicBool,
    handled: AtomicU64,
}

impl RxShared {
    // One pass over the table; returns the number of slots serviced.
    fn scan(&self) -> usize {
        let mut serviced = 0;
        for slot in 0..MAX_IRQ_SLOTS {
            if !self.table.pending(slot) {
                continue;
            }
            let handler = self.handlers.lock()[slot].clone();
            match (handler, self.table.irq(slot)) {
                (Some(handler), Some(irq)) => {
                    handler(irq);
                    self.handled.fetch_add(1, Ordering::AcqRel);
                    serviced += 1;
                }
                _ => debug!("doorbell: trigger on unbound slot {slot} acknowledged"),
            }
            self.table.ack(slot);
        }
        serviced
    }
}

/// Receiving half of the doorbell.
pub struct DoorbellRx {
    shared: Arc<RxShared>,
    line: Arc<IrqLine>,
    worker: Option<JoinHandle<()>>,
}

impl DoorbellRx {
    /// Probes the receiving side: claims `line` and publishes `table`.
    pub fn spawn(table: Arc<IrqStatusTable>, line: Arc<IrqLine>, config: DoorbellConfig) -> Result<Self, ProbeError> {
        if !line.request_irq() {
            return Err(ProbeError::IrqBusy);
        }
        const NONE: Option<IrqHandler> = None;
        let shared = Arc::new(RxShared {
            table,
            handlers: Mutex::new([NONE; MAX_IRQ_SLOTS]),
            stop: AtomicBool::new(false),
            handled: AtomicU64::new(0),
        });
        shared.table.init();
        let worker = {
            let shared = Arc::clone(&shared);
            let line = Arc::clone(&line);
            thread::Builder::new()
                .name("ulink-doorbell-rx".into())
                .spawn(move || {
                    while !shared.stop.load(Ordering::Acquire) {
                        line.wait_edge(config.poll);
                        shared.scan();
                    }
                })
        };
        let worker = match worker {
            Ok(worker) => worker,
            Err(err) => {
                error!("doorbell: rx thread spawn failed: {err}");
                shared.table.invalidate();
                line.free_irq();
                return Err(ProbeError::Thread("doorbell rx"));
            }
        };
        Ok(Self { shared, line, worker: Some(worker) })
    }

    /// Binds `handler` to `slot` and advertises `irq` to the sender.
    pub fn request_irq<F>(&self, slot: usize, irq: u32, handler: F) -> Result<(), ProbeError>
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        let mut handlers = self.shared.handlers.lock();
        let entry = handlers.get_mut(slot).ok_or(TableError::SlotOutOfRange(slot))?;
        if entry.is_some() {
            return Err(TableError::SlotInUse(slot).into());
        }
        // Handler lands under the same lock the scanner takes, before the
        // sender can see the irq.
        self.shared.table.register(slot, irq)?;
        *entry = Some(Arc::new(handler));
        Ok(())
    }

    /// Unbinds the handler on `slot` and frees it in the table.
    pub fn free_irq(&self, slot: usize) -> Result<(), ProbeError> {
        let mut handlers = self.shared.handlers.lock();
        let entry = handlers.get_mut(slot).ok_or(TableError::SlotOutOfRange(slot))?;
        self.shared.table.unregister(slot)?;
        *entry = None;
        Ok(())
    }

    /// Services pending slots on the calling thread.
    pub fn scan(&self) -> usize {
        self.shared.scan()
    }

    /// Handler invocations so far.
    pub fn handled(&self) -> u64 {
        self.shared.handled.load(Ordering::Acquire)
    }

    /// The table this side publishes.
    pub fn table(&self) -> &Arc<IrqStatusTable> {
        &self.shared.table
    }
}

impl Drop for DoorbellRx {
    fn drop(&mut self) {
        self.shared.table.invalidate();
        self.shared.stop.store(true, Ordering::Release);
        self.line.kick();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.line.free_irq();
    }
}
