// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared IRQ status table.
//!
//! One table per direction. The receiving domain publishes the magic and
//! registers irq numbers into slots; the sending domain bumps `trigger`; the
//! receiver writes `clear = trigger` once the handler ran. Counters wrap and
//! are only ever compared for inequality.

use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

/// Marks a table whose receiver has probed ("ULKI").
pub const ULINK_IRQ_MAGIC: u32 = 0x554c_4b49;

/// Number of (irq, trigger, clear) triples in a table.
pub const MAX_IRQ_SLOTS: usize = 16;

const FREE: u32 = u32::MAX;

/// Slot registration and trigger failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// Index past [`MAX_IRQ_SLOTS`].
    #[error("irq slot {0} out of range")]
    SlotOutOfRange(usize),
    /// The slot already carries an irq.
    #[error("irq slot {0} already registered")]
    SlotInUse(usize),
    /// Another slot already carries this irq.
    #[error("irq {0} already registered")]
    DuplicateIrq(u32),
    /// No slot carries this irq.
    #[error("irq {0} not registered by the peer")]
    NotRegistered(u32),
}

#[derive(Debug)]
struct IrqSlot {
    irq: AtomicU32,
    trigger: AtomicU32,
    clear: AtomicU32,
}

impl IrqSlot {
    const fn new() -> Self {
        Self { irq: AtomicU32::new(FREE), trigger: AtomicU32::new(0), clear: AtomicU32::new(0) }
    }
}

/// Point-in-time view of one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotSnapshot {
    /// Slot index.
    pub slot: usize,
    /// Registered irq.
    pub irq: u32,
    /// Sender's counter.
    pub trigger: u32,
    /// Receiver's counter.
    pub clear: u32,
}

/// Table the receiver publishes and the sender triggers into.
///
/// A slot is pending while `trigger != clear`; both counters wrap.
#[derive(Debug)]
pub struct IrqStatusTable {
    magic: AtomicU32,
    slots: [IrqSlot; MAX_IRQ_SLOTS],
}

impl Default for IrqStatusTable {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqStatusTable {
    /// An unpublished table with every slot free.
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const SLOT: IrqSlot = IrqSlot::new();
        Self { magic: AtomicU32::new(0), slots: [SLOT; MAX_IRQ_SLOTS] }
    }

    /// Publishes the magic; the receiver is now present.
    pub fn init(&self) {
        self.magic.store(ULINK_IRQ_MAGIC, Ordering::Release);
    }

    /// Withdraws the magic and frees every slot.
    pub fn invalidate(&self) {
        self.magic.store(0, Ordering::Release);
        for slot in &self.slots {
            slot.irq.store(FREE, Ordering::Release);
        }
    }

    /// The receiver has published the table and not withdrawn it.
    pub fn is_valid(&self) -> bool {
        self.magic.load(Ordering::Acquire) == ULINK_IRQ_MAGIC
    }

    fn slot(&self, slot: usize) -> Result<&IrqSlot, TableError> {
        self.slots.get(slot).ok_or(TableError::SlotOutOfRange(slot))
    }

    /// Binds `irq` to `slot`. Counters keep their values; only inequality matters.
    pub fn register(&self, slot: usize, irq: u32) -> Result<(), TableError> {
        if irq == FREE {
            return Err(TableError::NotRegistered(irq));
        }
        if self.find(irq).is_some() {
            return Err(TableError::DuplicateIrq(irq));
        }
        let entry = self.slot(slot)?;
        entry
            .irq
            .compare_exchange(FREE, irq, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| TableError::SlotInUse(slot))
    }

    /// Frees `slot`.
    pub fn unregister(&self, slot: usize) -> Result<(), TableError> {
        self.slot(slot)?.irq.store(FREE, Ordering::Release);
        Ok(())
    }

    /// Irq bound to `slot`, if any.
    pub fn irq(&self, slot: usize) -> Option<u32> {
        let irq = self.slots.get(slot)?.irq.load(Ordering::Acquire);
        (irq != FREE).then_some(irq)
    }

    /// Slot carrying `irq`, if the receiver registered it.
    pub fn find(&self, irq: u32) -> Option<usize> {
        self.slots.iter().position(|s| s.irq.load(Ordering::Acquire) == irq)
    }

    /// Sender side: bumps the trigger counter, returning the new value.
    pub fn trigger(&self, slot: usize) -> Result<u32, TableError> {
        Ok(self.slot(slot)?.trigger.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
    }

    /// Receiver side: a trigger has not been acknowledged yet.
    pub fn pending(&self, slot: usize) -> bool {
        self.slots
            .get(slot)
            .map(|s| s.trigger.load(Ordering::Acquire) != s.clear.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Receiver side: acknowledges the current trigger value, if any is pending.
    pub fn ack(&self, slot: usize) -> Option<u32> {
        let entry = self.slots.get(slot)?;
        let trigger = entry.trigger.load(Ordering::Acquire);
        if trigger == entry.clear.load(Ordering::Acquire) {
            return None;
        }
        entry.clear.store(trigger, Ordering::Release);
        Some(trigger)
    }

    /// No trigger outstanding on `slot`.
    pub fn slot_done(&self, slot: usize) -> bool {
        !self.pending(slot)
    }

    /// Every trigger in the table has been matched by a clear.
    pub fn is_done(&self) -> bool {
        (0..MAX_IRQ_SLOTS).all(|slot| self.slot_done(slot))
    }

    /// Registered slots with their counters.
    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.irq.load(Ordering::Acquire) != FREE)
            .map(|(slot, s)| SlotSnapshot {
                slot,
                irq: s.irq.load(Ordering::Acquire),
                trigger: s.trigger.load(Ordering::Acquire),
                clear: s.clear.load(Ordering::Acquire),
            })
            .collect()
    }
}
