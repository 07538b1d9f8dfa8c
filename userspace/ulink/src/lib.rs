// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: ulink transports between two processor domains
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module + `tests/doorbell_shm.rs`
//!
//! PUBLIC API:
//!   - IrqStatusTable: shared (irq, trigger, clear) counter table
//!   - DoorbellTx / DoorbellRx / IrqLine: GPIO doorbell bridge over the table
//!   - ShmRing / ShmTransport / shm_pair(): SPSC frame rings + doorbell
//!   - MailboxTransport / mailbox_pair(): single-slot hardware mailbox model
//!   - DmaChannel / DmaEngine / SimDmaEngine: polled PCIe DMA copies
//!
//! Shared regions are modelled as `Arc`-shared atomics. Nothing in them is
//! protected by a lock visible to both domains; the counter protocol is the
//! only synchronisation.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod dma;
pub mod doorbell;
pub mod irq_table;
pub mod mailbox;
pub mod ring;
pub mod shm;

pub use dma::{DmaBudget, DmaChannel, DmaControl, DmaDescriptor, DmaEngine, DmaError, DmaStatus, SimDmaEngine};
pub use doorbell::{DoorbellConfig, DoorbellRx, DoorbellTx, Gpio, IrqLine, ProbeError};
pub use irq_table::{IrqStatusTable, SlotSnapshot, TableError, MAX_IRQ_SLOTS, ULINK_IRQ_MAGIC};
pub use mailbox::{mailbox_pair, MailboxTransport, MAILBOX_MAX_FRAME};
pub use ring::{RingError, ShmRing};
pub use shm::{shm_pair, ShmConfig, ShmTransport, RING_IRQ};
