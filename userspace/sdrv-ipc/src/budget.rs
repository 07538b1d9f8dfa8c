// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Deterministic, budgeted retry and polling loops.
//!
//! Transports that model hardware (mailbox slots, DMA status registers, shared
//! counters) have no blocking wait; callers make non-blocking attempts and apply
//! an explicit time budget instead.
//!
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Internal (crate public, used by ulink transports)
//! TEST_COVERAGE: Unit tests (host)

use core::time::Duration;

use crate::{IpcError, Result};

const SPIN_CHECK_MASK: usize = 0x7f; // check time every 128 spins

/// Clock source used for budgeted loops.
pub trait Clock {
    /// Returns the current time in nanoseconds, or `None` if not available.
    fn now_ns(&self) -> Option<u64>;
    /// Cooperative yield to allow other work to make progress.
    fn yield_now(&self);
}

/// Host clock backed by `std::time::Instant`.
pub struct HostClock {
    start: std::time::Instant,
}

impl HostClock {
    /// Creates a new host clock.
    pub fn new() -> Self {
        Self { start: std::time::Instant::now() }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for HostClock {
    fn now_ns(&self) -> Option<u64> {
        Some(duration_to_ns(self.start.elapsed()))
    }

    fn yield_now(&self) {
        std::thread::yield_now();
    }
}

/// Converts a duration to saturating nanoseconds.
pub fn duration_to_ns(d: Duration) -> u64 {
    d.as_secs().saturating_mul(1_000_000_000).saturating_add(d.subsec_nanos() as u64)
}

/// Computes a deadline timestamp based on `clock.now_ns() + budget`.
pub fn deadline_after(clock: &impl Clock, budget: Duration) -> Result<u64> {
    let now = clock.now_ns().ok_or(IpcError::NoDevice)?;
    Ok(now.saturating_add(duration_to_ns(budget)))
}

const fn retryable(err: &IpcError) -> bool {
    matches!(err, IpcError::WouldBlock | IpcError::Busy)
}

fn expired(last: IpcError) -> IpcError {
    match last {
        IpcError::Busy => IpcError::Busy,
        _ => IpcError::Timeout,
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the deadline expires.
///
/// `IpcError::WouldBlock` (nothing to take) and `IpcError::Busy` (no room to
/// put) are retried. On expiry a contended put still reports `Busy`; an empty
/// take reports `Timeout`.
pub fn retry_until<T>(
    clock: &impl Clock,
    deadline_ns: u64,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut spins: usize = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(err) if retryable(&err) => {
                if (spins & SPIN_CHECK_MASK) == 0 {
                    let now = clock.now_ns().ok_or(IpcError::NoDevice)?;
                    if now >= deadline_ns {
                        return Err(expired(err));
                    }
                }
                clock.yield_now();
            }
            Err(e) => return Err(e),
        }
        spins = spins.wrapping_add(1);
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the budget expires.
pub fn retry_budgeted<T>(
    clock: &impl Clock,
    budget: Duration,
    op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let deadline_ns = deadline_after(clock, budget)?;
    retry_until(clock, deadline_ns, op)
}

/// Spins on `pred` until it holds or `budget` expires. Returns the final
/// observation, so a predicate that turns true on the last check still wins.
pub fn poll_until(clock: &impl Clock, budget: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline_ns = match deadline_after(clock, budget) {
        Ok(d) => d,
        Err(_) => return pred(),
    };
    let mut spins: usize = 0;
    loop {
        if pred() {
            return true;
        }
        if (spins & SPIN_CHECK_MASK) == 0 {
            match clock.now_ns() {
                Some(now) if now < deadline_ns => {}
                _ => return pred(),
            }
        }
        clock.yield_now();
        spins = spins.wrapping_add(1);
    }
}
