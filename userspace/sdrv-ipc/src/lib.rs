// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Cross-domain IPC runtime (ulink channels, synchronous calls, rpcall client)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: unit tests per module + `tests/router_call.rs`
//!
//! PUBLIC API:
//!   - Transport trait: frame-oriented link to one remote processor
//!   - Router / Channel: per-(rproc, addr) multiplexing over attached links
//!   - Call: mutex-serialised synchronous request/response
//!   - RpcClient: typed rpcall requests over a Call
//!   - Wait enum, IpcError
//!
//! DEPENDENCIES:
//!   - sdrv-abi: wire header and rpcall frames
//!   - sdrv-sync: SpinLock (channel list), Completion (call wake-up)
//!   - parking_lot: host mutexes
//!   - log: diagnostics on drops and timeouts

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use core::time::Duration;

use sdrv_abi::{errno, AbiError};

pub mod budget;
pub mod call;
pub mod loopback;
pub mod router;
pub mod rpc;

pub use call::{Call, CallConfig, DEFAULT_CALL_TIMEOUT};
pub use loopback::{loopback_pair, LoopbackTransport};
pub use router::{Channel, ChannelConfig, Inbound, Responder, Router, RouterStats};
pub use rpc::RpcClient;

/// Result type returned by IPC operations.
pub type Result<T> = core::result::Result<T, IpcError>;

/// Behaviour of a blocking operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Block until the operation completes.
    Blocking,
    /// Return immediately if no progress can be made.
    NonBlocking,
    /// Block until either the operation completes or the timeout expires.
    Timeout(Duration),
}

impl Wait {
    /// Returns `true` when the caller requested a non-blocking attempt.
    pub const fn is_non_blocking(self) -> bool {
        matches!(self, Self::NonBlocking)
    }

    /// Converts a [`Wait::Timeout`] variant into its [`Duration`].
    pub const fn timeout(self) -> Option<Duration> {
        match self {
            Self::Timeout(duration) => Some(duration),
            Self::Blocking | Self::NonBlocking => None,
        }
    }
}

/// Errors produced by the IPC runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IpcError {
    /// Channel, link or peer is absent.
    #[error("no such device or peer not ready")]
    NoDevice,
    /// The transport cannot accept another frame right now.
    #[error("channel busy")]
    Busy,
    /// No response within the budget.
    #[error("operation timed out")]
    Timeout,
    /// Malformed request or argument.
    #[error("invalid request: {0}")]
    Invalid(&'static str),
    /// Operation could not progress without blocking.
    #[error("operation would block")]
    WouldBlock,
    /// The opposite endpoint went away.
    #[error("peer disconnected")]
    Disconnected,
    /// A channel with the same (rproc, addr) is already open.
    #[error("channel address already in use")]
    AddrInUse,
    /// Wire encoding/decoding failure.
    #[error("wire format error: {0}")]
    Abi(#[from] AbiError),
}

impl IpcError {
    /// Negative kernel errno for callers that speak the C convention.
    pub const fn errno(&self) -> i32 {
        -match self {
            Self::NoDevice | Self::Disconnected => errno::ENODEV,
            Self::Busy => errno::EBUSY,
            Self::Timeout => errno::ETIMEDOUT,
            Self::Invalid(_) | Self::Abi(_) => errno::EINVAL,
            Self::WouldBlock => errno::EAGAIN,
            Self::AddrInUse => errno::EEXIST,
        }
    }
}

/// Frame-oriented link to a single remote processor.
///
/// Frames are complete wire messages (header + payload). Implementations must
/// preserve frame boundaries and per-direction ordering.
pub trait Transport: Send + Sync {
    /// Queues a frame for the peer.
    fn send(&self, frame: &[u8], wait: Wait) -> Result<()>;

    /// Takes the next frame from the peer.
    fn recv(&self, wait: Wait) -> Result<Vec<u8>>;

    /// Returns `true` when a frame is ready to be received.
    fn poll(&self) -> bool;

    /// Returns `true` when the peer is present and accepting frames.
    fn ready(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(&self, frame: &[u8], wait: Wait) -> Result<()> {
        (**self).send(frame, wait)
    }

    fn recv(&self, wait: Wait) -> Result<Vec<u8>> {
        (**self).recv(wait)
    }

    fn poll(&self) -> bool {
        (**self).poll()
    }

    fn ready(&self) -> bool {
        (**self).ready()
    }
}
