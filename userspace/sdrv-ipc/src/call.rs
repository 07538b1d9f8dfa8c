// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Synchronous request/response over a single ulink channel
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//!
//! A `Call` owns one channel and a mutex. `call()` sends exactly one frame and
//! parks on a completion until the peer answers on the same channel or the
//! timeout expires. Concurrent callers queue on the mutex, so a second request
//! is never sent before the first one has been answered or abandoned.
//!
//! A timed-out request is counted as abandoned; the next that many answers
//! are late replies to it and are discarded, even when they arrive during a
//! later call. Frames arriving while no call is in flight are discarded too.
//! A peer that never answers an abandoned request therefore costs the next
//! call its reply.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use sdrv_abi::{Rproc, MAX_PAYLOAD};
use sdrv_sync::Completion;

use crate::router::{Channel, ChannelConfig, Router};
use crate::{IpcError, Result};

/// Default bound on how long a call waits for its response.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(500);

/// Default request size limit; larger requests are truncated.
pub const DEFAULT_MAX_PAYLOAD: usize = 512;

/// Parameters of a [`Call`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallConfig {
    /// Bound on the wait for a response.
    pub timeout: Duration,
    /// Requests longer than this are truncated before sending.
    pub max_payload: usize,
    /// Send parameters of the underlying channel.
    pub channel: ChannelConfig,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CALL_TIMEOUT,
            max_payload: DEFAULT_MAX_PAYLOAD,
            channel: ChannelConfig::default(),
        }
    }
}

#[derive(Default)]
struct Exchange {
    in_flight: bool,
    abandoned: u32,
    response: Option<Vec<u8>>,
}

#[derive(Default)]
struct CallState {
    exchange: Mutex<Exchange>,
    done: Completion,
}

/// Mutex-serialised synchronous exchange on one channel.
pub struct Call {
    channel: Channel,
    state: Arc<CallState>,
    serial: Mutex<()>,
    config: CallConfig,
}

impl Call {
    /// Opens the channel (`remote`, `addr`) on `router` for synchronous calls.
    pub fn open(router: &Router, remote: Rproc, addr: u8, config: CallConfig) -> Result<Self> {
        if config.max_payload == 0 || config.max_payload > MAX_PAYLOAD {
            return Err(IpcError::Invalid("max_payload out of range"));
        }
        let state = Arc::new(CallState::default());
        let cb_state = Arc::clone(&state);
        let channel = router.request_channel_with(remote, addr, config.channel, move |msg, _| {
            let mut exchange = cb_state.exchange.lock();
            if exchange.abandoned > 0 {
                exchange.abandoned -= 1;
                debug!("rpc: late response on ({}, {:#04x}) discarded", msg.remote, msg.header.addr());
                return;
            }
            if !exchange.in_flight {
                debug!("rpc: stale response on ({}, {:#04x}) discarded", msg.remote, msg.header.addr());
                return;
            }
            exchange.in_flight = false;
            exchange.response = Some(msg.payload.to_vec());
            drop(exchange);
            cb_state.done.complete();
        })?;
        Ok(Self { channel, state, serial: Mutex::new(()), config })
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Call parameters.
    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    /// Sends `request` and blocks for the response.
    ///
    /// Returns [`IpcError::NoDevice`] without waiting when the peer is absent
    /// and [`IpcError::Timeout`] when no response arrives in time.
    pub fn call(&self, request: &[u8]) -> Result<Vec<u8>> {
        let _serial = self.serial.lock();
        if !self.channel.ready() {
            return Err(IpcError::NoDevice);
        }
        let request = if request.len() > self.config.max_payload {
            warn!(
                "rpc: request of {} bytes truncated to {} on ({}, {:#04x})",
                request.len(),
                self.config.max_payload,
                self.channel.remote(),
                self.channel.addr()
            );
            &request[..self.config.max_payload]
        } else {
            request
        };

        self.state.done.reinit();
        {
            let mut exchange = self.state.exchange.lock();
            exchange.response = None;
            exchange.in_flight = true;
        }
        if let Err(err) = self.channel.send(request) {
            self.state.exchange.lock().in_flight = false;
            return Err(err);
        }
        if !self.state.done.wait_timeout(self.config.timeout) {
            let mut exchange = self.state.exchange.lock();
            // An answer that landed on the deadline is still ours.
            if exchange.in_flight {
                exchange.in_flight = false;
                exchange.abandoned = exchange.abandoned.saturating_add(1);
                drop(exchange);
                warn!(
                    "rpc: no response from ({}, {:#04x}) within {:?}",
                    self.channel.remote(),
                    self.channel.addr(),
                    self.config.timeout
                );
                return Err(IpcError::Timeout);
            }
        }
        self.state.exchange.lock().response.take().ok_or(IpcError::Timeout)
    }

    /// Like [`Call::call`], copying the response into `response`.
    ///
    /// Returns the number of bytes written.
    pub fn call_into(&self, request: &[u8], response: &mut [u8]) -> Result<usize> {
        let reply = self.call(request)?;
        if reply.len() > response.len() {
            return Err(IpcError::Invalid("response buffer too small"));
        }
        response[..reply.len()].copy_from_slice(&reply);
        Ok(reply.len())
    }
}
