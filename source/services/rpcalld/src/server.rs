// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: rpcall command dispatcher
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! Commands below `cmd::USER_BASE` are built in (echo, version, channel count);
//! services add their own ids with [`RpcServer::register`]. Unknown commands
//! are answered with `-EINVAL`; frames that do not decode as a request are
//! dropped unanswered, and the caller's timeout reports them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;
use sdrv_abi::errno;
use sdrv_abi::rpc::{cmd, RpcRequest, RpcResponse, RPC_PARAM_WORDS, RPC_PROTOCOL_VERSION, RPC_RESULT_WORDS};
use sdrv_abi::{proto, Rproc};
use sdrv_ipc::{Channel, ChannelConfig, Router};
use thiserror::Error;

/// Parameter words in, result words or negative errno out.
pub type Handler =
    Box<dyn Fn(&[u32; RPC_PARAM_WORDS]) -> Result<[u32; RPC_RESULT_WORDS], i32> + Send + Sync>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ServerError {
    #[error("command {0:#x} is reserved for built-ins")]
    Reserved(u32),
    #[error("command {0:#x} already registered")]
    Duplicate(u32),
}

/// Served/rejected counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub served: u64,
    pub unknown: u64,
    pub malformed: u64,
}

#[derive(Default)]
pub struct RpcServer {
    handlers: RwLock<BTreeMap<u32, Handler>>,
    served: AtomicU64,
    unknown: AtomicU64,
    malformed: AtomicU64,
}

fn version_word(part: &str) -> u32 {
    part.parse().unwrap_or(0)
}

impl RpcServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, command: u32, handler: F) -> Result<(), ServerError>
    where
        F: Fn(&[u32; RPC_PARAM_WORDS]) -> Result<[u32; RPC_RESULT_WORDS], i32> + Send + Sync + 'static,
    {
        if command < cmd::USER_BASE {
            return Err(ServerError::Reserved(command));
        }
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&command) {
            return Err(ServerError::Duplicate(command));
        }
        handlers.insert(command, Box::new(handler));
        Ok(())
    }

    /// Answers one request. `channels` is the open channel count reported by
    /// `GET_CHANNELS`.
    pub fn handle(&self, request: &RpcRequest, channels: usize) -> RpcResponse {
        let mut results = [0u32; RPC_RESULT_WORDS];
        let response = match request.cmd {
            cmd::ECHO => {
                results.copy_from_slice(&request.params[..RPC_RESULT_WORDS]);
                RpcResponse::ok(request.cmd, results)
            }
            cmd::GET_VERSION => {
                results[0] = RPC_PROTOCOL_VERSION;
                results[1] = version_word(env!("CARGO_PKG_VERSION_MAJOR"));
                results[2] = version_word(env!("CARGO_PKG_VERSION_MINOR"));
                results[3] = version_word(env!("CARGO_PKG_VERSION_PATCH"));
                RpcResponse::ok(request.cmd, results)
            }
            cmd::GET_CHANNELS => {
                results[0] = u32::try_from(channels).unwrap_or(u32::MAX);
                RpcResponse::ok(request.cmd, results)
            }
            other => match self.handlers.read().get(&other) {
                Some(handler) => match handler(&request.params) {
                    Ok(results) => RpcResponse::ok(other, results),
                    Err(code) => RpcResponse::error(other, code),
                },
                None => {
                    self.unknown.fetch_add(1, Ordering::Relaxed);
                    debug!("rpcalld: unknown command {other:#x}");
                    RpcResponse::error(other, -errno::EINVAL)
                }
            },
        };
        self.served.fetch_add(1, Ordering::Relaxed);
        response
    }

    /// Opens the listening channel for requests from `remote` on `addr`.
    pub fn serve(self: &Arc<Self>, router: &Router, remote: Rproc, addr: u8, priority: bool) -> sdrv_ipc::Result<Channel> {
        let server = Arc::clone(self);
        let config = ChannelConfig { protocol: proto::RPCALL, priority, ..ChannelConfig::default() };
        router.request_channel_with(remote, addr, config, move |msg, reply| {
            let request = match RpcRequest::decode(msg.payload) {
                Ok(request) => request,
                Err(err) => {
                    server.malformed.fetch_add(1, Ordering::Relaxed);
                    warn!("rpcalld: malformed request from ({}, {:#04x}): {err}", msg.remote, msg.header.addr());
                    return;
                }
            };
            let response = server.handle(&request, reply.channel_count());
            if let Err(err) = reply.reply(&response.encode()) {
                warn!("rpcalld: reply to {} failed: {err}", msg.remote);
            }
        })
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            served: self.served.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}
