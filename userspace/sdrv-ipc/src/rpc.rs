// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Typed rpcall client on top of [`Call`].

use sdrv_abi::rpc::{cmd, RpcRequest, RpcResponse, RPC_PARAM_WORDS, RPC_RESULT_WORDS};
use sdrv_abi::{proto, Rproc};

use crate::call::{Call, CallConfig};
use crate::router::{ChannelConfig, Router};
use crate::{IpcError, Result};

/// Conventional sub-address of the rpcall service.
pub const RPCALL_ADDR: u8 = 0x10;

/// rpcall client bound to one remote server.
pub struct RpcClient {
    call: Call,
}

impl RpcClient {
    /// Connects to the rpcall service of `remote` at `addr`.
    pub fn open(router: &Router, remote: Rproc, addr: u8, mut config: CallConfig) -> Result<Self> {
        config.channel = ChannelConfig { protocol: proto::RPCALL, ..config.channel };
        Ok(Self { call: Call::open(router, remote, addr, config)? })
    }

    /// Issues `request` and returns the peer's response.
    ///
    /// The response must acknowledge the request's command. A non-zero
    /// `retcode` is returned to the caller as-is; it is the server's verdict,
    /// not a transport failure.
    pub fn request(&self, request: &RpcRequest) -> Result<RpcResponse> {
        let raw = self.call.call(&request.encode())?;
        let response = RpcResponse::decode(&raw)?;
        if response.ack != request.cmd {
            return Err(IpcError::Invalid("rpc ack does not match command"));
        }
        Ok(response)
    }

    /// Round-trips `params` through the server's echo command.
    pub fn echo(&self, params: [u32; RPC_PARAM_WORDS]) -> Result<[u32; RPC_RESULT_WORDS]> {
        let response = self.request(&RpcRequest::with_params(cmd::ECHO, params))?;
        Ok(response.results)
    }

    /// Queries the server's protocol version.
    pub fn version(&self) -> Result<u32> {
        Ok(self.request(&RpcRequest::new(cmd::GET_VERSION))?.results[0])
    }

    /// Queries the number of channels open on the server.
    pub fn channels(&self) -> Result<u32> {
        Ok(self.request(&RpcRequest::new(cmd::GET_CHANNELS))?.results[0])
    }

    /// The underlying call object.
    pub fn call(&self) -> &Call {
        &self.call
    }
}
