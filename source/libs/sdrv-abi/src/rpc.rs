// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! rpcall request/response frames.
//!
//! Both frames are fixed-size little-endian word arrays. A response echoes the
//! request's command in `ack` so the caller can pair them.

use crate::{AbiError, Result};

/// Number of parameter words in a request.
pub const RPC_PARAM_WORDS: usize = 8;
/// Number of result words in a response.
pub const RPC_RESULT_WORDS: usize = 6;
/// Encoded request size.
pub const RPC_REQ_LEN: usize = 4 + RPC_PARAM_WORDS * 4;
/// Encoded response size.
pub const RPC_RESP_LEN: usize = 8 + RPC_RESULT_WORDS * 4;

/// Version reported by [`cmd::GET_VERSION`].
pub const RPC_PROTOCOL_VERSION: u32 = 0x0001_0000;

/// Command ids understood by every rpcall server.
pub mod cmd {
    /// Echo the parameter words back as results.
    pub const ECHO: u32 = 0x00;
    /// Report protocol and implementation versions.
    pub const GET_VERSION: u32 = 0x01;
    /// Report the number of open channels on the server.
    pub const GET_CHANNELS: u32 = 0x02;
    /// First id available for service-specific commands.
    pub const USER_BASE: u32 = 0x100;
}

/// rpcall request frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RpcRequest {
    /// Command id.
    pub cmd: u32,
    /// Command parameters.
    pub params: [u32; RPC_PARAM_WORDS],
}

/// rpcall response frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RpcResponse {
    /// Command id of the request being answered.
    pub ack: u32,
    /// Zero on success, negative errno otherwise.
    pub retcode: i32,
    /// Command results.
    pub results: [u32; RPC_RESULT_WORDS],
}

fn read_word(bytes: &[u8], idx: usize) -> u32 {
    let off = idx * 4;
    u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
}

fn check_len(bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() < expected {
        return Err(AbiError::Truncated);
    }
    if bytes.len() != expected {
        return Err(AbiError::LengthMismatch { declared: expected, actual: bytes.len() });
    }
    Ok(())
}

impl RpcRequest {
    /// Creates a request with zeroed parameters.
    pub const fn new(cmd: u32) -> Self {
        Self { cmd, params: [0; RPC_PARAM_WORDS] }
    }

    /// Creates a request carrying `params`.
    pub const fn with_params(cmd: u32, params: [u32; RPC_PARAM_WORDS]) -> Self {
        Self { cmd, params }
    }

    /// Serialises the request.
    pub fn encode(&self) -> [u8; RPC_REQ_LEN] {
        let mut out = [0u8; RPC_REQ_LEN];
        out[0..4].copy_from_slice(&self.cmd.to_le_bytes());
        for (i, p) in self.params.iter().enumerate() {
            let off = 4 + i * 4;
            out[off..off + 4].copy_from_slice(&p.to_le_bytes());
        }
        out
    }

    /// Parses a request, requiring the exact encoded size.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, RPC_REQ_LEN)?;
        let mut params = [0u32; RPC_PARAM_WORDS];
        for (i, p) in params.iter_mut().enumerate() {
            *p = read_word(bytes, 1 + i);
        }
        Ok(Self { cmd: read_word(bytes, 0), params })
    }
}

impl RpcResponse {
    /// Successful response for `ack` with `results`.
    pub const fn ok(ack: u32, results: [u32; RPC_RESULT_WORDS]) -> Self {
        Self { ack, retcode: 0, results }
    }

    /// Failed response carrying a negative errno.
    pub const fn error(ack: u32, retcode: i32) -> Self {
        Self { ack, retcode, results: [0; RPC_RESULT_WORDS] }
    }

    /// Serialises the response.
    pub fn encode(&self) -> [u8; RPC_RESP_LEN] {
        let mut out = [0u8; RPC_RESP_LEN];
        out[0..4].copy_from_slice(&self.ack.to_le_bytes());
        out[4..8].copy_from_slice(&self.retcode.to_le_bytes());
        for (i, r) in self.results.iter().enumerate() {
            let off = 8 + i * 4;
            out[off..off + 4].copy_from_slice(&r.to_le_bytes());
        }
        out
    }

    /// Parses a response, requiring the exact encoded size.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, RPC_RESP_LEN)?;
        let mut results = [0u32; RPC_RESULT_WORDS];
        for (i, r) in results.iter_mut().enumerate() {
            *r = read_word(bytes, 2 + i);
        }
        Ok(Self { ack: read_word(bytes, 0), retcode: read_word(bytes, 1) as i32, results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout_is_le_words() {
        let req = RpcRequest::with_params(cmd::ECHO, [1, 2, 3, 4, 5, 6, 7, 0xdead_beef]);
        let bytes = req.encode();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[1, 0, 0, 0]);
        assert_eq!(&bytes[32..36], &[0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(RpcRequest::decode(&bytes), Ok(req));
    }

    #[test]
    fn negative_retcode_survives() {
        let resp = RpcResponse::error(cmd::GET_VERSION, -22);
        assert_eq!(RpcResponse::decode(&resp.encode()).unwrap().retcode, -22);
    }

    #[test]
    fn wrong_sizes_rejected() {
        assert_eq!(RpcRequest::decode(&[0u8; 10]), Err(AbiError::Truncated));
        assert!(matches!(
            RpcResponse::decode(&[0u8; RPC_RESP_LEN + 1]),
            Err(AbiError::LengthMismatch { .. })
        ));
    }
}
