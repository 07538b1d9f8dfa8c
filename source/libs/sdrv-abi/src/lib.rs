// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Wire ABI shared by every domain on the inter-processor link
//! OWNERS: @runtime
//! PUBLIC API: MsgHeader, Rproc, encode_frame/decode_frame, proto ids, errno codes, rpc frames
//! DEPENDS_ON: no_std + alloc, thiserror
//! INVARIANTS: Header is one 32-bit LE word with LSB-first fields:
//!   protocol[0..4] rproc[4..7] priority[7] addr[8..16] len[16..28] osid[28..32]

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;
use core::str::FromStr;

pub mod rpc;

/// Size of the encoded message header in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest payload the 12-bit length field can describe.
pub const MAX_PAYLOAD: usize = 0xFFF;

const PROTO_MASK: u32 = 0xF;
const RPROC_MASK: u32 = 0x7;
const ADDR_MASK: u32 = 0xFF;
const LEN_MASK: u32 = 0xFFF;
const OSID_MASK: u32 = 0xF;

const PROTO_SHIFT: u32 = 0;
const RPROC_SHIFT: u32 = 4;
const PRIO_SHIFT: u32 = 7;
const ADDR_SHIFT: u32 = 8;
const LEN_SHIFT: u32 = 16;
const OSID_SHIFT: u32 = 28;

/// Result type returned by ABI helpers.
pub type Result<T> = core::result::Result<T, AbiError>;

/// Errors produced while building or parsing wire frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    /// A header field does not fit its bit width.
    #[error("header field `{0}` out of range")]
    FieldOverflow(&'static str),
    /// Frame is shorter than the header or the declared payload.
    #[error("frame truncated")]
    Truncated,
    /// Declared payload length disagrees with the bytes supplied.
    #[error("payload length mismatch (header {declared}, actual {actual})")]
    LengthMismatch {
        /// Length carried by the header.
        declared: usize,
        /// Length actually present.
        actual: usize,
    },
    /// Remote processor id is not assigned.
    #[error("unknown remote processor {0}")]
    UnknownRproc(u8),
}

/// Protocol identifiers carried in the 4-bit protocol field.
pub mod proto {
    /// Default/raw mailbox traffic.
    pub const DEFAULT: u8 = 0;
    /// Boot ROM services.
    pub const ROM: u8 = 1;
    /// rpmsg virtio transport.
    pub const RPMSG: u8 = 2;
    /// DSP firmware protocol.
    pub const DSP: u8 = 3;
    /// ulink channel traffic.
    pub const ULINK: u8 = 4;
    /// rpcall request/response frames.
    pub const RPCALL: u8 = 5;
    /// Loopback/echo diagnostics.
    pub const ECHO: u8 = 7;
}

/// Kernel errno values used at the C-compatible error edge.
///
/// Callers negate these, matching the kernel convention.
pub mod errno {
    /// I/O error.
    pub const EIO: i32 = 5;
    /// Try again.
    pub const EAGAIN: i32 = 11;
    /// Out of memory.
    pub const ENOMEM: i32 = 12;
    /// Device or resource busy.
    pub const EBUSY: i32 = 16;
    /// Already exists.
    pub const EEXIST: i32 = 17;
    /// No such device.
    pub const ENODEV: i32 = 19;
    /// Invalid argument.
    pub const EINVAL: i32 = 22;
    /// Timed out.
    pub const ETIMEDOUT: i32 = 110;
}

/// Remote processor domains addressable through the 3-bit rproc field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Rproc {
    /// Safety island (R5).
    Saf = 0,
    /// Security core.
    Sec = 1,
    /// Multimedia/real-time core.
    Mpc = 2,
    /// First application cluster.
    Ap1 = 3,
    /// Second application cluster.
    Ap2 = 4,
    /// Vision DSP.
    Vdsp = 5,
}

impl Rproc {
    /// All assigned processor ids in numeric order.
    pub const ALL: [Rproc; 6] =
        [Rproc::Saf, Rproc::Sec, Rproc::Mpc, Rproc::Ap1, Rproc::Ap2, Rproc::Vdsp];

    /// Numeric id as carried on the wire.
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Lower-case name used in configuration files.
    pub const fn name(self) -> &'static str {
        match self {
            Rproc::Saf => "saf",
            Rproc::Sec => "sec",
            Rproc::Mpc => "mpc",
            Rproc::Ap1 => "ap1",
            Rproc::Ap2 => "ap2",
            Rproc::Vdsp => "vdsp",
        }
    }
}

impl TryFrom<u8> for Rproc {
    type Error = AbiError;

    fn try_from(value: u8) -> Result<Self> {
        Rproc::ALL.iter().copied().find(|r| r.id() == value).ok_or(AbiError::UnknownRproc(value))
    }
}

impl FromStr for Rproc {
    type Err = AbiError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Rproc::ALL
            .iter()
            .copied()
            .find(|r| r.name().eq_ignore_ascii_case(s))
            .ok_or(AbiError::UnknownRproc(u8::MAX))
    }
}

impl fmt::Display for Rproc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Message header prefixing every frame on the mailbox/ulink wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MsgHeader {
    protocol: u8,
    rproc: u8,
    priority: bool,
    addr: u8,
    len: u16,
    osid: u8,
}

impl MsgHeader {
    /// Creates a header, rejecting fields that overflow their bit width.
    pub const fn new(
        protocol: u8,
        rproc: u8,
        priority: bool,
        addr: u8,
        len: u16,
        osid: u8,
    ) -> Result<Self> {
        if protocol as u32 > PROTO_MASK {
            return Err(AbiError::FieldOverflow("protocol"));
        }
        if rproc as u32 > RPROC_MASK {
            return Err(AbiError::FieldOverflow("rproc"));
        }
        if len as u32 > LEN_MASK {
            return Err(AbiError::FieldOverflow("len"));
        }
        if osid as u32 > OSID_MASK {
            return Err(AbiError::FieldOverflow("osid"));
        }
        Ok(Self { protocol, rproc, priority, addr, len, osid })
    }

    /// Protocol id (4 bits).
    pub const fn protocol(&self) -> u8 {
        self.protocol
    }

    /// Raw remote processor id (3 bits).
    pub const fn rproc(&self) -> u8 {
        self.rproc
    }

    /// High-priority flag.
    pub const fn priority(&self) -> bool {
        self.priority
    }

    /// Destination sub-address.
    pub const fn addr(&self) -> u8 {
        self.addr
    }

    /// Payload length in bytes (12 bits).
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns `true` when the header announces an empty payload.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Originating OS id (4 bits).
    pub const fn osid(&self) -> u8 {
        self.osid
    }

    /// Returns a copy with the rproc field replaced.
    ///
    /// Receivers stamp the link's remote id here before dispatch; the sender
    /// wrote the destination id.
    pub fn with_rproc(self, rproc: Rproc) -> Self {
        Self { rproc: rproc.id(), ..self }
    }

    /// Packs the header into its 32-bit register image.
    pub const fn to_bits(&self) -> u32 {
        ((self.protocol as u32 & PROTO_MASK) << PROTO_SHIFT)
            | ((self.rproc as u32 & RPROC_MASK) << RPROC_SHIFT)
            | ((self.priority as u32) << PRIO_SHIFT)
            | ((self.addr as u32 & ADDR_MASK) << ADDR_SHIFT)
            | ((self.len as u32 & LEN_MASK) << LEN_SHIFT)
            | ((self.osid as u32 & OSID_MASK) << OSID_SHIFT)
    }

    /// Unpacks a 32-bit register image. Every word decodes to a header.
    pub const fn from_bits(bits: u32) -> Self {
        Self {
            protocol: ((bits >> PROTO_SHIFT) & PROTO_MASK) as u8,
            rproc: ((bits >> RPROC_SHIFT) & RPROC_MASK) as u8,
            priority: (bits >> PRIO_SHIFT) & 1 == 1,
            addr: ((bits >> ADDR_SHIFT) & ADDR_MASK) as u8,
            len: ((bits >> LEN_SHIFT) & LEN_MASK) as u16,
            osid: ((bits >> OSID_SHIFT) & OSID_MASK) as u8,
        }
    }

    /// Serialises the header to little-endian bytes.
    pub const fn to_le_bytes(&self) -> [u8; HEADER_LEN] {
        self.to_bits().to_le_bytes()
    }

    /// Deserialises little-endian bytes into a header.
    pub const fn from_le_bytes(bytes: [u8; HEADER_LEN]) -> Self {
        Self::from_bits(u32::from_le_bytes(bytes))
    }
}

/// Builds a frame from a header and its payload.
pub fn encode_frame(header: &MsgHeader, payload: &[u8]) -> Result<Vec<u8>> {
    if header.len() != payload.len() {
        return Err(AbiError::LengthMismatch { declared: header.len(), actual: payload.len() });
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&header.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Splits a frame into its header and payload.
///
/// Trailing bytes beyond the declared length are rejected; mailbox slots are
/// sized exactly by the sender.
pub fn decode_frame(frame: &[u8]) -> Result<(MsgHeader, &[u8])> {
    if frame.len() < HEADER_LEN {
        return Err(AbiError::Truncated);
    }
    let header = MsgHeader::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    let payload = &frame[HEADER_LEN..];
    if payload.len() < header.len() {
        return Err(AbiError::Truncated);
    }
    if payload.len() != header.len() {
        return Err(AbiError::LengthMismatch { declared: header.len(), actual: payload.len() });
    }
    Ok((header, payload))
}
