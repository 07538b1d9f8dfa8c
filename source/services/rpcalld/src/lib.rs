// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: rpcall daemon (config loading, command dispatch, link bring-up)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module + `tests/cli.rs`
//!
//! PUBLIC API:
//!   - Config::load / Config::from_toml_str: validated TOML topology
//!   - RpcServer: built-in and registered rpcall commands
//!   - selftest::run: bring up the configured links in-process and probe them
//!   - help / execute / run: command line front end
//!
//! DEPENDENCIES:
//!   - sdrv-ipc: routers, channels, rpcall client
//!   - ulink: shared-memory, mailbox and DMA transports
//!   - serde + toml: configuration

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod selftest;
pub mod server;

use sdrv_ipc::IpcError;
use thiserror::Error;
use ulink::{DmaError, ProbeError};

pub use cli::{execute, help, run};
pub use config::{Config, ConfigError, LinkConfig, LinkKind, RpcSettings, ServiceConfig};
pub use server::{RpcServer, ServerError, ServerStats};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("link probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error("ipc: {0}")]
    Ipc(#[from] IpcError),
    #[error("dma: {0}")]
    Dma(#[from] DmaError),
    #[error("selftest {check} failed: {detail}")]
    Check { check: &'static str, detail: String },
}

impl DaemonError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonError::Config(_) => 2,
            _ => 1,
        }
    }
}
