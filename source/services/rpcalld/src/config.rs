// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! rpcalld configuration: which links exist and which rpcall services listen.
//!
//! ```toml
//! [local]
//! rproc = "ap1"
//! osid = 1
//!
//! [rpc]
//! timeout_ms = 500
//! max_payload = 512
//!
//! [[link]]
//! remote = "mpc"
//! kind = "shm"          # loopback | shm | mailbox
//! ring_slots = 16
//! slot_bytes = 516
//! poll_us = 200
//!
//! [[service]]
//! remote = "mpc"
//! addr = 0x10
//! priority = false
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sdrv_abi::{Rproc, HEADER_LEN, MAX_PAYLOAD};
use sdrv_ipc::call::DEFAULT_MAX_PAYLOAD;
use sdrv_ipc::rpc::RPCALL_ADDR;
use sdrv_ipc::DEFAULT_CALL_TIMEOUT;
use serde::Deserialize;
use thiserror::Error;
use ulink::{DoorbellConfig, ShmConfig, MAILBOX_MAX_FRAME};

const MAX_OSID: u8 = 0xF;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("malformed config: {0}")]
    Syntax(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How a link is physically carried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkKind {
    Loopback,
    Shm(ShmConfig),
    Mailbox,
}

impl LinkKind {
    pub fn name(&self) -> &'static str {
        match self {
            LinkKind::Loopback => "loopback",
            LinkKind::Shm(_) => "shm",
            LinkKind::Mailbox => "mailbox",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkConfig {
    pub remote: Rproc,
    pub kind: LinkKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    pub remote: Rproc,
    pub addr: u8,
    pub priority: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RpcSettings {
    pub timeout: Duration,
    pub max_payload: usize,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self { timeout: DEFAULT_CALL_TIMEOUT, max_payload: DEFAULT_MAX_PAYLOAD }
    }
}

/// Validated daemon configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub local: Rproc,
    pub osid: u8,
    pub rpc: RpcSettings,
    pub links: Vec<LinkConfig>,
    pub services: Vec<ServiceConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let raw: RawConfig = toml::from_str(&data)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        raw.validate()
    }

    pub fn from_toml_str(data: &str) -> Result<Self, ConfigError> {
        toml::from_str::<RawConfig>(data)?.validate()
    }

    /// Built-in topology used by `--selftest` without a config file:
    /// one service per link kind, each on its own remote.
    pub fn builtin() -> Self {
        let service = |remote| ServiceConfig { remote, addr: RPCALL_ADDR, priority: false };
        Self {
            local: Rproc::Ap1,
            osid: 1,
            rpc: RpcSettings::default(),
            links: vec![
                LinkConfig { remote: Rproc::Mpc, kind: LinkKind::Loopback },
                LinkConfig { remote: Rproc::Saf, kind: LinkKind::Shm(ShmConfig::default()) },
                LinkConfig { remote: Rproc::Sec, kind: LinkKind::Mailbox },
            ],
            services: vec![service(Rproc::Mpc), service(Rproc::Saf), service(Rproc::Sec)],
        }
    }

    pub fn link(&self, remote: Rproc) -> Option<&LinkConfig> {
        self.links.iter().find(|l| l.remote == remote)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    local: RawLocal,
    #[serde(default)]
    rpc: RawRpc,
    #[serde(default, rename = "link")]
    links: Vec<RawLink>,
    #[serde(default, rename = "service")]
    services: Vec<RawService>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLocal {
    rproc: String,
    #[serde(default)]
    osid: u8,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRpc {
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_max_payload")]
    max_payload: usize,
}

impl Default for RawRpc {
    fn default() -> Self {
        Self { timeout_ms: default_timeout_ms(), max_payload: default_max_payload() }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT.as_millis() as u64
}

fn default_max_payload() -> usize {
    DEFAULT_MAX_PAYLOAD
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum RawKind {
    Loopback,
    Shm,
    Mailbox,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLink {
    remote: String,
    kind: RawKind,
    ring_slots: Option<usize>,
    slot_bytes: Option<usize>,
    poll_us: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawService {
    remote: String,
    #[serde(default = "default_addr")]
    addr: u8,
    #[serde(default)]
    priority: bool,
}

fn default_addr() -> u8 {
    RPCALL_ADDR
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn rproc(name: &str, what: &str) -> Result<Rproc, ConfigError> {
    name.parse().map_err(|_| invalid(format!("{what}: unknown rproc '{name}'")))
}

impl RawConfig {
    fn validate(self) -> Result<Config, ConfigError> {
        let local = rproc(&self.local.rproc, "local")?;
        if self.local.osid > MAX_OSID {
            return Err(invalid(format!("osid {} exceeds {MAX_OSID}", self.local.osid)));
        }
        if self.rpc.timeout_ms == 0 {
            return Err(invalid("rpc.timeout_ms must be non-zero"));
        }
        if self.rpc.max_payload == 0 || self.rpc.max_payload > MAX_PAYLOAD {
            return Err(invalid(format!(
                "rpc.max_payload {} outside 1..={MAX_PAYLOAD}",
                self.rpc.max_payload
            )));
        }
        let rpc = RpcSettings {
            timeout: Duration::from_millis(self.rpc.timeout_ms),
            max_payload: self.rpc.max_payload,
        };

        let mut links = Vec::with_capacity(self.links.len());
        for raw in &self.links {
            let remote = rproc(&raw.remote, "link")?;
            if remote == local {
                return Err(invalid(format!("link to local rproc {remote}")));
            }
            if links.iter().any(|l: &LinkConfig| l.remote == remote) {
                return Err(invalid(format!("duplicate link to {remote}")));
            }
            links.push(LinkConfig { remote, kind: raw.kind(remote, rpc.max_payload)? });
        }

        let mut seen = BTreeSet::new();
        let mut services = Vec::with_capacity(self.services.len());
        for raw in &self.services {
            let remote = rproc(&raw.remote, "service")?;
            if !links.iter().any(|l| l.remote == remote) {
                return Err(invalid(format!("service on {remote}:{:#04x} has no link", raw.addr)));
            }
            if !seen.insert((remote, raw.addr)) {
                return Err(invalid(format!("duplicate service {remote}:{:#04x}", raw.addr)));
            }
            services.push(ServiceConfig { remote, addr: raw.addr, priority: raw.priority });
        }

        Ok(Config { local, osid: self.local.osid, rpc, links, services })
    }
}

impl RawLink {
    fn kind(&self, remote: Rproc, max_payload: usize) -> Result<LinkKind, ConfigError> {
        let shm_only = self.ring_slots.is_some() || self.slot_bytes.is_some() || self.poll_us.is_some();
        match self.kind {
            RawKind::Loopback | RawKind::Mailbox if shm_only => {
                Err(invalid(format!("link to {remote}: ring options only apply to shm")))
            }
            RawKind::Loopback => Ok(LinkKind::Loopback),
            RawKind::Mailbox if HEADER_LEN + max_payload > MAILBOX_MAX_FRAME => Err(invalid(format!(
                "link to {remote}: mailbox frames hold at most {} payload bytes",
                MAILBOX_MAX_FRAME - HEADER_LEN
            ))),
            RawKind::Mailbox => Ok(LinkKind::Mailbox),
            RawKind::Shm => {
                let defaults = ShmConfig::default();
                let ring_slots = self.ring_slots.unwrap_or(defaults.ring_slots);
                let slot_bytes = self.slot_bytes.unwrap_or(defaults.slot_bytes);
                if ring_slots == 0 || !ring_slots.is_power_of_two() {
                    return Err(invalid(format!("link to {remote}: ring_slots must be a power of two")));
                }
                if slot_bytes % 4 != 0 || slot_bytes < HEADER_LEN + max_payload {
                    return Err(invalid(format!(
                        "link to {remote}: slot_bytes must be a multiple of 4 holding {} bytes",
                        HEADER_LEN + max_payload
                    )));
                }
                let doorbell = match self.poll_us {
                    Some(0) => return Err(invalid(format!("link to {remote}: poll_us must be non-zero"))),
                    Some(us) => DoorbellConfig { poll: Duration::from_micros(us) },
                    None => defaults.doorbell,
                };
                Ok(LinkKind::Shm(ShmConfig { ring_slots, slot_bytes, doorbell }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
        [local]
        rproc = "AP1"
        osid = 3

        [rpc]
        timeout_ms = 250

        [[link]]
        remote = "mpc"
        kind = "shm"
        ring_slots = 8
        poll_us = 100

        [[link]]
        remote = "sec"
        kind = "mailbox"

        [[service]]
        remote = "mpc"
        addr = 0x10
        priority = true

        [[service]]
        remote = "sec"
    "#;

    #[test]
    fn sample_parses() {
        let cfg = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.local, Rproc::Ap1);
        assert_eq!(cfg.osid, 3);
        assert_eq!(cfg.rpc.timeout, Duration::from_millis(250));
        assert_eq!(cfg.rpc.max_payload, DEFAULT_MAX_PAYLOAD);
        match cfg.link(Rproc::Mpc).unwrap().kind {
            LinkKind::Shm(shm) => {
                assert_eq!(shm.ring_slots, 8);
                assert_eq!(shm.doorbell.poll, Duration::from_micros(100));
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(cfg.services[1], ServiceConfig { remote: Rproc::Sec, addr: RPCALL_ADDR, priority: false });
    }

    #[test]
    fn load_reports_path() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[local]\nrproc = ").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(&err, ConfigError::Parse { path, .. } if path == file.path()));

        let missing = file.path().with_extension("missing");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        assert_eq!(Config::load(file.path()).unwrap().links.len(), 2);
    }

    fn rejects(doc: &str, needle: &str) {
        match Config::from_toml_str(doc) {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains(needle), "{msg}"),
            other => panic!("expected invalid config containing '{needle}', got {other:?}"),
        }
    }

    #[test]
    fn validation_errors() {
        rejects("[local]\nrproc = \"cpu9\"", "unknown rproc");
        rejects("[local]\nrproc = \"ap1\"\nosid = 16", "osid");
        rejects("[local]\nrproc = \"ap1\"\n[rpc]\nmax_payload = 4096", "max_payload");
        rejects("[local]\nrproc = \"ap1\"\n[rpc]\ntimeout_ms = 0", "timeout_ms");
        rejects(
            "[local]\nrproc = \"ap1\"\n[[link]]\nremote = \"mpc\"\nkind = \"loopback\"\n[[link]]\nremote = \"mpc\"\nkind = \"mailbox\"",
            "duplicate link",
        );
        rejects("[local]\nrproc = \"ap1\"\n[[link]]\nremote = \"ap1\"\nkind = \"loopback\"", "local rproc");
        rejects("[local]\nrproc = \"ap1\"\n[[service]]\nremote = \"mpc\"", "has no link");
        rejects(
            "[local]\nrproc = \"ap1\"\n[[link]]\nremote = \"mpc\"\nkind = \"loopback\"\n[[service]]\nremote = \"mpc\"\n[[service]]\nremote = \"mpc\"",
            "duplicate service",
        );
        rejects(
            "[local]\nrproc = \"ap1\"\n[[link]]\nremote = \"mpc\"\nkind = \"shm\"\nring_slots = 6",
            "power of two",
        );
        rejects(
            "[local]\nrproc = \"ap1\"\n[[link]]\nremote = \"mpc\"\nkind = \"shm\"\nslot_bytes = 64",
            "slot_bytes",
        );
        rejects(
            "[local]\nrproc = \"ap1\"\n[[link]]\nremote = \"mpc\"\nkind = \"mailbox\"\nring_slots = 4",
            "only apply to shm",
        );
    }

    #[test]
    fn mailbox_bounds_max_payload() {
        let base = "[local]\nrproc = \"ap1\"\n[[link]]\nremote = \"sec\"\nkind = \"mailbox\"\n";
        rejects(&format!("{base}[rpc]\nmax_payload = 513\n"), "mailbox frames hold at most 512");
        let cfg = Config::from_toml_str(&format!("{base}[rpc]\nmax_payload = 512\n")).unwrap();
        assert_eq!(cfg.rpc.max_payload, 512);
    }

    #[test]
    fn out_of_range_addr_is_a_parse_error() {
        let doc = "[local]\nrproc = \"ap1\"\n[[link]]\nremote = \"mpc\"\nkind = \"loopback\"\n[[service]]\nremote = \"mpc\"\naddr = 300";
        assert!(matches!(Config::from_toml_str(doc), Err(ConfigError::Syntax(_))));
    }

    #[test]
    fn builtin_is_valid_shape() {
        let cfg = Config::builtin();
        assert_eq!(cfg.links.len(), cfg.services.len());
        assert!(cfg.services.iter().all(|s| cfg.link(s.remote).is_some()));
    }
}
