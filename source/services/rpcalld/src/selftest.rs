// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-process bring-up of a configured topology.
//!
//! Every link gets a transport pair: the local end is attached to the local
//! router, the far end to a router standing in for the remote domain, which
//! runs the rpcall server for each configured service. The local side then
//! exercises every service through an [`RpcClient`].

use std::sync::Arc;

use log::{info, warn};
use sdrv_abi::rpc::{RPC_PARAM_WORDS, RPC_PROTOCOL_VERSION};
use sdrv_abi::Rproc;
use sdrv_ipc::{loopback_pair, CallConfig, Channel, ChannelConfig, Router, RpcClient, Transport};
use ulink::{mailbox_pair, shm_pair, DmaBudget, DmaChannel, SimDmaEngine};

use crate::config::{Config, LinkKind};
use crate::server::RpcServer;
use crate::DaemonError;

/// Creates both ends of a link of the given kind.
pub fn connect(kind: LinkKind) -> Result<(Arc<dyn Transport>, Arc<dyn Transport>), DaemonError> {
    Ok(match kind {
        LinkKind::Loopback => {
            let (a, b) = loopback_pair();
            (Arc::new(a), Arc::new(b))
        }
        LinkKind::Shm(shm) => {
            let (a, b) = shm_pair(shm)?;
            (Arc::new(a), Arc::new(b))
        }
        LinkKind::Mailbox => {
            let (a, b) = mailbox_pair();
            (Arc::new(a), Arc::new(b))
        }
    })
}

/// A running topology: local router plus one simulated router per remote.
pub struct Topology {
    pub local: Router,
    remotes: Vec<Router>,
    server: Arc<RpcServer>,
    // Held open for the topology's lifetime.
    _listeners: Vec<Channel>,
}

impl Topology {
    pub fn start(config: &Config) -> Result<Self, DaemonError> {
        let local = Router::new(config.local, config.osid)?;
        let server = Arc::new(RpcServer::new());
        let mut remotes = Vec::with_capacity(config.links.len());
        let mut listeners = Vec::with_capacity(config.services.len());
        for link in &config.links {
            let (near, far) = connect(link.kind)?;
            let remote = Router::new(link.remote, 0)?;
            local.attach(link.remote, near)?;
            remote.attach(config.local, far)?;
            info!("rpcalld: {} link to {} up", link.kind.name(), link.remote);
            for svc in config.services.iter().filter(|s| s.remote == link.remote) {
                listeners.push(server.serve(&remote, config.local, svc.addr, svc.priority)?);
            }
            remotes.push(remote);
        }
        Ok(Self { local, remotes, server, _listeners: listeners })
    }

    pub fn server(&self) -> &Arc<RpcServer> {
        &self.server
    }

    pub fn remote(&self, rproc: Rproc) -> Option<&Router> {
        self.remotes.iter().find(|r| r.local() == rproc)
    }
}

/// Outcome of a selftest run, one line per check.
#[derive(Debug, Default)]
pub struct SelftestReport {
    pub lines: Vec<String>,
}

impl SelftestReport {
    fn pass(&mut self, line: String) {
        info!("rpcalld: selftest {line}");
        self.lines.push(line);
    }
}

fn check(cond: bool, check: &'static str, detail: impl FnOnce() -> String) -> Result<(), DaemonError> {
    if cond {
        Ok(())
    } else {
        let detail = detail();
        warn!("rpcalld: selftest {check} failed: {detail}");
        Err(DaemonError::Check { check, detail })
    }
}

pub fn run(config: &Config) -> Result<SelftestReport, DaemonError> {
    let topology = Topology::start(config)?;
    let mut report = SelftestReport::default();
    let params: [u32; RPC_PARAM_WORDS] = core::array::from_fn(|i| 0x5100 + i as u32);

    for svc in &config.services {
        let call_config = CallConfig {
            timeout: config.rpc.timeout,
            max_payload: config.rpc.max_payload,
            channel: ChannelConfig { priority: svc.priority, ..ChannelConfig::default() },
        };
        let client = RpcClient::open(&topology.local, svc.remote, svc.addr, call_config)?;
        let echoed = client.echo(params)?;
        check(echoed[..] == params[..echoed.len()], "echo", || format!("{echoed:x?}"))?;
        let version = client.version()?;
        check(version == RPC_PROTOCOL_VERSION, "version", || format!("{version:#x}"))?;
        let channels = client.channels()?;
        check(channels >= 1, "channels", || channels.to_string())?;
        report.pass(format!("{}:{:#04x} ok (version {version:#x}, {channels} channels)", svc.remote, svc.addr));
    }

    report.pass(dma_check()?);
    Ok(report)
}

fn dma_check() -> Result<String, DaemonError> {
    const HOST: u64 = 0x0000;
    const BAR: u64 = 0x1000;
    const LEN: u32 = 256;
    let dma = DmaChannel::new(SimDmaEngine::new(0x2000), DmaBudget::default());
    let pattern: Vec<u8> = (0..LEN).map(|i| i as u8).collect();
    dma.engine().write_mem(HOST, &pattern)?;
    dma.write(HOST, BAR, LEN)?;
    let copied = dma.engine().read_mem(BAR, LEN as usize)?;
    check(copied == pattern, "dma", || "pattern mismatch".into())?;
    Ok(format!("dma {LEN} bytes ok"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_topology_passes() {
        let config = Config::builtin();
        let report = run(&config).unwrap();
        assert_eq!(report.lines.len(), config.services.len() + 1);
        assert!(report.lines.iter().all(|l| l.contains("ok")));
    }

    #[test]
    fn topology_serves_each_remote() {
        let config = Config::builtin();
        let topology = Topology::start(&config).unwrap();
        for link in &config.links {
            let remote = topology.remote(link.remote).unwrap();
            assert_eq!(remote.channel_count(), 1);
            assert!(topology.local.link_ready(link.remote));
        }
    }
}
