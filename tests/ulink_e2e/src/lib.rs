//! CONTEXT: ulink end-to-end test harness library
//! INTENT: Two routers joined by a real transport of each kind
//! DEPS: sdrv-ipc (routers, calls), ulink (shm / mailbox transports)
//! READINESS: Host backend ready; loopback, shm and mailbox links
//! TESTS: Registry lifetime, fast fail, echo identity, call serialisation, doorbell counts
// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use std::sync::Arc;

use sdrv_abi::Rproc;
use sdrv_ipc::{loopback_pair, Router, Transport};
use ulink::{mailbox_pair, shm_pair, ShmConfig, ShmTransport};

/// Domain the tests call from.
pub const CLIENT: Rproc = Rproc::Ap1;
/// Domain the tests call into.
pub const SERVER: Rproc = Rproc::Mpc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Loopback,
    Shm,
    Mailbox,
}

pub const ALL_KINDS: [Kind; 3] = [Kind::Loopback, Kind::Shm, Kind::Mailbox];

/// Both ends of a fresh link.
pub fn link(kind: Kind) -> (Arc<dyn Transport>, Arc<dyn Transport>) {
    match kind {
        Kind::Loopback => {
            let (a, b) = loopback_pair();
            (Arc::new(a), Arc::new(b))
        }
        Kind::Shm => {
            let (a, b) = shm_link(ShmConfig::default());
            (a, b)
        }
        Kind::Mailbox => {
            let (a, b) = mailbox_pair();
            (Arc::new(a), Arc::new(b))
        }
    }
}

/// Shared-memory link keeping the concrete type for counter inspection.
pub fn shm_link(config: ShmConfig) -> (Arc<ShmTransport>, Arc<ShmTransport>) {
    let (a, b) = shm_pair(config).expect("shm probe");
    (Arc::new(a), Arc::new(b))
}

/// Client and server routers joined by a link of `kind`.
pub fn routers(kind: Kind) -> (Router, Router) {
    let (near, far) = link(kind);
    let client = Router::new(CLIENT, 1).expect("client router");
    let server = Router::new(SERVER, 2).expect("server router");
    client.attach(SERVER, near).expect("attach client");
    server.attach(CLIENT, far).expect("attach server");
    (client, server)
}
