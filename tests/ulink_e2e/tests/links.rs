//! CONTEXT: ulink end-to-end tests across every transport kind
//! INTENT: Router + Call + rpcall behaviour over loopback, shared memory and mailbox links
//! IDL (target): request_channel / Call::call / RpcClient over ulink
//! DEPS: sdrv-ipc, ulink, rpcalld (server side)
//! READINESS: Host backend ready
//! TESTS: Registry lifetime, fast fail, echo identity, serialisation, doorbell counts, rpcall
// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use proptest::prelude::*;
use rpcalld::RpcServer;
use sdrv_abi::rpc::cmd;
use sdrv_abi::{errno, Rproc};
use sdrv_ipc::{Call, CallConfig, IpcError, Router, RpcClient, Transport, Wait};
use ulink::{DmaBudget, DmaChannel, ShmConfig, SimDmaEngine};
use ulink_e2e::{routers, shm_link, Kind, ALL_KINDS, CLIENT, SERVER};

const ECHO_ADDR: u8 = 0x40;

fn echo(server: &Router) -> sdrv_ipc::Channel {
    server
        .request_channel(CLIENT, ECHO_ADDR, |msg, reply| {
            reply.reply(msg.payload).unwrap();
        })
        .unwrap()
}

fn kind_strategy() -> impl Strategy<Value = Kind> {
    prop::sample::select(ALL_KINDS.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn open_close_keeps_registry_size(kind in kind_strategy(), addr in any::<u8>()) {
        let (client, _server) = routers(kind);
        let before = client.channel_count();
        let ch = client.request_channel(SERVER, addr, |_, _| {}).unwrap();
        prop_assert_eq!(client.channel_count(), before + 1);
        ch.release();
        prop_assert_eq!(client.channel_count(), before);
    }

    #[test]
    fn echo_is_identity(kind in kind_strategy(), payload in proptest::collection::vec(any::<u8>(), 0..=512)) {
        let (client, server) = routers(kind);
        let _echo = echo(&server);
        let call = Call::open(&client, SERVER, ECHO_ADDR, CallConfig::default()).unwrap();
        prop_assert_eq!(call.call(&payload).unwrap(), payload);
    }
}

#[test]
fn absent_peer_fails_fast_on_every_kind() {
    for kind in ALL_KINDS {
        let (client, server) = routers(kind);
        let call = Call::open(&client, SERVER, ECHO_ADDR, CallConfig::default()).unwrap();
        drop(server);
        let deadline = Instant::now() + Duration::from_secs(2);
        while client.link_ready(SERVER) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        let start = Instant::now();
        assert_eq!(call.call(b"ping"), Err(IpcError::NoDevice), "{kind:?}");
        assert!(start.elapsed() < Duration::from_millis(100), "{kind:?}");
    }
}

#[test]
fn calls_on_one_object_never_overlap() {
    for kind in ALL_KINDS {
        let (client, server) = routers(kind);
        let in_service = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let _svc = {
            let in_service = Arc::clone(&in_service);
            let overlaps = Arc::clone(&overlaps);
            server
                .request_channel(CLIENT, ECHO_ADDR, move |msg, reply| {
                    if in_service.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(5));
                    in_service.fetch_sub(1, Ordering::SeqCst);
                    reply.reply(msg.payload).unwrap();
                })
                .unwrap()
        };
        let call = Arc::new(Call::open(&client, SERVER, ECHO_ADDR, CallConfig::default()).unwrap());
        let workers: Vec<_> = (0u8..6)
            .map(|i| {
                let call = Arc::clone(&call);
                thread::spawn(move || call.call(&[i; 4]).unwrap() == [i; 4])
            })
            .collect();
        assert!(workers.into_iter().all(|w| w.join().unwrap()), "{kind:?}");
        assert_eq!(overlaps.load(Ordering::SeqCst), 0, "{kind:?}");
        assert_eq!(server.stats().delivered, 6, "{kind:?}");
    }
}

#[test]
fn each_shm_frame_rings_the_doorbell_once() {
    let (a, b) = shm_link(ShmConfig::default());
    for i in 0u8..12 {
        a.send(&[i], Wait::Blocking).unwrap();
    }
    let deadline = Instant::now() + Duration::from_secs(5);
    while b.doorbells_handled() < 12 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    thread::sleep(Duration::from_millis(20));
    assert_eq!(b.doorbells_handled(), 12);
    for i in 0u8..12 {
        assert_eq!(b.recv(Wait::NonBlocking).unwrap(), [i]);
    }
}

#[test]
fn rpcall_over_each_kind() {
    for kind in ALL_KINDS {
        let (client, server) = routers(kind);
        let rpc_server = Arc::new(RpcServer::new());
        rpc_server.register(cmd::USER_BASE, |p| Ok([p[0] * 2, 0, 0, 0, 0, 0])).unwrap();
        let _listen = rpc_server.serve(&server, CLIENT, 0x10, false).unwrap();

        let rpc = RpcClient::open(&client, SERVER, 0x10, CallConfig::default()).unwrap();
        assert_eq!(rpc.echo([9, 8, 7, 6, 5, 4, 3, 2]).unwrap(), [9, 8, 7, 6, 5, 4]);
        assert_eq!(rpc.channels().unwrap(), 1);
        let resp = rpc
            .request(&sdrv_abi::rpc::RpcRequest::with_params(cmd::USER_BASE, [21, 0, 0, 0, 0, 0, 0, 0]))
            .unwrap();
        assert_eq!(resp.results[0], 42);
        let unknown = rpc.request(&sdrv_abi::rpc::RpcRequest::new(0x999)).unwrap();
        assert_eq!(unknown.retcode, -errno::EINVAL);
        assert_eq!(rpc_server.stats().served, 4, "{kind:?}");
    }
}

#[test]
fn malformed_rpcall_is_dropped_and_times_out() {
    let (client, server) = routers(Kind::Mailbox);
    let rpc_server = Arc::new(RpcServer::new());
    let _listen = rpc_server.serve(&server, CLIENT, 0x10, false).unwrap();
    let config = CallConfig { timeout: Duration::from_millis(50), ..CallConfig::default() };
    let call = Call::open(&client, SERVER, 0x10, config).unwrap();
    assert_eq!(call.call(b"short"), Err(IpcError::Timeout));
    assert_eq!(rpc_server.stats().malformed, 1);
}

#[test]
fn dma_failures_share_the_sentinel() {
    let dma = DmaChannel::new(
        SimDmaEngine::with_latency(1024, Duration::from_micros(100)),
        DmaBudget { base: Duration::from_millis(10), per_byte: Duration::from_nanos(1) },
    );
    dma.engine().write_mem(0, &[0xAB; 64]).unwrap();
    assert_eq!(dma.write(0, 512, 64), Ok(64));
    assert_eq!(dma.engine().read_mem(512, 64).unwrap(), vec![0xAB; 64]);

    dma.engine().inject_short(1);
    let short = dma.read(512, 128, 64).unwrap_err();
    dma.engine().set_stalled(true);
    let stalled = dma.read(512, 128, 64).unwrap_err();
    assert_eq!((short.sentinel(), stalled.sentinel()), (-1, -1));
}

#[test]
fn unrelated_remote_is_not_ready() {
    let (client, _server) = routers(Kind::Shm);
    assert!(client.link_ready(SERVER));
    assert!(!client.link_ready(Rproc::Vdsp));
}
