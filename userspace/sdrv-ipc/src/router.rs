// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: ulink channel router (per-rproc links, per-(rproc, addr) channels)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//!
//! Each attached link gets an rx thread that decodes frames and dispatches on
//! (link remote, header addr). The receiving side stamps the link's remote id
//! into the header before lookup; the sender wrote the destination id there.
//! Unmatched or undecodable frames are dropped and counted.
//!
//! The channel list is a short spin-locked vector; dispatch is a linear scan.
//! Callbacks run outside the list lock so they may reply or open channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use sdrv_abi::{decode_frame, encode_frame, proto, MsgHeader, Rproc, MAX_PAYLOAD};
use sdrv_sync::SpinLock;

use crate::{IpcError, Result, Transport, Wait};

/// How long an rx thread blocks before re-checking its stop flag.
const RX_POLL: Duration = Duration::from_millis(10);

type Callback = Box<dyn Fn(&Inbound<'_>, &Responder<'_>) + Send + Sync>;

/// A frame delivered to a channel callback.
#[derive(Debug)]
pub struct Inbound<'a> {
    /// Link the frame arrived on.
    pub remote: Rproc,
    /// Decoded header, with `rproc` rewritten to the sender.
    pub header: MsgHeader,
    /// Payload bytes.
    pub payload: &'a [u8],
}

/// Per-channel send parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Protocol id stamped on outbound frames.
    pub protocol: u8,
    /// High-priority flag stamped on outbound frames.
    pub priority: bool,
    /// Wait policy when the transport is momentarily full.
    pub send_wait: Wait,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            protocol: proto::ULINK,
            priority: false,
            send_wait: Wait::Timeout(Duration::from_millis(10)),
        }
    }
}

/// Delivery counters, useful for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Frames handed to a channel callback.
    pub delivered: u64,
    /// Frames with no matching channel.
    pub dropped: u64,
    /// Frames that failed to decode.
    pub malformed: u64,
    /// Frames sent by local channels.
    pub sent: u64,
}

struct Link {
    transport: Arc<dyn Transport>,
    stop: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
}

struct ChannelEntry {
    id: u64,
    remote: Rproc,
    addr: u8,
    callback: Callback,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
    sent: AtomicU64,
}

struct RouterInner {
    local: Rproc,
    osid: u8,
    links: RwLock<HashMap<Rproc, Arc<dyn Transport>>>,
    channels: SpinLock<Vec<Arc<ChannelEntry>>>,
    next_id: AtomicU64,
    counters: Counters,
}

/// Owner of the links and the channel registry for one local domain.
pub struct Router {
    inner: Arc<RouterInner>,
    workers: Mutex<HashMap<Rproc, Link>>,
}

impl Router {
    /// Creates a router for `local`, stamping `osid` on outbound frames.
    pub fn new(local: Rproc, osid: u8) -> Result<Self> {
        // Validate the id against the header width once, up front.
        MsgHeader::new(proto::DEFAULT, local.id(), false, 0, 0, osid)?;
        Ok(Self {
            inner: Arc::new(RouterInner {
                local,
                osid,
                links: RwLock::new(HashMap::new()),
                channels: SpinLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                counters: Counters::default(),
            }),
            workers: Mutex::new(HashMap::new()),
        })
    }

    /// Local processor id.
    pub fn local(&self) -> Rproc {
        self.inner.local
    }

    /// Attaches a transport reaching `remote` and starts its rx thread.
    pub fn attach<T>(&self, remote: Rproc, transport: T) -> Result<()>
    where
        T: Transport + 'static,
    {
        let mut workers = self.workers.lock();
        if workers.contains_key(&remote) {
            return Err(IpcError::AddrInUse);
        }
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let stop = Arc::new(AtomicBool::new(false));
        let weak = Arc::downgrade(&self.inner);
        let rx_transport = Arc::clone(&transport);
        let rx_stop = Arc::clone(&stop);
        let rx_thread = std::thread::Builder::new()
            .name(format!("ulink-rx-{remote}"))
            .spawn(move || rx_loop(weak, remote, rx_transport, rx_stop))
            .map_err(|err| {
                error!("ulink: failed to spawn rx thread for {remote}: {err}");
                IpcError::NoDevice
            })?;
        self.inner.links.write().insert(remote, Arc::clone(&transport));
        workers.insert(remote, Link { transport, stop, rx_thread: Some(rx_thread) });
        info!("ulink: {} attached link to {remote}", self.inner.local);
        Ok(())
    }

    /// Stops the rx thread for `remote` and forgets the link.
    pub fn detach(&self, remote: Rproc) -> Result<()> {
        let link = self.workers.lock().remove(&remote).ok_or(IpcError::NoDevice)?;
        self.inner.links.write().remove(&remote);
        stop_link(remote, link);
        Ok(())
    }

    /// Returns `true` if a link to `remote` is attached and its peer is ready.
    pub fn link_ready(&self, remote: Rproc) -> bool {
        self.inner.links.read().get(&remote).map(|t| t.ready()).unwrap_or(false)
    }

    /// Opens a channel receiving frames from `remote` addressed to `addr`.
    pub fn request_channel<F>(&self, remote: Rproc, addr: u8, callback: F) -> Result<Channel>
    where
        F: Fn(&Inbound<'_>, &Responder<'_>) + Send + Sync + 'static,
    {
        self.request_channel_with(remote, addr, ChannelConfig::default(), callback)
    }

    /// Same as [`Router::request_channel`] with explicit send parameters.
    pub fn request_channel_with<F>(
        &self,
        remote: Rproc,
        addr: u8,
        config: ChannelConfig,
        callback: F,
    ) -> Result<Channel>
    where
        F: Fn(&Inbound<'_>, &Responder<'_>) + Send + Sync + 'static,
    {
        if config.protocol > 0xF {
            return Err(IpcError::Invalid("protocol id exceeds 4 bits"));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut channels = self.inner.channels.lock();
            if channels.iter().any(|c| c.remote == remote && c.addr == addr) {
                return Err(IpcError::AddrInUse);
            }
            channels.push(Arc::new(ChannelEntry { id, remote, addr, callback: Box::new(callback) }));
        }
        debug!("ulink: channel {id} open ({remote}, {addr:#04x})");
        Ok(Channel { inner: Arc::clone(&self.inner), id, remote, addr, config })
    }

    /// Closes a channel. Equivalent to dropping it.
    pub fn release_channel(&self, channel: Channel) {
        drop(channel);
    }

    /// Number of open channels.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.lock().len()
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> RouterStats {
        let c = &self.inner.counters;
        RouterStats {
            delivered: c.delivered.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            sent: c.sent.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        let workers: Vec<(Rproc, Link)> = self.workers.lock().drain().collect();
        self.inner.links.write().clear();
        for (remote, link) in workers {
            stop_link(remote, link);
        }
    }
}

fn stop_link(remote: Rproc, mut link: Link) {
    link.stop.store(true, Ordering::Release);
    if let Some(handle) = link.rx_thread.take() {
        if handle.join().is_err() {
            warn!("ulink: rx thread for {remote} panicked");
        }
    }
    debug!("ulink: link to {remote} detached (peer ready: {})", link.transport.ready());
}

fn rx_loop(
    router: Weak<RouterInner>,
    remote: Rproc,
    transport: Arc<dyn Transport>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Acquire) {
        match transport.recv(Wait::Timeout(RX_POLL)) {
            Ok(frame) => match router.upgrade() {
                Some(inner) => inner.dispatch(remote, &frame),
                None => break,
            },
            Err(IpcError::Timeout | IpcError::WouldBlock) => {}
            Err(IpcError::Disconnected) => {
                info!("ulink: link to {remote} disconnected");
                break;
            }
            Err(err) => {
                warn!("ulink: recv from {remote} failed: {err}");
                std::thread::sleep(RX_POLL);
            }
        }
    }
}

impl RouterInner {
    fn dispatch(&self, remote: Rproc, frame: &[u8]) {
        let (header, payload) = match decode_frame(frame) {
            Ok(parts) => parts,
            Err(err) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                debug!("ulink: malformed frame from {remote}: {err}");
                return;
            }
        };
        let header = header.with_rproc(remote);
        let entry = {
            let channels = self.channels.lock();
            channels.iter().find(|c| c.remote == remote && c.addr == header.addr()).cloned()
        };
        let Some(entry) = entry else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("ulink: no channel for ({remote}, {:#04x}), dropped", header.addr());
            return;
        };
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        let responder = Responder {
            inner: self,
            remote,
            addr: header.addr(),
            protocol: header.protocol(),
            priority: header.priority(),
        };
        (entry.callback)(&Inbound { remote, header, payload }, &responder);
    }

    fn send(
        &self,
        remote: Rproc,
        addr: u8,
        protocol: u8,
        priority: bool,
        payload: &[u8],
        wait: Wait,
    ) -> Result<()> {
        if payload.len() > MAX_PAYLOAD {
            return Err(IpcError::Invalid("payload exceeds header length field"));
        }
        let transport = self.links.read().get(&remote).cloned().ok_or(IpcError::NoDevice)?;
        if !transport.ready() {
            return Err(IpcError::NoDevice);
        }
        let header =
            MsgHeader::new(protocol, remote.id(), priority, addr, payload.len() as u16, self.osid)?;
        let frame = encode_frame(&header, payload)?;
        transport.send(&frame, wait)?;
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn ready(&self, remote: Rproc) -> bool {
        self.links.read().get(&remote).map(|t| t.ready()).unwrap_or(false)
    }

    fn unregister(&self, id: u64) {
        self.channels.lock().retain(|c| c.id != id);
    }
}

/// Reply handle passed to channel callbacks; answers on the inbound channel.
pub struct Responder<'a> {
    inner: &'a RouterInner,
    remote: Rproc,
    addr: u8,
    protocol: u8,
    priority: bool,
}

impl Responder<'_> {
    /// Sends `payload` back to the frame's sender on the same sub-address.
    pub fn reply(&self, payload: &[u8]) -> Result<()> {
        self.inner.send(
            self.remote,
            self.addr,
            self.protocol,
            self.priority,
            payload,
            ChannelConfig::default().send_wait,
        )
    }

    /// Number of channels open on the answering router.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.lock().len()
    }
}

/// An open (rproc, addr) endpoint. Closed on drop.
pub struct Channel {
    inner: Arc<RouterInner>,
    id: u64,
    remote: Rproc,
    addr: u8,
    config: ChannelConfig,
}

impl Channel {
    /// Remote processor this channel talks to.
    pub fn remote(&self) -> Rproc {
        self.remote
    }

    /// Sub-address of this channel.
    pub fn addr(&self) -> u8 {
        self.addr
    }

    /// Returns `true` if the link behind this channel has a live peer.
    pub fn ready(&self) -> bool {
        self.inner.ready(self.remote)
    }

    /// Sends `payload` to the remote's matching channel.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        self.send_with(payload, self.config.send_wait)
    }

    /// Sends with an explicit wait policy.
    pub fn send_with(&self, payload: &[u8], wait: Wait) -> Result<()> {
        self.inner.send(
            self.remote,
            self.addr,
            self.config.protocol,
            self.config.priority,
            payload,
            wait,
        )
    }

    /// Closes the channel.
    pub fn release(self) {}
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.inner.unregister(self.id);
        debug!("ulink: channel {} closed ({}, {:#04x})", self.id, self.remote, self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback_pair;
    use sdrv_sync::Completion;

    #[test]
    fn duplicate_channel_rejected() {
        let router = Router::new(Rproc::Ap1, 0).unwrap();
        let _a = router.request_channel(Rproc::Saf, 1, |_, _| {}).unwrap();
        let err = router.request_channel(Rproc::Saf, 1, |_, _| {}).err();
        assert_eq!(err, Some(IpcError::AddrInUse));
        let _b = router.request_channel(Rproc::Sec, 1, |_, _| {}).unwrap();
        assert_eq!(router.channel_count(), 2);
    }

    #[test]
    fn dropped_channel_leaves_registry() {
        let router = Router::new(Rproc::Ap1, 0).unwrap();
        let ch = router.request_channel(Rproc::Saf, 9, |_, _| {}).unwrap();
        assert_eq!(router.channel_count(), 1);
        router.release_channel(ch);
        assert_eq!(router.channel_count(), 0);
    }

    #[test]
    fn send_without_link_is_no_device() {
        let router = Router::new(Rproc::Ap1, 0).unwrap();
        let ch = router.request_channel(Rproc::Saf, 1, |_, _| {}).unwrap();
        assert!(!ch.ready());
        assert_eq!(ch.send(b"x"), Err(IpcError::NoDevice));
    }

    #[test]
    fn frames_route_by_remote_and_addr() {
        let (a_end, b_end) = loopback_pair();
        let a = Router::new(Rproc::Ap1, 1).unwrap();
        let b = Router::new(Rproc::Saf, 2).unwrap();
        a.attach(Rproc::Saf, a_end).unwrap();
        b.attach(Rproc::Ap1, b_end).unwrap();

        let got = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(Completion::new());
        let _rx = {
            let got = Arc::clone(&got);
            let done = Arc::clone(&done);
            b.request_channel(Rproc::Ap1, 0x20, move |msg, _| {
                got.lock().push((msg.header.rproc(), msg.header.osid(), msg.payload.to_vec()));
                done.complete();
            })
            .unwrap()
        };
        let tx = a.request_channel(Rproc::Saf, 0x20, |_, _| {}).unwrap();
        let stray = a.request_channel(Rproc::Saf, 0x21, |_, _| {}).unwrap();

        stray.send(b"nobody").unwrap();
        tx.send(b"hello").unwrap();
        assert!(done.wait_timeout(Duration::from_secs(2)));
        assert_eq!(*got.lock(), vec![(Rproc::Ap1.id(), 1, b"hello".to_vec())]);
        assert_eq!(b.stats().dropped, 1);
        assert_eq!(b.stats().delivered, 1);
        assert_eq!(a.stats().sent, 2);
    }

    #[test]
    fn duplicate_link_rejected() {
        let (a_end, _b_end) = loopback_pair();
        let (c_end, _d_end) = loopback_pair();
        let router = Router::new(Rproc::Ap1, 0).unwrap();
        router.attach(Rproc::Saf, a_end).unwrap();
        assert_eq!(router.attach(Rproc::Saf, c_end), Err(IpcError::AddrInUse));
        router.detach(Rproc::Saf).unwrap();
        assert_eq!(router.detach(Rproc::Saf), Err(IpcError::NoDevice));
    }
}
