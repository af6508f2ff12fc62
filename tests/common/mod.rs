#![allow(dead_code)]

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use ahash::{HashMap, HashMapExt};
use async_trait::async_trait;
use bytes::Bytes;
use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    hash::MessageDigest,
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::{X509, X509NameBuilder, X509Ref, extension::BasicConstraints},
};
use parking_lot::Mutex;

use meshlan::{
    NodeHandler,
    channel::{AlgorithmInfo, ChannelError, CipherSuite, EllipticCurve, SecureChannel},
    config::Identity,
    endpoint::Resolver,
    fabric::{Fabric, Port, PortGroup, PortHandle},
    trust::Fingerprint,
    wire,
};

/// One operation the node drove on the mock engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Open(SocketAddr),
    Close,
    SetCiphers(Vec<CipherSuite>),
    Greet(SocketAddr),
    IntroduceTo(SocketAddr),
    RequestSession(SocketAddr),
    ContactRequest(Vec<Fingerprint>),
    SendData(SocketAddr, u8, Bytes),
}

/// Secure channel engine double that records every operation.
#[derive(Default)]
pub struct MockChannel {
    ops: Mutex<Vec<Op>>,
    /// `Some(rtt)` answers hellos, `None` times them out.
    pub greet_latency: Mutex<Option<Duration>>,
    /// Per-address outcomes returned by `send_contact_request_to_all`.
    pub contact_outcomes: Mutex<Vec<(SocketAddr, bool)>>,
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            greet_latency: Mutex::new(Some(Duration::from_millis(12))),
            ..Default::default()
        })
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&Op) -> bool) -> usize {
        self.ops.lock().iter().filter(|op| matches(op)).count()
    }
}

#[async_trait]
impl SecureChannel for MockChannel {
    async fn open(&self, listen: SocketAddr) -> Result<(), ChannelError> {
        self.ops.lock().push(Op::Open(listen));
        Ok(())
    }

    async fn close(&self) {
        self.ops.lock().push(Op::Close);
    }

    fn set_cipher_capabilities(&self, suites: Vec<CipherSuite>) {
        self.ops.lock().push(Op::SetCiphers(suites));
    }

    async fn greet(&self, addr: SocketAddr, timeout: Duration) -> Result<Duration, ChannelError> {
        self.ops.lock().push(Op::Greet(addr));
        match *self.greet_latency.lock() {
            Some(latency) => Ok(latency),
            None => Err(ChannelError::HelloTimeout(timeout)),
        }
    }

    async fn introduce_to(&self, addr: SocketAddr) -> Result<(), ChannelError> {
        self.ops.lock().push(Op::IntroduceTo(addr));
        Ok(())
    }

    async fn request_session(&self, addr: SocketAddr) -> Result<(), ChannelError> {
        self.ops.lock().push(Op::RequestSession(addr));
        Ok(())
    }

    async fn send_contact_request_to_all(
        &self,
        fingerprints: Vec<Fingerprint>,
    ) -> HashMap<SocketAddr, Result<(), ChannelError>> {
        self.ops.lock().push(Op::ContactRequest(fingerprints));

        let mut results = HashMap::new();
        for (addr, delivered) in self.contact_outcomes.lock().iter() {
            results.insert(
                *addr,
                delivered.then_some(()).ok_or(ChannelError::Closed),
            );
        }

        results
    }

    async fn send_data(
        &self,
        addr: SocketAddr,
        channel: u8,
        payload: Bytes,
    ) -> Result<(), ChannelError> {
        self.ops.lock().push(Op::SendData(addr, channel, payload));
        Ok(())
    }
}

/// Switch/router double that tracks port registrations and injected frames.
#[derive(Default)]
pub struct MockFabric {
    next: AtomicU64,
    pub registered: Mutex<Vec<(u64, SocketAddr, PortGroup)>>,
    pub unregistered: Mutex<Vec<u64>>,
    pub injected: Mutex<Vec<(u64, Bytes)>>,
    ports: Mutex<HashMap<u64, Port>>,
}

impl MockFabric {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of ports currently registered.
    pub fn live(&self) -> usize {
        self.ports.lock().len()
    }

    /// Drive one egress frame through the port registered under `id`.
    pub fn egress(&self, id: u64, frame: Bytes) {
        self.ports.lock().get(&id).unwrap().egress(frame);
    }
}

impl Fabric for MockFabric {
    fn register_port(&self, port: Port, group: PortGroup) -> PortHandle {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.registered.lock().push((id, port.peer(), group));
        self.ports.lock().insert(id, port);
        PortHandle(id)
    }

    fn unregister_port(&self, handle: PortHandle) {
        self.unregistered.lock().push(handle.0);
        self.ports.lock().remove(&handle.0);
    }

    fn inject(&self, handle: PortHandle, frame: Bytes) {
        self.injected.lock().push((handle.0, frame));
    }
}

/// Resolver double with a fixed host table.
#[derive(Default)]
pub struct StaticResolver(pub HashMap<String, Vec<SocketAddr>>);

impl StaticResolver {
    pub fn with(host: &str, addrs: &[&str]) -> Arc<Self> {
        let mut table = HashMap::new();
        table.insert(
            host.to_string(),
            addrs.iter().map(|it| it.parse().unwrap()).collect(),
        );

        Arc::new(Self(table))
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn lookup(&self, host: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
        self.0.get(host).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("unknown host {host}"))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Established(SocketAddr, bool),
    Failed(SocketAddr, bool),
    Lost(SocketAddr),
    Message(SocketAddr, wire::Message),
}

/// Handler double: records events, optionally overrides the certificate
/// decision.
#[derive(Default, Clone)]
pub struct TestHandler {
    pub events: Arc<Mutex<Vec<Event>>>,
    pub certificate_override: Arc<Mutex<Option<bool>>>,
}

impl TestHandler {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl NodeHandler for TestHandler {
    fn check_certificate(&self, _certificate: &X509Ref) -> Option<bool> {
        *self.certificate_override.lock()
    }

    fn on_session_established(
        &self,
        peer: SocketAddr,
        is_new: bool,
        _local: AlgorithmInfo,
        _remote: AlgorithmInfo,
    ) {
        self.events.lock().push(Event::Established(peer, is_new));
    }

    fn on_session_failed(&self, peer: SocketAddr, is_new: bool) {
        self.events.lock().push(Event::Failed(peer, is_new));
    }

    fn on_session_lost(&self, peer: SocketAddr) {
        self.events.lock().push(Event::Lost(peer));
    }

    fn on_message(&self, peer: SocketAddr, message: wire::Message) {
        self.events.lock().push(Event::Message(peer, message));
    }
}

pub fn keypair() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

fn name(cn: &str) -> openssl::x509::X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_text("CN", cn).unwrap();
    builder.build()
}

/// Self-signed certification authority.
pub fn authority(cn: &str) -> (X509, PKey<Private>) {
    let key = keypair();
    let name = name(cn);

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    (builder.build(), key)
}

/// Leaf certificate issued by `issuer`.
pub fn leaf(cn: &str, issuer: &X509, issuer_key: &PKey<Private>) -> X509 {
    let key = keypair();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&BigNum::from_u32(2).unwrap().to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name(cn)).unwrap();
    builder.set_issuer_name(issuer.subject_name()).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder.sign(issuer_key, MessageDigest::sha256()).unwrap();

    builder.build()
}

/// A throwaway local identity.
pub fn identity() -> Identity {
    let (certificate, key) = authority("local-node");
    Identity { certificate, key }
}

pub fn algorithms() -> AlgorithmInfo {
    AlgorithmInfo {
        cipher_suite: CipherSuite::EcdheRsaAes256GcmSha384,
        elliptic_curve: EllipticCurve::Sect571k1,
    }
}

/// Let spawned handlers run to completion on the paused test runtime.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
