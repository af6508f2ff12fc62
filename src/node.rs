use std::{
    future::Future,
    net::SocketAddr,
    sync::{Arc, Weak},
    time::Duration,
};

use ahash::{HashMap, HashMapExt};
use bytes::Bytes;
use openssl::x509::{X509, X509Crl, X509Ref};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::{
    sync::watch,
    task::{JoinHandle, JoinSet},
};

use crate::{
    NodeHandler,
    admission::Banlist,
    channel::{
        AlgorithmInfo, ChannelError, ChannelEvents, CipherSuite, FRAME_CHANNEL, MESSAGE_CHANNEL,
        PeerIdentity, SecureChannel,
    },
    config::{Config, Identity},
    contact,
    endpoint::{self, Endpoint, Resolver, SystemResolver},
    fabric::{Fabric, PortRegistry},
    peer::{PeerRecord, PeerStage},
    trust::{Fingerprint, TrustEvaluator},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("the node is already open")]
    AlreadyOpen,
    #[error("cannot open a node without an identity")]
    MissingIdentity,
    #[error("listen endpoint did not resolve: {0}")]
    ListenResolution(#[from] std::io::Error),
    #[error(transparent)]
    Crypto(#[from] openssl::error::ErrorStack),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Everything a node is built from, next to its collaborators.
///
/// The configuration is immutable for as long as the node stays open.
pub struct NodeOptions<H> {
    pub config: Config,
    /// Local key and certificate. Opening fails without one.
    pub identity: Option<Identity>,
    /// Trusted certification authorities.
    pub authorities: Vec<X509>,
    /// Certificate revocation lists.
    pub crls: Vec<X509Crl>,
    /// Certificates searched for through other peers on the dynamic tick.
    pub dynamic_contacts: Vec<X509>,
    pub handler: H,
}

enum Status {
    Closed,
    Opening,
    Open {
        shutdown: watch::Sender<bool>,
        loops: Vec<JoinHandle<()>>,
    },
}

/// The node coordinator.
///
/// Owns the per-peer state machine and reacts to secure channel events:
/// it resolves and contacts configured peers on a schedule, walks each peer
/// through hello, presentation and session establishment, enforces the
/// never-contact list and the trust policy, and bridges established peers
/// into the local fabric.
///
/// All callbacks and scheduled work run on the embedding tokio runtime; the
/// runtime is expected to be multi-threaded, since certificate verification
/// runs inline in the presentation callback.
pub struct Node<H> {
    weak: Weak<Self>,
    config: Config,
    identity: Option<Identity>,
    authorities: Vec<X509>,
    crls: Vec<X509Crl>,
    dynamic_contacts: Vec<X509>,
    banlist: Banlist,
    handler: H,
    channel: Arc<dyn SecureChannel>,
    resolver: Arc<dyn Resolver>,
    ports: PortRegistry,
    trust: RwLock<Option<TrustEvaluator>>,
    peers: Mutex<HashMap<SocketAddr, PeerRecord>>,
    // Event-driven sends in flight, joined by close().
    tasks: Mutex<JoinSet<()>>,
    status: Mutex<Status>,
}

impl<H> Node<H>
where
    H: NodeHandler,
{
    /// Create a node resolving names through the operating system.
    pub fn new(
        options: NodeOptions<H>,
        channel: Arc<dyn SecureChannel>,
        fabric: Arc<dyn Fabric>,
    ) -> Arc<Self> {
        Self::with_resolver(options, channel, fabric, Arc::new(SystemResolver))
    }

    pub fn with_resolver(
        options: NodeOptions<H>,
        channel: Arc<dyn SecureChannel>,
        fabric: Arc<dyn Fabric>,
        resolver: Arc<dyn Resolver>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            banlist: Banlist::new(options.config.never_contact.clone()),
            ports: PortRegistry::new(options.config.adapter, fabric, channel.clone()),
            identity: options.identity,
            authorities: options.authorities,
            crls: options.crls,
            dynamic_contacts: options.dynamic_contacts,
            handler: options.handler,
            config: options.config,
            channel,
            resolver,
            trust: RwLock::new(None),
            peers: Mutex::new(HashMap::new()),
            tasks: Mutex::new(JoinSet::new()),
            status: Mutex::new(Status::Closed),
        })
    }

    /// Open the node.
    ///
    /// Builds the trust store, resolves the listen endpoint, opens the
    /// secure channel engine and starts the contact loops. Fails without
    /// side effects when the configuration is unusable; the node stays
    /// closed in that case.
    pub async fn open(&self) -> Result<(), Error> {
        {
            let mut status = self.status.lock();
            if !matches!(*status, Status::Closed) {
                return Err(Error::AlreadyOpen);
            }

            *status = Status::Opening;
        }

        match self.try_open().await {
            Ok(open) => {
                *self.status.lock() = open;
                Ok(())
            }
            Err(e) => {
                *self.status.lock() = Status::Closed;
                Err(e)
            }
        }
    }

    async fn try_open(&self) -> Result<Status, Error> {
        if self.identity.is_none() {
            return Err(Error::MissingIdentity);
        }

        *self.trust.write() = Some(TrustEvaluator::new(
            self.config.trust,
            self.config.crl_check,
            &self.authorities,
            &self.crls,
        )?);

        let listen =
            endpoint::resolve_endpoint(self.resolver.as_ref(), &self.config.listen, self.config.protocol)
                .await?;

        self.channel.set_cipher_capabilities(self.config.ciphers.clone());
        self.channel.open(listen).await?;

        let (shutdown, receiver) = watch::channel(false);
        let loops = contact::spawn(self.weak.clone(), receiver);

        log::info!(
            "node open: listen={}, adapter={:?}, contacts={}",
            listen,
            self.config.adapter,
            self.config.contacts.len()
        );

        Ok(Status::Open { shutdown, loops })
    }

    /// Close the node.
    ///
    /// Stops both contact loops together with their in-flight work, closes
    /// the secure channel engine and drops every registered port. When this
    /// returns, no handler of this node will run anymore.
    pub async fn close(&self) {
        let (shutdown, loops) = {
            let mut status = self.status.lock();
            match std::mem::replace(&mut *status, Status::Closed) {
                Status::Open { shutdown, loops } => (shutdown, loops),
                other => {
                    *status = other;
                    return;
                }
            }
        };

        let _ = shutdown.send(true);
        for task in loops {
            let _ = task.await;
        }

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(result) = tasks.join_next().await {
            contact::reap(result);
        }

        self.channel.close().await;
        self.ports.clear();
        self.peers.lock().clear();
        *self.trust.write() = None;

        log::info!("node closed");
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.status.lock(), Status::Open { .. })
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Snapshot of the record kept for `addr`, if any.
    pub fn peer(&self, addr: SocketAddr) -> Option<PeerRecord> {
        self.peers.lock().get(&addr).cloned()
    }

    /// Resolve one configured endpoint and contact the resulting address.
    pub(crate) async fn contact_endpoint(&self, endpoint: &Endpoint) {
        match endpoint::resolve_endpoint(self.resolver.as_ref(), endpoint, self.config.protocol)
            .await
        {
            Ok(addr) => self.contact(addr).await,
            Err(e) => log::debug!("resolution failed: endpoint={}, err={}", endpoint, e),
        }
    }

    /// Greet a peer and, when it answers, introduce ourselves to it.
    pub(crate) async fn contact(&self, addr: SocketAddr) {
        let timeout = Duration::from_millis(self.config.hello_timeout as u64);
        match self.channel.greet(addr, timeout).await {
            Ok(latency) => {
                if !self.is_open() {
                    return;
                }

                log::debug!("hello replied: addr={}, latency={:?}", addr, latency);
                {
                    let mut peers = self.peers.lock();
                    let record = peers.entry(addr).or_default();
                    record.latency = Some(latency);
                    record.touch();
                    if record.stage == PeerStage::Idle {
                        record.stage = PeerStage::Greeted;
                    }
                }

                if let Err(e) = self.channel.introduce_to(addr).await {
                    log::warn!("introduce failed: addr={}, err={}", addr, e);
                }
            }
            Err(ChannelError::HelloTimeout(timeout)) => {
                log::debug!("hello timed out: addr={}, timeout={:?}", addr, timeout);
            }
            Err(e) => log::debug!("hello failed: addr={}, err={}", addr, e),
        }
    }

    /// Ask every known peer for the configured dynamic contacts.
    pub(crate) async fn request_dynamic_contacts(&self) {
        let fingerprints: Vec<Fingerprint> = self
            .dynamic_contacts
            .iter()
            .filter_map(|cert| match Fingerprint::of(cert) {
                Ok(fingerprint) => Some(fingerprint),
                Err(e) => {
                    log::warn!("contact fingerprint failed: err={}", e);
                    None
                }
            })
            .collect();

        if fingerprints.is_empty() {
            return;
        }

        for (addr, result) in self.channel.send_contact_request_to_all(fingerprints).await {
            if let Err(e) = result {
                log::warn!("contact request failed: addr={}, err={}", addr, e);
            }
        }
    }

    /// Run one piece of event-driven work on the runtime.
    ///
    /// Tracked in the node's join set so that `close()` can wait for it.
    /// Finished entries are reaped on the way in to keep the set bounded.
    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        let mut tasks = self.tasks.lock();
        while let Some(result) = tasks.try_join_next() {
            contact::reap(result);
        }

        tasks.spawn(task);
    }

    /// Full acceptance decision for one presented certificate.
    ///
    /// Chain verification first; the handler's predicate has the last word,
    /// but only once the chain passed or the policy disabled verification.
    fn certificate_is_valid(&self, certificate: &X509Ref) -> bool {
        let chain_valid = match &*self.trust.read() {
            Some(evaluator) => evaluator.verify(certificate),
            None => false,
        };

        if !chain_valid {
            return false;
        }

        self.handler.check_certificate(certificate).unwrap_or(true)
    }
}

impl<H> ChannelEvents for Node<H>
where
    H: NodeHandler,
{
    fn on_hello(&self, sender: SocketAddr, accept: bool) -> bool {
        if !self.is_open() {
            return false;
        }

        if self.banlist.contains(sender.ip()) {
            log::warn!("hello denied: addr={}", sender);
            return false;
        }

        log::debug!("hello: addr={}, accept={}", sender, accept);
        if accept {
            {
                let mut peers = self.peers.lock();
                let record = peers.entry(sender).or_default();
                record.touch();
                if record.stage == PeerStage::Idle {
                    record.stage = PeerStage::Greeted;
                }
            }

            let channel = self.channel.clone();
            self.spawn(async move {
                if let Err(e) = channel.introduce_to(sender).await {
                    log::warn!("introduce failed: addr={}, err={}", sender, e);
                }
            });
        }

        accept
    }

    fn on_contact_request(
        &self,
        sender: SocketAddr,
        _certificate: &X509Ref,
        fingerprint: &Fingerprint,
        answer: SocketAddr,
    ) -> bool {
        if !self.is_open() {
            return false;
        }

        if !self.config.accept_contact_requests {
            log::debug!("contact request ignored: addr={}", sender);
            return false;
        }

        log::debug!(
            "contact request: addr={}, fingerprint={}, answer={}",
            sender,
            fingerprint,
            answer
        );

        true
    }

    fn on_contact(&self, sender: SocketAddr, fingerprint: &Fingerprint, answer: SocketAddr) {
        if !self.is_open() || !self.config.accept_contacts {
            return;
        }

        if self.banlist.contains(answer.ip()) {
            log::warn!("contact answer discarded: addr={}, answer={}", sender, answer);
            return;
        }

        log::debug!(
            "contact: addr={}, fingerprint={}, answer={}",
            sender,
            fingerprint,
            answer
        );

        if let Some(node) = self.weak.upgrade() {
            self.spawn(async move {
                node.contact(answer).await;
            });
        }
    }

    fn on_presentation(&self, sender: SocketAddr, identity: &PeerIdentity, is_new: bool) -> bool {
        if !self.is_open() {
            return false;
        }

        if self.banlist.contains(sender.ip()) {
            log::warn!("presentation denied: addr={}", sender);
            return false;
        }

        if !self.certificate_is_valid(&identity.signature)
            || !self.certificate_is_valid(&identity.cipherment)
        {
            log::warn!("presentation rejected: addr={}, new={}", sender, is_new);
            return false;
        }

        log::debug!("presentation accepted: addr={}, new={}", sender, is_new);
        {
            let mut peers = self.peers.lock();
            let record = peers.entry(sender).or_default();
            record.identity = Some(identity.clone());
            record.touch();
            if let PeerStage::Idle | PeerStage::Greeted = record.stage {
                record.stage = PeerStage::Presented;
            }
        }

        let channel = self.channel.clone();
        self.spawn(async move {
            if let Err(e) = channel.request_session(sender).await {
                log::warn!("session request failed: addr={}, err={}", sender, e);
            }
        });

        true
    }

    fn on_session_request(
        &self,
        sender: SocketAddr,
        ciphers: &[CipherSuite],
        accept: bool,
    ) -> bool {
        if !self.is_open() {
            return false;
        }

        log::debug!(
            "session request: addr={}, ciphers={:?}, accept={}",
            sender,
            ciphers,
            accept
        );

        let mut peers = self.peers.lock();
        if let Some(record) = peers.get_mut(&sender) {
            record.touch();
            if record.stage == PeerStage::Established {
                record.stage = PeerStage::Renewing;
            }
        }

        accept
    }

    fn on_session(&self, sender: SocketAddr, cipher: CipherSuite, accept: bool) -> bool {
        if !self.is_open() {
            return false;
        }

        log::debug!("session: addr={}, cipher={}, accept={}", sender, cipher, accept);

        let mut peers = self.peers.lock();
        if let Some(record) = peers.get_mut(&sender) {
            record.touch();
            if record.stage == PeerStage::Established {
                record.stage = PeerStage::Renewing;
            }
        }

        accept
    }

    fn on_session_established(
        &self,
        host: SocketAddr,
        is_new: bool,
        local: AlgorithmInfo,
        remote: AlgorithmInfo,
    ) {
        if !self.is_open() {
            return;
        }

        log::info!(
            "session established: addr={}, new={}, local={}, remote={}",
            host,
            is_new,
            local,
            remote
        );

        {
            let mut peers = self.peers.lock();
            let record = peers.entry(host).or_default();
            record.stage = PeerStage::Established;
            record.touch();

            // Port registration follows the session pairing, not renewals.
            // Registration happens under the peer lock so that a rapid
            // lost/up cannot interleave between the two map operations.
            if is_new {
                record.generation += 1;
                self.ports.unregister(host);
                self.ports.register(host);
            }
        }

        self.handler.on_session_established(host, is_new, local, remote);
    }

    fn on_session_failed(
        &self,
        host: SocketAddr,
        is_new: bool,
        local: AlgorithmInfo,
        remote: AlgorithmInfo,
    ) {
        if !self.is_open() {
            return;
        }

        log::warn!(
            "session failed: addr={}, new={}, local={}, remote={}",
            host,
            is_new,
            local,
            remote
        );

        self.handler.on_session_failed(host, is_new);
    }

    fn on_session_lost(&self, host: SocketAddr) {
        if !self.is_open() {
            return;
        }

        let existed = {
            let mut peers = self.peers.lock();
            let record = peers.remove(&host).is_some();
            self.ports.unregister(host) || record
        };

        // Losing an unknown session is a no-op, not an error.
        if !existed {
            return;
        }

        log::info!("session lost: addr={}", host);
        self.handler.on_session_lost(host);
    }

    fn on_data(&self, sender: SocketAddr, channel: u8, payload: Bytes) {
        if !self.is_open() {
            return;
        }

        match channel {
            FRAME_CHANNEL => {
                if !self.ports.inject(sender, payload) {
                    log::debug!("frame without session: addr={}", sender);
                }
            }
            MESSAGE_CHANNEL => match wire::Message::decode(&payload) {
                Ok(message) => {
                    log::debug!("message: addr={}, message={:?}", sender, message);
                    self.handler.on_message(sender, message);
                }
                Err(e) => {
                    log::warn!(
                        "malformed message: addr={}, size={}, err={}",
                        sender,
                        payload.len(),
                        e
                    );
                }
            },
            other => {
                log::warn!(
                    "unknown channel: addr={}, channel={}, size={}",
                    sender,
                    other,
                    payload.len()
                );
            }
        }
    }
}
