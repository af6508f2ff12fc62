use std::{fmt, net::SocketAddr, time::Duration};

use ahash::HashMap;
use async_trait::async_trait;
use bytes::Bytes;
use openssl::x509::{X509, X509Ref};
use thiserror::Error;

use crate::trust::Fingerprint;

/// Channel number carrying network frames.
pub const FRAME_CHANNEL: u8 = 0;

/// Channel number carrying control messages.
pub const MESSAGE_CHANNEL: u8 = 1;

/// Cipher suites the secure channel engine can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum CipherSuite {
    EcdheRsaAes128GcmSha256,
    EcdheRsaAes256GcmSha384,
}

impl CipherSuite {
    /// Every suite, strongest first.
    pub fn all() -> Vec<CipherSuite> {
        vec![
            Self::EcdheRsaAes256GcmSha384,
            Self::EcdheRsaAes128GcmSha256,
        ]
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EcdheRsaAes128GcmSha256 => "ecdhe-rsa-aes128-gcm-sha256",
            Self::EcdheRsaAes256GcmSha384 => "ecdhe-rsa-aes256-gcm-sha384",
        })
    }
}

/// Elliptic curves the engine can use for the ephemeral exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum EllipticCurve {
    Sect571k1,
    Secp384r1,
    Secp521r1,
}

impl fmt::Display for EllipticCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sect571k1 => "sect571k1",
            Self::Secp384r1 => "secp384r1",
            Self::Secp521r1 => "secp521r1",
        })
    }
}

/// The algorithms one side of a session settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmInfo {
    pub cipher_suite: CipherSuite,
    pub elliptic_curve: EllipticCurve,
}

impl fmt::Display for AlgorithmInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cipher_suite, self.elliptic_curve)
    }
}

/// The certificate pair a remote peer revealed during presentation.
#[derive(Clone)]
pub struct PeerIdentity {
    /// Certificate the peer signs with.
    pub signature: X509,
    /// Certificate the peer enciphers with.
    pub cipherment: X509,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("hello timed out after {0:?}")]
    HelloTimeout(Duration),
    #[error("channel is closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Operations the coordinator drives on the secure channel engine.
///
/// The engine owns the datagram socket, the handshake machinery and the
/// authenticated encryption; the coordinator only schedules work on it and
/// reacts to its [`ChannelEvents`].
#[async_trait]
pub trait SecureChannel: Send + Sync {
    async fn open(&self, listen: SocketAddr) -> Result<(), ChannelError>;

    async fn close(&self);

    /// Announce the cipher suites this node is willing to negotiate.
    fn set_cipher_capabilities(&self, suites: Vec<CipherSuite>);

    /// Send a hello and wait for the reply, returning the measured latency.
    async fn greet(&self, addr: SocketAddr, timeout: Duration) -> Result<Duration, ChannelError>;

    /// Introduce our identity to the given address.
    async fn introduce_to(&self, addr: SocketAddr) -> Result<(), ChannelError>;

    /// Ask the given peer for a session.
    async fn request_session(&self, addr: SocketAddr) -> Result<(), ChannelError>;

    /// Ask every currently known peer whether it can reach one of the listed
    /// certificates, identified by fingerprint.
    ///
    /// Resolves once every queried peer has answered or failed, with one
    /// entry per peer.
    async fn send_contact_request_to_all(
        &self,
        fingerprints: Vec<Fingerprint>,
    ) -> HashMap<SocketAddr, Result<(), ChannelError>>;

    /// Send an authenticated payload to an established peer.
    async fn send_data(
        &self,
        addr: SocketAddr,
        channel: u8,
        payload: Bytes,
    ) -> Result<(), ChannelError>;
}

/// Callbacks the secure channel engine drives on the coordinator.
///
/// The engine holds the implementor as a trait object and invokes these from
/// its executor. Bool-returning callbacks answer accept (`true`) or deny;
/// where the engine passes a default, the implementor is expected to return
/// it unless policy says otherwise.
pub trait ChannelEvents: Send + Sync {
    /// A hello arrived from `sender`.
    fn on_hello(&self, sender: SocketAddr, accept: bool) -> bool;

    /// A peer asked whether we can reach the certificate with the given
    /// fingerprint; `answer` is the address we would report.
    fn on_contact_request(
        &self,
        sender: SocketAddr,
        certificate: &X509Ref,
        fingerprint: &Fingerprint,
        answer: SocketAddr,
    ) -> bool;

    /// A peer answered one of our contact requests: the certificate with the
    /// given fingerprint is reachable at `answer`.
    fn on_contact(&self, sender: SocketAddr, fingerprint: &Fingerprint, answer: SocketAddr);

    /// `sender` revealed its certificate pair.
    fn on_presentation(&self, sender: SocketAddr, identity: &PeerIdentity, is_new: bool) -> bool;

    /// `sender` asked for a session, announcing its cipher capabilities.
    fn on_session_request(&self, sender: SocketAddr, ciphers: &[CipherSuite], accept: bool)
    -> bool;

    /// `sender` answered our session request with its chosen suite.
    fn on_session(&self, sender: SocketAddr, cipher: CipherSuite, accept: bool) -> bool;

    /// A session with `host` is up. `is_new` is true on the first
    /// establishment of a session, false on renewals within it.
    fn on_session_established(
        &self,
        host: SocketAddr,
        is_new: bool,
        local: AlgorithmInfo,
        remote: AlgorithmInfo,
    );

    /// Session negotiation with `host` failed.
    fn on_session_failed(
        &self,
        host: SocketAddr,
        is_new: bool,
        local: AlgorithmInfo,
        remote: AlgorithmInfo,
    );

    /// The session with `host` ended.
    fn on_session_lost(&self, host: SocketAddr);

    /// An authenticated payload arrived from `sender` on `channel`.
    fn on_data(&self, sender: SocketAddr, channel: u8, payload: Bytes);
}
