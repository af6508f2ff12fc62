use ipnet::IpNet;
use openssl::{
    pkey::{PKey, Private},
    x509::X509,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{channel::CipherSuite, endpoint::Endpoint};

/// Address family preference applied when resolving endpoints.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ResolveProtocol {
    #[default]
    Any,
    V4,
    V6,
}

impl ResolveProtocol {
    pub fn matches(&self, addr: &std::net::SocketAddr) -> bool {
        match self {
            Self::Any => true,
            Self::V4 => addr.is_ipv4(),
            Self::V6 => addr.is_ipv6(),
        }
    }
}

/// Kind of virtual network adapter the node bridges to.
///
/// A tap adapter carries Ethernet frames and is backed by the switch fabric;
/// a tun adapter carries IP packets and is backed by the router fabric.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AdapterMode {
    #[default]
    Tap,
    Tun,
}

/// Whether presented certificates go through chain verification.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TrustPolicy {
    /// Verify the chain against the configured authorities.
    #[default]
    Validate,
    /// Skip chain verification entirely.
    None,
}

/// How far revocation checking reaches into a certificate chain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CrlPolicy {
    #[default]
    None,
    /// Check the leaf certificate only.
    Leaf,
    /// Check every certificate in the chain.
    All,
}

/// The local identity presented to remote peers.
#[derive(Clone)]
pub struct Identity {
    pub certificate: X509,
    pub key: PKey<Private>,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct Config {
    /// Address family preference for endpoint resolution.
    #[cfg_attr(feature = "serde", serde(default))]
    pub protocol: ResolveProtocol,
    /// The endpoint the secure channel engine listens on.
    #[cfg_attr(feature = "serde", serde(default = "Config::listen"))]
    pub listen: Endpoint,
    /// Endpoints contacted on every static contact tick.
    #[cfg_attr(feature = "serde", serde(default))]
    pub contacts: Vec<Endpoint>,
    /// Networks this node never talks to.
    ///
    /// Any inbound hello, contact answer or presentation whose address falls
    /// inside one of these prefixes is denied before any trust decision.
    #[cfg_attr(feature = "serde", serde(default))]
    pub never_contact: Vec<IpNet>,
    /// Answer inbound contact requests.
    #[cfg_attr(feature = "serde", serde(default = "Config::accept"))]
    pub accept_contact_requests: bool,
    /// Follow contact answers reported by other peers.
    #[cfg_attr(feature = "serde", serde(default = "Config::accept"))]
    pub accept_contacts: bool,
    /// How long to wait for a hello reply, in milliseconds.
    #[cfg_attr(feature = "serde", serde(default = "Config::hello_timeout"))]
    pub hello_timeout: u32,
    /// Adapter mode, which selects the fabric the node bridges to.
    #[cfg_attr(feature = "serde", serde(default))]
    pub adapter: AdapterMode,
    /// Cipher suites announced to the secure channel engine.
    #[cfg_attr(feature = "serde", serde(default = "CipherSuite::all"))]
    pub ciphers: Vec<CipherSuite>,
    /// Chain verification policy for presented certificates.
    #[cfg_attr(feature = "serde", serde(default))]
    pub trust: TrustPolicy,
    /// Revocation checking policy.
    #[cfg_attr(feature = "serde", serde(default))]
    pub crl_check: CrlPolicy,
}

impl Config {
    fn listen() -> Endpoint {
        Endpoint::Address("0.0.0.0:12000".parse().unwrap())
    }

    fn accept() -> bool {
        true
    }

    fn hello_timeout() -> u32 {
        3000
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: ResolveProtocol::default(),
            listen: Self::listen(),
            contacts: Default::default(),
            never_contact: Default::default(),
            accept_contact_requests: Self::accept(),
            accept_contacts: Self::accept(),
            hello_timeout: Self::hello_timeout(),
            adapter: AdapterMode::default(),
            ciphers: CipherSuite::all(),
            trust: TrustPolicy::default(),
            crl_check: CrlPolicy::default(),
        }
    }
}
