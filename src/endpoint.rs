use std::{
    fmt, io,
    net::{IpAddr, SocketAddr},
    str::FromStr,
};

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ResolveProtocol;

/// UDP service port assumed when an endpoint carries none.
pub const DEFAULT_PORT: u16 = 12000;

/// A user-supplied peer locator.
///
/// Either a literal socket address, or a host name and service port that
/// still need resolving. A bare address or host takes [`DEFAULT_PORT`].
///
/// ```
/// use meshlan::endpoint::Endpoint;
///
/// let literal: Endpoint = "203.0.113.7:4000".parse().unwrap();
/// assert_eq!(literal.to_string(), "203.0.113.7:4000");
///
/// let named: Endpoint = "peer.example".parse().unwrap();
/// assert_eq!(named.to_string(), "peer.example:12000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Address(SocketAddr),
    Host(String, u16),
}

impl Endpoint {
    pub fn port(&self) -> u16 {
        match self {
            Self::Address(addr) => addr.port(),
            Self::Host(_, port) => *port,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid endpoint: {0}")]
pub struct InvalidEndpoint(String);

impl FromStr for Endpoint {
    type Err = InvalidEndpoint;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = value.parse::<SocketAddr>() {
            return Ok(Self::Address(addr));
        }

        if let Ok(ip) = value.parse::<IpAddr>() {
            return Ok(Self::Address(SocketAddr::new(ip, DEFAULT_PORT)));
        }

        let (host, port) = match value.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>()
                    .map_err(|_| InvalidEndpoint(value.to_string()))?,
            ),
            None => (value, DEFAULT_PORT),
        };

        if host.is_empty() || host.contains(':') {
            return Err(InvalidEndpoint(value.to_string()));
        }

        Ok(Self::Host(host.to_string(), port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(addr) => write!(f, "{}", addr),
            Self::Host(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Endpoint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Endpoint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = <String as serde::Deserialize>::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Name resolution as seen by the coordinator.
///
/// The default implementation asks the operating system; tests and embedders
/// with their own resolution stack provide something else.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolver backed by `tokio::net::lookup_host`.
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

/// Resolve an endpoint to one concrete peer address.
///
/// A literal endpoint resolves to itself without consulting the resolver. A
/// named endpoint is looked up, filtered by the protocol preference, and the
/// first surviving address wins.
pub async fn resolve_endpoint(
    resolver: &dyn Resolver,
    endpoint: &Endpoint,
    protocol: ResolveProtocol,
) -> io::Result<SocketAddr> {
    match endpoint {
        Endpoint::Address(addr) => Ok(*addr),
        Endpoint::Host(host, port) => resolver
            .lookup(host, *port)
            .await?
            .into_iter()
            .find(|it| protocol.matches(it))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no usable address for {}:{}", host, port),
                )
            }),
    }
}
