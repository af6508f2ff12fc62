//! ## Control messages
//!
//! Authenticated datagrams carry a small channel tag that separates network
//! frames from control traffic. This crate decodes and encodes the control
//! traffic: structured messages that peers exchange on the message channel,
//! next to (not inside) the frame stream.
//!
//! The only message family defined today is the route advertisement exchange.
//! A peer may ask its neighbour for the networks it can reach
//! ([`Message::RoutesRequest`]) and the neighbour answers with a versioned
//! list of routes and DNS servers ([`Message::Routes`]). What to do with an
//! advertisement is up to the embedder.
//!
//! Wire layout is deliberately plain: one kind octet, then the payload with
//! all integers in network byte order. Addresses are encoded as a family
//! octet (`4` or `6`) followed by the raw address bytes.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, BytesMut};
use ipnet::IpNet;
use num_enum::TryFromPrimitive;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    UnexpectedEof,
    UnknownKind(u8),
    UnknownFamily(u8),
    InvalidPrefix,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
enum Kind {
    RoutesRequest = 0,
    Routes = 1,
}

const FAMILY_V4: u8 = 4;
const FAMILY_V6: u8 = 6;

/// A control message exchanged on the message channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Ask the remote peer for its current route advertisement.
    RoutesRequest,
    /// Advertise the networks and DNS servers reachable through the sender.
    ///
    /// The version is a sender-local counter; a receiver may ignore an
    /// advertisement whose version it has already seen.
    Routes {
        version: u32,
        routes: Vec<IpNet>,
        dns_servers: Vec<IpAddr>,
    },
}

impl Message {
    /// Encode the message into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::RoutesRequest => {
                buf.put_u8(Kind::RoutesRequest as u8);
            }
            Self::Routes {
                version,
                routes,
                dns_servers,
            } => {
                buf.put_u8(Kind::Routes as u8);
                buf.put_u32(*version);

                buf.put_u16(routes.len() as u16);
                for route in routes {
                    put_addr(buf, &route.addr());
                    buf.put_u8(route.prefix_len());
                }

                buf.put_u16(dns_servers.len() as u16);
                for server in dns_servers {
                    put_addr(buf, server);
                }
            }
        }
    }

    /// Decode a message from a raw channel payload.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, Error> {
        if bytes.remaining() < 1 {
            return Err(Error::UnexpectedEof);
        }

        let kind = bytes.get_u8();
        match Kind::try_from(kind).map_err(|_| Error::UnknownKind(kind))? {
            Kind::RoutesRequest => Ok(Self::RoutesRequest),
            Kind::Routes => {
                if bytes.remaining() < 4 {
                    return Err(Error::UnexpectedEof);
                }

                let version = bytes.get_u32();
                let routes = {
                    if bytes.remaining() < 2 {
                        return Err(Error::UnexpectedEof);
                    }

                    let count = bytes.get_u16();
                    let mut routes = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        let addr = get_addr(&mut bytes)?;
                        if bytes.remaining() < 1 {
                            return Err(Error::UnexpectedEof);
                        }

                        routes.push(
                            IpNet::new(addr, bytes.get_u8()).map_err(|_| Error::InvalidPrefix)?,
                        );
                    }

                    routes
                };

                let dns_servers = {
                    if bytes.remaining() < 2 {
                        return Err(Error::UnexpectedEof);
                    }

                    let count = bytes.get_u16();
                    let mut servers = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        servers.push(get_addr(&mut bytes)?);
                    }

                    servers
                };

                Ok(Self::Routes {
                    version,
                    routes,
                    dns_servers,
                })
            }
        }
    }
}

fn put_addr(buf: &mut BytesMut, addr: &IpAddr) {
    match addr {
        IpAddr::V4(it) => {
            buf.put_u8(FAMILY_V4);
            buf.put_slice(&it.octets());
        }
        IpAddr::V6(it) => {
            buf.put_u8(FAMILY_V6);
            buf.put_slice(&it.octets());
        }
    }
}

fn get_addr(bytes: &mut &[u8]) -> Result<IpAddr, Error> {
    if bytes.remaining() < 1 {
        return Err(Error::UnexpectedEof);
    }

    match bytes.get_u8() {
        FAMILY_V4 => {
            if bytes.remaining() < 4 {
                return Err(Error::UnexpectedEof);
            }

            let mut octets = [0u8; 4];
            bytes.copy_to_slice(&mut octets);
            Ok(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        FAMILY_V6 => {
            if bytes.remaining() < 16 {
                return Err(Error::UnexpectedEof);
            }

            let mut octets = [0u8; 16];
            bytes.copy_to_slice(&mut octets);
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        family => Err(Error::UnknownFamily(family)),
    }
}
