//! ## meshlan
//!
//! The coordination core of a peer-to-peer virtual private network node.
//!
//! A node speaks an authenticated datagram protocol to its peers through a
//! secure channel engine, reveals certificates during a presentation
//! exchange, negotiates sessions, and bridges the resulting data channels
//! into a local switch (tap mode) or router (tun mode). This crate owns the
//! piece in the middle: the [`Node`] coordinator that contacts configured
//! peers on a schedule, reacts to engine events, decides who is admitted and
//! trusted, and registers one fabric port per established peer.
//!
//! The engine, the fabric, the resolver and the embedder's own policy plug
//! in through traits:
//!
//! - [`channel::SecureChannel`] / [`channel::ChannelEvents`]: the secure
//!   datagram engine below the node.
//! - [`fabric::Fabric`]: the switch or router the node bridges into.
//! - [`endpoint::Resolver`]: name resolution, with an operating system
//!   default.
//! - [`NodeHandler`]: the embedder's certificate predicate and session
//!   event callbacks.
//!
//! Everything runs on the embedding tokio runtime; no handler blocks.

pub mod admission;
pub mod channel;
pub mod config;
pub mod contact;
pub mod endpoint;
pub mod fabric;
pub mod node;
pub mod peer;
pub mod trust;

pub use wire;

pub use self::node::{Error, Node, NodeOptions};

use std::net::SocketAddr;

use openssl::x509::X509Ref;

use crate::channel::AlgorithmInfo;

/// Embedder-facing callbacks.
///
/// Every method has a do-nothing default; implement what you care about.
pub trait NodeHandler: Send + Sync + 'static {
    /// Last word on a presented certificate.
    ///
    /// Called only after chain verification succeeded or the trust policy
    /// disabled it. `Some(accept)` overrides the decision so far; `None`
    /// leaves it untouched.
    #[allow(unused_variables)]
    fn check_certificate(&self, certificate: &X509Ref) -> Option<bool> {
        None
    }

    /// A session with `peer` came up. `is_new` is false for renewals within
    /// a continuous session.
    #[allow(unused_variables)]
    fn on_session_established(
        &self,
        peer: SocketAddr,
        is_new: bool,
        local: AlgorithmInfo,
        remote: AlgorithmInfo,
    ) {
    }

    /// Session negotiation with `peer` failed.
    #[allow(unused_variables)]
    fn on_session_failed(&self, peer: SocketAddr, is_new: bool) {}

    /// The session with `peer` ended and its port is gone.
    #[allow(unused_variables)]
    fn on_session_lost(&self, peer: SocketAddr) {}

    /// A control message arrived from `peer` on the message channel.
    #[allow(unused_variables)]
    fn on_message(&self, peer: SocketAddr, message: wire::Message) {}
}
