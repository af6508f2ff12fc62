use std::time::{Duration, Instant};

use crate::channel::PeerIdentity;

/// How far a peer has come along the bring-up path.
///
/// The secure channel engine owns the fine-grained handshake states; the
/// coordinator only tracks the coarse stages it acts on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PeerStage {
    /// Nothing but an address yet.
    #[default]
    Idle,
    /// A hello went through in either direction.
    Greeted,
    /// The peer revealed an accepted certificate pair.
    Presented,
    /// A session is up and frames can flow.
    Established,
    /// A session is up and currently renewing its keys.
    Renewing,
}

/// Dynamic state the coordinator keeps per peer.
///
/// A record exists only while the secure channel engine holds state for the
/// peer; losing the session drops the record.
#[derive(Default, Clone)]
pub struct PeerRecord {
    pub stage: PeerStage,
    /// Certificate pair observed during presentation.
    pub identity: Option<PeerIdentity>,
    /// When we last heard from or reached out to the peer.
    pub last_contact: Option<Instant>,
    /// Round-trip time measured by the latest hello exchange.
    pub latency: Option<Duration>,
    /// Bumped on every new session establishment, not on renewals.
    pub generation: u64,
}

impl PeerRecord {
    pub fn touch(&mut self) {
        self.last_contact = Some(Instant::now());
    }
}
