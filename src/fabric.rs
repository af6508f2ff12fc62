use std::{net::SocketAddr, sync::Arc};

use ahash::{HashMap, HashMapExt};
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
    channel::{FRAME_CHANNEL, SecureChannel},
    config::AdapterMode,
};

/// Opaque reference the fabric hands out for a registered port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortHandle(pub u64);

/// Port groups a fabric can tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortGroup {
    /// The port facing the local virtual network adapter.
    Adapter,
    /// A port facing one remote peer.
    Endpoints,
}

/// One direction of traffic toward a single peer.
///
/// Egress frames handed to the port by the fabric are injected into the
/// secure channel on the frame channel. The fabric must drive egress from
/// within the node's tokio runtime.
pub struct Port {
    peer: SocketAddr,
    egress: Box<dyn Fn(Bytes) + Send + Sync>,
}

impl Port {
    pub fn new(peer: SocketAddr, egress: impl Fn(Bytes) + Send + Sync + 'static) -> Self {
        Self {
            peer,
            egress: Box::new(egress),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Push one outbound frame through the port.
    pub fn egress(&self, frame: Bytes) {
        (self.egress)(frame)
    }
}

/// The local switch or router the coordinator bridges peers into.
///
/// In tap mode the fabric is an Ethernet switch, in tun mode an IP router;
/// either way the coordinator only registers one port per established peer
/// and injects inbound frames through it.
pub trait Fabric: Send + Sync {
    /// Register a port under the given group and return its handle.
    fn register_port(&self, port: Port, group: PortGroup) -> PortHandle;

    /// Remove a previously registered port.
    fn unregister_port(&self, handle: PortHandle);

    /// Deliver one inbound frame to the local sink behind the port.
    fn inject(&self, handle: PortHandle, frame: Bytes);
}

/// Per-peer port bookkeeping.
///
/// Two disjoint maps, one per adapter mode; only the configured mode's map is
/// ever populated.
pub struct PortRegistry {
    mode: AdapterMode,
    fabric: Arc<dyn Fabric>,
    channel: Arc<dyn SecureChannel>,
    switch: RwLock<HashMap<SocketAddr, PortHandle>>,
    router: RwLock<HashMap<SocketAddr, PortHandle>>,
}

impl PortRegistry {
    pub fn new(
        mode: AdapterMode,
        fabric: Arc<dyn Fabric>,
        channel: Arc<dyn SecureChannel>,
    ) -> Self {
        Self {
            mode,
            fabric,
            channel,
            switch: RwLock::new(HashMap::new()),
            router: RwLock::new(HashMap::new()),
        }
    }

    fn ports(&self) -> &RwLock<HashMap<SocketAddr, PortHandle>> {
        match self.mode {
            AdapterMode::Tap => &self.switch,
            AdapterMode::Tun => &self.router,
        }
    }

    /// Register a port for `peer` and remember its handle.
    ///
    /// The port's egress spawns an authenticated send on the frame channel
    /// toward the peer.
    pub fn register(&self, peer: SocketAddr) -> PortHandle {
        let channel = self.channel.clone();
        let port = Port::new(peer, move |frame| {
            let channel = channel.clone();
            tokio::spawn(async move {
                if let Err(e) = channel.send_data(peer, FRAME_CHANNEL, frame).await {
                    log::debug!("frame send failed: addr={}, err={}", peer, e);
                }
            });
        });

        let handle = self.fabric.register_port(port, PortGroup::Endpoints);
        self.ports().write().insert(peer, handle);
        handle
    }

    /// Unregister the port for `peer`, if any. Returns whether one existed.
    pub fn unregister(&self, peer: SocketAddr) -> bool {
        match self.ports().write().remove(&peer) {
            Some(handle) => {
                self.fabric.unregister_port(handle);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, peer: SocketAddr) -> Option<PortHandle> {
        self.ports().read().get(&peer).copied()
    }

    /// Deliver an inbound frame through the peer's port, if one is
    /// registered. Returns whether it was delivered.
    pub fn inject(&self, peer: SocketAddr, frame: Bytes) -> bool {
        match self.get(peer) {
            Some(handle) => {
                self.fabric.inject(handle, frame);
                true
            }
            None => false,
        }
    }

    /// Drop every remaining port. Used when the node closes.
    pub fn clear(&self) {
        for (_, handle) in self.ports().write().drain() {
            self.fabric.unregister_port(handle);
        }
    }
}
