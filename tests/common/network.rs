use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use chainrep::networking::{messages::Message, network::Network};
use ed25519_dalek::VerifyingKey;

/// The shared address book of a mock network: every stub's address, key, and inbox.
struct Hub {
    registry: HashMap<SocketAddr, (VerifyingKey, Sender<(VerifyingKey, Message)>)>,
}

/// A mock network stub which passes messages from and to threads using channels. Connections are
/// instantaneous: [`connect`](Network::connect) succeeds iff the address is in the shared hub.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_verifying_key: VerifyingKey,
    my_address: SocketAddr,
    hub: Arc<Mutex<Hub>>,
    connected: Arc<Mutex<HashMap<VerifyingKey, SocketAddr>>>,
    inbox: Arc<Mutex<Receiver<(VerifyingKey, Message)>>>,
}

impl NetworkStub {
    pub(crate) fn verifying_key(&self) -> VerifyingKey {
        self.my_verifying_key
    }

    pub(crate) fn address(&self) -> SocketAddr {
        self.my_address
    }
}

impl Network for NetworkStub {
    fn connect(&mut self, address: SocketAddr) -> bool {
        let hub = self.hub.lock().unwrap();
        match hub.registry.get(&address) {
            Some((peer, _)) => {
                self.connected.lock().unwrap().insert(*peer, address);
                true
            }
            None => false,
        }
    }

    fn disconnect(&mut self, peer: &VerifyingKey) {
        self.connected.lock().unwrap().remove(peer);
    }

    fn send(&mut self, peer: VerifyingKey, message: Message) {
        let hub = self.hub.lock().unwrap();
        let target = hub
            .registry
            .values()
            .find(|(registered, _)| *registered == peer)
            .map(|(_, sender)| sender.clone());
        if let Some(sender) = target {
            let _ = sender.send((self.my_verifying_key, message));
        }
    }

    fn broadcast(&mut self, message: Message) {
        let hub = self.hub.lock().unwrap();
        for (registered, sender) in hub.registry.values() {
            if *registered != self.my_verifying_key {
                let _ = sender.send((self.my_verifying_key, message.clone()));
            }
        }
    }

    fn recv(&mut self) -> Option<(VerifyingKey, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(origin_and_message) => Some(origin_and_message),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }

    fn outbound_peers(&self) -> Vec<VerifyingKey> {
        self.connected.lock().unwrap().keys().copied().collect()
    }

    fn inbound_peers(&self) -> Vec<VerifyingKey> {
        // Every connection through the hub is modeled as outbound.
        Vec::new()
    }

    fn connecting(&self) -> Vec<SocketAddr> {
        Vec::new()
    }

    fn known_addresses(&self) -> Vec<SocketAddr> {
        self.hub
            .lock()
            .unwrap()
            .registry
            .keys()
            .filter(|address| **address != self.my_address)
            .copied()
            .collect()
    }

    fn address_of(&self, peer: &VerifyingKey) -> Option<SocketAddr> {
        self.connected.lock().unwrap().get(peer).copied()
    }

    fn is_connected(&self, address: &SocketAddr) -> bool {
        self.connected
            .lock()
            .unwrap()
            .values()
            .any(|connected| connected == address)
    }
}

/// Build one interconnected stub per key in `peers`, assigning loopback addresses in order.
pub(crate) fn mock_network(peers: impl Iterator<Item = VerifyingKey>) -> Vec<NetworkStub> {
    let hub = Arc::new(Mutex::new(Hub {
        registry: HashMap::new(),
    }));

    let stubs: Vec<NetworkStub> = peers
        .enumerate()
        .map(|(i, my_verifying_key)| {
            let my_address: SocketAddr = format!("127.0.0.1:{}", 10000 + i as u16)
                .parse()
                .unwrap();
            let (sender, receiver) = mpsc::channel();
            hub.lock()
                .unwrap()
                .registry
                .insert(my_address, (my_verifying_key, sender));

            NetworkStub {
                my_verifying_key,
                my_address,
                hub: hub.clone(),
                connected: Arc::new(Mutex::new(HashMap::new())),
                inbox: Arc::new(Mutex::new(receiver)),
            }
        })
        .collect();

    stubs
}
