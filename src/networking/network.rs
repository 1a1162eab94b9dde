use std::net::SocketAddr;

use ed25519_dalek::VerifyingKey;

use super::messages::Message;

/// Pluggable peer-to-peer transport.
///
/// Implementations own connection management, framing, and peer authentication; the engine only
/// sees authenticated peer identities (`VerifyingKey`s) and whole messages. All methods must be
/// non-blocking.
pub trait Network: Clone + Send {
    /// Begin an outbound connection attempt to `address`. Returns `false` if the attempt could
    /// not even be started (e.g. the dialer is saturated).
    fn connect(&mut self, address: SocketAddr) -> bool;

    /// Tear down the connection to `peer`, if any. Used when a peer is banned.
    fn disconnect(&mut self, peer: &VerifyingKey);

    /// Send a message to all connected peers without blocking.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified peer without blocking. Messages to unknown or
    /// disconnected peers are silently dropped.
    fn send(&mut self, peer: VerifyingKey, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is
    /// available now.
    fn recv(&mut self) -> Option<(VerifyingKey, Message)>;

    /// The identities of currently-connected outbound peers.
    fn outbound_peers(&self) -> Vec<VerifyingKey>;

    /// The identities of currently-connected inbound peers. Inbound peers take part in sync and
    /// announcements like outbound ones, but do not count towards the outbound connection
    /// minimum.
    fn inbound_peers(&self) -> Vec<VerifyingKey>;

    /// Addresses with a connection attempt currently in progress.
    fn connecting(&self) -> Vec<SocketAddr>;

    /// The transport's address book: addresses it knows how to dial, connected or not.
    fn known_addresses(&self) -> Vec<SocketAddr>;

    /// The remote address of `peer`, if currently connected.
    fn address_of(&self, peer: &VerifyingKey) -> Option<SocketAddr>;

    /// Whether a connection to `address` is currently established.
    fn is_connected(&self, address: &SocketAddr) -> bool;
}
