//! The sync protocol: windowed block fetching with graduated peer banning on the client side,
//! and a read-only serving thread on the server side.

pub mod messages;

pub mod peer;

pub(crate) mod engine;

pub(crate) mod server;
