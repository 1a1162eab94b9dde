//! Types that are replicated, stored, and exchanged by the engine.
//!
//! Types specific to a single component live in that component's own modules, e.g.,
//! [`crate::sync::messages`].

pub mod block;

pub mod data_types;

pub mod header;
