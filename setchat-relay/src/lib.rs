//! `SetChat` relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! accepts WebSocket connections keyed by identity and fans each message
//! out to its recipients, rewriting the recipient list for each of them.

pub mod config;
pub mod groups;
pub mod relay;
pub mod router;
