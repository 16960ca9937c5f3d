//! `SetChat` client library.
//!
//! Conversations have no ids: a conversation is the set of other people in
//! it. The store files every message, sent or received, under the
//! conversation whose recipient multiset matches.

pub mod app;
pub mod channel;
pub mod config;
pub mod contacts;
pub mod conversation;
pub mod session;
pub mod state;
pub mod store;
