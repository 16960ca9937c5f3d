//! Shared protocol definitions for the `SetChat` wire format.

pub mod codec;
pub mod event;
pub mod identity;
