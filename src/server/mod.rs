//! Relay listener lifecycle.

mod lifecycle;
mod listener;

pub use lifecycle::RelayServer;
