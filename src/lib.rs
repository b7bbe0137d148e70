pub mod capture;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod profile;
pub mod relay;
pub mod server;

pub use error::{RelayError, Result};
pub use server::RelayServer;
