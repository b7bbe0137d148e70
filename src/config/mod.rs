mod loader;
mod schema;

pub use loader::{load_from_env_or_file, load_from_path, validate};
pub use schema::{ProfileDefaults, RelayConfig, ServerSettings};
pub(crate) use schema::{default_fingerprint, default_http_timeout_seconds};
