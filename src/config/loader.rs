use super::schema::RelayConfig;
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use http::HeaderName;
use std::net::SocketAddr;
use std::path::Path;

const ENV_PREFIX: &str = "MIMIC_RELAY_";

pub async fn load_from_env_or_file() -> Result<RelayConfig> {
    let config: RelayConfig = Figment::from(Serialized::defaults(RelayConfig::default()))
        // Try to load from various config files
        .merge(Toml::file("mimic-relay.toml"))
        .merge(Json::file("mimic-relay.json"))
        .merge(Yaml::file("mimic-relay.yaml"))
        .merge(Yaml::file("mimic-relay.yml"))
        // Override with environment variables (MIMIC_RELAY_SERVER__LISTEN_ADDR, ...)
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;

    Ok(config)
}

pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<RelayConfig> {
    let path = path.as_ref();
    let base = Figment::from(Serialized::defaults(RelayConfig::default()));

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => base.merge(Toml::file(path)),
        Some("json") => base.merge(Json::file(path)),
        Some("yaml") | Some("yml") => base.merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into())
        }
    };

    let config: RelayConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;

    Ok(config)
}

pub fn validate(config: &RelayConfig) -> Result<()> {
    let server = &config.server;

    if server.listen_addr.parse::<SocketAddr>().is_err() {
        return Err(ConfigError::Validation(format!(
            "listen_addr '{}' is not a socket address",
            server.listen_addr
        ))
        .into());
    }

    if HeaderName::from_bytes(server.control_header.as_bytes()).is_err() {
        return Err(ConfigError::Validation(format!(
            "control_header '{}' is not a valid header name",
            server.control_header
        ))
        .into());
    }

    if server.shutdown_grace_seconds == 0 {
        return Err(ConfigError::Validation(
            "shutdown_grace_seconds must be greater than 0".into(),
        )
        .into());
    }

    let defaults = &config.defaults;
    for (field, addr) in [
        ("intercept_proxy_addr", &defaults.intercept_proxy_addr),
        ("upstream_controller_addr", &defaults.upstream_controller_addr),
    ] {
        if addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "{field} '{addr}' is not a socket address"
            ))
            .into());
        }
    }

    if defaults.http_timeout_seconds == 0 {
        return Err(ConfigError::Validation(
            "http_timeout_seconds must be greater than 0".into(),
        )
        .into());
    }

    Ok(())
}
