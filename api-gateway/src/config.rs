//! API gateway configuration.
//!
//! The gateway resolves the node's `config.json` (path from the
//! `VAULT_CONFIG` env var, falling back to `./config.json`), then derives
//! its HTTP listen address from the configured port. The process
//! environment (`VAULT_ENV`) overrides the storage environment so the
//! production-marker check reflects how the binary is actually run.

use std::net::SocketAddr;
use std::path::PathBuf;

use vault::VaultConfig;

/// Runtime settings for the gateway process.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address the JSON API binds to.
    pub listen_addr: SocketAddr,
    /// Address the Prometheus exporter binds to.
    pub metrics_addr: SocketAddr,
}

impl ApiConfig {
    /// Derives gateway settings from the node configuration.
    pub fn from_vault_config(cfg: &VaultConfig) -> Self {
        // Bind all interfaces so container port mappings reach us.
        let listen_addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], cfg.network.port));
        let metrics_addr: SocketAddr = "127.0.0.1:9898"
            .parse()
            .expect("hard-coded metrics listen address should parse");
        Self {
            listen_addr,
            metrics_addr,
        }
    }
}

/// Loads the node configuration, applying process-environment overrides.
pub fn load_vault_config() -> Result<VaultConfig, String> {
    let path = std::env::var("VAULT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"));

    let mut cfg = VaultConfig::load(&path)
        .map_err(|e| format!("failed to load config from {}: {e}", path.display()))?;

    if let Ok(env) = std::env::var("VAULT_ENV") {
        cfg.storage.environment = env;
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_addr_follows_configured_port() {
        let mut cfg = VaultConfig::default();
        cfg.network.port = 9123;
        let api = ApiConfig::from_vault_config(&cfg);
        assert_eq!(api.listen_addr.port(), 9123);
    }
}
