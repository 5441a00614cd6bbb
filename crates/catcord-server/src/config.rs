//! Server configuration loaded from environment variables.
//!
//! Both settings have defaults so the server starts with zero
//! configuration for local development.

use std::net::{IpAddr, SocketAddr};

/// Stub server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to serve on.
    /// Env: `CATCORD_PORT`
    /// Default: `5000`
    pub port: u16,

    /// Address to bind.
    /// Env: `CATCORD_BIND`
    /// Default: `0.0.0.0`
    pub bind: IpAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            bind: [0, 0, 0, 0].into(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("CATCORD_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                config.port = parsed;
            } else {
                tracing::warn!(value = %port, "Invalid CATCORD_PORT, using default");
            }
        }

        if let Ok(bind) = std::env::var("CATCORD_BIND") {
            if let Ok(parsed) = bind.parse::<IpAddr>() {
                config.bind = parsed;
            } else {
                tracing::warn!(value = %bind, "Invalid CATCORD_BIND, using default");
            }
        }

        config
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}
