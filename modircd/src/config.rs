use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use modircd_core::{Operator, ServerConfig};
use modircd_server::SessionConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_name: String,
    pub address: String,
    pub port: u16,
    pub password: Option<String>,
    pub motd: Option<String>,
    pub operators: Vec<OperatorConfig>,
    /// loaded in this order at startup
    pub modules: Vec<String>,
    pub max_channels_per_user: usize,
    pub messages_per_second: u32,
}

impl Default for Config {
    fn default() -> Self {
        let server = ServerConfig::default();
        let session = SessionConfig::default();
        Self {
            server_name: server.server_name,
            address: "0.0.0.0".to_string(),
            port: 6667,
            password: None,
            motd: None,
            operators: Vec::new(),
            modules: Vec::new(),
            max_channels_per_user: server.max_channels_per_user,
            messages_per_second: session.messages_per_second,
        }
    }
}

impl Config {
    pub fn load_from_str(str: &str) -> Result<Self, anyhow::Error> {
        let config: Config = serde_yml::from_str(str)?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, anyhow::Error> {
        let string = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {path:?}"))?;
        Config::load_from_str(string.as_str()).with_context(|| format!("parsing {path:?}"))
    }
}

impl Config {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            server_name: self.server_name.clone(),
            password: self.password.clone(),
            motd: self.motd.clone(),
            operators: self
                .operators
                .iter()
                .map(|o| Operator {
                    name: o.name.clone(),
                    password: o.password.clone(),
                })
                .collect(),
            max_channels_per_user: self.max_channels_per_user,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            messages_per_second: self.messages_per_second,
        }
    }
}
