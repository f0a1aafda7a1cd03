//! Host configuration management

use crate::host_key::load_or_generate_host_key;
use crate::ssh::SshServerOptions;
use anyhow::{Context, Result, anyhow};
use protocol::{MAX_BUSID_LEN, USBIP_PORT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub usbip: UsbIpSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub log_level: String,
    pub service_mode: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            service_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub bind_addr: String,
    /// Listen port (0 = first free port from 2222)
    pub port: u16,
    pub username: String,
    /// Empty = generate a password on every start
    pub password: String,
    /// Persistent Ed25519 host key; `~` is expanded
    /// If None, a new key is generated on every start
    pub host_key_path: Option<PathBuf>,
    pub auth_rejection_time_ms: u64,
    /// Idle session timeout in seconds (0 = none)
    pub inactivity_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 0,
            username: "usbip".to_string(),
            password: String::new(),
            host_key_path: None,
            auth_rejection_time_ms: 250,
            inactivity_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbIpSettings {
    /// Connect to the peer's USB/IP server as soon as its tunnel is up
    pub auto_connect: bool,
    /// Port the peer's usbipd listens on, used in the connection hint
    pub default_port: u16,
    /// Bus ids imported automatically when a tunnel comes up
    pub auto_import: Vec<String>,
}

impl Default for UsbIpSettings {
    fn default() -> Self {
        Self {
            auto_connect: true,
            default_port: USBIP_PORT,
            auto_import: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usbip-tunnel/host.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usbip-tunnel").join("host.toml")
        } else {
            PathBuf::from(".config/usbip-tunnel/host.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.ssh.username.is_empty() {
            return Err(anyhow!("SSH username must not be empty"));
        }

        if self.usbip.default_port == 0 {
            return Err(anyhow!("USB/IP default_port must not be 0"));
        }

        for busid in &self.usbip.auto_import {
            if busid.is_empty() || busid.len() > MAX_BUSID_LEN {
                return Err(anyhow!(
                    "Invalid bus id '{}' in auto_import, must be 1-{} characters",
                    busid,
                    MAX_BUSID_LEN
                ));
            }
        }

        Ok(())
    }

    /// Host key path with `~` expanded
    pub fn host_key_path(&self) -> Option<PathBuf> {
        self.ssh.host_key_path.as_ref().map(|p| expand_path(p))
    }

    /// SSH listener options, loading or creating the host key if configured
    pub fn ssh_options(&self) -> Result<SshServerOptions> {
        let host_key = match self.host_key_path() {
            Some(path) => Some(load_or_generate_host_key(&path)?),
            None => None,
        };

        Ok(SshServerOptions {
            bind_addr: self.ssh.bind_addr.clone(),
            host_key,
            auth_rejection_time: Duration::from_millis(self.ssh.auth_rejection_time_ms),
            inactivity_timeout: (self.ssh.inactivity_timeout_secs > 0)
                .then(|| Duration::from_secs(self.ssh.inactivity_timeout_secs)),
        })
    }
}

fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}
