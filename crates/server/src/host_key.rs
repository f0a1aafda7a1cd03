//! SSH host key persistence
//!
//! Keys are Ed25519, stored in OpenSSH private key format so they can be
//! inspected with `ssh-keygen -l -f`.

use crate::error::ServerError;
use anyhow::{Context, Result};
use russh::keys::ssh_key::{HashAlg, LineEnding, rand_core::OsRng};
use russh::keys::{Algorithm, PrivateKey};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Generate a fresh Ed25519 host key
pub fn generate_host_key() -> std::result::Result<PrivateKey, ServerError> {
    PrivateKey::random(&mut OsRng, Algorithm::Ed25519).map_err(|e| ServerError::HostKey(e.to_string()))
}

/// Load the host key at `path`, generating and saving one if missing
pub fn load_or_generate_host_key(path: &Path) -> Result<PrivateKey> {
    if path.exists() {
        load_host_key(path)
    } else {
        let key = generate_host_key()?;
        save_host_key(&key, path)?;
        info!("Generated new SSH host key at {}", path.display());
        Ok(key)
    }
}

pub fn load_host_key(path: &Path) -> Result<PrivateKey> {
    debug!("Loading SSH host key from {}", path.display());

    let pem = fs::read_to_string(path)
        .with_context(|| format!("Failed to read host key file: {}", path.display()))?;
    let key = PrivateKey::from_openssh(&pem)
        .with_context(|| format!("Invalid host key file: {}", path.display()))?;

    info!(
        "Loaded SSH host key from {} ({})",
        path.display(),
        key.public_key().fingerprint(HashAlg::Sha256)
    );
    Ok(key)
}

/// Save a host key with owner-only permissions
pub fn save_host_key(key: &PrivateKey, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create key directory: {}", parent.display()))?;
    }

    let pem = key
        .to_openssh(LineEnding::LF)
        .context("Failed to encode host key")?;
    fs::write(path, pem.as_bytes())
        .with_context(|| format!("Failed to write host key file: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            warn!(
                "Failed to set secure permissions on {}: {}",
                path.display(),
                e
            );
        }
    }

    Ok(())
}
