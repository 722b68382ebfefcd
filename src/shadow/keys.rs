// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! SSH key material for shadow workloads.

use crate::errors::ClusterError;
use russh_keys::key::KeyPair;
use russh_keys::PublicKeyBase64;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A freshly generated key pair in the formats the shadow and the client need.
pub struct SshKeyPair {
    /// Public key as an `authorized_keys` line
    pub public_key: String,
    /// Private key as PKCS#8 PEM
    pub private_key: String,
}

fn key_error(shadow_name: &str, reason: impl ToString) -> ClusterError {
    ClusterError::ShadowUnusable {
        name: shadow_name.to_string(),
        reason: format!("ssh key generation failed: {}", reason.to_string()),
    }
}

/// Generate an Ed25519 key pair for `shadow_name`.
///
/// # Errors
///
/// Returns [`ClusterError::ShadowUnusable`] if the key cannot be generated or encoded.
pub fn generate_key_pair(shadow_name: &str) -> Result<SshKeyPair, ClusterError> {
    let key: Option<KeyPair> = KeyPair::generate_ed25519().into();
    let key = key.ok_or_else(|| key_error(shadow_name, "no key produced"))?;

    let public = key
        .clone_public_key()
        .map_err(|e| key_error(shadow_name, e))?;
    let public_key = format!(
        "{} {} {shadow_name}",
        public.name(),
        public.public_key_base64()
    );

    let mut pem = Vec::new();
    russh_keys::encode_pkcs8_pem(&key, &mut pem).map_err(|e| key_error(shadow_name, e))?;
    let private_key = String::from_utf8(pem).map_err(|e| key_error(shadow_name, e))?;

    Ok(SshKeyPair {
        public_key,
        private_key,
    })
}

/// Path of the private key file for `shadow_name` under `key_dir`.
#[must_use]
pub fn private_key_path(key_dir: &Path, shadow_name: &str) -> PathBuf {
    key_dir.join(format!("{shadow_name}.key"))
}

/// Write a private key readable only by the current user.
///
/// # Errors
///
/// Returns an I/O error if the directory or file cannot be written.
pub fn write_private_key(key_dir: &Path, shadow_name: &str, pem: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(key_dir)?;
    let path = private_key_path(key_dir, shadow_name);
    fs::write(&path, pem)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }

    debug!(path = %path.display(), "Wrote shadow private key");
    Ok(path)
}

/// Remove a private key file. A missing file is not an error.
///
/// # Errors
///
/// Returns an I/O error for anything other than a missing file.
pub fn remove_private_key(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod keys_tests;
