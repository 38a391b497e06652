//! Pinned signing key storage.
//!
//! Enrollment hands the agent the control plane's Ed25519 public key once;
//! it is stored as raw bytes in the state dir and never fetched from the
//! network again. Every playbook signature is verified against this file.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use crate::paths;

/// Ed25519 public key length in bytes.
const KEY_LEN: usize = 32;

/// File name of the pinned key inside the state dir.
const KEY_FILE: &str = "signing.key";

/// Default location of the pinned key file.
pub fn default_key_path() -> Result<PathBuf> {
    Ok(paths::state_dir()?.join(KEY_FILE))
}

/// Load the pinned public key, refusing anything that is not exactly one
/// raw Ed25519 public key.
pub fn load_public_key(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("could not read signing key: {}", path.display()))?;
    if bytes.len() != KEY_LEN {
        bail!(
            "signing key {} is {} bytes, expected {KEY_LEN}; re-enroll this device",
            path.display(),
            bytes.len()
        );
    }
    Ok(bytes)
}

/// Persist the enrollment-time public key.
pub fn save_public_key(path: &Path, key: &[u8]) -> Result<()> {
    if key.len() != KEY_LEN {
        bail!("refusing to pin a {}-byte signing key", key.len());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("could not create {}", dir.display()))?;
    }
    std::fs::write(path, key)
        .with_context(|| format!("could not write signing key: {}", path.display()))?;
    Ok(())
}
