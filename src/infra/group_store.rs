//! Persisted visitor-group identifier
//!
//! The group id lives in a small text file under the data directory. On first
//! run the file is created and seeded with the configured id; afterwards the
//! stored value wins and is treated as an opaque provisioning constant.

use anyhow::{bail, Context};
use std::fs;
use std::path::Path;
use tracing::info;

/// Read the stored group id, or write `fallback` if the file is absent or empty
pub fn load_or_init(path: &Path, fallback: &str) -> anyhow::Result<String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data dir {}", parent.display()))?;
        }
    }

    let stored = match fs::read_to_string(path) {
        Ok(content) => content.trim().to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read group id {}", path.display()))
        }
    };

    if !stored.is_empty() {
        info!(path = %path.display(), group_id = %stored, "group_id_loaded");
        return Ok(stored);
    }

    let fallback = fallback.trim();
    if fallback.is_empty() {
        bail!("no visitor group id stored in {} and none configured", path.display());
    }

    fs::write(path, fallback)
        .with_context(|| format!("Failed to write group id {}", path.display()))?;
    info!(path = %path.display(), group_id = %fallback, "group_id_provisioned");
    Ok(fallback.to_string())
}
