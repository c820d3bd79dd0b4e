use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the session cache file, resolved against the user's home
/// directory by the binary.
pub const AUTH_CACHE_FILE: &str = ".flickr_oauth";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("session cache not found at {0} (run the authorization flow first)")]
    NotFound(PathBuf),
    #[error("failed to read session cache: {0}")]
    Io(#[from] io::Error),
    #[error("malformed session cache: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Cached OAuth session material. The interactive handshake that produces it
/// lives outside this crate; here it is only loaded and persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCache {
    pub api_key: String,
    pub auth_token: String,
}

impl AuthCache {
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        if !path.exists() {
            return Err(AuthError::NotFound(path.to_path_buf()));
        }
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), AuthError> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}
