//! Cross-fleet rate-limit register.
//!
//! A single on-disk JSON record visible to every runner process: "provider
//! X is unavailable until T, set by agent Y." Writers replace it atomically
//! (temp file, fsync, rename); readers lazily delete an expired entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::domain::errors::{DomainError, DomainResult};

/// The shared flag: present means the named provider is limited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitFlag {
    pub provider: String,
    pub reset_time: DateTime<Utc>,
    pub set_by: String,
    pub set_at: DateTime<Utc>,
}

/// Filesystem-backed register shared by all runners on a host.
#[derive(Debug, Clone)]
pub struct RateLimitRegister {
    path: PathBuf,
}

impl RateLimitRegister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Conventional location under the control directory.
    pub fn in_control_dir(control_dir: &Path) -> Self {
        Self::new(control_dir.join("rate_limit.json"))
    }

    /// Record a provider limit for everyone to see.
    pub fn set(&self, provider: &str, reset_time: DateTime<Utc>, set_by: &str) -> DomainResult<()> {
        let flag = RateLimitFlag {
            provider: provider.to_string(),
            reset_time,
            set_by: set_by.to_string(),
            set_at: Utc::now(),
        };
        let data = serde_json::to_string(&flag)?;

        let parent = self
            .path
            .parent()
            .ok_or_else(|| DomainError::IoError("rate limit file has no parent directory".into()))?;
        fs::create_dir_all(parent)?;

        // Write-then-rename in the same directory so concurrent writers
        // never leave a torn record behind.
        let temp_path = parent.join(format!(".rate_limit_{}.tmp", std::process::id()));
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(data.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        tracing::warn!(provider, reset_time = %reset_time.to_rfc3339(), set_by, "Rate limit set");
        Ok(())
    }

    /// Active flag, if any. An entry whose reset time has passed is treated
    /// as absent and deleted.
    pub fn get(&self) -> Option<RateLimitFlag> {
        let text = fs::read_to_string(&self.path).ok()?;
        let flag: RateLimitFlag = match serde_json::from_str(&text) {
            Ok(flag) => flag,
            Err(_) => {
                // Corrupt record: discard rather than wedging the fleet.
                let _ = fs::remove_file(&self.path);
                return None;
            }
        };

        if Utc::now() >= flag.reset_time {
            let _ = fs::remove_file(&self.path);
            return None;
        }
        Some(flag)
    }

    /// Active flag for one provider.
    pub fn get_for_provider(&self, provider: &str) -> Option<RateLimitFlag> {
        self.get().filter(|flag| flag.provider == provider)
    }

    /// Remove the flag, e.g. after waiting out the reset.
    pub fn clear(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to clear rate limit file: {e}");
            }
        }
    }
}
