use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::locks::LockPolicy;
use crate::error::{BuildError, Result};
use super::retry::RetryConfig;

/// Orchestrator settings. Passed in explicitly, never read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Retry policy for artifact uploads
    pub upload: RetryConfig,
    /// Behavior when the bundle already has a build in flight
    pub lock_policy: LockPolicy,
    /// Directory receiving a copy of every packed archive
    pub output_dir: Option<PathBuf>,
    /// Keep archives local: no upload, no cache record, no assignment
    pub skip_upload: bool,
}

impl BuildConfig {
    /// Reject settings that could only fail late in an attempt.
    pub fn validate(&self) -> Result<()> {
        if self.skip_upload && self.output_dir.is_none() {
            return Err(BuildError::InvalidConfig(
                "skip_upload requires an output directory".to_string(),
            ));
        }
        Ok(())
    }
}
