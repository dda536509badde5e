//! Timing policy for reconciliation.
//!
//! Every interval the reconciler depends on lives here so surfaces can tune
//! them without code changes. Policies are written in TOML with millisecond
//! fields; omitted keys keep their defaults.
//!
//! ```toml
//! push_debounce_ms = 300
//! creator_cooldown_ms = 10000
//! visibility_threshold_ms = 200
//! background_retry_delay_ms = 1000
//! background_retry_attempts = 1
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::reconcile::RetryPolicy;

/// Intervals and retry limits used by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncPolicy {
	/// Quiet period after the last backend push before a reload runs.
	pub push_debounce_ms: u64,
	/// Window in which a repeated creator refresh reuses the previous result.
	pub creator_cooldown_ms: u64,
	/// Minimum hidden duration before redisplay counts as a reopen.
	pub visibility_threshold_ms: u64,
	/// Delay between background task attempts.
	pub background_retry_delay_ms: u64,
	/// Extra attempts after a background task's first failure.
	pub background_retry_attempts: u32,
}

impl Default for SyncPolicy {
	fn default() -> Self {
		Self {
			push_debounce_ms: 300,
			creator_cooldown_ms: 10_000,
			visibility_threshold_ms: 200,
			background_retry_delay_ms: 1_000,
			background_retry_attempts: 1,
		}
	}
}

impl SyncPolicy {
	/// Parses and validates a policy from TOML text.
	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		let policy: Self = toml::from_str(text)?;
		policy.validate()?;
		Ok(policy)
	}

	/// Reads and parses a policy file.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		let policy = Self::from_toml_str(&text)?;
		tracing::debug!(path = %path.display(), ?policy, "policy.loaded");
		Ok(policy)
	}

	/// Rejects values that would disable coalescing.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.push_debounce_ms == 0 {
			return Err(ConfigError::Invalid("push_debounce_ms must be > 0".to_string()));
		}
		Ok(())
	}

	/// Quiet period before a push-triggered reload.
	pub fn push_debounce(&self) -> Duration {
		Duration::from_millis(self.push_debounce_ms)
	}

	/// Reuse window for creator refreshes.
	pub fn creator_cooldown(&self) -> Duration {
		Duration::from_millis(self.creator_cooldown_ms)
	}

	/// Hidden duration after which redisplay counts as a reopen.
	pub fn visibility_threshold(&self) -> Duration {
		Duration::from_millis(self.visibility_threshold_ms)
	}

	/// Retry policy applied to background refresh tasks.
	pub fn background_retry(&self) -> RetryPolicy {
		RetryPolicy {
			attempts: self.background_retry_attempts,
			delay: Duration::from_millis(self.background_retry_delay_ms),
		}
	}
}
