//! Error types for the synchronization core.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single refresh task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
	/// The backend request behind the task failed.
	#[error("backend request failed: {0}")]
	Backend(String),
	/// The task panicked; the payload message is preserved.
	#[error("task panicked: {0}")]
	Panicked(String),
	/// The owning store was torn down before the task finished.
	#[error("task cancelled")]
	Cancelled,
}

impl TaskError {
	/// Wraps any displayable backend failure.
	pub fn backend(err: impl std::fmt::Display) -> Self {
		Self::Backend(err.to_string())
	}
}

/// Failure surfaced by an optimistic mutation after its local value was reverted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
	/// The backend rejected or failed the authoritative call.
	#[error("{field}: backend rejected update: {message}")]
	Backend {
		/// Name of the mutated field.
		field: &'static str,
		/// Backend failure description.
		message: String,
	},
}

/// Errors raised while loading a [`SyncPolicy`](crate::SyncPolicy).
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a policy file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// The policy text is not valid TOML or has unknown keys.
	#[error("policy parse error: {0}")]
	Parse(#[from] toml::de::Error),

	/// A value parsed but is out of range.
	#[error("invalid policy value: {0}")]
	Invalid(String),
}
