//! Contract between the rewards model and the host's rewards service.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use statesync_store::TaskError;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::state::AdType;

/// Errors reported by a [`RewardsBackend`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
	/// The service could not be reached or did not answer.
	#[error("rewards service unavailable: {0}")]
	Unavailable(String),

	/// The service answered but refused the request.
	#[error("request rejected: {0}")]
	Rejected(String),

	/// A response did not have the expected shape.
	#[error("malformed {endpoint} response: {message}")]
	Malformed {
		/// Endpoint that produced the response.
		endpoint: &'static str,
		/// Decoder message.
		message: String,
	},
}

impl From<BackendError> for TaskError {
	fn from(err: BackendError) -> Self {
		TaskError::backend(err)
	}
}

/// Request/response surface of the rewards service plus its change feed.
///
/// Read endpoints answer the raw JSON the host produces; [`crate::dto`] maps
/// it into model types. The change feed carries no payload: receivers re-query
/// to learn what changed.
#[async_trait]
pub trait RewardsBackend: Send + Sync {
	async fn balance(&self) -> Result<JsonValue, BackendError>;

	/// `null` when no wallet is linked.
	async fn external_wallet(&self) -> Result<JsonValue, BackendError>;

	async fn parameters(&self) -> Result<JsonValue, BackendError>;

	async fn ad_settings(&self) -> Result<JsonValue, BackendError>;

	/// `{"id": ...}` of the creator behind the active tab, or `null`.
	async fn current_creator(&self) -> Result<JsonValue, BackendError>;

	/// Re-fetches a creator's registration from the server. Expensive.
	async fn refresh_creator(&self, id: &str) -> Result<JsonValue, BackendError>;

	async fn ad_history(&self) -> Result<JsonValue, BackendError>;

	/// Returns the stored flag when the service normalized the request.
	async fn set_ad_type_enabled(&self, ad_type: AdType, enabled: bool) -> Result<Option<bool>, BackendError>;

	async fn set_creator_liked(&self, id: &str, liked: bool) -> Result<(), BackendError>;

	/// Subscribes to "something changed" notifications.
	fn subscribe_changes(&self) -> broadcast::Receiver<()>;
}
