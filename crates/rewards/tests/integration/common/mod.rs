//! Scripted rewards backend for model tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value as JsonValue, json};
use statesync_rewards::{AdType, BackendError, RewardsBackend, RewardsModel};
use statesync_store::SyncPolicy;
use tokio::sync::broadcast;

/// In-memory backend whose answers, failures and latencies are set per method.
pub struct MockBackend {
	responses: Mutex<HashMap<&'static str, JsonValue>>,
	failing: Mutex<HashSet<&'static str>>,
	delays: Mutex<HashMap<&'static str, Duration>>,
	calls: Mutex<HashMap<&'static str, usize>>,
	normalized_ad_flag: Mutex<Option<bool>>,
	liked: Mutex<Vec<(String, bool)>>,
	changes: broadcast::Sender<()>,
}

impl MockBackend {
	pub fn new() -> Arc<Self> {
		let (changes, _) = broadcast::channel(16);
		let responses = HashMap::from([
			("balance", json!({"total": 25.5, "wallets": {"blinded": 20.0, "uphold": 5.5}})),
			("external_wallet", json!({"type": "uphold", "status": 2, "username": "satoshi"})),
			("parameters", json!({"rate": 0.25, "tipChoices": [1.0, 5.0, 10.0]})),
			("ad_settings", json!({"newTabPageAdsEnabled": true, "notificationAdsEnabled": false})),
			("current_creator", json!({"id": "brave.com"})),
			("refresh_creator", json!({"id": "brave.com", "name": "Brave", "verified": true})),
			(
				"ad_history",
				json!([{
					"uuid": "0",
					"timestampInMilliseconds": 1_700_000_000_000.0,
					"adDetailRows": [{"adContent": {"creativeInstanceId": "ad-1", "brand": "Acme"}}]
				}]),
			),
		]);
		Arc::new(Self {
			responses: Mutex::new(responses),
			failing: Mutex::default(),
			delays: Mutex::default(),
			calls: Mutex::default(),
			normalized_ad_flag: Mutex::new(None),
			liked: Mutex::default(),
			changes,
		})
	}

	pub fn respond(&self, method: &'static str, value: JsonValue) {
		self.responses.lock().insert(method, value);
	}

	pub fn fail(&self, method: &'static str) {
		self.failing.lock().insert(method);
	}

	pub fn recover(&self, method: &'static str) {
		self.failing.lock().remove(method);
	}

	pub fn delay(&self, method: &'static str, by: Duration) {
		self.delays.lock().insert(method, by);
	}

	pub fn normalize_ad_flag(&self, stored: bool) {
		*self.normalized_ad_flag.lock() = Some(stored);
	}

	pub fn calls(&self, method: &'static str) -> usize {
		self.calls.lock().get(method).copied().unwrap_or_default()
	}

	pub fn liked_requests(&self) -> Vec<(String, bool)> {
		self.liked.lock().clone()
	}

	/// Emits one "something changed" notification.
	pub fn push(&self) {
		let _ = self.changes.send(());
	}

	async fn call(&self, method: &'static str) -> Result<(), BackendError> {
		*self.calls.lock().entry(method).or_default() += 1;
		let delay = self.delays.lock().get(method).copied();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		if self.failing.lock().contains(method) {
			return Err(BackendError::Unavailable(format!("{method} offline")));
		}
		Ok(())
	}

	async fn answer(&self, method: &'static str) -> Result<JsonValue, BackendError> {
		self.call(method).await?;
		Ok(self.responses.lock().get(method).cloned().unwrap_or(JsonValue::Null))
	}
}

#[async_trait]
impl RewardsBackend for MockBackend {
	async fn balance(&self) -> Result<JsonValue, BackendError> {
		self.answer("balance").await
	}

	async fn external_wallet(&self) -> Result<JsonValue, BackendError> {
		self.answer("external_wallet").await
	}

	async fn parameters(&self) -> Result<JsonValue, BackendError> {
		self.answer("parameters").await
	}

	async fn ad_settings(&self) -> Result<JsonValue, BackendError> {
		self.answer("ad_settings").await
	}

	async fn current_creator(&self) -> Result<JsonValue, BackendError> {
		self.answer("current_creator").await
	}

	async fn refresh_creator(&self, _id: &str) -> Result<JsonValue, BackendError> {
		self.answer("refresh_creator").await
	}

	async fn ad_history(&self) -> Result<JsonValue, BackendError> {
		self.answer("ad_history").await
	}

	async fn set_ad_type_enabled(&self, _ad_type: AdType, _enabled: bool) -> Result<Option<bool>, BackendError> {
		self.call("set_ad_type_enabled").await?;
		Ok(*self.normalized_ad_flag.lock())
	}

	async fn set_creator_liked(&self, id: &str, liked: bool) -> Result<(), BackendError> {
		self.call("set_creator_liked").await?;
		self.liked.lock().push((id.to_string(), liked));
		Ok(())
	}

	fn subscribe_changes(&self) -> broadcast::Receiver<()> {
		self.changes.subscribe()
	}
}

/// Model over `backend` with default timings.
pub fn model(backend: &Arc<MockBackend>) -> RewardsModel {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let backend: Arc<dyn RewardsBackend> = backend.clone();
	RewardsModel::new(backend, SyncPolicy::default())
}
