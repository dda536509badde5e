use std::time::Duration;

use statesync_rewards::RewardsModel;
use statesync_store::SyncPolicy;

use crate::common::{MockBackend, model};

#[tokio::test(start_paused = true)]
async fn push_burst_triggers_one_reload() {
	let backend = MockBackend::new();
	let model = model(&backend);
	model.load().await;
	assert_eq!(backend.calls("balance"), 1);

	for _ in 0..5 {
		backend.push();
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	tokio::time::sleep(Duration::from_secs(1)).await;

	assert_eq!(backend.calls("balance"), 2);
	assert!(!model.state().loading);
}

#[tokio::test(start_paused = true)]
async fn push_window_follows_policy() {
	let backend = MockBackend::new();
	let policy = SyncPolicy::from_toml_str("push_debounce_ms = 50").unwrap();
	let model = RewardsModel::new(backend.clone(), policy);

	model.notify_changed();
	tokio::time::sleep(Duration::from_millis(40)).await;
	assert_eq!(backend.calls("balance"), 0);

	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(backend.calls("balance"), 1);
}

#[tokio::test(start_paused = true)]
async fn push_while_hidden_reloads_on_return() {
	let backend = MockBackend::new();
	let model = model(&backend);
	model.load().await;

	model.visibility_changed(false).await;
	backend.push();
	tokio::time::sleep(Duration::from_millis(400)).await;
	assert_eq!(backend.calls("balance"), 1, "debounced push fired but the reload waits while hidden");

	let opened = model.state().open_time;
	let report = model.visibility_changed(true).await;

	assert!(report.is_some());
	assert_eq!(backend.calls("balance"), 2);
	assert!(model.state().open_time > opened, "hidden past the threshold counts as a reopen");
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_push_reloads() {
	let backend = MockBackend::new();
	let model = model(&backend);
	model.load().await;
	model.shutdown();

	backend.push();
	tokio::time::sleep(Duration::from_secs(1)).await;

	assert_eq!(backend.calls("balance"), 1);
}
