use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use statesync_rewards::{Balance, WalletStatus};

use crate::common::{MockBackend, model};

#[tokio::test(start_paused = true)]
async fn load_is_ready_before_background_slices() {
	let backend = MockBackend::new();
	backend.delay("ad_history", Duration::from_secs(3));
	backend.delay("refresh_creator", Duration::from_secs(3));
	let model = model(&backend);
	assert!(model.state().loading);

	let report = model.load().await;

	assert!(report.ready);
	assert!(report.is_clean(), "{:?}", report.failed);
	assert_eq!(report.succeeded, vec!["balance", "parameters", "external_wallet", "ad_settings"]);
	assert_eq!(report.background_spawned, 2);

	let state = model.state();
	assert!(!state.loading);
	assert_eq!(state.balance.as_ref().map(|b| b.total), Some(25.5));
	assert_eq!(state.external_wallet.as_ref().map(|w| w.status), Some(WalletStatus::Verified));
	assert_eq!(state.parameters.as_ref().map(|p| p.tip_choices.len()), Some(3));
	assert!(state.ad_types.new_tab_page);
	assert!(state.ad_history.is_empty());
	assert_eq!(state.current_creator, None);

	tokio::time::sleep(Duration::from_secs(4)).await;
	let state = model.state();
	assert_eq!(state.ad_history.len(), 1);
	assert_eq!(state.ad_history[0].ads[0].brand, "Acme");
	assert_eq!(state.current_creator.as_ref().map(|c| c.name.as_str()), Some("Brave"));
}

#[tokio::test(start_paused = true)]
async fn failing_blocking_load_still_becomes_ready() {
	let backend = MockBackend::new();
	backend.fail("balance");
	let model = model(&backend);

	let report = model.load().await;

	assert!(report.ready);
	assert_eq!(report.failed.len(), 1);
	assert_eq!(report.failed[0].0, "balance");
	let state = model.state();
	assert!(!state.loading);
	assert_eq!(state.balance, None);
	assert!(state.last_error.as_deref().is_some_and(|e| e.starts_with("balance:")));
	assert!(state.parameters.is_some());
}

#[tokio::test(start_paused = true)]
async fn background_failure_retries_after_delay() {
	let backend = MockBackend::new();
	backend.fail("ad_history");
	let model = model(&backend);

	model.load().await;
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(backend.calls("ad_history"), 1);
	assert_eq!(model.state().last_error, None, "background failures stay out of the panel");

	tokio::time::sleep(Duration::from_secs(5)).await;
	assert_eq!(backend.calls("ad_history"), 2, "one retry by default");
	assert!(model.state().ad_history.is_empty());
	assert_eq!(model.state().last_error, None);
}

#[tokio::test(start_paused = true)]
async fn background_retry_lands_once_backend_recovers() {
	let backend = MockBackend::new();
	backend.fail("ad_history");
	let model = model(&backend);

	model.load().await;
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(model.state().ad_history.is_empty());

	backend.recover("ad_history");
	tokio::time::sleep(Duration::from_secs(2)).await;

	let state = model.state();
	assert_eq!(backend.calls("ad_history"), 2);
	assert_eq!(state.ad_history.len(), 1);
	assert_eq!(state.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn blocking_success_clears_its_earlier_error() {
	let backend = MockBackend::new();
	backend.fail("balance");
	let model = model(&backend);
	model.load().await;
	assert!(model.state().last_error.as_deref().is_some_and(|e| e.starts_with("balance:")));

	backend.recover("balance");
	let report = model.load().await;

	assert!(report.is_clean());
	assert_eq!(model.state().last_error, None);
	assert_eq!(model.state().balance.as_ref().map(|b| b.total), Some(25.5));
}

#[tokio::test(start_paused = true)]
async fn creator_refresh_respects_cooldown() {
	let backend = MockBackend::new();
	let model = model(&backend);

	let first = model.refresh_current_creator().await.unwrap();
	tokio::time::sleep(Duration::from_secs(5)).await;
	let second = model.refresh_current_creator().await.unwrap();
	assert_eq!(first, second);
	assert_eq!(backend.calls("refresh_creator"), 1);

	tokio::time::sleep(Duration::from_secs(10)).await;
	model.refresh_current_creator().await.unwrap();
	assert_eq!(backend.calls("refresh_creator"), 2);
	assert_eq!(backend.calls("current_creator"), 3);
	assert_eq!(model.state().current_creator.as_ref().map(|c| c.id.as_str()), Some("brave.com"));
}

#[tokio::test(start_paused = true)]
async fn long_hide_bumps_open_time_and_reloads() {
	let backend = MockBackend::new();
	let model = model(&backend);
	model.load().await;
	let opened = model.state().open_time;

	assert!(model.visibility_changed(false).await.is_none());
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(model.visibility_changed(true).await.is_none(), "short hide");
	assert_eq!(model.state().open_time, opened);
	assert_eq!(backend.calls("balance"), 1);

	model.visibility_changed(false).await;
	tokio::time::sleep(Duration::from_secs(1)).await;
	let report = model.visibility_changed(true).await.unwrap();

	assert!(report.ready);
	assert!(model.state().open_time > opened);
	assert_eq!(backend.calls("balance"), 2);
}

#[tokio::test(start_paused = true)]
async fn selector_renders_only_on_balance_change() {
	let backend = MockBackend::new();
	let model = model(&backend);
	let renders = Arc::new(AtomicUsize::new(0));
	let seen = Arc::clone(&renders);
	let balance = model.select(
		|s| s.balance.clone(),
		move |_: &Option<Balance>| {
			seen.fetch_add(1, Ordering::SeqCst);
		},
	);

	model.load().await;
	assert_eq!(renders.load(Ordering::SeqCst), 1);

	model.load().await;
	assert_eq!(renders.load(Ordering::SeqCst), 1, "same balance reloaded");

	backend.respond("balance", serde_json::json!({"total": 30.0}));
	model.load().await;
	assert_eq!(renders.load(Ordering::SeqCst), 2);
	assert_eq!(balance.get().map(|b| b.total), Some(30.0));
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_in_flight_results() {
	let backend = MockBackend::new();
	backend.delay("balance", Duration::from_millis(500));
	let model = model(&backend);

	let loading = model.clone();
	let pass = tokio::spawn(async move { loading.load().await });
	tokio::time::sleep(Duration::from_millis(100)).await;
	model.shutdown();

	let report = pass.await.unwrap();
	assert!(!report.ready);
	assert!(model.state().loading);
	assert_eq!(model.state().balance, None);
	assert_eq!(model.store().listener_count(), 0);
}
