use std::time::Duration;

use statesync_rewards::AdType;
use statesync_store::{MutationOutcome, MutationState};

use crate::common::{MockBackend, model};

#[tokio::test(start_paused = true)]
async fn enabling_ad_type_shows_at_once_and_reverts_on_failure() {
	let backend = MockBackend::new();
	backend.delay("set_ad_type_enabled", Duration::from_millis(200));
	backend.fail("set_ad_type_enabled");
	let model = model(&backend);
	assert!(!model.state().ad_types.notification);

	let pending = model.set_ad_type_enabled(AdType::Notification, true);
	assert!(model.state().ad_types.notification, "visible before the backend answers");
	assert_eq!(model.state().last_error, None);

	let outcome = pending.await.unwrap();

	assert_eq!(outcome.state(), MutationState::Reverted);
	assert!(matches!(outcome, MutationOutcome::Reverted { restored: true, .. }));
	let state = model.state();
	assert!(!state.ad_types.notification);
	assert!(state.last_error.as_deref().is_some_and(|e| e.contains("notification")));
	assert_eq!(backend.calls("set_ad_type_enabled"), 1);
}

#[tokio::test(start_paused = true)]
async fn successful_toggle_clears_previous_error() {
	let backend = MockBackend::new();
	backend.fail("balance");
	let model = model(&backend);
	model.load().await;
	assert!(model.state().last_error.is_some());

	let outcome = model.set_ad_type_enabled(AdType::SearchResult, true).await.unwrap();

	assert_eq!(outcome, MutationOutcome::Confirmed { normalized: false });
	assert!(model.state().ad_types.search_result);
	assert_eq!(model.state().last_error, None);
}

#[tokio::test(start_paused = true)]
async fn backend_normalized_flag_wins() {
	let backend = MockBackend::new();
	backend.normalize_ad_flag(false);
	let model = model(&backend);

	let outcome = model.set_ad_type_enabled(AdType::NewTabPage, true).await.unwrap();

	assert_eq!(outcome, MutationOutcome::Confirmed { normalized: true });
	assert!(!model.state().ad_types.new_tab_page);
}

#[tokio::test(start_paused = true)]
async fn overlapping_toggles_revert_to_latest_baseline() {
	let backend = MockBackend::new();
	backend.delay("set_ad_type_enabled", Duration::from_millis(100));
	backend.fail("set_ad_type_enabled");
	let model = model(&backend);

	let first = model.set_ad_type_enabled(AdType::Notification, true);
	let second = model.set_ad_type_enabled(AdType::Notification, false);
	assert!(!model.state().ad_types.notification);

	let (first, second) = (first.await.unwrap(), second.await.unwrap());

	assert!(matches!(first, MutationOutcome::Reverted { restored: false, .. }));
	assert!(matches!(second, MutationOutcome::Reverted { restored: true, .. }));
	assert!(
		model.state().ad_types.notification,
		"the second toggle's baseline was the first toggle's optimistic value"
	);
}

#[tokio::test(start_paused = true)]
async fn liking_creator_is_fire_and_forget() {
	let backend = MockBackend::new();
	let model = model(&backend);
	assert!(model.set_creator_liked(true).is_none(), "no creator yet");

	model.refresh_current_creator().await.unwrap();
	backend.fail("set_creator_liked");
	let outcome = model.set_creator_liked(true).expect("creator present").await.unwrap();

	assert!(outcome.is_confirmed());
	assert_eq!(model.state().current_creator.as_ref().map(|c| c.liked), Some(true));
	assert_eq!(model.state().last_error, None);
	assert_eq!(backend.calls("set_creator_liked"), 1);
}

#[tokio::test(start_paused = true)]
async fn liking_creator_invalidates_cooldown() {
	let backend = MockBackend::new();
	let model = model(&backend);
	model.refresh_current_creator().await.unwrap();

	model.set_creator_liked(true).expect("creator present").await.unwrap();
	assert_eq!(backend.liked_requests(), vec![("brave.com".to_string(), true)]);

	model.refresh_current_creator().await.unwrap();
	assert_eq!(backend.calls("refresh_creator"), 2);
}
