//! Wiring of the rewards store to its backend.

use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use statesync_store::{
	Debouncer, LoadReport, MutationOutcome, OptimisticGuard, Patch, Reconciler, RefreshCooldown, ResolutionPolicy, Selectable, SelectorBinding, Store,
	Subscription, SyncPolicy, TaskContext, TaskError,
};
use statesync_worker::{GenerationToken, TaskClass, spawn};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::backend::{BackendError, RewardsBackend};
use crate::dto;
use crate::state::{AdType, CreatorInfo, RewardsPatch, RewardsState};

/// Backend plus the caches tasks share.
struct Services {
	backend: Arc<dyn RewardsBackend>,
	creators: RefreshCooldown<String, CreatorInfo>,
}

struct ModelInner {
	services: Arc<Services>,
	store: Store<RewardsState>,
	reconciler: Reconciler<RewardsState>,
	guard: OptimisticGuard<RewardsState>,
	push: Debouncer,
	push_listener: Mutex<Option<JoinHandle<()>>>,
}

impl ModelInner {
	fn shutdown(&self) {
		self.push.cancel();
		if let Some(listener) = self.push_listener.lock().take() {
			listener.abort();
		}
		if !self.store.is_torn_down() {
			self.store.teardown();
			tracing::debug!("rewards.shutdown");
		}
	}
}

impl Drop for ModelInner {
	fn drop(&mut self) {
		self.shutdown();
	}
}

/// The rewards panel's data model.
///
/// Clones share one store. The model is torn down by [`RewardsModel::shutdown`]
/// or when the last clone is dropped.
#[derive(Clone)]
pub struct RewardsModel {
	inner: Arc<ModelInner>,
}

impl std::fmt::Debug for RewardsModel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RewardsModel")
			.field("store", &self.inner.store)
			.field("reconciler", &self.inner.reconciler)
			.field("creators", &self.inner.services.creators)
			.finish()
	}
}

impl RewardsModel {
	/// Builds the model and starts listening for backend pushes.
	///
	/// Nothing is loaded until [`RewardsModel::load`] is called.
	pub fn new(backend: Arc<dyn RewardsBackend>, policy: SyncPolicy) -> Self {
		let store = Store::new(RewardsState {
			open_time: now_millis(),
			..RewardsState::default()
		});
		let services = Arc::new(Services {
			backend,
			creators: RefreshCooldown::new(policy.creator_cooldown()),
		});

		let reconciler = Reconciler::builder(&store)
			.policy(policy)
			.on_ready(|state: &mut RewardsState| state.loading = false)
			.on_reopen(|state: &mut RewardsState| state.open_time = now_millis().max(state.open_time + 1))
			.blocking("balance", with_services(&services, load_balance))
			.blocking("parameters", with_services(&services, load_parameters))
			.blocking("external_wallet", with_services(&services, load_external_wallet))
			.blocking("ad_settings", with_services(&services, load_ad_settings))
			.background("current_creator", with_services(&services, load_current_creator))
			.background("ad_history", with_services(&services, load_ad_history))
			.build();

		let push = reconciler.push_notifier();
		let listener = spawn_push_listener(services.backend.as_ref(), push.clone(), store.lifetime());
		let guard = OptimisticGuard::with_error_slot(&store, RewardsState::last_error_field());

		Self {
			inner: Arc::new(ModelInner {
				services,
				store,
				reconciler,
				guard,
				push,
				push_listener: Mutex::new(Some(listener)),
			}),
		}
	}

	pub fn store(&self) -> &Store<RewardsState> {
		&self.inner.store
	}

	pub fn state(&self) -> Arc<RewardsState> {
		self.inner.store.state()
	}

	pub fn subscribe<F>(&self, listener: F) -> Subscription
	where
		F: Fn(&Arc<RewardsState>) + Send + Sync + 'static,
	{
		self.inner.store.subscribe(listener)
	}

	/// Binds a derived slice; `on_change` runs only when it changes.
	pub fn select<T, F, C>(&self, select: F, on_change: C) -> SelectorBinding<T>
	where
		T: Selectable,
		F: Fn(&RewardsState) -> T + Send + Sync + 'static,
		C: Fn(&T) + Send + Sync + 'static,
	{
		SelectorBinding::new(&self.inner.store, select, on_change)
	}

	/// Runs a full load. Resolves once the panel is ready to render.
	pub async fn load(&self) -> LoadReport {
		self.inner.reconciler.load_all().await
	}

	/// Feeds the panel's visibility; a reopen reloads everything.
	pub async fn visibility_changed(&self, visible: bool) -> Option<LoadReport> {
		self.inner.reconciler.visibility_changed(visible).await
	}

	/// Reports a backend change delivered outside the backend's own feed.
	pub fn notify_changed(&self) {
		self.inner.push.trigger();
	}

	/// Re-reads the active tab's creator, reusing a refresh issued within the
	/// cooldown window.
	pub async fn refresh_current_creator(&self) -> Result<Option<CreatorInfo>, BackendError> {
		let creator = fetch_current_creator(&self.inner.services).await?;
		if !self.inner.store.is_torn_down() {
			self.inner.store.update(RewardsPatch {
				current_creator: Some(creator.clone()),
				..RewardsPatch::default()
			});
		}
		Ok(creator)
	}

	/// Toggles an ad type. The switch flips at once and reverts if the
	/// backend refuses.
	pub fn set_ad_type_enabled(&self, ad_type: AdType, enabled: bool) -> JoinHandle<MutationOutcome> {
		let pending = self
			.inner
			.guard
			.begin(&ad_type.enabled_field(), enabled, ResolutionPolicy::VerifyAndReconcile);
		let backend = Arc::clone(&self.inner.services.backend);
		pending.dispatch(async move { backend.set_ad_type_enabled(ad_type, enabled).await })
	}

	/// Likes or unlikes the current creator. Returns `None` when there is no
	/// current creator.
	pub fn set_creator_liked(&self, liked: bool) -> Option<JoinHandle<MutationOutcome>> {
		let id = self.state().current_creator.as_ref()?.id.clone();
		let pending = self
			.inner
			.guard
			.begin(&RewardsState::creator_liked_field(), liked, ResolutionPolicy::FireAndForget);
		self.inner.services.creators.invalidate(&id);
		let backend = Arc::clone(&self.inner.services.backend);
		Some(pending.dispatch(async move { backend.set_creator_liked(&id, liked).await.map(|()| None::<bool>) }))
	}

	/// Tears the store down and stops reacting to backend pushes. In-flight
	/// loads finish without writing.
	pub fn shutdown(&self) {
		self.inner.shutdown();
	}
}

fn now_millis() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| elapsed.as_millis() as u64)
		.unwrap_or_default()
}

fn with_services<F, Fut>(services: &Arc<Services>, run: F) -> impl Fn(TaskContext<RewardsState>) -> Fut + Send + Sync + 'static
where
	F: Fn(Arc<Services>, TaskContext<RewardsState>) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
	let services = Arc::clone(services);
	move |ctx| run(Arc::clone(&services), ctx)
}

/// Applies a blocking task's result. A failure leaves the slice as it was and
/// is surfaced through `last_error`; a later success clears that message.
fn land<T>(ctx: &TaskContext<RewardsState>, result: Result<T, BackendError>, patch: impl FnOnce(T) -> RewardsPatch) -> Result<(), TaskError> {
	let prefix = format!("{}: ", ctx.task_name());
	match result {
		Ok(value) => {
			let patch = patch(value);
			ctx.apply(move |state: &mut RewardsState| {
				patch.apply(state);
				if state.last_error.as_deref().is_some_and(|error| error.starts_with(&prefix)) {
					state.last_error = None;
				}
			});
			Ok(())
		}
		Err(err) => {
			ctx.apply(RewardsPatch {
				last_error: Some(Some(format!("{prefix}{err}"))),
				..RewardsPatch::default()
			});
			Err(err.into())
		}
	}
}

/// Applies a background task's result. Failures only reach the log, through
/// the reconciler's retry handling.
fn land_quietly<T>(ctx: &TaskContext<RewardsState>, result: Result<T, BackendError>, patch: impl FnOnce(T) -> RewardsPatch) -> Result<(), TaskError> {
	let value = result?;
	ctx.apply(patch(value));
	Ok(())
}

async fn load_balance(services: Arc<Services>, ctx: TaskContext<RewardsState>) -> Result<(), TaskError> {
	let result = services.backend.balance().await.and_then(dto::balance);
	land(&ctx, result, |balance| RewardsPatch {
		balance: Some(Some(balance)),
		..RewardsPatch::default()
	})
}

async fn load_parameters(services: Arc<Services>, ctx: TaskContext<RewardsState>) -> Result<(), TaskError> {
	let result = services.backend.parameters().await.and_then(dto::parameters);
	land(&ctx, result, |parameters| RewardsPatch {
		parameters: Some(Some(parameters)),
		..RewardsPatch::default()
	})
}

async fn load_external_wallet(services: Arc<Services>, ctx: TaskContext<RewardsState>) -> Result<(), TaskError> {
	let result = services.backend.external_wallet().await.and_then(dto::external_wallet);
	land(&ctx, result, |wallet| RewardsPatch {
		external_wallet: Some(wallet),
		..RewardsPatch::default()
	})
}

async fn load_ad_settings(services: Arc<Services>, ctx: TaskContext<RewardsState>) -> Result<(), TaskError> {
	let result = services.backend.ad_settings().await.and_then(dto::ad_settings);
	land(&ctx, result, |ad_types| RewardsPatch {
		ad_types: Some(ad_types),
		..RewardsPatch::default()
	})
}

async fn load_current_creator(services: Arc<Services>, ctx: TaskContext<RewardsState>) -> Result<(), TaskError> {
	let result = fetch_current_creator(&services).await;
	land_quietly(&ctx, result, |creator| RewardsPatch {
		current_creator: Some(creator),
		..RewardsPatch::default()
	})
}

async fn load_ad_history(services: Arc<Services>, ctx: TaskContext<RewardsState>) -> Result<(), TaskError> {
	let result = services.backend.ad_history().await.and_then(dto::ad_history);
	land_quietly(&ctx, result, |days| RewardsPatch {
		ad_history: Some(Arc::new(days)),
		..RewardsPatch::default()
	})
}

async fn fetch_current_creator(services: &Services) -> Result<Option<CreatorInfo>, BackendError> {
	let Some(id) = dto::creator_id(services.backend.current_creator().await?)? else {
		return Ok(None);
	};
	let backend = &services.backend;
	let key = id.as_str();
	let creator = services
		.creators
		.get_or_refresh(id.clone(), move || async move {
			let raw = backend.refresh_creator(key).await?;
			dto::creator(raw)
		})
		.await?;
	Ok(Some(creator))
}

fn spawn_push_listener(backend: &dyn RewardsBackend, push: Debouncer, lifetime: GenerationToken) -> JoinHandle<()> {
	let mut changes = backend.subscribe_changes();
	spawn(TaskClass::Background, async move {
		loop {
			tokio::select! {
				_ = lifetime.cancelled() => break,
				received = changes.recv() => match received {
					Ok(()) => push.trigger(),
					Err(RecvError::Lagged(skipped)) => {
						tracing::debug!(skipped, "rewards.push.lagged");
						push.trigger();
					}
					Err(RecvError::Closed) => break,
				},
			}
		}
		tracing::debug!("rewards.push.closed");
	})
}
