//! Keeps a [`Store`] aligned with an asynchronous backend.
//!
//! Refresh tasks are registered by name as either blocking or background.
//! [`Reconciler::load_all`] awaits every blocking task, then applies the ready
//! patch; background tasks are spawned detached and land whenever they land.
//! Every task writes through a [`TaskContext`], which drops results that
//! arrive after the store was torn down.

mod cooldown;
mod visibility;

pub use cooldown::RefreshCooldown;
pub use visibility::{Redisplay, VisibilityTracker};

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use statesync_worker::{GenerationToken, TaskClass, WorkerJoinSet, join_error_panic_message, panic_payload_message, spawn};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::debounce::Debouncer;
use crate::error::TaskError;
use crate::policy::SyncPolicy;
use crate::store::{Patch, Store};

/// Whether readiness waits for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
	/// Awaited by [`Reconciler::load_all`] before the ready patch.
	Blocking,
	/// Spawned detached; never delays readiness.
	Background,
}

impl TaskKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Blocking => "blocking",
			Self::Background => "background",
		}
	}
}

/// Retry schedule for background tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Extra attempts after the first failure.
	pub attempts: u32,
	/// Delay before each extra attempt.
	pub delay: Duration,
}

impl RetryPolicy {
	pub const NONE: Self = Self {
		attempts: 0,
		delay: Duration::ZERO,
	};
}

impl Default for RetryPolicy {
	fn default() -> Self {
		SyncPolicy::default().background_retry()
	}
}

/// Handle passed to each task run.
pub struct TaskContext<S> {
	store: Store<S>,
	lifetime: GenerationToken,
	task: &'static str,
}

impl<S: Clone + Send + Sync + 'static> TaskContext<S> {
	/// Current snapshot.
	pub fn state(&self) -> Arc<S> {
		self.store.state()
	}

	/// Applies `patch` unless the store was torn down since this run started.
	///
	/// Returns whether the patch was applied.
	pub fn apply(&self, patch: impl Patch<S>) -> bool {
		if self.lifetime.is_cancelled() {
			tracing::debug!(task = self.task, generation = self.lifetime.generation(), "reconcile.apply.stale");
			return false;
		}
		self.store.update(patch);
		true
	}

	pub fn is_stale(&self) -> bool {
		self.lifetime.is_cancelled()
	}

	pub fn task_name(&self) -> &'static str {
		self.task
	}

	/// Lifetime token of this run, for tasks that select on cancellation.
	pub fn lifetime(&self) -> &GenerationToken {
		&self.lifetime
	}
}

type TaskFn<S> = Arc<dyn Fn(TaskContext<S>) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;
type StatePatchFn<S> = Arc<dyn Fn(&mut S) + Send + Sync>;

struct RefreshTask<S> {
	name: &'static str,
	kind: TaskKind,
	retry: RetryPolicy,
	run: TaskFn<S>,
}

impl<S> Clone for RefreshTask<S> {
	fn clone(&self) -> Self {
		Self {
			name: self.name,
			kind: self.kind,
			retry: self.retry,
			run: Arc::clone(&self.run),
		}
	}
}

fn boxed_task<S, F, Fut>(task: F) -> TaskFn<S>
where
	F: Fn(TaskContext<S>) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
	Arc::new(move |ctx| task(ctx).boxed())
}

/// Outcome of one [`Reconciler::load_all`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
	/// Pass number, starting at 1.
	pub pass: u64,
	/// Blocking tasks that finished cleanly, in registration order.
	pub succeeded: Vec<&'static str>,
	/// Blocking tasks that errored or panicked, in registration order.
	pub failed: Vec<(&'static str, TaskError)>,
	/// Background tasks spawned by this pass.
	pub background_spawned: usize,
	/// Whether the ready patch was applied.
	pub ready: bool,
}

impl LoadReport {
	pub fn is_clean(&self) -> bool {
		self.failed.is_empty()
	}
}

/// Builder for [`Reconciler`].
pub struct ReconcilerBuilder<S> {
	store: Store<S>,
	policy: SyncPolicy,
	tasks: Vec<RefreshTask<S>>,
	ready: Option<StatePatchFn<S>>,
	reopen: Option<StatePatchFn<S>>,
}

impl<S: Clone + Send + Sync + 'static> ReconcilerBuilder<S> {
	pub fn policy(mut self, policy: SyncPolicy) -> Self {
		self.policy = policy;
		self
	}

	/// Patch applied after every blocking task of a pass has settled.
	pub fn on_ready(mut self, patch: impl Fn(&mut S) + Send + Sync + 'static) -> Self {
		self.ready = Some(Arc::new(patch));
		self
	}

	/// Patch applied when the surface is redisplayed after a long hide.
	pub fn on_reopen(mut self, patch: impl Fn(&mut S) + Send + Sync + 'static) -> Self {
		self.reopen = Some(Arc::new(patch));
		self
	}

	pub fn blocking<F, Fut>(mut self, name: &'static str, task: F) -> Self
	where
		F: Fn(TaskContext<S>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
	{
		self.tasks.push(RefreshTask {
			name,
			kind: TaskKind::Blocking,
			retry: RetryPolicy::NONE,
			run: boxed_task(task),
		});
		self
	}

	/// Registers a background task retried per the builder's policy.
	pub fn background<F, Fut>(self, name: &'static str, task: F) -> Self
	where
		F: Fn(TaskContext<S>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
	{
		let retry = self.policy.background_retry();
		self.background_with_retry(name, retry, task)
	}

	pub fn background_with_retry<F, Fut>(mut self, name: &'static str, retry: RetryPolicy, task: F) -> Self
	where
		F: Fn(TaskContext<S>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
	{
		self.tasks.push(RefreshTask {
			name,
			kind: TaskKind::Background,
			retry,
			run: boxed_task(task),
		});
		self
	}

	pub fn build(self) -> Reconciler<S> {
		let threshold = self.policy.visibility_threshold();
		tracing::debug!(tasks = self.tasks.len(), "reconcile.built");
		Reconciler {
			inner: Arc::new(ReconcilerInner {
				store: self.store,
				policy: self.policy,
				tasks: self.tasks,
				ready: self.ready,
				reopen: self.reopen,
				visibility: Mutex::new(VisibilityTracker::new(threshold)),
				passes: AtomicU64::new(0),
			}),
		}
	}
}

struct ReconcilerInner<S> {
	store: Store<S>,
	policy: SyncPolicy,
	tasks: Vec<RefreshTask<S>>,
	ready: Option<StatePatchFn<S>>,
	reopen: Option<StatePatchFn<S>>,
	visibility: Mutex<VisibilityTracker>,
	passes: AtomicU64,
}

/// Registry of refresh tasks bound to one store.
///
/// Clones share the registry.
pub struct Reconciler<S> {
	inner: Arc<ReconcilerInner<S>>,
}

impl<S> Clone for Reconciler<S> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<S> std::fmt::Debug for Reconciler<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Reconciler")
			.field("tasks", &self.inner.tasks.iter().map(|t| (t.name, t.kind.as_str())).collect::<Vec<_>>())
			.field("passes", &self.inner.passes.load(Ordering::Acquire))
			.field("visible", &self.inner.visibility.lock().is_visible())
			.finish()
	}
}

impl<S: Clone + Send + Sync + 'static> Reconciler<S> {
	pub fn builder(store: &Store<S>) -> ReconcilerBuilder<S> {
		ReconcilerBuilder {
			store: store.clone(),
			policy: SyncPolicy::default(),
			tasks: Vec::new(),
			ready: None,
			reopen: None,
		}
	}

	pub fn store(&self) -> &Store<S> {
		&self.inner.store
	}

	pub fn policy(&self) -> &SyncPolicy {
		&self.inner.policy
	}

	/// Registered task names with their kind, in registration order.
	pub fn tasks(&self) -> Vec<(&'static str, TaskKind)> {
		self.inner.tasks.iter().map(|t| (t.name, t.kind)).collect()
	}

	/// Runs one full reconciliation pass.
	///
	/// Resolves once every blocking task settled and the ready patch was
	/// applied. Background tasks keep running afterwards.
	pub async fn load_all(&self) -> LoadReport {
		let pass = self.inner.passes.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
		let tasks: Vec<RefreshTask<S>> = self.inner.tasks.clone();
		let lifetime = self.inner.store.lifetime();
		tracing::debug!(pass, tasks = tasks.len(), generation = lifetime.generation(), "reconcile.load_all");

		let mut report = LoadReport {
			pass,
			..LoadReport::default()
		};
		let mut blocking = WorkerJoinSet::new(TaskClass::Interactive);
		for (index, task) in tasks.into_iter().enumerate() {
			match task.kind {
				TaskKind::Blocking => {
					let ctx = self.context(task.name, &lifetime);
					blocking.spawn(async move {
						let result = run_guarded(&task, ctx).await;
						(index, task.name, result)
					});
				}
				TaskKind::Background => {
					self.spawn_background(task, lifetime.clone());
					report.background_spawned += 1;
				}
			}
		}

		let mut settled = Vec::with_capacity(blocking.len());
		for joined in blocking.join_all().await {
			match joined {
				Ok(entry) => settled.push(entry),
				Err(err) => match join_error_panic_message(err) {
					Some(panic) => tracing::error!(pass, panic = %panic, "reconcile.task.join_failed"),
					None => tracing::debug!(pass, "reconcile.task.aborted"),
				},
			}
		}
		settled.sort_by_key(|(index, _, _)| *index);
		for (_, name, result) in settled {
			match result {
				Ok(()) => report.succeeded.push(name),
				Err(err) => {
					tracing::warn!(pass, task = name, error = %err, "reconcile.task.failed");
					report.failed.push((name, err));
				}
			}
		}

		if lifetime.is_cancelled() {
			tracing::debug!(pass, "reconcile.ready.skipped");
		} else {
			if let Some(ready) = &self.inner.ready {
				let ready = Arc::clone(ready);
				self.inner.store.update(move |state: &mut S| ready(state));
			}
			report.ready = true;
			tracing::debug!(
				pass,
				succeeded = report.succeeded.len(),
				failed = report.failed.len(),
				background = report.background_spawned,
				"reconcile.ready"
			);
		}
		report
	}

	/// Runs the named task once, outside any pass.
	///
	/// Returns `None` when no task carries that name.
	pub async fn refresh(&self, name: &str) -> Option<Result<(), TaskError>> {
		let task = self.inner.tasks.iter().find(|t| t.name == name).cloned()?;
		let lifetime = self.inner.store.lifetime();
		let ctx = self.context(task.name, &lifetime);
		let result = run_guarded(&task, ctx).await;
		if let Err(err) = &result {
			tracing::warn!(task = task.name, error = %err, "reconcile.refresh.failed");
		}
		Some(result)
	}

	/// Debouncer that reloads everything after a burst of backend pushes.
	///
	/// Pushes landing while the surface is hidden are remembered; the next
	/// redisplay reloads even if the hide was short.
	pub fn push_notifier(&self) -> Debouncer {
		let weak = Arc::downgrade(&self.inner);
		Debouncer::new(self.inner.policy.push_debounce(), move || {
			let weak = weak.clone();
			async move {
				let Some(inner) = weak.upgrade() else {
					return;
				};
				let reconciler = Reconciler { inner };
				if reconciler.inner.store.is_torn_down() {
					return;
				}
				{
					let mut visibility = reconciler.inner.visibility.lock();
					if !visibility.is_visible() {
						visibility.note_missed_push();
						tracing::debug!("reconcile.push.deferred");
						return;
					}
				}
				reconciler.load_all().await;
			}
		})
	}

	/// Feeds a visibility change of the surface.
	///
	/// Returns the report of the reload it triggered, if any.
	pub async fn visibility_changed(&self, visible: bool) -> Option<LoadReport> {
		let now = Instant::now();
		let redisplay = {
			let mut visibility = self.inner.visibility.lock();
			if visible {
				visibility.shown(now)
			} else {
				visibility.hidden(now);
				tracing::trace!("reconcile.visibility.hidden");
				return None;
			}
		};
		match redisplay {
			Redisplay::Ignored => {
				tracing::trace!("reconcile.visibility.shown");
				None
			}
			Redisplay::Stale => {
				tracing::debug!("reconcile.visibility.stale");
				Some(self.load_all().await)
			}
			Redisplay::Reopened => {
				tracing::debug!("reconcile.visibility.reopened");
				if let Some(reopen) = &self.inner.reopen {
					let reopen = Arc::clone(reopen);
					self.inner.store.update(move |state: &mut S| reopen(state));
				}
				Some(self.load_all().await)
			}
		}
	}

	pub fn is_visible(&self) -> bool {
		self.inner.visibility.lock().is_visible()
	}

	fn context(&self, task: &'static str, lifetime: &GenerationToken) -> TaskContext<S> {
		TaskContext {
			store: self.inner.store.clone(),
			lifetime: lifetime.clone(),
			task,
		}
	}

	fn spawn_background(&self, task: RefreshTask<S>, lifetime: GenerationToken) -> JoinHandle<()> {
		let store = self.inner.store.clone();
		spawn(TaskClass::Background, async move {
			let mut attempt: u32 = 0;
			loop {
				let ctx = TaskContext {
					store: store.clone(),
					lifetime: lifetime.clone(),
					task: task.name,
				};
				match run_guarded(&task, ctx).await {
					Ok(()) => {
						tracing::trace!(task = task.name, attempt, "reconcile.background.done");
						return;
					}
					Err(TaskError::Cancelled) => return,
					Err(err) if attempt >= task.retry.attempts => {
						tracing::warn!(task = task.name, attempts = attempt + 1, error = %err, "reconcile.background.gave_up");
						return;
					}
					Err(err) => {
						attempt += 1;
						tracing::debug!(
							task = task.name,
							attempt,
							delay_ms = task.retry.delay.as_millis() as u64,
							error = %err,
							"reconcile.background.retry"
						);
						tokio::select! {
							_ = lifetime.cancelled() => return,
							_ = tokio::time::sleep(task.retry.delay) => {}
						}
					}
				}
			}
		})
	}
}

/// Runs one task attempt, turning panics and teardown into errors.
async fn run_guarded<S>(task: &RefreshTask<S>, ctx: TaskContext<S>) -> Result<(), TaskError> {
	let lifetime = ctx.lifetime.clone();
	let run = Arc::clone(&task.run);
	let attempt = AssertUnwindSafe(async move { run(ctx).await }).catch_unwind();
	tokio::select! {
		biased;
		_ = lifetime.cancelled() => Err(TaskError::Cancelled),
		result = attempt => match result {
			Ok(result) => result,
			Err(payload) => Err(TaskError::Panicked(panic_payload_message(payload.as_ref()))),
		},
	}
}
