//! Optimistic field edits with rollback.
//!
//! [`OptimisticGuard::begin`] writes the new value into the store at once and
//! remembers the previous one. The returned [`PendingMutation`] is consumed by
//! exactly one resolution: confirm, normalize or revert. Only the latest
//! mutation of a field may write when it resolves; an older one that was
//! superseded resolves without touching state.


use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use statesync_worker::{TaskClass, spawn};
use tokio::task::JoinHandle;

use crate::error::MutationError;
use crate::store::Store;

type Getter<S, V> = Arc<dyn Fn(&S) -> V + Send + Sync>;
type Setter<S, V> = Arc<dyn Fn(&mut S, V) + Send + Sync>;

/// Named accessor pair for one mutable slice of `S`.
pub struct Field<S, V> {
	name: &'static str,
	get: Getter<S, V>,
	set: Setter<S, V>,
}

impl<S, V> Field<S, V> {
	/// `get` and `set` run inside store updates; they may read the store's
	/// current snapshot but must not update it.
	pub fn new(name: &'static str, get: impl Fn(&S) -> V + Send + Sync + 'static, set: impl Fn(&mut S, V) + Send + Sync + 'static) -> Self {
		Self {
			name,
			get: Arc::new(get),
			set: Arc::new(set),
		}
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn get(&self, state: &S) -> V {
		(self.get)(state)
	}

	pub fn set(&self, state: &mut S, value: V) {
		(self.set)(state, value)
	}
}

impl<S, V> Clone for Field<S, V> {
	fn clone(&self) -> Self {
		Self {
			name: self.name,
			get: Arc::clone(&self.get),
			set: Arc::clone(&self.set),
		}
	}
}

impl<S, V> std::fmt::Debug for Field<S, V> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_tuple("Field").field(&self.name).finish()
	}
}

/// How the backend's answer feeds back into local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPolicy {
	/// The local value stands; backend failures are only logged.
	FireAndForget,
	/// The backend answer is authoritative: normalize on success, revert on failure.
	VerifyAndReconcile,
}

/// Lifecycle of a field edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
	Idle,
	Applied,
	Confirmed,
	Reverted,
}

/// Terminal result of a [`PendingMutation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
	/// The edit stands. `normalized` is set when the backend's value replaced it.
	Confirmed { normalized: bool },
	/// The backend failed. `restored` is false when a newer edit of the same
	/// field superseded this one, in which case nothing was written.
	Reverted { error: MutationError, restored: bool },
}

impl MutationOutcome {
	pub fn state(&self) -> MutationState {
		match self {
			Self::Confirmed { .. } => MutationState::Confirmed,
			Self::Reverted { .. } => MutationState::Reverted,
		}
	}

	pub fn is_confirmed(&self) -> bool {
		matches!(self, Self::Confirmed { .. })
	}
}

struct GuardInner<S> {
	store: Store<S>,
	latest: Mutex<HashMap<&'static str, u64>>,
	seq: AtomicU64,
	error_slot: Option<Field<S, Option<String>>>,
}

/// Issues optimistic edits against one store.
pub struct OptimisticGuard<S> {
	inner: Arc<GuardInner<S>>,
}

impl<S> Clone for OptimisticGuard<S> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<S> std::fmt::Debug for OptimisticGuard<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OptimisticGuard")
			.field("in_flight", &self.inner.latest.lock().len())
			.field("error_slot", &self.inner.error_slot.as_ref().map(Field::name))
			.finish()
	}
}

impl<S: Clone + Send + Sync + 'static> OptimisticGuard<S> {
	pub fn new(store: &Store<S>) -> Self {
		Self::build(store, None)
	}

	/// Guard that writes verify failures into `slot` and clears it on success.
	pub fn with_error_slot(store: &Store<S>, slot: Field<S, Option<String>>) -> Self {
		Self::build(store, Some(slot))
	}

	fn build(store: &Store<S>, error_slot: Option<Field<S, Option<String>>>) -> Self {
		Self {
			inner: Arc::new(GuardInner {
				store: store.clone(),
				latest: Mutex::new(HashMap::new()),
				seq: AtomicU64::new(0),
				error_slot,
			}),
		}
	}

	/// Applies `value` to `field` immediately and records the previous value.
	pub fn begin<V>(&self, field: &Field<S, V>, value: V, policy: ResolutionPolicy) -> PendingMutation<S, V>
	where
		V: Clone + Send + Sync + 'static,
	{
		let seq = self.inner.seq.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
		let mut baseline = None;
		self.inner.store.update(|state: &mut S| {
			baseline = Some(field.get(state));
			field.set(state, value);
			if let Some(superseded) = self.inner.latest.lock().insert(field.name, seq) {
				tracing::debug!(field = field.name, superseded, seq, "optimistic.superseded");
			}
		});
		tracing::trace!(field = field.name, seq, ?policy, "optimistic.applied");
		PendingMutation {
			guard: Arc::clone(&self.inner),
			field: field.clone(),
			seq,
			baseline,
			policy,
			resolved: false,
		}
	}

	/// [`MutationState::Applied`] while an edit of `field` is unresolved.
	pub fn state_of(&self, field: &str) -> MutationState {
		if self.inner.latest.lock().contains_key(field) {
			MutationState::Applied
		} else {
			MutationState::Idle
		}
	}
}

/// An applied but unresolved edit.
///
/// Dropping it unresolved keeps the local value, as if confirmed.
#[must_use = "a pending mutation must be resolved"]
pub struct PendingMutation<S, V> {
	guard: Arc<GuardInner<S>>,
	field: Field<S, V>,
	seq: u64,
	baseline: Option<V>,
	policy: ResolutionPolicy,
	resolved: bool,
}

impl<S, V> PendingMutation<S, V>
where
	S: Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	pub fn state(&self) -> MutationState {
		MutationState::Applied
	}

	pub fn policy(&self) -> ResolutionPolicy {
		self.policy
	}

	/// Value the field held before this edit.
	pub fn baseline(&self) -> Option<&V> {
		self.baseline.as_ref()
	}

	/// Returns false once a newer edit of the same field began.
	pub fn is_current(&self) -> bool {
		self.guard.latest.lock().get(self.field.name) == Some(&self.seq)
	}

	/// Keeps the local value.
	pub fn confirm(mut self) -> MutationOutcome {
		self.resolved = true;
		self.release();
		tracing::trace!(field = self.field.name, seq = self.seq, "optimistic.confirmed");
		MutationOutcome::Confirmed { normalized: false }
	}

	/// Resolves with the backend's answer.
	///
	/// `Ok(None)` keeps the local value and `Ok(Some(v))` replaces it with the
	/// backend's normalized value. Under [`ResolutionPolicy::FireAndForget`]
	/// errors are logged and the local value stands.
	pub fn resolve<E: Display>(mut self, result: Result<Option<V>, E>) -> MutationOutcome {
		self.resolved = true;
		let name = self.field.name;
		match (self.policy, result) {
			(ResolutionPolicy::FireAndForget, result) => {
				if let Err(err) = result {
					tracing::warn!(field = name, seq = self.seq, error = %err, "optimistic.dispatch.failed");
				}
				self.release();
				MutationOutcome::Confirmed { normalized: false }
			}
			(ResolutionPolicy::VerifyAndReconcile, Ok(None)) => {
				let slot = self.guard.error_slot.clone();
				self.write_if_current(move |state: &mut S| match slot {
					Some(slot) if slot.get(state).is_some() => {
						slot.set(state, None);
						true
					}
					_ => false,
				});
				MutationOutcome::Confirmed { normalized: false }
			}
			(ResolutionPolicy::VerifyAndReconcile, Ok(Some(value))) => {
				let field = self.field.clone();
				let slot = self.guard.error_slot.clone();
				let normalized = self.write_if_current(move |state: &mut S| {
					field.set(state, value);
					if let Some(slot) = slot {
						slot.set(state, None);
					}
					true
				});
				tracing::trace!(field = name, seq = self.seq, normalized, "optimistic.normalized");
				MutationOutcome::Confirmed { normalized }
			}
			(ResolutionPolicy::VerifyAndReconcile, Err(err)) => {
				let error = MutationError::Backend {
					field: name,
					message: err.to_string(),
				};
				let field = self.field.clone();
				let slot = self.guard.error_slot.clone();
				let baseline = self.baseline.clone();
				let message = error.to_string();
				let restored = self.write_if_current(move |state: &mut S| {
					if let Some(baseline) = baseline {
						field.set(state, baseline);
					}
					if let Some(slot) = slot {
						slot.set(state, Some(message));
					}
					true
				});
				tracing::warn!(field = name, seq = self.seq, restored, error = %err, "optimistic.reverted");
				MutationOutcome::Reverted { error, restored }
			}
		}
	}

	/// Awaits the authoritative call and resolves with its answer.
	pub async fn settle<F, E>(self, call: F) -> MutationOutcome
	where
		F: Future<Output = Result<Option<V>, E>>,
		E: Display,
	{
		let result = call.await;
		self.resolve(result)
	}

	/// [`PendingMutation::settle`] on a spawned task.
	pub fn settle_detached<F, E>(self, call: F) -> JoinHandle<MutationOutcome>
	where
		F: Future<Output = Result<Option<V>, E>> + Send + 'static,
		E: Display + Send + 'static,
	{
		spawn(TaskClass::Interactive, self.settle(call))
	}

	/// Sends the backend call without waiting on it.
	///
	/// Under [`ResolutionPolicy::FireAndForget`] the edit is confirmed before
	/// the call runs; otherwise this is [`PendingMutation::settle_detached`].
	pub fn dispatch<F, E>(self, call: F) -> JoinHandle<MutationOutcome>
	where
		F: Future<Output = Result<Option<V>, E>> + Send + 'static,
		E: Display + Send + 'static,
	{
		match self.policy {
			ResolutionPolicy::FireAndForget => {
				let name = self.field.name;
				let seq = self.seq;
				let outcome = self.confirm();
				spawn(TaskClass::Background, async move {
					if let Err(err) = call.await {
						tracing::warn!(field = name, seq, error = %err, "optimistic.dispatch.failed");
					}
					outcome
				})
			}
			ResolutionPolicy::VerifyAndReconcile => self.settle_detached(call),
		}
	}
}

impl<S, V> PendingMutation<S, V> {
	/// Forgets this edit if it is still the latest for its field.
	fn release(&self) {
		let mut latest = self.guard.latest.lock();
		if latest.get(self.field.name) == Some(&self.seq) {
			latest.remove(self.field.name);
		}
	}
}

impl<S: Clone + Send + Sync + 'static, V> PendingMutation<S, V> {
	/// Runs `write` only while this edit is still the latest for its field,
	/// atomically with the check. Returns whether state changed.
	fn write_if_current(&self, write: impl FnOnce(&mut S) -> bool) -> bool {
		let latest = &self.guard.latest;
		let name = self.field.name;
		let seq = self.seq;
		let mut current = false;
		let written = self.guard.store.update_if(|state: &mut S| {
			let mut latest = latest.lock();
			if latest.get(name) != Some(&seq) {
				return false;
			}
			latest.remove(name);
			drop(latest);
			current = true;
			write(state)
		});
		if !current {
			tracing::debug!(field = name, seq, "optimistic.resolve.superseded");
		}
		written && current
	}
}

impl<S, V> Drop for PendingMutation<S, V> {
	fn drop(&mut self) {
		if !self.resolved {
			self.release();
			tracing::debug!(field = self.field.name, seq = self.seq, "optimistic.abandoned");
		}
	}
}
