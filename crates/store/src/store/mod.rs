//! The snapshot store and its subscriber fan-out.
//!
//! # Invariants
//!
//! 1. Exactly one live snapshot per store; `update` swaps in a new `Arc`,
//!    previously handed-out snapshots are never written.
//! 2. Merge is shallow: a patch replaces whole top-level fields.
//! 3. Listeners run synchronously after the swap, in registration order, each
//!    receiving the same `Arc`.
//! 4. A listener registered during a notification pass misses that pass; a
//!    listener unsubscribed during a pass receives nothing further from it.
//! 5. A panicking listener is logged and skipped; delivery continues.
//! 6. A listener that updates the store from inside a pass starts a nested
//!    pass with the newer snapshot; the outer pass stops there, so no listener
//!    is handed a snapshot older than one it already saw.


use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use statesync_worker::{GenerationClock, GenerationToken, panic_payload_message};

static STORE_GENERATIONS: LazyLock<GenerationClock> = LazyLock::new(GenerationClock::new);

/// A change applied to a copy of the current snapshot.
///
/// Closures over `&mut S` are patches, as are domain "partial state" structs
/// whose `Some` fields replace the matching snapshot field.
///
/// A patch runs without the snapshot lock held and may read
/// [`Store::state`]. It must not update the store it is applied to.
pub trait Patch<S> {
	fn apply(self, state: &mut S);
}

impl<S, F> Patch<S> for F
where
	F: FnOnce(&mut S),
{
	fn apply(self, state: &mut S) {
		self(state)
	}
}

type Listener<S> = Arc<dyn Fn(&Arc<S>) + Send + Sync>;

struct ListenerEntry<S> {
	id: u64,
	active: Arc<AtomicBool>,
	callback: Listener<S>,
}

impl<S> Clone for ListenerEntry<S> {
	fn clone(&self) -> Self {
		Self {
			id: self.id,
			active: Arc::clone(&self.active),
			callback: Arc::clone(&self.callback),
		}
	}
}

trait ListenerRegistry: Send + Sync {
	fn remove(&self, id: u64);
}

struct StoreInner<S> {
	snapshot: Mutex<Arc<S>>,
	listeners: Mutex<Vec<ListenerEntry<S>>>,
	/// Serializes swap + notify so listeners see updates in call order.
	/// Re-entrant so listeners may update the store they observe.
	notify_gate: ReentrantMutex<()>,
	next_listener: AtomicU64,
	version: AtomicU64,
	lifetime: GenerationToken,
}

impl<S: Send + Sync> ListenerRegistry for StoreInner<S> {
	fn remove(&self, id: u64) {
		// The callback may own other subscriptions; drop it outside the lock.
		let removed = {
			let mut listeners = self.listeners.lock();
			listeners.iter().position(|entry| entry.id == id).map(|idx| listeners.remove(idx))
		};
		drop(removed);
	}
}

/// Handle to one reactive state store.
///
/// Clones share the same snapshot and listeners. Construct one per UI
/// surface and pass it to whatever needs it; call [`Store::teardown`] when the
/// surface closes.
pub struct Store<S> {
	inner: Arc<StoreInner<S>>,
}

impl<S> Clone for Store<S> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<S> std::fmt::Debug for Store<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Store")
			.field("generation", &self.inner.lifetime.generation())
			.field("version", &self.inner.version.load(Ordering::Acquire))
			.field("listeners", &self.inner.listeners.lock().len())
			.field("torn_down", &self.inner.lifetime.is_cancelled())
			.finish()
	}
}

impl<S: Default + Clone + Send + Sync + 'static> Default for Store<S> {
	fn default() -> Self {
		Self::new(S::default())
	}
}

impl<S: Clone + Send + Sync + 'static> Store<S> {
	/// Creates a store holding `initial` as its first snapshot.
	pub fn new(initial: S) -> Self {
		let generation = STORE_GENERATIONS.next();
		tracing::debug!(generation, "store.created");
		Self {
			inner: Arc::new(StoreInner {
				snapshot: Mutex::new(Arc::new(initial)),
				listeners: Mutex::new(Vec::new()),
				notify_gate: ReentrantMutex::new(()),
				next_listener: AtomicU64::new(0),
				version: AtomicU64::new(0),
				lifetime: GenerationToken::fresh(generation),
			}),
		}
	}

	/// Returns the current snapshot.
	pub fn state(&self) -> Arc<S> {
		Arc::clone(&self.inner.snapshot.lock())
	}

	/// Applies `patch` to a copy of the current snapshot, swaps it in and
	/// notifies listeners.
	pub fn update(&self, patch: impl Patch<S>) {
		self.update_if(|state: &mut S| {
			patch.apply(state);
			true
		});
	}

	/// Like [`Store::update`], but keeps the current snapshot and notifies
	/// nobody when `patch` returns false.
	///
	/// Writers are serialized by the notification gate, so a check inside
	/// `patch` and the write it guards happen atomically with respect to other
	/// updates. `patch` runs on a draft outside the snapshot lock.
	pub fn update_if(&self, patch: impl FnOnce(&mut S) -> bool) -> bool {
		let _gate = self.inner.notify_gate.lock();
		let base = self.inner.version.load(Ordering::Acquire);
		let mut draft = S::clone(&self.state());
		if !patch(&mut draft) {
			return false;
		}
		let next = Arc::new(draft);
		*self.inner.snapshot.lock() = Arc::clone(&next);
		let version = self.inner.version.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
		if version != base.wrapping_add(1) {
			tracing::warn!(base, version, "store.update.nested_in_patch");
		}
		self.notify(&next, version);
		true
	}

	/// Computes a patch from the current snapshot and applies it.
	pub fn update_with<P, F>(&self, make: F)
	where
		P: Patch<S>,
		F: FnOnce(&S) -> P,
	{
		self.update(|state: &mut S| {
			let patch = make(&*state);
			patch.apply(state);
		});
	}

	/// Registers `listener` for every subsequent update.
	///
	/// After [`Store::teardown`] the returned subscription is inert.
	pub fn subscribe<F>(&self, listener: F) -> Subscription
	where
		F: Fn(&Arc<S>) + Send + Sync + 'static,
	{
		let id = self.inner.next_listener.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
		let active = Arc::new(AtomicBool::new(false));
		if !self.inner.lifetime.is_cancelled() {
			active.store(true, Ordering::Release);
			self.inner.listeners.lock().push(ListenerEntry {
				id,
				active: Arc::clone(&active),
				callback: Arc::new(listener),
			});
		}
		let inner: Weak<StoreInner<S>> = Arc::downgrade(&self.inner);
		let registry: Weak<dyn ListenerRegistry> = inner;
		Subscription {
			id,
			active,
			registry,
			keep: false,
		}
	}

	/// Number of currently registered listeners.
	pub fn listener_count(&self) -> usize {
		self.inner.listeners.lock().len()
	}

	/// Number of updates applied since construction.
	pub fn version(&self) -> u64 {
		self.inner.version.load(Ordering::Acquire)
	}

	/// Token cancelled by [`Store::teardown`].
	///
	/// Async work clones it before suspending and drops its result if the
	/// token was cancelled in the meantime.
	pub fn lifetime(&self) -> GenerationToken {
		self.inner.lifetime.child()
	}

	/// Returns true once [`Store::teardown`] ran.
	pub fn is_torn_down(&self) -> bool {
		self.inner.lifetime.is_cancelled()
	}

	/// Drops every listener and cancels the store lifetime.
	///
	/// The snapshot stays readable and writable; updates simply reach nobody.
	pub fn teardown(&self) {
		let _gate = self.inner.notify_gate.lock();
		self.inner.lifetime.cancel();
		let listeners = std::mem::take(&mut *self.inner.listeners.lock());
		for entry in &listeners {
			entry.active.store(false, Ordering::Release);
		}
		tracing::debug!(
			generation = self.inner.lifetime.generation(),
			dropped_listeners = listeners.len(),
			"store.teardown"
		);
	}

	fn notify(&self, snapshot: &Arc<S>, version: u64) {
		let pass: Vec<ListenerEntry<S>> = self.inner.listeners.lock().clone();
		tracing::trace!(listeners = pass.len(), version, "store.notify");
		for entry in pass {
			if self.inner.version.load(Ordering::Acquire) != version {
				tracing::trace!(version, "store.notify.superseded");
				break;
			}
			if !entry.active.load(Ordering::Acquire) {
				continue;
			}
			let callback = &entry.callback;
			if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(snapshot))) {
				tracing::error!(
					listener = entry.id,
					version,
					panic = %panic_payload_message(payload.as_ref()),
					"store.listener.panicked"
				);
			}
		}
	}
}

/// Registration handle returned by [`Store::subscribe`].
///
/// Dropping it unsubscribes unless [`Subscription::detach`] was called.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
	id: u64,
	active: Arc<AtomicBool>,
	registry: Weak<dyn ListenerRegistry>,
	keep: bool,
}

impl Subscription {
	/// Listener id, unique within its store.
	pub fn id(&self) -> u64 {
		self.id
	}

	/// Returns true while the listener still receives notifications.
	pub fn is_active(&self) -> bool {
		self.active.load(Ordering::Acquire)
	}

	/// Removes the listener. Calling it again is a no-op.
	pub fn unsubscribe(&self) {
		if !self.active.swap(false, Ordering::AcqRel) {
			return;
		}
		if let Some(registry) = self.registry.upgrade() {
			registry.remove(self.id);
		}
	}

	/// Keeps the listener registered for the rest of the store's lifetime.
	pub fn detach(mut self) {
		self.keep = true;
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if !self.keep {
			self.unsubscribe();
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("active", &self.is_active())
			.finish()
	}
}
