//! Derived-value bindings over a [`Store`].
//!
//! A [`SelectorBinding`] projects the snapshot through a pure selector and
//! informs its owner only when the projection changes. What counts as a change
//! is decided by [`Selectable::same`]: value equality for plain data, pointer
//! equality for `Arc`s.
//!
//! Only [`Selectable`] types can be bound without an explicit equality. Large
//! sub-documents deliberately do not implement it, so selecting one whole is
//! a compile error unless the caller supplies a comparison through
//! [`SelectorBinding::with_eq`]. This keeps equality-based render skipping
//! from being silently defeated.


use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::store::{Store, Subscription};

/// A value whose changes can be detected cheaply.
pub trait Selectable: Clone + Send + Sync + 'static {
	/// Returns true when `self` and `other` should not trigger a re-render.
	fn same(&self, other: &Self) -> bool;
}

/// Implements [`Selectable`] through `PartialEq` for the listed types.
#[macro_export]
macro_rules! selectable {
	($($ty:ty),* $(,)?) => {
		$(
			impl $crate::Selectable for $ty {
				fn same(&self, other: &Self) -> bool {
					self == other
				}
			}
		)*
	};
}

selectable!(
	(),
	bool,
	char,
	u8,
	u16,
	u32,
	u64,
	u128,
	usize,
	i8,
	i16,
	i32,
	i64,
	i128,
	isize,
	f32,
	f64,
	String,
	&'static str,
	std::time::Duration,
);

impl<T: Selectable> Selectable for Option<T> {
	fn same(&self, other: &Self) -> bool {
		match (self, other) {
			(Some(a), Some(b)) => a.same(b),
			(None, None) => true,
			_ => false,
		}
	}
}

impl<T: Selectable> Selectable for Vec<T> {
	fn same(&self, other: &Self) -> bool {
		self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same(b))
	}
}

impl<T: ?Sized + Send + Sync + 'static> Selectable for Arc<T> {
	fn same(&self, other: &Self) -> bool {
		Arc::ptr_eq(self, other)
	}
}

impl<A: Selectable, B: Selectable> Selectable for (A, B) {
	fn same(&self, other: &Self) -> bool {
		self.0.same(&other.0) && self.1.same(&other.1)
	}
}

impl<A: Selectable, B: Selectable, C: Selectable> Selectable for (A, B, C) {
	fn same(&self, other: &Self) -> bool {
		self.0.same(&other.0) && self.1.same(&other.1) && self.2.same(&other.2)
	}
}

struct BindingState<T> {
	current: T,
	renders: u64,
}

/// Subscription to one derived slice of a store.
///
/// Dropping the binding unsubscribes it.
pub struct SelectorBinding<T> {
	state: Arc<Mutex<BindingState<T>>>,
	subscription: Subscription,
}

impl<T: Selectable> SelectorBinding<T> {
	/// Binds `select` and calls `on_change` whenever its output changes.
	pub fn new<S, F, C>(store: &Store<S>, select: F, on_change: C) -> Self
	where
		S: Clone + Send + Sync + 'static,
		F: Fn(&S) -> T + Send + Sync + 'static,
		C: Fn(&T) + Send + Sync + 'static,
	{
		Self::with_eq(store, select, T::same, on_change)
	}
}

impl<T: Clone + Send + 'static> SelectorBinding<T> {
	/// Binds `select` using a caller-supplied equality.
	pub fn with_eq<S, F, E, C>(store: &Store<S>, select: F, eq: E, on_change: C) -> Self
	where
		S: Clone + Send + Sync + 'static,
		F: Fn(&S) -> T + Send + Sync + 'static,
		E: Fn(&T, &T) -> bool + Send + Sync + 'static,
		C: Fn(&T) + Send + Sync + 'static,
	{
		Self::bind(store, move |snapshot: &Arc<S>| select(&**snapshot), eq, on_change)
	}

	fn bind<S, F, E, C>(store: &Store<S>, select: F, eq: E, on_change: C) -> Self
	where
		S: Clone + Send + Sync + 'static,
		F: Fn(&Arc<S>) -> T + Send + Sync + 'static,
		E: Fn(&T, &T) -> bool + Send + Sync + 'static,
		C: Fn(&T) + Send + Sync + 'static,
	{
		let initial = select(&store.state());
		let state = Arc::new(Mutex::new(BindingState { current: initial, renders: 0 }));
		let weak: Weak<Mutex<BindingState<T>>> = Arc::downgrade(&state);

		let subscription = store.subscribe(move |snapshot| {
			let Some(state) = weak.upgrade() else {
				return;
			};
			let next = select(snapshot);
			{
				let mut guard = state.lock();
				if eq(&guard.current, &next) {
					tracing::trace!(renders = guard.renders, "selector.unchanged");
					return;
				}
				guard.current = next.clone();
				guard.renders = guard.renders.wrapping_add(1);
			}
			on_change(&next);
		});

		Self { state, subscription }
	}

	/// Returns the current derived value.
	pub fn get(&self) -> T {
		self.state.lock().current.clone()
	}

	/// Number of times the owner has been informed of a change.
	pub fn renders(&self) -> u64 {
		self.state.lock().renders
	}

	/// Stops tracking the store. Idempotent.
	pub fn unsubscribe(&self) {
		self.subscription.unsubscribe();
	}

	/// Returns true while the binding still tracks its store.
	pub fn is_active(&self) -> bool {
		self.subscription.is_active()
	}
}

impl<S: Clone + Send + Sync + 'static> SelectorBinding<Arc<S>> {
	/// Binds the whole snapshot.
	///
	/// Every update swaps in a freshly allocated snapshot, so pointer equality
	/// never suppresses a notification here: callers that intentionally select
	/// everything are informed of every update.
	pub fn whole<C>(store: &Store<S>, on_change: C) -> Self
	where
		C: Fn(&Arc<S>) + Send + Sync + 'static,
	{
		Self::bind(store, |snapshot: &Arc<S>| Arc::clone(snapshot), |a: &Arc<S>, b: &Arc<S>| Arc::ptr_eq(a, b), on_change)
	}
}

impl<T> std::fmt::Debug for SelectorBinding<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SelectorBinding")
			.field("renders", &self.state.lock().renders)
			.field("subscription", &self.subscription)
			.finish()
	}
}
