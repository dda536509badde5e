use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::time::Instant;

struct Issued<V> {
	at: Instant,
	cell: Arc<OnceCell<V>>,
}

/// Keyed guard against re-issuing an expensive refresh.
///
/// The first call for a key issues the refresh. Calls for the same key within
/// `window` of that issue join it, or reuse its value once it has landed. A
/// failed refresh leaves nothing to reuse, so the next caller issues again.
///
/// Only keys issued within the last `window` are tracked; older ones are
/// pruned whenever a new refresh is issued.
pub struct RefreshCooldown<K, V> {
	window: Duration,
	issued: Mutex<HashMap<K, Issued<V>>>,
	latest: Mutex<HashMap<K, V>>,
	refreshes: AtomicU64,
}

impl<K, V> RefreshCooldown<K, V>
where
	K: Eq + Hash + Clone + std::fmt::Debug,
	V: Clone,
{
	pub fn new(window: Duration) -> Self {
		Self {
			window,
			issued: Mutex::new(HashMap::new()),
			latest: Mutex::new(HashMap::new()),
			refreshes: AtomicU64::new(0),
		}
	}

	/// Returns the value for `key`, issuing `refresh` only outside the cooldown.
	pub async fn get_or_refresh<F, Fut, E>(&self, key: K, refresh: F) -> Result<V, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<V, E>>,
	{
		let cell = {
			let now = Instant::now();
			let mut issued = self.issued.lock();
			match issued.get(&key) {
				Some(entry) if now.saturating_duration_since(entry.at) < self.window => {
					tracing::debug!(key = ?key, age_ms = now.saturating_duration_since(entry.at).as_millis() as u64, "reconcile.cooldown.reuse");
					Arc::clone(&entry.cell)
				}
				_ => {
					let window = self.window;
					let before = issued.len();
					issued.retain(|_, entry| now.saturating_duration_since(entry.at) < window);
					let pruned = before - issued.len();
					if pruned > 0 {
						tracing::trace!(pruned, "reconcile.cooldown.pruned");
					}
					let cell = Arc::new(OnceCell::new());
					issued.insert(key.clone(), Issued { at: now, cell: Arc::clone(&cell) });
					self.latest.lock().retain(|k, _| issued.contains_key(k));
					cell
				}
			}
		};

		let refreshes = &self.refreshes;
		let issued_key = &key;
		let value = cell
			.get_or_try_init(|| async move {
				let value = refresh().await?;
				let n = refreshes.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
				tracing::trace!(key = ?issued_key, refreshes = n, "reconcile.cooldown.refreshed");
				Ok::<V, E>(value)
			})
			.await?
			.clone();
		self.latest.lock().insert(key, value.clone());
		Ok(value)
	}

	/// Most recently refreshed value for `key`, kept until the key is pruned.
	pub fn latest(&self, key: &K) -> Option<V> {
		self.latest.lock().get(key).cloned()
	}

	/// Number of keys currently tracked.
	pub fn tracked(&self) -> usize {
		self.issued.lock().len()
	}

	/// Forgets the issue time for `key` so the next call refreshes.
	pub fn invalidate(&self, key: &K) {
		self.issued.lock().remove(key);
	}

	/// Number of refreshes that completed successfully.
	pub fn refreshes(&self) -> u64 {
		self.refreshes.load(Ordering::Acquire)
	}

	/// Reuse window measured from each issue.
	pub fn window(&self) -> Duration {
		self.window
	}
}

impl<K, V> std::fmt::Debug for RefreshCooldown<K, V> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RefreshCooldown")
			.field("window", &self.window)
			.field("refreshes", &self.refreshes.load(Ordering::Acquire))
			.finish()
	}
}
