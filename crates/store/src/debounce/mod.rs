//! Trailing-edge debouncing for bursty triggers.
//!
//! Each [`Debouncer::trigger`] aborts the pending timer, if any, and arms a new
//! one. The action runs once the window elapses with no further triggers. An
//! action that already started is never aborted by a later trigger; the later
//! trigger simply arms the next run.


use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use statesync_worker::{TaskClass, spawn};
use tokio::task::JoinHandle;

type Action = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Armed {
	seq: u64,
	timer: JoinHandle<()>,
}

struct DebouncerInner {
	window: Duration,
	action: Action,
	armed: Mutex<Option<Armed>>,
	seq: AtomicU64,
	fired: AtomicU64,
}

/// Coalesces triggers into one trailing invocation per quiet window.
///
/// Clones share the same timer.
#[derive(Clone)]
pub struct Debouncer {
	inner: Arc<DebouncerInner>,
}

impl Debouncer {
	/// Creates a debouncer running `action` after `window` of silence.
	pub fn new<F, Fut>(window: Duration, action: F) -> Self
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		Self {
			inner: Arc::new(DebouncerInner {
				window,
				action: Arc::new(move || action().boxed()),
				armed: Mutex::new(None),
				seq: AtomicU64::new(0),
				fired: AtomicU64::new(0),
			}),
		}
	}

	/// Restarts the quiet window.
	pub fn trigger(&self) {
		let seq = self.inner.seq.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
		let inner = Arc::clone(&self.inner);

		// Held across the spawn so the timer cannot observe the slot before it is filled.
		let mut armed = self.inner.armed.lock();
		if let Some(previous) = armed.take() {
			previous.timer.abort();
			tracing::trace!(superseded = previous.seq, seq, "debounce.coalesced");
		}
		let timer = spawn(TaskClass::Background, async move {
			tokio::time::sleep(inner.window).await;
			{
				let mut armed = inner.armed.lock();
				match armed.as_ref() {
					Some(current) if current.seq == seq => {
						armed.take();
					}
					_ => return,
				}
			}
			let fired = inner.fired.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
			tracing::debug!(seq, fired, window_ms = inner.window.as_millis() as u64, "debounce.fire");
			(inner.action)().await;
		});
		*armed = Some(Armed { seq, timer });
	}

	/// Drops the pending run, if any.
	pub fn cancel(&self) {
		if let Some(armed) = self.inner.armed.lock().take() {
			armed.timer.abort();
			tracing::trace!(seq = armed.seq, "debounce.cancelled");
		}
	}

	/// Returns true while a run is scheduled but has not started.
	pub fn is_pending(&self) -> bool {
		self.inner.armed.lock().is_some()
	}

	/// Number of times the action has started.
	pub fn fired(&self) -> u64 {
		self.inner.fired.load(Ordering::Acquire)
	}

	/// Quiet period that must follow the last trigger.
	pub fn window(&self) -> Duration {
		self.inner.window
	}
}

impl std::fmt::Debug for Debouncer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Debouncer")
			.field("window", &self.inner.window)
			.field("pending", &self.is_pending())
			.field("fired", &self.fired())
			.finish()
	}
}
