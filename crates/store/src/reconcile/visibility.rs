use std::time::Duration;

use tokio::time::Instant;

/// What a redisplay of the surface calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redisplay {
	/// Hidden too briefly to matter and nothing was missed.
	Ignored,
	/// Hidden briefly, but a backend push arrived meanwhile.
	Stale,
	/// Hidden longer than the threshold: reset view identity and reload.
	Reopened,
}

/// Tracks how long the surface has been hidden.
///
/// Starts visible.
#[derive(Debug, Clone)]
pub struct VisibilityTracker {
	threshold: Duration,
	hidden_since: Option<Instant>,
	missed_push: bool,
}

impl VisibilityTracker {
	pub fn new(threshold: Duration) -> Self {
		Self {
			threshold,
			hidden_since: None,
			missed_push: false,
		}
	}

	pub fn is_visible(&self) -> bool {
		self.hidden_since.is_none()
	}

	/// Records that the surface was hidden at `now`. Repeated calls keep the
	/// first instant.
	pub fn hidden(&mut self, now: Instant) {
		self.hidden_since.get_or_insert(now);
	}

	/// Records a backend push that arrived while hidden.
	pub fn note_missed_push(&mut self) {
		self.missed_push = true;
	}

	/// Records redisplay at `now` and classifies it.
	pub fn shown(&mut self, now: Instant) -> Redisplay {
		let Some(since) = self.hidden_since.take() else {
			return Redisplay::Ignored;
		};
		let missed = std::mem::take(&mut self.missed_push);
		if now.saturating_duration_since(since) > self.threshold {
			Redisplay::Reopened
		} else if missed {
			Redisplay::Stale
		} else {
			Redisplay::Ignored
		}
	}
}
