use std::future::Future;

use tokio::task::{JoinError, JoinSet};

use crate::TaskClass;

/// Runtime-aware wrapper for a Tokio [`JoinSet`].
///
/// Every member task is isolated: a panic or error in one member surfaces
/// only through its own `join_next` result.
#[derive(Debug)]
pub struct WorkerJoinSet<T> {
	class: TaskClass,
	inner: JoinSet<T>,
}

impl<T> WorkerJoinSet<T>
where
	T: Send + 'static,
{
	/// Creates an empty join set for the given task class.
	pub fn new(class: TaskClass) -> Self {
		Self { class, inner: JoinSet::new() }
	}

	/// Returns the number of tasks currently in the set.
	pub fn len(&self) -> usize {
		self.inner.len()
	}

	/// Returns `true` if the set is empty.
	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	/// Spawns a future into the set on the current worker runtime handle.
	pub fn spawn<F>(&mut self, fut: F)
	where
		F: Future<Output = T> + Send + 'static,
	{
		tracing::trace!(worker_class = self.class.as_str(), pending = self.inner.len(), "worker.join_set.spawn");
		let handle = crate::spawn::runtime_handle();
		self.inner.spawn_on(fut, &handle);
	}

	/// Waits for the next completed task.
	pub async fn join_next(&mut self) -> Option<Result<T, JoinError>> {
		self.inner.join_next().await
	}

	/// Waits for every remaining task, returning results in completion order.
	pub async fn join_all(mut self) -> Vec<Result<T, JoinError>> {
		let mut results = Vec::with_capacity(self.inner.len());
		while let Some(result) = self.inner.join_next().await {
			results.push(result);
		}
		results
	}
}
