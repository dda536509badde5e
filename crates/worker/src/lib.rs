//! Worker primitives shared by the state synchronization crates.
//!
//! Refresh tasks, debounced triggers and optimistic mutation follow-ups are
//! all spawned through this crate so they carry a [`TaskClass`] in their
//! trace events and attach to whichever tokio runtime is active.

mod class;
mod join_set;
mod spawn;
mod token;

pub use class::TaskClass;
pub use join_set::WorkerJoinSet;
pub use spawn::spawn;
pub use token::{GenerationClock, GenerationToken};

/// Extracts the panic message carried by a failed join, if the task panicked.
///
/// Returns `None` for cancelled tasks.
pub fn join_error_panic_message(err: tokio::task::JoinError) -> Option<String> {
	let payload = err.try_into_panic().ok()?;
	Some(panic_payload_message(payload.as_ref()))
}

/// Renders a caught panic payload as text.
pub fn panic_payload_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		return (*msg).to_string();
	}
	if let Some(msg) = payload.downcast_ref::<String>() {
		return msg.clone();
	}
	"non-string panic payload".to_string()
}
