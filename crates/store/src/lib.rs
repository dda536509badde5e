//! Application state synchronization core.
//!
//! A [`Store`] owns one immutable-by-convention snapshot and fans changes out
//! to subscribers. [`SelectorBinding`]s narrow those notifications to the
//! slice a view cares about. A [`Reconciler`] keeps the snapshot aligned with
//! an asynchronous backend, fed by explicit loads, a [`Debouncer`]ed push
//! channel and visibility changes. [`OptimisticGuard`] applies user edits
//! locally before the backend confirms them and rolls them back on failure.

pub mod debounce;
pub mod error;
pub mod optimistic;
pub mod policy;
pub mod reconcile;
pub mod selector;
pub mod store;

pub use debounce::Debouncer;
pub use error::{ConfigError, MutationError, TaskError};
pub use optimistic::{Field, MutationOutcome, MutationState, OptimisticGuard, PendingMutation, ResolutionPolicy};
pub use policy::SyncPolicy;
pub use reconcile::{LoadReport, Reconciler, ReconcilerBuilder, Redisplay, RefreshCooldown, RetryPolicy, TaskContext, TaskKind, VisibilityTracker};
pub use selector::{Selectable, SelectorBinding};
pub use store::{Patch, Store, Subscription};
