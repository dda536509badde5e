//! Rewards panel data layer.
//!
//! [`RewardsModel`] owns the panel's [`RewardsState`] store and keeps it in
//! step with a [`RewardsBackend`]: blocking loads gate the `loading` flag,
//! creator and ad history refreshes land in the background, backend pushes
//! are debounced into full reloads and user toggles are applied optimistically.

pub mod backend;
pub mod dto;
pub mod model;
pub mod state;

pub use backend::{BackendError, RewardsBackend};
pub use model::RewardsModel;
pub use state::{
	AdEntry, AdHistoryDay, AdLike, AdType, AdTypeSettings, Balance, CreatorInfo, ExternalWallet, Parameters, RewardsPatch, RewardsState,
	WalletStatus,
};
