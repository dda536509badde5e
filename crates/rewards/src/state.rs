//! The rewards panel snapshot and its partial-update patch.

use std::collections::BTreeMap;
use std::sync::Arc;

use statesync_store::{Field, Patch};

/// Wallet balance, in BAT.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Balance {
	pub total: f64,
	/// Per-source breakdown, keyed by wallet name.
	pub wallets: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletStatus {
	NotConnected,
	Connected,
	Verified,
	Pending,
	Disconnected,
}

/// Custodial wallet linked to the rewards profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalWallet {
	pub provider: String,
	pub status: WalletStatus,
	pub username: String,
}

impl ExternalWallet {
	pub fn is_connected(&self) -> bool {
		matches!(self.status, WalletStatus::Connected | WalletStatus::Verified)
	}
}

/// Server-side rewards parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
	/// BAT exchange rate against the display currency.
	pub rate: f64,
	pub tip_choices: Vec<f64>,
	pub monthly_tip_choices: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdType {
	NewTabPage,
	Notification,
	SearchResult,
}

impl AdType {
	pub const ALL: [AdType; 3] = [AdType::NewTabPage, AdType::Notification, AdType::SearchResult];

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::NewTabPage => "new_tab_page",
			Self::Notification => "notification",
			Self::SearchResult => "search_result",
		}
	}

	/// Optimistic-mutation handle for this ad type's enabled flag.
	pub fn enabled_field(self) -> Field<RewardsState, bool> {
		Field::new(
			self.as_str(),
			move |state: &RewardsState| state.ad_types.enabled(self),
			move |state: &mut RewardsState, enabled| state.ad_types.set_enabled(self, enabled),
		)
	}
}

/// Per-type ad delivery switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdTypeSettings {
	pub new_tab_page: bool,
	pub notification: bool,
	pub search_result: bool,
}

impl AdTypeSettings {
	pub fn enabled(&self, ad_type: AdType) -> bool {
		match ad_type {
			AdType::NewTabPage => self.new_tab_page,
			AdType::Notification => self.notification,
			AdType::SearchResult => self.search_result,
		}
	}

	pub fn set_enabled(&mut self, ad_type: AdType, enabled: bool) {
		match ad_type {
			AdType::NewTabPage => self.new_tab_page = enabled,
			AdType::Notification => self.notification = enabled,
			AdType::SearchResult => self.search_result = enabled,
		}
	}
}

/// The creator (publisher) of the page currently shown in the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatorInfo {
	pub id: String,
	pub name: String,
	pub verified: bool,
	pub liked: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdLike {
	#[default]
	Neutral,
	Liked,
	Disliked,
}

/// One ad shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdEntry {
	pub id: String,
	pub timestamp_ms: u64,
	pub brand: String,
	pub url: String,
	pub like: AdLike,
	pub saved: bool,
	pub flagged: bool,
	pub category: Option<String>,
}

/// Ads shown on one UTC day, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdHistoryDay {
	/// Days since the Unix epoch.
	pub day: u64,
	pub ads: Vec<AdEntry>,
}

/// Everything the rewards panel renders.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardsState {
	/// True until the first blocking load settles.
	pub loading: bool,
	/// Identity of the current panel opening; bumped on reopen so transient
	/// view state resets.
	pub open_time: u64,
	pub balance: Option<Balance>,
	pub external_wallet: Option<ExternalWallet>,
	pub parameters: Option<Parameters>,
	pub ad_types: AdTypeSettings,
	pub current_creator: Option<CreatorInfo>,
	pub ad_history: Arc<Vec<AdHistoryDay>>,
	/// Last failure surfaced to the user.
	pub last_error: Option<String>,
}

impl Default for RewardsState {
	fn default() -> Self {
		Self {
			loading: true,
			open_time: 0,
			balance: None,
			external_wallet: None,
			parameters: None,
			ad_types: AdTypeSettings::default(),
			current_creator: None,
			ad_history: Arc::default(),
			last_error: None,
		}
	}
}

impl RewardsState {
	pub fn last_error_field() -> Field<RewardsState, Option<String>> {
		Field::new("last_error", |state: &RewardsState| state.last_error.clone(), |state: &mut RewardsState, error| {
			state.last_error = error
		})
	}

	pub fn creator_liked_field() -> Field<RewardsState, bool> {
		Field::new(
			"current_creator.liked",
			|state: &RewardsState| state.current_creator.as_ref().is_some_and(|c| c.liked),
			|state: &mut RewardsState, liked| {
				if let Some(creator) = state.current_creator.as_mut() {
					creator.liked = liked;
				}
			},
		)
	}
}

statesync_store::selectable!(Balance, WalletStatus, ExternalWallet, Parameters, AdType, AdTypeSettings, CreatorInfo, AdLike);

/// Partial [`RewardsState`]; `Some` fields replace their counterpart.
#[derive(Debug, Clone, Default)]
pub struct RewardsPatch {
	pub loading: Option<bool>,
	pub open_time: Option<u64>,
	pub balance: Option<Option<Balance>>,
	pub external_wallet: Option<Option<ExternalWallet>>,
	pub parameters: Option<Option<Parameters>>,
	pub ad_types: Option<AdTypeSettings>,
	pub current_creator: Option<Option<CreatorInfo>>,
	pub ad_history: Option<Arc<Vec<AdHistoryDay>>>,
	pub last_error: Option<Option<String>>,
}

impl Patch<RewardsState> for RewardsPatch {
	fn apply(self, state: &mut RewardsState) {
		if let Some(loading) = self.loading {
			state.loading = loading;
		}
		if let Some(open_time) = self.open_time {
			state.open_time = open_time;
		}
		if let Some(balance) = self.balance {
			state.balance = balance;
		}
		if let Some(wallet) = self.external_wallet {
			state.external_wallet = wallet;
		}
		if let Some(parameters) = self.parameters {
			state.parameters = parameters;
		}
		if let Some(ad_types) = self.ad_types {
			state.ad_types = ad_types;
		}
		if let Some(creator) = self.current_creator {
			state.current_creator = creator;
		}
		if let Some(history) = self.ad_history {
			state.ad_history = history;
		}
		if let Some(error) = self.last_error {
			state.last_error = error;
		}
	}
}
