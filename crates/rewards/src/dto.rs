//! Raw backend shapes and their mapping into model types.
//!
//! Each endpoint's JSON is decoded into a private `Raw*` struct and mapped by
//! a pure function. Raw values are consumed, never patched in place.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::backend::BackendError;
use crate::state::{AdEntry, AdHistoryDay, AdLike, AdTypeSettings, Balance, CreatorInfo, ExternalWallet, Parameters, WalletStatus};

const MILLIS_PER_DAY: u64 = 86_400_000;

#[derive(Deserialize)]
struct RawBalance {
	total: f64,
	#[serde(default)]
	wallets: BTreeMap<String, f64>,
}

#[derive(Deserialize)]
struct RawExternalWallet {
	#[serde(rename = "type")]
	provider: String,
	status: i64,
	#[serde(default)]
	username: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawParameters {
	rate: f64,
	#[serde(default)]
	tip_choices: Vec<f64>,
	#[serde(default)]
	monthly_tip_choices: Vec<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAdSettings {
	#[serde(default)]
	new_tab_page_ads_enabled: bool,
	#[serde(default)]
	notification_ads_enabled: bool,
	#[serde(default)]
	search_ads_enabled: bool,
}

#[derive(Deserialize)]
struct RawCreatorRef {
	id: String,
}

#[derive(Deserialize)]
struct RawCreator {
	id: String,
	#[serde(default)]
	name: String,
	#[serde(default)]
	verified: bool,
	#[serde(default)]
	liked: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAdHistoryEntry {
	uuid: String,
	timestamp_in_milliseconds: f64,
	#[serde(default)]
	ad_detail_rows: Vec<RawAdDetailRow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAdDetailRow {
	ad_content: RawAdContent,
	#[serde(default)]
	category_content: Option<RawCategoryContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAdContent {
	#[serde(default)]
	creative_instance_id: String,
	brand: String,
	#[serde(default)]
	brand_url: String,
	#[serde(default)]
	like_action: i64,
	#[serde(default)]
	saved_ad: bool,
	#[serde(default)]
	flagged_ad: bool,
}

#[derive(Deserialize)]
struct RawCategoryContent {
	category: String,
}

fn decode<T: DeserializeOwned>(endpoint: &'static str, raw: JsonValue) -> Result<T, BackendError> {
	serde_json::from_value(raw).map_err(|err| BackendError::Malformed {
		endpoint,
		message: err.to_string(),
	})
}

pub fn balance(raw: JsonValue) -> Result<Balance, BackendError> {
	let raw: RawBalance = decode("balance", raw)?;
	Ok(Balance {
		total: raw.total,
		wallets: raw.wallets,
	})
}

/// Maps the service's numeric wallet status. Codes this build does not know
/// read as [`WalletStatus::Disconnected`].
pub fn wallet_status(code: i64) -> WalletStatus {
	match code {
		0 => WalletStatus::NotConnected,
		1 => WalletStatus::Connected,
		2 => WalletStatus::Verified,
		5 => WalletStatus::Pending,
		_ => WalletStatus::Disconnected,
	}
}

pub fn external_wallet(raw: JsonValue) -> Result<Option<ExternalWallet>, BackendError> {
	let raw: Option<RawExternalWallet> = decode("external_wallet", raw)?;
	Ok(raw.map(|raw| ExternalWallet {
		provider: raw.provider,
		status: wallet_status(raw.status),
		username: raw.username,
	}))
}

pub fn parameters(raw: JsonValue) -> Result<Parameters, BackendError> {
	let raw: RawParameters = decode("parameters", raw)?;
	Ok(Parameters {
		rate: raw.rate,
		tip_choices: raw.tip_choices,
		monthly_tip_choices: raw.monthly_tip_choices,
	})
}

pub fn ad_settings(raw: JsonValue) -> Result<AdTypeSettings, BackendError> {
	let raw: RawAdSettings = decode("ad_settings", raw)?;
	Ok(AdTypeSettings {
		new_tab_page: raw.new_tab_page_ads_enabled,
		notification: raw.notification_ads_enabled,
		search_result: raw.search_ads_enabled,
	})
}

/// Id of the creator behind the active tab, if any.
pub fn creator_id(raw: JsonValue) -> Result<Option<String>, BackendError> {
	let raw: Option<RawCreatorRef> = decode("current_creator", raw)?;
	Ok(raw.map(|r| r.id).filter(|id| !id.is_empty()))
}

pub fn creator(raw: JsonValue) -> Result<CreatorInfo, BackendError> {
	let raw: RawCreator = decode("refresh_creator", raw)?;
	Ok(CreatorInfo {
		name: if raw.name.is_empty() { raw.id.clone() } else { raw.name },
		id: raw.id,
		verified: raw.verified,
		liked: raw.liked,
	})
}

fn ad_like(code: i64) -> AdLike {
	match code {
		1 => AdLike::Liked,
		2 => AdLike::Disliked,
		_ => AdLike::Neutral,
	}
}

/// Flattens history entries into per-day groups, newest day and ad first.
pub fn ad_history(raw: JsonValue) -> Result<Vec<AdHistoryDay>, BackendError> {
	let entries: Vec<RawAdHistoryEntry> = decode("ad_history", raw)?;
	let mut days: BTreeMap<u64, Vec<AdEntry>> = BTreeMap::new();
	for entry in entries {
		let timestamp_ms = if entry.timestamp_in_milliseconds.is_finite() && entry.timestamp_in_milliseconds > 0.0 {
			entry.timestamp_in_milliseconds as u64
		} else {
			0
		};
		for (row_index, row) in entry.ad_detail_rows.into_iter().enumerate() {
			let content = row.ad_content;
			let id = if content.creative_instance_id.is_empty() {
				format!("{}-{row_index}", entry.uuid)
			} else {
				content.creative_instance_id
			};
			days.entry(timestamp_ms / MILLIS_PER_DAY).or_default().push(AdEntry {
				id,
				timestamp_ms,
				brand: content.brand,
				url: content.brand_url,
				like: ad_like(content.like_action),
				saved: content.saved_ad,
				flagged: content.flagged_ad,
				category: row.category_content.map(|c| c.category),
			});
		}
	}
	Ok(days
		.into_iter()
		.rev()
		.map(|(day, mut ads)| {
			ads.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
			AdHistoryDay { day, ads }
		})
		.collect())
}
