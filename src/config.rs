//! Runtime configuration for the proxy core.
//!
//! Configuration is plain `serde` data and can be loaded from TOML:
//!
//! ```toml
//! public_base_url = "https://proxy.example.com"
//! error_page_url = "https://app.example.com/connect/error"
//! global_key = { env_var = "AUTHPROXY_GLOBAL_KEY" }
//! actor_token_key = { path = "/run/secrets/actor.key" }
//!
//! [oauth2]
//! round_trip_ttl_secs = 900
//! refresh_sweep_cron = "*/5 * * * *"
//!
//! [oauth2.refresh_lock]
//! ttl_ms = 30000
//! max_attempts = 40
//! ```

pub mod duration;
pub mod value_source;

pub use value_source::*;

// std
use std::{fs, path::Path};
// self
use crate::{_prelude::*, error::ConfigError};

/// Path of the public redirect endpoint relative to [`Config::public_base_url`].
pub const REDIRECT_PATH: &str = "/oauth2/redirect";
/// Path of the third-party callback endpoint relative to [`Config::public_base_url`].
pub const CALLBACK_PATH: &str = "/oauth2/callback";

/// Top-level proxy configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
	/// Public origin of this proxy; redirect endpoints hang off it.
	pub public_base_url: Url,
	/// Page users land on when a browser-facing OAuth2 flow fails.
	pub error_page_url: Url,
	/// Base64-encoded 32-byte key for the encryption service.
	pub global_key: ValueSource,
	/// HMAC key used to sign short-lived actor tokens.
	pub actor_token_key: ValueSource,
	/// OAuth2 lifecycle settings.
	#[serde(default)]
	pub oauth2: OAuth2Config,
}
impl Config {
	/// Parses configuration from a TOML document.
	pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
		let config = toml::from_str::<Self>(raw)?;

		config.validate()?;

		Ok(config)
	}

	/// Reads and parses a TOML configuration file.
	pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let raw = fs::read_to_string(path)
			.map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;

		Self::from_toml_str(&raw)
	}

	/// Rejects settings the OAuth2 flows cannot run with.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let oauth2 = &self.oauth2;
		let lock = &oauth2.refresh_lock;

		for (field, value) in [
			("oauth2.round_trip_ttl_secs", oauth2.round_trip_ttl),
			("oauth2.actor_token_ttl_secs", oauth2.actor_token_ttl),
			("oauth2.default_refresh_timeout_secs", oauth2.default_refresh_timeout),
			("oauth2.refresh_lock.ttl_ms", lock.ttl),
			("oauth2.refresh_lock.initial_backoff_ms", lock.initial_backoff),
		] {
			if !value.is_positive() {
				return Err(ConfigError::NonPositiveDuration { field });
			}
		}

		if lock.max_backoff < lock.initial_backoff {
			return Err(ConfigError::BackoffOutOfOrder);
		}

		Ok(())
	}

	/// URL of the public redirect endpoint (`/oauth2/redirect`).
	pub fn redirect_endpoint(&self) -> Result<Url, ConfigError> {
		join_public(&self.public_base_url, REDIRECT_PATH)
	}

	/// URL of the third-party callback endpoint (`/oauth2/callback`).
	pub fn callback_endpoint(&self) -> Result<Url, ConfigError> {
		join_public(&self.public_base_url, CALLBACK_PATH)
	}
}

/// OAuth2 lifecycle settings shared by every connector.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuth2Config {
	/// TTL of authorization states in the ephemeral store.
	#[serde(rename = "round_trip_ttl_secs", with = "duration::secs")]
	pub round_trip_ttl: Duration,
	/// Cron expression consumed by the external scheduler that triggers the refresh sweep.
	pub refresh_sweep_cron: String,
	/// Lifetime of the self-signed actor token embedded in public redirect URLs.
	#[serde(rename = "actor_token_ttl_secs", with = "duration::secs")]
	pub actor_token_ttl: Duration,
	/// Lead time used when a connector enables background refresh without its own value.
	#[serde(rename = "default_refresh_time_before_expiry_secs", with = "duration::secs")]
	pub default_refresh_time_before_expiry: Duration,
	/// Deadline for token endpoint calls when a connector does not override it.
	#[serde(rename = "default_refresh_timeout_secs", with = "duration::secs")]
	pub default_refresh_timeout: Duration,
	/// Attempts made to revoke upstream credentials while disconnecting.
	pub revoke_attempts: u32,
	/// Delay between revocation attempts.
	#[serde(rename = "revoke_backoff_ms", with = "duration::millis")]
	pub revoke_backoff: Duration,
	/// Distributed refresh lock settings.
	pub refresh_lock: LockConfig,
}
impl Default for OAuth2Config {
	fn default() -> Self {
		Self {
			round_trip_ttl: Duration::minutes(15),
			refresh_sweep_cron: "*/5 * * * *".into(),
			actor_token_ttl: Duration::minutes(5),
			default_refresh_time_before_expiry: Duration::minutes(10),
			default_refresh_timeout: Duration::seconds(30),
			revoke_attempts: 3,
			revoke_backoff: Duration::milliseconds(200),
			refresh_lock: LockConfig::default(),
		}
	}
}

/// TTL and retry budget of the per-connection refresh lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
	/// Lock lease; the holder extends it every half TTL.
	#[serde(rename = "ttl_ms", with = "duration::millis")]
	pub ttl: Duration,
	/// First retry delay after contention.
	#[serde(rename = "initial_backoff_ms", with = "duration::millis")]
	pub initial_backoff: Duration,
	/// Upper bound of the exponential backoff.
	#[serde(rename = "max_backoff_ms", with = "duration::millis")]
	pub max_backoff: Duration,
	/// Acquisition attempts before giving up.
	pub max_attempts: u32,
}
impl Default for LockConfig {
	fn default() -> Self {
		Self {
			ttl: Duration::seconds(30),
			initial_backoff: Duration::milliseconds(50),
			max_backoff: Duration::seconds(1),
			max_attempts: 40,
		}
	}
}

fn join_public(base: &Url, path: &str) -> Result<Url, ConfigError> {
	let mut url = base.clone();
	let joined = format!("{}{}", base.path().trim_end_matches('/'), path);

	url.set_path(&joined);

	if url.cannot_be_a_base() {
		return Err(ConfigError::InvalidUrl {
			value: base.to_string(),
			source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
		});
	}

	Ok(url)
}
