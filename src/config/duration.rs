//! Serde helpers that encode [`Duration`] values as whole seconds or milliseconds.

// crates.io
use serde::{Deserializer, Serializer};
// self
use crate::_prelude::*;

/// Converts a [`Duration`] into a non-negative [`std::time::Duration`].
pub fn to_std(duration: Duration) -> std::time::Duration {
	std::time::Duration::try_from(duration).unwrap_or_default()
}

/// `#[serde(with = "secs")]` for [`Duration`] fields.
pub mod secs {
	// self
	use super::*;

	/// Serializes as whole seconds.
	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(value.whole_seconds())
	}

	/// Deserializes from whole seconds.
	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::seconds)
	}

	/// `#[serde(with = "secs::option")]` for optional [`Duration`] fields.
	pub mod option {
		// self
		use super::*;

		/// Serializes as optional whole seconds.
		pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
		where
			S: Serializer,
		{
			match value {
				Some(value) => serializer.serialize_some(&value.whole_seconds()),
				None => serializer.serialize_none(),
			}
		}

		/// Deserializes from optional whole seconds.
		pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
		where
			D: Deserializer<'de>,
		{
			Option::<i64>::deserialize(deserializer).map(|value| value.map(Duration::seconds))
		}
	}
}

/// `#[serde(with = "millis")]` for [`Duration`] fields.
pub mod millis {
	// self
	use super::*;

	/// Serializes as whole milliseconds.
	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(i64::try_from(value.whole_milliseconds()).unwrap_or(i64::MAX))
	}

	/// Deserializes from whole milliseconds.
	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::milliseconds)
	}
}
