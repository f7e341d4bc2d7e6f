//! Secret values sourced from a literal, an environment variable, or a file.

// std
use std::{env, fs, path::PathBuf};
// self
use crate::{_prelude::*, error::ConfigError, secret::Secret};

/// Where a secret value comes from: a literal, an environment variable, or a file.
///
/// ```toml
/// client_id = { value = "abc" }
/// client_secret = { env_var = "GOOGLE_CLIENT_SECRET" }
/// global_key = { path = "/run/secrets/global.key" }
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSource {
	/// Literal value embedded in configuration.
	Value {
		/// The literal value.
		value: String,
	},
	/// Value read from an environment variable at resolution time.
	EnvVar {
		/// Variable name.
		env_var: String,
	},
	/// Value read from a file at resolution time; trailing newlines are trimmed.
	File {
		/// File path.
		path: PathBuf,
	},
}
impl ValueSource {
	/// Convenience constructor for a literal value.
	pub fn value(value: impl Into<String>) -> Self {
		Self::Value { value: value.into() }
	}

	/// Resolves the configured value.
	pub fn resolve(&self) -> Result<Secret, ConfigError> {
		match self {
			Self::Value { value } => Ok(Secret::new(value.clone())),
			Self::EnvVar { env_var } => env::var(env_var)
				.map(Secret::new)
				.map_err(|_| ConfigError::MissingEnvVar { name: env_var.clone() }),
			Self::File { path } => fs::read_to_string(path)
				.map(|raw| Secret::new(raw.trim_end_matches(['\r', '\n'])))
				.map_err(|source| ConfigError::SecretFile {
					path: path.display().to_string(),
					source,
				}),
		}
	}

	/// Returns true when the source is present but resolves to an empty string.
	pub fn is_blank(&self) -> bool {
		matches!(self, Self::Value { value } if value.trim().is_empty())
	}
}
impl Debug for ValueSource {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Value { .. } => f.write_str("ValueSource::Value(<redacted>)"),
			Self::EnvVar { env_var } => write!(f, "ValueSource::EnvVar({env_var})"),
			Self::File { path } => write!(f, "ValueSource::File({})", path.display()),
		}
	}
}
