//! Declarative connector definitions.
//!
//! A definition is immutable data: which auth method the connector uses, the third-party
//! endpoints, requested scopes, and display metadata. Definitions are serialized to JSON, hashed,
//! and encrypted at rest by [`ConnectorVersion`](crate::connectors::ConnectorVersion).

// self
use crate::{_prelude::*, config::ValueSource, config::duration, error::ConfigError};

/// One integration with a third-party API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorDefinition {
	/// Human-readable name.
	pub display_name: String,
	/// Short description shown to users.
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub description: String,
	/// Optional logo.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub logo: Option<Url>,
	/// Authentication method and its settings.
	pub auth: Auth,
}
impl ConnectorDefinition {
	/// Returns the auth type label of this definition.
	pub fn auth_type(&self) -> AuthType {
		self.auth.auth_type()
	}

	/// Validates endpoint schemes.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let Auth::OAuth2(oauth2) = &self.auth else {
			return Ok(());
		};

		if let Some(authorization) = &oauth2.authorization {
			validate_endpoint("authorization", &authorization.endpoint)?;
		}
		if let Some(token) = &oauth2.token {
			validate_endpoint("token", &token.endpoint)?;
		}
		if let Some(revocation) = &oauth2.revocation {
			validate_endpoint("revocation", &revocation.endpoint)?;
		}

		Ok(())
	}
}

/// Sealed set of auth methods; dispatch matches on it exhaustively.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Auth {
	/// OAuth2 authorization-code flow.
	#[serde(rename = "oauth2")]
	OAuth2(AuthOAuth2),
	/// Static API key.
	#[serde(rename = "api-key")]
	ApiKey(AuthApiKey),
	/// No credentials.
	#[serde(rename = "no-auth")]
	NoAuth,
	/// Auth type this build does not recognize.
	#[serde(other)]
	Unsupported,
}
impl Auth {
	/// Returns the discriminant.
	pub fn auth_type(&self) -> AuthType {
		match self {
			Self::OAuth2(_) => AuthType::OAuth2,
			Self::ApiKey(_) => AuthType::ApiKey,
			Self::NoAuth => AuthType::NoAuth,
			Self::Unsupported => AuthType::Unsupported,
		}
	}
}

/// Discriminant of [`Auth`], persisted alongside each connector version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthType {
	/// OAuth2 authorization-code flow.
	#[serde(rename = "oauth2")]
	OAuth2,
	/// Static API key.
	ApiKey,
	/// No credentials.
	NoAuth,
	/// Unrecognized auth type.
	Unsupported,
}
impl AuthType {
	/// Returns a stable label.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::OAuth2 => "oauth2",
			Self::ApiKey => "api-key",
			Self::NoAuth => "no-auth",
			Self::Unsupported => "unsupported",
		}
	}
}
impl Display for AuthType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// How the client authenticates at the token and revocation endpoints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	/// Form POST body parameters for `client_id`/`client_secret`.
	#[default]
	ClientSecretPost,
	/// HTTP Basic with `client_id`/`client_secret`.
	ClientSecretBasic,
}

/// OAuth2 settings of a connector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOAuth2 {
	/// OAuth2 client identifier.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_id: Option<ValueSource>,
	/// OAuth2 client secret.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_secret: Option<ValueSource>,
	/// Client authentication method used at the token endpoint.
	#[serde(default)]
	pub client_auth_method: ClientAuthMethod,
	/// Scopes requested during authorization.
	#[serde(default)]
	pub scopes: Vec<Scope>,
	/// Authorization endpoint the user is sent to.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub authorization: Option<AuthorizationEndpoint>,
	/// Token endpoint used for code exchange and refresh.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<TokenEndpoint>,
	/// Optional revocation endpoint.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub revocation: Option<RevocationEndpoint>,
}
impl AuthOAuth2 {
	/// Space-joined scope ids in declaration order, `None` when no scope is declared.
	pub fn scope_param(&self) -> Option<String> {
		if self.scopes.is_empty() {
			return None;
		}

		Some(self.scopes.iter().map(|scope| scope.id.as_str()).collect::<Vec<_>>().join(" "))
	}
}

/// One requested scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
	/// Scope identifier sent to the provider.
	pub id: String,
	/// Whether the connection is useless without this scope.
	#[serde(default = "default_true")]
	pub required: bool,
	/// Explanation shown to users.
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub reason: String,
}

/// Authorization endpoint settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationEndpoint {
	/// Endpoint URL.
	pub endpoint: Url,
	/// Extra or replacement query parameters.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub query_overrides: BTreeMap<String, String>,
}

/// Token endpoint settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEndpoint {
	/// Endpoint URL.
	pub endpoint: Url,
	/// Extra or replacement query parameters.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub query_overrides: BTreeMap<String, String>,
	/// Extra or replacement form parameters.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub form_overrides: BTreeMap<String, String>,
	/// Whether the periodic sweep refreshes this connector's tokens ahead of expiry.
	#[serde(default)]
	pub refresh_in_background: bool,
	/// How long before expiry the sweep refreshes.
	#[serde(
		default,
		rename = "refresh_time_before_expiry_secs",
		skip_serializing_if = "Option::is_none",
		with = "duration::secs::option"
	)]
	pub refresh_time_before_expiry: Option<Duration>,
	/// Deadline for token endpoint calls.
	#[serde(
		default,
		rename = "refresh_timeout_secs",
		skip_serializing_if = "Option::is_none",
		with = "duration::secs::option"
	)]
	pub refresh_timeout: Option<Duration>,
}

/// Revocation endpoint settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationEndpoint {
	/// Endpoint URL.
	pub endpoint: Url,
	/// Extra or replacement query parameters.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub query_overrides: BTreeMap<String, String>,
	/// Extra or replacement form parameters.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub form_overrides: BTreeMap<String, String>,
}

/// API-key settings of a connector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthApiKey {
	/// The key; encrypted at rest together with the rest of the definition.
	pub key: ValueSource,
	/// Where the key is attached.
	pub placement: ApiKeyPlacement,
}

/// Where an API key is attached to proxied requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "in", rename_all = "snake_case")]
pub enum ApiKeyPlacement {
	/// Request header, optionally prefixed (e.g., `Bearer `).
	Header {
		/// Header name.
		name: String,
		/// Prefix prepended to the key.
		#[serde(default, skip_serializing_if = "String::is_empty")]
		prefix: String,
	},
	/// Query parameter.
	Query {
		/// Parameter name.
		param: String,
	},
}

fn default_true() -> bool {
	true
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ConfigError> {
	if matches!(url.scheme(), "https" | "http") {
		Ok(())
	} else {
		Err(ConfigError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn oauth2_definition_parses_with_defaults() {
		let raw = r#"{
			"display_name": "Google Drive",
			"auth": {
				"type": "oauth2",
				"client_id": { "value": "cid" },
				"client_secret": { "env_var": "GOOGLE_SECRET" },
				"scopes": [{ "id": "drive.readonly" }, { "id": "email", "required": false }],
				"authorization": { "endpoint": "https://accounts.example.com/auth" },
				"token": {
					"endpoint": "https://accounts.example.com/token",
					"refresh_in_background": true,
					"refresh_time_before_expiry_secs": 600
				}
			}
		}"#;
		let definition: ConnectorDefinition =
			serde_json::from_str(raw).expect("Definition fixture should parse.");
		let Auth::OAuth2(oauth2) = &definition.auth else {
			panic!("Definition should use OAuth2.");
		};

		assert_eq!(definition.auth_type(), AuthType::OAuth2);
		assert_eq!(oauth2.client_auth_method, ClientAuthMethod::ClientSecretPost);
		assert_eq!(oauth2.scope_param().as_deref(), Some("drive.readonly email"));
		assert!(oauth2.scopes[0].required);
		assert!(!oauth2.scopes[1].required);
		assert_eq!(
			oauth2.token.as_ref().and_then(|token| token.refresh_time_before_expiry),
			Some(Duration::minutes(10))
		);
		assert!(definition.validate().is_ok());
	}

	#[test]
	fn unknown_auth_types_deserialize_as_unsupported() {
		let raw = r#"{ "display_name": "Legacy", "auth": { "type": "saml" } }"#;
		let definition: ConnectorDefinition =
			serde_json::from_str(raw).expect("Unknown auth type should still parse.");

		assert_eq!(definition.auth, Auth::Unsupported);
		assert_eq!(definition.auth_type(), AuthType::Unsupported);
	}

	#[test]
	fn api_key_placement_round_trips() {
		let raw = r#"{
			"display_name": "Weather",
			"auth": {
				"type": "api-key",
				"key": { "value": "k-123" },
				"placement": { "in": "header", "name": "X-Api-Key" }
			}
		}"#;
		let definition: ConnectorDefinition =
			serde_json::from_str(raw).expect("API key definition should parse.");
		let Auth::ApiKey(api_key) = &definition.auth else {
			panic!("Definition should use an API key.");
		};

		assert_eq!(
			api_key.placement,
			ApiKeyPlacement::Header { name: "X-Api-Key".into(), prefix: String::new() }
		);
	}

	#[test]
	fn non_http_endpoints_are_rejected() {
		let mut definition = ConnectorDefinition {
			display_name: "Bad".into(),
			description: String::new(),
			logo: None,
			auth: Auth::OAuth2(AuthOAuth2 {
				client_id: Some(ValueSource::value("cid")),
				client_secret: None,
				client_auth_method: ClientAuthMethod::default(),
				scopes: Vec::new(),
				authorization: Some(AuthorizationEndpoint {
					endpoint: Url::parse("ftp://example.com/auth").expect("URL should parse."),
					query_overrides: BTreeMap::new(),
				}),
				token: None,
				revocation: None,
			}),
		};

		assert!(matches!(
			definition.validate(),
			Err(ConfigError::InsecureEndpoint { endpoint: "authorization", .. })
		));

		definition.auth = Auth::NoAuth;

		assert!(definition.validate().is_ok());
	}
}
