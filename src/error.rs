//! Proxy-level error types shared across connectors, OAuth2 flows, stores, and dispatch.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem; never retried.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Secret material could not be encrypted or decrypted.
	#[error(transparent)]
	Crypto(#[from] crate::crypto::CryptoError),
	/// Third-party endpoint misbehaved (non-2xx, malformed body, missing fields).
	#[error(transparent)]
	Protocol(#[from] ProtocolError),
	/// Transport failure (DNS, TCP, TLS, timeouts).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// The per-connection lock could not be acquired or released.
	#[error(transparent)]
	Lock(#[from] crate::lock::LockError),
	/// An actor token could not be issued or verified.
	#[error(transparent)]
	ActorToken(#[from] crate::actor::ActorTokenError),

	/// The caller supplied malformed input.
	#[error("Bad request: {reason}.")]
	BadRequest {
		/// Human-readable reason.
		reason: String,
	},
	/// The caller is not authenticated.
	#[error("Authentication is required.")]
	Unauthorized,
	/// The requested record does not exist.
	///
	/// Expired, mismatched, and absent OAuth2 states all surface as this variant so callers cannot
	/// learn which case occurred.
	#[error("{what} was not found.")]
	NotFound {
		/// Kind of record that was looked up.
		what: &'static str,
	},
	/// The request is well-formed but cannot be served in the current state.
	#[error("Unprocessable: {reason}.")]
	Unprocessable {
		/// Human-readable reason.
		reason: String,
	},
	/// The connector's auth type has no proxy implementation.
	#[error("Auth type `{auth_type}` is not implemented.")]
	NotImplemented {
		/// Declared auth type label.
		auth_type: String,
	},
	/// Provider rejected the grant (e.g., bad code or refresh token).
	#[error("Provider rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider- or proxy-supplied reason string.
		reason: String,
	},
	/// Client authentication failed or credentials are malformed.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider- or proxy-supplied reason string.
		reason: String,
	},
}
impl Error {
	/// HTTP status class used when surfacing this error through an API layer.
	pub fn status_code(&self) -> u16 {
		match self {
			Self::BadRequest { .. } => 400,
			Self::Unauthorized | Self::ActorToken(_) => 401,
			Self::NotFound { .. } => 404,
			Self::Unprocessable { .. } => 422,
			Self::Protocol(ProtocolError::MissingRefreshToken) => 422,
			_ => 500,
		}
	}

	/// Returns true when the error signals an auth type without a proxy implementation.
	pub fn is_not_implemented(&self) -> bool {
		matches!(self, Self::NotImplemented { .. })
	}

	pub(crate) fn not_found(what: &'static str) -> Self {
		Self::NotFound { what }
	}

	pub(crate) fn bad_request(reason: impl Into<String>) -> Self {
		Self::BadRequest { reason: reason.into() }
	}
}

/// Configuration and validation failures; fatal and never retried.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Configuration document could not be parsed.
	#[error("Configuration could not be parsed.")]
	Parse(#[from] toml::de::Error),
	/// Configuration file could not be read.
	#[error("Configuration file `{path}` could not be read.")]
	Read {
		/// Offending path.
		path: String,
		/// Underlying IO failure.
		#[source]
		source: std::io::Error,
	},
	/// A value source referenced an unset environment variable.
	#[error("Environment variable `{name}` is not set.")]
	MissingEnvVar {
		/// Variable name.
		name: String,
	},
	/// A value source referenced an unreadable file.
	#[error("Secret file `{path}` could not be read.")]
	SecretFile {
		/// Offending path.
		path: String,
		/// Underlying IO failure.
		#[source]
		source: std::io::Error,
	},
	/// A duration setting is zero or negative.
	#[error("`{field}` must be positive.")]
	NonPositiveDuration {
		/// Configuration key that failed validation.
		field: &'static str,
	},
	/// The lock backoff ceiling is below its starting delay.
	#[error("`max_backoff_ms` must not be lower than `initial_backoff_ms`.")]
	BackoffOutOfOrder,
	/// Key material is not valid base64 or has the wrong length.
	#[error("Encryption key must be 32 bytes of base64-encoded material.")]
	InvalidKey,
	/// A URL could not be built or parsed.
	#[error("URL `{value}` is invalid.")]
	InvalidUrl {
		/// Offending input.
		value: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Endpoint uses a scheme other than http(s).
	#[error("The {endpoint} endpoint must use http or https: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Connector definition could not be (de)serialized.
	#[error("Connector definition is invalid.")]
	InvalidDefinition(#[source] serde_json::Error),
	/// The connector does not use OAuth2.
	#[error("Connector `{connector}` does not use OAuth2 authentication.")]
	NotOAuth2 {
		/// Connector identifier.
		connector: String,
	},
	/// OAuth2 client identifier is not configured.
	#[error("Connector `{connector}` has no OAuth2 client id configured.")]
	MissingClientId {
		/// Connector identifier.
		connector: String,
	},
	/// OAuth2 client secret is not configured.
	#[error("Connector `{connector}` has no OAuth2 client secret configured.")]
	MissingClientSecret {
		/// Connector identifier.
		connector: String,
	},
	/// Required endpoint is not configured.
	#[error("Connector `{connector}` has no {endpoint} endpoint configured.")]
	MissingEndpoint {
		/// Connector identifier.
		connector: String,
		/// Endpoint label.
		endpoint: &'static str,
	},
	/// Attempted to change a connector version that is no longer a draft.
	#[error("Connector `{connector}` version {version} is not a draft and cannot change.")]
	ImmutableVersion {
		/// Connector identifier.
		connector: String,
		/// Version number.
		version: u64,
	},
	/// A connector declares a header name or value that HTTP cannot carry.
	#[error("Connector header `{name}` is not a valid HTTP header.")]
	InvalidHeader {
		/// Offending header name.
		name: String,
	},
	/// Connector version numbers start at one.
	#[error("Connector version must be a positive integer.")]
	InvalidVersion,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}

/// Failures caused by third-party responses.
#[derive(Debug, ThisError)]
pub enum ProtocolError {
	/// Provider returned an unexpected response.
	#[error("{endpoint} endpoint returned an unexpected response: {message}.")]
	UnexpectedResponse {
		/// Endpoint label (token, revocation).
		endpoint: &'static str,
		/// Provider- or proxy-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with a body that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint response omitted the access token.
	#[error("Token endpoint response is missing access_token.")]
	MissingAccessToken,
	/// The stored token has no refresh token (access-only grant).
	#[error("The stored OAuth2 token has no refresh token.")]
	MissingRefreshToken,
	/// Token endpoint returned a negative `expires_in`.
	#[error("The expires_in value must not be negative.")]
	NegativeExpiresIn,
}

/// Transport-level failures (network, IO, deadlines).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {target}.")]
	Network {
		/// Short label of the call target.
		target: &'static str,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The call did not finish before its deadline.
	#[error("Request to {target} timed out.")]
	Timeout {
		/// Short label of the call target.
		target: &'static str,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while streaming a response.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(target: &'static str, src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { target, source: Box::new(src) }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::StoreError;

	#[test]
	fn store_error_converts_into_error_with_source() {
		let store_error = StoreError::Backend { message: "database unreachable".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));

		let source = StdError::source(&error).expect("Error should expose the store error.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn status_codes_follow_api_classes() {
		assert_eq!(Error::bad_request("x").status_code(), 400);
		assert_eq!(Error::Unauthorized.status_code(), 401);
		assert_eq!(Error::not_found("OAuth2 state").status_code(), 404);
		assert_eq!(Error::Unprocessable { reason: "no token".into() }.status_code(), 422);
		assert_eq!(Error::NotImplemented { auth_type: "saml".into() }.status_code(), 500);
		assert!(Error::NotImplemented { auth_type: "saml".into() }.is_not_implemented());
	}
}
