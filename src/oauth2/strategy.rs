//! Per-provider hooks for token endpoint calls.
//!
//! A strategy may add form fields to outgoing token requests and decides which rejections mean
//! the grant or the client credentials are no longer usable.

// self
use crate::_prelude::*;

/// Grant used at the token endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenGrant {
	/// `grant_type=authorization_code`.
	AuthorizationCode,
	/// `grant_type=refresh_token`.
	RefreshToken,
}
impl TokenGrant {
	/// Returns the `grant_type` form value.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::AuthorizationCode => "authorization_code",
			Self::RefreshToken => "refresh_token",
		}
	}
}

/// Hooks a connector's token exchanges run through.
pub trait ProviderStrategy: Send + Sync {
	/// Decides what a rejected token request means for the connection.
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;

	/// Adds provider-specific form parameters after connector overrides were applied.
	fn augment_token_request(&self, _grant: TokenGrant, _form: &mut BTreeMap<String, String>) {}
}

/// How a token endpoint rejection is surfaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// The authorization code or refresh token is no longer accepted; surfaced as
	/// [`Error::InvalidGrant`].
	InvalidGrant,
	/// The connector's client credentials were rejected; surfaced as [`Error::InvalidClient`].
	InvalidClient,
	/// Anything else; surfaced as an unexpected provider response.
	Other,
}

/// What the token endpoint sent back, reduced to plain data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// Grant of the failing request.
	pub grant_type: TokenGrant,
	/// HTTP status code returned by the provider.
	pub http_status: Option<u16>,
	/// OAuth `error` field of a JSON error body.
	pub oauth_error: Option<String>,
	/// OAuth `error_description` field of a JSON error body.
	pub error_description: Option<String>,
	/// Leading part of a body that is not an OAuth error document.
	pub body_preview: Option<String>,
}
impl ProviderErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Creates an empty context for `grant_type`.
	pub fn new(grant_type: TokenGrant) -> Self {
		Self {
			grant_type,
			http_status: None,
			oauth_error: None,
			error_description: None,
			body_preview: None,
		}
	}

	/// Sets the HTTP status code.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Sets the OAuth `error` code.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Sets the OAuth `error_description`.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Keeps at most [`Self::BODY_PREVIEW_LIMIT`] characters of a raw body.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		let body = body.into();
		let mut preview = body.chars().take(Self::BODY_PREVIEW_LIMIT).collect::<String>();

		if preview.len() < body.len() {
			preview.push('…');
		}

		self.body_preview = Some(preview);

		self
	}
}

/// Reads the OAuth `error` code when present, otherwise looks for one in a raw body, and falls
/// back to the status code (`401` means the client was rejected).
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		ctx.oauth_error
			.as_deref()
			.map(classify_code)
			.or_else(|| ctx.body_preview.as_deref().and_then(find_code))
			.unwrap_or(match ctx.http_status {
				Some(401) => ProviderErrorKind::InvalidClient,
				_ => ProviderErrorKind::Other,
			})
	}
}

// Error codes of RFC 6749 section 5.2 that change what the connection can do.
const CLASSIFIED_CODES: [&str; 3] = ["invalid_grant", "invalid_client", "unauthorized_client"];

fn classify_code(code: &str) -> ProviderErrorKind {
	match code {
		"invalid_grant" => ProviderErrorKind::InvalidGrant,
		"invalid_client" | "unauthorized_client" => ProviderErrorKind::InvalidClient,
		_ => ProviderErrorKind::Other,
	}
}

fn find_code(body: &str) -> Option<ProviderErrorKind> {
	let body = body.to_ascii_lowercase();

	CLASSIFIED_CODES.into_iter().find(|code| body.contains(code)).map(classify_code)
}
