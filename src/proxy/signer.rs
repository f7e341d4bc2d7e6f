//! Credential injection for outbound proxied requests.

// crates.io
use reqwest::{
	Request,
	header::{AUTHORIZATION, HeaderName, HeaderValue},
};
// self
use crate::{
	_prelude::*,
	connectors::{ApiKeyPlacement, AuthApiKey},
	error::ConfigError,
	oauth2::OAuth2Connection,
	secret::Secret,
};

/// Future returned by [`RequestSigner::sign`].
pub type SignFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + 'a + Send>>;

/// Attaches connection credentials to an outbound request.
///
/// Signers replace any credential the caller supplied under the same header or query name.
pub trait RequestSigner
where
	Self: Send + Sync,
{
	/// Mutates `request` so it carries the connection's credentials.
	fn sign<'a>(&'a self, request: &'a mut Request) -> SignFuture<'a>;
}

impl RequestSigner for OAuth2Connection {
	fn sign<'a>(&'a self, request: &'a mut Request) -> SignFuture<'a> {
		Box::pin(async move {
			let token = self.get_valid_token().await?;
			let access_token = token.access_token(self.broker().encrypt.as_ref())?;
			let value = sensitive_value(&format!("Bearer {}", access_token.expose())).map_err(|_| {
				Error::Unprocessable { reason: "stored access token is not header-safe".into() }
			})?;

			request.headers_mut().insert(AUTHORIZATION, value);

			Ok(())
		})
	}
}

/// Injects a static API key.
pub struct ApiKeyProxy {
	key: Secret,
	placement: ApiKeyPlacement,
}
impl ApiKeyProxy {
	/// Resolves the key and validates the placement.
	pub fn new(auth: &AuthApiKey) -> Result<Self, ConfigError> {
		let key = auth.key.resolve()?;

		if let ApiKeyPlacement::Header { name, prefix } = &auth.placement {
			let invalid = || ConfigError::InvalidHeader { name: name.clone() };

			HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
			sensitive_value(&format!("{prefix}{}", key.expose())).map_err(|_| invalid())?;
		}

		Ok(Self { key, placement: auth.placement.clone() })
	}
}
impl Debug for ApiKeyProxy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ApiKeyProxy").field("placement", &self.placement).finish()
	}
}
impl RequestSigner for ApiKeyProxy {
	fn sign<'a>(&'a self, request: &'a mut Request) -> SignFuture<'a> {
		Box::pin(async move {
			match &self.placement {
				ApiKeyPlacement::Header { name, prefix } => {
					let invalid = || ConfigError::InvalidHeader { name: name.clone() };
					let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
					let value = sensitive_value(&format!("{prefix}{}", self.key.expose()))
						.map_err(|_| invalid())?;

					request.headers_mut().insert(name, value);
				},
				ApiKeyPlacement::Query { param } => {
					let url = request.url_mut();
					let kept = url
						.query_pairs()
						.into_owned()
						.filter(|(key, _)| key != param)
						.collect::<Vec<_>>();

					url.query_pairs_mut()
						.clear()
						.extend_pairs(kept)
						.append_pair(param, self.key.expose());
				},
			}

			Ok(())
		})
	}
}

/// Forwards requests unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAuthProxy;
impl RequestSigner for NoAuthProxy {
	fn sign<'a>(&'a self, _request: &'a mut Request) -> SignFuture<'a> {
		Box::pin(async { Ok(()) })
	}
}

fn sensitive_value(raw: &str) -> Result<HeaderValue, reqwest::header::InvalidHeaderValue> {
	let mut value = HeaderValue::from_str(raw)?;

	value.set_sensitive(true);

	Ok(value)
}
