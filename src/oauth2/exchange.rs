//! Token endpoint calls shared by the authorization-code and refresh grants.

// crates.io
use oauth2::basic::BasicErrorResponse;
use reqwest::header::ACCEPT;
// self
use super::flow;
use crate::{
	_prelude::*,
	config::duration,
	connection::ConnectionState,
	connectors::ClientAuthMethod,
	error::{ConfigError, ProtocolError},
	http::{self, ResponseMetadata},
	oauth2::{
		OAuth2Connection, OAuth2Token, ProviderErrorContext, ProviderErrorKind, TokenCredentials,
		TokenGrant,
	},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	secret::Secret,
};

const TARGET: &str = "token endpoint";

#[derive(Deserialize)]
struct TokenResponse {
	#[serde(default)]
	access_token: Option<String>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	expires_in: Option<ExpiresIn>,
	#[serde(default)]
	scope: Option<String>,
}

// Some providers send `expires_in` as a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
	Number(i64),
	Text(String),
}
impl ExpiresIn {
	fn seconds(&self) -> Option<i64> {
		match self {
			Self::Number(secs) => Some(*secs),
			Self::Text(raw) => raw.trim().parse().ok(),
		}
	}
}

impl OAuth2Connection {
	/// Exchanges an authorization code, stores the resulting token, and marks the connection
	/// ready.
	///
	/// Runs under the connection's refresh lock so the first token never races a refresh.
	pub async fn exchange_authorization_code(&self, code: &str) -> Result<OAuth2Token> {
		const KIND: FlowKind = FlowKind::Callback;

		let span = FlowSpan::new(KIND, "exchange_authorization_code");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				if code.is_empty() {
					return Err(Error::bad_request("authorization code is empty"));
				}

				let token = self.with_token_lock(|| self.exchange_locked(code)).await?;

				#[cfg(feature = "tracing")]
				tracing::info!(
					connection_id = %self.id(),
					token_id = %token.id,
					"connection authorized"
				);

				Ok(token)
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}

	async fn exchange_locked(&self, code: &str) -> Result<OAuth2Token> {
		let broker = self.broker();
		let redirect_uri = broker.config.callback_endpoint()?;
		let mut credentials = request_token(
			self,
			TokenGrant::AuthorizationCode,
			&[("code", code), ("redirect_uri", redirect_uri.as_str())],
		)
		.await?;

		if credentials.scopes.is_empty() {
			credentials.scopes = self.auth().scopes.iter().map(|scope| scope.id.clone()).collect();
		}

		let token = OAuth2Token::seal(broker.encrypt.as_ref(), self.id(), credentials)?;

		broker.tokens.insert_token(token.clone()).await?;
		broker
			.connections
			.set_connection_state(self.id(), ConnectionState::Ready)
			.await?
			.ok_or_else(|| Error::not_found("connection"))?;

		Ok(token)
	}
}

/// Performs one token endpoint request for `grant`.
///
/// `params` carries the grant-specific form fields; client authentication, connector form
/// overrides, and strategy augmentation are applied on top, in that order.
pub(crate) async fn request_token(
	conn: &OAuth2Connection,
	grant: TokenGrant,
	params: &[(&str, &str)],
) -> Result<TokenCredentials> {
	let broker = conn.broker();
	let endpoint = conn.token_endpoint()?;
	let client_id = conn.client_id()?;
	let client_secret = conn.client_secret()?;
	let mut form = BTreeMap::new();

	form.insert("grant_type".to_owned(), grant.as_str().to_owned());

	for (key, value) in params {
		form.insert((*key).to_owned(), (*value).to_owned());
	}

	let mut url = endpoint.endpoint.clone();

	flow::apply_query_overrides(&mut url, &endpoint.query_overrides);

	let mut request = broker
		.http_client
		.post(url)
		.header(ACCEPT, "application/json")
		.timeout(duration::to_std(conn.refresh_timeout()));

	match conn.auth().client_auth_method {
		ClientAuthMethod::ClientSecretPost => {
			form.insert("client_id".to_owned(), client_id.expose().to_owned());

			if let Some(secret) = &client_secret {
				form.insert("client_secret".to_owned(), secret.expose().to_owned());
			}
		},
		ClientAuthMethod::ClientSecretBasic => {
			let secret = client_secret.ok_or_else(|| ConfigError::MissingClientSecret {
				connector: conn.connection().connector_id.to_string(),
			})?;

			request = request.basic_auth(client_id.expose(), Some(secret.expose()));
		},
	}

	for (key, value) in &endpoint.form_overrides {
		form.insert(key.clone(), value.clone());
	}

	broker.strategy.augment_token_request(grant, &mut form);

	let response =
		request.form(&form).send().await.map_err(|e| http::map_reqwest_error(TARGET, e))?;
	let meta = ResponseMetadata::from_response(&response);
	let body = response.bytes().await.map_err(|e| http::map_reqwest_error(TARGET, e))?;

	if !meta.status.is_some_and(|status| (200..300).contains(&status)) {
		return Err(map_error_response(conn, grant, &meta, &body));
	}

	parse_token_response(&body, meta.status)
}

fn map_error_response(
	conn: &OAuth2Connection,
	grant: TokenGrant,
	meta: &ResponseMetadata,
	body: &[u8],
) -> Error {
	let mut ctx = ProviderErrorContext::new(grant);

	if let Some(status) = meta.status {
		ctx = ctx.with_http_status(status);
	}

	match serde_json::from_slice::<BasicErrorResponse>(body) {
		Ok(parsed) => {
			ctx = ctx.with_oauth_error(parsed.error().as_ref().to_string());

			if let Some(description) = parsed.error_description() {
				ctx = ctx.with_error_description(description.clone());
			}
		},
		Err(_) =>
			if !body.is_empty() {
				ctx = ctx.with_body_preview(String::from_utf8_lossy(body).into_owned());
			},
	}

	let reason = ctx
		.error_description
		.clone()
		.or_else(|| ctx.oauth_error.clone())
		.or_else(|| ctx.body_preview.clone())
		.unwrap_or_else(|| format!("HTTP {}", meta.status.unwrap_or_default()));

	#[cfg(feature = "tracing")]
	tracing::warn!(
		connection_id = %conn.id(),
		grant = grant.as_str(),
		status = meta.status,
		oauth_error = ctx.oauth_error.as_deref(),
		"token endpoint rejected the request"
	);

	match conn.broker().strategy.classify_token_error(&ctx) {
		ProviderErrorKind::InvalidGrant => Error::InvalidGrant { reason },
		ProviderErrorKind::InvalidClient => Error::InvalidClient { reason },
		ProviderErrorKind::Other => ProtocolError::UnexpectedResponse {
			endpoint: "token",
			message: reason,
			status: meta.status,
			retry_after: meta.retry_after,
		}
		.into(),
	}
}

// Scopes stay empty when the provider omits `scope`; callers fill them in per grant.
fn parse_token_response(body: &[u8], status: Option<u16>) -> Result<TokenCredentials> {
	let mut deserializer = serde_json::Deserializer::from_slice(body);
	let parsed: TokenResponse = serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|source| ProtocolError::TokenResponseParse { source, status })?;
	let access_token = parsed
		.access_token
		.filter(|token| !token.is_empty())
		.ok_or(ProtocolError::MissingAccessToken)?;
	let expires_at = match parsed.expires_in.as_ref().and_then(ExpiresIn::seconds) {
		Some(secs) if secs < 0 => return Err(ProtocolError::NegativeExpiresIn.into()),
		Some(secs) => Some(OffsetDateTime::now_utc() + Duration::seconds(secs)),
		None => None,
	};
	let scopes = parsed
		.scope
		.as_deref()
		.map(|granted| granted.split_whitespace().map(str::to_owned).collect())
		.unwrap_or_default();

	Ok(TokenCredentials {
		access_token: Secret::new(access_token),
		refresh_token: parsed.refresh_token.filter(|token| !token.is_empty()).map(Secret::new),
		expires_at,
		scopes,
	})
}
