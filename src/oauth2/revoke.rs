//! Upstream token revocation (RFC 7009).

// crates.io
use reqwest::header::ACCEPT;
// self
use super::flow;
use crate::{
	_prelude::*,
	config::duration,
	error::ProtocolError,
	http::{self, ResponseMetadata},
	oauth2::OAuth2Connection,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

const TARGET: &str = "revocation endpoint";

impl OAuth2Connection {
	/// Returns true when the connector declares a revocation endpoint.
	pub fn supports_revoke_refresh_token(&self) -> bool {
		self.auth().revocation.is_some()
	}

	/// Revokes the connection's current credentials at the provider.
	///
	/// The refresh token is revoked when one exists, otherwise the access token. Succeeds without
	/// any network call when the connector has no revocation endpoint or the connection has no
	/// token.
	pub async fn revoke_refresh_token(&self) -> Result<()> {
		const KIND: FlowKind = FlowKind::Revoke;

		let Some(revocation) = self.auth().revocation.as_ref() else {
			return Ok(());
		};
		let span = FlowSpan::new(KIND, "revoke_refresh_token");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let broker = self.broker();
				let Some(current) = broker.tokens.get_current_token(self.id()).await? else {
					return Ok(());
				};
				let access_token = current.access_token(broker.encrypt.as_ref())?;
				let refresh_token = current.refresh_token(broker.encrypt.as_ref())?;
				let mut form = BTreeMap::new();

				match &refresh_token {
					Some(refresh) => {
						form.insert("token".to_owned(), refresh.expose().to_owned());
						form.insert("token_type_hint".to_owned(), "refresh_token".to_owned());
					},
					None => {
						form.insert("token".to_owned(), access_token.expose().to_owned());
						form.insert("token_type_hint".to_owned(), "access_token".to_owned());
					},
				}

				for (key, value) in &revocation.form_overrides {
					form.insert(key.clone(), value.clone());
				}

				let mut url = revocation.endpoint.clone();

				flow::apply_query_overrides(&mut url, &revocation.query_overrides);

				let response = broker
					.http_client
					.post(url)
					.header(ACCEPT, "application/json")
					.bearer_auth(access_token.expose())
					.timeout(duration::to_std(self.refresh_timeout()))
					.form(&form)
					.send()
					.await
					.map_err(|e| http::map_reqwest_error(TARGET, e))?;
				let meta = ResponseMetadata::from_response(&response);

				if response.status().is_success() {
					#[cfg(feature = "tracing")]
					tracing::info!(connection_id = %self.id(), "upstream credentials revoked");

					return Ok(());
				}

				let body = response.text().await.unwrap_or_default();

				Err(ProtocolError::UnexpectedResponse {
					endpoint: "revocation",
					message: if body.is_empty() {
						format!("HTTP {}", meta.status.unwrap_or_default())
					} else {
						body
					},
					status: meta.status,
					retry_after: meta.retry_after,
				}
				.into())
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}
}
