//! Authorization leg: state issuance, public redirect URLs, and third-party authorization URLs.

// self
use crate::{
	_prelude::*,
	connection::ConnectionState,
	id::{ActorId, StateId},
	oauth2::OAuth2Connection,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

impl OAuth2Connection {
	/// Issues an OAuth2 state for `actor` and returns the public redirect URL that starts the flow.
	///
	/// The URL points at this proxy's `/oauth2/redirect` endpoint and carries the state id plus a
	/// short-lived signed actor token, so the redirect leg can run without a session.
	pub async fn set_state_and_generate_public_url(
		&self,
		actor: &ActorId,
		return_to_url: Url,
	) -> Result<Url> {
		const KIND: FlowKind = FlowKind::Authorize;

		let span = FlowSpan::new(KIND, "set_state_and_generate_public_url");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let broker = self.broker();

				self.authorization_endpoint()?;
				self.client_id()?;

				let connection = self.connection();
				let state = broker
					.states
					.issue(
						actor.clone(),
						connection.connector_id.clone(),
						connection.connector_version,
						connection.id,
						return_to_url,
					)
					.await?;

				broker
					.connections
					.set_connection_state(connection.id, ConnectionState::Authorizing)
					.await?
					.ok_or_else(|| Error::not_found("connection"))?;

				let auth_token =
					broker.actor_signer.sign(actor, broker.config.oauth2.actor_token_ttl)?;
				let mut url = broker.config.redirect_endpoint()?;

				url.query_pairs_mut()
					.append_pair("state_id", &state.id.to_string())
					.append_pair("auth_token", &auth_token);

				#[cfg(feature = "tracing")]
				tracing::debug!(
					connection_id = %connection.id,
					state_id = %state.id,
					"issued OAuth2 state"
				);

				Ok(url)
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}

	/// Builds the third-party authorization URL for a previously issued state.
	///
	/// Standard parameters are written first; connector query overrides replace or extend them.
	pub fn generate_auth_url(&self, state_id: StateId) -> Result<Url> {
		let authorization = self.authorization_endpoint()?;
		let client_id = self.client_id()?;
		let redirect_uri = self.broker().config.callback_endpoint()?;
		let mut url = authorization.endpoint.clone();

		{
			let mut pairs = url.query_pairs_mut();

			pairs
				.append_pair("response_type", "code")
				.append_pair("client_id", client_id.expose())
				.append_pair("redirect_uri", redirect_uri.as_str());

			if let Some(scope) = self.auth().scope_param() {
				pairs.append_pair("scope", &scope);
			}

			pairs.append_pair("state", &state_id.to_string());
		}

		apply_query_overrides(&mut url, &authorization.query_overrides);

		Ok(url)
	}
}

/// Replaces query parameters named in `overrides` and appends the rest.
pub(crate) fn apply_query_overrides(url: &mut Url, overrides: &BTreeMap<String, String>) {
	if overrides.is_empty() {
		return;
	}

	let mut pairs = url.query_pairs().into_owned().collect::<Vec<(String, String)>>();

	pairs.retain(|(key, _)| !overrides.contains_key(key));
	pairs.extend(overrides.iter().map(|(key, value)| (key.clone(), value.clone())));

	url.query_pairs_mut().clear().extend_pairs(pairs);
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn query_overrides_replace_and_extend() {
		let mut url = Url::parse("https://idp.example.com/auth?prompt=login&access_type=online")
			.expect("URL should parse.");
		let overrides = BTreeMap::from([
			("access_type".to_owned(), "offline".to_owned()),
			("include_granted_scopes".to_owned(), "true".to_owned()),
		]);

		apply_query_overrides(&mut url, &overrides);

		let pairs = url.query_pairs().into_owned().collect::<BTreeMap<_, _>>();

		assert_eq!(pairs.get("prompt").map(String::as_str), Some("login"));
		assert_eq!(pairs.get("access_type").map(String::as_str), Some("offline"));
		assert_eq!(pairs.get("include_granted_scopes").map(String::as_str), Some("true"));
		assert_eq!(url.query_pairs().count(), 3);
	}

	#[test]
	fn empty_overrides_leave_the_url_untouched() {
		let mut url = Url::parse("https://idp.example.com/auth").expect("URL should parse.");

		apply_query_overrides(&mut url, &BTreeMap::new());

		assert_eq!(url.as_str(), "https://idp.example.com/auth");
	}
}
