//! Framework-agnostic handlers behind `GET /oauth2/redirect` and `GET /oauth2/callback`.
//!
//! Both handlers always answer with a [`Redirect`]. Failures land on the configured error page with
//! a coarse `error` code; internal details are only logged.

// self
use crate::{
	_prelude::*,
	broker::Broker,
	id::{ActorId, StateId},
	oauth2::StatePresenter,
};

/// A 302 response produced by the redirect endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redirect {
	/// `Location` header value.
	pub location: Url,
}
impl Redirect {
	/// HTTP status of every redirect.
	pub const STATUS: u16 = 302;

	/// Returns the HTTP status code.
	pub fn status(&self) -> u16 {
		Self::STATUS
	}
}

/// Query of `GET /oauth2/redirect`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectQuery {
	/// State issued when the connection was initiated.
	pub state_id: String,
	/// Signed actor token; used when the request carries no authenticated actor.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub auth_token: Option<String>,
}

/// Query of `GET /oauth2/callback`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackQuery {
	/// Authorization code.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code: Option<String>,
	/// Echoed state id.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub state: Option<String>,
	/// Provider error code.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	/// Provider error description.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error_description: Option<String>,
}

impl Broker {
	/// Handles the public redirect leg.
	///
	/// The actor is either supplied by the host application or recovered from the signed
	/// `auth_token`. The state is validated (not consumed) and the user is sent to the third-party
	/// authorization URL.
	pub async fn handle_oauth2_redirect(
		&self,
		actor: Option<&ActorId>,
		query: &RedirectQuery,
	) -> Redirect {
		match self.oauth2_redirect(actor, query).await {
			Ok(location) => Redirect { location },
			Err(e) => self.error_redirect("redirect", &e),
		}
	}

	/// Handles the third-party callback leg.
	///
	/// Redeems the state, exchanges the code, and sends the user to the state's return URL.
	/// Provider errors and a missing code go to the error page without consuming the state.
	pub async fn handle_oauth2_callback(
		&self,
		actor: Option<&ActorId>,
		query: &CallbackQuery,
	) -> Redirect {
		match self.oauth2_callback(actor, query).await {
			Ok(location) => Redirect { location },
			Err(e) => self.error_redirect("callback", &e),
		}
	}

	async fn oauth2_redirect(&self, actor: Option<&ActorId>, query: &RedirectQuery) -> Result<Url> {
		let state_id = parse_state_id(&query.state_id)?;
		let actor = match (actor, query.auth_token.as_deref()) {
			(Some(actor), _) => actor.clone(),
			(None, Some(token)) => self.actor_signer.verify(token)?,
			(None, None) => return Err(Error::Unauthorized),
		};
		let state =
			self.states.mark_redirect_verified(state_id, StatePresenter::Actor(&actor)).await?;
		let connection = self.oauth2_connection(state.connection_id).await?;

		connection.generate_auth_url(state.id)
	}

	async fn oauth2_callback(&self, actor: Option<&ActorId>, query: &CallbackQuery) -> Result<Url> {
		if let Some(error) = &query.error {
			#[cfg(feature = "tracing")]
			tracing::info!(
				error = %error,
				description = query.error_description.as_deref(),
				"provider returned an authorization error"
			);

			return Err(Error::bad_request(format!("provider returned `{error}`")));
		}

		let code = query
			.code
			.as_deref()
			.filter(|code| !code.is_empty())
			.ok_or_else(|| Error::bad_request("callback is missing `code`"))?;
		let state_id = parse_state_id(query.state.as_deref().unwrap_or_default())?;
		let presenter = match actor {
			Some(actor) => StatePresenter::Actor(actor),
			None => StatePresenter::Anonymous,
		};
		let (state, connection) = self.redeem_oauth2_state(state_id, presenter).await?;

		connection.exchange_authorization_code(code).await?;

		Ok(state.return_to_url)
	}

	fn error_redirect(&self, leg: &'static str, err: &Error) -> Redirect {
		#[cfg(feature = "tracing")]
		tracing::warn!(leg, error = %err, "OAuth2 browser flow failed");
		#[cfg(not(feature = "tracing"))]
		let _ = leg;

		let mut location = self.config.error_page_url.clone();

		location.query_pairs_mut().append_pair("error", error_code(err));

		Redirect { location }
	}
}

fn parse_state_id(raw: &str) -> Result<StateId> {
	raw.parse().map_err(|_| Error::not_found("OAuth2 state"))
}

fn error_code(err: &Error) -> &'static str {
	match err {
		Error::NotFound { .. } => "invalid_state",
		Error::Unauthorized | Error::ActorToken(_) => "unauthorized",
		Error::BadRequest { .. } => "bad_request",
		Error::InvalidGrant { .. } | Error::InvalidClient { .. } | Error::Protocol(_) =>
			"token_exchange_failed",
		_ => "server_error",
	}
}
