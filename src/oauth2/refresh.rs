//! Refresh token orchestration with singleflight guards, a distributed lock, and chain rotation.
//!
//! [`OAuth2Connection::refresh_access_token`] first takes an in-process guard per connection so
//! concurrent callers in one process queue up locally, then the distributed refresh lock so
//! replicas do the same. Under both, the current token is re-read; if a peer already refreshed it,
//! the call is a no-op. Otherwise a `grant_type=refresh_token` request is made and the result is
//! appended to the connection's token chain with a compare-and-swap on the current row.

mod metrics;

pub use metrics::RefreshMetrics;

// self
use super::exchange;
use crate::{
	_prelude::*,
	error::ProtocolError,
	oauth2::{OAuth2Connection, OAuth2Token, TokenGrant},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::CompareAndSwapOutcome,
};

/// When a refresh should actually call the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshMode {
	/// Only when the access token is expired.
	IfExpired,
	/// When the access token expires within the window.
	ExpiringWithin(Duration),
	/// Always.
	Force,
}
impl RefreshMode {
	/// Returns true when `token` must be refreshed at `now` under this mode.
	pub fn requires_refresh(self, token: &OAuth2Token, now: OffsetDateTime) -> bool {
		match self {
			Self::IfExpired => token.is_expired_at(now),
			Self::ExpiringWithin(window) => token.expires_within(now, window),
			Self::Force => true,
		}
	}
}

/// Result of a refresh request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
	/// A new row was appended to the token chain.
	Refreshed(OAuth2Token),
	/// The current token already satisfied the request (possibly refreshed by a peer).
	Fresh(OAuth2Token),
}
impl RefreshOutcome {
	/// Returns the resulting current token.
	pub fn token(&self) -> &OAuth2Token {
		match self {
			Self::Refreshed(token) | Self::Fresh(token) => token,
		}
	}

	/// Consumes the outcome and returns the token.
	pub fn into_token(self) -> OAuth2Token {
		match self {
			Self::Refreshed(token) | Self::Fresh(token) => token,
		}
	}

	/// Returns true when this call appended a new row.
	pub fn is_refreshed(&self) -> bool {
		matches!(self, Self::Refreshed(_))
	}
}

impl OAuth2Connection {
	/// Returns the current token, refreshing it first when it is expired.
	///
	/// Fails with [`Error::Unprocessable`] when the connection has no token yet.
	pub async fn get_valid_token(&self) -> Result<OAuth2Token> {
		let now = OffsetDateTime::now_utc();
		let current = self.current_token().await?;

		if !RefreshMode::IfExpired.requires_refresh(&current, now) {
			return Ok(current);
		}

		Ok(self.refresh_access_token(RefreshMode::IfExpired).await?.into_token())
	}

	/// Refreshes the access token under the per-connection locks.
	///
	/// Dropping the returned future releases both locks; a refresh that was already sent to the
	/// provider may still complete upstream, but nothing is persisted.
	pub async fn refresh_access_token(&self, mode: RefreshMode) -> Result<RefreshOutcome> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "refresh_access_token");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let broker = self.broker();
				let metrics = broker.refresh_metrics.clone();

				metrics.record_attempt();

				let result = self.with_token_lock(|| self.refresh_locked(mode)).await;

				match &result {
					Ok(RefreshOutcome::Refreshed(_)) => metrics.record_success(),
					Ok(RefreshOutcome::Fresh(_)) => {
						metrics.record_noop();
						metrics.record_success();
					},
					Err(_) => metrics.record_failure(),
				}

				result
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}

	/// Runs `f` under this connection's singleflight guard and distributed refresh lock.
	///
	/// Every write to the token chain goes through here, whether it comes from a callback or a
	/// refresh.
	pub(crate) async fn with_token_lock<T, F>(&self, f: impl FnOnce() -> F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		let broker = self.broker();
		let guard = broker.flow_guard(self.id());
		let _singleflight = guard.lock().await;
		let lock = broker.refresh_lock.acquire(self.refresh_lock_key()).await?;
		let result = f().await;

		match lock.unlock().await {
			Ok(true) => {},
			Ok(false) => {
				#[cfg(feature = "tracing")]
				tracing::warn!(connection_id = %self.id(), "refresh lock lease was lost");
			},
			Err(_e) => {
				#[cfg(feature = "tracing")]
				tracing::warn!(
					connection_id = %self.id(),
					error = %_e,
					"failed to release refresh lock"
				);
			},
		}

		result
	}

	async fn current_token(&self) -> Result<OAuth2Token> {
		self.broker().tokens.get_current_token(self.id()).await?.ok_or_else(|| {
			Error::Unprocessable { reason: "connection has no OAuth2 token".into() }
		})
	}

	async fn refresh_locked(&self, mode: RefreshMode) -> Result<RefreshOutcome> {
		let broker = self.broker();
		let current = self.current_token().await?;

		if !mode.requires_refresh(&current, OffsetDateTime::now_utc()) {
			#[cfg(feature = "tracing")]
			tracing::debug!(
				connection_id = %self.id(),
				token_id = %current.id,
				"token already fresh"
			);

			return Ok(RefreshOutcome::Fresh(current));
		}

		let refresh_token = current
			.refresh_token(broker.encrypt.as_ref())?
			.ok_or(ProtocolError::MissingRefreshToken)?;

		broker.refresh_metrics.record_upstream_call();

		let mut credentials = exchange::request_token(
			self,
			TokenGrant::RefreshToken,
			&[("refresh_token", refresh_token.expose())],
		)
		.await?;

		if credentials.refresh_token.is_none() {
			credentials.refresh_token = Some(refresh_token);
		}
		if credentials.scopes.is_empty() {
			credentials.scopes = current.scopes.clone();
		}

		let replacement = OAuth2Token::seal(broker.encrypt.as_ref(), self.id(), credentials)?
			.refreshed_from(current.id);

		match broker.tokens.insert_refreshed_token(current.id, replacement.clone()).await? {
			CompareAndSwapOutcome::Inserted => {
				#[cfg(feature = "tracing")]
				tracing::info!(
					connection_id = %self.id(),
					previous = %current.id,
					token_id = %replacement.id,
					"access token refreshed"
				);

				Ok(RefreshOutcome::Refreshed(replacement))
			},
			CompareAndSwapOutcome::Superseded => {
				#[cfg(feature = "tracing")]
				tracing::warn!(
					connection_id = %self.id(),
					"token chain moved during refresh; keeping the newer token"
				);

				Ok(RefreshOutcome::Fresh(self.current_token().await?))
			},
			CompareAndSwapOutcome::Missing => Err(Error::Unprocessable {
				reason: "connection tokens were deleted during refresh".into(),
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		crypto::AesGcmEncryptService,
		id::ConnectionId,
		oauth2::TokenCredentials,
		secret::Secret,
	};

	fn token(expires_in: Option<Duration>) -> OAuth2Token {
		let encrypt = AesGcmEncryptService::new([3; 32]);

		OAuth2Token::seal(
			&encrypt,
			ConnectionId::generate(),
			TokenCredentials {
				access_token: Secret::new("access"),
				refresh_token: None,
				expires_at: expires_in.map(|delta| OffsetDateTime::now_utc() + delta),
				scopes: Vec::new(),
			},
		)
		.expect("Token should seal.")
	}

	#[test]
	fn modes_decide_whether_to_call_the_provider() {
		let now = OffsetDateTime::now_utc();
		let expired = token(Some(Duration::seconds(-5)));
		let soon = token(Some(Duration::minutes(2)));
		let forever = token(None);

		assert!(RefreshMode::IfExpired.requires_refresh(&expired, now));
		assert!(!RefreshMode::IfExpired.requires_refresh(&soon, now));
		assert!(RefreshMode::ExpiringWithin(Duration::minutes(5)).requires_refresh(&soon, now));
		assert!(!RefreshMode::ExpiringWithin(Duration::minutes(1)).requires_refresh(&soon, now));
		assert!(!RefreshMode::ExpiringWithin(Duration::hours(1)).requires_refresh(&forever, now));
		assert!(RefreshMode::Force.requires_refresh(&forever, now));
	}
}
