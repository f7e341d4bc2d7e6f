//! Single-use OAuth2 authorization states kept in the ephemeral store.
//!
//! A state bridges the public redirect leg and the third-party callback leg. Every failure to
//! produce a usable state (absent, malformed, expired, wrong actor, already redeemed) collapses
//! into [`Error::NotFound`] so callers cannot tell the cases apart.

// self
use crate::{
	_prelude::*,
	id::{ActorId, ConnectionId, ConnectorId, StateId},
	kv::KeyValueStore,
	store::StoreError,
};

const STATE_NOT_FOUND: &str = "OAuth2 state";

/// Ephemeral record bridging the redirect and callback legs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2State {
	/// Unguessable identifier; also the `state` parameter sent to the provider.
	pub id: StateId,
	/// User that started the flow.
	pub actor_id: ActorId,
	/// Connector being connected.
	pub connector_id: ConnectorId,
	/// Connector version the connection is bound to.
	pub connector_version: u64,
	/// Connection that receives the token.
	pub connection_id: ConnectionId,
	/// Where the user lands after a successful callback.
	pub return_to_url: Url,
	/// Absolute expiry.
	pub expires_at: OffsetDateTime,
	/// Set once the redirect leg verified the actor.
	#[serde(default)]
	pub redirect_verified: bool,
}
impl OAuth2State {
	/// Returns true when every required field is populated.
	pub fn is_well_formed(&self) -> bool {
		!self.id.is_nil()
			&& !self.connection_id.is_nil()
			&& self.connector_version > 0
			&& self.expires_at.unix_timestamp() != 0
	}

	/// Returns true when the state is expired at `now`.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		self.expires_at <= now
	}
}

/// Who is presenting a state for redemption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatePresenter<'a> {
	/// An authenticated actor; must match the state's actor.
	Actor(&'a ActorId),
	/// No session is available; accepted only after the redirect leg verified the actor.
	Anonymous,
}

/// [`OAuth2State`] persistence over a [`KeyValueStore`].
#[derive(Clone)]
pub struct StateStore {
	kv: Arc<dyn KeyValueStore>,
	ttl: Duration,
}
impl StateStore {
	/// Creates a store whose records live for `ttl`.
	pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
		Self { kv, ttl }
	}

	/// Key under which a state is stored.
	pub fn key(id: StateId) -> String {
		format!("oauth2:state:{id}")
	}

	/// Creates and stores a fresh state.
	pub async fn issue(
		&self,
		actor_id: ActorId,
		connector_id: ConnectorId,
		connector_version: u64,
		connection_id: ConnectionId,
		return_to_url: Url,
	) -> Result<OAuth2State> {
		let state = OAuth2State {
			id: StateId::generate(),
			actor_id,
			connector_id,
			connector_version,
			connection_id,
			return_to_url,
			expires_at: OffsetDateTime::now_utc() + self.ttl,
			redirect_verified: false,
		};

		self.insert(&state).await?;

		Ok(state)
	}

	/// Loads and validates a state without consuming it.
	pub async fn load(&self, id: StateId, presenter: StatePresenter<'_>) -> Result<OAuth2State> {
		let (state, _) = self.fetch_valid(id, presenter).await?;

		Ok(state)
	}

	/// Validates a state for `presenter` and marks it as verified by the redirect leg.
	///
	/// The write only lands while the record still holds the bytes that were validated, so a
	/// state redeemed in the meantime stays gone.
	pub async fn mark_redirect_verified(
		&self,
		id: StateId,
		presenter: StatePresenter<'_>,
	) -> Result<OAuth2State> {
		let (mut state, raw) = self.fetch_valid(id, presenter).await?;

		state.redirect_verified = true;

		let (payload, ttl) = self.encode(&state)?;

		if self.kv.set_if_equal(&Self::key(id), &raw, payload, Some(ttl)).await? {
			Ok(state)
		} else {
			Err(Error::not_found(STATE_NOT_FOUND))
		}
	}

	/// Validates and deletes a state. A state can be redeemed at most once.
	pub async fn redeem(&self, id: StateId, presenter: StatePresenter<'_>) -> Result<OAuth2State> {
		let (state, raw) = self.fetch_valid(id, presenter).await?;

		if self.kv.delete_if_equal(&Self::key(id), &raw).await? {
			Ok(state)
		} else {
			Err(Error::not_found(STATE_NOT_FOUND))
		}
	}

	async fn insert(&self, state: &OAuth2State) -> Result<()> {
		let (payload, ttl) = self.encode(state)?;

		if self.kv.set_if_absent(&Self::key(state.id), payload, ttl).await? {
			Ok(())
		} else {
			let message = format!("OAuth2 state {} already exists", state.id);

			Err(StoreError::Conflict { message }.into())
		}
	}

	// Serializes `state` with a TTL that never outlives its expiry.
	fn encode(&self, state: &OAuth2State) -> Result<(Vec<u8>, Duration)> {
		let payload = serde_json::to_vec(state).map_err(StoreError::serialization)?;
		let remaining = (state.expires_at - OffsetDateTime::now_utc()).min(self.ttl);

		if !remaining.is_positive() {
			return Err(Error::not_found(STATE_NOT_FOUND));
		}

		Ok((payload, remaining))
	}

	async fn fetch_valid(
		&self,
		id: StateId,
		presenter: StatePresenter<'_>,
	) -> Result<(OAuth2State, Vec<u8>)> {
		let raw = self
			.kv
			.get(&Self::key(id))
			.await?
			.ok_or_else(|| Error::not_found(STATE_NOT_FOUND))?;
		let state = serde_json::from_slice::<OAuth2State>(&raw)
			.map_err(|_| Error::not_found(STATE_NOT_FOUND))?;
		let presenter_ok = match presenter {
			StatePresenter::Actor(actor) => *actor == state.actor_id,
			StatePresenter::Anonymous => state.redirect_verified,
		};

		if state.id != id
			|| !state.is_well_formed()
			|| state.is_expired_at(OffsetDateTime::now_utc())
			|| !presenter_ok
		{
			#[cfg(feature = "tracing")]
			tracing::debug!(state_id = %id, "rejected OAuth2 state");

			return Err(Error::not_found(STATE_NOT_FOUND));
		}

		Ok((state, raw))
	}
}
impl Debug for StateStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("StateStore").field("ttl", &self.ttl).finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::kv::MemoryKeyValueStore;

	fn store() -> StateStore {
		StateStore::new(Arc::new(MemoryKeyValueStore::default()), Duration::minutes(15))
	}

	fn actor(name: &str) -> ActorId {
		ActorId::new(name).expect("Actor fixture should be valid.")
	}

	async fn issue(store: &StateStore, owner: &ActorId) -> OAuth2State {
		store
			.issue(
				owner.clone(),
				ConnectorId::new("c1").expect("Connector fixture should be valid."),
				1,
				ConnectionId::generate(),
				Url::parse("https://app.example.com/done").expect("Return URL should parse."),
			)
			.await
			.expect("State should be issued.")
	}

	#[tokio::test]
	async fn states_are_single_use() {
		let store = store();
		let alice = actor("alice");
		let state = issue(&store, &alice).await;
		let loaded = store
			.load(state.id, StatePresenter::Actor(&alice))
			.await
			.expect("Load should succeed.");

		assert_eq!(loaded, state);
		store
			.redeem(state.id, StatePresenter::Actor(&alice))
			.await
			.expect("First redeem should succeed.");

		let err = store
			.redeem(state.id, StatePresenter::Actor(&alice))
			.await
			.expect_err("Second redeem should fail.");

		assert!(matches!(err, Error::NotFound { .. }));
	}

	#[tokio::test]
	async fn other_actors_cannot_redeem_or_burn_a_state() {
		let store = store();
		let alice = actor("alice");
		let state = issue(&store, &alice).await;
		let err = store
			.redeem(state.id, StatePresenter::Actor(&actor("mallory")))
			.await
			.expect_err("Foreign actor should fail.");

		assert!(matches!(err, Error::NotFound { .. }));
		assert!(store.redeem(state.id, StatePresenter::Actor(&alice)).await.is_ok());
	}

	#[tokio::test]
	async fn anonymous_redemption_requires_a_verified_redirect() {
		let store = store();
		let alice = actor("alice");
		let state = issue(&store, &alice).await;

		assert!(store.redeem(state.id, StatePresenter::Anonymous).await.is_err());

		store
			.mark_redirect_verified(state.id, StatePresenter::Actor(&alice))
			.await
			.expect("Marking should succeed.");

		assert!(store.redeem(state.id, StatePresenter::Anonymous).await.is_ok());
	}

	#[tokio::test]
	async fn redeemed_states_are_not_revived_by_the_redirect_leg() {
		let store = store();
		let alice = actor("alice");
		let state = issue(&store, &alice).await;
		let loaded = store
			.load(state.id, StatePresenter::Actor(&alice))
			.await
			.expect("Load should succeed.");

		store
			.redeem(loaded.id, StatePresenter::Actor(&alice))
			.await
			.expect("Redeem should succeed.");

		let err = store
			.mark_redirect_verified(loaded.id, StatePresenter::Actor(&alice))
			.await
			.expect_err("Marking a redeemed state should fail.");

		assert!(matches!(err, Error::NotFound { .. }));
		assert!(matches!(
			store.redeem(loaded.id, StatePresenter::Anonymous).await,
			Err(Error::NotFound { .. })
		));
	}

	#[tokio::test]
	async fn marking_does_not_overwrite_a_replaced_record() {
		let kv = Arc::new(MemoryKeyValueStore::default());
		let store = StateStore::new(kv.clone(), Duration::minutes(15));
		let alice = actor("alice");
		let state = issue(&store, &alice).await;
		let key = StateStore::key(state.id);
		let seen = kv.get(&key).await.expect("Read should succeed.").expect("State should exist.");

		assert!(kv.delete_if_equal(&key, &seen).await.expect("Delete should succeed."));

		let stale = serde_json::to_vec(&OAuth2State { redirect_verified: true, ..state.clone() })
			.expect("State should serialize.");

		assert!(
			!kv.set_if_equal(&key, &seen, stale, None).await.expect("Compare-and-set should run.")
		);
		assert!(kv.get(&key).await.expect("Read should succeed.").is_none());
		assert!(store.redeem(state.id, StatePresenter::Anonymous).await.is_err());
	}

	#[tokio::test]
	async fn expired_or_malformed_records_fail_closed() {
		let kv = Arc::new(MemoryKeyValueStore::default());
		let store = StateStore::new(kv.clone(), Duration::minutes(15));
		let alice = actor("alice");
		let mut state = issue(&store, &alice).await;

		state.expires_at = OffsetDateTime::now_utc() - Duration::seconds(1);

		kv.set(
			&StateStore::key(state.id),
			serde_json::to_vec(&state).expect("State should serialize."),
			None,
		)
		.await
		.expect("Raw write should succeed.");

		assert!(matches!(
			store.redeem(state.id, StatePresenter::Actor(&alice)).await,
			Err(Error::NotFound { .. })
		));

		let garbage = StateId::generate();

		kv.set(&StateStore::key(garbage), b"{not json".to_vec(), None)
			.await
			.expect("Raw write should succeed.");

		assert!(matches!(
			store.load(garbage, StatePresenter::Actor(&alice)).await,
			Err(Error::NotFound { .. })
		));
	}
}
