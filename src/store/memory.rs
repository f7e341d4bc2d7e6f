//! Thread-safe in-memory store for local development and tests.

// self
use crate::{
	_prelude::*,
	connection::{Connection, ConnectionState},
	connectors::{ConnectorVersion, ConnectorVersionState},
	id::{ConnectionId, ConnectorId, TokenId},
	oauth2::OAuth2Token,
	store::{
		CompareAndSwapOutcome, ConnectionStore, ConnectorStore, StoreError, StoreFuture,
		TokenStore,
	},
};

type VersionMap = BTreeMap<(ConnectorId, u64), ConnectorVersion>;

#[derive(Debug, Default)]
struct State {
	versions: VersionMap,
	connections: HashMap<ConnectionId, Connection>,
	tokens: HashMap<ConnectionId, Vec<OAuth2Token>>,
}

/// Implements [`ConnectorStore`], [`ConnectionStore`], and [`TokenStore`] in process memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<State>>);
impl MemoryStore {
	fn upsert_version_now(&self, version: ConnectorVersion) -> Result<(), StoreError> {
		let mut state = self.0.write();
		let key = (version.id.clone(), version.version);
		let version = match state.versions.get(&key) {
			Some(existing) if !existing.is_draft() => {
				if existing.hash != version.hash || version.is_draft() {
					return Err(StoreError::Conflict {
						message: format!(
							"connector `{}` version {} is immutable",
							version.id, version.version
						),
					});
				}

				existing.with_state(version.state)
			},
			_ => version,
		};

		if version.state == ConnectorVersionState::Primary {
			for ((connector, number), other) in state.versions.iter_mut() {
				if *connector == version.id
					&& *number != version.version
					&& other.state == ConnectorVersionState::Primary
				{
					*other = other.with_state(ConnectorVersionState::Active);
				}
			}
		}

		state.versions.insert(key, version);

		Ok(())
	}

	fn current_token(tokens: &[OAuth2Token]) -> Option<&OAuth2Token> {
		tokens.iter().rev().find(|token| !token.is_deleted())
	}

	fn refreshed_now(&self, expected: TokenId, replacement: OAuth2Token) -> CompareAndSwapOutcome {
		let mut state = self.0.write();
		let chain = state.tokens.entry(replacement.connection_id).or_default();
		let outcome = match Self::current_token(chain) {
			Some(current) if current.id == expected => CompareAndSwapOutcome::Inserted,
			Some(_) => CompareAndSwapOutcome::Superseded,
			None => CompareAndSwapOutcome::Missing,
		};

		if outcome == CompareAndSwapOutcome::Inserted {
			chain.push(replacement);
		}

		outcome
	}
}
impl ConnectorStore for MemoryStore {
	fn upsert_connector_version(&self, version: ConnectorVersion) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.upsert_version_now(version) })
	}

	fn get_connector_version<'a>(
		&'a self,
		connector: &'a ConnectorId,
		version: u64,
	) -> StoreFuture<'a, Option<ConnectorVersion>> {
		Box::pin(async move {
			Ok(self.0.read().versions.get(&(connector.clone(), version)).cloned())
		})
	}

	fn get_primary_connector_version<'a>(
		&'a self,
		connector: &'a ConnectorId,
	) -> StoreFuture<'a, Option<ConnectorVersion>> {
		Box::pin(async move {
			Ok(self
				.0
				.read()
				.versions
				.values()
				.find(|v| v.id == *connector && v.state == ConnectorVersionState::Primary)
				.cloned())
		})
	}

	fn list_connector_versions(&self) -> StoreFuture<'_, Vec<ConnectorVersion>> {
		Box::pin(async move {
			Ok(self.0.read().versions.values().filter(|v| !v.is_draft()).cloned().collect())
		})
	}
}
impl ConnectionStore for MemoryStore {
	fn create_connection(&self, connection: Connection) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut state = self.0.write();

			if state.connections.contains_key(&connection.id) {
				return Err(StoreError::Conflict {
					message: format!("connection {} already exists", connection.id),
				});
			}

			state.connections.insert(connection.id, connection);

			Ok(())
		})
	}

	fn get_connection(&self, id: ConnectionId) -> StoreFuture<'_, Option<Connection>> {
		Box::pin(async move {
			Ok(self.0.read().connections.get(&id).filter(|c| !c.is_deleted()).cloned())
		})
	}

	fn set_connection_state(
		&self,
		id: ConnectionId,
		next: ConnectionState,
	) -> StoreFuture<'_, Option<Connection>> {
		Box::pin(async move {
			let mut state = self.0.write();

			Ok(state.connections.get_mut(&id).filter(|c| !c.is_deleted()).map(|connection| {
				connection.state = next;
				connection.updated_at = OffsetDateTime::now_utc();

				connection.clone()
			}))
		})
	}

	fn delete_connection(&self, id: ConnectionId) -> StoreFuture<'_, bool> {
		Box::pin(async move {
			let mut state = self.0.write();

			match state.connections.get_mut(&id) {
				Some(connection) if !connection.is_deleted() => {
					connection.deleted_at = Some(OffsetDateTime::now_utc());

					Ok(true)
				},
				_ => Ok(false),
			}
		})
	}
}
impl TokenStore for MemoryStore {
	fn insert_token(&self, token: OAuth2Token) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.0.write().tokens.entry(token.connection_id).or_default().push(token);

			Ok(())
		})
	}

	fn get_current_token(&self, connection: ConnectionId) -> StoreFuture<'_, Option<OAuth2Token>> {
		Box::pin(async move {
			Ok(self
				.0
				.read()
				.tokens
				.get(&connection)
				.and_then(|chain| Self::current_token(chain))
				.cloned())
		})
	}

	fn insert_refreshed_token(
		&self,
		expected_current: TokenId,
		replacement: OAuth2Token,
	) -> StoreFuture<'_, CompareAndSwapOutcome> {
		Box::pin(async move { Ok(self.refreshed_now(expected_current, replacement)) })
	}

	fn list_token_chain(&self, connection: ConnectionId) -> StoreFuture<'_, Vec<OAuth2Token>> {
		Box::pin(
			async move { Ok(self.0.read().tokens.get(&connection).cloned().unwrap_or_default()) },
		)
	}

	fn delete_tokens(&self, connection: ConnectionId) -> StoreFuture<'_, usize> {
		Box::pin(async move {
			let mut state = self.0.write();
			let now = OffsetDateTime::now_utc();
			let mut deleted = 0;

			for token in state.tokens.get_mut(&connection).into_iter().flatten() {
				if !token.is_deleted() {
					token.deleted_at = Some(now);
					deleted += 1;
				}
			}

			Ok(deleted)
		})
	}

	fn list_expiring_tokens(&self, before: OffsetDateTime) -> StoreFuture<'_, Vec<OAuth2Token>> {
		Box::pin(async move {
			Ok(self
				.0
				.read()
				.tokens
				.values()
				.filter_map(|chain| Self::current_token(chain))
				.filter(|token| token.access_token_expires_at.is_some_and(|at| at <= before))
				.cloned()
				.collect())
		})
	}
}
