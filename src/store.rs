//! Storage contracts for connector versions, connections, and OAuth2 token chains.

pub mod memory;

pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	connection::{Connection, ConnectionState},
	connectors::ConnectorVersion,
	id::{ConnectionId, ConnectorId, TokenId},
	oauth2::OAuth2Token,
};

/// Boxed future returned by every storage contract.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence contract for versioned connector definitions.
///
/// Implementations enforce two invariants: a version that is not a draft never changes its hash
/// or ciphertext, and at most one version per connector is `primary` (promoting a version demotes
/// the previous primary to `active`).
pub trait ConnectorStore
where
	Self: Send + Sync,
{
	/// Inserts or updates a connector version.
	fn upsert_connector_version(&self, version: ConnectorVersion) -> StoreFuture<'_, ()>;

	/// Fetches a specific version.
	fn get_connector_version<'a>(
		&'a self,
		connector: &'a ConnectorId,
		version: u64,
	) -> StoreFuture<'a, Option<ConnectorVersion>>;

	/// Fetches the current primary version of a connector.
	fn get_primary_connector_version<'a>(
		&'a self,
		connector: &'a ConnectorId,
	) -> StoreFuture<'a, Option<ConnectorVersion>>;

	/// Lists every non-draft version across all connectors.
	fn list_connector_versions(&self) -> StoreFuture<'_, Vec<ConnectorVersion>>;
}

/// Persistence contract for user connections.
pub trait ConnectionStore
where
	Self: Send + Sync,
{
	/// Persists a new connection.
	fn create_connection(&self, connection: Connection) -> StoreFuture<'_, ()>;

	/// Fetches a connection unless it was deleted.
	fn get_connection(&self, id: ConnectionId) -> StoreFuture<'_, Option<Connection>>;

	/// Moves a connection to `state`, returning the updated record.
	fn set_connection_state(
		&self,
		id: ConnectionId,
		state: ConnectionState,
	) -> StoreFuture<'_, Option<Connection>>;

	/// Soft-deletes a connection. Returns false when nothing was deleted.
	fn delete_connection(&self, id: ConnectionId) -> StoreFuture<'_, bool>;
}

/// Persistence contract for append-only OAuth2 token chains.
pub trait TokenStore
where
	Self: Send + Sync,
{
	/// Appends a token row for its connection.
	fn insert_token(&self, token: OAuth2Token) -> StoreFuture<'_, ()>;

	/// Returns the newest non-deleted token of a connection.
	fn get_current_token(&self, connection: ConnectionId) -> StoreFuture<'_, Option<OAuth2Token>>;

	/// Appends `replacement` only if the connection's current token is still `expected_current`.
	fn insert_refreshed_token(
		&self,
		expected_current: TokenId,
		replacement: OAuth2Token,
	) -> StoreFuture<'_, CompareAndSwapOutcome>;

	/// Lists the full chain of a connection, oldest first, including deleted rows.
	fn list_token_chain(&self, connection: ConnectionId) -> StoreFuture<'_, Vec<OAuth2Token>>;

	/// Soft-deletes every token of a connection and returns how many rows changed.
	fn delete_tokens(&self, connection: ConnectionId) -> StoreFuture<'_, usize>;

	/// Lists current tokens whose access token expires at or before `before`.
	fn list_expiring_tokens(&self, before: OffsetDateTime) -> StoreFuture<'_, Vec<OAuth2Token>>;
}

/// Result of [`TokenStore::insert_refreshed_token`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareAndSwapOutcome {
	/// The expected row was current and the replacement was appended.
	Inserted,
	/// Another row superseded the expected one; nothing was written.
	Superseded,
	/// The connection has no current token.
	Missing,
}

/// Error type produced by storage implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// A record could not be encoded or decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// The write would break a storage invariant.
	#[error("Conflict: {message}.")]
	Conflict {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
impl StoreError {
	pub(crate) fn serialization(err: impl Display) -> Self {
		Self::Serialization { message: err.to_string() }
	}
}
