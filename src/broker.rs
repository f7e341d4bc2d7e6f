//! The facade that owns every collaborator of the connection lifecycle.

// self
use crate::{
	_prelude::*,
	actor::{ActorSigner, HmacActorSigner},
	config::Config,
	connection::Connection,
	connectors::ConnectorVersion,
	crypto::{AesGcmEncryptService, EncryptService},
	http::ReqwestHttpClient,
	id::{ActorId, ConnectionId, StateId},
	kv::{KeyValueStore, MemoryKeyValueStore},
	lock::DistributedLock,
	oauth2::{
		DefaultProviderStrategy, OAuth2Connection, OAuth2State, ProviderStrategy, RefreshMetrics,
		StatePresenter, StateStore,
	},
	store::{ConnectionStore, ConnectorStore, MemoryStore, TokenStore},
	tasks::{MemoryTaskQueue, TaskEnqueuer},
};

/// External collaborators a [`Broker`] is built from.
#[derive(Clone)]
pub struct BrokerDeps {
	/// Encryption service for definitions and tokens.
	pub encrypt: Arc<dyn EncryptService>,
	/// Connector version storage.
	pub connectors: Arc<dyn ConnectorStore>,
	/// Connection storage.
	pub connections: Arc<dyn ConnectionStore>,
	/// OAuth2 token storage.
	pub tokens: Arc<dyn TokenStore>,
	/// Ephemeral store backing OAuth2 states and refresh locks.
	pub kv: Arc<dyn KeyValueStore>,
	/// Signer for actor tokens embedded in public redirect URLs.
	pub actor_signer: Arc<dyn ActorSigner>,
	/// Queue that hands background tasks to the worker pool.
	pub tasks: Arc<dyn TaskEnqueuer>,
}
impl BrokerDeps {
	/// Wires in-memory backends and resolves key material from `config`.
	pub fn in_memory(config: &Config) -> Result<(Self, MemoryBackends)> {
		let backends = MemoryBackends::default();
		let deps = Self {
			encrypt: Arc::new(AesGcmEncryptService::from_value_source(&config.global_key)?),
			connectors: backends.store.clone(),
			connections: backends.store.clone(),
			tokens: backends.store.clone(),
			kv: backends.kv.clone(),
			actor_signer: Arc::new(HmacActorSigner::from_value_source(&config.actor_token_key)?),
			tasks: backends.tasks.clone(),
		};

		Ok((deps, backends))
	}
}

/// Concrete handles of the in-memory backends created by [`BrokerDeps::in_memory`].
#[derive(Clone, Debug, Default)]
pub struct MemoryBackends {
	/// Connector, connection, and token store.
	pub store: Arc<MemoryStore>,
	/// Ephemeral key-value store.
	pub kv: Arc<MemoryKeyValueStore>,
	/// Task queue.
	pub tasks: Arc<MemoryTaskQueue>,
}

/// Coordinates connectors, connections, OAuth2 flows, and proxying.
///
/// Cloning is cheap; every collaborator sits behind an `Arc`.
#[derive(Clone)]
pub struct Broker {
	/// Runtime configuration.
	pub config: Arc<Config>,
	/// Encryption service.
	pub encrypt: Arc<dyn EncryptService>,
	/// Connector version storage.
	pub connectors: Arc<dyn ConnectorStore>,
	/// Connection storage.
	pub connections: Arc<dyn ConnectionStore>,
	/// OAuth2 token storage.
	pub tokens: Arc<dyn TokenStore>,
	/// Actor token signer.
	pub actor_signer: Arc<dyn ActorSigner>,
	/// Background task queue.
	pub tasks: Arc<dyn TaskEnqueuer>,
	/// Classifies provider error responses.
	pub strategy: Arc<dyn ProviderStrategy>,
	/// HTTP client used for every outbound call.
	pub http_client: ReqwestHttpClient,
	/// Shared counters for refresh outcomes.
	pub refresh_metrics: Arc<RefreshMetrics>,
	pub(crate) states: StateStore,
	pub(crate) refresh_lock: DistributedLock,
	flow_guards: Arc<Mutex<HashMap<ConnectionId, Arc<AsyncMutex<()>>>>>,
}
impl Broker {
	/// Creates a broker with the default provider strategy and a redirect-free HTTP client.
	pub fn new(config: Config, deps: BrokerDeps) -> Result<Self> {
		config.validate()?;

		let http_client = ReqwestHttpClient::new()?;
		let states = StateStore::new(deps.kv.clone(), config.oauth2.round_trip_ttl);
		let refresh_lock = DistributedLock::new(deps.kv, config.oauth2.refresh_lock.clone());

		Ok(Self {
			config: Arc::new(config),
			encrypt: deps.encrypt,
			connectors: deps.connectors,
			connections: deps.connections,
			tokens: deps.tokens,
			actor_signer: deps.actor_signer,
			tasks: deps.tasks,
			strategy: Arc::new(DefaultProviderStrategy),
			http_client,
			refresh_metrics: Default::default(),
			states,
			refresh_lock,
			flow_guards: Default::default(),
		})
	}

	/// Replaces the HTTP client.
	pub fn with_http_client(mut self, http_client: ReqwestHttpClient) -> Self {
		self.http_client = http_client;

		self
	}

	/// Replaces the provider strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Fetches a live connection.
	pub async fn get_connection(&self, id: ConnectionId) -> Result<Connection> {
		self.connections.get_connection(id).await?.ok_or_else(|| Error::not_found("connection"))
	}

	/// Builds the OAuth2 view of a connection.
	pub async fn oauth2_connection(&self, id: ConnectionId) -> Result<OAuth2Connection> {
		let connection = self.get_connection(id).await?;
		let version = self.bound_version(&connection).await?;

		OAuth2Connection::new(self.clone(), connection, version)
	}

	/// Validates a state for `actor` without consuming it.
	pub async fn load_oauth2_state(&self, id: StateId, actor: &ActorId) -> Result<OAuth2State> {
		self.states.load(id, StatePresenter::Actor(actor)).await
	}

	/// Redeems a state and rebuilds the OAuth2 connection it was issued for.
	///
	/// The state is deleted on success; a second redemption fails with [`Error::NotFound`].
	pub async fn redeem_oauth2_state(
		&self,
		id: StateId,
		presenter: StatePresenter<'_>,
	) -> Result<(OAuth2State, OAuth2Connection)> {
		let state = self.states.redeem(id, presenter).await?;
		let connection = self.oauth2_connection(state.connection_id).await?;

		Ok((state, connection))
	}

	/// Loads the connector version a connection is bound to.
	pub(crate) async fn bound_version(&self, connection: &Connection) -> Result<ConnectorVersion> {
		self.connectors
			.get_connector_version(&connection.connector_id, connection.connector_version)
			.await?
			.ok_or_else(|| Error::not_found("connector version"))
	}

	/// Returns (and creates on demand) the in-process singleflight guard for a connection.
	pub(crate) fn flow_guard(&self, id: ConnectionId) -> Arc<AsyncMutex<()>> {
		let mut guards = self.flow_guards.lock();

		guards.entry(id).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}
}
impl Debug for Broker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Broker")
			.field("public_base_url", &self.config.public_base_url.as_str())
			.field("states", &self.states)
			.field("refresh_lock", &self.refresh_lock)
			.finish()
	}
}
