//! Connection lifecycle and request-proxying core for third-party connectors: versioned encrypted
//! connector definitions, OAuth 2.0 authorization with lock-serialized refresh, API-key and no-auth
//! connections, and authenticated request proxying.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod actor;
pub mod broker;
pub mod config;
pub mod connection;
pub mod connections;
pub mod connectors;
pub mod crypto;
pub mod error;
pub mod http;
pub mod id;
pub mod kv;
pub mod lock;
pub mod oauth2;
pub mod obs;
pub mod proxy;
pub mod secret;
pub mod store;
pub mod tasks;

#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and fixtures shared by unit and integration tests.

	pub use crate::_prelude::*;

	// crates.io
	use base64::{Engine as _, engine::general_purpose::STANDARD};
	// self
	use crate::{
		broker::{Broker, BrokerDeps, MemoryBackends},
		config::{Config, ValueSource},
		connection::{Connection, ConnectionState},
		connectors::{
			Auth, AuthOAuth2, AuthorizationEndpoint, ClientAuthMethod, ConnectorDefinition,
			ConnectorVersion, ConnectorVersionState, RevocationEndpoint, Scope, TokenEndpoint,
		},
		id::{ActorId, ConnectionId, ConnectorId},
		oauth2::{OAuth2Token, TokenCredentials},
		secret::Secret,
	};

	/// Client identifier used by OAuth2 fixtures.
	pub const CLIENT_ID: &str = "client-it";
	/// Client secret used by OAuth2 fixtures.
	pub const CLIENT_SECRET: &str = "secret-it";
	/// Public origin of the test proxy.
	pub const PUBLIC_BASE_URL: &str = "https://proxy.example.com";
	/// Error page of the test proxy.
	pub const ERROR_PAGE_URL: &str = "https://app.example.com/connect/error";

	/// A broker wired to in-memory backends.
	#[derive(Clone, Debug)]
	pub struct TestBroker {
		/// The broker under test.
		pub broker: Broker,
		/// Concrete backend handles for assertions.
		pub backends: MemoryBackends,
	}

	/// Configuration with fixed keys and fast lock/revocation backoffs.
	pub fn test_config() -> Config {
		let mut config = Config {
			public_base_url: Url::parse(PUBLIC_BASE_URL).expect("Public base URL should parse."),
			error_page_url: Url::parse(ERROR_PAGE_URL).expect("Error page URL should parse."),
			global_key: ValueSource::value(STANDARD.encode([7_u8; 32])),
			actor_token_key: ValueSource::value("actor-token-key-for-tests"),
			oauth2: Default::default(),
		};

		config.oauth2.revoke_backoff = Duration::milliseconds(5);
		config.oauth2.refresh_lock.initial_backoff = Duration::milliseconds(5);
		config.oauth2.refresh_lock.max_backoff = Duration::milliseconds(20);
		config.oauth2.refresh_lock.max_attempts = 400;

		config
	}

	/// Builds a [`Broker`] over in-memory backends with [`test_config`].
	pub fn build_test_broker() -> TestBroker {
		build_test_broker_with(test_config())
	}

	/// Builds a [`Broker`] over in-memory backends with a caller-tuned configuration.
	pub fn build_test_broker_with(config: Config) -> TestBroker {
		let (deps, backends) =
			BrokerDeps::in_memory(&config).expect("In-memory dependencies should build.");
		let broker = Broker::new(config, deps).expect("Test broker should build.");

		TestBroker { broker, backends }
	}

	/// Actor used by fixtures.
	pub fn test_actor() -> ActorId {
		ActorId::new("actor-1").expect("Actor fixture should be valid.")
	}

	/// Parses a connector identifier fixture.
	pub fn connector_id(id: &str) -> ConnectorId {
		ConnectorId::new(id).expect("Connector fixture should be valid.")
	}

	/// OAuth2 settings pointing at `/authorize`, `/token`, and `/revoke` under `base_url`.
	pub fn oauth2_auth(base_url: &str) -> AuthOAuth2 {
		let endpoint =
			|path: &str| Url::parse(&format!("{base_url}{path}")).expect("Endpoint should parse.");

		AuthOAuth2 {
			client_id: Some(ValueSource::value(CLIENT_ID)),
			client_secret: Some(ValueSource::value(CLIENT_SECRET)),
			client_auth_method: ClientAuthMethod::ClientSecretPost,
			scopes: vec![
				Scope { id: "files.read".into(), required: true, reason: String::new() },
				Scope { id: "profile".into(), required: false, reason: String::new() },
			],
			authorization: Some(AuthorizationEndpoint {
				endpoint: endpoint("/authorize"),
				query_overrides: BTreeMap::new(),
			}),
			token: Some(TokenEndpoint {
				endpoint: endpoint("/token"),
				query_overrides: BTreeMap::new(),
				form_overrides: BTreeMap::new(),
				refresh_in_background: true,
				refresh_time_before_expiry: Some(Duration::minutes(10)),
				refresh_timeout: None,
			}),
			revocation: Some(RevocationEndpoint {
				endpoint: endpoint("/revoke"),
				query_overrides: BTreeMap::new(),
				form_overrides: BTreeMap::new(),
			}),
		}
	}

	/// Wraps `auth` into a definition.
	pub fn definition(auth: Auth) -> ConnectorDefinition {
		ConnectorDefinition {
			display_name: "Test Connector".into(),
			description: String::new(),
			logo: None,
			auth,
		}
	}

	/// Stores `definition` as version 1 of `id` in the primary state.
	pub async fn publish_connector(
		broker: &Broker,
		id: &str,
		definition: ConnectorDefinition,
	) -> ConnectorVersion {
		let version = ConnectorVersion::new(
			broker.encrypt.as_ref(),
			connector_id(id),
			1,
			ConnectorVersionState::Primary,
			definition,
		)
		.expect("Connector version should build.");

		broker
			.connectors
			.upsert_connector_version(version.clone())
			.await
			.expect("Connector version should be stored.");

		version
	}

	/// Creates a ready connection bound to `version`.
	pub async fn seed_connection(broker: &Broker, version: &ConnectorVersion) -> Connection {
		let mut connection = Connection::new(version.id.clone(), version.version);

		connection.state = ConnectionState::Ready;

		broker
			.connections
			.create_connection(connection.clone())
			.await
			.expect("Connection should be stored.");

		connection
	}

	/// Appends a token row for `connection_id`.
	pub async fn seed_token(
		broker: &Broker,
		connection_id: ConnectionId,
		access_token: &str,
		refresh_token: Option<&str>,
		expires_in: Duration,
	) -> OAuth2Token {
		let credentials = TokenCredentials {
			access_token: Secret::new(access_token),
			refresh_token: refresh_token.map(Secret::new),
			expires_at: Some(OffsetDateTime::now_utc() + expires_in),
			scopes: vec!["files.read".into()],
		};
		let token = OAuth2Token::seal(broker.encrypt.as_ref(), connection_id, credentials)
			.expect("Token should seal.");

		broker.tokens.insert_token(token.clone()).await.expect("Token should be stored.");

		token
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use httpmock as _;
