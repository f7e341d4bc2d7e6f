//! OAuth2 view of a connection bound to a decrypted connector definition.

// self
use crate::{
	_prelude::*,
	broker::Broker,
	connection::Connection,
	connectors::{AuthOAuth2, AuthorizationEndpoint, ConnectorVersion, TokenEndpoint},
	error::ConfigError,
	id::ConnectionId,
	secret::Secret,
};

/// A connection together with the OAuth2 settings of the connector version it is bound to.
///
/// Building one decrypts the definition; the value is cheap to clone afterwards.
#[derive(Clone)]
pub struct OAuth2Connection {
	broker: Broker,
	connection: Connection,
	version: ConnectorVersion,
	auth: AuthOAuth2,
}
impl OAuth2Connection {
	/// Binds `connection` to the OAuth2 settings of `version`.
	///
	/// Fails with [`ConfigError::NotOAuth2`] when the version uses another auth type.
	pub fn new(broker: Broker, connection: Connection, version: ConnectorVersion) -> Result<Self> {
		let definition = version.definition(broker.encrypt.as_ref())?;
		let auth = version.oauth2(&definition)?.clone();

		Ok(Self { broker, connection, version, auth })
	}

	/// Connection identifier.
	pub fn id(&self) -> ConnectionId {
		self.connection.id
	}

	/// Key of the distributed lock that serializes writes to this connection's token chain.
	pub(crate) fn refresh_lock_key(&self) -> String {
		format!("oauth2:refresh-lock:{}", self.id())
	}

	/// Connection record as loaded when this view was built.
	pub fn connection(&self) -> &Connection {
		&self.connection
	}

	/// Connector version the connection is bound to.
	pub fn version(&self) -> &ConnectorVersion {
		&self.version
	}

	/// OAuth2 settings of the bound version.
	pub fn auth(&self) -> &AuthOAuth2 {
		&self.auth
	}

	/// Resolves the client identifier.
	pub fn client_id(&self) -> Result<Secret, ConfigError> {
		let missing = || ConfigError::MissingClientId { connector: self.connector_name() };
		let source = self.auth.client_id.as_ref().ok_or_else(missing)?;

		if source.is_blank() {
			return Err(missing());
		}

		let client_id = source.resolve()?;

		if client_id.is_empty() { Err(missing()) } else { Ok(client_id) }
	}

	/// Resolves the client secret; `None` for public clients.
	pub fn client_secret(&self) -> Result<Option<Secret>, ConfigError> {
		match &self.auth.client_secret {
			Some(source) if !source.is_blank() =>
				Ok(Some(source.resolve()?).filter(|secret| !secret.is_empty())),
			_ => Ok(None),
		}
	}

	pub(crate) fn broker(&self) -> &Broker {
		&self.broker
	}

	pub(crate) fn authorization_endpoint(&self) -> Result<&AuthorizationEndpoint, ConfigError> {
		self.auth.authorization.as_ref().ok_or_else(|| self.missing_endpoint("authorization"))
	}

	pub(crate) fn token_endpoint(&self) -> Result<&TokenEndpoint, ConfigError> {
		self.auth.token.as_ref().ok_or_else(|| self.missing_endpoint("token"))
	}

	/// Deadline for token endpoint calls.
	pub(crate) fn refresh_timeout(&self) -> Duration {
		self.auth
			.token
			.as_ref()
			.and_then(|token| token.refresh_timeout)
			.unwrap_or(self.broker.config.oauth2.default_refresh_timeout)
	}

	pub(crate) fn missing_endpoint(&self, endpoint: &'static str) -> ConfigError {
		ConfigError::MissingEndpoint { connector: self.connector_name(), endpoint }
	}

	fn connector_name(&self) -> String {
		self.connection.connector_id.to_string()
	}
}
impl Debug for OAuth2Connection {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuth2Connection")
			.field("connection", &self.connection)
			.field("connector_version", &self.version.version)
			.finish()
	}
}
