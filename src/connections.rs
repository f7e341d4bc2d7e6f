//! Connection management operations consumed by an API layer.

// crates.io
use tokio::io::AsyncWrite;
// self
use crate::{
	_prelude::*,
	broker::Broker,
	connection::{Connection, ConnectionState},
	connectors::Auth,
	id::{ActorId, ConnectionId, ConnectorId, TaskId},
	oauth2::OAuth2Connection,
	proxy::{ApiKeyProxy, ConnectionProxy, ProxyRequest, ProxyResponse, ProxyResponseHead},
	tasks::Task,
};

/// Body of an initiate-connection call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateConnectionRequest {
	/// Connector to connect; its primary version is used.
	pub connector_id: ConnectorId,
	/// Where the user lands once the connection is established.
	pub return_to_url: Url,
}

/// Result of an initiate-connection call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InitiateConnectionResponse {
	/// The user must be sent to `redirect_url` to finish an OAuth2 flow.
	Redirect {
		/// New connection.
		connection_id: ConnectionId,
		/// Public redirect URL of this proxy.
		redirect_url: Url,
	},
	/// The connection is usable right away.
	Complete {
		/// New connection.
		connection_id: ConnectionId,
	},
}
impl InitiateConnectionResponse {
	/// New connection identifier.
	pub fn connection_id(&self) -> ConnectionId {
		match self {
			Self::Redirect { connection_id, .. } | Self::Complete { connection_id } =>
				*connection_id,
		}
	}
}

/// Result of a disconnect call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectResponse {
	/// Task that performs the teardown.
	pub task_id: TaskId,
}

impl Broker {
	/// Creates a connection to the primary version of a connector.
	///
	/// OAuth2 connectors answer with the public redirect URL that starts the authorization flow;
	/// other supported auth types are ready immediately. Unsupported auth types fail before any
	/// record is written.
	pub async fn initiate_connection(
		&self,
		actor: &ActorId,
		request: InitiateConnectionRequest,
	) -> Result<InitiateConnectionResponse> {
		if !matches!(request.return_to_url.scheme(), "http" | "https") {
			return Err(Error::bad_request("returnToUrl must use http or https"));
		}

		let version = self
			.connectors
			.get_primary_connector_version(&request.connector_id)
			.await?
			.ok_or_else(|| Error::not_found("connector"))?;
		let definition = version.definition(self.encrypt.as_ref())?;
		let mut connection = Connection::new(request.connector_id.clone(), version.version);

		match &definition.auth {
			Auth::OAuth2(_) => {
				let oauth2 = OAuth2Connection::new(self.clone(), connection.clone(), version)?;

				oauth2.client_id()?;
				self.connections.create_connection(connection.clone()).await?;

				let redirect_url =
					oauth2.set_state_and_generate_public_url(actor, request.return_to_url).await?;

				#[cfg(feature = "tracing")]
				tracing::info!(
					connection_id = %connection.id,
					connector = %connection.connector_id,
					actor = %actor,
					"OAuth2 connection initiated"
				);

				Ok(InitiateConnectionResponse::Redirect {
					connection_id: connection.id,
					redirect_url,
				})
			},
			Auth::ApiKey(_) | Auth::NoAuth => {
				if let Auth::ApiKey(api_key) = &definition.auth {
					ApiKeyProxy::new(api_key)?;
				}

				connection.state = ConnectionState::Ready;

				self.connections.create_connection(connection.clone()).await?;

				Ok(InitiateConnectionResponse::Complete { connection_id: connection.id })
			},
			Auth::Unsupported =>
				Err(Error::NotImplemented { auth_type: definition.auth_type().to_string() }),
		}
	}

	/// Returns a proxy bound to `connection_id`.
	///
	/// Reuse the value across requests to keep the resolved implementation.
	pub fn connection_proxy(&self, connection_id: ConnectionId) -> ConnectionProxy {
		ConnectionProxy::new(self.clone(), connection_id)
	}

	/// Proxies one request through a connection and buffers the response.
	pub async fn proxy(
		&self,
		connection_id: ConnectionId,
		request: &ProxyRequest,
	) -> Result<ProxyResponse> {
		self.connection_proxy(connection_id).proxy_request(request).await
	}

	/// Proxies one request through a connection and streams the response body into `sink`.
	pub async fn proxy_raw<W>(
		&self,
		connection_id: ConnectionId,
		request: &ProxyRequest,
		sink: &mut W,
	) -> Result<ProxyResponseHead>
	where
		W: AsyncWrite + Unpin + Send,
	{
		self.connection_proxy(connection_id).proxy_request_raw(request, sink).await
	}

	/// Marks a connection as disconnecting and enqueues its teardown.
	pub async fn disconnect_connection(
		&self,
		connection_id: ConnectionId,
	) -> Result<DisconnectResponse> {
		self.connections
			.set_connection_state(connection_id, ConnectionState::Disconnecting)
			.await?
			.ok_or_else(|| Error::not_found("connection"))?;

		let task_id = self.tasks.enqueue(Task::DisconnectConnection { connection_id }).await?;

		#[cfg(feature = "tracing")]
		tracing::info!(connection_id = %connection_id, task_id = %task_id, "disconnect enqueued");

		Ok(DisconnectResponse { task_id })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn responses_use_the_api_wire_shape() {
		let connection_id = ConnectionId::generate();
		let response = InitiateConnectionResponse::Redirect {
			connection_id,
			redirect_url: Url::parse("https://proxy.example.com/oauth2/redirect?state_id=x")
				.expect("URL should parse."),
		};
		let json = serde_json::to_value(&response).expect("Response should serialize.");

		assert_eq!(json["type"], "redirect");
		assert_eq!(json["connectionId"], connection_id.to_string());
		assert!(json["redirectUrl"].as_str().is_some_and(|url| url.contains("state_id=x")));
		assert_eq!(response.connection_id(), connection_id);

		let request: InitiateConnectionRequest = serde_json::from_value(serde_json::json!({
			"connectorId": "google-drive",
			"returnToUrl": "https://app.example.com/settings",
		}))
		.expect("Request should deserialize.");

		assert_eq!(&*request.connector_id, "google-drive");
	}
}
