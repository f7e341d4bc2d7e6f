//! Proxying third-party requests through a connection.
//!
//! A [`ConnectionProxy`] resolves the connection's connector version once, picks the
//! implementation for its auth type, and reuses it for every request. Auth types without an
//! implementation fail with [`Error::NotImplemented`] before anything is sent.

pub mod request;
pub mod signer;

pub use request::*;
pub use signer::*;

// crates.io
use reqwest::Response;
use tokio::{
	io::{AsyncWrite, AsyncWriteExt},
	sync::OnceCell,
};
// self
use crate::{
	_prelude::*,
	broker::Broker,
	connectors::Auth,
	error::TransportError,
	http,
	id::ConnectionId,
	oauth2::OAuth2Connection,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

const TARGET: &str = "proxy target";

/// Per-auth-type proxy implementation.
#[derive(Debug)]
pub enum ProxyImpl {
	/// Bearer access token, refreshed when expired.
	OAuth2(OAuth2Connection),
	/// Static API key.
	ApiKey(ApiKeyProxy),
	/// No credentials.
	NoAuth(NoAuthProxy),
}
impl RequestSigner for ProxyImpl {
	fn sign<'a>(&'a self, request: &'a mut reqwest::Request) -> SignFuture<'a> {
		match self {
			Self::OAuth2(connection) => connection.sign(request),
			Self::ApiKey(api_key) => api_key.sign(request),
			Self::NoAuth(no_auth) => no_auth.sign(request),
		}
	}
}

/// Proxy bound to one connection.
pub struct ConnectionProxy {
	broker: Broker,
	connection_id: ConnectionId,
	resolved: OnceCell<Arc<ProxyImpl>>,
}
impl ConnectionProxy {
	/// Creates a proxy; nothing is loaded until the first request.
	pub fn new(broker: Broker, connection_id: ConnectionId) -> Self {
		Self { broker, connection_id, resolved: OnceCell::new() }
	}

	/// Connection this proxy serves.
	pub fn connection_id(&self) -> ConnectionId {
		self.connection_id
	}

	/// Returns the implementation for the connection's auth type, resolving it on first use.
	///
	/// Failures are not cached; the next call retries the resolution.
	pub async fn implementation(&self) -> Result<Arc<ProxyImpl>> {
		self.resolved.get_or_try_init(|| self.resolve()).await.cloned()
	}

	/// Sends `request` and buffers the response.
	pub async fn proxy_request(&self, request: &ProxyRequest) -> Result<ProxyResponse> {
		const KIND: FlowKind = FlowKind::Proxy;

		let span = FlowSpan::new(KIND, "proxy_request");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let response = self.send(request).await?;
				let head = ProxyResponseHead::from_response(&response);
				let body = response.bytes().await.map_err(|e| http::map_reqwest_error(TARGET, e))?;

				Ok(ProxyResponse::from_parts(head, &body))
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}

	/// Sends `request` and streams the response body into `sink`.
	pub async fn proxy_request_raw<W>(
		&self,
		request: &ProxyRequest,
		sink: &mut W,
	) -> Result<ProxyResponseHead>
	where
		W: AsyncWrite + Unpin + Send,
	{
		const KIND: FlowKind = FlowKind::Proxy;

		let span = FlowSpan::new(KIND, "proxy_request_raw");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let mut response = self.send(request).await?;
				let head = ProxyResponseHead::from_response(&response);

				while let Some(chunk) =
					response.chunk().await.map_err(|e| http::map_reqwest_error(TARGET, e))?
				{
					sink.write_all(&chunk).await.map_err(TransportError::Io)?;
				}

				sink.flush().await.map_err(TransportError::Io)?;

				Ok(head)
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}

	async fn send(&self, request: &ProxyRequest) -> Result<Response> {
		request.validate()?;

		let implementation = self.implementation().await?;
		let mut outbound = request.to_reqwest(&self.broker.http_client)?;

		implementation.sign(&mut outbound).await?;

		#[cfg(feature = "tracing")]
		tracing::debug!(
			connection_id = %self.connection_id,
			method = %outbound.method(),
			host = outbound.url().host_str(),
			"forwarding proxied request"
		);

		self.broker
			.http_client
			.execute(outbound)
			.await
			.map_err(|e| http::map_reqwest_error(TARGET, e))
	}

	async fn resolve(&self) -> Result<Arc<ProxyImpl>> {
		let connection = self.broker.get_connection(self.connection_id).await?;

		if connection.state.is_disconnecting() {
			let reason = format!("connection is {}", connection.state);

			return Err(Error::Unprocessable { reason });
		}

		let version = self.broker.bound_version(&connection).await?;
		let definition = version.definition(self.broker.encrypt.as_ref())?;
		let implementation = match &definition.auth {
			Auth::OAuth2(_) =>
				ProxyImpl::OAuth2(OAuth2Connection::new(self.broker.clone(), connection, version)?),
			Auth::ApiKey(api_key) => ProxyImpl::ApiKey(ApiKeyProxy::new(api_key)?),
			Auth::NoAuth => ProxyImpl::NoAuth(NoAuthProxy),
			Auth::Unsupported =>
				return Err(Error::NotImplemented {
					auth_type: definition.auth_type().to_string(),
				}),
		};

		Ok(Arc::new(implementation))
	}
}
impl Debug for ConnectionProxy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ConnectionProxy")
			.field("connection_id", &self.connection_id)
			.field("resolved", &self.resolved.initialized())
			.finish()
	}
}
