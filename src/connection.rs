//! User connections and their lifecycle.

// self
use crate::{
	_prelude::*,
	id::{ConnectionId, ConnectorId},
};

/// Lifecycle state of a [`Connection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
	/// Record exists; no credential flow started yet.
	Created,
	/// An OAuth2 state was issued and the user is being redirected.
	Authorizing,
	/// Credentials are in place and requests can be proxied.
	Ready,
	/// Disconnect requested; upstream revocation pending.
	Disconnecting,
	/// Credentials removed.
	Disconnected,
}
impl ConnectionState {
	/// Returns a stable label.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Created => "created",
			Self::Authorizing => "authorizing",
			Self::Ready => "ready",
			Self::Disconnecting => "disconnecting",
			Self::Disconnected => "disconnected",
		}
	}

	/// Returns true once a disconnect was requested.
	pub fn is_disconnecting(self) -> bool {
		matches!(self, Self::Disconnecting | Self::Disconnected)
	}
}
impl Display for ConnectionState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// One user's binding to a specific connector version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
	/// Connection identifier.
	pub id: ConnectionId,
	/// Bound connector.
	pub connector_id: ConnectorId,
	/// Bound connector version.
	pub connector_version: u64,
	/// Lifecycle state.
	pub state: ConnectionState,
	/// Creation instant.
	pub created_at: OffsetDateTime,
	/// Last state change.
	pub updated_at: OffsetDateTime,
	/// Soft-delete marker.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub deleted_at: Option<OffsetDateTime>,
}
impl Connection {
	/// Creates a connection in the `created` state.
	pub fn new(connector_id: ConnectorId, connector_version: u64) -> Self {
		let now = OffsetDateTime::now_utc();

		Self {
			id: ConnectionId::generate(),
			connector_id,
			connector_version,
			state: ConnectionState::Created,
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}

	/// Returns true after a soft delete.
	pub fn is_deleted(&self) -> bool {
		self.deleted_at.is_some()
	}
}
