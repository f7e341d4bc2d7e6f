//! Background tasks: the expiring-token sweep, refresh jobs, and connection teardown.
//!
//! Scheduling and delivery belong to an external worker pool reached through [`TaskEnqueuer`].
//! Delivery is at-least-once, so [`Broker::run_task`] is safe to repeat for the same task.

// std
use std::collections::{BTreeSet, VecDeque};
// self
use crate::{
	_prelude::*,
	broker::Broker,
	config::duration,
	connection::ConnectionState,
	connectors::{Auth, AuthType},
	id::{ConnectionId, TaskId},
	oauth2::{OAuth2Connection, RefreshMode, RefreshOutcome},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::StoreFuture,
};

/// Work item handed to the worker pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Task {
	/// Refresh a connection's access token if it expires within `refresh_within`.
	#[serde(rename = "refresh_oauth2_token")]
	RefreshOAuth2Token {
		/// Target connection.
		connection_id: ConnectionId,
		/// Lead time used by the sweep that produced this task.
		#[serde(rename = "refresh_within_secs", with = "duration::secs")]
		refresh_within: Duration,
	},
	/// Revoke upstream credentials, drop tokens, and delete the connection.
	#[serde(rename = "disconnect_connection")]
	DisconnectConnection {
		/// Target connection.
		connection_id: ConnectionId,
	},
}

/// Hands tasks to the external worker pool.
pub trait TaskEnqueuer
where
	Self: Send + Sync,
{
	/// Enqueues `task` and returns its identifier.
	fn enqueue(&self, task: Task) -> StoreFuture<'_, TaskId>;
}

/// A task sitting in a [`MemoryTaskQueue`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedTask {
	/// Task identifier.
	pub id: TaskId,
	/// Payload.
	pub task: Task,
	/// Enqueue instant.
	pub enqueued_at: OffsetDateTime,
}

/// FIFO queue for tests and single-node deployments.
#[derive(Clone, Debug, Default)]
pub struct MemoryTaskQueue(Arc<Mutex<VecDeque<QueuedTask>>>);
impl MemoryTaskQueue {
	/// Number of queued tasks.
	pub fn len(&self) -> usize {
		self.0.lock().len()
	}

	/// Returns true when nothing is queued.
	pub fn is_empty(&self) -> bool {
		self.0.lock().is_empty()
	}

	/// Removes and returns the oldest task.
	pub fn pop(&self) -> Option<QueuedTask> {
		self.0.lock().pop_front()
	}

	/// Removes and returns every queued task, oldest first.
	pub fn drain(&self) -> Vec<QueuedTask> {
		self.0.lock().drain(..).collect()
	}
}
impl TaskEnqueuer for MemoryTaskQueue {
	fn enqueue(&self, task: Task) -> StoreFuture<'_, TaskId> {
		Box::pin(async move {
			let id = TaskId::generate();
			let queued = QueuedTask { id, task, enqueued_at: OffsetDateTime::now_utc() };

			self.0.lock().push_back(queued);

			Ok(id)
		})
	}
}

/// Result of [`Broker::run_task`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
	/// The refresh ran (possibly as a no-op).
	Refreshed(RefreshOutcome),
	/// The connection was torn down.
	Disconnected(DisconnectOutcome),
	/// Nothing to do.
	Skipped {
		/// Why the task was skipped.
		reason: &'static str,
	},
}

/// Report of a disconnect task.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisconnectOutcome {
	/// Upstream revocation succeeded or was not needed.
	pub revoked: bool,
	/// Last revocation error when every attempt failed.
	pub revoke_error: Option<String>,
	/// Token rows removed.
	pub tokens_deleted: usize,
}

impl Broker {
	/// Enqueues one refresh task per connection whose token expires within the sweep horizon.
	///
	/// The horizon is the longest refresh lead time among connector versions with background
	/// refresh enabled. Tokens without a refresh token are skipped.
	pub async fn enqueue_expiring_token_refreshes(&self) -> Result<Vec<TaskId>> {
		let Some(horizon) = self.refresh_horizon().await? else {
			return Ok(Vec::new());
		};
		let expiring =
			self.tokens.list_expiring_tokens(OffsetDateTime::now_utc() + horizon).await?;
		let mut seen = BTreeSet::new();
		let mut ids = Vec::new();

		for token in expiring {
			if !token.has_refresh_token() || !seen.insert(token.connection_id) {
				continue;
			}

			let task = Task::RefreshOAuth2Token {
				connection_id: token.connection_id,
				refresh_within: horizon,
			};

			ids.push(self.tasks.enqueue(task).await?);
		}

		#[cfg(feature = "tracing")]
		tracing::info!(
			enqueued = ids.len(),
			horizon_secs = horizon.whole_seconds(),
			"refresh sweep finished"
		);

		Ok(ids)
	}

	/// Executes one task.
	pub async fn run_task(&self, task: &Task) -> Result<TaskOutcome> {
		match task {
			Task::RefreshOAuth2Token { connection_id, refresh_within } =>
				self.run_refresh(*connection_id, *refresh_within).await,
			Task::DisconnectConnection { connection_id } =>
				self.run_disconnect(*connection_id).await,
		}
	}

	async fn refresh_horizon(&self) -> Result<Option<Duration>> {
		let default_lead = self.config.oauth2.default_refresh_time_before_expiry;
		let mut horizon = None::<Duration>;

		for version in self.connectors.list_connector_versions().await? {
			let definition = match version.definition(self.encrypt.as_ref()) {
				Ok(definition) => definition,
				Err(_e) => {
					#[cfg(feature = "tracing")]
					tracing::warn!(
						connector = %version.id,
						version = version.version,
						error = %_e,
						"skipping undecryptable connector version"
					);

					continue;
				},
			};
			let Auth::OAuth2(auth) = &definition.auth else {
				continue;
			};
			let Some(token) = auth.token.as_ref().filter(|token| token.refresh_in_background)
			else {
				continue;
			};
			let lead = token.refresh_time_before_expiry.unwrap_or(default_lead);

			horizon = Some(horizon.map_or(lead, |current| current.max(lead)));
		}

		Ok(horizon)
	}

	async fn run_refresh(
		&self,
		connection_id: ConnectionId,
		refresh_within: Duration,
	) -> Result<TaskOutcome> {
		let connection = match self.connections.get_connection(connection_id).await? {
			Some(connection) if !connection.state.is_disconnecting() => connection,
			_ => return Ok(TaskOutcome::Skipped { reason: "connection is gone" }),
		};
		let version = self.bound_version(&connection).await?;
		let oauth2 = OAuth2Connection::new(self.clone(), connection, version)?;

		if !oauth2.auth().token.as_ref().is_some_and(|token| token.refresh_in_background) {
			return Ok(TaskOutcome::Skipped { reason: "background refresh is disabled" });
		}

		let mode = RefreshMode::ExpiringWithin(refresh_within);

		Ok(TaskOutcome::Refreshed(oauth2.refresh_access_token(mode).await?))
	}

	async fn run_disconnect(&self, connection_id: ConnectionId) -> Result<TaskOutcome> {
		const KIND: FlowKind = FlowKind::Disconnect;

		let span = FlowSpan::new(KIND, "run_disconnect");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let Some(connection) = self.connections.get_connection(connection_id).await? else {
					return Ok(TaskOutcome::Skipped { reason: "connection is gone" });
				};
				let mut outcome = DisconnectOutcome::default();

				match self.bound_version(&connection).await {
					Ok(version) if version.auth_type == AuthType::OAuth2 => {
						let oauth2 = OAuth2Connection::new(self.clone(), connection, version);
						let revoked = match oauth2 {
							Ok(oauth2) => self.revoke_with_retry(&oauth2).await,
							Err(e) => Err(e),
						};

						match revoked {
							Ok(()) => outcome.revoked = true,
							Err(e) => outcome.revoke_error = Some(e.to_string()),
						}
					},
					Ok(_) => outcome.revoked = true,
					Err(e) => outcome.revoke_error = Some(e.to_string()),
				}

				outcome.tokens_deleted = self.tokens.delete_tokens(connection_id).await?;

				self.connections
					.set_connection_state(connection_id, ConnectionState::Disconnected)
					.await?;
				self.connections.delete_connection(connection_id).await?;

				#[cfg(feature = "tracing")]
				tracing::info!(
					connection_id = %connection_id,
					revoked = outcome.revoked,
					tokens_deleted = outcome.tokens_deleted,
					"connection disconnected"
				);

				Ok(TaskOutcome::Disconnected(outcome))
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}

	async fn revoke_with_retry(&self, oauth2: &OAuth2Connection) -> Result<()> {
		let attempts = self.config.oauth2.revoke_attempts.max(1);
		let mut backoff = duration::to_std(self.config.oauth2.revoke_backoff);
		let mut attempt = 1;

		loop {
			match oauth2.revoke_refresh_token().await {
				Ok(()) => return Ok(()),
				Err(e) if attempt >= attempts => {
					#[cfg(feature = "tracing")]
					tracing::warn!(
						connection_id = %oauth2.id(),
						attempts,
						error = %e,
						"upstream revocation failed; continuing disconnect"
					);

					return Err(e);
				},
				Err(_) => {
					attempt += 1;

					tokio::time::sleep(backoff).await;

					backoff *= 2;
				},
			}
		}
	}
}
