// crates.io
use httpmock::prelude::*;
// self
use authproxy::{
	_preludet::*,
	broker::{Broker, BrokerDeps},
	connectors::{Auth, ConnectorVersion},
	error::{ConfigError, ProtocolError},
	oauth2::RefreshMode,
};

async fn oauth2_connector(test: &TestBroker, server: &MockServer) -> ConnectorVersion {
	let auth = Auth::OAuth2(oauth2_auth(&server.base_url()));

	publish_connector(&test.broker, "files", definition(auth)).await
}

fn token_body(access_token: &str, refresh_token: Option<&str>) -> serde_json::Value {
	let mut body = serde_json::json!({
		"access_token": access_token,
		"token_type": "bearer",
		"expires_in": 3600,
	});

	if let Some(refresh_token) = refresh_token {
		body["refresh_token"] = refresh_token.into();
	}

	body
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_across_replicas_call_the_provider_once() {
	let server = MockServer::start_async().await;
	let config = test_config();
	let (deps, backends) =
		BrokerDeps::in_memory(&config).expect("In-memory dependencies should build.");
	let replica_a = Broker::new(config.clone(), deps.clone()).expect("Replica A should build.");
	let replica_b = Broker::new(config, deps).expect("Replica B should build.");
	let test = TestBroker { broker: replica_a.clone(), backends };
	let version = oauth2_connector(&test, &server).await;
	let connection = seed_connection(&replica_a, &version).await;
	let expired =
		seed_token(&replica_a, connection.id, "stale", Some("refresh-1"), Duration::seconds(-30))
			.await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.form_urlencoded_tuple("grant_type", "refresh_token")
				.form_urlencoded_tuple("refresh_token", "refresh-1");
			then.status(200)
				.header("content-type", "application/json")
				.delay(std::time::Duration::from_millis(100))
				.json_body(token_body("fresh", Some("refresh-2")));
		})
		.await;
	let mut handles = Vec::new();

	for i in 0..8 {
		let broker = if i % 2 == 0 { replica_a.clone() } else { replica_b.clone() };
		let connection_id = connection.id;

		handles.push(tokio::spawn(async move {
			let connection =
				broker.oauth2_connection(connection_id).await.expect("Connection should load.");
			let token = connection.get_valid_token().await.expect("Refresh should succeed.");

			token.access_token(broker.encrypt.as_ref()).expect("Token should decrypt.")
		}));
	}

	for handle in handles {
		let access_token = handle.await.expect("Refresh task should not panic.");

		assert_eq!(access_token.expose(), "fresh");
	}

	token_mock.assert_calls_async(1).await;

	let chain = replica_a
		.tokens
		.list_token_chain(connection.id)
		.await
		.expect("Token chain should load.");

	assert_eq!(chain.len(), 2);
	assert_eq!(chain[1].refreshed_from_id, Some(expired.id));

	let upstream_calls =
		replica_a.refresh_metrics.upstream_calls() + replica_b.refresh_metrics.upstream_calls();

	assert_eq!(upstream_calls, 1);
}

#[tokio::test]
async fn refresh_appends_to_the_chain_and_carries_the_refresh_token_forward() {
	let server = MockServer::start_async().await;
	let test = build_test_broker();
	let version = oauth2_connector(&test, &server).await;
	let connection = seed_connection(&test.broker, &version).await;
	let first =
		seed_token(&test.broker, connection.id, "access-1", Some("refresh-1"), Duration::hours(1))
			.await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.form_urlencoded_tuple("grant_type", "refresh_token")
				.form_urlencoded_tuple("refresh_token", "refresh-1")
				.form_urlencoded_tuple("client_id", CLIENT_ID)
				.form_urlencoded_tuple("client_secret", CLIENT_SECRET);
			then.status(200)
				.header("content-type", "application/json")
				.json_body(token_body("access-2", None));
		})
		.await;
	let oauth2 =
		test.broker.oauth2_connection(connection.id).await.expect("Connection should load.");
	let fresh = oauth2
		.refresh_access_token(RefreshMode::IfExpired)
		.await
		.expect("No-op refresh should succeed.");

	assert!(!fresh.is_refreshed());
	assert_eq!(fresh.token().id, first.id);
	token_mock.assert_calls_async(0).await;

	let refreshed = oauth2
		.refresh_access_token(RefreshMode::Force)
		.await
		.expect("Forced refresh should succeed.");

	token_mock.assert_calls_async(1).await;

	assert!(refreshed.is_refreshed());

	let token = refreshed.into_token();
	let encrypt = test.broker.encrypt.as_ref();

	assert_eq!(token.refreshed_from_id, Some(first.id));
	assert_eq!(token.access_token(encrypt).expect("Token should decrypt.").expose(), "access-2");
	assert_eq!(
		token
			.refresh_token(encrypt)
			.expect("Refresh token should decrypt.")
			.as_ref()
			.map(|secret| secret.expose()),
		Some("refresh-1")
	);
	assert_eq!(token.scopes, first.scopes);

	let chain = test
		.broker
		.tokens
		.list_token_chain(connection.id)
		.await
		.expect("Token chain should load.");

	assert_eq!(chain.iter().map(|token| token.id).collect::<Vec<_>>(), vec![first.id, token.id]);

	let current = test
		.broker
		.tokens
		.get_current_token(connection.id)
		.await
		.expect("Current token should load.")
		.expect("Connection should have a current token.");

	assert_eq!(current.id, token.id);
	assert_eq!(test.broker.refresh_metrics.noops(), 1);
}

#[tokio::test]
async fn expired_tokens_without_a_refresh_token_are_unprocessable() {
	let server = MockServer::start_async().await;
	let test = build_test_broker();
	let version = oauth2_connector(&test, &server).await;
	let connection = seed_connection(&test.broker, &version).await;

	seed_token(&test.broker, connection.id, "access-1", None, Duration::seconds(-1)).await;

	let oauth2 =
		test.broker.oauth2_connection(connection.id).await.expect("Connection should load.");
	let err = oauth2.get_valid_token().await.expect_err("Refresh should be impossible.");

	assert!(matches!(err, Error::Protocol(ProtocolError::MissingRefreshToken)));
	assert_eq!(err.status_code(), 422);
}

#[tokio::test]
async fn connections_without_tokens_are_unprocessable() {
	let server = MockServer::start_async().await;
	let test = build_test_broker();
	let version = oauth2_connector(&test, &server).await;
	let connection = seed_connection(&test.broker, &version).await;
	let oauth2 =
		test.broker.oauth2_connection(connection.id).await.expect("Connection should load.");
	let err = oauth2.get_valid_token().await.expect_err("There is no token to return.");

	assert_eq!(err.status_code(), 422);
}

#[tokio::test]
async fn invalid_grant_is_classified_and_leaves_the_chain_intact() {
	let server = MockServer::start_async().await;
	let test = build_test_broker();
	let version = oauth2_connector(&test, &server).await;
	let connection = seed_connection(&test.broker, &version).await;
	let seeded =
		seed_token(&test.broker, connection.id, "access-1", Some("revoked"), Duration::seconds(-1))
			.await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(400).header("content-type", "application/json").json_body(
				serde_json::json!({
					"error": "invalid_grant",
					"error_description": "Refresh token revoked.",
				}),
			);
		})
		.await;
	let oauth2 =
		test.broker.oauth2_connection(connection.id).await.expect("Connection should load.");
	let err = oauth2
		.refresh_access_token(RefreshMode::IfExpired)
		.await
		.expect_err("Revoked refresh tokens should fail.");

	token_mock.assert_async().await;

	assert!(matches!(err, Error::InvalidGrant { .. }));

	let current = test
		.broker
		.tokens
		.get_current_token(connection.id)
		.await
		.expect("Current token should load.")
		.expect("Seeded token should remain current.");

	assert_eq!(current.id, seeded.id);
	assert!(test.backends.kv.is_empty());
}

#[tokio::test]
async fn brokers_reject_lock_settings_that_cannot_make_progress() {
	let mut config = test_config();
	let (deps, _) = BrokerDeps::in_memory(&config).expect("In-memory dependencies should build.");

	config.oauth2.refresh_lock.ttl = Duration::ZERO;

	let err = Broker::new(config.clone(), deps.clone()).expect_err("A zero lock TTL should fail.");

	assert!(matches!(err, Error::Config(ConfigError::NonPositiveDuration { .. })));

	config.oauth2.refresh_lock.ttl = Duration::seconds(30);
	config.oauth2.refresh_lock.max_backoff = Duration::milliseconds(1);

	let err = Broker::new(config, deps).expect_err("An inverted backoff range should fail.");

	assert!(matches!(err, Error::Config(ConfigError::BackoffOutOfOrder)));
}
