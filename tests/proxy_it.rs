// crates.io
use httpmock::prelude::*;
// self
use authproxy::{
	_preludet::*,
	config::ValueSource,
	connectors::{ApiKeyPlacement, Auth, AuthApiKey},
	proxy::{ProxyImpl, ProxyRequest},
};

fn target(server: &MockServer, path: &str) -> Url {
	Url::parse(&server.url(path)).expect("Target URL should parse.")
}

#[tokio::test]
async fn oauth2_connections_send_bearer_tokens_and_replace_caller_credentials() {
	let server = MockServer::start_async().await;
	let test = build_test_broker();
	let auth = Auth::OAuth2(oauth2_auth(&server.base_url()));
	let version = publish_connector(&test.broker, "files", definition(auth)).await;
	let connection = seed_connection(&test.broker, &version).await;

	seed_token(&test.broker, connection.id, "access-1", Some("refresh-1"), Duration::hours(1))
		.await;

	let api_mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/v1/files")
				.header("authorization", "Bearer access-1")
				.header("x-trace", "abc")
				.json_body(serde_json::json!({ "name": "report.pdf" }));
			then.status(201)
				.header("content-type", "application/json")
				.json_body(serde_json::json!({ "id": "f-1" }));
		})
		.await;
	let request = ProxyRequest::get(target(&server, "/v1/files"))
		.with_method("POST")
		.with_header("Authorization", "Bearer forged")
		.with_header("X-Trace", "abc")
		.with_json(serde_json::json!({ "name": "report.pdf" }));
	let response =
		test.broker.proxy(connection.id, &request).await.expect("Proxying should succeed.");

	api_mock.assert_async().await;

	assert_eq!(response.status_code, 201);
	assert_eq!(response.body_json, Some(serde_json::json!({ "id": "f-1" })));
	assert!(response.body_raw.is_none());
}

#[tokio::test]
async fn expired_oauth2_tokens_are_refreshed_before_proxying() {
	let server = MockServer::start_async().await;
	let test = build_test_broker();
	let auth = Auth::OAuth2(oauth2_auth(&server.base_url()));
	let version = publish_connector(&test.broker, "files", definition(auth)).await;
	let connection = seed_connection(&test.broker, &version).await;

	seed_token(&test.broker, connection.id, "stale", Some("refresh-1"), Duration::seconds(-5))
		.await;

	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").form_urlencoded_tuple("grant_type", "refresh_token");
			then.status(200).header("content-type", "application/json").json_body(
				serde_json::json!({ "access_token": "access-2", "expires_in": 3600 }),
			);
		})
		.await;
	let api_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/me").header("authorization", "Bearer access-2");
			then.status(200).header("content-type", "text/plain").body("hello");
		})
		.await;
	let proxy = test.broker.connection_proxy(connection.id);
	let request = ProxyRequest::get(target(&server, "/v1/me"));

	for _ in 0..2 {
		let response = proxy.proxy_request(&request).await.expect("Proxying should succeed.");

		assert_eq!(response.status_code, 200);
		assert_eq!(response.body_raw.as_deref(), Some(&b"hello"[..]));
		assert!(response.body_json.is_none());
	}

	token_mock.assert_calls_async(1).await;
	api_mock.assert_calls_async(2).await;
	assert!(matches!(
		*proxy.implementation().await.expect("Implementation should be cached."),
		ProxyImpl::OAuth2(_)
	));
}

#[tokio::test]
async fn api_keys_are_injected_in_headers_and_query_parameters() {
	let server = MockServer::start_async().await;
	let test = build_test_broker();
	let header_auth = Auth::ApiKey(AuthApiKey {
		key: ValueSource::value("k-123"),
		placement: ApiKeyPlacement::Header {
			name: "Authorization".into(),
			prefix: "Token ".into(),
		},
	});
	let query_auth = Auth::ApiKey(AuthApiKey {
		key: ValueSource::value("k-456"),
		placement: ApiKeyPlacement::Query { param: "api_key".into() },
	});
	let header_version = publish_connector(&test.broker, "weather", definition(header_auth)).await;
	let query_version = publish_connector(&test.broker, "maps", definition(query_auth)).await;
	let header_connection = seed_connection(&test.broker, &header_version).await;
	let query_connection = seed_connection(&test.broker, &query_version).await;
	let header_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/forecast").header("authorization", "Token k-123");
			then.status(200);
		})
		.await;
	let query_mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/tiles")
				.query_param("api_key", "k-456")
				.query_param("zoom", "3");
			then.status(200);
		})
		.await;
	let response = test
		.broker
		.proxy(
			header_connection.id,
			&ProxyRequest::get(target(&server, "/forecast")).with_header("Authorization", "mine"),
		)
		.await
		.expect("Header API key proxying should succeed.");

	assert_eq!(response.status_code, 200);

	let mut tiles = target(&server, "/tiles");

	tiles.query_pairs_mut().append_pair("zoom", "3").append_pair("api_key", "forged");

	test.broker
		.proxy(query_connection.id, &ProxyRequest::get(tiles))
		.await
		.expect("Query API key proxying should succeed.");
	header_mock.assert_async().await;
	query_mock.assert_async().await;
}

#[tokio::test]
async fn api_key_connections_are_ready_on_initiation() {
	let server = MockServer::start_async().await;
	let test = build_test_broker();
	let auth = Auth::ApiKey(AuthApiKey {
		key: ValueSource::value("k-123"),
		placement: ApiKeyPlacement::Header { name: "X-Api-Key".into(), prefix: String::new() },
	});

	publish_connector(&test.broker, "weather", definition(auth)).await;

	let response = test
		.broker
		.initiate_connection(
			&test_actor(),
			authproxy::connections::InitiateConnectionRequest {
				connector_id: connector_id("weather"),
				return_to_url: Url::parse("https://app.example.com/").expect("URL should parse."),
			},
		)
		.await
		.expect("API key connections should initiate.");
	let api_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/forecast").header("x-api-key", "k-123");
			then.status(204);
		})
		.await;
	let proxied = test
		.broker
		.proxy(response.connection_id(), &ProxyRequest::get(target(&server, "/forecast")))
		.await
		.expect("Proxying should succeed.");

	api_mock.assert_async().await;

	assert_eq!(proxied.status_code, 204);
	assert!(proxied.body_raw.is_none() && proxied.body_json.is_none());
}

#[tokio::test]
async fn no_auth_connections_forward_requests_untouched() {
	let server = MockServer::start_async().await;
	let test = build_test_broker();
	let version = publish_connector(&test.broker, "public", definition(Auth::NoAuth)).await;
	let connection = seed_connection(&test.broker, &version).await;
	let api_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/status").header_missing("authorization");
			then.status(200).header("content-type", "application/json").body("{\"up\":true}");
		})
		.await;
	let response = test
		.broker
		.proxy(connection.id, &ProxyRequest::get(target(&server, "/status")))
		.await
		.expect("Proxying should succeed.");

	api_mock.assert_async().await;

	assert_eq!(response.body_json, Some(serde_json::json!({ "up": true })));
	assert_eq!(response.headers["content-type"], vec!["application/json".to_owned()]);
}

#[tokio::test]
async fn unsupported_auth_types_fail_before_any_network_call() {
	let server = MockServer::start_async().await;
	let test = build_test_broker();
	let version = publish_connector(&test.broker, "legacy", definition(Auth::Unsupported)).await;
	let connection = seed_connection(&test.broker, &version).await;
	let api_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/anything");
			then.status(200);
		})
		.await;
	let err = test
		.broker
		.proxy(connection.id, &ProxyRequest::get(target(&server, "/anything")))
		.await
		.expect_err("Unsupported auth types should not proxy.");

	assert!(err.is_not_implemented());
	api_mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn invalid_requests_and_disconnecting_connections_are_rejected() {
	let server = MockServer::start_async().await;
	let test = build_test_broker();
	let version = publish_connector(&test.broker, "public", definition(Auth::NoAuth)).await;
	let connection = seed_connection(&test.broker, &version).await;
	let two_bodies = ProxyRequest::get(target(&server, "/x"))
		.with_method("POST")
		.with_raw(b"raw".to_vec())
		.with_json(serde_json::json!({}));
	let err = test
		.broker
		.proxy(connection.id, &two_bodies)
		.await
		.expect_err("Two bodies should be rejected.");

	assert_eq!(err.status_code(), 400);

	let err = test
		.broker
		.proxy(authproxy::id::ConnectionId::generate(), &ProxyRequest::get(target(&server, "/x")))
		.await
		.expect_err("Unknown connections should be rejected.");

	assert_eq!(err.status_code(), 404);

	test.broker
		.disconnect_connection(connection.id)
		.await
		.expect("Disconnect should be accepted.");

	let err = test
		.broker
		.proxy(connection.id, &ProxyRequest::get(target(&server, "/x")))
		.await
		.expect_err("Disconnecting connections should not proxy.");

	assert_eq!(err.status_code(), 422);
}

#[tokio::test]
async fn raw_proxying_streams_the_body_into_the_sink() {
	let server = MockServer::start_async().await;
	let test = build_test_broker();
	let version = publish_connector(&test.broker, "public", definition(Auth::NoAuth)).await;
	let connection = seed_connection(&test.broker, &version).await;
	let payload = "chunk-".repeat(4_096);
	let api_mock = server
		.mock_async(|when, then| {
			when.method(PUT).path("/upload").body("input-bytes");
			then.status(200).header("content-type", "application/octet-stream").body(&payload);
		})
		.await;
	let request = ProxyRequest::get(target(&server, "/upload"))
		.with_method("PUT")
		.with_raw(b"input-bytes".to_vec());
	let mut sink = Vec::new();
	let head = test
		.broker
		.proxy_raw(connection.id, &request, &mut sink)
		.await
		.expect("Raw proxying should succeed.");

	api_mock.assert_async().await;

	assert_eq!(head.status_code, 200);
	assert_eq!(head.headers["content-type"], vec!["application/octet-stream".to_owned()]);
	assert_eq!(sink, payload.into_bytes());
}
