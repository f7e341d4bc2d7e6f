//! Wire shapes of proxied requests and responses.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{
	Method, Request,
	header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};
use serde_json::Value;
// self
use crate::{_prelude::*, http};

const HOP_BY_HOP: &[&str] = &[
	"connection",
	"content-length",
	"host",
	"keep-alive",
	"proxy-authenticate",
	"proxy-authorization",
	"te",
	"trailer",
	"transfer-encoding",
	"upgrade",
];

/// Request to forward to a third party through a connection.
///
/// At most one of `body_raw` and `body_json` may be set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
	/// Absolute target URL.
	pub url: Url,
	/// HTTP method; defaults to `GET`.
	#[serde(default = "default_method")]
	pub method: String,
	/// Request headers; multiple values per name are preserved.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub headers: BTreeMap<String, Vec<String>>,
	/// Raw body, base64 on the wire.
	#[serde(default, skip_serializing_if = "Option::is_none", with = "base64_body")]
	pub body_raw: Option<Vec<u8>>,
	/// JSON body.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub body_json: Option<Value>,
}
impl ProxyRequest {
	/// Creates a `GET` request for `url`.
	pub fn get(url: Url) -> Self {
		Self {
			url,
			method: default_method(),
			headers: BTreeMap::new(),
			body_raw: None,
			body_json: None,
		}
	}

	/// Sets the HTTP method.
	pub fn with_method(mut self, method: impl Into<String>) -> Self {
		self.method = method.into();

		self
	}

	/// Appends a header value.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.entry(name.into()).or_default().push(value.into());

		self
	}

	/// Sets a JSON body.
	pub fn with_json(mut self, body: Value) -> Self {
		self.body_json = Some(body);

		self
	}

	/// Sets a raw body.
	pub fn with_raw(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body_raw = Some(body.into());

		self
	}

	/// Checks the request before anything is sent.
	pub fn validate(&self) -> Result<()> {
		if self.body_raw.is_some() && self.body_json.is_some() {
			return Err(Error::bad_request("only one of bodyRaw and bodyJson may be set"));
		}
		if !matches!(self.url.scheme(), "http" | "https") {
			let scheme = self.url.scheme();

			return Err(Error::bad_request(format!("unsupported URL scheme `{scheme}`")));
		}

		self.parsed_method().map(|_| ())
	}

	pub(crate) fn to_reqwest(&self, client: &ReqwestClient) -> Result<Request> {
		let mut headers = HeaderMap::new();

		for (name, values) in &self.headers {
			let name = HeaderName::from_bytes(name.as_bytes())
				.map_err(|_| Error::bad_request(format!("invalid header name `{name}`")))?;

			if HOP_BY_HOP.contains(&name.as_str()) {
				continue;
			}

			for value in values {
				let value = HeaderValue::from_str(value).map_err(|_| {
					Error::bad_request(format!("invalid value for header `{name}`"))
				})?;

				headers.append(name.clone(), value);
			}
		}

		let mut builder = client.request(self.parsed_method()?, self.url.clone()).headers(headers);

		if let Some(raw) = &self.body_raw {
			builder = builder.body(raw.clone());
		} else if let Some(json) = &self.body_json {
			builder = builder.json(json);
		}

		builder.build().map_err(|e| http::map_reqwest_error("proxy target", e))
	}

	fn parsed_method(&self) -> Result<Method> {
		Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
			.map_err(|_| Error::bad_request(format!("invalid HTTP method `{}`", self.method)))
	}
}

/// Buffered upstream response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
	/// Upstream status code.
	pub status_code: u16,
	/// Upstream headers.
	#[serde(default)]
	pub headers: BTreeMap<String, Vec<String>>,
	/// Body when it is not JSON, base64 on the wire.
	#[serde(default, skip_serializing_if = "Option::is_none", with = "base64_body")]
	pub body_raw: Option<Vec<u8>>,
	/// Body when the upstream declared and delivered JSON.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub body_json: Option<Value>,
}
impl ProxyResponse {
	pub(crate) fn from_parts(head: ProxyResponseHead, body: &[u8]) -> Self {
		let declares_json = head
			.headers
			.get(CONTENT_TYPE.as_str())
			.and_then(|values| values.first())
			.is_some_and(|value| value.to_ascii_lowercase().contains("json"));
		let body_json = if declares_json && !body.is_empty() {
			serde_json::from_slice::<Value>(body).ok()
		} else {
			None
		};
		let body_raw = match body_json {
			Some(_) => None,
			None if body.is_empty() => None,
			None => Some(body.to_vec()),
		};

		Self { status_code: head.status_code, headers: head.headers, body_raw, body_json }
	}
}

/// Status and headers of a streamed upstream response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponseHead {
	/// Upstream status code.
	pub status_code: u16,
	/// Upstream headers.
	pub headers: BTreeMap<String, Vec<String>>,
}
impl ProxyResponseHead {
	pub(crate) fn from_response(response: &reqwest::Response) -> Self {
		let mut headers = BTreeMap::<String, Vec<String>>::new();

		for (name, value) in response.headers() {
			headers
				.entry(name.as_str().to_owned())
				.or_default()
				.push(String::from_utf8_lossy(value.as_bytes()).into_owned());
		}

		Self { status_code: response.status().as_u16(), headers }
	}
}

fn default_method() -> String {
	Method::GET.as_str().to_owned()
}

mod base64_body {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use super::*;

	pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match value {
			Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
	where
		D: Deserializer<'de>,
	{
		Option::<String>::deserialize(deserializer)?
			.map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
			.transpose()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url() -> Url {
		Url::parse("https://api.example.com/v1/items").expect("URL should parse.")
	}

	#[test]
	fn requests_reject_two_bodies_and_bad_methods() {
		let both =
			ProxyRequest::get(url()).with_raw(b"x".to_vec()).with_json(serde_json::json!({}));

		assert!(matches!(both.validate(), Err(Error::BadRequest { .. })));

		let bad_method = ProxyRequest::get(url()).with_method("GE T");

		assert!(matches!(bad_method.validate(), Err(Error::BadRequest { .. })));
		assert!(ProxyRequest::get(url()).with_method("post").validate().is_ok());
	}

	#[test]
	fn wire_format_uses_camel_case_and_base64() {
		let request: ProxyRequest = serde_json::from_value(serde_json::json!({
			"url": "https://api.example.com/upload",
			"method": "PUT",
			"headers": { "x-trace": ["a", "b"] },
			"bodyRaw": "aGVsbG8=",
		}))
		.expect("Request should deserialize.");

		assert_eq!(request.body_raw.as_deref(), Some(&b"hello"[..]));
		assert_eq!(request.headers["x-trace"], vec!["a".to_owned(), "b".to_owned()]);

		let defaulted: ProxyRequest =
			serde_json::from_value(serde_json::json!({ "url": "https://api.example.com" }))
				.expect("Minimal request should deserialize.");

		assert_eq!(defaulted.method, "GET");
	}

	#[test]
	fn hop_by_hop_headers_are_not_forwarded() {
		let client = ReqwestClient::new();
		let request = ProxyRequest::get(url())
			.with_header("Host", "evil.example.com")
			.with_header("X-Trace", "1")
			.to_reqwest(&client)
			.expect("Request should build.");

		assert!(request.headers().get("host").is_none());
		assert_eq!(request.headers()["x-trace"], "1");
	}

	#[test]
	fn responses_prefer_json_when_declared_and_valid() {
		let head = |content_type: &str| ProxyResponseHead {
			status_code: 200,
			headers: BTreeMap::from([("content-type".to_owned(), vec![content_type.to_owned()])]),
		};
		let json = ProxyResponse::from_parts(head("application/json"), br#"{"ok":true}"#);

		assert_eq!(json.body_json, Some(serde_json::json!({ "ok": true })));
		assert!(json.body_raw.is_none());

		let broken = ProxyResponse::from_parts(head("application/json"), b"{oops");

		assert_eq!(broken.body_raw.as_deref(), Some(&b"{oops"[..]));

		let text = ProxyResponse::from_parts(head("text/plain"), b"{\"ok\":true}");

		assert!(text.body_json.is_none());
	}
}
