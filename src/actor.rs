//! Short-lived, self-signed actor tokens.
//!
//! The public redirect URL carries one of these tokens so the redirect leg can identify the acting
//! user without relying on cookies (host applications may start the flow cross-origin).
//! Format: `base64url(actor) "." expires_unix "." base64url(hmac_sha256(actor "." expires_unix))`.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;
// self
use crate::{_prelude::*, config::ValueSource, error::ConfigError, id::ActorId};

type HmacSha256 = Hmac<Sha256>;

/// Failures raised while signing or verifying actor tokens.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ActorTokenError {
	/// The signing key is unusable.
	#[error("Actor signing key is invalid.")]
	InvalidKey,
	/// Token is not in the expected format.
	#[error("Actor token is malformed.")]
	Malformed,
	/// Signature does not match.
	#[error("Actor token signature is invalid.")]
	BadSignature,
	/// Token lifetime elapsed.
	#[error("Actor token has expired.")]
	Expired,
}

/// Issues and verifies short-lived tokens naming the acting user.
pub trait ActorSigner
where
	Self: Send + Sync,
{
	/// Signs a token for `actor` valid for `ttl`.
	fn sign(&self, actor: &ActorId, ttl: Duration) -> Result<String, ActorTokenError>;

	/// Verifies a token and returns the actor it names.
	fn verify(&self, token: &str) -> Result<ActorId, ActorTokenError>;
}

/// HMAC-SHA256 [`ActorSigner`].
pub struct HmacActorSigner {
	key: Zeroizing<Vec<u8>>,
}
impl HmacActorSigner {
	/// Creates a signer over raw key bytes.
	pub fn new(key: impl Into<Vec<u8>>) -> Result<Self, ActorTokenError> {
		let key = Zeroizing::new(key.into());

		if key.is_empty() {
			return Err(ActorTokenError::InvalidKey);
		}

		Ok(Self { key })
	}

	/// Resolves key material from a [`ValueSource`].
	pub fn from_value_source(source: &ValueSource) -> Result<Self, ConfigError> {
		let secret = source.resolve()?;

		Self::new(secret.expose().as_bytes()).map_err(|_| ConfigError::InvalidKey)
	}

	fn mac(&self, payload: &str) -> Result<HmacSha256, ActorTokenError> {
		let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
			.map_err(|_| ActorTokenError::InvalidKey)?;

		mac.update(payload.as_bytes());

		Ok(mac)
	}

	fn verify_at(&self, token: &str, now: OffsetDateTime) -> Result<ActorId, ActorTokenError> {
		let mut parts = token.splitn(3, '.');
		let (Some(actor), Some(expires), Some(signature)) =
			(parts.next(), parts.next(), parts.next())
		else {
			return Err(ActorTokenError::Malformed);
		};
		let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| ActorTokenError::Malformed)?;

		self.mac(&format!("{actor}.{expires}"))?
			.verify_slice(&signature)
			.map_err(|_| ActorTokenError::BadSignature)?;

		let expires = expires.parse::<i64>().map_err(|_| ActorTokenError::Malformed)?;

		if now.unix_timestamp() >= expires {
			return Err(ActorTokenError::Expired);
		}

		let actor = URL_SAFE_NO_PAD.decode(actor).map_err(|_| ActorTokenError::Malformed)?;
		let actor = String::from_utf8(actor).map_err(|_| ActorTokenError::Malformed)?;

		ActorId::new(actor).map_err(|_| ActorTokenError::Malformed)
	}
}
impl Debug for HmacActorSigner {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("HmacActorSigner(<redacted>)")
	}
}
impl ActorSigner for HmacActorSigner {
	fn sign(&self, actor: &ActorId, ttl: Duration) -> Result<String, ActorTokenError> {
		let expires = (OffsetDateTime::now_utc() + ttl).unix_timestamp();
		let payload = format!("{}.{expires}", URL_SAFE_NO_PAD.encode(actor.as_bytes()));
		let signature = self.mac(&payload)?.finalize().into_bytes();

		Ok(format!("{payload}.{}", URL_SAFE_NO_PAD.encode(signature)))
	}

	fn verify(&self, token: &str) -> Result<ActorId, ActorTokenError> {
		self.verify_at(token, OffsetDateTime::now_utc())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn signer() -> HmacActorSigner {
		HmacActorSigner::new(b"actor-signing-key".to_vec()).expect("Signer fixture should build.")
	}

	#[test]
	fn signed_tokens_verify_until_expiry() {
		let signer = signer();
		let actor = ActorId::new("user.with.dots@example.com").expect("Actor should be valid.");
		let token = signer.sign(&actor, Duration::minutes(5)).expect("Signing should succeed.");

		assert_eq!(signer.verify(&token).expect("Fresh token should verify."), actor);
		assert_eq!(
			signer.verify_at(&token, OffsetDateTime::now_utc() + Duration::minutes(6)),
			Err(ActorTokenError::Expired)
		);
	}

	#[test]
	fn tampered_tokens_are_rejected() {
		let signer = signer();
		let actor = ActorId::new("alice").expect("Actor should be valid.");
		let token = signer.sign(&actor, Duration::minutes(5)).expect("Signing should succeed.");
		let tail = &token[token.find('.').unwrap_or(0)..];
		let forged = format!("{}{tail}", URL_SAFE_NO_PAD.encode("mallory"));
		let other = HmacActorSigner::new(b"other-key".to_vec()).expect("Signer should build.");

		assert_eq!(signer.verify(&forged), Err(ActorTokenError::BadSignature));
		assert_eq!(other.verify(&token), Err(ActorTokenError::BadSignature));
		assert_eq!(signer.verify("garbage"), Err(ActorTokenError::Malformed));
	}
}
