//! Symmetric encryption of secret blobs at rest.
//!
//! Every ciphertext is bound to an [`EncryptionScope`]: a per-scope AES-256-GCM key is derived from
//! the global key with HMAC-SHA256, and the scope label is authenticated as AAD. Ciphertext
//! produced for one connection therefore never decrypts under another connection's scope.

// crates.io
use aes_gcm::{
	Aes256Gcm, KeyInit, Nonce,
	aead::{Aead, Payload},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;
// self
use crate::{
	_prelude::*,
	config::ValueSource,
	error::ConfigError,
	id::{ConnectionId, ConnectorId},
	secret::Secret,
};

type HmacSha256 = Hmac<Sha256>;

const FORMAT_VERSION: u8 = 0x01;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Failures raised by an [`EncryptService`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CryptoError {
	/// The cipher rejected the plaintext.
	#[error("Encryption failed.")]
	Encrypt,
	/// Authentication failed; wrong key, wrong scope, or tampered ciphertext.
	#[error("Decryption failed.")]
	Decrypt,
	/// The stored value is not in the expected envelope format.
	#[error("Ciphertext is malformed.")]
	Malformed,
	/// Decrypted bytes are not valid UTF-8.
	#[error("Decrypted value is not valid UTF-8.")]
	NotUtf8,
}

/// Key scope a secret is encrypted under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncryptionScope<'a> {
	/// Process-wide key.
	Global,
	/// Secrets owned by a single connection (OAuth2 tokens).
	Connection(ConnectionId),
	/// Secrets owned by one connector version (its definition).
	ConnectorVersion {
		/// Connector identifier.
		connector: &'a ConnectorId,
		/// Version number.
		version: u64,
	},
}
impl EncryptionScope<'_> {
	/// Stable label used for key derivation and as AAD.
	pub fn label(&self) -> String {
		match self {
			Self::Global => "global".into(),
			Self::Connection(id) => format!("connection:{id}"),
			Self::ConnectorVersion { connector, version } =>
				format!("connector-version:{connector}:{version}"),
		}
	}
}

/// Base64 envelope holding `version || nonce || ciphertext+tag`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedField(String);
impl EncryptedField {
	/// Wraps an already-encoded envelope (e.g., loaded from storage).
	pub fn from_encoded(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the encoded envelope.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Debug for EncryptedField {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "EncryptedField(<{} bytes>)", self.0.len())
	}
}

/// Encrypts and decrypts secret blobs under a scope.
pub trait EncryptService
where
	Self: Send + Sync,
{
	/// Encrypts `plaintext` under `scope`.
	fn encrypt(
		&self,
		scope: &EncryptionScope<'_>,
		plaintext: &[u8],
	) -> Result<EncryptedField, CryptoError>;

	/// Decrypts a value previously produced by [`encrypt`](Self::encrypt) under the same scope.
	fn decrypt(
		&self,
		scope: &EncryptionScope<'_>,
		field: &EncryptedField,
	) -> Result<Vec<u8>, CryptoError>;

	/// Encrypts a UTF-8 string.
	fn encrypt_str(
		&self,
		scope: &EncryptionScope<'_>,
		value: &str,
	) -> Result<EncryptedField, CryptoError> {
		self.encrypt(scope, value.as_bytes())
	}

	/// Decrypts into a redacting [`Secret`].
	fn decrypt_str(
		&self,
		scope: &EncryptionScope<'_>,
		field: &EncryptedField,
	) -> Result<Secret, CryptoError> {
		let bytes = Zeroizing::new(self.decrypt(scope, field)?);
		let text = std::str::from_utf8(&bytes).map_err(|_| CryptoError::NotUtf8)?;

		Ok(Secret::new(text))
	}
}

/// AES-256-GCM implementation of [`EncryptService`].
pub struct AesGcmEncryptService {
	key: Zeroizing<[u8; KEY_LEN]>,
}
impl AesGcmEncryptService {
	/// Builds the service from raw key bytes.
	pub fn new(key: [u8; KEY_LEN]) -> Self {
		Self { key: Zeroizing::new(key) }
	}

	/// Builds the service from base64-encoded key material.
	pub fn from_base64(encoded: &Secret) -> Result<Self, ConfigError> {
		let decoded = Zeroizing::new(
			STANDARD.decode(encoded.expose().trim()).map_err(|_| ConfigError::InvalidKey)?,
		);
		let key: [u8; KEY_LEN] =
			decoded.as_slice().try_into().map_err(|_| ConfigError::InvalidKey)?;

		Ok(Self::new(key))
	}

	/// Resolves key material from a [`ValueSource`].
	pub fn from_value_source(source: &ValueSource) -> Result<Self, ConfigError> {
		Self::from_base64(&source.resolve()?)
	}

	fn cipher_for(&self, label: &str) -> Result<Aes256Gcm, CryptoError> {
		let mut mac = <HmacSha256 as Mac>::new_from_slice(self.key.as_slice())
			.map_err(|_| CryptoError::Encrypt)?;

		mac.update(label.as_bytes());

		let mut derived = Zeroizing::new([0_u8; KEY_LEN]);

		derived.copy_from_slice(&mac.finalize().into_bytes());

		<Aes256Gcm as KeyInit>::new_from_slice(derived.as_slice()).map_err(|_| CryptoError::Encrypt)
	}
}
impl Debug for AesGcmEncryptService {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("AesGcmEncryptService(<redacted>)")
	}
}
impl EncryptService for AesGcmEncryptService {
	fn encrypt(
		&self,
		scope: &EncryptionScope<'_>,
		plaintext: &[u8],
	) -> Result<EncryptedField, CryptoError> {
		let label = scope.label();
		let cipher = self.cipher_for(&label)?;
		let mut nonce = [0_u8; NONCE_LEN];

		rand::rng().fill_bytes(&mut nonce);

		let ciphertext = cipher
			.encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: label.as_bytes() })
			.map_err(|_| CryptoError::Encrypt)?;
		let mut envelope = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());

		envelope.push(FORMAT_VERSION);
		envelope.extend_from_slice(&nonce);
		envelope.extend_from_slice(&ciphertext);

		Ok(EncryptedField(STANDARD.encode(envelope)))
	}

	fn decrypt(
		&self,
		scope: &EncryptionScope<'_>,
		field: &EncryptedField,
	) -> Result<Vec<u8>, CryptoError> {
		let envelope = STANDARD.decode(field.as_str()).map_err(|_| CryptoError::Malformed)?;

		if envelope.len() < 1 + NONCE_LEN + TAG_LEN || envelope[0] != FORMAT_VERSION {
			return Err(CryptoError::Malformed);
		}

		let label = scope.label();
		let cipher = self.cipher_for(&label)?;
		let (nonce, ciphertext) = envelope[1..].split_at(NONCE_LEN);

		cipher
			.decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: label.as_bytes() })
			.map_err(|_| CryptoError::Decrypt)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn service() -> AesGcmEncryptService {
		AesGcmEncryptService::new([7_u8; KEY_LEN])
	}

	#[test]
	fn ciphertext_is_bound_to_its_scope() {
		let service = service();
		let first = EncryptionScope::Connection(ConnectionId::generate());
		let second = EncryptionScope::Connection(ConnectionId::generate());
		let field =
			service.encrypt_str(&first, "access-token").expect("Encryption should succeed.");

		assert_eq!(
			service.decrypt_str(&first, &field).expect("Same scope should decrypt.").expose(),
			"access-token"
		);
		assert_eq!(service.decrypt(&second, &field), Err(CryptoError::Decrypt));
		assert_eq!(service.decrypt(&EncryptionScope::Global, &field), Err(CryptoError::Decrypt));
	}

	#[test]
	fn wrong_key_and_garbage_fail() {
		let field = service()
			.encrypt(&EncryptionScope::Global, b"payload")
			.expect("Encryption should succeed.");
		let other = AesGcmEncryptService::new([9_u8; KEY_LEN]);

		assert_eq!(other.decrypt(&EncryptionScope::Global, &field), Err(CryptoError::Decrypt));
		assert_eq!(
			service().decrypt(&EncryptionScope::Global, &EncryptedField::from_encoded("%%%")),
			Err(CryptoError::Malformed)
		);
	}

	#[test]
	fn base64_keys_must_be_32_bytes() {
		let good = Secret::new(STANDARD.encode([1_u8; KEY_LEN]));
		let short = Secret::new(STANDARD.encode([1_u8; 16]));

		assert!(AesGcmEncryptService::from_base64(&good).is_ok());
		assert!(matches!(AesGcmEncryptService::from_base64(&short), Err(ConfigError::InvalidKey)));
	}
}
