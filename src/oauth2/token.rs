//! Append-only OAuth2 token rows and the plaintext credentials they seal.

// self
use crate::{
	_prelude::*,
	crypto::{EncryptService, EncryptedField, EncryptionScope},
	id::{ConnectionId, TokenId},
	secret::Secret,
};

/// Encrypted OAuth2 credentials of a connection.
///
/// Rows are never updated in place. A refresh appends a new row whose `refreshed_from_id` points
/// at the row it replaced, so each connection owns an append-only chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Token {
	/// Token row identifier.
	pub id: TokenId,
	/// Owning connection.
	pub connection_id: ConnectionId,
	/// Row this one superseded, if it came from a refresh.
	pub refreshed_from_id: Option<TokenId>,
	/// Access token encrypted under the connection scope.
	pub encrypted_access_token: EncryptedField,
	/// Refresh token encrypted under the connection scope.
	pub encrypted_refresh_token: Option<EncryptedField>,
	/// Access token expiry; `None` means the provider did not announce one.
	pub access_token_expires_at: Option<OffsetDateTime>,
	/// Scopes granted by the provider.
	pub scopes: Vec<String>,
	/// Insert instant.
	pub created_at: OffsetDateTime,
	/// Soft-delete marker.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub deleted_at: Option<OffsetDateTime>,
}
impl OAuth2Token {
	/// Encrypts plaintext credentials into a new row for `connection_id`.
	pub fn seal(
		encrypt: &dyn EncryptService,
		connection_id: ConnectionId,
		credentials: TokenCredentials,
	) -> Result<Self> {
		let scope = EncryptionScope::Connection(connection_id);
		let encrypted_access_token =
			encrypt.encrypt_str(&scope, credentials.access_token.expose())?;
		let encrypted_refresh_token = credentials
			.refresh_token
			.as_ref()
			.map(|refresh| encrypt.encrypt_str(&scope, refresh.expose()))
			.transpose()?;

		Ok(Self {
			id: TokenId::generate(),
			connection_id,
			refreshed_from_id: None,
			encrypted_access_token,
			encrypted_refresh_token,
			access_token_expires_at: credentials.expires_at,
			scopes: credentials.scopes,
			created_at: OffsetDateTime::now_utc(),
			deleted_at: None,
		})
	}

	/// Marks this row as the successor of `previous`.
	pub fn refreshed_from(mut self, previous: TokenId) -> Self {
		self.refreshed_from_id = Some(previous);

		self
	}

	/// Decrypts the access token.
	pub fn access_token(&self, encrypt: &dyn EncryptService) -> Result<Secret> {
		Ok(encrypt.decrypt_str(&self.scope(), &self.encrypted_access_token)?)
	}

	/// Decrypts the refresh token, if the row carries one.
	pub fn refresh_token(&self, encrypt: &dyn EncryptService) -> Result<Option<Secret>> {
		self.encrypted_refresh_token
			.as_ref()
			.map(|field| encrypt.decrypt_str(&self.scope(), field).map_err(Error::from))
			.transpose()
	}

	/// Returns true when the row carries a refresh token.
	pub fn has_refresh_token(&self) -> bool {
		self.encrypted_refresh_token.is_some()
	}

	/// Returns true when the access token is expired at `now`.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		self.access_token_expires_at.is_some_and(|expires_at| expires_at <= now)
	}

	/// Returns true when the access token expires within `window` of `now`.
	pub fn expires_within(&self, now: OffsetDateTime, window: Duration) -> bool {
		self.access_token_expires_at.is_some_and(|expires_at| expires_at <= now + window)
	}

	/// Returns true after a soft delete.
	pub fn is_deleted(&self) -> bool {
		self.deleted_at.is_some()
	}

	fn scope(&self) -> EncryptionScope<'static> {
		EncryptionScope::Connection(self.connection_id)
	}
}

/// Plaintext credentials returned by a token endpoint.
#[derive(Clone, Debug)]
pub struct TokenCredentials {
	/// Access token.
	pub access_token: Secret,
	/// Refresh token, when the provider issued one.
	pub refresh_token: Option<Secret>,
	/// Absolute expiry derived from `expires_in`.
	pub expires_at: Option<OffsetDateTime>,
	/// Granted scopes.
	pub scopes: Vec<String>,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::crypto::AesGcmEncryptService;

	#[test]
	fn sealed_tokens_decrypt_only_for_their_connection() {
		let encrypt = AesGcmEncryptService::new([5; 32]);
		let connection = ConnectionId::generate();
		let token = OAuth2Token::seal(&encrypt, connection, TokenCredentials {
			access_token: Secret::new("AT"),
			refresh_token: Some(Secret::new("RT")),
			expires_at: None,
			scopes: vec!["read".into()],
		})
		.expect("Token should seal.");

		assert_eq!(
			token.access_token(&encrypt).expect("Access token should decrypt.").expose(),
			"AT"
		);
		assert_eq!(
			token
				.refresh_token(&encrypt)
				.expect("Refresh token should decrypt.")
				.as_ref()
				.map(Secret::expose),
			Some("RT")
		);

		let mut moved = token.clone();

		moved.connection_id = ConnectionId::generate();

		assert!(moved.access_token(&encrypt).is_err());
	}

	#[test]
	fn expiry_checks_treat_missing_expiry_as_never() {
		let encrypt = AesGcmEncryptService::new([5; 32]);
		let now = OffsetDateTime::now_utc();
		let mut token = OAuth2Token::seal(&encrypt, ConnectionId::generate(), TokenCredentials {
			access_token: Secret::new("AT"),
			refresh_token: None,
			expires_at: None,
			scopes: Vec::new(),
		})
		.expect("Token should seal.");

		assert!(!token.is_expired_at(now));
		assert!(!token.expires_within(now, Duration::days(365)));

		token.access_token_expires_at = Some(now + Duration::minutes(5));

		assert!(!token.is_expired_at(now));
		assert!(token.expires_within(now, Duration::minutes(10)));
		assert!(token.is_expired_at(now + Duration::minutes(5)));
	}
}
