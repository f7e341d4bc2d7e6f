//! Immutable, hash-identified revisions of a connector definition.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	connectors::{Auth, AuthOAuth2, AuthType, ConnectorDefinition},
	crypto::{EncryptService, EncryptedField, EncryptionScope},
	error::ConfigError,
	id::ConnectorId,
};

/// Lifecycle state of a connector version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorVersionState {
	/// Still editable by the reconciler.
	Draft,
	/// Frozen; existing connections may stay bound to it.
	Active,
	/// Frozen; new connections bind to it.
	Primary,
}

/// One revision of a connector.
///
/// The definition is stored encrypted under the version's own scope. The first successful call to
/// [`definition`](Self::definition) caches the decrypted value; later calls only take a read lock.
#[derive(Serialize, Deserialize)]
pub struct ConnectorVersion {
	/// Connector identifier.
	pub id: ConnectorId,
	/// Version number, starting at one.
	pub version: u64,
	/// Auth type of the stored definition.
	pub auth_type: AuthType,
	/// Lifecycle state.
	pub state: ConnectorVersionState,
	/// Deterministic hash of the definition JSON.
	pub hash: String,
	/// Encrypted definition JSON.
	pub encrypted_definition: EncryptedField,
	/// Creation instant.
	pub created_at: OffsetDateTime,
	/// Last state or definition change.
	pub updated_at: OffsetDateTime,
	#[serde(skip)]
	cache: RwLock<Option<Arc<ConnectorDefinition>>>,
}
impl ConnectorVersion {
	/// Serializes, hashes, and encrypts `definition` into a new version.
	pub fn new(
		encrypt: &dyn EncryptService,
		id: ConnectorId,
		version: u64,
		state: ConnectorVersionState,
		definition: ConnectorDefinition,
	) -> Result<Self> {
		if version == 0 {
			return Err(ConfigError::InvalidVersion.into());
		}

		definition.validate()?;

		let scope = EncryptionScope::ConnectorVersion { connector: &id, version };
		let (hash, encrypted_definition) = seal(encrypt, &scope, &definition)?;
		let now = OffsetDateTime::now_utc();

		Ok(Self {
			auth_type: definition.auth_type(),
			id,
			version,
			state,
			hash,
			encrypted_definition,
			created_at: now,
			updated_at: now,
			cache: RwLock::new(Some(Arc::new(definition))),
		})
	}

	/// Returns the decrypted definition, decrypting at most once per instance.
	///
	/// Decryption or parse failures are returned as errors; a version that cannot be read is
	/// unusable.
	pub fn definition(&self, encrypt: &dyn EncryptService) -> Result<Arc<ConnectorDefinition>> {
		if let Some(cached) = self.cache.read().as_ref() {
			return Ok(cached.clone());
		}

		let mut cache = self.cache.write();

		if let Some(cached) = cache.as_ref() {
			return Ok(cached.clone());
		}

		let plaintext = encrypt.decrypt(&self.scope(), &self.encrypted_definition)?;
		let definition: ConnectorDefinition =
			serde_json::from_slice(&plaintext).map_err(ConfigError::InvalidDefinition)?;
		let definition = Arc::new(definition);

		*cache = Some(definition.clone());

		Ok(definition)
	}

	/// Replaces the definition of a draft version.
	pub fn set_definition(
		&mut self,
		encrypt: &dyn EncryptService,
		definition: ConnectorDefinition,
	) -> Result<()> {
		if !self.is_draft() {
			return Err(ConfigError::ImmutableVersion {
				connector: self.id.to_string(),
				version: self.version,
			}
			.into());
		}

		definition.validate()?;

		let (hash, encrypted_definition) = seal(encrypt, &self.scope(), &definition)?;

		self.auth_type = definition.auth_type();
		self.hash = hash;
		self.encrypted_definition = encrypted_definition;
		self.updated_at = OffsetDateTime::now_utc();
		*self.cache.get_mut() = Some(Arc::new(definition));

		Ok(())
	}

	/// Returns true while the version is editable.
	pub fn is_draft(&self) -> bool {
		self.state == ConnectorVersionState::Draft
	}

	/// Returns a copy of this version in `state`.
	pub fn with_state(&self, state: ConnectorVersionState) -> Self {
		let mut next = self.clone();

		next.state = state;
		next.updated_at = OffsetDateTime::now_utc();

		next
	}

	/// Borrows the OAuth2 settings of `definition`, failing for other auth types.
	pub fn oauth2<'d>(
		&self,
		definition: &'d ConnectorDefinition,
	) -> Result<&'d AuthOAuth2, ConfigError> {
		match &definition.auth {
			Auth::OAuth2(oauth2) => Ok(oauth2),
			_ => Err(ConfigError::NotOAuth2 { connector: self.id.to_string() }),
		}
	}

	fn scope(&self) -> EncryptionScope<'_> {
		EncryptionScope::ConnectorVersion { connector: &self.id, version: self.version }
	}
}
impl Clone for ConnectorVersion {
	fn clone(&self) -> Self {
		Self {
			id: self.id.clone(),
			version: self.version,
			auth_type: self.auth_type,
			state: self.state,
			hash: self.hash.clone(),
			encrypted_definition: self.encrypted_definition.clone(),
			created_at: self.created_at,
			updated_at: self.updated_at,
			cache: RwLock::new(self.cache.read().clone()),
		}
	}
}
impl Debug for ConnectorVersion {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ConnectorVersion")
			.field("id", &self.id)
			.field("version", &self.version)
			.field("auth_type", &self.auth_type)
			.field("state", &self.state)
			.field("hash", &self.hash)
			.field("cached", &self.cache.read().is_some())
			.finish()
	}
}

/// Deterministic content hash of a definition.
pub fn definition_hash(definition: &ConnectorDefinition) -> Result<String, ConfigError> {
	let json = serde_json::to_vec(definition).map_err(ConfigError::InvalidDefinition)?;

	Ok(hash_json(&json))
}

fn hash_json(json: &[u8]) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(json))
}

fn seal(
	encrypt: &dyn EncryptService,
	scope: &EncryptionScope<'_>,
	definition: &ConnectorDefinition,
) -> Result<(String, EncryptedField)> {
	let json = serde_json::to_vec(definition).map_err(ConfigError::InvalidDefinition)?;
	let hash = hash_json(&json);
	let encrypted = encrypt.encrypt(scope, &json)?;

	Ok((hash, encrypted))
}
