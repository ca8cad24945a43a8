use secrecy::{ExposeSecret as _, SecretString};

use super::Error;

/// A user's security key, as typed in (or generated for) them.
///
/// This is never persisted directly; it only ever reaches storage wrapped by a
/// [`KeyCodec`](super::KeyCodec).  The text and image ciphers each derive their own working key
/// from it.
#[derive(Debug)]
pub struct RawKey(SecretString);

impl RawKey {
	/// Wrap a user-supplied key.
	///
	/// # Errors
	///
	/// Returns [`Error::InvalidKey`] if the key is empty.
	pub fn new(key: impl Into<String>) -> Result<Self, Error> {
		let key = key.into();

		if key.is_empty() {
			return Err(Error::invalid_key("security key must not be empty"));
		}

		Ok(Self(key.into()))
	}

	pub fn expose_secret(&self) -> &str {
		self.0.expose_secret()
	}

	/// Constant-time comparison of two keys.
	pub fn matches(&self, other: &str) -> bool {
		constant_time_eq::constant_time_eq(self.expose_secret().as_bytes(), other.as_bytes())
	}
}

impl Clone for RawKey {
	fn clone(&self) -> Self {
		Self(self.expose_secret().to_owned().into())
	}
}

impl TryFrom<&str> for RawKey {
	type Error = Error;

	fn try_from(k: &str) -> Result<Self, Error> {
		Self::new(k)
	}
}

/// Whether an account has a security key available right now.
///
/// Uploads, secret entries and image serving all behave differently when there is no key, so
/// every one of those paths takes this rather than a possibly-empty string.
#[derive(Clone, Debug, Default)]
pub enum UserKey {
	#[default]
	Missing,
	Present(RawKey),
}

impl UserKey {
	/// The raw key, for operations that cannot proceed without one.
	///
	/// # Errors
	///
	/// Returns [`Error::MissingKey`] if the account has no key.
	pub fn require(&self) -> Result<&RawKey, Error> {
		match self {
			UserKey::Present(k) => Ok(k),
			UserKey::Missing => Err(Error::MissingKey),
		}
	}

	pub fn as_raw(&self) -> Option<&RawKey> {
		match self {
			UserKey::Present(k) => Some(k),
			UserKey::Missing => None,
		}
	}

	pub fn is_present(&self) -> bool {
		matches!(self, UserKey::Present(_))
	}
}

impl From<RawKey> for UserKey {
	fn from(k: RawKey) -> Self {
		UserKey::Present(k)
	}
}

impl From<Option<RawKey>> for UserKey {
	fn from(k: Option<RawKey>) -> Self {
		k.map_or(UserKey::Missing, UserKey::Present)
	}
}

/// Create a fresh security key for a user.
///
/// The key is 32 random bytes, rendered as 64 lowercase hex characters so it can be shown to
/// (and typed back in by) the user.
#[tracing::instrument(level = "debug")]
pub fn generate_key() -> RawKey {
	use rand::{RngCore, rng};

	let mut k = [0u8; 32];

	rng().fill_bytes(&mut k);

	RawKey(hex::encode(k).into())
}
