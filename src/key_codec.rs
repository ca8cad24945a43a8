use std::fmt::Debug;

use super::{
	Error, RawKey, ServerSecret, UserKey, block,
	envelope::Envelope,
	kdf::{self, WorkingKey},
};

/// A user's security key, encrypted under the server secret, in the form it is stored on the
/// user record (`<ivHex>:<cipherHex>`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrappedKey(String);

impl WrappedKey {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<String> for WrappedKey {
	fn from(s: String) -> Self {
		Self(s)
	}
}

impl From<&str> for WrappedKey {
	fn from(s: &str) -> Self {
		Self(s.to_string())
	}
}

impl std::fmt::Display for WrappedKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

/// Wraps and unwraps users' security keys for storage, using the server-wide secret.
///
/// The working key is derived from the server secret once, when the codec is created, so a
/// single codec should be built at startup and shared.
///
/// # Example
///
/// ```rust
/// use diary_vault::{KeyCodec, ServerSecret};
/// # fn main() -> Result<(), diary_vault::Error> {
///
/// let codec = KeyCodec::new(&ServerSecret::new("correct horse battery staple")?)?;
/// let raw = diary_vault::generate_key();
///
/// let wrapped = codec.wrap(&raw)?;
/// assert_eq!(raw.expose_secret(), codec.unwrap(&wrapped)?.expose_secret());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct KeyCodec {
	key: WorkingKey,
}

impl Debug for KeyCodec {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
		f.debug_struct("KeyCodec").finish_non_exhaustive()
	}
}

impl KeyCodec {
	/// # Errors
	///
	/// Only fails if the key derivation itself breaks, which it shouldn't.
	#[tracing::instrument(level = "debug", skip(secret))]
	pub fn new(secret: &ServerSecret) -> Result<Self, Error> {
		Ok(Self {
			key: kdf::derive_key(secret.expose_secret().as_bytes(), kdf::KEY_CODEC_SALT)?,
		})
	}

	/// Encrypt a raw key for storage.
	///
	/// Every call uses a fresh IV, so wrapping the same key twice gives two different results.
	///
	/// # Errors
	///
	/// Currently infallible; the `Result` leaves room for codecs that can fail.
	#[tracing::instrument(level = "debug", skip_all)]
	pub fn wrap(&self, raw: &RawKey) -> Result<WrappedKey, Error> {
		let (iv, ciphertext) = block::seal(&self.key, raw.expose_secret().as_bytes());

		Ok(WrappedKey(Envelope::new(iv, ciphertext).encode()))
	}

	/// Recover the raw key from its stored form.
	///
	/// # Errors
	///
	/// * [`Error::KeyFormat`] if the stored value isn't `<hex>:<hex>` with a 16 byte IV.
	/// * [`Error::Decryption`] if it was wrapped under a different server secret (or is
	///   otherwise corrupt).
	#[tracing::instrument(level = "debug", skip_all)]
	pub fn unwrap(&self, wrapped: &WrappedKey) -> Result<RawKey, Error> {
		let envelope = Envelope::try_from(wrapped.as_str())?;
		let plaintext = block::open(&self.key, &envelope.iv, &envelope.ciphertext)?;

		let raw = String::from_utf8(plaintext).map_err(|_| Error::Decryption)?;

		RawKey::new(raw).map_err(|_| Error::Decryption)
	}

	/// Turn whatever is on the user record into the key (or lack of key) the request runs with.
	///
	/// # Errors
	///
	/// As for [`KeyCodec::unwrap`]; an absent wrapped key is not an error.
	pub fn user_key(&self, wrapped: Option<&WrappedKey>) -> Result<UserKey, Error> {
		wrapped
			.map(|w| self.unwrap(w))
			.transpose()
			.map(UserKey::from)
	}

	/// Check a security key typed in by a user (say, to reset their password) against the one
	/// stored for them.  Surrounding whitespace in the candidate is ignored.
	///
	/// # Errors
	///
	/// As for [`KeyCodec::unwrap`]; a key that simply doesn't match is `Ok(false)`.
	#[tracing::instrument(level = "debug", skip_all)]
	pub fn verify(&self, wrapped: &WrappedKey, candidate: &str) -> Result<bool, Error> {
		let stored = self.unwrap(wrapped)?;

		Ok(stored.matches(candidate.trim()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{generate_key, test_util::init};

	fn codec(secret: &str) -> KeyCodec {
		KeyCodec::new(&ServerSecret::new(secret).unwrap()).unwrap()
	}

	#[test]
	fn round_trip() {
		init();
		let codec = codec("server secret");

		for raw in ["k", "k1k1k1k1k1k1k1k1k1k1k1k1k1k1k1k1", "🔑 with unicode", "exactly sixteen!"] {
			let raw = RawKey::new(raw).unwrap();
			let wrapped = codec.wrap(&raw).unwrap();

			assert_eq!(raw.expose_secret(), codec.unwrap(&wrapped).unwrap().expose_secret());
		}

		let raw = generate_key();
		let wrapped = codec.wrap(&raw).unwrap();
		assert_eq!(raw.expose_secret(), codec.unwrap(&wrapped).unwrap().expose_secret());
	}

	#[test]
	fn wrapped_format() {
		init();
		let codec = codec("server secret");
		let wrapped = codec.wrap(&generate_key()).unwrap();

		let (iv, ct) = wrapped.as_str().split_once(':').unwrap();
		assert_eq!(32, iv.len());
		// 64 bytes of key plus a full block of padding
		assert_eq!(160, ct.len());
		assert!(wrapped.as_str().chars().all(|c| c == ':' || c.is_ascii_hexdigit()));
	}

	#[test]
	fn fresh_iv_every_time() {
		init();
		let codec = codec("server secret");
		let raw = RawKey::new("same key").unwrap();

		assert_ne!(codec.wrap(&raw).unwrap(), codec.wrap(&raw).unwrap());
	}

	#[test]
	fn garbage_is_a_format_error() {
		init();
		let codec = codec("server secret");

		let result = codec.unwrap(&WrappedKey::from("not a wrapped key"));
		assert!(matches!(result, Err(Error::KeyFormat(_))));

		let result = codec.unwrap(&WrappedKey::from("abcd:zzzz"));
		assert!(matches!(result, Err(Error::KeyFormat(_))));
	}

	#[test]
	fn wrong_server_secret_is_caught() {
		init();
		let wrapped = codec("one secret").wrap(&generate_key()).unwrap();

		let result = codec("another secret").unwrap(&wrapped);
		assert!(matches!(result, Err(Error::Decryption)));
	}

	#[test]
	fn user_key_resolution() {
		init();
		let codec = codec("server secret");

		assert!(matches!(codec.user_key(None), Ok(UserKey::Missing)));

		let wrapped = codec.wrap(&RawKey::new("mine").unwrap()).unwrap();
		let key = codec.user_key(Some(&wrapped)).unwrap();
		assert_eq!("mine", key.require().unwrap().expose_secret());
	}

	#[test]
	fn verify_candidate_keys() {
		init();
		let codec = codec("server secret");
		let raw = generate_key();
		let wrapped = codec.wrap(&raw).unwrap();

		assert!(codec.verify(&wrapped, raw.expose_secret()).unwrap());
		assert!(codec
			.verify(&wrapped, &format!("  {}\n", raw.expose_secret()))
			.unwrap());
		assert!(!codec.verify(&wrapped, "not the key").unwrap());
	}
}
