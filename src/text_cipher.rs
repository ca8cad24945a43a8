use std::fmt::Debug;

use super::{
	Error, RawKey, block,
	envelope::Envelope,
	kdf::{self, WorkingKey},
};

/// Encrypts and decrypts the text of secret diary entries.
///
/// Ciphertexts are `<ivHex>:<cipherHex>` strings, so they drop straight into the entry's
/// `content` column.  The working key is derived from the user's [`RawKey`] under its own salt,
/// so it is unrelated to the key an [`ImageCipher`](super::ImageCipher) derives from the same
/// raw key.
#[derive(Clone)]
pub struct TextCipher {
	key: WorkingKey,
}

impl Debug for TextCipher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
		f.debug_struct("TextCipher").finish_non_exhaustive()
	}
}

impl TextCipher {
	/// # Errors
	///
	/// Only fails if the key derivation itself breaks.
	#[tracing::instrument(level = "debug", skip_all)]
	pub fn new(raw: &RawKey) -> Result<Self, Error> {
		Ok(Self {
			key: kdf::derive_key(raw.expose_secret().as_bytes(), kdf::TEXT_SALT)?,
		})
	}

	/// # Errors
	///
	/// Currently infallible.
	#[tracing::instrument(level = "debug", skip_all)]
	pub fn encrypt(&self, plaintext: &str) -> Result<String, Error> {
		let (iv, ciphertext) = block::seal(&self.key, plaintext.as_bytes());

		Ok(Envelope::new(iv, ciphertext).encode())
	}

	/// # Errors
	///
	/// * [`Error::KeyFormat`] if `envelope` isn't an envelope at all.
	/// * [`Error::Decryption`] if it was encrypted under a different key.
	#[tracing::instrument(level = "debug", skip_all)]
	pub fn decrypt(&self, envelope: &str) -> Result<String, Error> {
		let envelope = Envelope::try_from(envelope)?;
		let plaintext = block::open(&self.key, &envelope.iv, &envelope.ciphertext)?;

		// A wrong key that happens to produce valid padding still won't produce valid UTF-8
		String::from_utf8(plaintext).map_err(|_| Error::Decryption)
	}
}

/// One-shot encryption of `plaintext` under `raw`.
///
/// Derives a fresh working key on every call; hang on to a [`TextCipher`] when doing more than
/// one entry.
///
/// # Errors
///
/// As for [`TextCipher::encrypt`].
pub fn encrypt_text(plaintext: &str, raw: &RawKey) -> Result<String, Error> {
	TextCipher::new(raw)?.encrypt(plaintext)
}

/// One-shot decryption; see [`encrypt_text`].
///
/// # Errors
///
/// As for [`TextCipher::decrypt`].
pub fn decrypt_text(envelope: &str, raw: &RawKey) -> Result<String, Error> {
	TextCipher::new(raw)?.decrypt(envelope)
}
