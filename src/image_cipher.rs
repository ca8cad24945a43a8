use std::fmt::Debug;

use super::{
	Error, ImageFormat, RawKey, UserKey,
	block::{self, IV_LEN},
	kdf::{self, WorkingKey},
};

/// Encrypts and decrypts uploaded image files.
///
/// An encrypted blob is the 16 byte IV followed directly by the ciphertext; there is no header
/// or delimiter, so nothing about a blob says whether it is encrypted at all.  That is why the
/// read path ([`ImageCipher::open_or_passthrough`]) falls back to the stored bytes when
/// decryption fails.
#[derive(Clone)]
pub struct ImageCipher {
	key: WorkingKey,
}

impl Debug for ImageCipher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
		f.debug_struct("ImageCipher").finish_non_exhaustive()
	}
}

impl ImageCipher {
	/// # Errors
	///
	/// Only fails if the key derivation itself breaks.
	#[tracing::instrument(level = "debug", skip_all)]
	pub fn new(raw: &RawKey) -> Result<Self, Error> {
		Ok(Self {
			key: kdf::derive_key(raw.expose_secret().as_bytes(), kdf::IMAGE_SALT)?,
		})
	}

	#[tracing::instrument(level = "debug", skip_all, fields(len = plaintext.len()))]
	pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
		let (iv, ciphertext) = block::seal(&self.key, plaintext);

		let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
		blob.extend_from_slice(&iv);
		blob.extend_from_slice(&ciphertext);

		blob
	}

	/// # Errors
	///
	/// Returns [`Error::Decryption`] if the blob is too short, isn't a whole number of cipher
	/// blocks, or its padding doesn't check out (almost always: it was encrypted under some
	/// other key, or never encrypted at all).
	#[tracing::instrument(level = "debug", skip_all, fields(len = blob.len()))]
	pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, Error> {
		let Some((iv, ciphertext)) = blob.split_first_chunk::<IV_LEN>() else {
			tracing::debug!("Blob shorter than an IV");
			return Err(Error::Decryption);
		};

		block::open(&self.key, iv, ciphertext)
	}

	/// Decrypt a blob, and insist that what comes out is an image.
	///
	/// A wrong key gets past the padding check about one time in 256, and what it produces is
	/// noise.  Uploads are only ever accepted as images, so noise is told apart by its missing
	/// signature.  Anything that acts on the plaintext (rewriting or serving it) should use this
	/// rather than [`decrypt`](Self::decrypt).
	///
	/// # Errors
	///
	/// Returns [`Error::Decryption`] in the same cases as [`decrypt`](Self::decrypt), and also
	/// when the plaintext isn't a recognised image.
	#[tracing::instrument(level = "debug", skip_all, fields(len = blob.len()))]
	pub fn decrypt_image(&self, blob: &[u8]) -> Result<Vec<u8>, Error> {
		let plaintext = self.decrypt(blob)?;

		if ImageFormat::sniff(&plaintext).is_none() {
			tracing::debug!("Blob decrypted, but not to an image");
			return Err(Error::Decryption);
		}

		Ok(plaintext)
	}

	/// Decrypt a blob for serving, or hand back the stored bytes untouched if that fails.
	///
	/// The stored bytes may be a legacy unencrypted upload, or encrypted under a key that a
	/// rotation hasn't caught up with yet; either way the reader gets *something* rather than
	/// an error.
	#[tracing::instrument(level = "debug", skip_all)]
	pub fn open_or_passthrough(&self, blob: Vec<u8>) -> Vec<u8> {
		match self.decrypt_image(&blob) {
			Ok(plaintext) => plaintext,
			Err(e) => {
				tracing::warn!(error = %e, len = blob.len(), "Serving image blob unmodified");
				blob
			}
		}
	}
}

/// Prepare freshly uploaded image bytes for storage.
///
/// With a key, the bytes are encrypted; without one they are stored as-is (the degraded mode
/// older accounts without a security key still run in).
///
/// # Errors
///
/// Only fails if the key derivation itself breaks.
#[tracing::instrument(level = "debug", skip_all, fields(len = plaintext.len()))]
pub fn seal_image(plaintext: Vec<u8>, key: &UserKey) -> Result<Vec<u8>, Error> {
	match key {
		UserKey::Present(raw) => Ok(ImageCipher::new(raw)?.encrypt(&plaintext)),
		UserKey::Missing => {
			tracing::warn!("No security key available, storing image unencrypted");
			Ok(plaintext)
		}
	}
}

/// The read-side counterpart of [`seal_image`].
///
/// # Errors
///
/// Only fails if the key derivation itself breaks; decryption failures fall back to the stored
/// bytes.
#[tracing::instrument(level = "debug", skip_all, fields(len = stored.len()))]
pub fn open_image(stored: Vec<u8>, key: &UserKey) -> Result<Vec<u8>, Error> {
	match key {
		UserKey::Present(raw) => Ok(ImageCipher::new(raw)?.open_or_passthrough(stored)),
		UserKey::Missing => Ok(stored),
	}
}
