use secrecy::{ExposeSecret as _, SecretBox};

use super::Error;

pub(crate) const KEY_CODEC_SALT: &[u8] = b"salt";
pub(crate) const TEXT_SALT: &[u8] = b"text-salt";
pub(crate) const IMAGE_SALT: &[u8] = b"image-salt";

// N = 2^14, r = 8, p = 1: what every existing wrapped key and ciphertext was derived with
const LOG_N: u8 = 14;
const R: u32 = 8;
const P: u32 = 1;

/// A 32-byte AES-256 key, derived from a secret and a fixed salt.
#[derive(Debug)]
pub(crate) struct WorkingKey(SecretBox<[u8; 32]>);

impl WorkingKey {
	pub(crate) fn expose_secret(&self) -> &[u8; 32] {
		self.0.expose_secret()
	}
}

impl Clone for WorkingKey {
	fn clone(&self) -> Self {
		Self(Box::new(*self.expose_secret()).into())
	}
}

#[tracing::instrument(level = "trace", skip(secret))]
pub(crate) fn derive_key(secret: &[u8], salt: &[u8]) -> Result<WorkingKey, Error> {
	let params = scrypt::Params::new(LOG_N, R, P, 32)
		.map_err(|e| Error::insanity(format!("scrypt parameters rejected: {e}")))?;

	let mut output = Box::new([0u8; 32]);

	scrypt::scrypt(secret, salt, &params, &mut output[..])
		.map_err(|e| Error::insanity(format!("scrypt output rejected: {e}")))?;

	Ok(WorkingKey(output.into()))
}
