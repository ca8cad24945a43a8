use aes::cipher::{BlockDecryptMut as _, BlockEncryptMut as _, KeyIvInit as _, block_padding::Pkcs7};

use super::{Error, kdf::WorkingKey};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub(crate) const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// Encrypt under a fresh random IV, returning the IV alongside the padded ciphertext.
pub(crate) fn seal(key: &WorkingKey, plaintext: &[u8]) -> ([u8; IV_LEN], Vec<u8>) {
	use rand::{RngCore, rng};

	let mut iv = [0u8; IV_LEN];
	rng().fill_bytes(&mut iv);

	let ciphertext = Aes256CbcEnc::new(key.expose_secret().into(), (&iv).into())
		.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

	(iv, ciphertext)
}

pub(crate) fn open(key: &WorkingKey, iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
	if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
		tracing::debug!(len = ciphertext.len(), "Ciphertext is not whole blocks");
		return Err(Error::Decryption);
	}

	Aes256CbcDec::new(key.expose_secret().into(), iv.into())
		.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
		.map_err(|_| Error::Decryption)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kdf::{TEXT_SALT, derive_key};

	#[test]
	fn padding_always_adds_a_block_boundary() {
		let key = derive_key(b"padding", TEXT_SALT).unwrap();

		assert_eq!(16, seal(&key, b"").1.len());
		assert_eq!(16, seal(&key, &[0u8; 15]).1.len());
		assert_eq!(32, seal(&key, &[0u8; 16]).1.len());
	}

	#[test]
	fn ragged_ciphertext_rejected() {
		let key = derive_key(b"padding", TEXT_SALT).unwrap();
		let (iv, mut ct) = seal(&key, b"hello diary");
		ct.pop();

		assert!(matches!(open(&key, &iv, &ct), Err(Error::Decryption)));
		assert!(matches!(open(&key, &iv, &[]), Err(Error::Decryption)));
	}
}
