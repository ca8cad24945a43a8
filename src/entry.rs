use super::{Error, TextCipher, UserKey};

/// Shown in place of a secret entry when the account has no security key to open it with.
pub const KEY_REQUIRED_PLACEHOLDER: &str =
	"<p class='text-gray-400 italic'>[A security key is required to read this entry]</p>";

/// Shown in place of a secret entry that wouldn't decrypt.
pub const DECRYPTION_FAILED_PLACEHOLDER: &str =
	"<p class='text-red-500 font-bold'>[This entry could not be decrypted]</p>";

/// Turn entry content into what gets stored.
///
/// Secret entries are encrypted; everything else passes through untouched.
///
/// # Errors
///
/// Returns [`Error::MissingKey`] when asked to store a secret entry for an account with no
/// security key, before anything is written.
#[tracing::instrument(level = "debug", skip(content, key))]
pub fn seal_entry(content: &str, is_secret: bool, key: &UserKey) -> Result<String, Error> {
	if !is_secret {
		return Ok(content.to_string());
	}

	TextCipher::new(key.require()?)?.encrypt(content)
}

/// Turn stored entry content into something displayable.
///
/// This never fails: a secret entry that can't be opened is replaced by a placeholder, so one
/// bad entry can't take down a page listing many.
#[tracing::instrument(level = "debug", skip(stored, key))]
pub fn open_entry(stored: &str, is_secret: bool, key: &UserKey) -> String {
	if !is_secret {
		return stored.to_string();
	}

	let UserKey::Present(raw) = key else {
		return KEY_REQUIRED_PLACEHOLDER.to_string();
	};

	match TextCipher::new(raw).and_then(|c| c.decrypt(stored)) {
		Ok(plaintext) => plaintext,
		Err(e) => {
			tracing::warn!(error = %e, "Secret entry failed to decrypt");
			DECRYPTION_FAILED_PLACEHOLDER.to_string()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{RawKey, test_util::init};

	fn key(k: &str) -> UserKey {
		RawKey::new(k).unwrap().into()
	}

	#[test]
	fn public_entries_pass_through() {
		init();
		assert_eq!("<p>hi</p>", seal_entry("<p>hi</p>", false, &UserKey::Missing).unwrap());
		assert_eq!("<p>hi</p>", open_entry("<p>hi</p>", false, &UserKey::Missing));
	}

	#[test]
	fn secret_entries_round_trip() {
		init();
		let key = key("mine");

		let stored = seal_entry("<p>dear diary</p>", true, &key).unwrap();
		assert_ne!("<p>dear diary</p>", stored);
		assert_eq!("<p>dear diary</p>", open_entry(&stored, true, &key));
	}

	#[test]
	fn secret_entry_without_key_is_refused() {
		init();
		let result = seal_entry("<p>dear diary</p>", true, &UserKey::Missing);

		assert!(matches!(result, Err(Error::MissingKey)));
	}

	#[test]
	fn placeholders() {
		init();
		let stored = seal_entry("<p>dear diary</p>", true, &key("mine")).unwrap();

		assert_eq!(KEY_REQUIRED_PLACEHOLDER, open_entry(&stored, true, &UserKey::Missing));
		assert_eq!(DECRYPTION_FAILED_PLACEHOLDER, open_entry(&stored, true, &key("not mine")));
		assert_eq!(
			DECRYPTION_FAILED_PLACEHOLDER,
			open_entry("<p>never encrypted</p>", true, &key("mine"))
		);
	}
}
