#[derive(Debug, thiserror::Error, thiserror_ext::Construct)]
#[non_exhaustive]
pub enum Error {
	/// Deliberately carries no detail: a wrong key and a corrupted ciphertext look the same.
	#[error("failed to decrypt ciphertext")]
	Decryption,

	#[error("malformed key or envelope: {0}")]
	KeyFormat(String),

	#[error("invalid key: {0}")]
	InvalidKey(String),

	#[error("no security key is set for this account")]
	MissingKey,

	#[error("uploaded file is not a recognised image")]
	NotAnImage,

	#[error("storage failure on {identifier}: {cause}")]
	Storage {
		identifier: String,
		cause: std::io::Error,
	},

	#[error("database failure: {0}")]
	Database(String),

	#[error("configuration error: {0}")]
	Config(String),

	#[error("CAN'T HAPPEN: {0}")]
	Insanity(String),
}
