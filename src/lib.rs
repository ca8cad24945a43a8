//! At-rest encryption for a diary: secret entries, the images they embed, and the keys that
//! protect both.
//!
//! Every user has (at most) one security key, a [`RawKey`].  It is never stored as-is; a
//! [`KeyCodec`] built from the server-wide [`ServerSecret`] wraps it into a [`WrappedKey`] for the
//! user record, and unwraps it again when a request needs it.
//!
//! From the raw key, two independent working keys are derived, one for each kind of data:
//!
//! * a [`TextCipher`] encrypts the content of secret diary entries into `<ivHex>:<cipherHex>`
//!   strings; and
//! * an [`ImageCipher`] encrypts uploaded images into `iv || ciphertext` blobs.
//!
//! Both are AES-256-CBC, keyed by scrypt over the raw key and a per-purpose salt, so the same raw
//! key never produces the same working key for text and for images.
//!
//! Decryption failures are expected, and handled where they happen rather than bubbled up: a
//! secret entry that won't open is shown as a placeholder ([`open_entry`]), and an image that
//! won't decrypt is served as stored ([`serve_image`]).  The one place a missing key *is* an
//! error is when it would otherwise be impossible to do what was asked, such as saving a secret
//! entry for an account without a key ([`seal_entry`]).
//!
//! # Changing keys
//!
//! Because every entry and image a user owns is encrypted under their one key, changing that key
//! means re-encrypting all of it.  The [`KeyRotationCoordinator`] finds every image a user's
//! entries refer to, rewrites each one under the new key, does the same for secret entry text,
//! and then stores the new wrapped key.  It carries on past anything it can't migrate, and tells
//! you what those were in its [`RotationReport`].
//!
//! # Collaborators
//!
//! Storage of blobs and access to the user and diary tables are behind the [`BlobStore`] and
//! [`DiaryDirectory`] traits; this crate never talks to a database itself.
mod block;
mod config;
mod entry;
mod envelope;
mod error;
mod image_cipher;
mod kdf;
mod key;
mod key_codec;
mod locks;
mod rotation;
mod scan;
mod store;
mod text_cipher;
mod upload;

pub use config::{
	Config, DEFAULT_ROTATION_WORKERS, DEFAULT_UPLOAD_PREFIX, PUBLIC_ORIGIN_VAR, SECRET_VAR,
	ServerSecret, UPLOAD_PREFIX_VAR, WORKERS_VAR,
};
pub use entry::{DECRYPTION_FAILED_PLACEHOLDER, KEY_REQUIRED_PLACEHOLDER, open_entry, seal_entry};
pub use error::Error;
pub use image_cipher::{ImageCipher, open_image, seal_image};
pub use key::{RawKey, UserKey, generate_key};
pub use key_codec::{KeyCodec, WrappedKey};
pub use locks::{BlobGuard, BlobLocks};
pub use rotation::{KeyRotationCoordinator, Migration, Outcome, RotationReport, SkipReason};
pub use scan::{ImageRefScanner, RegexImageScanner};
pub use store::{BlobStore, DiaryDirectory, FsBlobStore, MemoryBlobStore, SecretEntry};
pub use text_cipher::{TextCipher, decrypt_text, encrypt_text};
pub use upload::{
	ImageFormat, ServedImage, content_type_for, purge_entry_images, serve_image, store_upload,
	upload_filename,
};
