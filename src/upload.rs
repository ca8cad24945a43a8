use std::{
	collections::BTreeSet,
	time::{SystemTime, UNIX_EPOCH},
};

use super::{BlobLocks, BlobStore, Error, ImageRefScanner, UserKey, image_cipher};

/// The image formats uploads are accepted in, as recognised by their leading bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
	Png,
	Jpeg,
	Gif,
	/// Anything in a RIFF container; close enough for an upload filter.
	Webp,
}

impl ImageFormat {
	pub fn sniff(bytes: &[u8]) -> Option<Self> {
		match bytes {
			[0x89, 0x50, 0x4e, 0x47, ..] => Some(Self::Png),
			[0xff, 0xd8, 0xff, ..] => Some(Self::Jpeg),
			[0x47, 0x49, 0x46, 0x38, ..] => Some(Self::Gif),
			[0x52, 0x49, 0x46, 0x46, ..] => Some(Self::Webp),
			_ => None,
		}
	}
}

/// An image ready to hand back to a browser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServedImage {
	pub bytes: Vec<u8>,
	pub content_type: &'static str,
}

/// Content type for a stored blob, going by its file extension alone.
pub fn content_type_for(identifier: &str) -> &'static str {
	let ext = identifier
		.rsplit_once('.')
		.map(|(_, ext)| ext.to_ascii_lowercase());

	match ext.as_deref() {
		Some("png") => "image/png",
		Some("jpg" | "jpeg") => "image/jpeg",
		Some("gif") => "image/gif",
		Some("webp") => "image/webp",
		Some("svg") => "image/svg+xml",
		Some("avif") => "image/avif",
		Some("bmp") => "image/bmp",
		_ => "application/octet-stream",
	}
}

/// The identifier a new upload is stored under: the upload time in milliseconds, a dash, and the
/// original name with everything but ASCII letters, digits and dots stripped out.
pub fn upload_filename(original_name: &str, millis: u128) -> String {
	let cleaned: String = original_name
		.chars()
		.filter(|c| c.is_ascii_alphanumeric() || *c == '.')
		.collect();

	// A name made only of dots would collapse into a path component
	let cleaned = if cleaned.chars().all(|c| c == '.') {
		"upload".to_string()
	} else {
		cleaned
	};

	format!("{millis}-{cleaned}")
}

/// Accept an uploaded image: check it is one, encrypt it if the account has a key, and store it.
///
/// Returns the URL the image is served from (`upload_prefix` followed by its identifier).
///
/// # Errors
///
/// * [`Error::NotAnImage`] if the bytes aren't a PNG, JPEG, GIF or WEBP.
/// * [`Error::Storage`] if the write fails.
#[tracing::instrument(level = "debug", skip(store, locks, bytes, key), fields(len = bytes.len()))]
pub fn store_upload(
	store: &impl BlobStore,
	locks: &BlobLocks,
	upload_prefix: &str,
	original_name: &str,
	bytes: Vec<u8>,
	key: &UserKey,
) -> Result<String, Error> {
	let Some(format) = ImageFormat::sniff(&bytes) else {
		let header = hex::encode(&bytes[..bytes.len().min(4)]);
		tracing::warn!(%header, "Rejecting upload that isn't an image");
		return Err(Error::NotAnImage);
	};

	let millis = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis())
		.unwrap_or_default();
	let identifier = upload_filename(original_name, millis);

	let sealed = image_cipher::seal_image(bytes, key)?;

	let _guard = locks.lock(&identifier);
	store
		.write(&identifier, &sealed)
		.map_err(|e| Error::storage(identifier.as_str(), e))?;

	tracing::debug!(%identifier, ?format, encrypted = key.is_present(), "Stored upload");

	Ok(format!("{}/{identifier}", upload_prefix.trim_end_matches('/')))
}

/// Fetch a stored image for display, decrypting it if possible.
///
/// # Errors
///
/// [`Error::Storage`] if the blob doesn't exist or can't be read.  Decryption failures are not
/// errors; the stored bytes are served instead.
#[tracing::instrument(level = "debug", skip(store, key))]
pub fn serve_image(
	store: &impl BlobStore,
	identifier: &str,
	key: &UserKey,
) -> Result<ServedImage, Error> {
	let stored = store
		.read(identifier)
		.map_err(|e| Error::storage(identifier, e))?;

	Ok(ServedImage {
		bytes: image_cipher::open_image(stored, key)?,
		content_type: content_type_for(identifier),
	})
}

/// Delete the managed images a (deleted) diary entry referred to.
///
/// `other_contents` is the content of every entry the user still has.  An image one of them
/// also shows is kept.  Secret entries must be passed decrypted: their stored form hides the
/// markup, and the images they show would be deleted from under them.
///
/// Best effort: blobs that are already gone or won't delete are logged and passed over.
/// Returns the identifiers actually removed.
#[tracing::instrument(level = "debug", skip_all)]
pub fn purge_entry_images<'a>(
	store: &impl BlobStore,
	locks: &BlobLocks,
	scanner: &impl ImageRefScanner,
	content: &str,
	other_contents: impl IntoIterator<Item = &'a str>,
) -> BTreeSet<String> {
	let still_shown = scanner.scan_all(other_contents);
	let mut removed = BTreeSet::new();

	for identifier in scanner.scan(content) {
		if still_shown.contains(&identifier) {
			tracing::debug!(%identifier, "Image still shown by another entry, keeping it");
			continue;
		}

		let _guard = locks.lock(&identifier);

		if !store.exists(&identifier) {
			tracing::debug!(%identifier, "Referenced image already gone");
			continue;
		}

		match store.remove(&identifier) {
			Ok(()) => {
				removed.insert(identifier);
			}
			Err(e) => tracing::warn!(%identifier, error = %e, "Failed to remove image"),
		}
	}

	removed
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		ImageCipher, MemoryBlobStore, RawKey, RegexImageScanner, config::DEFAULT_UPLOAD_PREFIX,
		test_util::init,
	};

	const PNG: &[u8] = &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3];

	fn identifier_of(url: &str) -> &str {
		url.strip_prefix(DEFAULT_UPLOAD_PREFIX).unwrap()
	}

	#[test]
	fn sniffing() {
		assert_eq!(Some(ImageFormat::Png), ImageFormat::sniff(PNG));
		assert_eq!(Some(ImageFormat::Jpeg), ImageFormat::sniff(&[0xff, 0xd8, 0xff, 0xe0]));
		assert_eq!(Some(ImageFormat::Gif), ImageFormat::sniff(b"GIF89a"));
		assert_eq!(Some(ImageFormat::Webp), ImageFormat::sniff(b"RIFF\0\0\0\0WEBP"));
		assert_eq!(None, ImageFormat::sniff(b"%PDF-1.7"));
		assert_eq!(None, ImageFormat::sniff(&[0xff, 0xd8]));
		assert_eq!(None, ImageFormat::sniff(&[]));
	}

	#[test]
	fn filenames() {
		assert_eq!("42-mycat.png", upload_filename("my cat.png", 42));
		assert_eq!("42-....etcpasswd", upload_filename("../../etc/passwd", 42));
		assert_eq!("42-upload", upload_filename("사진", 42));
		assert_eq!("42-upload", upload_filename("..", 42));
	}

	#[test]
	fn content_types() {
		assert_eq!("image/png", content_type_for("1-a.PNG"));
		assert_eq!("image/jpeg", content_type_for("1-a.jpeg"));
		assert_eq!("application/octet-stream", content_type_for("1-noext"));
	}

	#[test]
	fn non_images_are_rejected() {
		init();
		let store = MemoryBlobStore::new();

		let result = store_upload(
			&store,
			&BlobLocks::new(),
			DEFAULT_UPLOAD_PREFIX,
			"notes.txt",
			b"just text".to_vec(),
			&UserKey::Missing,
		);

		assert!(matches!(result, Err(Error::NotAnImage)));
		assert!(store.is_empty());
	}

	#[test]
	fn uploads_are_encrypted_when_a_key_exists() {
		init();
		let store = MemoryBlobStore::new();
		let raw = RawKey::new("mine").unwrap();
		let key = UserKey::from(raw.clone());

		let url = store_upload(
			&store,
			&BlobLocks::new(),
			DEFAULT_UPLOAD_PREFIX,
			"cat.png",
			PNG.to_vec(),
			&key,
		)
		.unwrap();

		assert!(url.starts_with("/api/uploads/"));
		assert!(url.ends_with("-cat.png"));

		let stored = store.read(identifier_of(&url)).unwrap();
		assert_ne!(PNG, &stored[..]);
		assert_eq!(PNG, &ImageCipher::new(&raw).unwrap().decrypt(&stored).unwrap()[..]);

		let served = serve_image(&store, identifier_of(&url), &key).unwrap();
		assert_eq!(PNG, &served.bytes[..]);
		assert_eq!("image/png", served.content_type);
	}

	#[test]
	fn uploads_without_a_key_are_stored_plain() {
		init();
		let store = MemoryBlobStore::new();

		let url = store_upload(
			&store,
			&BlobLocks::new(),
			DEFAULT_UPLOAD_PREFIX,
			"cat.png",
			PNG.to_vec(),
			&UserKey::Missing,
		)
		.unwrap();

		assert_eq!(PNG, &store.read(identifier_of(&url)).unwrap()[..]);

		// Serving a legacy plain blob to an account that has since gained a key still works
		let key = UserKey::from(RawKey::new("mine").unwrap());
		let served = serve_image(&store, identifier_of(&url), &key).unwrap();
		assert_eq!(PNG, &served.bytes[..]);
	}

	#[test]
	fn serving_a_missing_image() {
		init();
		let result = serve_image(&MemoryBlobStore::new(), "1-nope.png", &UserKey::Missing);

		assert!(matches!(
			result,
			Err(Error::Storage { cause, .. }) if cause.kind() == std::io::ErrorKind::NotFound
		));
	}

	#[test]
	fn purging() {
		init();
		let store = MemoryBlobStore::new();
		let scanner = RegexImageScanner::new(DEFAULT_UPLOAD_PREFIX).unwrap();
		store.write("1-a.png", PNG).unwrap();
		store.write("2-b.png", PNG).unwrap();
		store.write("3-kept.png", PNG).unwrap();

		let content = r#"<img src="/api/uploads/1-a.png"><img src="/api/uploads/2-b.png">
			<img src="/api/uploads/9-gone.png"><img src="https://elsewhere.example/x.png">"#;

		let removed = purge_entry_images(&store, &BlobLocks::new(), &scanner, content, []);

		assert_eq!(
			["1-a.png", "2-b.png"].map(String::from).into_iter().collect::<BTreeSet<_>>(),
			removed
		);
		assert!(store.exists("3-kept.png"));
		assert_eq!(1, store.len());
	}

	#[test]
	fn purging_keeps_images_other_entries_show() {
		init();
		let store = MemoryBlobStore::new();
		let scanner = RegexImageScanner::new(DEFAULT_UPLOAD_PREFIX).unwrap();
		store.write("1-mine.png", PNG).unwrap();
		store.write("2-shared.png", PNG).unwrap();

		let deleted = r#"<img src="/api/uploads/1-mine.png"><img src="/api/uploads/2-shared.png">"#;
		let remaining = [r#"<p>also here</p><img src="/api/uploads/2-shared.png">"#];

		let removed = purge_entry_images(&store, &BlobLocks::new(), &scanner, deleted, remaining);

		assert_eq!(BTreeSet::from(["1-mine.png".to_string()]), removed);
		assert!(store.exists("2-shared.png"));
	}

	#[test]
	fn uploads_write_under_the_blob_lock() {
		init();

		#[derive(Default)]
		struct LockCheckingStore {
			inner: MemoryBlobStore,
			locks: BlobLocks,
			held_on_write: parking_lot::Mutex<Vec<bool>>,
		}

		impl BlobStore for LockCheckingStore {
			fn read(&self, identifier: &str) -> std::io::Result<Vec<u8>> {
				self.inner.read(identifier)
			}

			fn write(&self, identifier: &str, bytes: &[u8]) -> std::io::Result<()> {
				self.held_on_write.lock().push(self.locks.is_held(identifier));
				self.inner.write(identifier, bytes)
			}

			fn exists(&self, identifier: &str) -> bool {
				self.inner.exists(identifier)
			}

			fn remove(&self, identifier: &str) -> std::io::Result<()> {
				self.inner.remove(identifier)
			}
		}

		let store = LockCheckingStore::default();
		let url = store_upload(
			&store,
			&store.locks,
			DEFAULT_UPLOAD_PREFIX,
			"cat.png",
			PNG.to_vec(),
			&UserKey::Missing,
		)
		.unwrap();

		assert_eq!(vec![true], *store.held_on_write.lock());
		assert!(!store.locks.is_held(identifier_of(&url)));
	}
}
