use parking_lot::RwLock;
use std::{
	collections::HashMap,
	io::{self, Write as _},
	path::{Path, PathBuf},
	sync::Arc,
};

use super::{Error, WrappedKey};

/// Where uploaded image blobs live.
///
/// Identifiers are the opaque file names embedded in diary HTML.  Implementations must be safe
/// to call from several threads at once; the rotation sweep does.
pub trait BlobStore: Send + Sync {
	fn read(&self, identifier: &str) -> io::Result<Vec<u8>>;

	fn write(&self, identifier: &str, bytes: &[u8]) -> io::Result<()>;

	fn exists(&self, identifier: &str) -> bool;

	fn remove(&self, identifier: &str) -> io::Result<()>;
}

impl<T: BlobStore + ?Sized> BlobStore for &T {
	fn read(&self, identifier: &str) -> io::Result<Vec<u8>> {
		(**self).read(identifier)
	}

	fn write(&self, identifier: &str, bytes: &[u8]) -> io::Result<()> {
		(**self).write(identifier, bytes)
	}

	fn exists(&self, identifier: &str) -> bool {
		(**self).exists(identifier)
	}

	fn remove(&self, identifier: &str) -> io::Result<()> {
		(**self).remove(identifier)
	}
}

impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
	fn read(&self, identifier: &str) -> io::Result<Vec<u8>> {
		(**self).read(identifier)
	}

	fn write(&self, identifier: &str, bytes: &[u8]) -> io::Result<()> {
		(**self).write(identifier, bytes)
	}

	fn exists(&self, identifier: &str) -> bool {
		(**self).exists(identifier)
	}

	fn remove(&self, identifier: &str) -> io::Result<()> {
		(**self).remove(identifier)
	}
}

/// A secret diary entry, as far as re-encryption cares.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretEntry {
	pub id: String,
	/// The `<ivHex>:<cipherHex>` envelope.
	pub content: String,
}

/// The bits of the user and diary tables the encryption core reads and writes.
///
/// The caller is assumed to have already established that the user owns everything asked for.
pub trait DiaryDirectory: Send + Sync {
	/// # Errors
	///
	/// [`Error::Database`] on any failure to read.
	fn wrapped_key(&self, user_id: &str) -> Result<Option<WrappedKey>, Error>;

	/// # Errors
	///
	/// [`Error::Database`] on any failure to write.
	fn set_wrapped_key(&self, user_id: &str, key: &WrappedKey) -> Result<(), Error>;

	/// The `content` of every diary entry the user owns, secret or not.
	///
	/// # Errors
	///
	/// [`Error::Database`] on any failure to read.
	fn diary_contents(&self, user_id: &str) -> Result<Vec<String>, Error>;

	/// # Errors
	///
	/// [`Error::Database`] on any failure to read.
	fn secret_entries(&self, user_id: &str) -> Result<Vec<SecretEntry>, Error>;

	/// # Errors
	///
	/// [`Error::Database`] on any failure to write.
	fn set_entry_content(&self, user_id: &str, entry_id: &str, content: &str) -> Result<(), Error>;
}

impl<T: DiaryDirectory + ?Sized> DiaryDirectory for Arc<T> {
	fn wrapped_key(&self, user_id: &str) -> Result<Option<WrappedKey>, Error> {
		(**self).wrapped_key(user_id)
	}

	fn set_wrapped_key(&self, user_id: &str, key: &WrappedKey) -> Result<(), Error> {
		(**self).set_wrapped_key(user_id, key)
	}

	fn diary_contents(&self, user_id: &str) -> Result<Vec<String>, Error> {
		(**self).diary_contents(user_id)
	}

	fn secret_entries(&self, user_id: &str) -> Result<Vec<SecretEntry>, Error> {
		(**self).secret_entries(user_id)
	}

	fn set_entry_content(&self, user_id: &str, entry_id: &str, content: &str) -> Result<(), Error> {
		(**self).set_entry_content(user_id, entry_id, content)
	}
}

fn not_found(identifier: &str) -> io::Error {
	io::Error::new(io::ErrorKind::NotFound, format!("no blob named {identifier}"))
}

/// Blobs held in memory.  Handy for tests, and for nothing else much.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
	blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.blobs.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.blobs.read().is_empty()
	}
}

impl BlobStore for MemoryBlobStore {
	fn read(&self, identifier: &str) -> io::Result<Vec<u8>> {
		self.blobs
			.read()
			.get(identifier)
			.cloned()
			.ok_or_else(|| not_found(identifier))
	}

	fn write(&self, identifier: &str, bytes: &[u8]) -> io::Result<()> {
		self.blobs
			.write()
			.insert(identifier.to_string(), bytes.to_vec());
		Ok(())
	}

	fn exists(&self, identifier: &str) -> bool {
		self.blobs.read().contains_key(identifier)
	}

	fn remove(&self, identifier: &str) -> io::Result<()> {
		self.blobs
			.write()
			.remove(identifier)
			.map(|_| ())
			.ok_or_else(|| not_found(identifier))
	}
}

/// Blobs stored as files in a single directory.
///
/// Writes land in a temporary file next to the target and are renamed into place, so a
/// concurrent reader sees either the old blob or the new one, never half of each.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
	root: PathBuf,
}

impl FsBlobStore {
	/// Use `root` as the upload directory, creating it if need be.
	///
	/// # Errors
	///
	/// [`Error::Storage`] if the directory can't be created.
	#[tracing::instrument(level = "debug", skip_all, fields(root = %root.as_ref().display()))]
	pub fn new(root: impl AsRef<Path>) -> Result<Self, Error> {
		let root = root.as_ref().to_path_buf();

		std::fs::create_dir_all(&root)
			.map_err(|e| Error::storage(root.display().to_string(), e))?;

		Ok(Self { root })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn path_for(&self, identifier: &str) -> io::Result<PathBuf> {
		if identifier.is_empty()
			|| identifier == "."
			|| identifier == ".."
			|| identifier.contains(['/', '\\', '\0'])
		{
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("{identifier:?} is not a valid blob identifier"),
			));
		}

		Ok(self.root.join(identifier))
	}
}

impl BlobStore for FsBlobStore {
	fn read(&self, identifier: &str) -> io::Result<Vec<u8>> {
		std::fs::read(self.path_for(identifier)?)
	}

	#[tracing::instrument(level = "trace", skip(self, bytes))]
	fn write(&self, identifier: &str, bytes: &[u8]) -> io::Result<()> {
		let path = self.path_for(identifier)?;

		let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
		tmp.write_all(bytes)?;
		tmp.as_file().sync_all()?;
		tmp.persist(&path).map_err(|e| e.error)?;

		Ok(())
	}

	fn exists(&self, identifier: &str) -> bool {
		self.path_for(identifier).is_ok_and(|p| p.is_file())
	}

	fn remove(&self, identifier: &str) -> io::Result<()> {
		std::fs::remove_file(self.path_for(identifier)?)
	}
}
