use rayon::prelude::*;
use std::fmt::Debug;

use super::{
	BlobLocks, BlobStore, DiaryDirectory, Error, ImageCipher, ImageRefScanner, KeyCodec, RawKey,
	TextCipher,
};

/// Re-keys everything a user has encrypted when their security key changes.
///
/// There is one key per user, shared by every secret entry and every uploaded image, so changing
/// it means re-encrypting all of them.  A rotation:
///
/// 1. unwraps the user's current key (if they have none, there is nothing to migrate, and we
///    skip straight to step 5);
/// 2. scans every entry the user owns for `<img>` tags pointing at managed uploads, collecting
///    each referenced blob once (secret entries are decrypted under the old key first, since
///    their stored form hides the markup);
/// 3. for each blob, decrypts it under the old key and, if what comes out is an image, rewrites
///    it under the new one, on a bounded pool of worker threads;
/// 4. does the same for the text of every secret entry;
/// 5. wraps and stores the new key.
///
/// Steps 3 and 4 are best effort.  A blob or entry that won't decrypt under the old key (never
/// encrypted, encrypted under some even older key, or just corrupt) is left exactly as it was,
/// and the sweep carries on; anything already rewritten stays rewritten.  The new key is stored
/// regardless, so the account always ends up on the key that was asked for.  What happened to
/// each item is reported back in the [`RotationReport`].
pub struct KeyRotationCoordinator<S, D, R> {
	codec: KeyCodec,
	store: S,
	directory: D,
	scanner: R,
	locks: BlobLocks,
	pool: rayon::ThreadPool,
}

impl<S, D, R: Debug> Debug for KeyRotationCoordinator<S, D, R> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KeyRotationCoordinator")
			.field("scanner", &self.scanner)
			.field("workers", &self.pool.current_num_threads())
			.finish_non_exhaustive()
	}
}

/// What the rotation did with one blob or entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
	Migrated,
	Skipped(SkipReason),
}

impl Outcome {
	pub fn is_migrated(&self) -> bool {
		matches!(self, Outcome::Migrated)
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
	/// Referenced from an entry, but not in storage.
	Missing,
	ReadFailed(String),
	/// Didn't decrypt under the old key.
	StaleKey,
	/// Decrypted fine, but the rewrite didn't stick.  The stored copy is unchanged.
	WriteFailed(String),
}

/// A blob identifier or entry ID, and what became of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Migration {
	pub identifier: String,
	pub outcome: Outcome,
}

impl Migration {
	fn skipped(identifier: &str, reason: SkipReason) -> Self {
		Self {
			identifier: identifier.to_string(),
			outcome: Outcome::Skipped(reason),
		}
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RotationReport {
	/// The user had no key before, so there was nothing to migrate.
	pub first_key: bool,
	pub blobs: Vec<Migration>,
	pub entries: Vec<Migration>,
}

impl RotationReport {
	pub fn skipped(&self) -> impl Iterator<Item = &Migration> {
		self.blobs
			.iter()
			.chain(self.entries.iter())
			.filter(|m| !m.outcome.is_migrated())
	}

	pub fn migrated_count(&self) -> usize {
		self.blobs
			.iter()
			.chain(self.entries.iter())
			.filter(|m| m.outcome.is_migrated())
			.count()
	}

	/// Whether every blob and entry made it across to the new key.
	pub fn is_complete(&self) -> bool {
		self.skipped().next().is_none()
	}
}

impl<S, D, R> KeyRotationCoordinator<S, D, R>
where
	S: BlobStore,
	D: DiaryDirectory,
	R: ImageRefScanner,
{
	/// Create a coordinator that re-encrypts up to `workers` blobs at once.
	///
	/// `locks` should be the same table the upload path uses, so a rotation and an upload never
	/// write the same blob at the same time.
	///
	/// # Errors
	///
	/// Returns [`Error::Config`] if `workers` is zero or the worker pool can't be started.
	#[tracing::instrument(level = "debug", skip(codec, store, directory, scanner, locks))]
	pub fn new(
		codec: KeyCodec,
		store: S,
		directory: D,
		scanner: R,
		locks: BlobLocks,
		workers: usize,
	) -> Result<Self, Error> {
		if workers == 0 {
			return Err(Error::config("rotation needs at least one worker"));
		}

		let pool = rayon::ThreadPoolBuilder::new()
			.num_threads(workers)
			.thread_name(|n| format!("key-rotation-{n}"))
			.build()
			.map_err(|e| Error::config(format!("failed to start rotation workers: {e}")))?;

		Ok(Self {
			codec,
			store,
			directory,
			scanner,
			locks,
			pool,
		})
	}

	pub fn locks(&self) -> &BlobLocks {
		&self.locks
	}

	/// Move `user_id` onto `new_key`, re-encrypting everything of theirs that was encrypted under
	/// their current key.
	///
	/// # Errors
	///
	/// * [`Error::KeyFormat`] or [`Error::Decryption`] if the user's current wrapped key can't
	///   be unwrapped; nothing is written in that case.
	/// * [`Error::Database`] if the directory can't be read, or the new key can't be stored.
	///
	/// Individual blobs or entries that can't be migrated are *not* errors; see
	/// [`RotationReport`].
	#[tracing::instrument(level = "info", skip(self, new_key))]
	pub fn rotate(&self, user_id: &str, new_key: &RawKey) -> Result<RotationReport, Error> {
		let mut report = RotationReport::default();

		match self.directory.wrapped_key(user_id)? {
			None => {
				tracing::debug!("No previous key, nothing to migrate");
				report.first_key = true;
			}
			Some(wrapped) => {
				let old_key = self.codec.unwrap(&wrapped)?;
				tracing::debug!("Current key unwrapped");

				if old_key.matches(new_key.expose_secret()) {
					tracing::debug!("New key is the current key, nothing to migrate");
				} else {
					let secrets = self.open_secret_entries(user_id, &old_key)?;
					report.blobs = self.migrate_blobs(user_id, &secrets, &old_key, new_key)?;
					report.entries = self.migrate_entries(user_id, secrets, new_key)?;
				}
			}
		}

		let wrapped = self.codec.wrap(new_key)?;
		self.directory.set_wrapped_key(user_id, &wrapped)?;

		let skipped = report.skipped().count();
		if skipped > 0 {
			tracing::warn!(
				migrated = report.migrated_count(),
				skipped,
				"Key rotated, but some items could not be migrated"
			);
		} else {
			tracing::info!(migrated = report.migrated_count(), "Key rotated");
		}

		Ok(report)
	}

	/// Decrypt every secret entry under the old key, so their images can be found and their
	/// text carried across.
	#[tracing::instrument(level = "debug", skip_all)]
	fn open_secret_entries(
		&self,
		user_id: &str,
		old_key: &RawKey,
	) -> Result<Vec<OpenedEntry>, Error> {
		let entries = self.directory.secret_entries(user_id)?;

		if entries.is_empty() {
			return Ok(Vec::new());
		}

		let cipher = TextCipher::new(old_key)?;

		Ok(entries
			.into_iter()
			.map(|entry| OpenedEntry {
				plaintext: cipher.decrypt(&entry.content).ok(),
				id: entry.id,
			})
			.collect())
	}

	#[tracing::instrument(level = "debug", skip_all)]
	fn migrate_blobs(
		&self,
		user_id: &str,
		secrets: &[OpenedEntry],
		old_key: &RawKey,
		new_key: &RawKey,
	) -> Result<Vec<Migration>, Error> {
		let contents = self.directory.diary_contents(user_id)?;

		// Secret entries are stored encrypted, so their images only show up in the plaintext
		let identifiers: Vec<String> = self
			.scanner
			.scan_all(
				contents
					.iter()
					.map(String::as_str)
					.chain(secrets.iter().filter_map(|e| e.plaintext.as_deref())),
			)
			.into_iter()
			.collect();

		tracing::debug!(
			entries = contents.len(),
			blobs = identifiers.len(),
			"Scanned for images"
		);

		if identifiers.is_empty() {
			return Ok(Vec::new());
		}

		let old_cipher = ImageCipher::new(old_key)?;
		let new_cipher = ImageCipher::new(new_key)?;

		Ok(self.pool.install(|| {
			identifiers
				.par_iter()
				.map(|id| self.migrate_blob(id, &old_cipher, &new_cipher))
				.collect::<Vec<_>>()
		}))
	}

	#[tracing::instrument(level = "debug", skip(self, old_cipher, new_cipher))]
	fn migrate_blob(
		&self,
		identifier: &str,
		old_cipher: &ImageCipher,
		new_cipher: &ImageCipher,
	) -> Migration {
		let _guard = self.locks.lock(identifier);

		if !self.store.exists(identifier) {
			tracing::warn!("Referenced image is missing, skipping");
			return Migration::skipped(identifier, SkipReason::Missing);
		}

		let stored = match self.store.read(identifier) {
			Ok(b) => b,
			Err(e) => {
				tracing::warn!(error = %e, "Failed to read image, skipping");
				return Migration::skipped(identifier, SkipReason::ReadFailed(e.to_string()));
			}
		};

		let Ok(plaintext) = old_cipher.decrypt_image(&stored) else {
			tracing::warn!("Image does not decrypt under the current key, leaving it alone");
			return Migration::skipped(identifier, SkipReason::StaleKey);
		};

		if let Err(e) = self.store.write(identifier, &new_cipher.encrypt(&plaintext)) {
			tracing::warn!(error = %e, "Failed to write re-encrypted image, skipping");
			return Migration::skipped(identifier, SkipReason::WriteFailed(e.to_string()));
		}

		tracing::debug!("Image re-encrypted");

		Migration {
			identifier: identifier.to_string(),
			outcome: Outcome::Migrated,
		}
	}

	/// Re-encrypt the text of every secret entry that opened under the old key.
	///
	/// Unlike images, entry text has no signature to check.  Valid UTF-8 is the only thing
	/// standing between a wrong-key decrypt that happened to unpad and a rewritten entry.
	#[tracing::instrument(level = "debug", skip_all)]
	fn migrate_entries(
		&self,
		user_id: &str,
		secrets: Vec<OpenedEntry>,
		new_key: &RawKey,
	) -> Result<Vec<Migration>, Error> {
		if secrets.is_empty() {
			return Ok(Vec::new());
		}

		let new_cipher = TextCipher::new(new_key)?;

		let mut migrations = Vec::with_capacity(secrets.len());

		for entry in secrets {
			let Some(plaintext) = entry.plaintext else {
				tracing::warn!(
					entry_id = %entry.id,
					"Secret entry does not decrypt under the current key, leaving it alone"
				);
				migrations.push(Migration::skipped(&entry.id, SkipReason::StaleKey));
				continue;
			};

			let outcome = match new_cipher
				.encrypt(&plaintext)
				.and_then(|c| self.directory.set_entry_content(user_id, &entry.id, &c))
			{
				Ok(()) => Outcome::Migrated,
				Err(e) => {
					tracing::warn!(
						entry_id = %entry.id,
						error = %e,
						"Failed to store re-encrypted entry"
					);
					Outcome::Skipped(SkipReason::WriteFailed(e.to_string()))
				}
			};

			migrations.push(Migration {
				identifier: entry.id,
				outcome,
			});
		}

		Ok(migrations)
	}
}

/// A secret entry, and its text if it opened under the old key.
struct OpenedEntry {
	id: String,
	plaintext: Option<String>,
}
