use parking_lot::{Mutex, RawMutex, lock_api::ArcMutexGuard};
use std::{collections::HashMap, sync::Arc};

// Idle entries are swept out once the table grows past this
const PRUNE_THRESHOLD: usize = 256;

/// A lock per blob identifier.
///
/// Rotation rewrites a blob in place (read, decrypt, encrypt, write), and nothing stops an upload
/// or a second rotation from touching the same identifier in the middle of that.  Everything that
/// writes a blob takes its lock here first.  Clones share the same table.
#[derive(Clone, Debug, Default)]
pub struct BlobLocks {
	table: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

/// Held for as long as the blob is being worked on.
#[must_use = "the blob is only locked while the guard is held"]
pub struct BlobGuard {
	_guard: ArcMutexGuard<RawMutex, ()>,
}

impl std::fmt::Debug for BlobGuard {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BlobGuard").finish_non_exhaustive()
	}
}

impl BlobLocks {
	pub fn new() -> Self {
		Self::default()
	}

	/// Block until nobody else holds `identifier`, then hold it.
	#[tracing::instrument(level = "trace", skip(self))]
	pub fn lock(&self, identifier: &str) -> BlobGuard {
		let entry = {
			let mut table = self.table.lock();

			if table.len() >= PRUNE_THRESHOLD {
				// Only the table itself holds an idle entry
				table.retain(|_, m| Arc::strong_count(m) > 1);
			}

			Arc::clone(table.entry(identifier.to_string()).or_default())
		};

		// The table lock must be released before we wait on the blob lock
		BlobGuard {
			_guard: entry.lock_arc(),
		}
	}

	#[cfg(test)]
	fn len(&self) -> usize {
		self.table.lock().len()
	}

	#[cfg(test)]
	pub(crate) fn is_held(&self, identifier: &str) -> bool {
		self.table
			.lock()
			.get(identifier)
			.is_some_and(|m| m.is_locked())
	}
}
