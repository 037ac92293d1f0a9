//! Best-effort removal of transient queue storage.

use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Something that may own on-disk storage to be deleted when it closes.
pub trait StorageOwner {
    /// Directory to delete on close, or `None` if the storage persists.
    fn owned_storage(&self) -> Option<&Path>;
}

/// Recursively delete `dir`.
///
/// Entries that cannot be removed are logged and skipped; the walk always
/// completes. Returns the number of failures.
pub fn delete_recursive(dir: &Path) -> usize {
    let mut failures = 0;
    remove_tree(dir, &mut failures);
    if failures == 0 {
        debug!(dir = %dir.display(), "deleted queue storage");
    }
    failures
}

fn remove_tree(path: &Path, failures: &mut usize) {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            if path.exists() {
                warn!(path = %path.display(), error = %e, "unable to list directory");
                *failures += 1;
            }
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unable to read directory entry");
                *failures += 1;
                continue;
            }
        };
        let child = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            remove_tree(&child, failures);
        } else if let Err(e) = fs::remove_file(&child) {
            warn!(path = %child.display(), error = %e, "unable to delete file");
            *failures += 1;
        }
    }

    if let Err(e) = fs::remove_dir(path) {
        warn!(path = %path.display(), error = %e, "unable to delete directory");
        *failures += 1;
    }
}
