//! Initial scan of a watched directory

use crate::error::SyncError;
use crate::watch::IgnoreMatcher;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Every regular file below `directory`, sorted by path.
///
/// Entries that vanish or cannot be read mid-walk are skipped; only an
/// unreadable `directory` is an error.
pub fn initial_scan(directory: &Path, ignore: &IgnoreMatcher) -> Result<Vec<PathBuf>, SyncError> {
    if !directory.is_dir() {
        return Err(SyncError::Startup(format!(
            "{} is not a directory",
            directory.display()
        )));
    }

    let walker = WalkDir::new(directory)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry
                .path()
                .strip_prefix(directory)
                .map_or(true, |relative| !ignore.is_ignored(relative))
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if e.depth() == 0 {
                    return Err(SyncError::Startup(format!(
                        "Failed to scan {}: {}",
                        directory.display(),
                        e
                    )));
                }
                warn!(error = %e, "Skipping unreadable entry during scan");
                continue;
            }
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    files.sort();
    debug!(directory = ?directory, files = files.len(), "Initial scan completed");
    Ok(files)
}
