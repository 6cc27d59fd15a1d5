use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Regular files in `dir` whose name contains `marker`, sorted by path.
///
/// Creates `dir` when missing. Any I/O problem is logged and yields fewer
/// (or zero) candidates instead of an error.
pub async fn discover(dir: &Path, marker: &str) -> Vec<PathBuf> {
    if let Err(err) = tokio::fs::create_dir_all(dir).await {
        warn!(dir = %dir.display(), error = %err, "cannot create plugin directory");
        return Vec::new();
    }
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "cannot read plugin directory");
            return Vec::new();
        }
    };

    let mut candidates = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "error while listing plugins");
                break;
            }
        };
        if !entry.file_name().to_string_lossy().contains(marker) {
            continue;
        }
        // Follows symlinks, so a linked binary counts as a file.
        match tokio::fs::metadata(entry.path()).await {
            Ok(meta) if meta.is_file() => candidates.push(entry.path()),
            Ok(_) => debug!(path = %entry.path().display(), "skipping non-file plugin entry"),
            Err(err) => {
                warn!(path = %entry.path().display(), error = %err, "cannot stat plugin candidate")
            }
        }
    }
    candidates.sort();
    candidates
}
