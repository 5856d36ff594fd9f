//! Receive-directory bookkeeping — placement, listing, cleanup.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Manages the receive directory: collision-free placement for inbound
/// files, optional date-named subdirectories, listing, and age-based
/// cleanup.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
    dated_subdirs: bool,
}

impl FileStore {
    /// Open (and create if needed) the receive directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            dated_subdirs: false,
        })
    }

    /// Place incoming files under a `YYYY-MM-DD` subdirectory.
    pub fn with_dated_subdirs(mut self, enabled: bool) -> Self {
        self.dated_subdirs = enabled;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Choose the destination path for a declared filename.
    ///
    /// The name is reduced to its final path component before placement so
    /// a sender cannot escape the receive directory, then suffixed until
    /// it does not collide with an existing file.
    pub fn place(&self, declared_name: &str) -> std::io::Result<PathBuf> {
        let filename = sanitize_filename(declared_name);
        let dir = if self.dated_subdirs {
            self.dated_subdir()?
        } else {
            self.base_dir.clone()
        };
        Ok(unique_path(&dir, &filename))
    }

    /// Return (and create) the subdirectory named by today's date.
    pub fn dated_subdir(&self) -> std::io::Result<PathBuf> {
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        let subdir = self.base_dir.join(today);
        std::fs::create_dir_all(&subdir)?;
        Ok(subdir)
    }

    /// Sorted list of files directly under the receive directory.
    pub fn list_received(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "failed to list received files");
                return Vec::new();
            }
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        files
    }

    /// Delete received files older than `max_age_days`. Returns the count.
    pub fn cleanup_old(&self, max_age_days: u32) -> usize {
        let cutoff = SystemTime::now() - Duration::from_secs(u64::from(max_age_days) * 86_400);
        let removed = remove_older_than(&self.base_dir, cutoff);
        tracing::info!(removed, "cleaned up old received files");
        removed
    }
}

fn remove_older_than(dir: &Path, cutoff: SystemTime) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cleanup could not read directory");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            removed += remove_older_than(&path, cutoff);
            continue;
        }
        let modified = entry.metadata().and_then(|m| m.modified());
        if matches!(modified, Ok(mtime) if mtime < cutoff) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove"),
            }
        }
    }
    removed
}

/// Reduce a declared filename to its final path component.
fn sanitize_filename(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string()
}

/// Pick a path in `dir` that does not collide with an existing file:
/// `name.ext`, then `name_1.ext`, `name_2.ext`, … at the moment of check.
pub fn unique_path(dir: &Path, filename: &str) -> PathBuf {
    let target = dir.join(filename);
    if !target.exists() {
        return target;
    }

    let name = Path::new(filename);
    let stem = name
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    let extension = name.extension().and_then(|e| e.to_str());

    let mut counter = 1;
    loop {
        let candidate = match extension {
            Some(ext) => dir.join(format!("{stem}_{counter}.{ext}")),
            None => dir.join(format!("{stem}_{counter}")),
        };
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
