//! File enumeration: which files under a root get scanned, and in what order.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::error::{ScanError, ScanResult};

pub fn build_ignore_set(patterns: &[String]) -> ScanResult<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(Some(builder.build()?))
}

/// Lists source files under `root` in a deterministic order (sorted paths).
///
/// Only an unreadable root is an error. Entries that fail further down the
/// tree are logged and skipped.
pub fn collect_source_files(
    root: &Path,
    config: &ScanConfig,
    ignore: Option<&GlobSet>,
) -> ScanResult<Vec<PathBuf>> {
    let meta = std::fs::metadata(root).map_err(|source| ScanError::Root {
        path: root.to_path_buf(),
        source,
    })?;

    if meta.is_file() {
        let keep = is_supported(root, config) && !is_ignored(root, root, ignore);
        return Ok(if keep { vec![root.to_path_buf()] } else { Vec::new() });
    }

    std::fs::read_dir(root).map_err(|source| ScanError::Root {
        path: root.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    let mut walker = WalkDir::new(root)
        .follow_links(config.follow_links)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry_res) = walker.next() {
        let entry = match entry_res {
            Ok(entry) => entry,
            Err(err) => {
                warn!("skipping unreadable entry: {err}");
                continue;
            }
        };
        let path = entry.path();
        if entry.depth() > 0 && is_ignored(root, path, ignore) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }
        if entry.file_type().is_file() && is_supported(path, config) {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

fn is_supported(path: &Path, config: &ScanConfig) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| config.accepts_extension(ext))
}

/// Globs are matched only against the path relative to the root (the file
/// name for a single-file root), so directories above the root never count.
fn is_ignored(root: &Path, path: &Path, ignore: Option<&GlobSet>) -> bool {
    let Some(set) = ignore else {
        return false;
    };
    let relative = if path == root {
        path.file_name().map(Path::new).unwrap_or(path)
    } else {
        path.strip_prefix(root).unwrap_or(path)
    };
    set.is_match(relative)
}

/// Display form of a scanned path: relative to the root, `/`-separated.
pub fn display_path(root: &Path, path: &Path) -> String {
    let relative = if root.is_file() {
        path.file_name().map(Path::new).unwrap_or(path)
    } else {
        path.strip_prefix(root).unwrap_or(path)
    };
    let normalized = relative.to_string_lossy().replace('\\', "/");
    normalized
        .strip_prefix("./")
        .unwrap_or(normalized.as_str())
        .to_string()
}
