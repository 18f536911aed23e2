//! Append-only review version store.
//!
//! # Storage layout
//!
//! ```text
//! ~/.patrol/reviews/<owner>/<name>/<number>/
//!   meta.json                      (title, author, url, recorded_at)
//!   versions/<millis>-<sha12>.json (one immutable file per version)
//! ```
//!
//! Versions are never mutated in place — only created or deleted as a
//! whole unit. Listing is newest-first. Deleting any single file leaves
//! every other file usable.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{io_err, StoreError};
use crate::paths;
use crate::types::{ItemKey, ItemMeta, ReviewVersion};

/// Legacy single-file layout, migrated once by [`migrate_legacy_at`].
const LEGACY_REVIEW_FILE: &str = "review.md";

fn versions_dir(home: &Path, key: &ItemKey) -> PathBuf {
    paths::review_dir(home, key).join("versions")
}

fn meta_path(home: &Path, key: &ItemKey) -> PathBuf {
    paths::review_dir(home, key).join("meta.json")
}

/// File name for one version: zero-padded unix millis + truncated SHA,
/// so lexicographic order equals chronological order.
fn version_file_name(created_at: DateTime<Utc>, revision: &str) -> String {
    let sha: String = revision.chars().take(12).collect();
    format!("{:013}-{}.json", created_at.timestamp_millis().max(0), sha)
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Write (or overwrite) the item metadata file atomically.
pub fn record_meta_at(home: &Path, key: &ItemKey, meta: &ItemMeta) -> Result<(), StoreError> {
    let path = meta_path(home, key);
    let dir = paths::review_dir(home, key);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let json = serde_json::to_string_pretty(meta)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Load item metadata, if recorded.
pub fn load_meta_at(home: &Path, key: &ItemKey) -> Result<Option<ItemMeta>, StoreError> {
    let path = meta_path(home, key);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(&path, err)),
    };
    Ok(serde_json::from_str(&contents).ok())
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// Append one immutable version file. Returns the path written.
///
/// A same-millisecond collision for the same revision bumps the file
/// timestamp forward until a free name is found.
pub fn append_version_at(
    home: &Path,
    key: &ItemKey,
    version: &ReviewVersion,
) -> Result<PathBuf, StoreError> {
    let dir = versions_dir(home, key);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let mut stamp = version.created_at;
    let mut path = dir.join(version_file_name(stamp, &version.revision));
    while path.exists() {
        stamp = stamp + chrono::Duration::milliseconds(1);
        path = dir.join(version_file_name(stamp, &version.revision));
    }

    let json = serde_json::to_string_pretty(version)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// All versions for an item, newest first. Unparseable files are skipped.
pub fn list_versions_at(home: &Path, key: &ItemKey) -> Result<Vec<ReviewVersion>, StoreError> {
    Ok(read_version_files(home, key)?
        .into_iter()
        .map(|(_, v)| v)
        .collect())
}

/// Delete the oldest versions beyond `retention`. Returns how many were
/// removed. Idempotent.
pub fn prune_versions_at(
    home: &Path,
    key: &ItemKey,
    retention: usize,
) -> Result<usize, StoreError> {
    let files = read_version_files(home, key)?;
    if files.len() <= retention {
        return Ok(0);
    }
    let mut removed = 0;
    for (path, _) in &files[retention..] {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(path, err)),
        }
    }
    Ok(removed)
}

/// Remove an item's whole review directory. Returns whether it existed.
pub fn delete_item_at(home: &Path, key: &ItemKey) -> Result<bool, StoreError> {
    let dir = paths::review_dir(home, key);
    match std::fs::remove_dir_all(&dir) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(&dir, err)),
    }
}

/// Every item with a review directory, sorted. Walks the fixed
/// `<owner>/<name>/<number>` depth; anything else is ignored.
pub fn list_item_keys_at(home: &Path) -> Result<Vec<ItemKey>, StoreError> {
    let root = paths::reviews_root(home);
    let mut keys = Vec::new();
    if !root.exists() {
        return Ok(keys);
    }
    for owner in read_dirs(&root)? {
        for name in read_dirs(&owner)? {
            for number in read_dirs(&name)? {
                let slug = format!(
                    "{}/{}",
                    owner.file_name().unwrap_or_default().to_string_lossy(),
                    name.file_name().unwrap_or_default().to_string_lossy(),
                );
                let num = number.file_name().unwrap_or_default().to_string_lossy();
                if let Ok(key) = ItemKey::parse(&format!("{slug}#{num}")) {
                    keys.push(key);
                }
            }
        }
    }
    keys.sort();
    Ok(keys)
}

/// One-time migration from the legacy single-file layout.
///
/// Precondition: `review.md` present at the item dir root. Postcondition:
/// its content lives as the oldest entry in `versions/` and the legacy
/// file is gone. Returns whether a migration happened; calling again is a
/// no-op.
pub fn migrate_legacy_at(
    home: &Path,
    key: &ItemKey,
    revision: Option<&str>,
) -> Result<bool, StoreError> {
    let legacy = paths::review_dir(home, key).join(LEGACY_REVIEW_FILE);
    let body = match std::fs::read_to_string(&legacy) {
        Ok(body) => body,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(io_err(&legacy, err)),
    };

    let created_at = std::fs::metadata(&legacy)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    append_version_at(
        home,
        key,
        &ReviewVersion {
            created_at,
            revision: revision.unwrap_or("unknown").to_string(),
            ok: true,
            body,
        },
    )?;
    std::fs::remove_file(&legacy).map_err(|e| io_err(&legacy, e))?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Version files with parsed payloads, newest first (created_at, then
/// file name as tiebreak).
fn read_version_files(
    home: &Path,
    key: &ItemKey,
) -> Result<Vec<(PathBuf, ReviewVersion)>, StoreError> {
    let dir = versions_dir(home, key);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(io_err(&dir, err)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(&dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(contents) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(version) = serde_json::from_str::<ReviewVersion>(&contents) else {
            continue;
        };
        files.push((path, version));
    }

    files.sort_by(|(pa, va), (pb, vb)| {
        vb.created_at
            .cmp(&va.created_at)
            .then_with(|| pb.cmp(pa))
    });
    Ok(files)
}

fn read_dirs(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    Ok(dirs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
