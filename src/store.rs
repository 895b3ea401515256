//! Opening Zarr hierarchies from directories and `.zip` archives.
//!
//! Every [`Store`] is backed by a [`zarrs::filesystem::FilesystemStore`].
//! A `.zip` archive is extracted into a temporary directory that lives as
//! long as the store. Archives written by zarr's `ZipStore` keep keys at the
//! archive root; archives made by zipping a `*.zarr` directory nest
//! everything under one top-level folder, which becomes the store root.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;
use zarrs::filesystem::FilesystemStore;
use zarrs::storage::{ListableStorageTraits, ReadableStorageTraits, StoreKey, StorePrefix};
use zip::ZipArchive;

use crate::constants::{ZARR_JSON, ZARRAY, ZATTRS, ZGROUP};
use crate::error::{Result, ValidationError, ZarrError};

/// Kind of node found at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Array,
    Group,
}

/// A Zarr hierarchy on disk.
pub struct Store {
    root: PathBuf,
    storage: Arc<FilesystemStore>,
    extracted: Option<TempDir>,
}

impl Store {
    /// Open an existing store, extracting it first if `path` is a zip archive.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ZarrError::Validation(ValidationError::StoreNotFound {
                path: path.to_path_buf(),
            }));
        }

        if path.is_file() && is_zip_path(path) {
            let extracted = TempDir::new()?;
            let root = extract_archive(path, extracted.path())?;
            log::debug!("Opening zip store {:?} (extracted to {:?})", path, root);
            Ok(Self {
                storage: Arc::new(FilesystemStore::new(&root)?),
                root,
                extracted: Some(extracted),
            })
        } else {
            log::debug!("Opening filesystem store {:?}", path);
            Self::at(path)
        }
    }

    /// Create (or reuse) a writable store directory.
    pub fn create(path: &Path) -> Result<Self> {
        if is_zip_path(path) {
            return Err(ZarrError::ReadOnly(format!("cannot write into zip archive {:?}", path)));
        }
        std::fs::create_dir_all(path)?;
        Self::at(path)
    }

    fn at(path: &Path) -> Result<Self> {
        Ok(Self {
            root: path.to_path_buf(),
            storage: Arc::new(FilesystemStore::new(path)?),
            extracted: None,
        })
    }

    /// Directory the store keys resolve against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the store was extracted from a zip archive.
    pub fn is_archive(&self) -> bool {
        self.extracted.is_some()
    }

    /// The backing zarrs storage, for opening arrays and groups.
    pub fn storage(&self) -> Arc<FilesystemStore> {
        Arc::clone(&self.storage)
    }

    /// Check whether `key` exists.
    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.storage.size_key(&StoreKey::new(key)?)?.is_some())
    }

    /// Read and parse the JSON document stored under `key`.
    pub fn get_json(&self, key: &str) -> Result<Option<Value>> {
        match self.storage.get(&StoreKey::new(key)?)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Names of the child directories below `path`, sorted.
    pub fn list_children(&self, path: &str) -> Result<Vec<String>> {
        let path = path.trim_matches('/');
        if !self.root.join(path).is_dir() {
            return Ok(Vec::new());
        }
        let prefix = if path.is_empty() {
            StorePrefix::root()
        } else {
            StorePrefix::new(format!("{}/", path))?
        };

        let listing = self.storage.list_dir(&prefix)?;
        let children: BTreeSet<String> = listing
            .prefixes()
            .iter()
            .filter_map(|child| child.as_str().strip_prefix(prefix.as_str()))
            .map(|name| name.trim_end_matches('/').to_string())
            .filter(|name| !name.is_empty())
            .collect();
        Ok(children.into_iter().collect())
    }

    /// What kind of node, if any, has its metadata at `path`.
    pub fn node_kind(&self, path: &str) -> Result<Option<NodeKind>> {
        if self.contains(&join_key(path, ZARRAY))? {
            return Ok(Some(NodeKind::Array));
        }
        if self.contains(&join_key(path, ZGROUP))? {
            return Ok(Some(NodeKind::Group));
        }

        let key = join_key(path, ZARR_JSON);
        let Some(document) = self.get_json(&key)? else {
            return Ok(None);
        };
        match document.get("node_type").and_then(Value::as_str) {
            Some("array") => Ok(Some(NodeKind::Array)),
            Some("group") => Ok(Some(NodeKind::Group)),
            other => Err(ZarrError::metadata(key, format!("unknown node_type {:?}", other))),
        }
    }
}

/// Join a node path and a child name into a store key.
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Absolute node path in the form zarrs expects (`/0/hyperspec`).
pub fn node_path(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

/// Check if a path names a zip archive.
pub fn is_zip_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// Build a new store at `dest`, moving it into place only if `write` succeeds.
///
/// The store is written to a hidden sibling directory first, so a failure
/// never leaves a partial store at `dest`. An existing `dest` is rejected.
pub fn write_store<R>(dest: &Path, write: impl FnOnce(&Store) -> Result<R>) -> Result<R> {
    if is_zip_path(dest) {
        return Err(ZarrError::ReadOnly(format!("cannot write into zip archive {:?}", dest)));
    }
    if dest.exists() {
        return Err(ZarrError::DestinationExists(dest.to_path_buf()));
    }

    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let staging = tempfile::Builder::new()
        .prefix(".zarr-partial-")
        .tempdir_in(parent)?;

    let value = {
        let store = Store::create(staging.path())?;
        write(&store)?
    };

    let staged = staging.keep();
    if let Err(e) = std::fs::rename(&staged, dest) {
        let _ = std::fs::remove_dir_all(&staged);
        return Err(e.into());
    }
    log::debug!("Moved staged store into {:?}", dest);
    Ok(value)
}

/// Check if an archive entry should be skipped.
fn is_ignored_entry(name: &str) -> bool {
    let lower = name.to_lowercase();
    // Skip macOS metadata
    lower.starts_with("__macosx") || lower.contains("/._") || lower.starts_with("._")
}

/// Find the folder holding the root metadata when it is not at the archive root.
fn detect_prefix(names: &[String]) -> Option<String> {
    let is_root_metadata =
        |name: &str| name == ZARR_JSON || name == ZGROUP || name == ZATTRS || name == ZARRAY;
    if names.iter().any(|n| is_root_metadata(n)) {
        return None;
    }

    let top_level: BTreeSet<&str> = names
        .iter()
        .filter_map(|n| n.split_once('/').map(|(first, _)| first))
        .collect();

    match top_level.iter().next() {
        Some(folder) if top_level.len() == 1 && names.iter().all(|n| n.contains('/')) => {
            Some(folder.to_string())
        }
        _ => None,
    }
}

/// Extract `archive` into `dest` and return the directory holding the store root.
fn extract_archive(archive: &Path, dest: &Path) -> Result<PathBuf> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;

    let names: Vec<String> = zip
        .file_names()
        .filter(|name| !name.ends_with('/') && !is_ignored_entry(name))
        .map(str::to_string)
        .collect();
    log::debug!("Zip archive {:?} holds {} store entries", archive, names.len());

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() || is_ignored_entry(entry.name()) {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            log::warn!("Skipping zip entry with unsafe path '{}'", entry.name());
            continue;
        };

        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::io::copy(&mut entry, &mut File::create(&target)?)?;
        log::trace!("Extracted '{}'", entry.name());
    }

    match detect_prefix(&names) {
        Some(folder) => {
            log::debug!("Zip store rooted at '{}'", folder);
            Ok(dest.join(folder))
        }
        None => Ok(dest.to_path_buf()),
    }
}
