//! Zarr groups.

use serde_json::{Map, Value};

use crate::array::ZarrArray;
use crate::constants::ZARR_JSON;
use crate::error::{Result, ZarrError};
use crate::store::{NodeKind, Store, join_key, node_path};

/// A group opened from a store.
pub struct Group<'s> {
    store: &'s Store,
    path: String,
    attributes: Map<String, Value>,
    zarr_format: Option<u8>,
}

impl<'s> Group<'s> {
    /// Look up the group at `path`.
    ///
    /// A directory without group metadata but with child nodes is accepted as
    /// an implicit group. Returns `Ok(None)` when nothing group-like exists.
    pub fn find(store: &'s Store, path: &str) -> Result<Option<Self>> {
        let path = path.trim_matches('/').to_string();
        match store.node_kind(&path)? {
            Some(NodeKind::Group) => {
                let group = zarrs::group::Group::open(store.storage(), &node_path(&path))?;
                let zarr_format = if store.contains(&join_key(&path, ZARR_JSON))? { 3 } else { 2 };
                Ok(Some(Self {
                    store,
                    attributes: group.attributes().clone(),
                    path,
                    zarr_format: Some(zarr_format),
                }))
            }
            Some(NodeKind::Array) => Err(ZarrError::metadata(path, "node is an array, not a group")),
            None => {
                let implicit = Self {
                    store,
                    path,
                    attributes: Map::new(),
                    zarr_format: None,
                };
                if implicit.path.is_empty() || implicit.member_names()?.is_empty() {
                    return Ok(None);
                }
                log::warn!("Group '{}' has no metadata, treating it as implicit", implicit.path);
                Ok(Some(implicit))
            }
        }
    }

    /// Open the group at `path`, failing if it does not exist.
    pub fn open(store: &'s Store, path: &str) -> Result<Self> {
        Self::find(store, path)?.ok_or_else(|| ZarrError::metadata(path, "no group found"))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Zarr format of the group metadata, `None` for an implicit group.
    pub fn zarr_format(&self) -> Option<u8> {
        self.zarr_format
    }

    /// Names of child arrays and groups, sorted.
    pub fn member_names(&self) -> Result<Vec<String>> {
        let mut members = Vec::new();
        for name in self.store.list_children(&self.path)? {
            if self.store.node_kind(&join_key(&self.path, &name))?.is_some() {
                members.push(name);
            }
        }
        Ok(members)
    }

    /// Kind of the child node `name`, if it exists.
    pub fn member_kind(&self, name: &str) -> Result<Option<NodeKind>> {
        self.store.node_kind(&join_key(&self.path, name))
    }

    /// Whether the child `name` is an array.
    pub fn has_array(&self, name: &str) -> Result<bool> {
        Ok(self.member_kind(name)? == Some(NodeKind::Array))
    }

    /// Open the child array `name`.
    pub fn array(&self, name: &str) -> Result<ZarrArray<'s>> {
        ZarrArray::open(self.store, &join_key(&self.path, name))
    }
}
