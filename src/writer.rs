//! Writing Zarr v3 arrays and groups.

use std::sync::Arc;

use ndarray::{ArrayViewD, Slice};
use rayon::prelude::*;
use serde_json::{Map, Value};
use zarrs::array::Array;
use zarrs::array::codec::api::BytesToBytesCodecTraits;
use zarrs::array::codec::{GzipCodec, ZstdCodec};
use zarrs::filesystem::FilesystemStore;
use zarrs::group::GroupBuilder;

use crate::array::{Sample, grid_indices, to_usize};
use crate::config::Compression;
use crate::error::{Result, ZarrError};
use crate::store::{Store, node_path};

/// Write group metadata at `path`.
pub fn create_group(store: &Store, path: &str, attributes: &Map<String, Value>) -> Result<()> {
    let group = GroupBuilder::new()
        .attributes(attributes.clone())
        .build(store.storage(), &node_path(path))?;
    group.store_metadata()?;
    log::debug!("Created group '{}'", path);
    Ok(())
}

fn bytes_codecs(
    compression: Compression,
    path: &str,
) -> Result<Vec<Arc<dyn BytesToBytesCodecTraits>>> {
    let codec: Arc<dyn BytesToBytesCodecTraits> = match compression {
        Compression::None => return Ok(Vec::new()),
        Compression::Zstd { level } => Arc::new(ZstdCodec::new(level, false)),
        Compression::Gzip { level } => {
            let level = u32::try_from(level)
                .map_err(|_| ZarrError::metadata(path, format!("invalid gzip level {}", level)))?;
            let gzip = GzipCodec::new(level)
                .map_err(|e| ZarrError::metadata(path, format!("invalid gzip level: {}", e)))?;
            Arc::new(gzip)
        }
    };
    Ok(vec![codec])
}

/// Builder for new Zarr v3 arrays.
///
/// ```rust,ignore
/// let writer = ArrayBuilder::new(vec![10, 10, 5], vec![5, 5, 5], 0u16)
///     .compression(Compression::Zstd { level: 3 })
///     .attribute("scale_factor", json!(0.01))
///     .create(&store, "0/hyperspec")?;
/// writer.store_array(&data.view())?;
/// ```
#[derive(Debug, Clone)]
pub struct ArrayBuilder<T: Sample> {
    shape: Vec<usize>,
    chunk_shape: Vec<usize>,
    fill_value: T,
    compression: Compression,
    attributes: Map<String, Value>,
}

impl<T: Sample> ArrayBuilder<T> {
    /// `fill_value` is what unwritten chunks decode to.
    pub fn new(shape: Vec<usize>, chunk_shape: Vec<usize>, fill_value: T) -> Self {
        Self {
            shape,
            chunk_shape,
            fill_value,
            compression: Compression::default(),
            attributes: Map::new(),
        }
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    /// Write the array metadata and return a writer for its chunks.
    pub fn create(&self, store: &Store, path: &str) -> Result<ArrayWriter> {
        let path = path.trim_matches('/').to_string();
        if self.shape.len() != self.chunk_shape.len() {
            return Err(ZarrError::ShapeMismatch {
                expected: self.shape.clone(),
                found: self.chunk_shape.clone(),
            });
        }
        if self.chunk_shape.contains(&0) {
            return Err(ZarrError::metadata(&path, "chunk shape contains a zero extent"));
        }

        let shape: Vec<u64> = self.shape.iter().map(|&s| s as u64).collect();
        let chunks: Vec<u64> = self.chunk_shape.iter().map(|&c| c as u64).collect();
        let array = T::builder(shape, chunks, self.fill_value)
            .bytes_to_bytes_codecs(bytes_codecs(self.compression, &path)?)
            .attributes(self.attributes.clone())
            .build(store.storage(), &node_path(&path))?;
        array.store_metadata()?;
        log::debug!(
            "Created array '{}': shape={:?}, chunks={:?}, dtype={}",
            path,
            self.shape,
            self.chunk_shape,
            T::DATA_TYPE
        );

        Ok(ArrayWriter {
            array,
            path,
            data_type: T::DATA_TYPE,
        })
    }
}

/// Writes chunks of an array created by [`ArrayBuilder`].
pub struct ArrayWriter {
    array: Array<FilesystemStore>,
    path: String,
    data_type: &'static str,
}

impl ArrayWriter {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn inner(&self) -> &Array<FilesystemStore> {
        &self.array
    }

    /// Encode and store one chunk.
    ///
    /// `data` must have the shape of the chunk's region clipped to the array
    /// bounds; zarrs pads edge chunks with the fill value.
    pub fn store_chunk<T: Sample>(&self, indices: &[u64], data: &ArrayViewD<'_, T>) -> Result<()> {
        if self.data_type != T::DATA_TYPE {
            return Err(ZarrError::DataTypeMismatch {
                stored: self.data_type.to_string(),
                requested: T::DATA_TYPE,
            });
        }

        let key = self.array.chunk_key(indices);
        let subset = self.array.chunk_subset_bounded(indices)?;
        let region_shape = to_usize(subset.shape(), key.as_str())?;
        if data.shape() != region_shape.as_slice() {
            return Err(ZarrError::ShapeMismatch {
                expected: region_shape,
                found: data.shape().to_vec(),
            });
        }

        T::store(&self.array, &subset, data.iter().copied().collect())
            .map_err(|e| ZarrError::chunk(key.as_str(), e))?;
        log::trace!("Stored chunk '{}'", key.as_str());
        Ok(())
    }

    /// Store a whole array, encoding chunks in parallel.
    pub fn store_array<T: Sample>(&self, data: &ArrayViewD<'_, T>) -> Result<()> {
        let shape = to_usize(self.array.shape(), &self.path)?;
        if data.shape() != shape.as_slice() {
            return Err(ZarrError::ShapeMismatch {
                expected: shape,
                found: data.shape().to_vec(),
            });
        }

        let chunks = grid_indices(self.array.chunk_grid_shape());
        let count = chunks.len();
        chunks.into_par_iter().try_for_each(|indices| {
            let subset = self.array.chunk_subset_bounded(&indices)?;
            let start = to_usize(subset.start(), &self.path)?;
            let extent = to_usize(subset.shape(), &self.path)?;
            let view = data.slice_each_axis(|ax| {
                let axis = ax.axis.index();
                Slice::from(start[axis]..start[axis] + extent[axis])
            });
            self.store_chunk(&indices, &view)
        })?;

        log::debug!("Stored {} chunks of '{}'", count, self.path);
        Ok(())
    }
}
