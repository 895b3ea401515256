//! Synthetic Zarr stores for tests.
//!
//! Metadata documents are written by hand in the layout zarr-python emits,
//! and chunks are encoded through zarrs, so blosc and zlib chunks are the
//! real compressed frames a Python writer would leave on disk.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use ndarray::{ArrayD, Dimension, IxDyn};
use serde_json::{Value, json};
use zarrs::array::Array;
use zarrs::array::codec::ZstdCodec;
use zarrs::filesystem::FilesystemStore;

use crate::array::Sample;
use crate::store::node_path;

/// The compressor numcodecs picks when zarr-python 2 is given none.
pub fn numcodecs_blosc() -> Value {
    json!({"id": "blosc", "cname": "lz4", "clevel": 5, "shuffle": 1, "blocksize": 0})
}

fn v2_typestr<T: Sample>() -> &'static str {
    match T::DATA_TYPE {
        "bool" => "|b1",
        "int8" => "|i1",
        "int16" => "<i2",
        "int32" => "<i4",
        "int64" => "<i8",
        "uint8" => "|u1",
        "uint16" => "<u2",
        "uint32" => "<u4",
        "uint64" => "<u8",
        "float32" => "<f4",
        "float64" => "<f8",
        other => panic!("no v2 type string for {}", other),
    }
}

/// Write a JSON document under `key`.
pub fn write_json(root: &Path, key: &str, document: &Value) {
    let path = root.join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_vec_pretty(document).unwrap()).unwrap();
}

/// A `.zarray` document as zarr-python 2 writes it.
pub fn v2_zarray<T: Sample>(shape: &[u64], chunks: &[u64], compressor: Value) -> Value {
    let fill = if T::DATA_TYPE == "bool" { json!(false) } else { json!(0) };
    json!({
        "zarr_format": 2,
        "shape": shape,
        "chunks": chunks,
        "dtype": v2_typestr::<T>(),
        "compressor": compressor,
        "fill_value": fill,
        "order": "C",
        "filters": null,
    })
}

/// Write `.zarray` for the array at `path`.
pub fn write_v2_metadata(root: &Path, path: &str, zarray: &Value) {
    write_json(root, &format!("{}/.zarray", path), zarray);
}

fn storage(root: &Path) -> Arc<FilesystemStore> {
    Arc::new(FilesystemStore::new(root).unwrap())
}

/// Write a C-order Zarr v2 array and all of its chunks.
pub fn write_v2_array<T: Sample>(
    root: &Path,
    path: &str,
    data: &ArrayD<T>,
    chunks: &[u64],
    compressor: Value,
) {
    let shape: Vec<u64> = data.shape().iter().map(|&s| s as u64).collect();
    write_v2_metadata(root, path, &v2_zarray::<T>(&shape, chunks, compressor));

    let array = Array::open(storage(root), &node_path(path)).unwrap();
    T::store(&array, &array.subset_all(), data.iter().copied().collect()).unwrap();
}

/// Write a Zarr v3 array with the `bytes` codec followed by zstd.
pub fn write_v3_array<T: Sample>(
    root: &Path,
    path: &str,
    data: &ArrayD<T>,
    chunks: &[u64],
    attributes: Value,
) {
    let shape: Vec<u64> = data.shape().iter().map(|&s| s as u64).collect();
    let attributes = match attributes {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    let array = T::builder(shape, chunks.to_vec(), T::default())
        .bytes_to_bytes_codecs(vec![Arc::new(ZstdCodec::new(3, false))])
        .attributes(attributes)
        .build(storage(root), &node_path(path))
        .unwrap();
    array.store_metadata().unwrap();
    T::store(&array, &array.subset_all(), data.iter().copied().collect()).unwrap();
}

/// Deterministic cube covering the full `u16` range.
pub fn sample_cube(shape: &[usize]) -> ArrayD<u16> {
    let mut counter: u32 = 0;
    ArrayD::from_shape_simple_fn(IxDyn(shape), || {
        counter = counter.wrapping_add(7919);
        (counter % 65536) as u16
    })
}

/// Builder for a complete hyperspectral store.
pub struct CubeFixture {
    shape: Vec<usize>,
    chunks: Vec<u64>,
    attributes: Value,
    compressor: Value,
    mask: bool,
    v3: bool,
}

impl CubeFixture {
    /// A cube stored as a single blosc chunk, with mask and no rescale attributes.
    pub fn new(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            chunks: shape.iter().map(|&s| s.max(1) as u64).collect(),
            attributes: json!({}),
            compressor: numcodecs_blosc(),
            mask: true,
            v3: false,
        }
    }

    pub fn chunks(mut self, chunks: &[u64]) -> Self {
        self.chunks = chunks.to_vec();
        self
    }

    pub fn attributes(mut self, attributes: Value) -> Self {
        self.attributes = attributes;
        self
    }

    /// Replace the v2 compressor of every array.
    pub fn compressor(mut self, compressor: Value) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn without_mask(mut self) -> Self {
        self.mask = false;
        self
    }

    /// Write Zarr v3 metadata and zstd chunks instead.
    pub fn zarr_v3(mut self) -> Self {
        self.v3 = true;
        self
    }

    /// Wavenumber axis matching the last cube dimension.
    pub fn wavenumbers(&self) -> ArrayD<f64> {
        let bands = self.shape.last().copied().unwrap_or(0);
        ArrayD::from_shape_fn(IxDyn(&[bands]), |idx| 950.0 + 2.0 * idx[0] as f64)
    }

    /// Mask over the spatial dimensions.
    pub fn mask(&self) -> ArrayD<bool> {
        let spatial = &self.shape[..self.shape.len().saturating_sub(1)];
        ArrayD::from_shape_fn(IxDyn(spatial), |idx| idx.slice().iter().sum::<usize>() % 3 != 0)
    }

    fn write_array<T: Sample>(&self, root: &Path, path: &str, data: &ArrayD<T>, chunks: &[u64]) {
        if self.v3 {
            let attributes = if path.ends_with("hyperspec") {
                self.attributes.clone()
            } else {
                json!({})
            };
            write_v3_array(root, path, data, chunks, attributes);
        } else {
            write_v2_array(root, path, data, chunks, self.compressor.clone());
        }
    }

    /// Write the store below `root` and return the raw cube.
    pub fn write(&self, root: &Path) -> ArrayD<u16> {
        let cube = sample_cube(&self.shape);

        if self.v3 {
            let group = json!({"zarr_format": 3, "node_type": "group", "attributes": {}});
            write_json(root, "zarr.json", &group);
            write_json(root, "0/zarr.json", &group);
        } else {
            write_json(root, ".zgroup", &json!({"zarr_format": 2}));
            write_json(root, "0/.zgroup", &json!({"zarr_format": 2}));
            write_json(root, "0/hyperspec/.zattrs", &self.attributes);
        }
        self.write_array(root, "0/hyperspec", &cube, &self.chunks);

        let wavenumbers = self.wavenumbers();
        let wavenumber_chunks = [wavenumbers.len().max(1) as u64];
        self.write_array(root, "0/wvnm", &wavenumbers, &wavenumber_chunks);

        if self.mask {
            let mask = self.mask();
            let mask_chunks: Vec<u64> = mask.shape().iter().map(|&s| s.max(1) as u64).collect();
            self.write_array(root, "0/mask", &mask, &mask_chunks);
        }

        cube
    }
}

/// Pack a store directory into a zip archive, the way `zip -r` would.
pub fn zip_directory(root: &Path, archive: &Path) {
    fn add(writer: &mut zip::ZipWriter<std::fs::File>, root: &Path, dir: &Path) {
        let mut entries: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        entries.sort();
        for path in entries {
            let name = path
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            if path.is_dir() {
                add(writer, root, &path);
            } else {
                let options = zip::write::SimpleFileOptions::default()
                    .compression_method(zip::CompressionMethod::Deflated);
                writer.start_file(name, options).unwrap();
                writer.write_all(&std::fs::read(&path).unwrap()).unwrap();
            }
        }
    }

    let file = std::fs::File::create(archive).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    add(&mut writer, root, root);
    writer.finish().unwrap();
}
