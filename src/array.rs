//! Reading Zarr arrays chunk by chunk.
//!
//! [`ZarrArray`] wraps a [`zarrs::array::Array`] opened from a [`Store`].
//! zarrs parses the v2/v3 metadata and runs the codec chain; this module
//! adds the checks and the slab-parallel decode into one `ndarray` buffer.

use indicatif::ProgressBar;
use ndarray::{ArrayD, ArrayView, ArrayViewMutD, Axis, IxDyn, Slice};
use rayon::prelude::*;
use serde_json::{Map, Value};
use zarrs::array::{
    Array, ArrayBuilder, ArrayError, ArrayMetadata, ArrayMetadataOptions, ArraySubset, FillValue, data_type,
};
use zarrs::config::MetadataConvertVersion;
use zarrs::filesystem::FilesystemStore;

use crate::error::{Result, ZarrError};
use crate::store::{Store, node_path};

/// Element types this crate reads and writes.
///
/// Each implementation calls zarrs with its concrete element type.
pub trait Sample: Copy + Default + Send + Sync + 'static {
    /// Zarr v3 data type name
    const DATA_TYPE: &'static str;

    /// Decode `subset` of `array`, in C order.
    fn retrieve(
        array: &Array<FilesystemStore>,
        subset: &ArraySubset,
    ) -> std::result::Result<Vec<Self>, ArrayError>;

    /// Encode `values` (C order) into `subset` of `array`.
    fn store(
        array: &Array<FilesystemStore>,
        subset: &ArraySubset,
        values: Vec<Self>,
    ) -> std::result::Result<(), ArrayError>;

    /// Start an array builder for this element type.
    fn builder(shape: Vec<u64>, chunks: Vec<u64>, fill_value: Self) -> ArrayBuilder;

    fn to_f64(self) -> f64;
}

macro_rules! impl_sample {
    ($ty:ty, $name:literal, $data_type:ident, $to_f64:expr) => {
        impl Sample for $ty {
            const DATA_TYPE: &'static str = $name;

            fn retrieve(
                array: &Array<FilesystemStore>,
                subset: &ArraySubset,
            ) -> std::result::Result<Vec<Self>, ArrayError> {
                array.retrieve_array_subset::<Vec<$ty>>(subset)
            }

            fn store(
                array: &Array<FilesystemStore>,
                subset: &ArraySubset,
                values: Vec<Self>,
            ) -> std::result::Result<(), ArrayError> {
                array.store_array_subset(subset, &values)
            }

            fn builder(shape: Vec<u64>, chunks: Vec<u64>, fill_value: Self) -> ArrayBuilder {
                ArrayBuilder::new(shape, chunks, data_type::$data_type(), FillValue::from(fill_value))
            }

            #[inline]
            fn to_f64(self) -> f64 {
                ($to_f64)(self)
            }
        }
    };
}

impl_sample!(bool, "bool", bool, |v: bool| f64::from(u8::from(v)));
impl_sample!(i8, "int8", int8, f64::from);
impl_sample!(i16, "int16", int16, f64::from);
impl_sample!(i32, "int32", int32, f64::from);
impl_sample!(i64, "int64", int64, |v: i64| v as f64);
impl_sample!(u8, "uint8", uint8, f64::from);
impl_sample!(u16, "uint16", uint16, f64::from);
impl_sample!(u32, "uint32", uint32, f64::from);
impl_sample!(u64, "uint64", uint64, |v: u64| v as f64);
impl_sample!(f32, "float32", float32, f64::from);
impl_sample!(f64, "float64", float64, |v: f64| v);

/// Convert a zarrs extent list to `usize`, failing on overflow.
pub(crate) fn to_usize(values: &[u64], key: &str) -> Result<Vec<usize>> {
    values
        .iter()
        .map(|&v| usize::try_from(v).map_err(|_| ZarrError::metadata(key, "shape too large")))
        .collect()
}

/// All chunk indices of a grid, in C order.
pub(crate) fn grid_indices(grid_shape: &[u64]) -> Vec<Vec<u64>> {
    if grid_shape.contains(&0) {
        return Vec::new();
    }
    let mut all = Vec::new();
    let mut current = vec![0u64; grid_shape.len()];
    loop {
        all.push(current.clone());
        let mut axis = grid_shape.len();
        loop {
            if axis == 0 {
                return all;
            }
            axis -= 1;
            current[axis] += 1;
            if current[axis] < grid_shape[axis] {
                break;
            }
            current[axis] = 0;
        }
    }
}

/// An array opened from a store.
pub struct ZarrArray<'s> {
    store: &'s Store,
    path: String,
    array: Array<FilesystemStore>,
    data_type: String,
    codecs: Vec<String>,
    fill_value: Value,
}

impl<'s> ZarrArray<'s> {
    /// Open the array at `path`. Fails if its metadata or a codec is unsupported.
    pub fn open(store: &'s Store, path: &str) -> Result<Self> {
        let path = path.trim_matches('/').to_string();
        let array = Array::open(store.storage(), &node_path(&path))?;

        let options = ArrayMetadataOptions::default()
            .with_metadata_convert_version(MetadataConvertVersion::V3)
            .with_include_zarrs_metadata(false)
            .with_convert_aliased_extension_names(true);
        let ArrayMetadata::V3(metadata) = array.metadata_opt(&options) else {
            return Err(ZarrError::metadata(&path, "metadata has no Zarr v3 form"));
        };
        let data_type = metadata.data_type.name().to_string();
        let codecs = metadata
            .codecs
            .iter()
            .map(|codec| codec.name().to_string())
            .collect::<Vec<_>>();
        let fill_value = serde_json::to_value(&metadata.fill_value)?;

        log::debug!(
            "Opened array '{}': shape={:?}, chunks={:?}, dtype={}, codecs={:?}",
            path,
            array.shape(),
            array.chunk_grid_shape(),
            data_type,
            codecs
        );

        Ok(Self {
            store,
            path,
            array,
            data_type,
            codecs,
            fill_value,
        })
    }

    /// Array path inside the store.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The underlying zarrs array.
    pub fn inner(&self) -> &Array<FilesystemStore> {
        &self.array
    }

    /// Array shape.
    pub fn shape(&self) -> &[u64] {
        self.array.shape()
    }

    /// Data type name (`uint16`, `float32`, ...).
    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    /// Codec names in encode order.
    pub fn codec_names(&self) -> &[String] {
        &self.codecs
    }

    /// Fill value as it appears in Zarr v3 metadata.
    pub fn fill_value(&self) -> &Value {
        &self.fill_value
    }

    /// User attributes.
    pub fn attributes(&self) -> &Map<String, Value> {
        self.array.attributes()
    }

    /// A numeric attribute, if present.
    pub fn attribute_f64(&self, name: &str) -> Option<f64> {
        self.attributes().get(name).and_then(Value::as_f64)
    }

    /// Shape of the first chunk, which is the regular chunk shape.
    pub fn chunk_shape(&self) -> Result<Vec<u64>> {
        if self.array.chunk_grid_shape().contains(&0) {
            return Ok(Vec::new());
        }
        let origin = vec![0; self.array.dimensionality()];
        Ok(self
            .array
            .chunk_shape(&origin)?
            .iter()
            .map(|extent| extent.get())
            .collect())
    }

    /// Number of chunks in the grid.
    pub fn num_chunks(&self) -> u64 {
        self.array
            .chunk_grid_shape()
            .iter()
            .try_fold(1u64, |acc, &n| acc.checked_mul(n))
            .unwrap_or(u64::MAX)
    }

    /// Check that one decoded chunk fits in memory arithmetic.
    ///
    /// Returns the decoded chunk size in bytes.
    pub fn check_chunk_size(&self) -> Result<usize> {
        let element_size = self.array.data_type().fixed_size().ok_or_else(|| {
            ZarrError::metadata(&self.path, format!("variable size data type {}", self.data_type))
        })?;
        let bytes = self
            .chunk_shape()?
            .iter()
            .try_fold(1u64, |acc, &extent| acc.checked_mul(extent))
            .and_then(|elements| elements.checked_mul(element_size as u64))
            .and_then(|bytes| usize::try_from(bytes).ok());
        bytes.ok_or_else(|| ZarrError::metadata(&self.path, "chunk shape too large"))
    }

    /// Keys of chunks that are absent from the store.
    pub fn missing_chunks(&self) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for indices in grid_indices(self.array.chunk_grid_shape()) {
            let key = self.array.chunk_key(&indices);
            if !self.store.contains(key.as_str())? {
                missing.push(key.as_str().to_string());
            }
        }
        Ok(missing)
    }

    fn check_type<T: Sample>(&self) -> Result<()> {
        if self.data_type == T::DATA_TYPE {
            Ok(())
        } else {
            Err(ZarrError::DataTypeMismatch {
                stored: self.data_type.clone(),
                requested: T::DATA_TYPE,
            })
        }
    }

    /// Decode the part of one chunk that lies inside the array bounds.
    ///
    /// A chunk absent from the store decodes to the fill value.
    pub fn retrieve_chunk<T: Sample>(&self, indices: &[u64]) -> Result<ArrayD<T>> {
        self.check_type::<T>()?;
        let key = self.array.chunk_key(indices);
        let subset = self.array.chunk_subset_bounded(indices)?;
        let values =
            T::retrieve(&self.array, &subset).map_err(|e| ZarrError::chunk(key.as_str(), e))?;
        let shape = to_usize(subset.shape(), key.as_str())?;
        ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|_| {
            ZarrError::metadata(key.as_str(), "decoded chunk does not match its region")
        })
    }

    /// Decode one chunk, convert each element and write it into `slab`.
    ///
    /// `slab` covers the array region starting at `origin`.
    fn decode_chunk_into<T: Sample, U>(
        &self,
        indices: &[u64],
        slab: &mut ArrayViewMutD<'_, U>,
        origin: &[u64],
        convert: &(impl Fn(T) -> U + Sync),
    ) -> Result<()> {
        let key = self.array.chunk_key(indices);
        let subset = self.array.chunk_subset_bounded(indices)?;
        let values =
            T::retrieve(&self.array, &subset).map_err(|e| ZarrError::chunk(key.as_str(), e))?;

        let start = to_usize(subset.start(), key.as_str())?;
        let shape = to_usize(subset.shape(), key.as_str())?;
        let origin = to_usize(origin, key.as_str())?;
        let source = ArrayView::from_shape(IxDyn(&shape), &values).map_err(|_| {
            ZarrError::metadata(key.as_str(), "decoded chunk does not match its region")
        })?;

        let mut target = slab.slice_each_axis_mut(|ax| {
            let axis = ax.axis.index();
            let begin = start[axis] - origin[axis];
            Slice::from(begin..begin + shape[axis])
        });
        target.zip_mut_with(&source, |out, &value| *out = convert(value));
        log::trace!("Decoded chunk '{}'", key.as_str());
        Ok(())
    }

    /// Decode every chunk into a freshly allocated array, converting each
    /// element with `convert`.
    ///
    /// With `parallel` set, rows of chunks along the first axis are decoded
    /// concurrently; each row owns a disjoint slab of the output. Either the
    /// complete array is returned or the first error encountered.
    pub fn decode_all<T: Sample, U>(
        &self,
        convert: impl Fn(T) -> U + Sync,
        parallel: bool,
        progress: Option<&ProgressBar>,
    ) -> Result<ArrayD<U>>
    where
        U: Clone + Default + Send + Sync,
    {
        self.check_type::<T>()?;
        self.check_chunk_size()?;
        let shape = to_usize(self.array.shape(), &self.path)?;
        let mut dest = allocate::<U>(&shape)?;
        if dest.is_empty() {
            return Ok(dest);
        }

        if shape.is_empty() {
            let mut view = dest.view_mut();
            self.decode_chunk_into(&[], &mut view, &[], &convert)?;
            if let Some(pb) = progress {
                pb.inc(1);
            }
            return Ok(dest);
        }

        let grid_shape = self.array.chunk_grid_shape().to_vec();
        let row_len = grid_indices(&grid_shape[1..]).len().max(1);
        let rows: Vec<Vec<Vec<u64>>> = grid_indices(&grid_shape)
            .chunks(row_len)
            .map(<[Vec<u64>]>::to_vec)
            .collect();

        // Carve one slab per chunk row along axis 0
        let mut slabs = Vec::with_capacity(rows.len());
        let mut rest = dest.view_mut();
        for row in &rows {
            let subset = self.array.chunk_subset_bounded(&row[0])?;
            let origin = subset.start()[0];
            let extent = to_usize(&subset.shape()[..1], &self.path)?[0];
            let (slab, remaining) = rest.split_at(Axis(0), extent);
            rest = remaining;
            slabs.push((row, origin, slab));
        }

        let decode_slab = |(row, origin, mut slab): (&Vec<Vec<u64>>, u64, ArrayViewMutD<'_, U>)| {
            let mut slab_origin = vec![0u64; grid_shape.len()];
            slab_origin[0] = origin;
            for indices in row {
                self.decode_chunk_into(indices, &mut slab, &slab_origin, &convert)?;
                if let Some(pb) = progress {
                    pb.inc(1);
                }
            }
            Ok::<(), ZarrError>(())
        };

        if parallel {
            slabs.into_par_iter().try_for_each(decode_slab)?;
        } else {
            slabs.into_iter().try_for_each(decode_slab)?;
        }

        Ok(dest)
    }

    /// Read the whole array as its stored element type.
    pub fn retrieve<T: Sample>(&self) -> Result<ArrayD<T>> {
        self.decode_all::<T, T>(|v| v, false, None)
    }

    /// Read the whole array widened to `f64`, whatever its numeric type.
    pub fn retrieve_f64(&self) -> Result<ArrayD<f64>> {
        macro_rules! widen {
            ($($ty:ty),*) => {
                $(
                    if self.data_type == <$ty as Sample>::DATA_TYPE {
                        return self.decode_all::<$ty, f64>(<$ty as Sample>::to_f64, false, None);
                    }
                )*
            };
        }
        widen!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);
        Err(ZarrError::metadata(
            &self.path,
            format!("data type {} is not numeric", self.data_type),
        ))
    }

    /// Read the array as booleans; nonzero numeric values are `true`.
    pub fn retrieve_mask(&self) -> Result<ArrayD<bool>> {
        if self.data_type == bool::DATA_TYPE {
            self.retrieve::<bool>()
        } else {
            Ok(self.retrieve_f64()?.mapv(|v| v != 0.0))
        }
    }
}

/// Allocate a default-initialized array, reporting allocation failure as an error.
pub(crate) fn allocate<U: Clone + Default>(shape: &[usize]) -> Result<ArrayD<U>> {
    let len = shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or(ZarrError::Allocation { bytes: usize::MAX })?;
    let bytes = len.saturating_mul(std::mem::size_of::<U>());

    let mut buffer: Vec<U> = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| ZarrError::Allocation { bytes })?;
    buffer.resize(len, U::default());

    ArrayD::from_shape_vec(IxDyn(shape), buffer).map_err(|_| ZarrError::Allocation { bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store::{v2_zarray, write_v2_array, write_v2_metadata};
    use serde_json::json;

    #[test]
    fn test_grid_indices_c_order() {
        assert_eq!(
            grid_indices(&[2, 2]),
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
        assert_eq!(grid_indices(&[]), vec![Vec::<u64>::new()]);
        assert!(grid_indices(&[3, 0]).is_empty());
    }

    #[test]
    fn test_retrieve_with_edge_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let data = ArrayD::from_shape_fn(IxDyn(&[5, 3]), |idx| (idx[0] * 10 + idx[1]) as u16);
        write_v2_array(dir.path(), "a", &data, &[2, 2], json!({"id": "zlib", "level": 1}));

        let store = Store::open(dir.path()).unwrap();
        let array = ZarrArray::open(&store, "a").unwrap();
        assert_eq!(array.num_chunks(), 6);
        assert_eq!(array.chunk_shape().unwrap(), vec![2, 2]);
        assert_eq!(array.data_type(), "uint16");
        assert_eq!(array.retrieve::<u16>().unwrap(), data);

        let edge = array.retrieve_chunk::<u16>(&[2, 1]).unwrap();
        assert_eq!(edge.shape(), &[1, 1]);
        assert_eq!(edge[[0, 0]], 42);
    }

    #[test]
    fn test_missing_chunk_uses_fill_value() {
        let dir = tempfile::tempdir().unwrap();
        let data = ArrayD::from_shape_vec(IxDyn(&[4]), vec![1u16, 2, 3, 4]).unwrap();
        write_v2_array(dir.path(), "a", &data, &[2], json!({"id": "zlib", "level": 1}));
        // Rewrite the metadata with a fill value of 7 and drop the second chunk
        let mut zarray = v2_zarray::<u16>(&[4], &[2], json!({"id": "zlib", "level": 1}));
        zarray["fill_value"] = json!(7);
        write_v2_metadata(dir.path(), "a", &zarray);
        std::fs::remove_file(dir.path().join("a/1")).unwrap();

        let store = Store::open(dir.path()).unwrap();
        let array = ZarrArray::open(&store, "a").unwrap();
        assert_eq!(array.fill_value(), &json!(7));
        assert_eq!(array.missing_chunks().unwrap(), vec!["a/1".to_string()]);
        let values = array.retrieve::<u16>().unwrap();
        assert_eq!(values.into_raw_vec_and_offset().0, vec![1, 2, 7, 7]);
    }

    #[test]
    fn test_corrupt_chunk_reports_key() {
        let dir = tempfile::tempdir().unwrap();
        let data = ArrayD::from_shape_vec(IxDyn(&[4]), vec![1u16, 2, 3, 4]).unwrap();
        write_v2_array(dir.path(), "a", &data, &[2], json!({"id": "zlib", "level": 1}));
        std::fs::write(dir.path().join("a/1"), b"definitely not zlib").unwrap();

        let store = Store::open(dir.path()).unwrap();
        let array = ZarrArray::open(&store, "a").unwrap();
        match array.retrieve::<u16>() {
            Err(ZarrError::Chunk { key, .. }) => assert_eq!(key, "a/1"),
            other => panic!("expected chunk error, got {:?}", other.map(|a| a.shape().to_vec())),
        }
    }

    #[test]
    fn test_type_mismatch_and_widening() {
        let dir = tempfile::tempdir().unwrap();
        let data = ArrayD::from_shape_vec(IxDyn(&[3]), vec![10u16, 20, 30]).unwrap();
        write_v2_array(dir.path(), "w", &data, &[2], json!({"id": "zlib", "level": 1}));

        let store = Store::open(dir.path()).unwrap();
        let array = ZarrArray::open(&store, "w").unwrap();
        assert!(matches!(
            array.retrieve::<f32>(),
            Err(ZarrError::DataTypeMismatch { requested: "float32", .. })
        ));
        let widened = array.retrieve_f64().unwrap();
        assert_eq!(widened.into_raw_vec_and_offset().0, vec![10.0, 20.0, 30.0]);
        let mask = array.retrieve_mask().unwrap();
        assert!(mask.iter().all(|&v| v));
    }

    #[test]
    fn test_parallel_matches_serial() {
        let dir = tempfile::tempdir().unwrap();
        let data = ArrayD::from_shape_fn(IxDyn(&[9, 7, 4]), |idx| {
            (idx[0] * 100 + idx[1] * 10 + idx[2]) as u16
        });
        write_v2_array(dir.path(), "p", &data, &[2, 3, 4], json!({"id": "zlib", "level": 1}));

        let store = Store::open(dir.path()).unwrap();
        let array = ZarrArray::open(&store, "p").unwrap();
        let serial = array.decode_all::<u16, u32>(u32::from, false, None).unwrap();
        let parallel = array.decode_all::<u16, u32>(u32::from, true, None).unwrap();
        assert_eq!(serial, parallel);
        assert_eq!(serial, data.mapv(u32::from));
    }

    #[test]
    fn test_oversized_chunk_shape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let zarray = v2_zarray::<u16>(&[2, 2, 2], &[4294967296, 4294967296, 2], json!(null));
        write_v2_metadata(dir.path(), "big", &zarray);

        let store = Store::open(dir.path()).unwrap();
        let array = ZarrArray::open(&store, "big").unwrap();
        match array.check_chunk_size() {
            Err(ZarrError::Metadata { message, .. }) => assert_eq!(message, "chunk shape too large"),
            other => panic!("expected metadata error, got {:?}", other),
        }
        assert!(matches!(array.retrieve::<u16>(), Err(ZarrError::Metadata { .. })));
    }

    #[test]
    fn test_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        write_v2_metadata(dir.path(), "e", &v2_zarray::<u16>(&[0, 3], &[2, 3], json!(null)));

        let store = Store::open(dir.path()).unwrap();
        let array = ZarrArray::open(&store, "e").unwrap();
        assert_eq!(array.num_chunks(), 0);
        assert_eq!(array.retrieve::<u16>().unwrap().shape(), &[0, 3]);
    }

    #[test]
    fn test_allocate_overflow() {
        assert!(matches!(
            allocate::<f32>(&[usize::MAX, 4]),
            Err(ZarrError::Allocation { .. })
        ));
    }
}
