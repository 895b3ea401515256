//! Decoding hyperspectral stores into `f32` cubes.
//!
//! Two entry points:
//!
//! - [`decompress_to_memory`]: validate, then decode the cube, wavenumbers and
//!   mask into owned arrays
//! - [`decompress_to_storage`]: decode chunk by chunk into a new `float32` store
//!
//! Both abort on the first failing chunk; no partially decoded array is ever
//! returned or left referenced.

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::ArrayD;
use rayon::prelude::*;
use serde_json::{Map, Value, json};

use crate::array::{ZarrArray, grid_indices, to_usize};
use crate::config::{DecodeOptions, WriteOptions};
use crate::constants::{
    DECOMPRESSED_DATA_NAME, DECOMPRESSED_WAVENUMBER_NAME, DEFAULT_GROUP, MASK_ARRAY_NAME,
};
use crate::error::Result;
use crate::group::Group;
use crate::rescale::Rescale;
use crate::store::{Store, write_store};
use crate::validate::{ArrayNames, WarningSeverity, check_source_dtype, validate_opened};
use crate::writer::{ArrayBuilder, create_group};

/// A decoded hyperspectral cube.
#[derive(Debug, Clone)]
pub struct DecompressedCube {
    /// Rescaled samples, same shape as the stored array
    pub data: ArrayD<f32>,
    /// Wavenumber axis
    pub wavenumbers: ArrayD<f64>,
    /// Optional mask, nonzero stored values are `true`
    pub mask: Option<ArrayD<bool>>,
    /// Mapping that produced `data`
    pub rescale: Rescale,
}

impl DecompressedCube {
    /// Wrap arrays that did not come from a store, assuming the
    /// hyperspectral convention.
    pub fn new(data: ArrayD<f32>, wavenumbers: ArrayD<f64>, mask: Option<ArrayD<bool>>) -> Self {
        Self {
            data,
            wavenumbers,
            mask,
            rescale: Rescale::hyperspectral_default(),
        }
    }

    /// Shape of the cube.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }
}

pub(crate) fn progress_bar(len: u64, message: String) -> Result<ProgressBar> {
    let progress_bar = ProgressBar::new(len);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta})")?
            .progress_chars("#>-"),
    );
    progress_bar.set_message(message);
    Ok(progress_bar)
}

/// Run `op` on a dedicated pool when a thread count is configured.
fn with_pool<R: Send>(options: &DecodeOptions, op: impl FnOnce() -> Result<R> + Send) -> Result<R> {
    match options.threads {
        Some(threads) if options.parallel => {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
            log::debug!("Decoding on a pool of {} threads", threads);
            pool.install(op)
        }
        _ => op(),
    }
}

/// Decode one `uint16` array into rescaled `f32` values.
pub fn decode_array(
    array: &ZarrArray<'_>,
    rescale: Rescale,
    options: &DecodeOptions,
) -> Result<ArrayD<f32>> {
    check_source_dtype(array)?;

    let progress = if options.progress {
        Some(progress_bar(
            array.num_chunks(),
            format!("Decoding {}", array.path()),
        )?)
    } else {
        None
    };

    log::debug!(
        "Decoding '{}' ({} chunks, parallel={})",
        array.path(),
        array.num_chunks(),
        options.parallel
    );

    let result = with_pool(options, || {
        array.decode_all::<u16, f32>(|raw| rescale.apply(raw), options.parallel, progress.as_ref())
    });

    if let Some(pb) = progress {
        if result.is_ok() {
            pb.finish_and_clear();
        } else {
            pb.abandon();
        }
    }
    result
}

/// Validate an opened store and resolve its arrays, logging warnings.
fn open_checked<'s>(
    store: &'s Store,
    path: &Path,
    group: &str,
) -> Result<(Group<'s>, ArrayNames)> {
    let (outcome, warnings) = validate_opened(store, path, group);
    for warning in &warnings {
        match warning.severity {
            WarningSeverity::Warning => log::warn!("{}", warning),
            WarningSeverity::Info => log::debug!("{}", warning),
        }
    }
    let names = outcome?;
    let group = Group::open(store, group)?;
    Ok((group, names))
}

fn check_wavenumbers(data_shape: &[usize], wavenumbers: &ArrayD<f64>) {
    if let Some(&bands) = data_shape.last() {
        if wavenumbers.len() != bands {
            log::warn!(
                "Wavenumber array has {} entries but the cube has {} bands",
                wavenumbers.len(),
                bands
            );
        }
    }
}

/// Validate the store at `path` and decode its hyperspectral group.
///
/// The data array must be `uint16`; it is rescaled with the mapping resolved
/// by [`Rescale::resolve`]. Validation failures surface as
/// [`crate::ZarrError::Validation`] before any chunk is read.
pub fn decompress_to_memory(path: &Path, options: &DecodeOptions) -> Result<DecompressedCube> {
    let store = Store::open(path)?;
    let (group, names) = open_checked(&store, path, &options.group)?;

    let data_array = group.array(&names.data)?;
    let rescale = Rescale::resolve(options.rescale, data_array.attributes());
    log::info!(
        "Decoding {:?}: shape={:?}, chunks={:?}, codecs={:?}, scale={}, offset={}",
        path,
        data_array.shape(),
        data_array.chunk_shape()?,
        data_array.codec_names(),
        rescale.scale,
        rescale.offset
    );

    let data = decode_array(&data_array, rescale, options)?;
    let wavenumbers = group.array(&names.wavenumber)?.retrieve_f64()?;
    check_wavenumbers(data.shape(), &wavenumbers);

    let mask = match &names.mask {
        Some(name) => Some(group.array(name)?.retrieve_mask()?),
        None => None,
    };

    log::info!("Decoded {} samples", data.len());
    Ok(DecompressedCube {
        data,
        wavenumbers,
        mask,
        rescale,
    })
}

/// Decode the store at `source` into a new store at `dest`.
///
/// Writes group `"0"` with a `float32` `qcl_data` array (same chunking as
/// the source), `wavenumbers`, and `mask` when present. Chunks are decoded
/// and written one at a time, so the cube is never held in memory. The store
/// is built next to `dest` and renamed into place once complete, so a
/// failure leaves nothing at `dest`.
pub fn decompress_to_storage(
    source: &Path,
    dest: &Path,
    options: &DecodeOptions,
    write: &WriteOptions,
) -> Result<ArrayNames> {
    let store = Store::open(source)?;
    let (group, names) = open_checked(&store, source, &options.group)?;
    let data_array = group.array(&names.data)?;
    check_source_dtype(&data_array)?;
    let rescale = Rescale::resolve(options.rescale, data_array.attributes());

    let shape = to_usize(data_array.shape(), data_array.path())?;
    let chunks = match to_usize(&data_array.chunk_shape()?, data_array.path())? {
        chunks if chunks.len() == shape.len() => chunks,
        _ => write.chunks_for(&shape),
    };
    let source_fill = data_array
        .fill_value()
        .as_u64()
        .and_then(|v| u16::try_from(v).ok())
        .unwrap_or_default();

    let wavenumbers = group.array(&names.wavenumber)?.retrieve_f64()?;
    let mask = match &names.mask {
        Some(name) => Some(group.array(name)?.retrieve_mask()?),
        None => None,
    };

    log::info!(
        "Decompressing {:?} -> {:?} ({} chunks)",
        source,
        dest,
        data_array.num_chunks()
    );

    write_store(dest, |out| {
        create_group(out, "", &Map::new())?;
        create_group(out, DEFAULT_GROUP, group.attributes())?;

        let mut attributes = Map::new();
        attributes.insert("source_array".to_string(), Value::from(names.data.clone()));
        attributes.insert("scale_factor_applied".to_string(), json!(rescale.scale));
        attributes.insert("add_offset_applied".to_string(), json!(rescale.offset));

        let data_path = format!("{}/{}", DEFAULT_GROUP, DECOMPRESSED_DATA_NAME);
        let writer = ArrayBuilder::new(shape.clone(), chunks.clone(), rescale.apply(source_fill))
            .compression(write.compression)
            .attributes(attributes)
            .create(out, &data_path)?;

        let progress = if options.progress {
            Some(progress_bar(data_array.num_chunks(), format!("Writing {}", data_path))?)
        } else {
            None
        };

        let indices = grid_indices(data_array.inner().chunk_grid_shape());
        let convert_chunk = |indices: &Vec<u64>| -> Result<()> {
            let raw = data_array.retrieve_chunk::<u16>(indices)?;
            let values = raw.mapv(|v| rescale.apply(v));
            writer.store_chunk(indices, &values.view())?;
            if let Some(pb) = &progress {
                pb.inc(1);
            }
            Ok(())
        };
        let result = with_pool(options, || {
            if options.parallel {
                indices.par_iter().try_for_each(convert_chunk)
            } else {
                indices.iter().try_for_each(convert_chunk)
            }
        });
        if let Some(pb) = &progress {
            if result.is_ok() {
                pb.finish_and_clear();
            } else {
                pb.abandon();
            }
        }
        result?;

        ArrayBuilder::new(
            wavenumbers.shape().to_vec(),
            write.chunks_for(wavenumbers.shape()),
            0.0f64,
        )
        .compression(write.compression)
        .create(out, &format!("{}/{}", DEFAULT_GROUP, DECOMPRESSED_WAVENUMBER_NAME))?
        .store_array(&wavenumbers.view())?;

        if let Some(mask) = &mask {
            ArrayBuilder::new(mask.shape().to_vec(), write.chunks_for(mask.shape()), false)
                .compression(write.compression)
                .create(out, &format!("{}/{}", DEFAULT_GROUP, MASK_ARRAY_NAME))?
                .store_array(&mask.view())?;
        }
        Ok(())
    })?;

    log::info!("Wrote decompressed store {:?}", dest);
    Ok(ArrayNames {
        data: DECOMPRESSED_DATA_NAME.to_string(),
        wavenumber: DECOMPRESSED_WAVENUMBER_NAME.to_string(),
        mask: mask.map(|_| MASK_ARRAY_NAME.to_string()),
    })
}
