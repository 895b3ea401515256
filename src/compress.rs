//! Quantizing `f32` cubes into `uint16` hyperspectral stores.

use std::path::Path;

use ndarray::ArrayD;
use serde_json::{Map, json};

use crate::config::WriteOptions;
use crate::constants::{
    COMPRESSED_DATA_NAME, COMPRESSED_WAVENUMBER_NAME, DEFAULT_GROUP, MASK_ARRAY_NAME,
    OFFSET_ATTRIBUTE, SCALE_ATTRIBUTE,
};
use crate::decode::DecompressedCube;
use crate::error::{Result, ZarrError};
use crate::rescale::Rescale;
use crate::store::write_store;
use crate::writer::{ArrayBuilder, create_group};

/// Write `cube` as a `uint16` hyperspectral store at `dest`.
///
/// Samples are quantized with the rescale from `options`, falling back to
/// the one the cube was decoded with. The mapping is stored as
/// `scale_factor` / `add_offset` attributes so the store decodes back to
/// within half a quantization step. As with decoding to storage, the store
/// only appears at `dest` once fully written. Returns the rescale that was
/// used.
pub fn compress_to_storage(
    cube: &DecompressedCube,
    dest: &Path,
    options: &WriteOptions,
) -> Result<Rescale> {
    if let Some(&bands) = cube.data.shape().last() {
        if cube.wavenumbers.len() != bands {
            return Err(ZarrError::ShapeMismatch {
                expected: vec![bands],
                found: cube.wavenumbers.shape().to_vec(),
            });
        }
    }

    let rescale = options.rescale.unwrap_or(cube.rescale);
    log::info!(
        "Compressing cube {:?} to {:?} (scale={}, offset={})",
        cube.shape(),
        dest,
        rescale.scale,
        rescale.offset
    );

    let clipped = cube
        .data
        .iter()
        .filter(|&&v| {
            let raw = (f64::from(v) - rescale.offset) / rescale.scale;
            !(0.0..=f64::from(u16::MAX)).contains(&raw.round())
        })
        .count();
    if clipped > 0 {
        log::warn!("{} samples fall outside the representable range and are clipped", clipped);
    }
    let quantized: ArrayD<u16> = cube.data.mapv(|v| rescale.quantize(v));

    write_store(dest, |store| {
        create_group(store, "", &Map::new())?;
        create_group(store, DEFAULT_GROUP, &Map::new())?;

        ArrayBuilder::new(
            quantized.shape().to_vec(),
            options.chunks_for(quantized.shape()),
            0u16,
        )
        .compression(options.compression)
        .attribute(SCALE_ATTRIBUTE, json!(rescale.scale))
        .attribute(OFFSET_ATTRIBUTE, json!(rescale.offset))
        .create(store, &format!("{}/{}", DEFAULT_GROUP, COMPRESSED_DATA_NAME))?
        .store_array(&quantized.view())?;

        ArrayBuilder::new(
            cube.wavenumbers.shape().to_vec(),
            options.chunks_for(cube.wavenumbers.shape()),
            0.0f64,
        )
        .compression(options.compression)
        .create(store, &format!("{}/{}", DEFAULT_GROUP, COMPRESSED_WAVENUMBER_NAME))?
        .store_array(&cube.wavenumbers.view())?;

        if let Some(mask) = &cube.mask {
            ArrayBuilder::new(mask.shape().to_vec(), options.chunks_for(mask.shape()), false)
                .compression(options.compression)
                .create(store, &format!("{}/{}", DEFAULT_GROUP, MASK_ARRAY_NAME))?
                .store_array(&mask.view())?;
        }
        Ok(())
    })?;

    log::info!("Wrote compressed store {:?}", dest);
    Ok(rescale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Compression, DecodeOptions};
    use crate::decode::decompress_to_memory;
    use crate::validate::validate_store;
    use ndarray::IxDyn;

    fn smooth_cube(shape: &[usize]) -> ArrayD<f32> {
        ArrayD::from_shape_fn(IxDyn(shape), |idx| {
            let x = idx[0] as f32 * 0.37 + idx[1] as f32 * 0.11;
            let band = idx[2] as f32;
            (x.sin() + band * 0.05).abs() * 1.5
        })
    }

    #[test]
    fn test_round_trip_within_precision() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("cube.zarr");
        let data = smooth_cube(&[9, 7, 6]);
        let wavenumbers = ArrayD::from_shape_fn(IxDyn(&[6]), |idx| 1000.0 + idx[0] as f64);
        let mask = ArrayD::from_shape_fn(IxDyn(&[9, 7]), |idx| idx[0] > idx[1]);
        let cube = DecompressedCube::new(data.clone(), wavenumbers.clone(), Some(mask.clone()));

        let options = WriteOptions::new().chunks(vec![4, 4, 3]);
        let rescale = compress_to_storage(&cube, &dest, &options).unwrap();
        assert_eq!(rescale, Rescale::hyperspectral_default());

        let report = validate_store(&dest, "0");
        assert!(report.is_valid(), "{:?}", report.reason());
        assert_eq!(report.names().unwrap().data, "hyperspec");

        let decoded = decompress_to_memory(&dest, &DecodeOptions::new()).unwrap();
        assert_eq!(decoded.rescale, rescale);
        assert_eq!(decoded.shape(), data.shape());
        let tolerance = rescale.precision() + 1e-6;
        for (a, b) in decoded.data.iter().zip(data.iter()) {
            assert!((f64::from(*a) - f64::from(*b)).abs() <= tolerance, "{} vs {}", a, b);
        }
        assert_eq!(decoded.wavenumbers, wavenumbers);
        assert_eq!(decoded.mask, Some(mask));
    }

    #[test]
    fn test_round_trip_custom_rescale_uncompressed() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("cube.zarr");
        let data = smooth_cube(&[3, 3, 2]);
        let wavenumbers = ArrayD::from_shape_fn(IxDyn(&[2]), |idx| idx[0] as f64);
        let cube = DecompressedCube::new(data.clone(), wavenumbers, None);

        let options = WriteOptions::new()
            .compression(Compression::None)
            .rescale(Rescale::new(0.001, 0.0));
        compress_to_storage(&cube, &dest, &options).unwrap();

        let decoded = decompress_to_memory(&dest, &DecodeOptions::new()).unwrap();
        assert_eq!(decoded.rescale, Rescale::new(0.001, 0.0));
        assert!(decoded.mask.is_none());
        for (a, b) in decoded.data.iter().zip(data.iter()) {
            assert!((a - b).abs() <= 0.0005 + 1e-6);
        }
    }

    #[test]
    fn test_wavenumber_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let cube = DecompressedCube::new(
            smooth_cube(&[2, 2, 4]),
            ArrayD::from_elem(IxDyn(&[3]), 1.0),
            None,
        );
        assert!(matches!(
            compress_to_storage(&cube, &dir.path().join("x.zarr"), &WriteOptions::new()),
            Err(ZarrError::ShapeMismatch { .. })
        ));
        assert!(!dir.path().join("x.zarr").exists());
    }

    #[test]
    fn test_compress_to_zip_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cube = DecompressedCube::new(
            smooth_cube(&[2, 2, 2]),
            ArrayD::from_elem(IxDyn(&[2]), 1.0),
            None,
        );
        assert!(matches!(
            compress_to_storage(&cube, &dir.path().join("x.zip"), &WriteOptions::new()),
            Err(ZarrError::ReadOnly(_))
        ));
    }
}
