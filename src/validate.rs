//! Pre-decompression checks for hyperspectral stores.
//!
//! Validation only reads metadata: it confirms the store and group exist,
//! resolves the data, wavenumber and mask arrays by their accepted names, and
//! checks that the data array holds `uint16` samples. No chunk is decoded.
//!
//! ```rust,ignore
//! let report = validate_store(Path::new("scan.zarr"), "0");
//! if !report.is_valid() {
//!     eprintln!("{}", report.reason().unwrap());
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use crate::array::{Sample, ZarrArray};
use crate::constants::{DATA_ARRAY_NAMES, MASK_ARRAY_NAME, WAVENUMBER_ARRAY_NAMES};
use crate::error::{ValidationError, ZarrError};
use crate::group::Group;
use crate::store::Store;

/// Resolved array names inside the hyperspectral group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayNames {
    /// The `uint16` cube
    pub data: String,
    /// Wavenumber axis
    pub wavenumber: String,
    /// Optional mask
    pub mask: Option<String>,
}

/// Severity of a validation warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    /// Informational, nothing to act on
    Info,
    /// Decoding will work but the result may not be what was expected
    Warning,
}

/// Non-fatal finding reported alongside a validation result.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// Array the warning relates to (if applicable)
    pub array: Option<String>,
    /// Human-readable message
    pub message: String,
    /// Severity level
    pub severity: WarningSeverity,
}

impl ValidationWarning {
    /// Create an info-level warning.
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            array: None,
            message: message.into(),
            severity: WarningSeverity::Info,
        }
    }

    /// Create a warning-level warning.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            array: None,
            message: message.into(),
            severity: WarningSeverity::Warning,
        }
    }

    /// Set the array this warning relates to.
    pub fn with_array(mut self, array: impl Into<String>) -> Self {
        self.array = Some(array.into());
        self
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.array {
            Some(array) => write!(f, "{}: {}", array, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Outcome of [`validate_store`].
#[derive(Debug)]
pub struct ValidationReport {
    store: PathBuf,
    group: String,
    outcome: Result<ArrayNames, ValidationError>,
    warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    /// Whether the store can be decoded.
    pub fn is_valid(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Why the store is invalid.
    pub fn reason(&self) -> Option<&ValidationError> {
        self.outcome.as_ref().err()
    }

    /// Resolved array names of a valid store.
    pub fn names(&self) -> Option<&ArrayNames> {
        self.outcome.as_ref().ok()
    }

    /// Non-fatal findings.
    pub fn warnings(&self) -> &[ValidationWarning] {
        &self.warnings
    }

    /// Path of the store that was checked, as given by the caller.
    pub fn store(&self) -> &Path {
        &self.store
    }

    /// Name of the group that was checked.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Turn the report into a plain result.
    pub fn into_result(self) -> Result<ArrayNames, ValidationError> {
        self.outcome
    }
}

/// Check that the array holds `uint16` samples.
pub fn check_source_dtype(array: &ZarrArray<'_>) -> Result<(), ValidationError> {
    if array.data_type() == u16::DATA_TYPE {
        Ok(())
    } else {
        Err(ValidationError::DtypeMismatch {
            found: array.data_type().to_string(),
        })
    }
}

fn metadata_error(e: ZarrError) -> ValidationError {
    match e {
        ZarrError::Validation(inner) => inner,
        other => ValidationError::Metadata(other.to_string()),
    }
}

fn array_error(name: &str, e: ZarrError) -> ValidationError {
    ValidationError::Metadata(format!("array '{}': {}", name, e))
}

/// Resolve the data, wavenumber and mask arrays of a group and check the
/// data dtype. The first existing name from each alias list wins.
pub fn locate_arrays(group: &Group<'_>) -> Result<ArrayNames, ValidationError> {
    let mut data = None;
    for &name in DATA_ARRAY_NAMES {
        if group.has_array(name).map_err(metadata_error)? {
            log::debug!("Found data array '{}' in group '{}'", name, group.path());
            data = Some(name);
            break;
        }
    }
    let Some(data) = data else {
        return Err(ValidationError::MissingDataArray {
            searched: DATA_ARRAY_NAMES.to_vec(),
        });
    };
    let data_array = group.array(data).map_err(|e| array_error(data, e))?;
    check_source_dtype(&data_array)?;

    let mut wavenumber = None;
    for &name in WAVENUMBER_ARRAY_NAMES {
        if group.has_array(name).map_err(metadata_error)? {
            log::debug!("Found wavenumber array '{}' in group '{}'", name, group.path());
            wavenumber = Some(name);
            break;
        }
    }
    let Some(wavenumber) = wavenumber else {
        return Err(ValidationError::MissingWavenumberArray {
            searched: WAVENUMBER_ARRAY_NAMES.to_vec(),
        });
    };

    let mask = group
        .has_array(MASK_ARRAY_NAME)
        .map_err(metadata_error)?
        .then(|| MASK_ARRAY_NAME.to_string());

    Ok(ArrayNames {
        data: data.to_string(),
        wavenumber: wavenumber.to_string(),
        mask,
    })
}

/// Run all checks against an opened store.
///
/// Also confirms that every array opens with supported codecs and has a
/// chunk shape that fits in memory arithmetic, and collects warnings about
/// absent chunks, which decode to the fill value.
pub(crate) fn validate_opened(
    store: &Store,
    store_path: &Path,
    group: &str,
) -> (Result<ArrayNames, ValidationError>, Vec<ValidationWarning>) {
    let mut warnings = Vec::new();

    let found = match Group::find(store, group) {
        Ok(found) => found,
        Err(e) => return (Err(metadata_error(e)), warnings),
    };
    let Some(group_node) = found else {
        return (
            Err(ValidationError::GroupNotFound {
                group: group.to_string(),
                path: store_path.to_path_buf(),
            }),
            warnings,
        );
    };

    let names = match locate_arrays(&group_node) {
        Ok(names) => names,
        Err(e) => return (Err(e), warnings),
    };

    if names.mask.is_none() {
        warnings.push(ValidationWarning::info("no mask array present"));
    }

    let arrays = [Some(&names.data), Some(&names.wavenumber), names.mask.as_ref()];
    for name in arrays.into_iter().flatten() {
        let array: ZarrArray<'_> = match group_node.array(name) {
            Ok(array) => array,
            Err(e) => return (Err(array_error(name, e)), warnings),
        };
        if let Err(e) = array.check_chunk_size() {
            return (Err(array_error(name, e)), warnings);
        }
        match array.missing_chunks() {
            Ok(missing) if !missing.is_empty() => {
                warnings.push(
                    ValidationWarning::warning(format!(
                        "{} of {} chunks are absent and decode to the fill value",
                        missing.len(),
                        array.num_chunks()
                    ))
                    .with_array(array.path()),
                );
            }
            Ok(_) => {}
            Err(e) => return (Err(metadata_error(e)), warnings),
        }
    }

    (Ok(names), warnings)
}

/// Check whether the store at `path` holds a decodable hyperspectral group.
///
/// Never fails: problems are reported through [`ValidationReport::reason`].
pub fn validate_store(path: &Path, group: &str) -> ValidationReport {
    log::info!("Validating {:?} (group '{}')", path, group);

    let (outcome, warnings) = match Store::open(path) {
        Ok(store) => validate_opened(&store, path, group),
        Err(e) => (Err(metadata_error(e)), Vec::new()),
    };

    match &outcome {
        Ok(names) => log::info!(
            "Store is valid: data='{}', wavenumbers='{}', mask={:?}",
            names.data,
            names.wavenumber,
            names.mask
        ),
        Err(e) => log::warn!("Store is not valid: {}", e),
    }
    for warning in &warnings {
        log::debug!("Validation note: {}", warning);
    }

    ValidationReport {
        store: path.to_path_buf(),
        group: group.to_string(),
        outcome,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store::{
        CubeFixture, sample_cube, v2_zarray, write_json, write_v2_array, write_v2_metadata,
    };
    use ndarray::{ArrayD, IxDyn};
    use serde_json::json;

    fn zlib() -> serde_json::Value {
        json!({"id": "zlib", "level": 1})
    }

    #[test]
    fn test_valid_store() {
        let dir = tempfile::tempdir().unwrap();
        CubeFixture::new(&[10, 10, 5]).write(dir.path());

        let report = validate_store(dir.path(), "0");
        assert!(report.is_valid(), "{:?}", report.reason());
        assert_eq!(report.store(), dir.path());
        assert_eq!(report.group(), "0");
        let names = report.names().unwrap();
        assert_eq!(names.data, "hyperspec");
        assert_eq!(names.wavenumber, "wvnm");
        assert_eq!(names.mask.as_deref(), Some("mask"));
        assert!(report.warnings().is_empty());
    }

    #[test]
    fn test_valid_v3_store() {
        let dir = tempfile::tempdir().unwrap();
        CubeFixture::new(&[6, 6, 4]).chunks(&[3, 3, 4]).zarr_v3().write(dir.path());

        let report = validate_store(dir.path(), "0");
        assert!(report.is_valid(), "{:?}", report.reason());
        assert!(report.warnings().is_empty());
    }

    #[test]
    fn test_missing_store_and_group() {
        let dir = tempfile::tempdir().unwrap();
        let report = validate_store(&dir.path().join("nope.zarr"), "0");
        assert!(matches!(report.reason(), Some(ValidationError::StoreNotFound { .. })));

        CubeFixture::new(&[4, 4, 2]).write(dir.path());
        let report = validate_store(dir.path(), "7");
        assert!(matches!(
            report.reason(),
            Some(ValidationError::GroupNotFound { group, .. }) if group == "7"
        ));
    }

    #[test]
    fn test_dtype_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_json(dir.path(), "0/.zgroup", &json!({"zarr_format": 2}));
        let floats = ArrayD::from_elem(IxDyn(&[4, 4, 2]), 0.5f32);
        write_v2_array(dir.path(), "0/hyperspec", &floats, &[2, 2, 2], zlib());
        let wavenumbers = ArrayD::from_elem(IxDyn(&[2]), 1000.0f64);
        write_v2_array(dir.path(), "0/wvnm", &wavenumbers, &[2], zlib());

        let report = validate_store(dir.path(), "0");
        assert!(!report.is_valid());
        assert!(matches!(
            report.reason(),
            Some(ValidationError::DtypeMismatch { found }) if found == "float32"
        ));
    }

    #[test]
    fn test_alias_order() {
        let dir = tempfile::tempdir().unwrap();
        write_json(dir.path(), "0/.zgroup", &json!({"zarr_format": 2}));
        let cube = sample_cube(&[2, 2, 3]);
        // Both "data" and "qcl_data" exist; "qcl_data" comes first in the alias list
        write_v2_array(dir.path(), "0/data", &cube, &[2, 2, 3], zlib());
        write_v2_array(dir.path(), "0/qcl_data", &cube, &[2, 2, 3], zlib());
        let wavenumbers = ArrayD::from_elem(IxDyn(&[3]), 1.0f64);
        write_v2_array(dir.path(), "0/wav", &wavenumbers, &[3], zlib());
        write_v2_array(dir.path(), "0/wavenumbers", &wavenumbers, &[3], zlib());

        let store = Store::open(dir.path()).unwrap();
        let group = Group::open(&store, "0").unwrap();
        let names = locate_arrays(&group).unwrap();
        assert_eq!(names.data, "qcl_data");
        assert_eq!(names.wavenumber, "wavenumbers");
        assert_eq!(names.mask, None);
    }

    #[test]
    fn test_missing_arrays() {
        let dir = tempfile::tempdir().unwrap();
        write_json(dir.path(), "0/.zgroup", &json!({"zarr_format": 2}));
        let store = Store::open(dir.path()).unwrap();
        let group = Group::open(&store, "0").unwrap();
        assert!(matches!(
            locate_arrays(&group),
            Err(ValidationError::MissingDataArray { .. })
        ));

        let cube = sample_cube(&[2, 2, 2]);
        write_v2_array(dir.path(), "0/hyperspectral", &cube, &[2, 2, 2], zlib());
        assert!(matches!(
            locate_arrays(&group),
            Err(ValidationError::MissingWavenumberArray { searched }) if searched.len() == 4
        ));
    }

    #[test]
    fn test_missing_chunks_are_warnings() {
        let dir = tempfile::tempdir().unwrap();
        CubeFixture::new(&[4, 4, 2]).chunks(&[2, 2, 2]).write(dir.path());
        std::fs::remove_file(dir.path().join("0/hyperspec/1.1.0")).unwrap();

        let report = validate_store(dir.path(), "0");
        assert!(report.is_valid());
        assert_eq!(report.warnings().len(), 1);
        assert_eq!(report.warnings()[0].severity, WarningSeverity::Warning);
        assert_eq!(report.warnings()[0].array.as_deref(), Some("0/hyperspec"));
    }

    #[test]
    fn test_unsupported_codec_fails() {
        let dir = tempfile::tempdir().unwrap();
        CubeFixture::new(&[2, 2, 2]).write(dir.path());
        let zarray = v2_zarray::<u16>(&[2, 2, 2], &[2, 2, 2], json!({"id": "lzma"}));
        write_v2_metadata(dir.path(), "0/hyperspec", &zarray);

        let report = validate_store(dir.path(), "0");
        assert!(matches!(
            report.reason(),
            Some(ValidationError::Metadata(msg)) if msg.contains("hyperspec")
        ));
    }

    #[test]
    fn test_oversized_chunk_shape_fails() {
        let dir = tempfile::tempdir().unwrap();
        CubeFixture::new(&[2, 2, 2]).write(dir.path());
        let zarray = v2_zarray::<u16>(&[2, 2, 2], &[4294967296, 4294967296, 2], json!(null));
        write_v2_metadata(dir.path(), "0/hyperspec", &zarray);

        let report = validate_store(dir.path(), "0");
        assert!(!report.is_valid());
        assert!(matches!(
            report.reason(),
            Some(ValidationError::Metadata(msg)) if msg.contains("chunk shape too large")
        ));
    }
}
