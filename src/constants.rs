//! Global constants for the hyperspectral store layout

/// Group holding the hyperspectral arrays
pub const DEFAULT_GROUP: &str = "0";

/// Accepted names for the data cube, in lookup order
pub const DATA_ARRAY_NAMES: &[&str] = &["hyperspec", "qcl_data", "data", "hyperspectral"];

/// Accepted names for the wavenumber axis, in lookup order
pub const WAVENUMBER_ARRAY_NAMES: &[&str] = &["wvnm", "wavenumber", "wavenumbers", "wav"];

/// Name of the optional mask array
pub const MASK_ARRAY_NAME: &str = "mask";

/// Data array name written by the compressor
pub const COMPRESSED_DATA_NAME: &str = "hyperspec";

/// Wavenumber array name written by the compressor
pub const COMPRESSED_WAVENUMBER_NAME: &str = "wvnm";

/// Data array name written when decompressing to a store
pub const DECOMPRESSED_DATA_NAME: &str = "qcl_data";

/// Wavenumber array name written when decompressing to a store
pub const DECOMPRESSED_WAVENUMBER_NAME: &str = "wavenumbers";

/// Absorbance offset of the quantization convention
pub const OFFSET: f64 = 0.5535;

/// Quantization steps per absorbance unit
pub const FACTOR: f64 = 65535.0 / 45535.0 * 10000.0;

/// Attribute holding the multiplicative rescale factor
pub const SCALE_ATTRIBUTE: &str = "scale_factor";

/// Attribute holding the additive rescale offset
pub const OFFSET_ATTRIBUTE: &str = "add_offset";

/// Default zstd level used by the writer
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Default chunk shape used by the writer for 3-D cubes
pub const DEFAULT_CUBE_CHUNKS: [usize; 3] = [64, 64, 16];

/// Zarr v3 node metadata document
pub const ZARR_JSON: &str = "zarr.json";

/// Zarr v2 array metadata document
pub const ZARRAY: &str = ".zarray";

/// Zarr v2 group metadata document
pub const ZGROUP: &str = ".zgroup";

/// Zarr v2 attributes document
pub const ZATTRS: &str = ".zattrs";
