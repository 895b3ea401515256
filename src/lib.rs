//! zarr-decompressor - validate and decode hyperspectral Zarr stores
//!
//! Hyperspectral cubes are stored as quantized `uint16` Zarr arrays. This
//! crate checks that a store has the expected layout and decodes it into an
//! in-memory `f32` [`ndarray::ArrayD`]. Arrays are opened and decoded with
//! [`zarrs`], so Zarr v2 and v3 metadata and the usual chunk codecs (blosc,
//! zstd, gzip, zlib) are supported, from a directory or a `.zip` archive.
//!
//! ```rust,ignore
//! use std::path::Path;
//! use zarr_decompressor::{DecodeOptions, decompress_to_memory, validate_store};
//!
//! let report = validate_store(Path::new("scan.zarr"), "0");
//! if report.is_valid() {
//!     let cube = decompress_to_memory(Path::new("scan.zarr"), &DecodeOptions::new())?;
//!     println!("{:?}", cube.data.shape());
//! }
//! ```

pub mod array;
pub mod compress;
pub mod config;
pub mod constants;
pub mod decode;
pub mod error;
pub mod group;
pub mod rescale;
pub mod store;
pub mod validate;
pub mod writer;

#[cfg(test)]
mod test_store;

pub use array::{Sample, ZarrArray};
pub use compress::compress_to_storage;
pub use config::{AppConfig, Compression, DecodeOptions, LogLevel, WriteOptions};
pub use decode::{DecompressedCube, decode_array, decompress_to_memory, decompress_to_storage};
pub use error::{Result, ValidationError, ZarrError};
pub use group::Group;
pub use rescale::Rescale;
pub use store::{NodeKind, Store, is_zip_path, write_store};
pub use validate::{ArrayNames, ValidationReport, check_source_dtype, locate_arrays, validate_store};
pub use writer::{ArrayBuilder, ArrayWriter, create_group};
