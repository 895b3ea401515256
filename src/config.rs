//! Configuration file support.
//!
//! Settings for decoding and writing can be kept in a JSON file and passed to
//! the command line tool with `--config`. Library callers usually build
//! [`DecodeOptions`] and [`WriteOptions`] directly.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CUBE_CHUNKS, DEFAULT_GROUP, DEFAULT_ZSTD_LEVEL};
use crate::rescale::Rescale;

/// Log level setting for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Show only errors
    Error,
    /// Show errors and warnings
    Warn,
    /// Show errors, warnings, and info messages
    #[default]
    Info,
    /// Show debug-level logging
    Debug,
    /// Show all log messages including trace
    Trace,
}

impl LogLevel {
    /// Get the display name for this log level.
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Error => "Error",
            LogLevel::Warn => "Warn",
            LogLevel::Info => "Info",
            LogLevel::Debug => "Debug",
            LogLevel::Trace => "Trace",
        }
    }

    /// Get all log levels in order from least to most verbose.
    pub fn all() -> &'static [LogLevel] {
        &[
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ]
    }

    /// Step `steps` levels towards more verbose output, saturating at trace.
    pub fn raised(self, steps: u8) -> LogLevel {
        let all = Self::all();
        let current = all.iter().position(|&l| l == self).unwrap_or(2);
        all[(current + usize::from(steps)).min(all.len() - 1)]
    }

    /// Convert to log crate's LevelFilter.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Current configuration file format version.
/// Increment this when making breaking changes to the config format.
pub const CONFIG_VERSION: u32 = 1;

/// Options controlling how a hyperspectral store is decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeOptions {
    /// Group holding the hyperspectral arrays
    #[serde(default = "default_group")]
    pub group: String,

    /// Override for the stored-to-physical mapping
    #[serde(default)]
    pub rescale: Option<Rescale>,

    /// Decode rows of chunks in parallel
    #[serde(default = "default_parallel")]
    pub parallel: bool,

    /// Worker thread count; `None` uses the global rayon pool
    #[serde(default)]
    pub threads: Option<usize>,

    /// Draw a progress bar on stderr
    #[serde(default)]
    pub progress: bool,
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

fn default_parallel() -> bool {
    true
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            group: default_group(),
            rescale: None,
            parallel: default_parallel(),
            threads: None,
            progress: false,
        }
    }
}

impl DecodeOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the group name.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Force a rescale instead of reading it from the store.
    pub fn rescale(mut self, rescale: Rescale) -> Self {
        self.rescale = Some(rescale);
        self
    }

    /// Enable or disable parallel decoding.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Use a dedicated pool with this many threads.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Enable or disable the progress bar.
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}

/// Compression applied to chunks written by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "lowercase")]
pub enum Compression {
    /// Raw little endian bytes
    None,
    /// Zstandard
    Zstd {
        #[serde(default = "default_zstd_level")]
        level: i32,
    },
    /// Gzip
    Gzip {
        #[serde(default = "default_gzip_level")]
        level: i32,
    },
}

fn default_zstd_level() -> i32 {
    DEFAULT_ZSTD_LEVEL
}

fn default_gzip_level() -> i32 {
    6
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Zstd {
            level: default_zstd_level(),
        }
    }
}

/// Options controlling how arrays are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteOptions {
    /// Chunk compression
    #[serde(default)]
    pub compression: Compression,

    /// Chunk shape for new arrays; `None` picks one from the data shape
    #[serde(default)]
    pub chunks: Option<Vec<usize>>,

    /// Rescale used when quantizing; `None` uses the hyperspectral convention
    #[serde(default)]
    pub rescale: Option<Rescale>,
}

impl WriteOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk compression.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the chunk shape.
    pub fn chunks(mut self, chunks: Vec<usize>) -> Self {
        self.chunks = Some(chunks);
        self
    }

    /// Set the quantization rescale.
    pub fn rescale(mut self, rescale: Rescale) -> Self {
        self.rescale = Some(rescale);
        self
    }

    /// Chunk shape for an array of `shape`.
    ///
    /// Configured chunks of the wrong rank are ignored. Otherwise 3-D cubes
    /// get a spatial tiling with a band depth, and anything else is stored
    /// as a single chunk. Extents are clamped to the array shape.
    pub fn chunks_for(&self, shape: &[usize]) -> Vec<usize> {
        let base: Vec<usize> = match &self.chunks {
            Some(chunks) if chunks.len() == shape.len() => chunks.clone(),
            Some(chunks) => {
                log::warn!(
                    "Ignoring chunk shape {:?} for array of rank {}",
                    chunks,
                    shape.len()
                );
                shape.to_vec()
            }
            None if shape.len() == 3 => DEFAULT_CUBE_CHUNKS.to_vec(),
            None => shape.to_vec(),
        };
        base.iter()
            .zip(shape)
            .map(|(&c, &s)| c.min(s).max(1))
            .collect()
    }
}

/// Application configuration loaded by the command line tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Version of the configuration file format
    pub version: u32,

    /// Log verbosity level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Decoding settings
    #[serde(default)]
    pub decode: DecodeOptions,

    /// Writing settings
    #[serde(default)]
    pub write: WriteOptions,
}

impl AppConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            log_level: LogLevel::default(),
            decode: DecodeOptions::default(),
            write: WriteOptions::default(),
        }
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        // Validate version compatibility
        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }

        Ok(config)
    }

    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json()?)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration version is newer than supported
    #[error(
        "Configuration file version {file_version} is newer than supported version {supported_version}"
    )]
    VersionTooNew {
        file_version: u32,
        supported_version: u32,
    },

    /// I/O error when reading/writing config
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
