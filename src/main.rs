//! Command line front end for validating, inspecting and decoding
//! hyperspectral Zarr stores.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use ndarray::{ArrayD, IxDyn};
use ndarray_npy::{read_npy, write_npy};

use zarr_decompressor::{
    AppConfig, DecompressedCube, Group, LogLevel, NodeKind, Rescale, Store, WriteOptions,
    compress_to_storage, decompress_to_memory, decompress_to_storage, validate_store,
};

#[derive(Parser, Debug)]
#[command(name = "zarr-decompress", version)]
#[command(about = "Validate and decode uint16 hyperspectral Zarr stores")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (repeat for more)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that a store can be decoded
    Check {
        /// Store directory or .zip archive
        store: PathBuf,
        /// Group holding the hyperspectral arrays
        #[arg(long)]
        group: Option<String>,
    },

    /// Print the arrays of a group
    Info {
        /// Store directory or .zip archive
        store: PathBuf,
        /// Group to list
        #[arg(long)]
        group: Option<String>,
    },

    /// Decode a store to .npy files or to a float32 Zarr store
    Decompress {
        /// Store directory or .zip archive
        store: PathBuf,
        /// Group holding the hyperspectral arrays
        #[arg(long)]
        group: Option<String>,
        /// Write the cube to this .npy file
        #[arg(long, conflicts_with = "zarr", required_unless_present = "zarr")]
        npy: Option<PathBuf>,
        /// Write a float32 Zarr store to this directory
        #[arg(long)]
        zarr: Option<PathBuf>,
        /// Override the scale factor
        #[arg(long)]
        scale: Option<f64>,
        /// Override the offset (requires --scale)
        #[arg(long, requires = "scale")]
        offset: Option<f64>,
        /// Worker threads
        #[arg(long)]
        threads: Option<usize>,
        /// Decode on the calling thread only
        #[arg(long)]
        serial: bool,
        /// Show a progress bar
        #[arg(long)]
        progress: bool,
    },

    /// Quantize a float32 .npy cube into a uint16 Zarr store
    Compress {
        /// Input cube (.npy, float32)
        input: PathBuf,
        /// Output store directory
        #[arg(short, long)]
        output: PathBuf,
        /// Wavenumber axis (.npy, float64)
        #[arg(long)]
        wavenumbers: Option<PathBuf>,
        /// Mask (.npy, bool)
        #[arg(long)]
        mask: Option<PathBuf>,
        /// Chunk shape, comma separated
        #[arg(long, value_delimiter = ',')]
        chunks: Option<Vec<usize>>,
    },

    /// Write a configuration file
    Config {
        /// Where to write the file; the values come from --config or the defaults
        #[arg(long, value_name = "PATH")]
        init: PathBuf,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn sibling_npy(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("cube");
    path.with_file_name(format!("{}.{}.npy", stem, suffix))
}

fn check(store: &Path, group: &str) -> ExitCode {
    let report = validate_store(store, group);
    for warning in report.warnings() {
        println!("note: {}", warning);
    }
    match report.reason() {
        None => {
            if let Some(names) = report.names() {
                println!(
                    "valid: data='{}' wavenumbers='{}' mask={}",
                    names.data,
                    names.wavenumber,
                    names.mask.as_deref().unwrap_or("-")
                );
            }
            ExitCode::SUCCESS
        }
        Some(reason) => {
            println!("invalid: {}", reason);
            ExitCode::FAILURE
        }
    }
}

fn info(path: &Path, group: &str) -> CliResult<()> {
    let store = Store::open(path)?;
    let group = Group::open(&store, group)?;
    match group.zarr_format() {
        Some(format) => println!("group '{}' (zarr v{})", group.path(), format),
        None => println!("group '{}' (implicit)", group.path()),
    }
    for (key, value) in group.attributes() {
        println!("  @{} = {}", key, value);
    }
    for name in group.member_names()? {
        match group.member_kind(&name)? {
            Some(NodeKind::Array) => match group.array(&name) {
                Ok(array) => {
                    let chunks = array
                        .chunk_shape()
                        .map(|c| format!("{:?}", c))
                        .unwrap_or_else(|e| format!("<{}>", e));
                    println!(
                        "  {}: shape={:?} chunks={} dtype={} codecs={:?}",
                        name,
                        array.shape(),
                        chunks,
                        array.data_type(),
                        array.codec_names()
                    );
                }
                Err(e) => println!("  {}: <{}>", name, e),
            },
            Some(NodeKind::Group) => println!("  {}/ (group)", name),
            None => {}
        }
    }
    Ok(())
}

fn compress(
    input: &Path,
    output: &Path,
    wavenumbers: Option<&Path>,
    mask: Option<&Path>,
    options: &WriteOptions,
) -> CliResult<()> {
    let data: ArrayD<f32> = read_npy(input)?;
    let bands = data.shape().last().copied().unwrap_or(0);
    let wavenumbers: ArrayD<f64> = match wavenumbers {
        Some(path) => read_npy(path)?,
        None => {
            log::warn!("No wavenumbers given, using band indices");
            ArrayD::from_shape_fn(IxDyn(&[bands]), |idx| idx[0] as f64)
        }
    };
    let mask: Option<ArrayD<bool>> = match mask {
        Some(path) => Some(read_npy(path)?),
        None => None,
    };

    let cube = DecompressedCube::new(data, wavenumbers, mask);
    let rescale = compress_to_storage(&cube, output, options)?;
    println!(
        "wrote {:?} (scale={}, offset={})",
        output, rescale.scale, rescale.offset
    );
    Ok(())
}

fn run(cli: Cli, config: AppConfig) -> CliResult<ExitCode> {
    let group_or_default =
        |group: Option<String>| group.unwrap_or_else(|| config.decode.group.clone());

    match cli.command {
        Command::Check { store, group } => Ok(check(&store, &group_or_default(group))),
        Command::Info { store, group } => {
            info(&store, &group_or_default(group))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Decompress {
            store,
            group,
            npy,
            zarr,
            scale,
            offset,
            threads,
            serial,
            progress,
        } => {
            let mut options = config.decode.clone().group(group_or_default(group));
            if let Some(scale) = scale {
                options = options.rescale(Rescale::new(scale, offset.unwrap_or(0.0)));
            }
            if let Some(threads) = threads {
                options = options.threads(threads);
            }
            if serial {
                options = options.parallel(false);
            }
            if progress {
                options = options.progress(true);
            }

            if let Some(dest) = zarr {
                let names = decompress_to_storage(&store, &dest, &options, &config.write)?;
                println!("wrote {:?} ({} / {})", dest, names.data, names.wavenumber);
            } else if let Some(npy) = npy {
                let cube = decompress_to_memory(&store, &options)?;
                write_npy(&npy, &cube.data)?;
                write_npy(sibling_npy(&npy, "wavenumbers"), &cube.wavenumbers)?;
                if let Some(mask) = &cube.mask {
                    write_npy(sibling_npy(&npy, "mask"), mask)?;
                }
                println!("wrote {:?} with shape {:?}", npy, cube.shape());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Compress {
            input,
            output,
            wavenumbers,
            mask,
            chunks,
        } => {
            let mut options = config.write.clone();
            if let Some(chunks) = chunks {
                options = options.chunks(chunks);
            }
            compress(&input, &output, wavenumbers.as_deref(), mask.as_deref(), &options)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { init } => {
            config.save(&init)?;
            println!("wrote {:?}", init);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match AppConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load configuration {:?}: {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => AppConfig::default(),
    };

    let level = if cli.quiet {
        LogLevel::Error
    } else {
        config.log_level.raised(cli.verbose)
    };
    env_logger::Builder::new()
        .filter_level(level.to_level_filter())
        .parse_default_env()
        .init();
    log::debug!("Log level {}", level.name());

    match run(cli, config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
