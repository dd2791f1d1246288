//! hgt2png - converts SRTM elevation rasters into PNG heightmaps
//!
//! Optionally upsamples each tile with terrain-aware fractal detail and
//! writes a vegetation density mask and a scaling sidecar next to it.

mod batch;
mod decoder;
mod detail;
mod error;
mod noise;
mod options;
mod output;
mod raster;
mod terrain;
mod tone;
mod vegetation;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use batch::BatchCoordinator;
use options::{expand_inputs, Biome, CurveType, MetadataFormat, ProgramOptions};
use output::FileSink;

#[derive(Parser, Debug)]
#[command(name = "hgt2png")]
#[command(about = "Convert SRTM HGT elevation rasters to PNG heightmaps")]
struct Args {
    /// Upsampling factor for procedural detail (1-10)
    #[arg(short, long, default_value_t = 3)]
    scale_factor: usize,

    /// Detail amplitude in meters (0-100)
    #[arg(short = 'i', long, default_value_t = 15.0)]
    detail_intensity: f32,

    /// Seed for the detail noise
    #[arg(short = 'r', long, default_value_t = 12345, allow_negative_numbers = true)]
    noise_seed: i32,

    /// Worker threads (1-16)
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Keep the original resolution, no synthetic detail
    #[arg(short, long)]
    disable_detail: bool,

    /// Only print warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Write 16-bit grayscale instead of 8-bit RGB
    #[arg(long = "16bit")]
    sixteen_bit: bool,

    /// Make NoData pixels transparent
    #[arg(long)]
    alpha_nodata: bool,

    /// Gamma correction (0.1-10.0)
    #[arg(short, long, default_value_t = 1.0)]
    gamma: f32,

    /// Elevation mapping curve
    #[arg(short, long, value_enum, default_value_t = CurveType::Linear)]
    curve: CurveType,

    /// Elevation mapped to black (default: lowest in the batch)
    #[arg(short = 'm', long, allow_negative_numbers = true)]
    min_height: Option<i32>,

    /// Elevation mapped to white (default: highest in the batch)
    #[arg(short = 'M', long, allow_negative_numbers = true)]
    max_height: Option<i32>,

    /// Sidecar with scaling facts
    #[arg(short = 'x', long, value_enum, default_value_t = MetadataFormat::None)]
    metadata: MetadataFormat,

    /// Also write a vegetation density mask
    #[arg(long)]
    vegetation_mask: bool,

    /// Biome used for the vegetation mask
    #[arg(long, value_enum, default_value_t = Biome::Alpine)]
    biome: Biome,

    /// Directory for the generated files
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// HGT files, or text files listing one HGT file per line
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

impl From<Args> for ProgramOptions {
    fn from(args: Args) -> Self {
        ProgramOptions {
            scale_factor: args.scale_factor,
            detail_intensity: args.detail_intensity,
            noise_seed: args.noise_seed,
            enable_detail: !args.disable_detail,
            threads: args.threads,
            quiet: args.quiet,
            sixteen_bit: args.sixteen_bit,
            alpha_nodata: args.alpha_nodata,
            gamma: args.gamma,
            curve: args.curve,
            min_height: args.min_height,
            max_height: args.max_height,
            metadata: args.metadata,
            vegetation_mask: args.vegetation_mask,
            biome: args.biome,
            output_dir: args.output_dir,
        }
    }
}

fn main() -> Result<()> {
    let mut args = Args::parse();
    let inputs = std::mem::take(&mut args.inputs);
    let options = ProgramOptions::from(args);

    let level = if options.quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    options.validate()?;
    let files = expand_inputs(&inputs)?;
    if files.is_empty() {
        bail!("no input files");
    }

    info!(
        files = files.len(),
        detail = options.enable_detail,
        scale = options.effective_scale(),
        format = ?options.pixel_format(),
        "hgt2png starting"
    );

    let sink = FileSink::new(&options.output_dir);
    let coordinator = BatchCoordinator::new(options, sink);
    info!(output_dir = %coordinator.sink().output_dir().display(), "writing output");
    let report = coordinator.run(&files);

    if !report.is_success() {
        bail!(
            "{} of {} files failed{}",
            files.len() - report.succeeded(),
            files.len(),
            if report.aborted {
                " (batch aborted)"
            } else {
                ""
            }
        );
    }

    let written: usize = report.outcomes.iter().map(|outcome| outcome.outputs.len()).sum();
    info!(files = report.files_processed, written, range = ?report.global_range, "done");
    Ok(())
}
