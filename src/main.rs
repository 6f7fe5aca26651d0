//! Tile Stitcher - assembles 3D volumes from overlapping slice stacks.
//!
//! This binary parses the command line, sets up logging and runs one
//! stitching mode.

use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tile_stitcher::{
    config::{AxisConfig, Cli, Command, GridConfig, PlanarConfig},
    io::{discover_tiles, read_slice, write_slice, BitDepth, DirectorySink, TileSource},
    registration::{stitch_planar_pair, Deadline, PlanarLayout},
    report::{write_report, Diagnostic},
    stitch::{AxisStitcher, GridCompositor},
    transform::Translation,
    RegistrationError, StitchError,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.into_command() {
        Command::Axis(config) => {
            init_logging(config.common.verbose);
            run_axis(config).await
        }
        Command::Grid(config) => {
            init_logging(config.common.verbose);
            run_grid(config).await
        }
        Command::Planar(config) => {
            init_logging(config.common.verbose);
            run_planar(config).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tile_stitcher=debug"
    } else {
        "tile_stitcher=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Print `options` as JSON when requested.
fn dump_options<T: Serialize>(requested: bool, options: &T) -> Result<(), StitchError> {
    if requested {
        println!("{}", serde_json::to_string_pretty(options)?);
    }
    Ok(())
}

fn save_report<T: Serialize>(path: Option<&Path>, report: &T) -> Result<(), StitchError> {
    match path {
        Some(path) => write_report(report, path),
        None => Ok(()),
    }
}

// =============================================================================
// Axis Command
// =============================================================================

async fn run_axis(config: AxisConfig) -> Result<(), StitchError> {
    config.validate()?;
    let options = config.options();
    dump_options(config.common.options_json, &options)?;

    let mut source = discover_tiles(&config.input_dir, &config.tile_prefix)?;
    if options.flip {
        info!("Reading slices in reverse order");
        source = source.reversed();
    }

    let mut sink = DirectorySink::create(
        &config.output.output_dir,
        config.output.output_prefix.clone(),
        config.output.format,
        config.output.bit_depth()?,
    )?;

    info!("Configuration:");
    info!("  Tiles: {}", source.tile_count());
    info!("  Delta z: {} slices", options.delta_z);
    info!("  Mode: {:?}", options.mode);
    info!("  Output: {}", sink.dir().display());

    let mut stitcher = AxisStitcher::new(options)?;
    let report = stitcher.stitch(Arc::new(source), &mut sink).await?;

    info!(
        "Wrote {} slices ({} diagnostics)",
        report.emitted.len(),
        report.diagnostics.len()
    );
    save_report(config.common.report.as_deref(), &report)
}

// =============================================================================
// Grid Command
// =============================================================================

async fn run_grid(config: GridConfig) -> Result<(), StitchError> {
    config.validate()?;
    let options = config.options();
    dump_options(config.common.options_json, &options)?;

    let source = discover_tiles(&config.input_dir, &config.tile_prefix)?;
    let mut sink = DirectorySink::create(
        &config.output.output_dir,
        config.output.output_prefix.clone(),
        config.output.format,
        config.output.bit_depth()?,
    )?;

    info!("Configuration:");
    info!("  Grid: {} x {} from {}", options.rows, options.columns, options.corner);
    info!(
        "  Overlap: {} x {} px",
        options.overlap_height, options.overlap_width
    );
    info!("  Workers: {}", options.registration.workers);
    info!("  Output: {}", sink.dir().display());

    let compositor = GridCompositor::new(options, Arc::new(config.solver()))?;
    let report = compositor.run(Arc::new(source), &mut sink).await?;

    info!(
        "Wrote {} slices of {} x {} ({} diagnostics)",
        report.canvas.0,
        report.canvas.1,
        report.canvas.2,
        report.diagnostics.len()
    );
    save_report(config.common.report.as_deref(), &report)
}

// =============================================================================
// Planar Command
// =============================================================================

#[derive(Debug, Serialize)]
struct PlanarReport {
    layout: PlanarLayout,
    placement: Translation,
    residual: Translation,
    dimensions: (usize, usize),
    diagnostics: Vec<Diagnostic>,
}

async fn run_planar(config: PlanarConfig) -> Result<(), StitchError> {
    config.validate()?;
    let options = config.options();
    dump_options(config.common.options_json, &options)?;
    let bit_depth = BitDepth::try_from(config.bit_depth)?;

    let reference = read_slice(&config.reference)?;
    let moving = read_slice(&config.moving)?;
    info!(
        "Planar stitch of {} {:?} and {} {:?}",
        config.reference.display(),
        reference.dim(),
        config.moving.display(),
        moving.dim()
    );

    let solver = config.solver();
    let offset = config.supposed_offset();
    let deadline = Deadline::after(std::time::Duration::from_secs(config.timeout));
    let stitched = tokio::task::spawn_blocking(move || {
        stitch_planar_pair(&reference, &moving, offset, &solver, &options, &deadline)
    })
    .await
    .map_err(|e| RegistrationError::Worker(e.to_string()))??;

    write_slice(&config.output, stitched.image.view(), bit_depth)?;
    info!(
        "Wrote {} {:?}",
        config.output.display(),
        stitched.image.dim()
    );

    let report = PlanarReport {
        layout: stitched.layout,
        placement: stitched.placement,
        residual: stitched.residual,
        dimensions: stitched.image.dim(),
        diagnostics: stitched.diagnostics,
    };
    save_report(config.common.report.as_deref(), &report)
}
