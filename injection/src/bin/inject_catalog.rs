//! Inject a catalog of synthetic sources into a synthetic exposure.
//!
//! Builds a blank exposure from a JSON description, injects every catalog
//! entry, then writes a stretched PNG of the result and a JSON summary of
//! the recovered fluxes.
//!
//! Set `RUST_LOG=debug` to trace each object.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use ndarray::s;

use shared::image_proc::{linear_stretch_to_u8, save_u8_image};
use source_injection::catalog::InjectionCatalog;
use source_injection::config::{InjectionConfig, SyntheticExposureConfig};
use source_injection::inject::inject_sources_with_config;
use source_injection::summary::InjectionSummary;

/// Command line arguments for catalog injection
#[derive(Parser, Debug)]
#[command(version, about = "Inject synthetic sources into an exposure")]
struct Args {
    /// JSON catalog of sources to inject
    #[arg(long)]
    catalog: PathBuf,

    /// Injection settings (JSON); defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Synthetic exposure description (JSON); defaults are used when omitted
    #[arg(long)]
    exposure: Option<PathBuf>,

    /// Output PNG of the injected image
    #[arg(long, default_value = "test_output/injected.png")]
    output: PathBuf,

    /// Output JSON summary
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Lower display percentile
    #[arg(long, default_value_t = 1.0)]
    low_percentile: f64,

    /// Upper display percentile
    #[arg(long, default_value_t = 99.5)]
    high_percentile: f64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => InjectionConfig::load_from_file(path)
            .with_context(|| format!("loading injection config {}", path.display()))?,
        None => InjectionConfig::default(),
    };
    let exposure_config = match &args.exposure {
        Some(path) => SyntheticExposureConfig::load_from_file(path)
            .with_context(|| format!("loading exposure config {}", path.display()))?,
        None => SyntheticExposureConfig::default(),
    };
    let catalog = InjectionCatalog::load_from_file(&args.catalog)
        .with_context(|| format!("loading catalog {}", args.catalog.display()))?;

    let mut exposure = exposure_config.build()?;
    info!(
        "Built {}x{} exposure at RA={:.4} Dec={:.4}, {} catalog entries",
        exposure_config.width,
        exposure_config.height,
        exposure_config.ra_deg,
        exposure_config.dec_deg,
        catalog.len()
    );

    let objects = catalog.to_objects(config.zero_point)?;
    let outcomes = inject_sources_with_config(&mut exposure, objects, &config)?;

    let summary = InjectionSummary::build(&exposure, &config, &catalog, &outcomes);
    info!(
        "Injected {} of {} sources; {} pixels flagged {}",
        summary.injected,
        catalog.len(),
        summary.fake_pixels,
        config.mask_plane_name
    );
    if summary.skipped > 0 {
        warn!("{} sources were skipped", summary.skipped);
    }

    if let Some(parent) = args.output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Flip rows so +y points up in the PNG
    let flipped = exposure.image().slice(s![..;-1, ..]);
    let display = linear_stretch_to_u8(&flipped, args.low_percentile, args.high_percentile);
    save_u8_image(&display, &args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;
    println!("Image saved to: {}", args.output.display());

    if let Some(path) = &args.summary {
        summary.save_to_file(path)?;
        println!("Summary saved to: {}", path.display());
    }

    Ok(())
}
