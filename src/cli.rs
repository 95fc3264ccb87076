use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "tile-stitch", version, about = "Quadtree vector-tile merge and stitching CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (error|warn|info|debug|trace)
    #[arg(long, default_value = "info")]
    pub log: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Merge(MergeArgs),
}

#[derive(Debug, Args)]
pub struct MergeArgs {
    /// Directory holding the {z}/{x}/{y}.pbf tile tree
    pub tiles: PathBuf,

    /// Output directory for per-layer GeoJSONL files
    #[arg(long, default_value = "merged")]
    pub output: PathBuf,

    /// Leaf zoom level of the tile tree
    #[arg(long, default_value_t = 15)]
    pub max_level: u8,

    /// Restrict the merge to "west,south,east,north" in degrees
    #[arg(long)]
    pub bbox: Option<String>,

    /// Minimum polygon area in square degrees, smaller ones are dropped
    #[arg(long, default_value_t = 1e-10)]
    pub area_epsilon: f64,

    /// Vertex count above which a feature is written without further stitching
    #[arg(long, default_value_t = 1_000_000)]
    pub max_vertices: usize,

    /// Maximum pixel gap bridged between loose line ends
    #[arg(long, default_value_t = 3.0)]
    pub stitch_distance: f64,

    #[arg(long, default_value_t = false)]
    pub no_progress: bool,

    /// Format of the run summary printed to stdout
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub report: ReportFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

pub fn parse_bbox(value: &str) -> Result<[f64; 4]> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != 4 {
        anyhow::bail!("bbox must have the form west,south,east,north");
    }
    let mut bbox = [0.0f64; 4];
    for (slot, part) in bbox.iter_mut().zip(parts) {
        *slot = part
            .trim()
            .parse()
            .with_context(|| format!("invalid bbox component {part:?}"))?;
    }
    Ok(bbox)
}
