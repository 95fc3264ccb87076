use anyhow::Result;
use clap::Parser;

use tile_stitch::cli::{Cli, Command, ReportFormat, parse_bbox};
use tile_stitch::config::{MergeConfig, WORLD_BBOX};
use tile_stitch::merge::Merger;
use tile_stitch::sink::LayerSink;
use tile_stitch::source::DirectoryTileSource;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    match cli.command {
        Command::Merge(args) => {
            let bbox = match args.bbox.as_deref() {
                Some(value) => parse_bbox(value)?,
                None => WORLD_BBOX,
            };
            let config = MergeConfig {
                max_level: args.max_level,
                bbox,
                area_epsilon: args.area_epsilon,
                max_vertices: args.max_vertices,
                stitch_distance: args.stitch_distance,
                progress: !args.no_progress,
            };
            let source = DirectoryTileSource::new(&args.tiles);
            let mut sink = LayerSink::new(&args.output)?;
            let stats = Merger::new(&source, &mut sink, config)?.run()?;
            let layers = sink.layer_count();
            sink.finish()?;
            match args.report {
                ReportFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
                ReportFormat::Text => {
                    println!(
                        "tiles_visited: {} features_written: {} layers: {}",
                        stats.tiles_visited, stats.features_written, layers
                    );
                    println!(
                        "slivers_dropped: {} forced_writes: {}",
                        stats.slivers_dropped, stats.forced_writes
                    );
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
