use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use geo::MapCoords;
use geo_types::{Coord, Geometry, Rect};
use indicatif::{ProgressBar, ProgressStyle};

use crate::clip::clip_to_rect;
use crate::config::MergeConfig;
use crate::feature::{ContentHash, Feature, dump_feature};
use crate::mercator::{PixelGrid, TileAddress, TileRange};
use crate::sink::LayerSink;
use crate::source::{RawFeature, TileSource};
use crate::stitch::stitch_group;
use crate::validate::check_feature;

/// Counters reported after a run.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct MergeStats {
    pub tiles_visited: u64,
    pub features_written: u64,
    pub slivers_dropped: u64,
    pub forced_writes: u64,
}

/// Single-threaded depth-first merge over the quadtree. Each node stitches
/// the fragments its children could not resolve and either writes them or
/// hands them up another level.
pub struct Merger<'a, S: TileSource> {
    source: &'a S,
    sink: &'a mut LayerSink,
    config: MergeConfig,
    grid: PixelGrid,
    ranges: Vec<TileRange>,
    stats: MergeStats,
    progress: ProgressBar,
}

impl<'a, S: TileSource> Merger<'a, S> {
    pub fn new(source: &'a S, sink: &'a mut LayerSink, config: MergeConfig) -> Result<Merger<'a, S>> {
        config.validate()?;
        let grid = PixelGrid::new(config.max_level);
        let ranges = grid.level_ranges(config.bbox);
        let progress = if config.progress {
            let bar = ProgressBar::new(ranges[config.max_level as usize].tile_count());
            bar.set_style(
                ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} leaf tiles")
                    .unwrap()
                    .progress_chars("=>-"),
            );
            bar
        } else {
            ProgressBar::hidden()
        };
        Ok(Merger {
            source,
            sink,
            config,
            grid,
            ranges,
            stats: MergeStats::default(),
            progress,
        })
    }

    pub fn run(mut self) -> Result<MergeStats> {
        let pending = self.merge_tile(TileAddress::ROOT)?;
        self.progress.finish_and_clear();
        if !pending.is_empty() {
            bail!("{} features left unresolved at the root", pending.len());
        }
        tracing::info!(
            tiles = self.stats.tiles_visited,
            features = self.stats.features_written,
            slivers = self.stats.slivers_dropped,
            forced = self.stats.forced_writes,
            "merge finished"
        );
        Ok(self.stats)
    }

    /// Returns the fragments of this subtree that still touch the tile
    /// boundary and need a larger context to resolve.
    fn merge_tile(&mut self, addr: TileAddress) -> Result<Vec<Feature>> {
        if !self.ranges[addr.z as usize].contains(addr) {
            return Ok(Vec::new());
        }
        self.stats.tiles_visited += 1;

        let collected = if addr.z == self.config.max_level {
            self.progress.inc(1);
            self.load_leaf(addr)?
        } else {
            let mut collected = Vec::new();
            for child in addr.children() {
                collected.extend(self.merge_tile(child)?);
            }
            collected
        };

        // Group fragments by content hash. BTreeMap keeps the group order
        // independent of insertion order.
        let mut groups: BTreeMap<ContentHash, Vec<Feature>> = BTreeMap::new();
        for mut feature in collected {
            let hash = feature.content_hash();
            groups.entry(hash).or_default().push(feature);
        }

        let bounds = self.grid.tile_bounds(addr);
        let mut pending = Vec::new();
        for (_, group) in groups {
            let group = if group.len() > 1 {
                stitch_group(group, self.config.stitch_distance, &self.grid)
                    .with_context(|| format!("stitching fragments in tile {addr}"))?
            } else {
                group
            };
            for feature in group {
                self.resolve(feature, addr, &bounds, &mut pending)?;
            }
        }
        Ok(pending)
    }

    /// Decode one leaf tile into repaired, clipped, single-geometry features
    /// in global pixel coordinates. Points are written right away, they never
    /// fragment across tiles.
    fn load_leaf(&mut self, addr: TileAddress) -> Result<Vec<Feature>> {
        let raw = self.source.fetch(addr)?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        let bounds = self.grid.tile_bounds(addr);
        let offset = bounds.min();

        let mut features = Vec::new();
        for RawFeature {
            geometry,
            properties,
            layer,
        } in raw
        {
            let geometry = geometry.map_coords(|c| Coord {
                x: c.x + offset.x,
                y: c.y + offset.y,
            });

            if matches!(geometry, Geometry::Point(_) | Geometry::MultiPoint(_)) {
                let feature = Feature::new(geometry, properties, layer)
                    .with_context(|| format!("reading point feature of tile {addr}"))?;
                for part in feature.into_parts()? {
                    if clip_to_rect(&part.geometry, &bounds)?.is_some() {
                        self.write_feature(part)?;
                    }
                }
                continue;
            }

            let mut feature = Feature::new(geometry, properties, layer)
                .with_context(|| format!("reading feature of tile {addr}"))?;
            if !check_feature(&mut feature, true)
                .with_context(|| format!("validating feature of tile {addr}"))?
            {
                continue;
            }
            let Some(clipped) = clip_to_rect(&feature.geometry, &bounds)? else {
                continue;
            };
            // Snap to whole pixels so fragment endpoints of neighbouring
            // tiles coincide exactly.
            let clipped = clipped.map_coords(|c| Coord {
                x: c.x.round(),
                y: c.y.round(),
            });
            let parent = Feature::new(clipped, feature.properties, feature.layer)?;
            for mut part in parent.into_parts()? {
                if !check_feature(&mut part, true)
                    .with_context(|| format!("validating clipped part of tile {addr}"))?
                {
                    continue;
                }
                features.push(part);
            }
        }
        Ok(features)
    }

    /// Write the feature, drop it, or push it to `pending` for the parent.
    fn resolve(
        &mut self,
        feature: Feature,
        addr: TileAddress,
        bounds: &Rect<f64>,
        pending: &mut Vec<Feature>,
    ) -> Result<()> {
        if addr.z == 0 || feature.is_point() {
            return self.write_feature(feature);
        }
        if matches!(
            feature.geometry,
            Geometry::Polygon(_) | Geometry::MultiPolygon(_)
        ) && feature.degree_area(&self.grid) < self.config.area_epsilon
        {
            self.stats.slivers_dropped += 1;
            return Ok(());
        }
        if feature.vertex_count() > self.config.max_vertices {
            tracing::warn!(
                tile = %addr,
                layer = %feature.layer,
                vertices = feature.vertex_count(),
                "feature exceeds the vertex budget, writing without further stitching"
            );
            self.stats.forced_writes += 1;
            return self.write_feature(feature);
        }
        if strictly_inside(&feature.bbox(), bounds) {
            self.write_feature(feature)
        } else {
            pending.push(feature);
            Ok(())
        }
    }

    fn write_feature(&mut self, mut feature: Feature) -> Result<()> {
        if let Err(err) = check_feature(&mut feature, false) {
            dump_feature(&feature, &self.grid);
            return Err(err).context("feature failed final validation");
        }
        let feature = feature.finalize(&self.grid);
        self.sink.write(&feature)?;
        self.stats.features_written += 1;
        Ok(())
    }
}

/// Strict containment: a bbox touching the tile edge may continue in the
/// neighbouring tile and stays pending.
fn strictly_inside(bbox: &Rect<f64>, bounds: &Rect<f64>) -> bool {
    bbox.min().x > bounds.min().x
        && bbox.min().y > bounds.min().y
        && bbox.max().x < bounds.max().x
        && bbox.max().y < bounds.max().y
}
