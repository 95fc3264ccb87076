use std::collections::HashMap;
use std::path::Path;

use geo_types::{Geometry, LineString, MultiPoint, Point, Polygon};
use serde_json::Value;

use tile_stitch::config::MergeConfig;
use tile_stitch::feature::Properties;
use tile_stitch::merge::Merger;
use tile_stitch::mercator::{PixelGrid, TILE_EXTENT, TileAddress};
use tile_stitch::sink::LayerSink;
use tile_stitch::source::{RawFeature, TileSource};

/// Tile source backed by a map, keyed by (z, x, y). Geometry is tile-local
/// pixels, like a decoded tile.
#[derive(Default)]
struct MemorySource {
    tiles: HashMap<(u8, u32, u32), Vec<RawFeature>>,
}

impl MemorySource {
    fn add(&mut self, z: u8, x: u32, y: u32, geometry: Geometry<f64>, kind: &str, layer: &str) {
        let mut properties = Properties::new();
        properties.insert("kind".to_string(), Value::String(kind.to_string()));
        self.tiles.entry((z, x, y)).or_default().push(RawFeature {
            geometry,
            properties,
            layer: layer.to_string(),
        });
    }
}

impl TileSource for MemorySource {
    fn fetch(&self, addr: TileAddress) -> anyhow::Result<Vec<RawFeature>> {
        Ok(self
            .tiles
            .get(&(addr.z, addr.x, addr.y))
            .cloned()
            .unwrap_or_default())
    }
}

fn test_config() -> MergeConfig {
    MergeConfig {
        max_level: 2,
        progress: false,
        ..MergeConfig::default()
    }
}

fn run(source: &MemorySource, config: MergeConfig, dir: &Path) -> tile_stitch::merge::MergeStats {
    let mut sink = LayerSink::new(dir).expect("sink");
    let stats = Merger::new(source, &mut sink, config)
        .expect("merger")
        .run()
        .expect("run");
    sink.finish().expect("finish");
    stats
}

fn read_layer(dir: &Path, file: &str) -> Vec<Value> {
    let text = std::fs::read_to_string(dir.join(file)).expect("layer file");
    text.lines()
        .map(|line| serde_json::from_str(line).expect("geojson line"))
        .collect()
}

#[test]
fn empty_world_visits_the_whole_pruned_tree() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stats = run(&MemorySource::default(), test_config(), dir.path());
    // 1 root + 4 at level 1 + 16 leaves.
    assert_eq!(stats.tiles_visited, 21);
    assert_eq!(stats.features_written, 0);
}

#[test]
fn bbox_prunes_subtrees() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = MergeConfig {
        // A bbox inside a single leaf tile of the north-western quadrant.
        bbox: [-100.0, 40.0, -95.0, 45.0],
        ..test_config()
    };
    let stats = run(&MemorySource::default(), config, dir.path());
    // One tile per level.
    assert_eq!(stats.tiles_visited, 3);
}

#[test]
fn line_fragments_merge_across_tile_boundaries() {
    // One road, clipped at the leaf boundary x=8192 which is only shared at
    // the root. The two halves must come back as a single feature.
    let mut source = MemorySource::default();
    source.add(
        2,
        1,
        1,
        Geometry::LineString(LineString::from(vec![(2048.0, 2048.0), (4096.0, 2048.0)])),
        "road",
        "transport",
    );
    source.add(
        2,
        2,
        1,
        Geometry::LineString(LineString::from(vec![(0.0, 2048.0), (2048.0, 2048.0)])),
        "road",
        "transport",
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let stats = run(&source, test_config(), dir.path());
    assert_eq!(stats.features_written, 1);

    let features = read_layer(dir.path(), "transport.geojsonl");
    assert_eq!(features.len(), 1);
    assert_eq!(features[0]["geometry"]["type"], "LineString");
    let coords = features[0]["geometry"]["coordinates"]
        .as_array()
        .expect("coords");
    assert_eq!(coords.len(), 3);
    assert_eq!(features[0]["properties"]["kind"], "road");
}

#[test]
fn polygon_halves_union_to_one_polygon() {
    // A square split at the same root-level boundary.
    let mut source = MemorySource::default();
    source.add(
        2,
        1,
        1,
        Geometry::Polygon(Polygon::new(
            LineString::from(vec![
                (2048.0, 2048.0),
                (4096.0, 2048.0),
                (4096.0, 4096.0),
                (2048.0, 4096.0),
                (2048.0, 2048.0),
            ]),
            vec![],
        )),
        "building",
        "buildings",
    );
    source.add(
        2,
        2,
        1,
        Geometry::Polygon(Polygon::new(
            LineString::from(vec![
                (0.0, 2048.0),
                (2048.0, 2048.0),
                (2048.0, 4096.0),
                (0.0, 4096.0),
                (0.0, 2048.0),
            ]),
            vec![],
        )),
        "building",
        "buildings",
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let stats = run(&source, test_config(), dir.path());
    assert_eq!(stats.features_written, 1);

    let features = read_layer(dir.path(), "buildings.geojsonl");
    assert_eq!(features.len(), 1);
    assert_eq!(features[0]["geometry"]["type"], "Polygon");
    let rings = features[0]["geometry"]["coordinates"]
        .as_array()
        .expect("rings");
    assert_eq!(rings.len(), 1);
    // The seam vertices on the shared edge get pruned, leaving the 4
    // corners plus the closing point.
    let ring: Vec<(f64, f64)> = rings[0]
        .as_array()
        .expect("ring")
        .iter()
        .map(|p| (p[0].as_f64().unwrap(), p[1].as_f64().unwrap()))
        .collect();
    assert_eq!(ring.len(), 5);

    // The union covers exactly the bbox of the two halves: 4096 of 16384
    // pixels is a quarter of the world, 90 degrees wide.
    let west = ring.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let east = ring.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let south = ring.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let north = ring.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    assert!((east - west - 90.0).abs() < 1e-9);
    let mut area = 0.0;
    for i in 1..ring.len() {
        area += ring[i - 1].0 * ring[i].1 - ring[i].0 * ring[i - 1].1;
    }
    let area = (area / 2.0).abs();
    assert!((area - (east - west) * (north - south)).abs() < 1e-9);
}

#[test]
fn four_way_split_polygon_reassembles() {
    // One square fragmented across the four leaf tiles that meet at the
    // centre of the grid. The shared corner only resolves at the root.
    let mut source = MemorySource::default();
    let quarters = [
        (1, 1, (3072.0, 3072.0), (4096.0, 4096.0)),
        (2, 1, (0.0, 3072.0), (1024.0, 4096.0)),
        (1, 2, (3072.0, 0.0), (4096.0, 1024.0)),
        (2, 2, (0.0, 0.0), (1024.0, 1024.0)),
    ];
    for (x, y, min, max) in quarters {
        source.add(
            2,
            x,
            y,
            Geometry::Polygon(Polygon::new(
                LineString::from(vec![
                    (min.0, min.1),
                    (max.0, min.1),
                    (max.0, max.1),
                    (min.0, max.1),
                    (min.0, min.1),
                ]),
                vec![],
            )),
            "plaza",
            "landuse",
        );
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let stats = run(&source, test_config(), dir.path());
    assert_eq!(stats.features_written, 1);

    let features = read_layer(dir.path(), "landuse.geojsonl");
    assert_eq!(features.len(), 1);
    assert_eq!(features[0]["geometry"]["type"], "Polygon");
    let ring = features[0]["geometry"]["coordinates"][0]
        .as_array()
        .expect("ring");
    assert_eq!(ring.len(), 5);
}

#[test]
fn rerunning_on_finalized_output_changes_nothing() {
    let square = |points: Vec<(f64, f64)>| {
        Geometry::Polygon(Polygon::new(LineString::from(points), vec![]))
    };
    let mut source = MemorySource::default();
    source.add(
        2,
        0,
        0,
        square(vec![
            (100.0, 100.0),
            (300.0, 100.0),
            (300.0, 300.0),
            (100.0, 300.0),
            (100.0, 100.0),
        ]),
        "pond",
        "water",
    );
    let dir = tempfile::tempdir().expect("tempdir");
    run(&source, test_config(), dir.path());
    let first = read_layer(dir.path(), "water.geojsonl");
    assert_eq!(first.len(), 1);

    // Feed the finalized degrees back in as a leaf feature of the same
    // tile. A run over its own output must resolve everything again (the
    // merger fails on anything left pending at the root) and reproduce the
    // output exactly.
    let ring: Vec<(f64, f64)> = first[0]["geometry"]["coordinates"][0]
        .as_array()
        .expect("ring")
        .iter()
        .map(|p| {
            let (tx, ty) =
                PixelGrid::degree_to_tile(p[0].as_f64().unwrap(), p[1].as_f64().unwrap(), 2);
            (tx * f64::from(TILE_EXTENT), ty * f64::from(TILE_EXTENT))
        })
        .collect();
    let mut source = MemorySource::default();
    source.add(2, 0, 0, square(ring), "pond", "water");
    let dir = tempfile::tempdir().expect("tempdir");
    let stats = run(&source, test_config(), dir.path());
    assert_eq!(stats.features_written, 1);
    let second = read_layer(dir.path(), "water.geojsonl");
    assert_eq!(first, second);
}

#[test]
fn root_level_features_are_written_even_when_sliver_sized() {
    // With a single-tile pyramid the leaf is the root. The root write takes
    // precedence over the sliver discard.
    let mut source = MemorySource::default();
    source.add(
        0,
        0,
        0,
        Geometry::Polygon(Polygon::new(
            LineString::from(vec![
                (100.0, 100.0),
                (101.0, 100.0),
                (101.0, 101.0),
                (100.0, 101.0),
                (100.0, 100.0),
            ]),
            vec![],
        )),
        "speck",
        "artifacts",
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let config = MergeConfig {
        max_level: 0,
        area_epsilon: 1.0,
        progress: false,
        ..MergeConfig::default()
    };
    let stats = run(&source, config, dir.path());
    assert_eq!(stats.features_written, 1);
    assert_eq!(stats.slivers_dropped, 0);
}

#[test]
fn distinct_properties_never_merge() {
    let mut source = MemorySource::default();
    source.add(
        2,
        1,
        1,
        Geometry::LineString(LineString::from(vec![(2048.0, 2048.0), (4096.0, 2048.0)])),
        "road",
        "transport",
    );
    source.add(
        2,
        2,
        1,
        Geometry::LineString(LineString::from(vec![(0.0, 2048.0), (2048.0, 2048.0)])),
        "rail",
        "transport",
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let stats = run(&source, test_config(), dir.path());
    assert_eq!(stats.features_written, 2);
}

#[test]
fn interior_feature_is_written_without_waiting_for_ancestors() {
    let mut source = MemorySource::default();
    source.add(
        2,
        0,
        0,
        Geometry::Polygon(Polygon::new(
            LineString::from(vec![
                (100.0, 100.0),
                (300.0, 100.0),
                (300.0, 300.0),
                (100.0, 300.0),
                (100.0, 100.0),
            ]),
            vec![],
        )),
        "pond",
        "water",
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let stats = run(&source, test_config(), dir.path());
    assert_eq!(stats.features_written, 1);
    assert_eq!(stats.slivers_dropped, 0);

    let features = read_layer(dir.path(), "water.geojsonl");
    assert_eq!(features.len(), 1);
}

#[test]
fn points_are_written_immediately_and_multipoints_flatten() {
    let mut source = MemorySource::default();
    source.add(
        2,
        1,
        1,
        Geometry::Point(Point::new(512.0, 512.0)),
        "tree",
        "nature",
    );
    source.add(
        2,
        1,
        1,
        Geometry::MultiPoint(MultiPoint::from(vec![(600.0, 600.0), (700.0, 700.0)])),
        "bench",
        "nature",
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let stats = run(&source, test_config(), dir.path());
    assert_eq!(stats.features_written, 3);

    let features = read_layer(dir.path(), "nature.geojsonl");
    assert_eq!(features.len(), 3);
    assert!(
        features
            .iter()
            .all(|f| f["geometry"]["type"] == "Point")
    );
}

#[test]
fn tiny_polygons_are_dropped_as_slivers() {
    let mut source = MemorySource::default();
    source.add(
        2,
        0,
        0,
        Geometry::Polygon(Polygon::new(
            LineString::from(vec![
                (100.0, 100.0),
                (101.0, 100.0),
                (101.0, 101.0),
                (100.0, 101.0),
                (100.0, 100.0),
            ]),
            vec![],
        )),
        "speck",
        "artifacts",
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let config = MergeConfig {
        // At this grid scale one pixel is about 0.02 degrees, so a generous
        // epsilon turns the 1-pixel square into a sliver.
        area_epsilon: 1.0,
        ..test_config()
    };
    let stats = run(&source, config, dir.path());
    assert_eq!(stats.slivers_dropped, 1);
    assert_eq!(stats.features_written, 0);
}

#[test]
fn oversized_features_are_written_without_further_stitching() {
    let mut source = MemorySource::default();
    source.add(
        2,
        1,
        1,
        Geometry::LineString(LineString::from(vec![
            (0.0, 2048.0),
            (1000.0, 2100.0),
            (2000.0, 2048.0),
            (3000.0, 2100.0),
            (4096.0, 2048.0),
        ])),
        "border",
        "admin",
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let config = MergeConfig {
        max_vertices: 3,
        ..test_config()
    };
    let stats = run(&source, config, dir.path());
    assert_eq!(stats.forced_writes, 1);
    assert_eq!(stats.features_written, 1);
}

#[test]
fn underscore_properties_do_not_split_groups() {
    let mut source = MemorySource::default();
    let mut left = Properties::new();
    left.insert("kind".to_string(), Value::String("road".to_string()));
    left.insert("_tile_id".to_string(), Value::String("a".to_string()));
    let mut right = Properties::new();
    right.insert("kind".to_string(), Value::String("road".to_string()));
    right.insert("_tile_id".to_string(), Value::String("b".to_string()));
    source.tiles.entry((2, 1, 1)).or_default().push(RawFeature {
        geometry: Geometry::LineString(LineString::from(vec![
            (2048.0, 2048.0),
            (4096.0, 2048.0),
        ])),
        properties: left,
        layer: "transport".to_string(),
    });
    source.tiles.entry((2, 2, 1)).or_default().push(RawFeature {
        geometry: Geometry::LineString(LineString::from(vec![(0.0, 2048.0), (2048.0, 2048.0)])),
        properties: right,
        layer: "transport".to_string(),
    });

    let dir = tempfile::tempdir().expect("tempdir");
    let stats = run(&source, test_config(), dir.path());
    assert_eq!(stats.features_written, 1);
}

#[test]
fn output_coordinates_are_degrees() {
    let mut source = MemorySource::default();
    source.add(
        2,
        0,
        0,
        Geometry::Point(Point::new(0.0, 0.0)),
        "corner",
        "markers",
    );

    let dir = tempfile::tempdir().expect("tempdir");
    run(&source, test_config(), dir.path());

    let features = read_layer(dir.path(), "markers.geojsonl");
    let coords = features[0]["geometry"]["coordinates"]
        .as_array()
        .expect("coords");
    // Global pixel (0, 0) is the north-western Mercator limit.
    assert!((coords[0].as_f64().unwrap() - -180.0).abs() < 1e-9);
    assert!((coords[1].as_f64().unwrap() - 85.0511287798).abs() < 1e-6);
}
