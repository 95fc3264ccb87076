use std::collections::BTreeMap;

use anyhow::{Result, anyhow, bail};
use geo::algorithm::orient::{Direction, Orient};
use geo::{Area, BoundingRect, MapCoords, MapCoordsInPlace};
use geo_types::{Geometry, Rect};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::mercator::PixelGrid;

/// Property map of a feature. Sorted keys keep the content hash and the
/// serialized output deterministic.
pub type Properties = BTreeMap<String, Value>;

/// SHA-256 digest over a feature's non-positional attributes.
pub type ContentHash = [u8; 32];

/// A single feature moving through the merge. Geometry is in global pixel
/// coordinates until `finalize` converts it to degrees for output.
#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    pub properties: Properties,
    pub layer: String,
    bbox: Rect<f64>,
    hash: Option<ContentHash>,
}

impl Feature {
    pub fn new(geometry: Geometry<f64>, properties: Properties, layer: String) -> Result<Feature> {
        if properties.is_empty() {
            bail!("feature in layer {layer:?} has no properties");
        }
        if layer.is_empty() {
            bail!("feature has no layer name");
        }
        let bbox = geometry
            .bounding_rect()
            .ok_or_else(|| anyhow!("feature in layer {layer:?} has an empty geometry"))?;
        Ok(Feature {
            geometry,
            properties,
            layer,
            bbox,
            hash: None,
        })
    }

    pub fn bbox(&self) -> Rect<f64> {
        self.bbox
    }

    /// Recompute the cached bbox after the geometry was mutated in place.
    pub fn refresh_bbox(&mut self) -> Result<()> {
        self.bbox = self
            .geometry
            .bounding_rect()
            .ok_or_else(|| anyhow!("feature in layer {:?} has an empty geometry", self.layer))?;
        Ok(())
    }

    /// Digest over the sorted, non-underscore-prefixed property entries plus
    /// the layer name. Geometry never contributes, so fragments of one
    /// original feature land in the same group.
    pub fn content_hash(&mut self) -> ContentHash {
        if let Some(hash) = self.hash {
            return hash;
        }
        let mut hasher = Sha256::new();
        for (key, value) in &self.properties {
            if key.starts_with('_') {
                continue;
            }
            hasher.update(key.as_bytes());
            hasher.update(b":");
            hasher.update(value.to_string().as_bytes());
            hasher.update(b",");
        }
        hasher.update(self.layer.as_bytes());
        let hash: ContentHash = hasher.finalize().into();
        self.hash = Some(hash);
        hash
    }

    pub fn is_point(&self) -> bool {
        matches!(self.geometry, Geometry::Point(_))
    }

    pub fn vertex_count(&self) -> usize {
        count_vertices(&self.geometry)
    }

    /// Split a multi-geometry into single-geometry features inheriting the
    /// parent's properties and layer. Singular geometries pass through.
    pub fn into_parts(self) -> Result<Vec<Feature>> {
        let Feature {
            geometry,
            properties,
            layer,
            ..
        } = self;
        let geometries: Vec<Geometry<f64>> = match geometry {
            Geometry::MultiPoint(points) => points.into_iter().map(Geometry::Point).collect(),
            Geometry::MultiLineString(lines) => {
                lines.into_iter().map(Geometry::LineString).collect()
            }
            Geometry::MultiPolygon(polygons) => {
                polygons.into_iter().map(Geometry::Polygon).collect()
            }
            single => vec![single],
        };
        geometries
            .into_iter()
            .map(|g| Feature::new(g, properties.clone(), layer.clone()))
            .collect()
    }

    /// Unsigned area in degree space, used for the sliver test. Zero for
    /// anything that is not a polygon.
    pub fn degree_area(&self, grid: &PixelGrid) -> f64 {
        match &self.geometry {
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => self
                .geometry
                .map_coords(|c| grid.to_degrees(c))
                .unsigned_area(),
            _ => 0.0,
        }
    }

    /// Convert to degrees and normalize ring orientation for output. Applied
    /// exactly once, when the feature leaves the merge.
    pub fn finalize(mut self, grid: &PixelGrid) -> Feature {
        self.geometry.map_coords_in_place(|c| grid.to_degrees(c));
        match &mut self.geometry {
            Geometry::Polygon(polygon) => *polygon = polygon.orient(Direction::Default),
            Geometry::MultiPolygon(polygons) => *polygons = polygons.orient(Direction::Default),
            _ => {}
        }
        self
    }

    /// GeoJSON Feature object carrying only the original semantic
    /// properties; bbox and hash are transient and never serialized.
    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "Feature",
            "geometry": geometry_to_json(&self.geometry),
            "properties": self.properties,
        })
    }
}

pub fn count_vertices(geometry: &Geometry<f64>) -> usize {
    match geometry {
        Geometry::Point(_) => 1,
        Geometry::MultiPoint(points) => points.len(),
        Geometry::LineString(line) => line.0.len(),
        Geometry::MultiLineString(lines) => lines.iter().map(|l| l.0.len()).sum(),
        Geometry::Polygon(polygon) => {
            polygon.exterior().0.len()
                + polygon.interiors().iter().map(|r| r.0.len()).sum::<usize>()
        }
        Geometry::MultiPolygon(polygons) => polygons
            .iter()
            .map(|polygon| {
                polygon.exterior().0.len()
                    + polygon.interiors().iter().map(|r| r.0.len()).sum::<usize>()
            })
            .sum(),
        _ => 0,
    }
}

pub fn geometry_to_json(geometry: &Geometry<f64>) -> Value {
    match geometry {
        Geometry::Point(point) => json!({
            "type": "Point",
            "coordinates": [point.x(), point.y()],
        }),
        Geometry::MultiPoint(points) => json!({
            "type": "MultiPoint",
            "coordinates": points.iter().map(|p| json!([p.x(), p.y()])).collect::<Vec<_>>(),
        }),
        Geometry::LineString(line) => json!({
            "type": "LineString",
            "coordinates": line_to_json(&line.0),
        }),
        Geometry::MultiLineString(lines) => json!({
            "type": "MultiLineString",
            "coordinates": lines.iter().map(|l| line_to_json(&l.0)).collect::<Vec<_>>(),
        }),
        Geometry::Polygon(polygon) => json!({
            "type": "Polygon",
            "coordinates": polygon_to_json(polygon),
        }),
        Geometry::MultiPolygon(polygons) => json!({
            "type": "MultiPolygon",
            "coordinates": polygons.iter().map(polygon_to_json).collect::<Vec<_>>(),
        }),
        other => json!({
            "type": format!("{other:?}"),
            "coordinates": Value::Null,
        }),
    }
}

fn line_to_json(coords: &[geo_types::Coord<f64>]) -> Vec<Value> {
    coords.iter().map(|c| json!([c.x, c.y])).collect()
}

fn polygon_to_json(polygon: &geo_types::Polygon<f64>) -> Vec<Value> {
    let mut rings = Vec::with_capacity(1 + polygon.interiors().len());
    rings.push(Value::Array(line_to_json(&polygon.exterior().0)));
    for ring in polygon.interiors() {
        rings.push(Value::Array(line_to_json(&ring.0)));
    }
    rings
}

/// Dump a feature as degree-space GeoJSON for offline diagnosis before the
/// run aborts on an invariant violation.
pub fn dump_feature(feature: &Feature, grid: &PixelGrid) {
    let dump = feature.clone().finalize(grid);
    tracing::error!(
        layer = %dump.layer,
        feature = %dump.to_geojson(),
        "invariant violation, dumping offending feature"
    );
}
