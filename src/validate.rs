use anyhow::{Result, bail};
use geo_types::{Coord, Geometry, LineString, MultiLineString, MultiPolygon, Polygon};

use crate::feature::Feature;

/// Points closer than this are considered coincident.
pub const POINT_EPSILON: f64 = 1e-10;

/// Prune a ring vertex when `area * (1 + cos angle)` falls below this.
const COLLINEAR_THRESHOLD: f64 = 0.2;

enum Outcome {
    Keep,
    Drop,
    Replace(Geometry<f64>),
}

/// Validate a feature, mutating its geometry in place when `repair` is true.
/// `Ok(false)` means the feature is degenerate and should be discarded;
/// `Err` is an invariant violation that aborts the run.
pub fn check_feature(feature: &mut Feature, repair: bool) -> Result<bool> {
    if feature.properties.is_empty() {
        bail!("feature in layer {:?} has no properties", feature.layer);
    }
    if !check_geometry(&mut feature.geometry, repair)? {
        return Ok(false);
    }
    feature.refresh_bbox()?;
    Ok(true)
}

pub fn check_geometry(geometry: &mut Geometry<f64>, repair: bool) -> Result<bool> {
    let outcome = match geometry {
        Geometry::Point(point) => {
            check_point(&point.0)?;
            Outcome::Keep
        }
        Geometry::LineString(line) => {
            if check_path(&mut line.0, repair)? {
                Outcome::Keep
            } else {
                Outcome::Drop
            }
        }
        Geometry::MultiLineString(lines) => check_multi_lines(lines, repair)?,
        Geometry::Polygon(polygon) => match check_polygon(polygon, repair)? {
            Some(repaired) => {
                *polygon = repaired;
                Outcome::Keep
            }
            None => Outcome::Drop,
        },
        Geometry::MultiPolygon(polygons) => check_multi_polygons(polygons, repair)?,
        other => bail!("unrecognized geometry type: {}", type_name(other)),
    };
    match outcome {
        Outcome::Keep => Ok(true),
        Outcome::Drop => Ok(false),
        Outcome::Replace(replacement) => {
            *geometry = replacement;
            Ok(true)
        }
    }
}

fn check_multi_lines(lines: &mut MultiLineString<f64>, repair: bool) -> Result<Outcome> {
    if repair {
        let mut kept: Vec<LineString<f64>> = Vec::with_capacity(lines.0.len());
        for mut line in lines.0.drain(..) {
            if check_path(&mut line.0, true)? {
                kept.push(line);
            }
        }
        if kept.is_empty() {
            return Ok(Outcome::Drop);
        }
        if kept.len() == 1 {
            return Ok(Outcome::Replace(Geometry::LineString(kept.remove(0))));
        }
        lines.0 = kept;
        Ok(Outcome::Keep)
    } else {
        if lines.0.len() < 2 {
            bail!("multi geometry must have at least 2 parts");
        }
        for line in &mut lines.0 {
            check_path(&mut line.0, false)?;
        }
        Ok(Outcome::Keep)
    }
}

fn check_multi_polygons(polygons: &mut MultiPolygon<f64>, repair: bool) -> Result<Outcome> {
    if repair {
        let mut kept: Vec<Polygon<f64>> = Vec::with_capacity(polygons.0.len());
        for polygon in polygons.0.drain(..) {
            if let Some(repaired) = check_polygon(&polygon, true)? {
                kept.push(repaired);
            }
        }
        if kept.is_empty() {
            return Ok(Outcome::Drop);
        }
        if kept.len() == 1 {
            return Ok(Outcome::Replace(Geometry::Polygon(kept.remove(0))));
        }
        polygons.0 = kept;
        Ok(Outcome::Keep)
    } else {
        if polygons.0.len() < 2 {
            bail!("multi geometry must have at least 2 parts");
        }
        for polygon in &polygons.0 {
            check_polygon(polygon, false)?;
        }
        Ok(Outcome::Keep)
    }
}

fn check_point(c: &Coord<f64>) -> Result<()> {
    if !c.x.is_finite() || !c.y.is_finite() {
        bail!("point coordinates must be finite numbers");
    }
    Ok(())
}

/// Path check. In repair mode coincident consecutive points are deduplicated
/// and a 3-point path collapsing onto its endpoints is rejected; in strict
/// mode duplicates are fatal.
fn check_path(data: &mut Vec<Coord<f64>>, repair: bool) -> Result<bool> {
    for c in data.iter() {
        check_point(c)?;
    }
    if repair {
        let mut i = 1;
        while i < data.len() {
            if same_point(&data[i - 1], &data[i]) {
                data.remove(i - 1);
            } else {
                i += 1;
            }
        }
        if data.len() == 3 && same_point(&data[0], &data[2]) {
            return Ok(false);
        }
        Ok(data.len() >= 2)
    } else {
        if data.len() < 2 {
            bail!("path must have at least 2 points");
        }
        for i in 1..data.len() {
            if same_point(&data[i - 1], &data[i]) {
                bail!(
                    "path must not include duplicated points: [{}, {}]",
                    data[i].x,
                    data[i].y
                );
            }
        }
        Ok(true)
    }
}

/// Ring check. Repair mode auto-closes the ring and iteratively prunes
/// near-collinear and zero-area vertices before re-closing.
fn check_ring(data: &mut Vec<Coord<f64>>, repair: bool) -> Result<bool> {
    if data.len() < 4 {
        if repair {
            return Ok(false);
        }
        bail!("ring must have at least 4 points");
    }
    if !check_path(data, repair)? {
        return Ok(false);
    }
    if repair {
        if data.len() > 1 && same_point(&data[0], &data[data.len() - 1]) {
            data.pop();
        }
        let mut i0 = 0;
        while i0 < data.len() {
            if data.len() < 3 {
                break;
            }
            let i1 = (i0 + 1) % data.len();
            let i2 = (i1 + 1) % data.len();
            let p0 = data[i0];
            let p1 = data[i1];
            let p2 = data[i2];
            let d01 = ((p0.x - p1.x).powi(2) + (p0.y - p1.y).powi(2)).sqrt();
            let d12 = ((p1.x - p2.x).powi(2) + (p1.y - p2.y).powi(2)).sqrt();
            let area =
                (p0.x * (p1.y - p2.y) + p1.x * (p2.y - p0.y) + p2.x * (p0.y - p1.y)).abs();
            let angle =
                ((p0.x - p1.x) * (p1.x - p2.x) + (p0.y - p1.y) * (p1.y - p2.y))
                    / (d01 * d12 + 1e-20);
            if area * (angle + 1.0) > COLLINEAR_THRESHOLD {
                i0 += 1;
                continue;
            }
            data.remove(i1);
            // Re-examine the neighbourhood of the pruned vertex.
            i0 = i0.saturating_sub(2) + 1;
        }
        if let Some(first) = data.first().copied() {
            data.push(first);
        }
    }
    if data.len() < 2 || !same_point(&data[0], &data[data.len() - 1]) {
        if repair {
            return Ok(false);
        }
        bail!("first and last point of a ring must be identical");
    }
    Ok(data.len() >= 4)
}

/// Polygon check. Returns the (possibly repaired) polygon, or `None` when
/// the outer ring is beyond repair. A winding-order mismatch between the
/// outer ring and a hole is fatal in both modes, never repaired.
fn check_polygon(polygon: &Polygon<f64>, repair: bool) -> Result<Option<Polygon<f64>>> {
    let mut outer = polygon.exterior().0.clone();
    if !check_ring(&mut outer, repair)? {
        return Ok(None);
    }
    let mut holes: Vec<Vec<Coord<f64>>> = Vec::with_capacity(polygon.interiors().len());
    for ring in polygon.interiors() {
        let mut hole = ring.0.clone();
        if check_ring(&mut hole, repair)? {
            holes.push(hole);
        } else if !repair {
            bail!("polygon hole failed validation");
        }
    }
    let outer_area = signed_area(&outer);
    for hole in &holes {
        if outer_area * signed_area(hole) >= 0.0 {
            bail!("winding order of the outer ring must differ from its holes");
        }
    }
    Ok(Some(Polygon::new(
        LineString::new(outer),
        holes.into_iter().map(LineString::new).collect(),
    )))
}

fn same_point(p1: &Coord<f64>, p2: &Coord<f64>) -> bool {
    (p1.x - p2.x).abs() <= POINT_EPSILON && (p1.y - p2.y).abs() <= POINT_EPSILON
}

/// Shoelace sum over a closed ring. Sign encodes the winding direction.
pub fn signed_area(ring: &[Coord<f64>]) -> f64 {
    let mut sum = 0.0;
    for i in 1..ring.len() {
        let p1 = ring[i - 1];
        let p2 = ring[i];
        sum += p1.x * p2.y - p2.x * p1.y;
    }
    sum / 2.0
}

pub(crate) fn type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}
