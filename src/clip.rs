use anyhow::{Result, bail};
use geo::{BooleanOps, BoundingRect};
use geo_types::{Geometry, LineString, MultiLineString, MultiPolygon, Point, Polygon, Rect};

/// Clip a geometry to an axis-aligned pixel rectangle. `None` means the
/// geometry lies entirely outside. Points get a containment test, lines are
/// clipped, polygons are intersected with the rectangle.
pub fn clip_to_rect(geometry: &Geometry<f64>, rect: &Rect<f64>) -> Result<Option<Geometry<f64>>> {
    match geometry {
        Geometry::Point(point) => Ok(clip_point(point, rect).map(Geometry::Point)),
        Geometry::LineString(line) => {
            let lines = MultiLineString::new(vec![line.clone()]);
            Ok(clip_lines(&lines, rect))
        }
        Geometry::MultiLineString(lines) => Ok(clip_lines(lines, rect)),
        Geometry::Polygon(polygon) => Ok(clip_polygon(polygon, rect)),
        Geometry::MultiPolygon(polygons) => Ok(clip_multi_polygon(polygons, rect)),
        other => bail!("cannot clip geometry of this type: {other:?}"),
    }
}

fn clip_point(point: &Point<f64>, rect: &Rect<f64>) -> Option<Point<f64>> {
    if point.x() >= rect.min().x
        && point.x() <= rect.max().x
        && point.y() >= rect.min().y
        && point.y() <= rect.max().y
    {
        Some(*point)
    } else {
        None
    }
}

fn clip_lines(lines: &MultiLineString<f64>, rect: &Rect<f64>) -> Option<Geometry<f64>> {
    let bbox = lines.bounding_rect()?;
    if !rects_overlap(&bbox, rect) {
        return None;
    }
    if rect_covers(rect, &bbox) {
        return Some(unwrap_lines(lines.clone()));
    }
    let clipped = rect.to_polygon().clip(lines, false);
    if clipped.0.is_empty() {
        None
    } else {
        Some(unwrap_lines(clipped))
    }
}

fn unwrap_lines(mut lines: MultiLineString<f64>) -> Geometry<f64> {
    if lines.0.len() == 1 {
        Geometry::LineString(lines.0.remove(0))
    } else {
        Geometry::MultiLineString(lines)
    }
}

fn clip_polygon(polygon: &Polygon<f64>, rect: &Rect<f64>) -> Option<Geometry<f64>> {
    let bbox = polygon.bounding_rect()?;
    if !rects_overlap(&bbox, rect) {
        return None;
    }
    if rect_covers(rect, &bbox) {
        return Some(Geometry::Polygon(polygon.clone()));
    }
    let clipped: MultiPolygon<f64> = polygon.intersection(&rect.to_polygon());
    unwrap_polygons(clipped)
}

fn clip_multi_polygon(polygons: &MultiPolygon<f64>, rect: &Rect<f64>) -> Option<Geometry<f64>> {
    let bbox = polygons.bounding_rect()?;
    if !rects_overlap(&bbox, rect) {
        return None;
    }
    if rect_covers(rect, &bbox) {
        return Some(Geometry::MultiPolygon(polygons.clone()));
    }
    let mut parts: Vec<Polygon<f64>> = Vec::new();
    for polygon in &polygons.0 {
        match clip_polygon(polygon, rect) {
            Some(Geometry::Polygon(p)) => parts.push(p),
            Some(Geometry::MultiPolygon(mp)) => parts.extend(mp.0),
            _ => {}
        }
    }
    unwrap_polygons(MultiPolygon::new(parts))
}

fn unwrap_polygons(mut polygons: MultiPolygon<f64>) -> Option<Geometry<f64>> {
    match polygons.0.len() {
        0 => None,
        1 => Some(Geometry::Polygon(polygons.0.remove(0))),
        _ => Some(Geometry::MultiPolygon(polygons)),
    }
}

pub fn rects_overlap(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && a.min().y <= b.max().y && a.max().x >= b.min().x
        && a.max().y >= b.min().y
}

fn rect_covers(outer: &Rect<f64>, inner: &Rect<f64>) -> bool {
    inner.min().x >= outer.min().x
        && inner.min().y >= outer.min().y
        && inner.max().x <= outer.max().x
        && inner.max().y <= outer.max().y
}
