use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use geo::{BooleanOps, Intersects, MapCoords};
use geo_types::{Coord, Geometry, LineString, MultiPolygon, Polygon};

use crate::clip::rects_overlap;
use crate::feature::{Feature, dump_feature};
use crate::mercator::PixelGrid;
use crate::validate::{check_feature, type_name};

/// Pairwise reduction of a group of same-attribute fragments. Matched pairs
/// are replaced by their stitched result, shrinking the group in place;
/// unmatched fragments stay separate. Internal errors are fatal for the run.
pub fn stitch_group(
    mut group: Vec<Feature>,
    stitch_distance: f64,
    grid: &PixelGrid,
) -> Result<Vec<Feature>> {
    let mut i = 0;
    while i < group.len() {
        let mut j = i + 1;
        while j < group.len() {
            let merged = match try_merge_pair(&group[i], &group[j], stitch_distance) {
                Ok(merged) => merged,
                Err(err) => {
                    dump_feature(&group[i], grid);
                    dump_feature(&group[j], grid);
                    return Err(err).context("stitching a fragment pair failed");
                }
            };
            let Some(geometry) = merged else {
                j += 1;
                continue;
            };
            let mut feature = Feature::new(
                geometry,
                group[i].properties.clone(),
                group[i].layer.clone(),
            )?;
            if !check_feature(&mut feature, true)? {
                dump_feature(&feature, grid);
                bail!("stitched feature failed validation");
            }
            group[i] = feature;
            group.remove(j);
            // Compare the freshly merged fragment against the rest again.
        }
        i += 1;
    }
    Ok(group)
}

fn try_merge_pair(
    f1: &Feature,
    f2: &Feature,
    stitch_distance: f64,
) -> Result<Option<Geometry<f64>>> {
    if std::mem::discriminant(&f1.geometry) != std::mem::discriminant(&f2.geometry) {
        bail!(
            "grouped fragments disagree on geometry type: {} != {}",
            type_name(&f1.geometry),
            type_name(&f2.geometry)
        );
    }
    if !rects_overlap(&f1.bbox(), &f2.bbox()) {
        return Ok(None);
    }
    match (&f1.geometry, &f2.geometry) {
        (Geometry::LineString(a), Geometry::LineString(b)) => {
            Ok(merge_line_strings(&[a, b], stitch_distance).map(Geometry::LineString))
        }
        (Geometry::Polygon(a), Geometry::Polygon(b)) => {
            Ok(merge_polygons(a, b)?.map(Geometry::Polygon))
        }
        (other, _) => bail!("cannot stitch geometry type: {}", type_name(other)),
    }
}

/// Reconstruct one line from fragments by walking their shared-endpoint
/// graph. Nodes live in an arena keyed by exact coordinate; edges are index
/// pairs into the arena. Returns `None` when more than two free ends remain
/// within tolerance or when edges would be left unconsumed; the fragments
/// then stay separate.
pub fn merge_line_strings(
    fragments: &[&LineString<f64>],
    stitch_distance: f64,
) -> Option<LineString<f64>> {
    struct Node {
        coord: Coord<f64>,
        neighbours: Vec<usize>,
    }

    let mut nodes: Vec<Node> = Vec::new();
    let mut index: HashMap<(u64, u64), usize> = HashMap::new();
    for fragment in fragments {
        let mut previous: Option<usize> = None;
        for &coord in &fragment.0 {
            let key = (coord.x.to_bits(), coord.y.to_bits());
            let idx = *index.entry(key).or_insert_with(|| {
                nodes.push(Node {
                    coord,
                    neighbours: Vec::new(),
                });
                nodes.len() - 1
            });
            if let Some(prev) = previous {
                if prev != idx {
                    if !nodes[prev].neighbours.contains(&idx) {
                        nodes[prev].neighbours.push(idx);
                    }
                    if !nodes[idx].neighbours.contains(&prev) {
                        nodes[idx].neighbours.push(prev);
                    }
                }
            }
            previous = Some(idx);
        }
    }
    if nodes.is_empty() {
        return None;
    }

    // Close small gaps: while more than 2 free ends exist, join the closest
    // pair belonging to different connectivity groups, if within tolerance.
    loop {
        let free: Vec<usize> = (0..nodes.len())
            .filter(|&i| nodes[i].neighbours.len() == 1)
            .collect();
        if free.len() <= 2 {
            break;
        }

        let mut label: Vec<usize> = (0..nodes.len()).collect();
        loop {
            let mut stable = true;
            for i in 0..nodes.len() {
                for n in 0..nodes[i].neighbours.len() {
                    let other = nodes[i].neighbours[n];
                    if label[other] < label[i] {
                        label[i] = label[other];
                        stable = false;
                    }
                }
            }
            if stable {
                break;
            }
        }

        let mut best: Option<(f64, usize, usize)> = None;
        for a in 0..free.len() {
            for b in (a + 1)..free.len() {
                let (i, j) = (free[a], free[b]);
                if label[i] == label[j] {
                    continue;
                }
                let dx = nodes[i].coord.x - nodes[j].coord.x;
                let dy = nodes[i].coord.y - nodes[j].coord.y;
                let distance = (dx * dx + dy * dy).sqrt();
                if best.is_none_or(|(d, _, _)| distance < d) {
                    best = Some((distance, i, j));
                }
            }
        }
        match best {
            Some((distance, i, j)) if distance <= stitch_distance => {
                nodes[i].neighbours.push(j);
                nodes[j].neighbours.push(i);
            }
            _ => break,
        }
    }

    let free: Vec<usize> = (0..nodes.len())
        .filter(|&i| nodes[i].neighbours.len() == 1)
        .collect();
    if free.len() > 2 {
        return None;
    }

    // Walk end to end, consuming every edge exactly once.
    let mut current = free.first().copied().unwrap_or(0);
    let mut points: Vec<Coord<f64>> = Vec::new();
    loop {
        points.push(nodes[current].coord);
        let Some(&next) = nodes[current].neighbours.first() else {
            break;
        };
        nodes[current].neighbours.retain(|&n| n != next);
        nodes[next].neighbours.retain(|&n| n != current);
        current = next;
    }
    if nodes.iter().any(|node| !node.neighbours.is_empty()) {
        return None;
    }
    Some(LineString::new(points))
}

/// Union two polygon fragments. Only succeeds when they geometrically share
/// a boundary: a disjoint result (MultiPolygon) means the pair does not
/// belong together and stays unmerged.
pub fn merge_polygons(a: &Polygon<f64>, b: &Polygon<f64>) -> Result<Option<Polygon<f64>>> {
    if !a.intersects(b) {
        return Ok(None);
    }
    let mut union = union_with_retry(a, b)?;
    if union.0.len() == 1 {
        Ok(Some(union.0.remove(0)))
    } else {
        Ok(None)
    }
}

fn union_with_retry(a: &Polygon<f64>, b: &Polygon<f64>) -> Result<MultiPolygon<f64>> {
    let result = a.union(b);
    if all_finite(&result) {
        return Ok(result);
    }
    tracing::warn!("polygon union produced non-finite coordinates, retrying on snapped inputs");
    let snapped_a = a.map_coords(snap);
    let snapped_b = b.map_coords(snap);
    let result = snapped_a.union(&snapped_b);
    if all_finite(&result) {
        Ok(result)
    } else {
        bail!("polygon union failed even after coordinate snapping");
    }
}

fn snap(c: Coord<f64>) -> Coord<f64> {
    Coord {
        x: c.x.round(),
        y: c.y.round(),
    }
}

fn all_finite(polygons: &MultiPolygon<f64>) -> bool {
    polygons.0.iter().all(|polygon| {
        polygon
            .exterior()
            .0
            .iter()
            .chain(polygon.interiors().iter().flat_map(|r| r.0.iter()))
            .all(|c| c.x.is_finite() && c.y.is_finite())
    })
}
