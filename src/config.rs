use anyhow::{Result, bail};

use crate::mercator::MAX_SUPPORTED_LEVEL;

pub const DEFAULT_MAX_LEVEL: u8 = 15;
pub const DEFAULT_AREA_EPSILON: f64 = 1e-10;
pub const DEFAULT_MAX_VERTICES: usize = 1_000_000;
pub const DEFAULT_STITCH_DISTANCE: f64 = 3.0;

/// Mercator-coverable world extent, used when no bbox is given.
pub const WORLD_BBOX: [f64; 4] = [-180.0, -85.06, 180.0, 85.06];

/// Tuning knobs of a merge run.
#[derive(Debug, Clone, Copy)]
pub struct MergeConfig {
    /// Leaf level of the quadtree, where tiles are read.
    pub max_level: u8,
    /// Degree-space region of interest as `[west, south, east, north]`.
    pub bbox: [f64; 4],
    /// Polygons below this degree-space area are dropped as slivers.
    pub area_epsilon: f64,
    /// Features above this vertex count are written without further stitching.
    pub max_vertices: usize,
    /// Maximum pixel gap bridged between free line ends.
    pub stitch_distance: f64,
    pub progress: bool,
}

impl Default for MergeConfig {
    fn default() -> MergeConfig {
        MergeConfig {
            max_level: DEFAULT_MAX_LEVEL,
            bbox: WORLD_BBOX,
            area_epsilon: DEFAULT_AREA_EPSILON,
            max_vertices: DEFAULT_MAX_VERTICES,
            stitch_distance: DEFAULT_STITCH_DISTANCE,
            progress: true,
        }
    }
}

impl MergeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_level > MAX_SUPPORTED_LEVEL {
            bail!(
                "max level {} exceeds the supported maximum of {}",
                self.max_level,
                MAX_SUPPORTED_LEVEL
            );
        }
        let [west, south, east, north] = self.bbox;
        if !self.bbox.iter().all(|v| v.is_finite()) {
            bail!("bbox components must be finite");
        }
        if west >= east || south >= north {
            bail!("bbox must be ordered west < east and south < north");
        }
        if self.area_epsilon < 0.0 || !self.area_epsilon.is_finite() {
            bail!("area epsilon must be a non-negative finite number");
        }
        if self.stitch_distance < 0.0 || !self.stitch_distance.is_finite() {
            bail!("stitch distance must be a non-negative finite number");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        MergeConfig::default().validate().unwrap();
    }

    #[test]
    fn inverted_bbox_is_rejected() {
        let config = MergeConfig {
            bbox: [10.0, 0.0, -10.0, 5.0],
            ..MergeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn too_deep_level_is_rejected() {
        let config = MergeConfig {
            max_level: MAX_SUPPORTED_LEVEL + 1,
            ..MergeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
