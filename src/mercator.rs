use geo_types::{Coord, Rect};

/// Pixel extent of a single tile.
pub const TILE_EXTENT: u32 = 4096;

/// Deepest supported leaf level. `4096 * 2^16` still fits an f64 exactly.
pub const MAX_SUPPORTED_LEVEL: u8 = 16;

/// Quadtree tile coordinate. Invariant: `0 <= x, y < 2^z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileAddress {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileAddress {
    pub const ROOT: TileAddress = TileAddress { x: 0, y: 0, z: 0 };

    /// The four children one level down, in fixed visitation order:
    /// top-left, top-right, bottom-left, bottom-right.
    pub fn children(&self) -> [TileAddress; 4] {
        let (x, y, z) = (self.x * 2, self.y * 2, self.z + 1);
        [
            TileAddress { x, y, z },
            TileAddress { x: x + 1, y, z },
            TileAddress { x, y: y + 1, z },
            TileAddress { x: x + 1, y: y + 1, z },
        ]
    }
}

impl std::fmt::Display for TileAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Inclusive tile index range at one zoom level, used for bbox pruning.
#[derive(Debug, Clone, Copy)]
pub struct TileRange {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl TileRange {
    pub fn contains(&self, addr: TileAddress) -> bool {
        addr.x >= self.x0 && addr.x <= self.x1 && addr.y >= self.y0 && addr.y <= self.y1
    }

    pub fn tile_count(&self) -> u64 {
        u64::from(self.x1 - self.x0 + 1) * u64::from(self.y1 - self.y0 + 1)
    }
}

/// The global pixel grid spanned by the leaf level. All merge arithmetic
/// happens in this grid; degrees only appear at output time.
#[derive(Debug, Clone, Copy)]
pub struct PixelGrid {
    max_level: u8,
}

impl PixelGrid {
    pub fn new(max_level: u8) -> PixelGrid {
        debug_assert!(max_level <= MAX_SUPPORTED_LEVEL);
        PixelGrid { max_level }
    }

    pub fn max_level(&self) -> u8 {
        self.max_level
    }

    /// Side length of the global pixel grid: `4096 * 2^max_level`.
    pub fn size(&self) -> f64 {
        f64::from(TILE_EXTENT) * f64::from(1u32 << self.max_level)
    }

    /// Side length in pixels of one tile at level `z`.
    pub fn tile_span(&self, z: u8) -> f64 {
        f64::from(TILE_EXTENT) * f64::from(1u32 << (self.max_level - z))
    }

    /// Pixel rectangle covered by a tile.
    pub fn tile_bounds(&self, addr: TileAddress) -> Rect<f64> {
        let span = self.tile_span(addr.z);
        Rect::new(
            Coord {
                x: f64::from(addr.x) * span,
                y: f64::from(addr.y) * span,
            },
            Coord {
                x: f64::from(addr.x + 1) * span,
                y: f64::from(addr.y + 1) * span,
            },
        )
    }

    /// Inverse spherical-Mercator transform from global pixels to degrees.
    pub fn to_degrees(&self, c: Coord<f64>) -> Coord<f64> {
        let size = self.size();
        Coord {
            x: 360.0 * c.x / size - 180.0,
            y: 360.0 / std::f64::consts::PI
                * ((1.0 - c.y * 2.0 / size) * std::f64::consts::PI).exp().atan()
                - 90.0,
        }
    }

    /// Fractional tile coordinate of a lon/lat position at level `z`.
    pub fn degree_to_tile(lon: f64, lat: f64, z: u8) -> (f64, f64) {
        let n = f64::from(1u32 << z);
        let x = (lon + 180.0) / 360.0 * n;
        let y = (1.0 - lat.to_radians().tan().asinh() / std::f64::consts::PI) / 2.0 * n;
        (x, y)
    }

    /// Tile ranges per level covering a degree-space bbox `[w, s, e, n]`,
    /// indexed by `z` from 0 to `max_level`.
    pub fn level_ranges(&self, bbox: [f64; 4]) -> Vec<TileRange> {
        (0..=self.max_level)
            .map(|z| {
                let last = (1u32 << z) - 1;
                let (x0, y0) = Self::degree_to_tile(bbox[0], bbox[3], z);
                let (x1, y1) = Self::degree_to_tile(bbox[2], bbox[1], z);
                TileRange {
                    x0: clamp_tile(x0, last),
                    y0: clamp_tile(y0, last),
                    x1: clamp_tile(x1, last),
                    y1: clamp_tile(y1, last),
                }
            })
            .collect()
    }
}

fn clamp_tile(v: f64, last: u32) -> u32 {
    if !v.is_finite() {
        return if v < 0.0 { 0 } else { last };
    }
    let floored = v.floor();
    if floored < 0.0 {
        0
    } else if floored > f64::from(last) {
        last
    } else {
        floored as u32
    }
}
