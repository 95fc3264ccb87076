use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use geo::Convert;
use geo_types::Geometry;
use mvt_reader::Reader;

use crate::feature::Properties;
use crate::mercator::{TILE_EXTENT, TileAddress};

/// A decoded feature as read from a tile, with geometry still in tile-local
/// pixel coordinates.
#[derive(Debug, Clone)]
pub struct RawFeature {
    pub geometry: Geometry<f64>,
    pub properties: Properties,
    pub layer: String,
}

/// Supplies leaf tiles to the merge. An absent tile yields an empty vec, a
/// corrupt one is an error.
pub trait TileSource {
    fn fetch(&self, addr: TileAddress) -> Result<Vec<RawFeature>>;
}

/// Reads tiles from a `{z}/{x}/{y}.pbf` directory tree, transparently
/// decompressing gzip payloads.
pub struct DirectoryTileSource {
    root: PathBuf,
}

impl DirectoryTileSource {
    pub fn new(root: impl AsRef<Path>) -> DirectoryTileSource {
        DirectoryTileSource {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl TileSource for DirectoryTileSource {
    fn fetch(&self, addr: TileAddress) -> Result<Vec<RawFeature>> {
        let path = self
            .root
            .join(addr.z.to_string())
            .join(addr.x.to_string())
            .join(format!("{}.pbf", addr.y));
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("reading tile {}", path.display()));
            }
        };
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let payload = decode_tile_payload(data)
            .with_context(|| format!("decompressing tile {}", path.display()))?;
        decode_tile(payload, addr)
    }
}

fn decode_tile_payload(data: Vec<u8>) -> Result<Vec<u8>> {
    if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
        let mut decoder = GzDecoder::new(&data[..]);
        let mut decoded = Vec::new();
        decoder.read_to_end(&mut decoded)?;
        Ok(decoded)
    } else {
        Ok(data)
    }
}

fn decode_tile(payload: Vec<u8>, addr: TileAddress) -> Result<Vec<RawFeature>> {
    let reader =
        Reader::new(payload).map_err(|err| anyhow::anyhow!("decode vector tile {addr}: {err}"))?;
    let layers = reader
        .get_layer_metadata()
        .map_err(|err| anyhow::anyhow!("read layer metadata of tile {addr}: {err}"))?;

    let mut raw_features = Vec::new();
    for layer in layers {
        if layer.extent != TILE_EXTENT {
            bail!(
                "layer {:?} of tile {addr} has extent {}, expected {}",
                layer.name,
                layer.extent,
                TILE_EXTENT
            );
        }
        let features = reader
            .get_features(layer.layer_index)
            .map_err(|err| anyhow::anyhow!("read features of tile {addr}: {err}"))?;
        for feature in features {
            let mut properties = Properties::new();
            if let Some(props) = feature.properties {
                for (key, value) in props {
                    if let Some(value) = property_to_json(value) {
                        properties.insert(key, value);
                    }
                }
            }
            let geometry: Geometry<f64> = feature.geometry.convert();
            raw_features.push(RawFeature {
                geometry,
                properties,
                layer: layer.name.clone(),
            });
        }
    }
    Ok(raw_features)
}

fn property_to_json(value: mvt_reader::feature::Value) -> Option<serde_json::Value> {
    match value {
        mvt_reader::feature::Value::String(text) => Some(serde_json::Value::String(text)),
        mvt_reader::feature::Value::Float(val) => Some(serde_json::json!(val)),
        mvt_reader::feature::Value::Double(val) => Some(serde_json::json!(val)),
        mvt_reader::feature::Value::Int(val) => Some(serde_json::json!(val)),
        mvt_reader::feature::Value::UInt(val) => Some(serde_json::json!(val)),
        mvt_reader::feature::Value::SInt(val) => Some(serde_json::json!(val)),
        mvt_reader::feature::Value::Bool(val) => Some(serde_json::Value::Bool(val)),
        mvt_reader::feature::Value::Null => None,
    }
}
