use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::feature::Feature;

/// Per-layer GeoJSONL writers, opened lazily on the first feature of each
/// layer. Output files are newline-delimited GeoJSON Feature objects.
pub struct LayerSink {
    directory: PathBuf,
    writers: BTreeMap<String, BufWriter<File>>,
}

impl LayerSink {
    pub fn new(directory: impl AsRef<Path>) -> Result<LayerSink> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)
            .with_context(|| format!("creating output directory {}", directory.display()))?;
        Ok(LayerSink {
            directory,
            writers: BTreeMap::new(),
        })
    }

    pub fn write(&mut self, feature: &Feature) -> Result<()> {
        let writer = match self.writers.entry(layer_file_name(&feature.layer)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = self.directory.join(entry.key());
                let file = File::create(&path)
                    .with_context(|| format!("creating layer file {}", path.display()))?;
                entry.insert(BufWriter::new(file))
            }
        };
        serde_json::to_writer(&mut *writer, &feature.to_geojson())
            .with_context(|| format!("serializing feature of layer {:?}", feature.layer))?;
        writer
            .write_all(b"\n")
            .with_context(|| format!("writing feature of layer {:?}", feature.layer))?;
        Ok(())
    }

    pub fn layer_count(&self) -> usize {
        self.writers.len()
    }

    pub fn finish(mut self) -> Result<()> {
        for (name, writer) in &mut self.writers {
            writer
                .flush()
                .with_context(|| format!("flushing layer file {name:?}"))?;
        }
        Ok(())
    }
}

/// File name for a layer: lowercased, whitespace replaced by underscores.
pub fn layer_file_name(layer: &str) -> String {
    let mut name: String = layer
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    name.push_str(".geojsonl");
    name
}
