//! The driving loop: every configured (layer, z-level) pair is located,
//! rasterized and folded into one point collection.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::join::{rasterize, FoldStats, PointCollection};
use crate::layers::{LayerSpec, StackConfig};
use crate::reader::RasterSource;

/// A (layer, z-level) pair with no backing raster.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedLayer {
    pub attribute: String,
    pub z: f64,
    pub path: PathBuf,
}

/// A (layer, z-level) pair whose raster could not be used.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedLayer {
    pub attribute: String,
    pub z: f64,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct JoinReport {
    pub collection: PointCollection,
    pub skipped: Vec<SkippedLayer>,
    pub failed: Vec<FailedLayer>,
    pub layers_processed: usize,
}

impl JoinReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }

    /// Records where all of the configured summary attributes are set.
    pub fn complete_points(&self, attributes: &[String]) -> Result<usize> {
        let names: Vec<&str> = attributes.iter().map(String::as_str).collect();
        self.collection.count_complete(&names)
    }
}

/// Folds a configured raster stack into a [`PointCollection`].
pub struct StackJoiner<'a, S> {
    config: &'a StackConfig,
    source: S,
    strict: bool,
}

impl<'a, S: RasterSource> StackJoiner<'a, S> {
    pub fn new(config: &'a StackConfig, source: S) -> Self {
        Self {
            config,
            source,
            strict: false,
        }
    }

    /// In strict mode an unusable raster aborts the run instead of being
    /// recorded as failed.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn run(&self) -> Result<JoinReport> {
        let z_levels = self.config.z_levels()?;
        info!(
            "Joining {} layers over {} z-levels ({} to {})",
            self.config.layers.len(),
            z_levels.len(),
            z_levels.first().copied().unwrap_or_default(),
            z_levels.last().copied().unwrap_or_default()
        );

        let mut report = JoinReport {
            collection: PointCollection::new(self.config.schema.clone()),
            skipped: Vec::new(),
            failed: Vec::new(),
            layers_processed: 0,
        };

        for layer in &self.config.layers {
            for &z in &z_levels {
                let path = layer.path_for(z, &self.config.side_labels);
                info!("Processing {},{}...", layer.attribute, z);

                match self.fold_layer(&mut report.collection, layer, z, &path) {
                    Ok(Some(stats)) => {
                        report.layers_processed += 1;
                        debug!(
                            "{} {} at z={}: {} created, {} updated, {} ignored",
                            layer.role,
                            layer.attribute,
                            z,
                            stats.created,
                            stats.updated,
                            stats.ignored
                        );
                    }
                    Ok(None) => {
                        warn!("Raster not found: {}", path.display());
                        report.skipped.push(SkippedLayer {
                            attribute: layer.attribute.clone(),
                            z,
                            path,
                        });
                    }
                    Err(e) if e.is_per_raster() && !self.strict => {
                        warn!("Raster unusable: {}: {}", path.display(), e);
                        report.failed.push(FailedLayer {
                            attribute: layer.attribute.clone(),
                            z,
                            path,
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        info!(
            "Data points found: {}, rasters skipped: {}, rasters failed: {}",
            report.collection.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Reads one raster and folds it. `Ok(None)` when the raster does not
    /// exist. The collection is untouched on any error.
    pub fn fold_layer(
        &self,
        collection: &mut PointCollection,
        layer: &LayerSpec,
        z: f64,
        path: &Path,
    ) -> Result<Option<FoldStats>> {
        let Some(grid) = self.source.read(path)? else {
            return Ok(None);
        };
        let points = rasterize(&grid, z)?;
        let stats = collection.fold(&points, &layer.attribute, layer.role)?;
        Ok(Some(stats))
    }
}
