//! Raster sources feeding the join driver.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use gdal::Dataset;
use tracing::debug;

use crate::align::extent_from_geo_transform;
use crate::error::{Error, Result};
use crate::model::{Extent, RasterGrid};

/// Supplies decoded grids by path.
pub trait RasterSource {
    /// `Ok(None)` means there is definitively no raster at `path`; the driver
    /// records the layer as skipped.
    fn read(&self, path: &Path) -> Result<Option<RasterGrid>>;
}

impl<S: RasterSource + ?Sized> RasterSource for &S {
    fn read(&self, path: &Path) -> Result<Option<RasterGrid>> {
        (**self).read(path)
    }
}

/// A raster read through GDAL together with the metadata the grid itself
/// does not carry.
#[derive(Debug, Clone)]
pub struct GdalRaster {
    pub grid: RasterGrid,
    pub projection: String,
    pub data_type: String,
}

/// Reads band 1 of any GDAL-readable raster.
#[derive(Debug, Clone, Default)]
pub struct GdalRasterSource {
    fallback_no_data: Option<f64>,
}

impl GdalRasterSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sentinel used for bands that declare no nodata value. Without one
    /// such bands are rejected as `InvalidInput`.
    pub fn with_fallback_no_data(mut self, no_data: f64) -> Self {
        self.fallback_no_data = Some(no_data);
        self
    }

    pub fn read_full(&self, path: &Path) -> Result<Option<GdalRaster>> {
        if !path.is_file() {
            return Ok(None);
        }

        let dataset = Dataset::open(path)?;
        let gt = dataset.geo_transform()?;
        if gt[2] != 0.0 || gt[4] != 0.0 {
            return Err(Error::invalid_input(format!(
                "{}: rotated geotransforms are not supported",
                path.display()
            )));
        }
        if gt[5] >= 0.0 {
            return Err(Error::invalid_input(format!(
                "{}: row pitch {} is not north-up",
                path.display(),
                gt[5]
            )));
        }
        let cell_size = gt[1];
        if (gt[5].abs() - cell_size).abs() > cell_size * 1e-9 {
            return Err(Error::invalid_input(format!(
                "{}: cells are not square ({} x {})",
                path.display(),
                gt[1],
                gt[5]
            )));
        }

        let (columns, rows) = dataset.raster_size();
        let extent = extent_from_geo_transform(&gt, columns, rows);

        let band = dataset.rasterband(1)?;
        let no_data_value = band
            .no_data_value()
            .or(self.fallback_no_data)
            .ok_or_else(|| {
                Error::invalid_input(format!("{}: band has no nodata value", path.display()))
            })?;
        let data_type = band.band_type().name();

        let buffer = band.read_as::<f64>((0, 0), (columns, rows), (columns, rows), None)?;
        let (_, samples) = buffer.into_shape_and_vec();

        debug!(
            "Read {:?}: {}x{} cells of {} at {}",
            path, columns, rows, data_type, cell_size
        );

        let grid = RasterGrid::new(samples, columns, rows, cell_size, extent, no_data_value)?;
        Ok(Some(GdalRaster {
            grid,
            projection: dataset.projection(),
            data_type,
        }))
    }
}

impl RasterSource for GdalRasterSource {
    fn read(&self, path: &Path) -> Result<Option<RasterGrid>> {
        Ok(self.read_full(path)?.map(|r| r.grid))
    }
}

/// Grids held in memory, keyed by the path the driver asks for.
#[derive(Debug, Clone, Default)]
pub struct MemoryRasterSource {
    grids: HashMap<PathBuf, RasterGrid>,
}

impl MemoryRasterSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, grid: RasterGrid) {
        self.grids.insert(path.into(), grid);
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }
}

impl RasterSource for MemoryRasterSource {
    fn read(&self, path: &Path) -> Result<Option<RasterGrid>> {
        Ok(self.grids.get(path).cloned())
    }
}

/// Geometry summary of a raster file.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub cell_size: f64,
    pub columns: usize,
    pub rows: usize,
    pub extent: Extent,
    pub data_type: String,
    pub no_data_value: Option<f64>,
}

impl RasterInfo {
    pub fn read(path: &Path) -> Result<Self> {
        let dataset = Dataset::open(path)?;
        let gt = dataset.geo_transform()?;
        let (columns, rows) = dataset.raster_size();
        let band = dataset.rasterband(1)?;
        Ok(Self {
            cell_size: gt[1],
            columns,
            rows,
            extent: extent_from_geo_transform(&gt, columns, rows),
            data_type: band.band_type().name(),
            no_data_value: band.no_data_value(),
        })
    }
}

impl fmt::Display for RasterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  cell size : {}", self.cell_size)?;
        writeln!(f, "  columns   : {}\n  rows      : {}", self.columns, self.rows)?;
        writeln!(f, "  extent    : {}", self.extent)?;
        writeln!(f, "  data type : {}", self.data_type)?;
        match self.no_data_value {
            Some(v) => write!(f, "  nodata    : {}", v),
            None => write!(f, "  nodata    : none"),
        }
    }
}
