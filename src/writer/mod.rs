use anyhow::{Context, Result};
use gdal::raster::Buffer;
use gdal::DriverManager;
use std::path::Path;

use crate::align::{columns_rows_from_extent, geo_transform_for};
use crate::model::{Extent, RasterGrid};
use crate::reader::GdalRaster;

pub mod csv;

pub use self::csv::CsvWriter;

#[derive(Default)]
pub struct GeoTiffWriter {}

impl GeoTiffWriter {
    pub fn new() -> Self {
        Self {}
    }

    /// Writes `grid` as a single-band Float64 GeoTIFF at its own extent.
    pub fn write(&self, grid: &RasterGrid, projection: &str, output_path: &Path) -> Result<()> {
        self.write_standard(grid, &grid.extent, projection, output_path)
    }

    /// Writes a copy of `raster` whose upper-left corner is moved to the
    /// aligned extent's. Samples are not resampled; the aligned extent must
    /// span the same number of cells as the source.
    pub fn write_aligned(
        &self,
        raster: &GdalRaster,
        aligned: &Extent,
        output_path: &Path,
    ) -> Result<()> {
        let grid = &raster.grid;
        let (columns, rows) = columns_rows_from_extent(aligned, grid.cell_size)?;
        if (columns, rows) != (grid.columns, grid.rows) {
            anyhow::bail!(
                "aligned extent {} spans {}x{} cells, source has {}x{}",
                aligned,
                columns,
                rows,
                grid.columns,
                grid.rows
            );
        }

        tracing::info!(
            "Aligning {} x {} raster: {} -> {}",
            columns,
            rows,
            grid.extent,
            aligned
        );

        self.write_standard(grid, aligned, &raster.projection, output_path)
    }

    fn write_standard(
        &self,
        grid: &RasterGrid,
        extent: &Extent,
        projection: &str,
        output_path: &Path,
    ) -> Result<()> {
        let driver =
            DriverManager::get_driver_by_name("GTiff").context("Failed to get GTiff driver")?;

        let (rows, cols) = grid.shape();
        let mut dataset = driver
            .create_with_band_type::<f64, _>(output_path, cols, rows, 1)
            .context("Failed to create dataset")?;

        self.set_geo_metadata(&mut dataset, extent, grid.cell_size, projection)?;

        let mut band = dataset.rasterband(1).context("Failed to get raster band")?;

        band.set_no_data_value(Some(grid.no_data_value))
            .context("Failed to set no data value")?;

        // GDAL expects row-major order
        let mut buffer = Buffer::new((cols, rows), grid.samples.clone());
        band.write((0, 0), (cols, rows), &mut buffer)
            .context("Failed to write raster data")?;

        Ok(())
    }

    fn set_geo_metadata(
        &self,
        dataset: &mut gdal::Dataset,
        extent: &Extent,
        cell_size: f64,
        projection: &str,
    ) -> Result<()> {
        dataset
            .set_geo_transform(&geo_transform_for(extent, cell_size))
            .context("Failed to set geo transform")?;

        if projection.is_empty() {
            tracing::warn!("Source raster has no projection; output is written without one");
        } else {
            dataset
                .set_projection(projection)
                .context("Failed to set projection")?;
        }

        Ok(())
    }
}
