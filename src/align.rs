//! Grid alignment arithmetic.
//!
//! Two rounding precisions are in play. Extents derived from a geotransform
//! are rounded to [`GEOTRANSFORM_PRECISION`] digits so they reproduce the
//! transform stored in the source file. Aligned extents are rounded to
//! [`ALIGN_PRECISION`] digits. Mixing the two makes resampled layers drift
//! by fractions of a cell.

use gdal::GeoTransform;

use crate::error::{Error, Result};
use crate::model::Extent;

pub const ALIGN_PRECISION: i32 = 8;
pub const GEOTRANSFORM_PRECISION: i32 = 9;

/// Rounds to `digits` decimals, ties to even.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round_ties_even() / scale
}

fn check_cell_size(cell_size: f64) -> Result<()> {
    if cell_size.is_finite() && cell_size > 0.0 {
        Ok(())
    } else {
        Err(Error::invalid_geometry(format!(
            "cell size must be positive, got {}",
            cell_size
        )))
    }
}

/// Number of (columns, rows) an extent spans at `cell_size`.
pub fn columns_rows_from_extent(extent: &Extent, cell_size: f64) -> Result<(usize, usize)> {
    check_cell_size(cell_size)?;
    extent.validate()?;
    let columns = (extent.width() / cell_size).round_ties_even();
    let rows = (extent.height() / cell_size).round_ties_even();
    Ok((columns as usize, rows as usize))
}

/// Extent of a grid given its upper-left origin and pitches.
///
/// `row_signed_cell_size` is negative for north-up rasters, so `min_y` lies
/// below the origin.
pub fn extent_from_origin(
    origin_x: f64,
    origin_y: f64,
    cell_size: f64,
    row_signed_cell_size: f64,
    columns: usize,
    rows: usize,
) -> Extent {
    let min_x = origin_x;
    let min_y = origin_y + rows as f64 * row_signed_cell_size;
    let max_x = origin_x + columns as f64 * cell_size;
    let max_y = origin_y;
    Extent::new(
        round_to(min_x, GEOTRANSFORM_PRECISION),
        round_to(min_y, GEOTRANSFORM_PRECISION),
        round_to(max_x, GEOTRANSFORM_PRECISION),
        round_to(max_y, GEOTRANSFORM_PRECISION),
    )
}

/// [`extent_from_origin`] over a GDAL geotransform. Rotation terms are ignored.
pub fn extent_from_geo_transform(gt: &GeoTransform, columns: usize, rows: usize) -> Extent {
    extent_from_origin(gt[0], gt[3], gt[1], gt[5], columns, rows)
}

/// Snaps the lower-left corner to a multiple of `cell_size`, keeping the
/// column and row counts of the unsnapped extent.
pub fn align_extent(extent: &Extent, cell_size: f64) -> Result<Extent> {
    let (columns, rows) = columns_rows_from_extent(extent, cell_size)?;

    let min_x = (extent.min_x / cell_size).round_ties_even() * cell_size;
    let min_y = (extent.min_y / cell_size).round_ties_even() * cell_size;
    let max_x = min_x + columns as f64 * cell_size;
    let max_y = min_y + rows as f64 * cell_size;

    Ok(Extent::new(
        round_to(min_x, ALIGN_PRECISION),
        round_to(min_y, ALIGN_PRECISION),
        round_to(max_x, ALIGN_PRECISION),
        round_to(max_y, ALIGN_PRECISION),
    ))
}

/// North-up geotransform placing `extent`'s upper-left corner at the origin.
pub fn geo_transform_for(extent: &Extent, cell_size: f64) -> GeoTransform {
    [extent.min_x, cell_size, 0.0, extent.max_y, 0.0, -cell_size]
}
