use std::fmt;

use crate::align::columns_rows_from_extent;
use crate::error::{Error, Result};

/// Outer bounding box of a grid in ground coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Fails with `InvalidGeometry` unless every corner is finite and
    /// `min < max` on both axes.
    pub fn validate(&self) -> Result<()> {
        let corners = [self.min_x, self.min_y, self.max_x, self.max_y];
        if corners.iter().any(|v| !v.is_finite()) {
            return Err(Error::invalid_geometry(format!(
                "extent has non-finite corners: {}",
                self
            )));
        }
        if self.min_x >= self.max_x || self.min_y >= self.max_y {
            return Err(Error::invalid_geometry(format!(
                "extent min must be below max: {}",
                self
            )));
        }
        Ok(())
    }

    /// Upper-left / lower-right corners `(ulx, uly, lrx, lry)`, the order
    /// `gdal_translate -a_ullr` expects.
    pub fn ullr(&self) -> (f64, f64, f64, f64) {
        (self.min_x, self.max_y, self.max_x, self.min_y)
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}

impl From<[f64; 4]> for Extent {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// A decoded single-band raster.
///
/// `samples` is row-major with row 0 the northernmost row, so the sample of
/// row `r`, column `c` lives at `r * columns + c`.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    pub samples: Vec<f64>,
    pub columns: usize,
    pub rows: usize,
    pub cell_size: f64,
    pub extent: Extent,
    pub no_data_value: f64,
}

impl RasterGrid {
    pub fn new(
        samples: Vec<f64>,
        columns: usize,
        rows: usize,
        cell_size: f64,
        extent: Extent,
        no_data_value: f64,
    ) -> Result<Self> {
        let grid = Self {
            samples,
            columns,
            rows,
            cell_size,
            extent,
            no_data_value,
        };
        grid.validate()?;
        Ok(grid)
    }

    /// Checks the invariants the rasterizer relies on.
    pub fn validate(&self) -> Result<()> {
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(Error::invalid_input(format!(
                "cell size must be positive, got {}",
                self.cell_size
            )));
        }
        if self.columns == 0 || self.rows == 0 {
            return Err(Error::invalid_input(format!(
                "grid dimensions must be positive, got {}x{}",
                self.columns, self.rows
            )));
        }
        let expected = self.rows.checked_mul(self.columns).ok_or_else(|| {
            Error::invalid_input(format!(
                "grid dimensions overflow: {}x{}",
                self.columns, self.rows
            ))
        })?;
        if self.samples.len() != expected {
            return Err(Error::invalid_input(format!(
                "sample array holds {} values but the grid declares {} rows x {} columns",
                self.samples.len(),
                self.rows,
                self.columns
            )));
        }
        if let Err(e) = self.extent.validate() {
            return Err(Error::invalid_input(format!("grid extent: {}", e)));
        }
        let spanned = columns_rows_from_extent(&self.extent, self.cell_size)?;
        if spanned != (self.columns, self.rows) {
            return Err(Error::invalid_input(format!(
                "extent {} spans {}x{} cells of {}, the grid declares {}x{}",
                self.extent, spanned.0, spanned.1, self.cell_size, self.columns, self.rows
            )));
        }
        Ok(())
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.columns)
    }

    pub fn row(&self, r: usize) -> &[f64] {
        let start = r * self.columns;
        &self.samples[start..start + self.columns]
    }

    /// Compares against this grid's own sentinel. A NaN sentinel matches NaN
    /// samples, every other sentinel matches by exact equality.
    pub fn is_missing(&self, value: f64) -> bool {
        if self.no_data_value.is_nan() {
            value.is_nan()
        } else {
            value == self.no_data_value
        }
    }

    /// Center of the cell at (row, column).
    pub fn cell_center(&self, r: usize, c: usize) -> (f64, f64) {
        let half = self.cell_size / 2.0;
        (
            self.extent.min_x + half + c as f64 * self.cell_size,
            self.extent.max_y - half - r as f64 * self.cell_size,
        )
    }
}

/// One non-missing cell of one grid at one z-level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub value: f64,
}

impl Point {
    pub fn key(&self) -> PointKey {
        PointKey::from_coords(self.x, self.y, self.z)
    }
}

/// Coordinate identity of a point: x and y rounded to whole units, z rounded
/// to hundredths. Two points with equal keys are the same location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointKey {
    pub x: i64,
    pub y: i64,
    pub z_centi: i64,
}

impl PointKey {
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: x.round_ties_even() as i64,
            y: y.round_ties_even() as i64,
            z_centi: (z * 100.0).round_ties_even() as i64,
        }
    }
}

impl fmt::Display for PointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.z_centi < 0 { "-" } else { "" };
        let z = self.z_centi.unsigned_abs();
        write!(f, "{}_{}_{}{}.{:02}", self.x, self.y, sign, z / 100, z % 100)
    }
}
