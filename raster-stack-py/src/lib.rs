use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use std::path::Path;

use raster_stack::error::Error;
use raster_stack::{
    CsvWriter, Extent, GdalRasterSource, PointKey, StackConfig, StackJoiner, ZRange,
};

type PyExtent = (f64, f64, f64, f64);

#[pymodule]
#[pyo3(name = "raster_stack")]
fn raster_stack_module(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(columns_rows_from_extent, m)?)?;
    m.add_function(wrap_pyfunction!(extent_from_origin, m)?)?;
    m.add_function(wrap_pyfunction!(align_extent, m)?)?;
    m.add_function(wrap_pyfunction!(point_key, m)?)?;
    m.add_function(wrap_pyfunction!(z_levels, m)?)?;
    m.add_function(wrap_pyfunction!(join_stack, m)?)?;
    Ok(())
}

fn to_py_err(e: Error) -> PyErr {
    match e {
        Error::Io(_) | Error::Gdal(_) => PyErr::new::<PyIOError, _>(e.to_string()),
        _ => PyErr::new::<PyValueError, _>(e.to_string()),
    }
}

fn to_extent(e: PyExtent) -> Extent {
    Extent::new(e.0, e.1, e.2, e.3)
}

fn from_extent(e: Extent) -> PyExtent {
    (e.min_x, e.min_y, e.max_x, e.max_y)
}

/// (columns, rows) spanned by `extent` = (minx, miny, maxx, maxy).
#[pyfunction]
pub fn columns_rows_from_extent(extent: PyExtent, cell_size: f64) -> PyResult<(usize, usize)> {
    raster_stack::columns_rows_from_extent(&to_extent(extent), cell_size).map_err(to_py_err)
}

#[pyfunction]
pub fn extent_from_origin(
    origin_x: f64,
    origin_y: f64,
    cell_size: f64,
    row_signed_cell_size: f64,
    columns: usize,
    rows: usize,
) -> PyExtent {
    from_extent(raster_stack::extent_from_origin(
        origin_x,
        origin_y,
        cell_size,
        row_signed_cell_size,
        columns,
        rows,
    ))
}

#[pyfunction]
pub fn align_extent(extent: PyExtent, cell_size: f64) -> PyResult<PyExtent> {
    raster_stack::align_extent(&to_extent(extent), cell_size)
        .map(from_extent)
        .map_err(to_py_err)
}

/// Coordinate key string, e.g. `"50_50_1.50"`.
#[pyfunction]
pub fn point_key(x: f64, y: f64, z: f64) -> String {
    PointKey::from_coords(x, y, z).to_string()
}

#[pyfunction]
pub fn z_levels(start: f64, end: f64, step: f64) -> PyResult<Vec<f64>> {
    ZRange::new(start, end, step).levels().map_err(to_py_err)
}

/// Runs a YAML stack configuration and writes the point CSV.
///
/// Returns the number of points written and the paths of skipped rasters.
#[pyfunction]
#[pyo3(signature = (config_path, output_csv, overwrite=false))]
pub fn join_stack(
    py: Python<'_>,
    config_path: &str,
    output_csv: &str,
    overwrite: bool,
) -> PyResult<(usize, Vec<String>)> {
    let config = StackConfig::load(Path::new(config_path)).map_err(to_py_err)?;

    let report = py
        .allow_threads(|| StackJoiner::new(&config, GdalRasterSource::new()).run())
        .map_err(to_py_err)?;

    let rows = CsvWriter::new()
        .overwrite(overwrite)
        .write(&report.collection, Path::new(output_csv))
        .map_err(|e| {
            PyErr::new::<PyIOError, _>(format!("Failed to write {}: {:#}", output_csv, e))
        })?;

    let skipped = report
        .skipped
        .iter()
        .map(|s| s.path.display().to_string())
        .collect();
    Ok((rows, skipped))
}
