pub mod align;
pub mod error;
pub mod join;
pub mod layers;
pub mod model;
pub mod pipeline;
pub mod reader;
pub mod writer;

pub use align::{align_extent, columns_rows_from_extent, extent_from_origin};
pub use error::{Error, Result};
pub use join::{
    join_into, merge_into, rasterize, AttributeField, AttributeSchema, LayerRole,
    PointCollection, RasterPoints,
};
pub use layers::{LayerSpec, StackConfig, ZRange};
pub use model::{Extent, Point, PointKey, RasterGrid};
pub use pipeline::{JoinReport, StackJoiner};
pub use reader::{GdalRasterSource, MemoryRasterSource, RasterSource};
pub use writer::{CsvWriter, GeoTiffWriter};
