//! Error types and result alias for the crate.
//!
//! A layer that has no backing raster is not an error: the join driver records
//! it as a [`crate::pipeline::SkippedLayer`] and keeps going.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Non-positive cell size or an extent with `min >= max`.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// A raster whose shape or nodata sentinel cannot be trusted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown attribute '{name}'")]
    UnknownAttribute { name: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Gdal(#[from] gdal::errors::GdalError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub fn invalid_geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Errors that concern a single raster and should not abort a batch run.
    pub fn is_per_raster(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::Gdal(_))
    }
}
