//! Coordinate registry errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CrsError {
    /// EPSG code not present in the registry
    #[error("unsupported CRS: EPSG:{0}")]
    UnsupportedEpsg(u32),

    /// CRS identifier in a form we do not understand
    #[error("unrecognised CRS identifier '{0}'")]
    Unrecognised(String),

    /// Point outside the CRS's declared domain, or not a finite coordinate
    #[error("coordinate ({x}, {y}) is outside the valid domain of EPSG:{epsg}")]
    OutOfDomain { epsg: u32, x: f64, y: f64 },

    /// Registry table failed to load or is inconsistent
    #[error("invalid CRS registry: {0}")]
    Registry(String),
}

impl CrsError {
    pub fn registry(detail: impl Into<String>) -> Self {
        CrsError::Registry(detail.into())
    }

    /// Whether the error stems from client input (as opposed to a broken
    /// registry table)
    pub fn is_client_error(&self) -> bool {
        !matches!(self, CrsError::Registry(_))
    }
}

pub type Result<T> = std::result::Result<T, CrsError>;
