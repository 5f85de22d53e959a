use thiserror::Error;

/// Failure kinds shared by every crate in the workspace.
///
/// Catalog-level variants (`DataLoad`, `DimensionMismatch`, `ModelMismatch`,
/// `InvalidConfig`) abort the unit of work. Item-level variants
/// (`ImageNotFound`, `ImageDecode`, `Encoding`, `RemoteFetch`, `Timeout`) are
/// meant to be recorded against one product or one query and skipped.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Data load failed: {0}")]
    DataLoad(String),

    #[error("Dimension mismatch: expected {expected} components, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Model mismatch: catalog was embedded with '{catalog}', query uses '{query}'")]
    ModelMismatch { catalog: String, query: String },

    #[error("Image decode failed: {0}")]
    ImageDecode(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Remote fetch failed: {0}")]
    RemoteFetch(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error only concerns a single item (product image, query
    /// image) and the surrounding batch may carry on.
    pub fn is_item_level(&self) -> bool {
        matches!(
            self,
            Error::ImageNotFound(_)
                | Error::ImageDecode(_)
                | Error::Encoding(_)
                | Error::RemoteFetch(_)
                | Error::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
