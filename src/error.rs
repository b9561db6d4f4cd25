use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Matrix dimensions are incompatible for a transform, dot product or comparison
    #[error("shape mismatch in {context}: {left:?} vs {right:?}")]
    ShapeMismatch {
        context: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },
    #[error("training set of {train_size} rows cannot be split into batches of {batch_size}")]
    InvalidBatching { train_size: usize, batch_size: usize },
    #[error("invalid probability {value} at row {row}, column {column}")]
    InvalidProbability { value: f64, row: usize, column: usize },
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn shape(
        context: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    ) -> Self {
        Error::ShapeMismatch {
            context,
            left,
            right,
        }
    }

    pub(crate) fn parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
