use thiserror::Error;

/// Errors raised while wiring, assembling or solving an equation system.
#[derive(Debug, Error)]
pub enum FvmError {
    /// Malformed term/operator wiring, e.g. a shared coefficient buffer whose
    /// shape does not match the grid, or an unknown quantity that does not exist.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("block matrix has not been constructed")]
    NotConstructed,
    #[error("invalid block index {index} (matrix has {count} sub-equations)")]
    InvalidBlock { index: usize, count: usize },
    #[error("not implemented: {0}")]
    NotImplemented(String),
    /// Singular matrix, non-finite values or a non-converging iteration.
    #[error("numeric failure: {0}")]
    NumericFailure(String),
}

impl FvmError {
    pub fn config(msg: impl Into<String>) -> Self {
        FvmError::Configuration(msg.into())
    }

    pub fn numeric(msg: impl Into<String>) -> Self {
        FvmError::NumericFailure(msg.into())
    }

    /// Numeric failures are the only errors a time stepper may retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FvmError::NumericFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, FvmError>;
