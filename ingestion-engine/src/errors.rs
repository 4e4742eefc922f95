use catalog_store::StoreError;
use thiserror::Error;
use workbook_source::FormatError;

pub type Result<T> = std::result::Result<T, RunError>;

/// Run-level failures that escalate past the batch loop. Row-level problems
/// never surface here; they are absorbed into the aggregate stats.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("file error: {0}")]
    Format(#[from] FormatError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl RunError {
    /// Whether a whole-job re-attempt could plausibly succeed. Format and
    /// missing-file failures are permanent; plain I/O noise is not.
    pub fn is_transient(&self) -> bool {
        match self {
            RunError::Format(err) => err.is_io() && !err.is_not_found(),
            RunError::Store(_) => false,
        }
    }
}
