use thiserror::Error;

pub type Result<T> = std::result::Result<T, FormatError>;

/// File-level failures. All of these are fatal to the whole run; there is
/// no row-granular recovery from a broken container.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unreadable archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("workbook has no worksheet entry")]
    MissingWorksheet,
    #[error("malformed worksheet xml: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl FormatError {
    /// True for plain I/O failures, the only file-level condition worth a
    /// whole-job re-attempt.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            FormatError::Io(_) | FormatError::Archive(zip::result::ZipError::Io(_))
        )
    }

    /// Missing source file is a permanent condition, unlike other I/O noise.
    pub fn is_not_found(&self) -> bool {
        match self {
            FormatError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            FormatError::Archive(zip::result::ZipError::FileNotFound) => true,
            FormatError::Archive(zip::result::ZipError::Io(err)) => {
                err.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}
