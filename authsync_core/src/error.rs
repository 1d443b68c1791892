/// Errors raised by the key model, the text codec and tree operations.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum KeyTreeError {
    #[error("invalid key algorithm: {0:?}")]
    InvalidAlgorithm(String),

    #[error("malformed line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },

    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// A leaf and a group met at the same path.
    #[error("merge conflict at {path:?}: leaf and group cannot be merged")]
    MergeConflict { path: String },

    #[error("no key at path {path:?}")]
    PathNotFound { path: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl KeyTreeError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedLine {
            line,
            reason: reason.into(),
        }
    }

    /// Prefixes the path carried by a conflict or lookup error with `segment/`.
    pub(crate) fn nested_under(self, segment: &str) -> Self {
        match self {
            Self::MergeConflict { path } => Self::MergeConflict {
                path: format!("{segment}/{path}"),
            },
            Self::PathNotFound { path } => Self::PathNotFound {
                path: format!("{segment}/{path}"),
            },
            other => other,
        }
    }
}

pub type KeyTreeResult<T> = std::result::Result<T, KeyTreeError>;
