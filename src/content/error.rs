//! Errors raised while reading content files

use std::path::PathBuf;
use thiserror::Error;

/// A content file could not be turned into metadata and body
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid front matter: {0}")]
    FrontMatter(#[from] serde_yaml::Error),

    #[error("front matter must be a mapping of keys to values")]
    NotAMapping,

    #[error("{path:?} has no usable slug")]
    EmptySlug { path: PathBuf },
}
