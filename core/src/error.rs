//! Error type shared by the scan pipeline.
//!
//! Only a handful of variants are fatal for a whole scan (root enumeration,
//! config, glob compilation, grammar loading). Everything scoped to a single
//! file is caught by the scanner and reported as a skipped file instead.

use std::path::PathBuf;

use thiserror::Error;

pub type ScanResult<T> = Result<T, ScanError>;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot enumerate {}: {source}", path.display())]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid ignore glob: {0}")]
    Glob(#[from] globset::Error),

    #[error("failed to load Python grammar: {0}")]
    Language(#[from] tree_sitter::LanguageError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {size} bytes exceeds the {limit} byte limit")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("{path}: parser produced no syntax tree")]
    NoTree { path: String },

    #[error("{path}:{line}: syntax error")]
    Syntax { path: String, line: u32 },

    #[error("failed to read config {}: {source}", path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl ScanError {
    /// True when the error only concerns one file and the scan can go on.
    pub fn is_file_level(&self) -> bool {
        matches!(
            self,
            ScanError::Read { .. }
                | ScanError::TooLarge { .. }
                | ScanError::NoTree { .. }
                | ScanError::Syntax { .. }
        )
    }
}
