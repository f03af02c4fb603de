use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("format error in {}:{line}: {message}", path.display())]
    Format {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("cannot launch {program}: {message}")]
    ProcessLaunch { program: String, message: String },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("{0}")]
    MissingInput(String),

    #[error("config error: {0}")]
    Config(String),
}

impl FleetError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        FleetError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn format(path: &Path, line: usize, message: impl Into<String>) -> Self {
        FleetError::Format {
            path: path.to_path_buf(),
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
