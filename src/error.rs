//! Error type shared by the loader, the trainer and the reporter.

use std::{io, path::PathBuf};

use burn::record::RecorderError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unable to write the result manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unable to encode graph cache: {0}")]
    CacheEncode(#[from] bincode::error::EncodeError),

    #[error("Unable to decode graph cache {path:?}: {source}")]
    CacheDecode {
        path: PathBuf,
        #[source]
        source: bincode::error::DecodeError,
    },

    #[error("Model record error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Progress bar template error: {0}")]
    Progress(#[from] indicatif::style::TemplateError),

    #[error("Graph construction error: {0}")]
    Graph(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}
