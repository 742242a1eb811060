use std::path::PathBuf;

use thiserror::Error;

/// Failure modes of the analysis pipeline.
///
/// Every variant is fatal for the invocation that produced it and propagates
/// to the entry point unchanged; there are no retries and no partial-result
/// suppression.
#[derive(Error, Debug)]
pub enum Error {
    /// A malformed input table or data point.
    #[error("invalid input ({context}): {msg}")]
    InputFormat { context: String, msg: String },

    /// An invalid combination of sampler parameters.
    #[error("invalid sampler configuration: {msg}")]
    Configuration { msg: String },

    /// A restart or summary request against a directory with no analysis.
    #[error("no analysis found under {path:?}")]
    MissingAnalysis { path: PathBuf },

    /// A degenerate model, either at likelihood construction or during an
    /// iteration.
    #[error("degenerate model: {msg}")]
    Model { msg: String },

    /// A store read of a key that was never set.
    #[error("results store key '{key}' was never set")]
    KeyNotFound { key: String },

    /// An output directory that could not be created.
    #[error("could not create directory {path:?}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A trace append whose payload kind differs from earlier appends.
    #[error("trace '{name}' already holds entries of a different kind")]
    TraceKind { name: String },

    /// A store document that cannot be interpreted.
    #[error("results store is inconsistent: {msg}")]
    InvalidStore { msg: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
