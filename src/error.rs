use std::{io, path::PathBuf};

use thiserror::Error;

/// End of a record stream is not represented here: readers return `Ok(None)` for it.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("corrupt ark record: {0}")]
    CorruptRecord(String),

    #[error("malformed alignment index at line {line}: {token:?} is not a class index")]
    MalformedIndex { line: usize, token: String },

    #[error(
        "feature and prediction streams out of sync in chunk {chunk} at utterance {position}: \
         features have {features:?}, predictions have {}",
        describe_prediction(.predictions)
    )]
    StreamDesync {
        chunk: usize,
        position: usize,
        features: String,
        predictions: Option<String>,
    },

    #[error("no label partition persisted for chunk {0}")]
    MissingLabelPartition(usize),

    #[error(
        "utterance {utt_id:?} has {features} feature frames, {labels} labels \
         and {predictions} prediction frames"
    )]
    FrameCountMismatch {
        utt_id: String,
        features: usize,
        labels: usize,
        predictions: usize,
    },

    #[error("utterance {utt_id:?}: {what} has {found} columns, expected {expected}")]
    DimensionMismatch {
        utt_id: String,
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("utterance {utt_id:?}: label {label} out of range for {num_classes} classes")]
    LabelOutOfRange {
        utt_id: String,
        label: u32,
        num_classes: usize,
    },

    #[error("invalid utterance id {0:?}")]
    InvalidUtteranceId(String),

    #[error("chunk {chunk} manifest missing: {}", .path.display())]
    MissingChunkManifest { chunk: usize, path: PathBuf },

    #[error("{tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("invalid configuration {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("corpus produced no frames in a whole epoch")]
    EmptyCorpus,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("array shape error")]
    Shape(#[from] ndarray::ShapeError),

    #[error("tensor conversion failed")]
    Tensor(#[from] candle_core::Error),

    #[error("label partition serialization failed")]
    Serialization(#[from] serde_json::Error),
}

impl FeedError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        FeedError::Io {
            context: context.into(),
            source,
        }
    }
}

fn describe_prediction(predictions: &Option<String>) -> String {
    match predictions {
        Some(id) => format!("{id:?}"),
        None => "end of stream".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
