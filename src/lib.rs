//! Streaming minibatch feed for teacher-student training of acoustic models.
//!
//! Spliced Kaldi features, hard alignment labels and the teacher's soft predictions are joined
//! per utterance, chunk by chunk, into a shuffled rolling window that is served as fixed-size
//! minibatches.

pub mod ark_codec;
pub mod batch_generator;
pub mod chunk_loader;
pub mod config;
pub mod error;
pub mod feature_source;
pub mod kaldi_tools;
pub mod label_store;
pub mod setup;
pub mod teacher_stream;
pub mod tensor_batches;

pub use batch_generator::{Batch, BatchGenerator};
pub use chunk_loader::{ChunkData, ChunkLoader};
pub use config::{GeneratorConfig, KaldiTools};
pub use error::{FeedError, Result};
pub use feature_source::{FeatureSource, SpliceFeats};
pub use label_store::{LabelIndex, LabelPartition, LabelStore};
pub use teacher_stream::TeacherPredictions;
pub use tensor_batches::TensorBatches;
