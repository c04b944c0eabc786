use std::io::{BufRead, Seek};

use ndarray::{Array2, ArrayView2, Axis, concatenate};
use tracing::debug;

use crate::{
    ark_codec::read_utterance,
    error::{FeedError, Result},
    feature_source::FeatureSource,
    label_store::LabelStore,
    teacher_stream::TeacherPredictions,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkData {
    pub features: Array2<f32>,
    pub targets: Array2<f32>,
    pub utterances: usize,
}

impl ChunkData {
    pub fn num_frames(&self) -> usize {
        self.features.nrows()
    }
}

pub struct ChunkLoader<F, R> {
    features: F,
    predictions: TeacherPredictions<R>,
    labels: LabelStore,
    input_feat_dim: usize,
    output_feat_dim: usize,
}

impl<F: FeatureSource, R: BufRead + Seek> ChunkLoader<F, R> {
    pub fn new(
        features: F,
        predictions: TeacherPredictions<R>,
        labels: LabelStore,
        input_feat_dim: usize,
        output_feat_dim: usize,
    ) -> Self {
        Self {
            features,
            predictions,
            labels,
            input_feat_dim,
            output_feat_dim,
        }
    }

    pub fn num_split(&self) -> usize {
        self.labels.num_split()
    }

    pub fn input_feat_dim(&self) -> usize {
        self.input_feat_dim
    }

    pub fn output_feat_dim(&self) -> usize {
        self.output_feat_dim
    }

    /// Load chunk `chunk` (1-based).
    ///
    /// Utterances without labels are read and dropped. Loading the last chunk rewinds the
    /// teacher predictions so the next epoch starts from the top.
    pub fn load_chunk(&mut self, chunk: usize) -> Result<ChunkData> {
        let labels = self.labels.load_partition(chunk)?;
        let mut stream = self.features.open_chunk(chunk)?;

        let mut feats = Vec::new();
        let mut targets = Vec::new();
        let mut position = 0;
        let mut skipped = 0;
        while let Some(feat) = read_utterance(&mut stream)? {
            let pred = match self.predictions.next_utterance()? {
                Some(pred) if pred.id == feat.id => pred,
                other => {
                    return Err(FeedError::StreamDesync {
                        chunk,
                        position,
                        features: feat.id,
                        predictions: other.map(|p| p.id),
                    });
                }
            };
            position += 1;

            let Some(frames) = labels.get(&feat.id) else {
                skipped += 1;
                continue;
            };
            check_width(&feat.id, "feature matrix", self.input_feat_dim, feat.matrix.ncols())?;
            check_width(&pred.id, "teacher prediction", self.output_feat_dim, pred.matrix.ncols())?;
            let rows = feat.matrix.nrows();
            if rows != pred.matrix.nrows() || rows != frames.len() {
                return Err(FeedError::FrameCountMismatch {
                    utt_id: feat.id,
                    features: rows,
                    labels: frames.len(),
                    predictions: pred.matrix.nrows(),
                });
            }
            targets.push(combine_targets(&feat.id, frames, pred.matrix, self.output_feat_dim)?);
            feats.push(feat.matrix);
        }
        self.features.close_chunk(stream)?;

        if chunk == self.num_split() {
            self.predictions.rewind()?;
            debug!(chunk, "rewound teacher predictions");
        }

        let data = ChunkData {
            features: stack(&feats, self.input_feat_dim)?,
            targets: stack(&targets, self.output_feat_dim)?,
            utterances: feats.len(),
        };
        debug!(
            chunk,
            utterances = data.utterances,
            skipped,
            frames = data.num_frames(),
            "loaded chunk"
        );
        Ok(data)
    }

    pub fn close(self) -> Result<()> {
        drop(self.predictions);
        self.labels.close()
    }
}

/// One-hot hard labels added to the teacher's soft predictions, frame by frame.
///
/// The sum is not renormalised.
pub fn combine_targets(
    utt_id: &str,
    labels: &[u32],
    soft: Array2<f32>,
    num_classes: usize,
) -> Result<Array2<f32>> {
    if labels.len() != soft.nrows() {
        return Err(FeedError::FrameCountMismatch {
            utt_id: utt_id.to_string(),
            features: soft.nrows(),
            labels: labels.len(),
            predictions: soft.nrows(),
        });
    }
    check_width(utt_id, "teacher prediction", num_classes, soft.ncols())?;

    let mut target = soft;
    for (row, &label) in labels.iter().enumerate() {
        let class = label as usize;
        if class >= num_classes {
            return Err(FeedError::LabelOutOfRange {
                utt_id: utt_id.to_string(),
                label,
                num_classes,
            });
        }
        target[[row, class]] += 1.0;
    }
    Ok(target)
}

fn check_width(utt_id: &str, what: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(FeedError::DimensionMismatch {
            utt_id: utt_id.to_string(),
            what,
            expected,
            found,
        })
    }
}

fn stack(parts: &[Array2<f32>], cols: usize) -> Result<Array2<f32>> {
    if parts.is_empty() {
        return Ok(Array2::zeros((0, cols)));
    }
    let views = parts.iter().map(|p| p.view()).collect::<Vec<ArrayView2<'_, f32>>>();
    Ok(concatenate(Axis(0), &views)?)
}
