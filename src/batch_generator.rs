//! The rolling-window minibatch generator.
//!
//! The window holds the frames not yet served. Before each batch, while fewer than
//! `batch_size + 1` frames remain past the pointer, the next chunk is appended to what is left
//! and the whole window reshuffled. The refill that loads the last chunk of an epoch arms a
//! one-shot escape from that loop, so the epoch ends with a single short batch instead of
//! rolling into the next epoch.

use std::{
    fs::File,
    io::{BufRead, BufReader, Seek},
    path::Path,
};

use ndarray::{Array2, Axis, concatenate, s};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tracing::{debug, info};

use crate::{
    chunk_loader::ChunkLoader,
    config::GeneratorConfig,
    error::{FeedError, Result},
    feature_source::{FeatureSource, SpliceFeats},
    label_store::{LabelIndex, LabelStore},
    setup,
    teacher_stream::TeacherPredictions,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub features: Array2<f32>,
    pub targets: Array2<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.features.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowState {
    /// Refill whenever the window runs low.
    Streaming,
    /// The last chunk of the epoch is loaded; the next low window is served as is.
    EpochTail,
}

pub struct BatchGenerator<F, R> {
    loader: ChunkLoader<F, R>,
    batch_size: usize,
    num_split: usize,
    x: Array2<f32>,
    y: Array2<f32>,
    pointer: usize,
    /// Last chunk loaded in the current epoch, 0 before the first.
    split_counter: usize,
    state: WindowState,
    epoch: usize,
    epoch_frames: usize,
    epoch_finished: bool,
    num_frames: Option<usize>,
    rng: StdRng,
}

impl BatchGenerator<SpliceFeats, BufReader<File>> {
    /// Prepare labels, model metadata and the corpus split, then stream features through
    /// `splice-feats`.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        Self::bootstrap(config, |split_dir| SpliceFeats {
            binary: config.tools.splice_feats.clone(),
            split_dir: split_dir.to_path_buf(),
            left_context: config.left_context,
            right_context: config.right_context,
        })
    }
}

impl<F: FeatureSource> BatchGenerator<F, BufReader<File>> {
    /// Run the on-disk bootstrap with a caller-chosen feature source, built from the split
    /// directory.
    pub fn bootstrap(
        config: &GeneratorConfig,
        make_features: impl FnOnce(&Path) -> F,
    ) -> Result<Self> {
        config.validate()?;

        let labels_path = config.labels_path();
        if config.labels.is_none() {
            config
                .tools
                .ali_to_pdf(&config.model_path(), &config.ali_dir, &labels_path)?;
        }
        let index = LabelIndex::from_file(&labels_path)?;

        let output_feat_dim = match config.output_feat_dim {
            Some(dim) => dim,
            None => config.tools.num_pdfs(&config.model_path())?,
        };

        let num_utterances = setup::count_utterances(config.utt2spk_path())?;
        let num_split = setup::num_splits(num_utterances, config.max_split_data_size);
        if num_split == 0 {
            return Err(FeedError::EmptyCorpus);
        }
        let split_dir = setup::ensure_split(&config.tools, &config.data_dir, num_split)?;
        let manifests = setup::load_manifests(&split_dir, num_split)?;
        let store = LabelStore::partition_and_persist(&index, &manifests)?;
        info!(
            utterances = num_utterances,
            labelled = index.len(),
            frames = index.num_frames,
            num_split,
            output_feat_dim,
            "label partitions ready"
        );
        let num_frames = index.num_frames;
        drop(index);

        let predictions = TeacherPredictions::open(config.teacher_predictions_path())?;
        let loader = ChunkLoader::new(
            make_features(&split_dir),
            predictions,
            store,
            config.input_feat_dim,
            output_feat_dim,
        );
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut generator = Self::new(loader, config.batch_size, rng)?;
        generator.num_frames = Some(num_frames);
        Ok(generator)
    }
}

impl<F: FeatureSource, R: BufRead + Seek> BatchGenerator<F, R> {
    pub fn new(loader: ChunkLoader<F, R>, batch_size: usize, rng: StdRng) -> Result<Self> {
        if batch_size == 0 {
            return Err(FeedError::InvalidConfig(
                "batch_size must be positive".to_string(),
            ));
        }
        let num_split = loader.num_split();
        if num_split == 0 {
            return Err(FeedError::EmptyCorpus);
        }
        Ok(Self {
            x: Array2::zeros((0, loader.input_feat_dim())),
            y: Array2::zeros((0, loader.output_feat_dim())),
            loader,
            batch_size,
            num_split,
            pointer: 0,
            split_counter: 0,
            state: WindowState::Streaming,
            epoch: 0,
            epoch_frames: 0,
            epoch_finished: false,
            num_frames: None,
            rng,
        })
    }

    /// Produce the next minibatch, loading chunks as needed.
    ///
    /// Never runs out: after the last chunk the next epoch starts from chunk 1. The final batch
    /// of an epoch may be shorter than `batch_size`.
    pub fn next_batch(&mut self) -> Result<Batch> {
        while self.pointer + self.batch_size >= self.window_len() {
            if self.state == WindowState::EpochTail {
                self.state = WindowState::Streaming;
                self.epoch_finished = true;
                info!(epoch = self.epoch, "epoch complete");
                self.epoch += 1;
                break;
            }
            self.refill()?;
        }

        let len = self.window_len();
        let start = self.pointer.min(len);
        let end = (self.pointer + self.batch_size).min(len);
        let batch = Batch {
            features: self.x.slice(s![start..end, ..]).to_owned(),
            targets: self.y.slice(s![start..end, ..]).to_owned(),
        };
        self.pointer += self.batch_size;
        Ok(batch)
    }

    /// False once the last batch of the current epoch was served; the next call to
    /// [`next_batch`](Self::next_batch) starts a new epoch.
    pub fn has_more_in_epoch(&self) -> bool {
        !self.epoch_finished
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn num_split(&self) -> usize {
        self.num_split
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn window_len(&self) -> usize {
        self.x.nrows()
    }

    /// Last chunk loaded in the current epoch; 0 right after an epoch's last chunk.
    pub fn current_chunk(&self) -> usize {
        self.split_counter
    }

    pub fn input_feat_dim(&self) -> usize {
        self.loader.input_feat_dim()
    }

    pub fn output_feat_dim(&self) -> usize {
        self.loader.output_feat_dim()
    }

    /// Labelled frames in the alignment index, when built by [`BatchGenerator::bootstrap`].
    pub fn num_frames(&self) -> Option<usize> {
        self.num_frames
    }

    /// Remove the label partitions and close the prediction stream.
    pub fn close(self) -> Result<()> {
        self.loader.close()
    }

    fn refill(&mut self) -> Result<()> {
        let chunk = self.split_counter + 1;
        let data = self.loader.load_chunk(chunk)?;
        self.split_counter = chunk;
        self.epoch_finished = false;
        self.epoch_frames += data.num_frames();

        let start = self.pointer.min(self.window_len());
        let x = concatenate(Axis(0), &[self.x.slice(s![start.., ..]), data.features.view()])?;
        let y = concatenate(Axis(0), &[self.y.slice(s![start.., ..]), data.targets.view()])?;
        let mut order = (0..x.nrows()).collect::<Vec<_>>();
        order.shuffle(&mut self.rng);
        self.x = x.select(Axis(0), &order);
        self.y = y.select(Axis(0), &order);
        self.pointer = 0;
        debug!(chunk, window = self.window_len(), "refilled window");

        if self.split_counter == self.num_split {
            if self.epoch_frames == 0 {
                return Err(FeedError::EmptyCorpus);
            }
            self.split_counter = 0;
            self.epoch_frames = 0;
            self.state = WindowState::EpochTail;
        }
        Ok(())
    }
}

impl<F: FeatureSource, R: BufRead + Seek> Iterator for BatchGenerator<F, R> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}
