use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::debug;

use crate::error::{FeedError, Result};

/// Utterance id to per-frame class indices. A missing key means the utterance is skipped.
pub type LabelPartition = HashMap<String, Vec<u32>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelIndex {
    pub labels: LabelPartition,
    pub num_frames: usize,
}

impl LabelIndex {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| FeedError::io(format!("opening alignment index {}", path.display()), e))?;
        Self::read(BufReader::new(file))
    }

    /// `uttId label1 label2 ...` per line.
    pub fn read<R: BufRead>(reader: R) -> Result<Self> {
        let mut labels = LabelPartition::new();
        let mut num_frames = 0;
        for (ix, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| FeedError::io("reading alignment index", e))?;
            let mut tokens = line.split_whitespace();
            let Some(utt_id) = tokens.next() else {
                continue;
            };
            let frames = tokens
                .map(|t| {
                    t.parse::<u32>().map_err(|_| FeedError::MalformedIndex {
                        line: ix + 1,
                        token: t.to_string(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            num_frames += frames.len();
            labels.insert(utt_id.to_string(), frames);
        }
        Ok(Self { labels, num_frames })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// The directory is removed by [`LabelStore::close`] or when the store is dropped.
pub struct LabelStore {
    dir: TempDir,
    num_split: usize,
}

impl LabelStore {
    /// Persist, for chunk `k` (1-based), the labels of the utterances listed in `manifests[k - 1]`.
    pub fn partition_and_persist(index: &LabelIndex, manifests: &[Vec<String>]) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("distill-feed-labels")
            .tempdir()
            .map_err(|e| FeedError::io("creating label partition directory", e))?;

        for (ix, manifest) in manifests.iter().enumerate() {
            let chunk = ix + 1;
            let partition = manifest
                .iter()
                .filter_map(|utt_id| {
                    index
                        .labels
                        .get(utt_id)
                        .map(|frames| (utt_id.clone(), frames.clone()))
                })
                .collect::<LabelPartition>();
            let path = partition_path(dir.path(), chunk);
            let file = File::create(&path)
                .map_err(|e| FeedError::io(format!("creating {}", path.display()), e))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &partition)?;
            writer
                .flush()
                .map_err(|e| FeedError::io(format!("writing {}", path.display()), e))?;
            debug!(
                chunk,
                listed = manifest.len(),
                labelled = partition.len(),
                "persisted label partition"
            );
        }

        Ok(Self {
            dir,
            num_split: manifests.len(),
        })
    }

    pub fn load_partition(&self, chunk: usize) -> Result<LabelPartition> {
        if chunk == 0 || chunk > self.num_split {
            return Err(FeedError::MissingLabelPartition(chunk));
        }
        let path = partition_path(self.dir.path(), chunk);
        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FeedError::MissingLabelPartition(chunk),
            _ => FeedError::io(format!("opening {}", path.display()), e),
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn num_split(&self) -> usize {
        self.num_split
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the partition directory, reporting failures that `Drop` would swallow.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|e| FeedError::io(format!("removing {}", path.display()), e))
    }
}

fn partition_path(dir: &Path, chunk: usize) -> PathBuf {
    dir.join(format!("{chunk}.json"))
}
