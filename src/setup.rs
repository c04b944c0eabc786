use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    config::KaldiTools,
    error::{FeedError, Result},
};

/// Number of chunks needed so that none holds more than `max_split_data_size` utterances.
pub fn num_splits(num_utterances: usize, max_split_data_size: usize) -> usize {
    num_utterances.div_ceil(max_split_data_size)
}

pub fn count_utterances(path: impl AsRef<Path>) -> Result<usize> {
    Ok(read_manifest(path)?.len())
}

/// First whitespace token of every non-empty line.
pub fn read_manifest(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let file =
        File::open(path).map_err(|e| FeedError::io(format!("opening {}", path.display()), e))?;
    let mut ids = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| FeedError::io(format!("reading {}", path.display()), e))?;
        if let Some(id) = line.split_whitespace().next() {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

pub fn split_dir(data_dir: &Path, num_split: usize) -> PathBuf {
    data_dir.join(format!("split{num_split}"))
}

pub fn chunk_manifest_path(split_dir: &Path, chunk: usize) -> PathBuf {
    split_dir.join(chunk.to_string()).join("utt2spk")
}

pub fn ensure_split(tools: &KaldiTools, data_dir: &Path, num_split: usize) -> Result<PathBuf> {
    let dir = split_dir(data_dir, num_split);
    if dir.is_dir() {
        debug!(split = %dir.display(), "reusing existing split");
    } else {
        tools.split_data(data_dir, num_split)?;
    }
    Ok(dir)
}

/// Read the manifest of every chunk, failing if the split on disk has fewer chunks.
pub fn load_manifests(split_dir: &Path, num_split: usize) -> Result<Vec<Vec<String>>> {
    (1..=num_split)
        .map(|chunk| {
            let path = chunk_manifest_path(split_dir, chunk);
            if !path.is_file() {
                return Err(FeedError::MissingChunkManifest { chunk, path });
            }
            read_manifest(&path)
        })
        .collect()
}
