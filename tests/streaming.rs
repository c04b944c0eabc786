//! End-to-end feed over a small on-disk corpus, with features served from memory.

use std::{fs, fs::File, path::Path};

use distill_feed::{
    BatchGenerator, FeedError, GeneratorConfig, ark_codec::write_utterance, setup,
};
use ndarray::Array2;
use tempfile::TempDir;

const INPUT_DIM: usize = 4;
const OUTPUT_DIM: usize = 3;

/// Utterance `uK` has one frame whose features are all `K` and whose hard label is `K % 3`.
/// The teacher predicts 0.25 for every class.
struct Corpus {
    dir: TempDir,
    chunks: Vec<Vec<u8>>,
}

fn corpus(num_utterances: usize, max_split: usize, unlabelled: &[usize]) -> Corpus {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    let num_split = setup::num_splits(num_utterances, max_split);
    let split = setup::split_dir(&data, num_split);

    let mut utt2spk = String::new();
    let mut index = String::new();
    let mut predictions = File::create(dir.path().join("teacher.ark")).unwrap();
    let mut chunks = vec![Vec::new(); num_split];
    let mut manifests = vec![String::new(); num_split];
    for k in 0..num_utterances {
        let id = format!("u{k}");
        let chunk = k / max_split;
        utt2spk.push_str(&format!("{id} spk{k}\n"));
        manifests[chunk].push_str(&format!("{id} spk{k}\n"));
        if !unlabelled.contains(&k) {
            index.push_str(&format!("{id} {}\n", k % OUTPUT_DIM));
        }
        let feats = Array2::from_elem((1, INPUT_DIM), k as f32);
        write_utterance(&mut chunks[chunk], &id, feats.view()).unwrap();
        let soft = Array2::from_elem((1, OUTPUT_DIM), 0.25_f32);
        write_utterance(&mut predictions, &id, soft.view()).unwrap();
    }

    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("utt2spk"), utt2spk).unwrap();
    fs::write(dir.path().join("alipdf.txt"), index).unwrap();
    for (ix, manifest) in manifests.iter().enumerate() {
        let chunk_dir = split.join((ix + 1).to_string());
        fs::create_dir_all(&chunk_dir).unwrap();
        fs::write(chunk_dir.join("utt2spk"), manifest).unwrap();
    }
    Corpus { dir, chunks }
}

fn config(root: &Path, batch_size: usize, max_split: usize) -> GeneratorConfig {
    let mut config = GeneratorConfig::new(root.join("data"), root.join("ali"), root.join("exp"));
    config.batch_size = batch_size;
    config.max_split_data_size = max_split;
    config.input_feat_dim = INPUT_DIM;
    config.output_feat_dim = Some(OUTPUT_DIM);
    config.labels = Some(root.join("alipdf.txt"));
    config.teacher_predictions = Some(root.join("teacher.ark"));
    config.seed = Some(2017);
    config
}

fn utterances(batch: &distill_feed::Batch) -> Vec<usize> {
    let mut ids = batch
        .features
        .column(0)
        .iter()
        .map(|v| *v as usize)
        .collect::<Vec<_>>();
    ids.sort_unstable();
    ids
}

#[test]
fn five_utterances_in_three_chunks() {
    let corpus = corpus(5, 2, &[]);
    let config = config(corpus.dir.path(), 3, 2);
    let chunks = corpus.chunks.clone();
    let mut generator = BatchGenerator::bootstrap(&config, |_| chunks).unwrap();
    assert_eq!(generator.num_split(), 3);
    assert_eq!(generator.num_frames(), Some(5));

    let first = generator.next_batch().unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(generator.window_len(), 4);
    assert!(utterances(&first).iter().all(|k| *k < 4));

    let second = generator.next_batch().unwrap();
    assert_eq!(second.len(), 2);
    assert!(utterances(&second).contains(&4));
    assert!(!generator.has_more_in_epoch());

    let mut epoch = utterances(&first);
    epoch.extend(utterances(&second));
    epoch.sort_unstable();
    assert_eq!(epoch, [0, 1, 2, 3, 4]);

    generator.close().unwrap();
}

#[test]
fn targets_add_hard_labels_to_teacher_predictions() {
    let corpus = corpus(7, 3, &[]);
    let config = config(corpus.dir.path(), 2, 3);
    let chunks = corpus.chunks.clone();
    let mut generator = BatchGenerator::bootstrap(&config, |_| chunks).unwrap();

    for _ in 0..12 {
        let batch = generator.next_batch().unwrap();
        for (feat, target) in batch.features.outer_iter().zip(batch.targets.outer_iter()) {
            let k = feat[0] as usize;
            for class in 0..OUTPUT_DIM {
                let expected = if class == k % OUTPUT_DIM { 1.25 } else { 0.25 };
                assert_eq!(target[class], expected);
            }
        }
    }
}

#[test]
fn wraps_around_epochs_and_rereads_predictions() {
    let corpus = corpus(9, 2, &[]);
    let config = config(corpus.dir.path(), 4, 2);
    let chunks = corpus.chunks.clone();
    let mut generator = BatchGenerator::bootstrap(&config, |_| chunks).unwrap();

    for epoch in 0..3 {
        let mut seen = Vec::new();
        loop {
            seen.extend(utterances(&generator.next_batch().unwrap()));
            if !generator.has_more_in_epoch() {
                break;
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..9).collect::<Vec<_>>());
        assert_eq!(generator.epoch(), epoch + 1);
        assert_eq!(generator.current_chunk(), 0);
    }

    generator.next_batch().unwrap();
    assert!(generator.has_more_in_epoch());
}

#[test]
fn next_epoch_resumes_at_first_chunk() {
    let corpus = corpus(4, 2, &[]);
    let config = config(corpus.dir.path(), 1, 2);
    let chunks = corpus.chunks.clone();
    let mut generator = BatchGenerator::bootstrap(&config, |_| chunks).unwrap();

    let mut served = 0;
    while generator.has_more_in_epoch() {
        served += generator.next_batch().unwrap().len();
    }
    assert_eq!(served, 4);
    assert_eq!(generator.current_chunk(), 0);

    // the tail batch drained the window, so exactly one refill happens here
    let batch = generator.next_batch().unwrap();
    assert_eq!(generator.current_chunk(), 1);
    assert_eq!(generator.window_len(), 2);
    let k = utterances(&batch)[0];
    assert!(k < 2);
    let expected = (0..OUTPUT_DIM)
        .map(|class| if class == k % OUTPUT_DIM { 1.25 } else { 0.25 })
        .collect::<Vec<f32>>();
    assert_eq!(batch.targets.row(0).to_vec(), expected);
}

#[test]
fn unlabelled_utterances_are_skipped() {
    let corpus = corpus(6, 3, &[1, 4]);
    let config = config(corpus.dir.path(), 16, 3);
    let chunks = corpus.chunks.clone();
    let mut generator = BatchGenerator::bootstrap(&config, |_| chunks).unwrap();

    let batch = generator.next_batch().unwrap();
    assert_eq!(utterances(&batch), [0, 2, 3, 5]);
}

#[test]
fn desynchronised_predictions_abort_the_batch() {
    let corpus = corpus(4, 2, &[]);
    let mut chunks = corpus.chunks.clone();
    // second chunk lists its utterances in reverse order
    let mut swapped = Vec::new();
    for k in [3_usize, 2] {
        let feats = Array2::from_elem((1, INPUT_DIM), k as f32);
        write_utterance(&mut swapped, &format!("u{k}"), feats.view()).unwrap();
    }
    chunks[1] = swapped;
    let config = config(corpus.dir.path(), 8, 2);
    let mut generator = BatchGenerator::bootstrap(&config, |_| chunks).unwrap();

    match generator.next_batch().unwrap_err() {
        FeedError::StreamDesync {
            chunk,
            position,
            features,
            predictions,
        } => {
            assert_eq!((chunk, position), (2, 0));
            assert_eq!(features, "u3");
            assert_eq!(predictions.as_deref(), Some("u2"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn missing_chunk_directory_fails_bootstrap() {
    let corpus = corpus(5, 2, &[]);
    let split = setup::split_dir(&corpus.dir.path().join("data"), 3);
    fs::remove_dir_all(split.join("3")).unwrap();
    let config = config(corpus.dir.path(), 3, 2);
    let chunks = corpus.chunks.clone();

    let err = BatchGenerator::bootstrap(&config, |_| chunks)
        .err()
        .unwrap();
    assert!(matches!(err, FeedError::MissingChunkManifest { chunk: 3, .. }));
}
