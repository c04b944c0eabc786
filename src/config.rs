use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FeedError, Result};

/// Locations of the external Kaldi programs the feed shells out to.
///
/// Bare names are resolved through `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KaldiTools {
    pub ali_to_pdf: PathBuf,
    pub am_info: PathBuf,
    pub splice_feats: PathBuf,
    pub split_data: PathBuf,
}

impl Default for KaldiTools {
    fn default() -> Self {
        Self {
            ali_to_pdf: PathBuf::from("ali-to-pdf"),
            am_info: PathBuf::from("am-info"),
            splice_feats: PathBuf::from("splice-feats"),
            split_data: PathBuf::from("utils/split_data.sh"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Kaldi data directory holding `utt2spk`, `feats.scp` and the teacher predictions.
    pub data_dir: PathBuf,
    pub ali_dir: PathBuf,
    pub exp_dir: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_split_data_size")]
    pub max_split_data_size: usize,
    #[serde(default = "default_input_feat_dim")]
    pub input_feat_dim: usize,
    /// Number of output classes; queried from `am-info` when absent.
    #[serde(default)]
    pub output_feat_dim: Option<usize>,
    #[serde(default = "default_context")]
    pub left_context: usize,
    #[serde(default = "default_context")]
    pub right_context: usize,
    /// Teacher prediction archive; `<data_dir>/teacher_predictions.ark` when absent.
    #[serde(default)]
    pub teacher_predictions: Option<PathBuf>,
    /// Existing alignment index. When set, `ali-to-pdf` is not run.
    #[serde(default)]
    pub labels: Option<PathBuf>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub tools: KaldiTools,
}

fn default_batch_size() -> usize {
    256
}

fn default_max_split_data_size() -> usize {
    100
}

fn default_input_feat_dim() -> usize {
    429
}

fn default_context() -> usize {
    5
}

impl GeneratorConfig {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        ali_dir: impl Into<PathBuf>,
        exp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            ali_dir: ali_dir.into(),
            exp_dir: exp_dir.into(),
            batch_size: default_batch_size(),
            max_split_data_size: default_max_split_data_size(),
            input_feat_dim: default_input_feat_dim(),
            output_feat_dim: None,
            left_context: default_context(),
            right_context: default_context(),
            teacher_predictions: None,
            labels: None,
            seed: None,
            tools: KaldiTools::default(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| FeedError::io(format!("reading config file {}", path.display()), e))?;
        Self::from_yaml(&content, path)
    }

    pub fn from_yaml(content: &str, path: &Path) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).map_err(|e| FeedError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate().map_err(|e| FeedError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid =
            |message: &str| -> Result<()> { Err(FeedError::InvalidConfig(message.to_string())) };
        if self.batch_size == 0 {
            return invalid("batch_size must be positive");
        }
        if self.max_split_data_size == 0 {
            return invalid("max_split_data_size must be positive");
        }
        if self.input_feat_dim == 0 {
            return invalid("input_feat_dim must be positive");
        }
        if self.output_feat_dim == Some(0) {
            return invalid("output_feat_dim must be positive");
        }
        Ok(())
    }

    pub fn teacher_predictions_path(&self) -> PathBuf {
        self.teacher_predictions
            .clone()
            .unwrap_or_else(|| self.data_dir.join("teacher_predictions.ark"))
    }

    /// Where `ali-to-pdf` writes, or where an existing index is read from.
    pub fn labels_path(&self) -> PathBuf {
        self.labels
            .clone()
            .unwrap_or_else(|| self.data_dir.join("alipdf.txt"))
    }

    pub fn utt2spk_path(&self) -> PathBuf {
        self.data_dir.join("utt2spk")
    }

    pub fn model_path(&self) -> PathBuf {
        self.exp_dir.join("final.mdl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_fills_defaults() {
        let yaml = r"
data_dir: data/train
ali_dir: exp/tri3_ali
exp_dir: exp/tri3
seed: 7
tools:
  am_info: /opt/kaldi/src/gmmbin/am-info
";
        let config = GeneratorConfig::from_yaml(yaml, Path::new("feed.yaml")).unwrap();
        assert_eq!(config.batch_size, 256);
        assert_eq!(config.max_split_data_size, 100);
        assert_eq!(config.input_feat_dim, 429);
        assert_eq!((config.left_context, config.right_context), (5, 5));
        assert_eq!(config.seed, Some(7));
        assert_eq!(
            config.tools.am_info,
            PathBuf::from("/opt/kaldi/src/gmmbin/am-info")
        );
        assert_eq!(config.tools.splice_feats, PathBuf::from("splice-feats"));
        assert_eq!(
            config.teacher_predictions_path(),
            PathBuf::from("data/train/teacher_predictions.ark")
        );
        assert_eq!(config.labels_path(), PathBuf::from("data/train/alipdf.txt"));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let yaml = "data_dir: d\nali_dir: a\nexp_dir: e\nbatch_size: 0\n";
        let err = GeneratorConfig::from_yaml(yaml, Path::new("feed.yaml")).unwrap_err();
        assert!(matches!(err, FeedError::Config { .. }));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let err = GeneratorConfig::from_yaml("data_dir: d\n", Path::new("feed.yaml")).unwrap_err();
        assert!(err.to_string().contains("feed.yaml"));
    }

    #[test]
    fn from_file_reads_yaml() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"data_dir: d\nali_dir: a\nexp_dir: e\nbatch_size: 32\n")
            .unwrap();
        let config = GeneratorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.model_path(), PathBuf::from("e/final.mdl"));
    }
}
