//! Invocations of the Kaldi programs that prepare labels, model metadata and corpus splits.

use std::{
    path::Path,
    process::{Command, Output, Stdio},
};

use tracing::info;

use crate::{
    config::KaldiTools,
    error::{FeedError, Result},
};

const NUM_PDFS_LINE: &str = "number of pdfs";

impl KaldiTools {
    /// Convert the gzipped alignments in `ali_dir` to a text index of pdf ids at `output`.
    pub fn ali_to_pdf(&self, model: &Path, ali_dir: &Path, output: &Path) -> Result<()> {
        info!(output = %output.display(), "converting alignments to pdf ids");
        let mut cmd = Command::new(&self.ali_to_pdf);
        cmd.arg(model)
            .arg(format!("ark:gunzip -c {}/ali.*.gz |", ali_dir.display()))
            .arg(format!("ark,t:{}", output.display()));
        run(&mut cmd, &self.ali_to_pdf)?;
        Ok(())
    }

    pub fn num_pdfs(&self, model: &Path) -> Result<usize> {
        let mut cmd = Command::new(&self.am_info);
        cmd.arg(model);
        let output = run(&mut cmd, &self.am_info)?;
        let report = String::from_utf8_lossy(&output.stdout);
        parse_num_pdfs(&report).ok_or_else(|| FeedError::Tool {
            tool: self.am_info.display().to_string(),
            message: format!("no {NUM_PDFS_LINE:?} line in report"),
        })
    }

    /// Split `data_dir` per utterance into `num_split` chunks under `<data_dir>/split<num_split>`.
    pub fn split_data(&self, data_dir: &Path, num_split: usize) -> Result<()> {
        info!(data = %data_dir.display(), num_split, "splitting data directory");
        let mut cmd = Command::new(&self.split_data);
        cmd.arg("--per-utt").arg(data_dir).arg(num_split.to_string());
        run(&mut cmd, &self.split_data)?;
        Ok(())
    }
}

pub fn parse_num_pdfs(report: &str) -> Option<usize> {
    report
        .lines()
        .find(|line| line.contains(NUM_PDFS_LINE))
        .and_then(|line| line.split_whitespace().last())
        .and_then(|token| token.parse().ok())
}

fn run(cmd: &mut Command, tool: &Path) -> Result<Output> {
    let output = cmd
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|e| FeedError::Tool {
            tool: tool.display().to_string(),
            message: format!("failed to start: {e}"),
        })?;
    if !output.status.success() {
        return Err(FeedError::Tool {
            tool: tool.display().to_string(),
            message: format!("exited with {}", output.status),
        });
    }
    Ok(output)
}
