use std::path::PathBuf;

use anyhow::{Context, bail};
use candle_core::Device;
use clap::Parser;
use distill_feed::{BatchGenerator, GeneratorConfig, TensorBatches};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Pull minibatches from a Kaldi data directory and report their shapes.
#[derive(Debug, Parser)]
#[command(name = "distill-feed", version)]
struct Cli {
    /// YAML configuration file
    #[arg(long, conflicts_with_all = ["data", "ali", "exp"])]
    config: Option<PathBuf>,
    /// Kaldi data directory
    data: Option<PathBuf>,
    /// Alignment directory
    ali: Option<PathBuf>,
    /// Experiment directory holding final.mdl
    exp: Option<PathBuf>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// Batches to pull
    #[arg(long, default_value_t = 10)]
    batches: usize,
    /// Keep pulling until this many epochs are complete, ignoring --batches
    #[arg(long)]
    epochs: Option<usize>,
    /// Convert batches to tensors on the first CUDA device, if any
    #[arg(long)]
    tensors: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match (&cli.config, &cli.data, &cli.ali, &cli.exp) {
        (Some(path), ..) => GeneratorConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        (None, Some(data), Some(ali), Some(exp)) => GeneratorConfig::new(data, ali, exp),
        _ => bail!("pass --config or the data, alignment and experiment directories"),
    };
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(seed) = cli.seed {
        config.seed = Some(seed);
    }

    let mut generator =
        BatchGenerator::from_config(&config).context("preparing the minibatch generator")?;
    info!(
        num_split = generator.num_split(),
        input_dim = generator.input_feat_dim(),
        output_dim = generator.output_feat_dim(),
        "generator ready"
    );

    if cli.tensors {
        let dev = Device::cuda_if_available(0)?;
        let mut tensors = TensorBatches::new(generator, dev);
        for step in 0..cli.batches {
            let (xs, ys) = tensors.next().context("feed ended")??;
            info!(step, features = ?xs.dims(), targets = ?ys.dims(), "tensor batch");
        }
        generator = tensors.into_inner();
    } else {
        let mut step = 0_usize;
        let mut frames = 0_usize;
        loop {
            match cli.epochs {
                Some(epochs) if generator.epoch() >= epochs => break,
                None if step >= cli.batches => break,
                _ => {}
            }
            let batch = generator
                .next_batch()
                .with_context(|| format!("producing batch {step}"))?;
            frames += batch.len();
            info!(
                step,
                epoch = generator.epoch(),
                rows = batch.len(),
                window = generator.window_len(),
                "batch"
            );
            step += 1;
        }
        info!(batches = step, frames, "done");
    }

    generator.close().context("releasing label partitions")?;
    Ok(())
}
