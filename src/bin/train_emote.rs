//! Motion-context training CLI
//!
//! Trains either the frames-encoding VAE (explicit causal window) or the
//! diffusion-conditioned reference network on frame-folder videos.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --bin train-emote -- \
//!     --config configs/stage1.json \
//!     --manifest data/overfit.json \
//!     --data-root images_folder \
//!     --variant reference-net
//! ```

use anyhow::{Context, Result};
use candle_core::Device;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};

use candle_emote::{
    MotionContextTrainer, Pcg32, TrainConfig,
    checkpoint::{load_parameters, save_parameters},
    dataset::{BatchLoader, FrameDataset, Manifest},
    models::{FramesEncodingVae, FramesVaeConfig, ReferenceNetConfig, TinyReferenceNet},
};

const LOADER_STREAM: u64 = 17;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    /// Reconstruct the reference frame and its causal window
    FramesVae,
    /// Reconstruct the clean reference latent from noisy latents and motion features
    ReferenceNet,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Train motion-context face-animation models")]
struct Args {
    /// JSON training config
    #[arg(short, long)]
    config: PathBuf,

    /// JSON manifest listing the frames of each video
    #[arg(short, long)]
    manifest: PathBuf,

    /// Directory frame paths are relative to (defaults to the manifest's directory)
    #[arg(long)]
    data_root: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "frames-vae")]
    variant: Variant,

    /// Where to write the trained parameters
    #[arg(short, long, default_value = "frames_encoding_vae_model.safetensors")]
    output: PathBuf,

    /// Pretrained autoencoder weights (reference-net only)
    #[arg(long)]
    vae_weights: Option<PathBuf>,

    /// Override training.num_epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Override training.learning_rate
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Override the config seed
    #[arg(long)]
    seed: Option<u64>,

    /// Use CPU instead of CUDA
    #[arg(long)]
    cpu: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("candle_emote=info".parse()?)
                .add_directive("train_emote=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = TrainConfig::from_json_file(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    if let Some(epochs) = args.epochs {
        config.training.num_epochs = epochs;
    }
    if let Some(lr) = args.learning_rate {
        config.training.learning_rate = lr;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.validate()?;

    info!("Variant: {:?}", args.variant);
    info!(
        "Frames: {} @ {}x{}, stride {}",
        config.data.n_sample_frames, config.data.train_width, config.data.train_height, config.data.sample_rate
    );
    info!(
        "Epochs: {}, batch size: {}, lr: {}",
        config.training.num_epochs, config.training.batch_size, config.training.learning_rate
    );
    if config.seed.is_none() {
        warn!("No seed configured, run will not be reproducible");
    }

    let device = if args.cpu {
        info!("Using CPU");
        Device::Cpu
    } else {
        match Device::cuda_if_available(0) {
            Ok(device) => device,
            Err(e) => {
                warn!("CUDA not available: {}, falling back to CPU", e);
                Device::Cpu
            }
        }
    };
    let dtype = config.weight_dtype.dtype();

    let manifest = Manifest::from_json_file(&args.manifest).context("Failed to load manifest")?;
    let data_root = args.data_root.clone().unwrap_or_else(|| {
        args.manifest
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default()
    });
    let dataset = FrameDataset::new(data_root, manifest, &config.data)?;
    // Loader and trainer draw from separate streams of the same seed
    let loader_rng = Pcg32::from_optional_seed_on_stream(config.seed, LOADER_STREAM);
    let mut loader = BatchLoader::new(dataset, &config.training, loader_rng)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, dtype, &device);

    let build_optimizer = |varmap: &VarMap| -> Result<AdamW> {
        let params = ParamsAdamW {
            lr: config.training.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        Ok(AdamW::new(varmap.all_vars(), params)?)
    };

    let start = std::time::Instant::now();
    let report = match args.variant {
        Variant::FramesVae => {
            let model = FramesEncodingVae::new(vb, &FramesVaeConfig::from_train_config(&config))?;
            let optimizer = build_optimizer(&varmap)?;
            let mut trainer = MotionContextTrainer::new(&config, optimizer, device.clone());
            trainer
                .train_frames_vae(&model, &mut loader)
                .context("Training failed, no parameters saved")?
        }
        Variant::ReferenceNet => {
            let mut vae_map = VarMap::new();
            let vae_vb = VarBuilder::from_varmap(&vae_map, dtype, &device);
            let model = TinyReferenceNet::new(vb, vae_vb, &ReferenceNetConfig::from_train_config(&config))?;
            match &args.vae_weights {
                Some(path) => load_parameters(&mut vae_map, path)?,
                None => warn!("No --vae-weights given, autoencoder keeps its random initialisation"),
            }
            let optimizer = build_optimizer(&varmap)?;
            let mut trainer = MotionContextTrainer::new(&config, optimizer, device.clone());
            trainer
                .train_reference_net(&model, &mut loader)
                .context("Training failed, no parameters saved")?
        }
    };

    info!(
        "Training complete in {:.2}s: {} optimizer steps",
        start.elapsed().as_secs_f64(),
        report.total_steps()
    );
    if let Some(loss) = report.final_loss() {
        info!("Final epoch loss: {:.4}", loss);
    }

    save_parameters(&varmap, &args.output)
        .with_context(|| format!("Failed to save parameters to {}", args.output.display()))?;
    info!("Model saved to {}", args.output.display());

    Ok(())
}
