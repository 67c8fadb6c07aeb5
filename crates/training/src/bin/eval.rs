use clap::Parser;
use std::path::PathBuf;
use training::util::{validate_backend_choice, BackendKind};
use training::{evaluate_checkpoint, TrainConfig};

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "COCO bbox evaluation of a RetinaNet checkpoint on an annotation CSV"
)]
struct Args {
    /// TOML config (data.image_root, trainer.test_batch_size, inference.detections_per_img).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Checkpoint weights (.bin with a .json sidecar).
    #[arg(long)]
    checkpoint: PathBuf,
    /// CSV to evaluate (defaults to data.test_csv).
    #[arg(long)]
    csv: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
}

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing();
    let args = Args::parse();
    validate_backend_choice(args.backend)?;
    let cfg = TrainConfig::load(args.config.as_deref())?;
    cfg.validate()?;
    let csv = args.csv.unwrap_or_else(|| cfg.data.test_csv.clone());
    let stats = evaluate_checkpoint(&cfg, &args.checkpoint, &csv)?;
    println!("COCO bbox evaluation of {} on {}", args.checkpoint.display(), csv.display());
    println!("{stats}");
    Ok(())
}
