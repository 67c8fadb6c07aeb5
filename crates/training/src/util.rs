use anyhow::Context;
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::Backend;
use clap::{Parser, ValueEnum};
use data_contracts::{CocoStats, LabelMap};
use face_dataset::{BatchConfig, BatchIter, FaceDataset, ResizeMode, TransformPipeline};
use models::{CheckpointMeta, RetinaNet};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use vision_core::coder::BoxCoder;
use vision_core::matcher::Matcher;

use crate::config::{OptimizerKind, TrainConfig};
use crate::early_stopping::EarlyStopping;
use crate::eval::{ensure_anchor_count, evaluate_checkpoint, AnchorCache};
use crate::loss::{build_targets, retina_loss, LossValues};
use crate::schedule::{Interval, LrSchedule};
use crate::TrainBackend;

type ADBackend = Autodiff<TrainBackend>;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train the RetinaNet pet-face detector")]
pub struct TrainArgs {
    /// TOML config (defaults to $PETFACE_CONFIG, then configs/petface.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Override trainer.epochs.
    #[arg(long)]
    pub epochs: Option<usize>,
    /// Override trainer.batch_size.
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Override optimizer.lr.
    #[arg(long)]
    pub lr: Option<f64>,
    /// Override trainer.checkpoint_dir.
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,
    /// Skip the test-split COCO evaluation after training.
    #[arg(long, default_value_t = false)]
    pub skip_test: bool,
}

impl TrainArgs {
    pub fn apply_overrides(&self, cfg: &mut TrainConfig) {
        if let Some(epochs) = self.epochs {
            cfg.trainer.epochs = epochs;
        }
        if let Some(bs) = self.batch_size {
            cfg.trainer.batch_size = bs;
        }
        if let Some(lr) = self.lr {
            cfg.optimizer.lr = lr;
        }
        if let Some(dir) = &self.checkpoint_dir {
            cfg.trainer.checkpoint_dir = dir.clone();
        }
        if self.skip_test {
            cfg.trainer.evaluate_test = false;
        }
    }
}

/// One line of the JSONL metrics log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f32,
    pub cls: f32,
    pub reg: f32,
    pub val_loss: Option<f32>,
    pub lr: f64,
}

#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub epochs_run: usize,
    pub best_loss: f32,
    pub best_checkpoint: PathBuf,
    pub last_checkpoint: PathBuf,
    pub test_stats: Option<CocoStats>,
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<TrainSummary> {
    validate_backend_choice(args.backend)?;
    let mut cfg = TrainConfig::load(args.config.as_deref()).context("loading training config")?;
    args.apply_overrides(&mut cfg);
    cfg.validate()?;
    train_with_config(&cfg)
}

fn load_split(
    name: &str,
    csv: &Path,
    image_root: &Path,
    labels: &LabelMap,
) -> anyhow::Result<FaceDataset> {
    FaceDataset::load(csv, image_root, labels.clone())
        .with_context(|| format!("loading {name} split from {}", csv.display()))
}

pub fn train_with_config(cfg: &TrainConfig) -> anyhow::Result<TrainSummary> {
    if let Some(n) = cfg.trainer.num_workers {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(n).build_global() {
            debug!("rayon pool already initialised: {e}");
        }
    }
    info!(
        "Optimizer: {}, Scheduler: {}",
        cfg.optimizer.kind.name(),
        LrSchedule::new(cfg.scheduler.clone(), cfg.optimizer.lr, 1).name()
    );

    let labels = cfg.label_map();
    let train_set = load_split("train", &cfg.data.train_csv, &cfg.data.image_root, &labels)?;
    let valid_set = load_split("valid", &cfg.data.valid_csv, &cfg.data.image_root, &labels)?;
    if train_set.is_empty() {
        anyhow::bail!("training split {} has no images", cfg.data.train_csv.display());
    }

    let mut augment = cfg.augment.clone();
    if augment.seed.is_none() {
        augment.seed = cfg.trainer.seed;
    }
    let train_pipeline = TransformPipeline::from_config(&augment);
    info!("Train augmentations: {}", train_pipeline.describe());
    info!("Training on {} images", train_set.len());
    let valid_pipeline = train_pipeline.without_augmentation();

    let train_iter = BatchIter::new(
        train_set,
        train_pipeline,
        BatchConfig {
            batch_size: cfg.trainer.batch_size,
            shuffle: true,
            seed: cfg.trainer.seed,
            drop_last: cfg.trainer.drop_last,
            ..Default::default()
        },
    );
    let valid_iter = BatchIter::new(
        valid_set,
        valid_pipeline,
        BatchConfig::eval(cfg.trainer.valid_batch_size()),
    );

    let device = <ADBackend as Backend>::Device::default();
    let model = cfg.model.init::<ADBackend>(&device);
    let ctx = FitContext {
        cfg,
        labels: &labels,
        device,
    };
    let decay = (cfg.optimizer.weight_decay > 0.0)
        .then(|| WeightDecayConfig::new(cfg.optimizer.weight_decay));
    let mut summary = match cfg.optimizer.kind {
        OptimizerKind::Sgd => {
            let momentum = (cfg.optimizer.momentum > 0.0).then(|| {
                MomentumConfig::new()
                    .with_momentum(cfg.optimizer.momentum)
                    .with_dampening(0.0)
                    .with_nesterov(cfg.optimizer.nesterov)
            });
            let optim = SgdConfig::new()
                .with_momentum(momentum)
                .with_weight_decay(decay)
                .init();
            fit(&ctx, model, optim, train_iter, valid_iter)?
        }
        OptimizerKind::Adam => {
            let optim = AdamConfig::new().with_weight_decay(decay).init();
            fit(&ctx, model, optim, train_iter, valid_iter)?
        }
    };

    if cfg.trainer.evaluate_test {
        if cfg.data.test_csv.exists() {
            let stats = evaluate_checkpoint(cfg, &summary.best_checkpoint, &cfg.data.test_csv)
                .context("evaluating best checkpoint on the test split")?;
            info!("Test COCO evaluation ({}):\n{stats}", cfg.data.test_csv.display());
            info!("Test AP: {:.4}", stats.ap);
            summary.test_stats = Some(stats);
        } else {
            warn!(
                "test split {} not found; skipping COCO evaluation",
                cfg.data.test_csv.display()
            );
        }
    }
    Ok(summary)
}

struct FitContext<'a> {
    cfg: &'a TrainConfig,
    labels: &'a LabelMap,
    device: <ADBackend as Backend>::Device,
}

impl FitContext<'_> {
    fn meta(&self, epoch: usize, val_loss: Option<f32>) -> CheckpointMeta {
        CheckpointMeta {
            model: self.cfg.model.clone(),
            input_size: self.cfg.augment.target_size,
            letterbox: self.cfg.augment.resize_mode == ResizeMode::Letterbox,
            labels: self.labels.names().to_vec(),
            epoch,
            val_loss,
        }
    }
}

fn fit<O>(
    ctx: &FitContext<'_>,
    mut model: RetinaNet<ADBackend>,
    mut optim: O,
    mut train_iter: BatchIter,
    mut valid_iter: BatchIter,
) -> anyhow::Result<TrainSummary>
where
    O: Optimizer<RetinaNet<ADBackend>, ADBackend>,
{
    let cfg = ctx.cfg;
    let trainer = &cfg.trainer;
    let total_units = match cfg.scheduler.interval {
        Interval::Step => trainer.epochs * train_iter.num_batches().max(1),
        Interval::Epoch => trainer.epochs,
    };
    let schedule = LrSchedule::new(cfg.scheduler.clone(), cfg.optimizer.lr, total_units);
    let mut early = EarlyStopping::from_config(&cfg.early_stopping);
    let matcher = cfg.loss.matcher();
    let coder = BoxCoder::default();
    let mut anchors = AnchorCache::new(cfg.model.anchors.clone());
    let num_classes = cfg.model.num_classes;

    let best_path = trainer.checkpoint_dir.join("best.bin");
    let last_path = trainer.checkpoint_dir.join("last.bin");
    fs::create_dir_all(&trainer.checkpoint_dir).with_context(|| {
        format!("creating checkpoint dir {}", trainer.checkpoint_dir.display())
    })?;

    reset_metrics(&trainer.metrics_log)?;

    let mut best_loss = f32::INFINITY;
    let mut step = 0usize;
    let mut epochs_run = 0usize;
    let log_every = trainer.log_every.max(1);

    for epoch in 0..trainer.epochs {
        if epoch > 0 {
            train_iter.reset();
        }
        let mut sum = LossValues::default();
        let mut batches = 0usize;
        let mut lr = schedule.lr_at(if schedule.interval() == Interval::Epoch {
            epoch
        } else {
            step
        });

        while let Some(batch) = train_iter.next_batch::<ADBackend>(&ctx.device)? {
            if schedule.interval() == Interval::Step {
                lr = schedule.lr_at(step);
            }
            let output = model.forward(batch.images);
            let flat = anchors.flat(&output.level_sizes);
            ensure_anchor_count(flat.len(), output.cls_logits.dims()[1])?;
            let targets = build_targets(flat, &batch.meta, num_classes, &matcher, &coder);
            let loss = retina_loss(&output, &targets, &cfg.loss);
            let values = loss.values();
            let grads = GradientsParams::from_grads(loss.total.backward(), &model);
            model = optim.step(lr, model, grads);

            sum.classification += values.classification;
            sum.regression += values.regression;
            sum.total += values.total;
            batches += 1;
            step += 1;
            if step % log_every == 0 {
                info!(
                    epoch,
                    step,
                    loss = values.total,
                    cls = values.classification,
                    reg = values.regression,
                    fg = targets.num_foreground,
                    lr,
                    "train"
                );
            }
        }
        epochs_run += 1;
        if batches == 0 {
            anyhow::bail!("epoch {epoch} produced no training batches");
        }
        let denom = batches as f32;
        let train = LossValues {
            classification: sum.classification / denom,
            regression: sum.regression / denom,
            total: sum.total / denom,
        };

        let eval_model = model.valid();
        let val_loss = validation_loss(
            &eval_model,
            &mut valid_iter,
            &mut anchors,
            ctx,
            &matcher,
            &coder,
        )?;
        let monitored = val_loss.unwrap_or(train.total);
        info!(
            epoch,
            train_loss = train.total,
            cls = train.classification,
            reg = train.regression,
            val_loss = ?val_loss,
            lr,
            "epoch complete"
        );

        let meta = ctx.meta(epoch, val_loss);
        models::save_checkpoint(&eval_model, &meta, &last_path)?;
        if monitored < best_loss {
            best_loss = monitored;
            models::save_checkpoint(&eval_model, &meta, &best_path)?;
            info!("new best checkpoint {} (loss {monitored:.4})", best_path.display());
        }

        append_metrics(
            &trainer.metrics_log,
            &EpochMetrics {
                epoch,
                train_loss: train.total,
                cls: train.classification,
                reg: train.regression,
                val_loss,
                lr,
            },
        )?;

        if let Some(es) = early.as_mut() {
            if es.should_stop(monitored) {
                break;
            }
        }
    }

    Ok(TrainSummary {
        epochs_run,
        best_loss,
        best_checkpoint: best_path,
        last_checkpoint: last_path,
        test_stats: None,
    })
}

fn validation_loss(
    model: &RetinaNet<TrainBackend>,
    iter: &mut BatchIter,
    anchors: &mut AnchorCache,
    ctx: &FitContext<'_>,
    matcher: &Matcher,
    coder: &BoxCoder,
) -> anyhow::Result<Option<f32>> {
    iter.reset();
    let mut total = 0.0f32;
    let mut batches = 0usize;
    while let Some(batch) = iter.next_batch::<TrainBackend>(&ctx.device)? {
        let output = model.forward(batch.images);
        let flat = anchors.flat(&output.level_sizes);
        ensure_anchor_count(flat.len(), output.cls_logits.dims()[1])?;
        let targets = build_targets(
            flat,
            &batch.meta,
            ctx.cfg.model.num_classes,
            matcher,
            coder,
        );
        total += retina_loss(&output, &targets, &ctx.cfg.loss).values().total;
        batches += 1;
    }
    Ok((batches > 0).then(|| total / batches as f32))
}

/// Start the run with an empty metrics log.
fn reset_metrics(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, "").with_context(|| format!("truncating metrics log {}", path.display()))
}

fn append_metrics(path: &Path, metrics: &EpochMetrics) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening metrics log {}", path.display()))?;
    writeln!(file, "{}", serde_json::to_string(metrics)?)?;
    Ok(())
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}
