use std::fs;
use std::path::Path;
use training::config::{OptimizerKind, TrainConfig};
use training::schedule::ScheduleKind;
use training::train_with_config;
use training::util::EpochMetrics;

const HEADER: &str = "filename,width,height,class,xmin,ymin,xmax,ymax,labels\n";

fn write_face(path: &Path, w: u32, h: u32, bbox: [u32; 4]) {
    let mut img = image::RgbImage::from_pixel(w, h, image::Rgb([20, 20, 20]));
    for y in bbox[1]..bbox[3] {
        for x in bbox[0]..bbox[2] {
            img.put_pixel(x, y, image::Rgb([230, 180, 120]));
        }
    }
    img.save(path).expect("save png");
}

fn write_split(root: &Path, name: &str, n: usize) -> std::path::PathBuf {
    let mut csv = String::from(HEADER);
    for i in 0..n {
        let file = format!("{name}_{i}.png");
        let off = 4 + (i as u32 % 3) * 6;
        let bbox = [off, off, off + 28, off + 28];
        write_face(&root.join(&file), 64, 64, bbox);
        let (breed, label) = if i % 2 == 0 { ("Abyssinian", 0) } else { ("beagle", 4) };
        csv.push_str(&format!(
            "{file},64,64,{breed},{},{},{},{},{label}\n",
            bbox[0], bbox[1], bbox[2], bbox[3]
        ));
    }
    let path = root.join(format!("{name}.csv"));
    fs::write(&path, csv).expect("write csv");
    path
}

fn tiny_config(root: &Path) -> TrainConfig {
    let mut cfg = TrainConfig::default();
    cfg.data.train_csv = write_split(root, "train", 4);
    cfg.data.valid_csv = write_split(root, "valid", 2);
    cfg.data.test_csv = write_split(root, "test", 2);
    cfg.data.image_root = root.to_path_buf();
    cfg.model.depths = [1, 1, 1, 1];
    cfg.model.widths = [8, 8, 8, 8];
    cfg.model.fpn_channels = 8;
    cfg.model.head_convs = 1;
    cfg.optimizer.kind = OptimizerKind::Adam;
    cfg.optimizer.lr = 1e-3;
    cfg.scheduler.kind = ScheduleKind::Constant;
    cfg.trainer.epochs = 2;
    cfg.trainer.batch_size = 2;
    cfg.trainer.log_every = 1;
    cfg.trainer.checkpoint_dir = root.join("checkpoints");
    cfg.trainer.metrics_log = root.join("logs").join("metrics.jsonl");
    cfg.augment.target_size = (64, 64);
    cfg
}

#[test]
fn two_epochs_write_checkpoints_metrics_and_test_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = tiny_config(dir.path());
    cfg.validate().expect("valid config");

    let summary = train_with_config(&cfg).expect("train");
    assert_eq!(summary.epochs_run, 2);
    assert!(summary.best_loss.is_finite());
    assert!(summary.best_checkpoint.exists());
    assert!(summary.best_checkpoint.with_extension("json").exists());
    assert!(summary.last_checkpoint.exists());

    let log = fs::read_to_string(&cfg.trainer.metrics_log).expect("metrics log");
    let lines: Vec<EpochMetrics> = log
        .lines()
        .map(|l| serde_json::from_str(l).expect("jsonl"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1].epoch, 1);
    assert!(lines.iter().all(|m| m.val_loss.is_some()));

    let stats = summary.test_stats.expect("test evaluation ran");
    assert!(stats.ap <= 1.0);
}

#[test]
fn empty_training_split_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = tiny_config(dir.path());
    let empty = dir.path().join("empty.csv");
    fs::write(&empty, HEADER).expect("write");
    cfg.data.train_csv = empty;
    let err = train_with_config(&cfg).unwrap_err();
    assert!(err.to_string().contains("no images"), "{err}");
}

#[test]
fn anchor_levels_the_pyramid_cannot_serve_fail_without_panicking() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = tiny_config(dir.path());
    cfg.model.anchors.levels = vec![3, 4, 5, 6];
    assert!(cfg.validate().is_err());
    let err = train_with_config(&cfg).unwrap_err();
    assert!(format!("{err:#}").contains("anchors"), "{err:#}");
}

#[test]
fn rerun_replaces_the_metrics_log() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = tiny_config(dir.path());
    cfg.trainer.epochs = 1;
    cfg.trainer.evaluate_test = false;
    train_with_config(&cfg).expect("first run");
    train_with_config(&cfg).expect("second run");
    let log = fs::read_to_string(&cfg.trainer.metrics_log).expect("metrics log");
    assert_eq!(log.lines().count(), 1);
}
