use anyhow::Context;
use clap::Parser;
use data_contracts::LabelMap;
use face_dataset::{summarize_with_thresholds, FaceDataset, ValidationOutcome, ValidationThresholds};
use std::path::{Path, PathBuf};
use training::TrainConfig;

#[derive(Parser, Debug)]
#[command(
    name = "dataset_summary",
    about = "Per-breed box counts and validation outcome for an annotation CSV"
)]
struct Args {
    /// TOML config whose data.labels name the classes (same lookup as `train`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Annotation CSV.
    #[arg(long)]
    csv: PathBuf,
    /// Directory the CSV filenames are relative to (defaults to the CSV's directory).
    #[arg(long)]
    image_root: Option<PathBuf>,
    /// Print the summary as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn label_map(config: Option<&Path>) -> anyhow::Result<LabelMap> {
    let cfg = TrainConfig::load(config).context("loading config")?;
    Ok(cfg.label_map())
}

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing();
    let args = Args::parse();
    let image_root = args.image_root.clone().unwrap_or_else(|| {
        args.csv
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    });
    let labels = label_map(args.config.as_deref())?;
    let dataset = FaceDataset::load(&args.csv, &image_root, labels)
        .with_context(|| format!("loading {}", args.csv.display()))?;
    let report = summarize_with_thresholds(&dataset, &ValidationThresholds::from_env());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let s = &report.summary;
        println!("{}", s.source.display());
        println!(
            "  images: {}  boxes: {}  empty: {}  missing files: {}",
            s.images,
            s.boxes,
            s.empty_images,
            s.missing()
        );
        for (species, count) in &s.per_species {
            println!("  {species:<28} {count}");
        }
        for (breed, count) in &s.per_breed {
            println!("    {breed:<26} {count}");
        }
        println!("outcome: {}", report.outcome.as_str());
        for reason in &report.reasons {
            println!("  - {reason}");
        }
    }
    if report.outcome == ValidationOutcome::Fail {
        anyhow::bail!("dataset validation failed for {}", args.csv.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_labels_come_from_the_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pets.toml");
        std::fs::write(
            &path,
            "[data]\nlabels = [\"tabby\", \"pug\"]\n[model]\nnum_classes = 2\n",
        )
        .expect("write");
        let labels = label_map(Some(&path)).expect("labels");
        assert_eq!(labels.names(), ["tabby", "pug"]);
    }
}
