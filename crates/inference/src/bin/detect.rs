use anyhow::Context;
use clap::Parser;
use cli_support::{ThresholdArgs, ThresholdOpts, WeightsArgs, WeightsOpts};
use inference::{InferenceFactory, InferenceThresholds};
use std::path::PathBuf;
use vision_core::interfaces::Frame;
use tracing::warn;
use vision_core::overlay::{draw_labeled_detections, load_font, load_system_font};

#[derive(Parser, Debug)]
#[command(name = "detect", about = "Detect cat and dog faces in an image")]
struct Args {
    /// Input image (png or jpeg).
    image: PathBuf,
    #[command(flatten)]
    weights: WeightsArgs,
    #[command(flatten)]
    thresholds: ThresholdArgs,
    /// Write the image with boxes drawn to this path.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Font for overlay captions (a system font is tried when absent).
    #[arg(long)]
    font: Option<PathBuf>,
    /// Print detections as JSON instead of text.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing();
    let args = Args::parse();
    let image = image::open(&args.image)
        .with_context(|| format!("opening {}", args.image.display()))?
        .to_rgb8();

    let thresholds = ThresholdOpts::from(&args.thresholds);
    let weights = WeightsOpts::from(&args.weights);
    let mut detector = InferenceFactory.build(
        InferenceThresholds::new(thresholds.score_thresh, thresholds.iou_thresh),
        weights.detector_weights.as_deref(),
    );

    let mut frame = Frame::new(0, image);
    frame.path = Some(args.image.clone());
    let result = detector.detect(&frame);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}: {} face(s)", args.image.display(), result.detections.len());
        for det in &result.detections {
            let [x0, y0, x1, y1] = det.bbox_px;
            println!(
                "  {:<28} {:.3}  [{x0:.1}, {y0:.1}, {x1:.1}, {y1:.1}]",
                det.label_name.as_deref().unwrap_or("unknown"),
                det.score
            );
        }
    }

    if let Some(out) = args.out {
        let font = match &args.font {
            Some(path) => load_font(path),
            None => load_system_font(),
        };
        if font.is_none() {
            warn!("no usable font; overlay boxes will have no captions");
        }
        let mut canvas = frame.image;
        let drawn = draw_labeled_detections(&mut canvas, &result.detections, 2, font.as_ref());
        canvas
            .save(&out)
            .with_context(|| format!("writing overlay {}", out.display()))?;
        println!("wrote {} box(es) to {}", drawn, out.display());
    }
    Ok(())
}
