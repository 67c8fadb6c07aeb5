use inference::InferenceError;
use inference::prelude::{InferenceFactory, InferenceThresholds, RetinaNetDetector};
use models::{save_checkpoint, CheckpointMeta, RetinaNetConfig};
use std::path::Path;
use vision_core::anchors::AnchorConfig;
use vision_core::prelude::{Detector, Frame};

fn tiny_checkpoint(dir: &Path, letterbox: bool) -> std::path::PathBuf {
    write_checkpoint(dir, letterbox, AnchorConfig::default())
}

fn write_checkpoint(dir: &Path, letterbox: bool, anchors: AnchorConfig) -> std::path::PathBuf {
    let meta = CheckpointMeta {
        model: RetinaNetConfig {
            num_classes: 2,
            depths: [1, 1, 1, 1],
            widths: [8, 8, 8, 8],
            fpn_channels: 8,
            head_convs: 1,
            anchors,
            ..Default::default()
        },
        input_size: (64, 64),
        letterbox,
        labels: vec!["Abyssinian".into(), "beagle".into()],
        epoch: 0,
        val_loss: None,
    };
    let device = Default::default();
    let model = meta.model.init::<inference::InferenceBackend>(&device);
    let path = dir.join("best.bin");
    save_checkpoint(&model, &meta, &path).expect("save checkpoint");
    path
}

#[test]
fn factory_returns_empty_detector_without_weights() {
    let mut detector = InferenceFactory.build(InferenceThresholds::default(), None);
    let result = detector.detect(&Frame::new(0, image::RgbImage::new(1, 1)));
    assert_eq!(result.frame_id, 0);
    assert!(result.detections.is_empty());
}

#[test]
fn factory_falls_back_on_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nope.bin");
    let mut detector = InferenceFactory.build(InferenceThresholds::default(), Some(&missing));
    let result = detector.detect(&Frame::new(9, image::RgbImage::new(4, 4)));
    assert_eq!(result.frame_id, 9);
    assert!(result.detections.is_empty());
}

#[test]
fn checkpoint_detections_lie_inside_the_original_frame() {
    let dir = tempfile::tempdir().expect("tempdir");
    let weights = tiny_checkpoint(dir.path(), true);
    let thresh = InferenceThresholds {
        score_thresh: 0.0,
        iou_thresh: 0.5,
        detections_per_img: 7,
    };
    let detector = RetinaNetDetector::load(&weights, thresh).expect("load");
    assert_eq!(detector.labels().names(), ["Abyssinian", "beagle"]);

    let frame = Frame::new(1, image::RgbImage::from_pixel(120, 40, image::Rgb([90, 60, 30])));
    let dets = detector.run(&frame).expect("run");
    assert!(!dets.is_empty());
    assert!(dets.len() <= 7);
    for d in &dets {
        let [x0, y0, x1, y1] = d.bbox_px;
        assert!(x0 >= 0.0 && y0 >= 0.0 && x1 <= 120.0 && y1 <= 40.0, "{:?}", d.bbox_px);
        assert!(d.label_name.is_some());
    }
    assert!(dets.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn anchor_levels_mismatching_the_pyramid_are_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let anchors = AnchorConfig {
        levels: vec![3, 4, 5, 6],
        ..Default::default()
    };
    let weights = write_checkpoint(dir.path(), false, anchors);
    let mut detector = RetinaNetDetector::load(&weights, InferenceThresholds::default()).expect("load");
    let frame = Frame::new(2, image::RgbImage::new(64, 64));
    assert!(matches!(
        detector.run(&frame),
        Err(InferenceError::AnchorMismatch { .. })
    ));
    assert!(detector.detect(&frame).detections.is_empty());
}
