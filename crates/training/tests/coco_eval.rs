use data_contracts::FaceBox;
use training::CocoEvaluator;
use vision_core::interfaces::Detection;

fn gt(bbox: [f32; 4], label: usize) -> FaceBox {
    FaceBox { bbox_px: bbox, label }
}

fn det(bbox: [f32; 4], label: usize, score: f32) -> Detection {
    Detection {
        bbox_px: bbox,
        score,
        label,
        label_name: None,
    }
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}

#[test]
fn perfect_large_detections_score_one() {
    let mut ev = CocoEvaluator::new();
    let a = [10.0, 10.0, 110.0, 110.0];
    let b = [50.0, 20.0, 170.0, 140.0];
    ev.update(0, &[gt(a, 0)], &[det(a, 0, 0.9)]);
    ev.update(1, &[gt(b, 4)], &[det(b, 4, 0.8)]);
    let stats = ev.summarize();
    assert!(close(stats.ap, 1.0), "{stats}");
    assert!(close(stats.ap50, 1.0));
    assert!(close(stats.ap_large, 1.0));
    assert!(close(stats.ar100, 1.0));
    // no small or medium ground truth
    assert!(close(stats.ap_small, -1.0));
    assert!(close(stats.ap_medium, -1.0));
}

#[test]
fn higher_scored_false_positive_halves_precision() {
    let mut ev = CocoEvaluator::new();
    let face = [0.0, 0.0, 100.0, 100.0];
    let elsewhere = [200.0, 200.0, 300.0, 300.0];
    ev.update(7, &[gt(face, 2)], &[det(elsewhere, 2, 0.95), det(face, 2, 0.6)]);
    let stats = ev.summarize();
    assert!(close(stats.ap, 0.5), "{stats}");
    assert!(close(stats.ar1, 0.0));
    assert!(close(stats.ar10, 1.0));
}

#[test]
fn categories_come_from_ground_truth_only() {
    let mut ev = CocoEvaluator::new();
    let face = [5.0, 5.0, 105.0, 105.0];
    ev.update(
        0,
        &[gt(face, 1)],
        &[det(face, 1, 0.7), det([0.0, 0.0, 40.0, 40.0], 30, 0.99)],
    );
    assert_eq!(ev.categories(), vec![1]);
    assert!(close(ev.summarize().ap, 1.0));
}
