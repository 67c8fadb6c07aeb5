use vision_core::interfaces::Detection;
use vision_core::overlay::{
    caption, draw_detections, draw_labeled_detections, draw_rect, label_color, load_font,
    load_system_font, normalize_box,
};

#[test]
fn normalize_and_draw_box() {
    let bbox = normalize_box([0.1, 0.2, 0.3, 0.4], (100, 200)).expect("bbox");
    assert_eq!(bbox, [10, 40, 30, 80]);

    let mut img = image::RgbImage::new(40, 40);
    draw_rect(&mut img, [5, 5, 10, 10], image::Rgb([255, 0, 0]), 2);
    // Expect the four corners to be colored.
    assert_eq!(img.get_pixel(5, 5), &image::Rgb([255, 0, 0]));
    assert_eq!(img.get_pixel(10, 5), &image::Rgb([255, 0, 0]));
    assert_eq!(img.get_pixel(5, 10), &image::Rgb([255, 0, 0]));
    assert_eq!(img.get_pixel(10, 10), &image::Rgb([255, 0, 0]));
    // Interior untouched.
    assert_eq!(img.get_pixel(8, 8), &image::Rgb([0, 0, 0]));
}

#[test]
fn detections_are_drawn_in_label_colors_and_clamped() {
    let mut img = image::RgbImage::new(32, 32);
    let dets = vec![
        Detection {
            bbox_px: [2.0, 2.0, 12.0, 12.0],
            score: 0.9,
            label: 0,
            label_name: Some("Abyssinian".into()),
        },
        Detection {
            bbox_px: [20.0, 20.0, 80.0, 80.0],
            score: 0.7,
            label: 3,
            label_name: None,
        },
    ];
    let drawn = draw_detections(&mut img, &dets, 1);
    assert_eq!(drawn, 2);
    assert_eq!(img.get_pixel(2, 2), &label_color(0));
    assert_eq!(img.get_pixel(31, 31), &label_color(3));
    assert_ne!(label_color(0), label_color(3));
}

fn beagle(score: f32) -> Detection {
    Detection {
        bbox_px: [10.0, 30.0, 60.0, 70.0],
        score,
        label: 4,
        label_name: Some("beagle".into()),
    }
}

#[test]
fn captions_name_the_breed_and_score() {
    assert_eq!(caption(&beagle(0.876)), "beagle 0.88");
    let unnamed = Detection {
        label_name: None,
        ..beagle(0.5)
    };
    assert_eq!(caption(&unnamed), "class 4 0.50");
}

#[test]
fn missing_font_falls_back_to_plain_boxes() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(load_font(&dir.path().join("none.ttf")).is_none());
    let garbage = dir.path().join("garbage.ttf");
    std::fs::write(&garbage, b"not a font").expect("write");
    assert!(load_font(&garbage).is_none());

    let dets = vec![beagle(0.9)];
    let mut plain = image::RgbImage::new(80, 80);
    let mut labeled = image::RgbImage::new(80, 80);
    draw_detections(&mut plain, &dets, 2);
    draw_labeled_detections(&mut labeled, &dets, 2, None);
    assert_eq!(plain, labeled);
}

#[test]
fn captions_are_drawn_above_the_box_when_a_font_exists() {
    let Some(font) = load_system_font() else {
        return;
    };
    let dets = vec![beagle(0.9)];
    let mut img = image::RgbImage::new(120, 80);
    assert_eq!(draw_labeled_detections(&mut img, &dets, 1, Some(&font)), 1);
    let strip_touched = (0..30).any(|y| (10..60).any(|x| img.get_pixel(x, y) != &image::Rgb([0, 0, 0])));
    assert!(strip_touched);
}
