use data_contracts::{group_rows, AnnotationRow, CocoStats, LabelMap, ValidationError};

fn row(filename: &str, bbox: [f32; 4], label: usize) -> AnnotationRow {
    AnnotationRow {
        filename: filename.into(),
        width: Some(200),
        height: Some(100),
        class_name: None,
        xmin: bbox[0],
        ymin: bbox[1],
        xmax: bbox[2],
        ymax: bbox[3],
        labels: label,
    }
}

#[test]
fn inverted_box_rejected() {
    let r = row("a.jpg", [50.0, 10.0, 20.0, 40.0], 0);
    assert!(matches!(r.validate(None), Err(ValidationError::EmptyBox(_))));
}

#[test]
fn box_outside_image_rejected() {
    let r = row("a.jpg", [10.0, 10.0, 250.0, 40.0], 0);
    assert!(matches!(
        r.validate(None),
        Err(ValidationError::OutOfBounds { width: 200, .. })
    ));
}

#[test]
fn label_and_class_must_agree() {
    let map = LabelMap::oxford_pets();
    let mut r = row("a.jpg", [10.0, 10.0, 50.0, 40.0], 19);
    assert!(r.validate(Some(&map)).is_ok());

    r.class_name = Some("pug".into());
    assert!(matches!(
        r.validate(Some(&map)),
        Err(ValidationError::ClassMismatch { label: 19, .. })
    ));

    r.labels = 99;
    r.class_name = None;
    assert!(matches!(
        r.validate(Some(&map)),
        Err(ValidationError::LabelOutOfRange { label: 99, .. })
    ));
}

#[test]
fn rows_group_by_filename_in_first_seen_order() {
    let rows = vec![
        row("b.jpg", [0.0, 0.0, 10.0, 10.0], 1),
        row("a.jpg", [0.0, 0.0, 10.0, 10.0], 2),
        row("b.jpg", [20.0, 20.0, 30.0, 30.0], 3),
    ];
    let records = group_rows(rows);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].filename, "b.jpg");
    assert_eq!(records[0].image_id, 0);
    assert_eq!(records[0].labels().collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(records[1].image_id, 1);
}

#[test]
fn coco_report_formats_twelve_lines() {
    let stats = CocoStats::from_array([0.594; 12]);
    let report = stats.to_string();
    assert_eq!(report.lines().count(), 12);
    assert!(report.lines().next().unwrap_or_default().contains("IoU=0.50:0.95"));
    assert!(report.contains("= 0.594"));

    let json = serde_json::to_string(&stats).unwrap();
    let back: CocoStats = serde_json::from_str(&json).unwrap();
    assert_eq!(back, stats);
}
