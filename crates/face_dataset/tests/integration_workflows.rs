use burn::backend::NdArray;
use data_contracts::LabelMap;
use face_dataset::{
    load_csv, summarize_with_thresholds, BatchConfig, BatchIter, FaceDataset, FaceDatasetError,
    ResizeMode, TransformPipeline, TransformPipelineBuilder, ValidationOutcome, ValidationThresholds,
};
use std::fs;
use std::path::Path;

const HEADER: &str = "filename,width,height,class,xmin,ymin,xmax,ymax,labels\n";

fn write_image(path: &Path, w: u32, h: u32) {
    image::RgbImage::from_pixel(w, h, image::Rgb([120, 80, 40]))
        .save(path)
        .expect("save png");
}

fn write_fixture(root: &Path) -> std::path::PathBuf {
    write_image(&root.join("Abyssinian_1.png"), 64, 48);
    write_image(&root.join("beagle_2.png"), 32, 32);
    write_image(&root.join("pug_3.png"), 40, 40);
    let csv = format!(
        "{HEADER}\
         Abyssinian_1.png,64,48,Abyssinian,4,4,30,30,0\n\
         beagle_2.png,32,32,beagle,2,2,20,20,4\n\
         Abyssinian_1.png,64,48,Abyssinian,30,10,60,40,0\n\
         pug_3.png,,,,5,5,35,35,25\n"
    );
    let path = root.join("train.csv");
    fs::write(&path, csv).expect("write csv");
    path
}

#[test]
fn csv_rows_group_by_filename() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = write_fixture(dir.path());
    let map = LabelMap::oxford_pets();
    let records = load_csv(&csv, Some(&map)).expect("load");
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].filename, "Abyssinian_1.png");
    assert_eq!(records[0].boxes.len(), 2);
    assert_eq!(records[1].image_id, 1);
    assert_eq!(records[2].width, None);
}

#[test]
fn invalid_row_reports_its_row_number() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.csv");
    fs::write(
        &path,
        format!("{HEADER}a.png,10,10,Abyssinian,0,0,5,5,0\nb.png,10,10,beagle,8,8,2,2,4\n"),
    )
    .expect("write");
    match load_csv(&path, None) {
        Err(FaceDatasetError::Validation { row, .. }) => assert_eq!(row, 2),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn summary_counts_breeds_and_missing_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = write_fixture(dir.path());
    fs::remove_file(dir.path().join("pug_3.png")).expect("remove");
    let ds = FaceDataset::load(&csv, dir.path(), LabelMap::oxford_pets()).expect("load");

    let report = summarize_with_thresholds(
        &ds,
        &ValidationThresholds {
            max_missing: Some(0),
            ..Default::default()
        },
    );
    assert_eq!(report.outcome, ValidationOutcome::Fail);
    let summary = &report.summary;
    assert_eq!(summary.boxes, 4);
    assert_eq!(summary.per_breed.get("Abyssinian"), Some(&2));
    assert_eq!(summary.per_species.get("cat"), Some(&2));
    assert_eq!(summary.per_species.get("dog"), Some(&2));
    assert_eq!(summary.missing(), 1);
}

#[test]
fn batches_have_padded_targets_and_drop_last() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = write_fixture(dir.path());
    let ds = FaceDataset::load(&csv, dir.path(), LabelMap::oxford_pets()).expect("load");
    let pipeline = TransformPipeline::eval((32, 32), ResizeMode::Force);
    let mut iter = BatchIter::new(
        ds,
        pipeline,
        BatchConfig {
            batch_size: 2,
            drop_last: true,
            ..BatchConfig::eval(2)
        },
    );
    assert_eq!(iter.num_batches(), 1);

    let device = Default::default();
    let batch = iter
        .next_batch::<NdArray<f32>>(&device)
        .expect("batch")
        .expect("some");
    assert_eq!(batch.images.dims(), [2, 3, 32, 32]);
    assert_eq!(batch.boxes.dims()[0], 2);
    let mask = batch.box_mask.into_data().to_vec::<f32>().expect("mask");
    let max_boxes = mask.len() / 2;
    assert_eq!(&mask[0..2], &[1.0, 1.0]);
    assert_eq!(mask[max_boxes], 1.0);
    assert_eq!(mask[max_boxes + 1], 0.0);
    assert_eq!(batch.meta[0].orig_size, (64, 48));
    assert_eq!(batch.meta[0].scale, (0.5, 32.0 / 48.0));

    assert!(iter
        .next_batch::<NdArray<f32>>(&device)
        .expect("tail")
        .is_none());

    iter.reset();
    assert!(iter
        .next_batch::<NdArray<f32>>(&device)
        .expect("again")
        .is_some());
}

#[test]
fn permissive_mode_skips_unreadable_images() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = write_fixture(dir.path());
    fs::write(dir.path().join("beagle_2.png"), b"not an image").expect("corrupt");
    let ds = FaceDataset::load(&csv, dir.path(), LabelMap::oxford_pets()).expect("load");
    let pipeline = TransformPipeline::eval((16, 16), ResizeMode::Letterbox);

    let mut strict = BatchIter::new(
        ds.clone(),
        pipeline.clone(),
        BatchConfig {
            permissive: false,
            ..BatchConfig::eval(8)
        },
    );
    let device = Default::default();
    assert!(strict.next_batch::<NdArray<f32>>(&device).is_err());

    let mut lenient = BatchIter::new(
        ds,
        pipeline,
        BatchConfig {
            permissive: true,
            ..BatchConfig::eval(8)
        },
    );
    let batch = lenient
        .next_batch::<NdArray<f32>>(&device)
        .expect("batch")
        .expect("some");
    assert_eq!(batch.len(), 2);
    assert_eq!(lenient.skipped(), 1);
}

fn write_many(root: &Path, n: usize) -> std::path::PathBuf {
    let mut csv = String::from(HEADER);
    for i in 0..n {
        let file = format!("pet_{i}.png");
        let shade = 30 + 20 * i as u8;
        image::RgbImage::from_pixel(24, 24, image::Rgb([shade, 100, 200 - shade]))
            .save(root.join(&file))
            .expect("save png");
        csv.push_str(&format!("{file},24,24,beagle,2,2,20,20,4\n"));
    }
    let path = root.join("many.csv");
    fs::write(&path, csv).expect("write csv");
    path
}

fn jitter_pipeline(seed: u64) -> TransformPipeline {
    TransformPipelineBuilder::new()
        .target_size((16, 16))
        .color_jitter(1.0, 0.4)
        .noise(1.0, 0.1)
        .seed(Some(seed))
        .build()
}

fn seeded_iter(ds: FaceDataset, seed: u64) -> BatchIter {
    BatchIter::new(
        ds,
        jitter_pipeline(seed),
        BatchConfig {
            shuffle: true,
            seed: Some(seed),
            ..BatchConfig::eval(3)
        },
    )
}

fn drain(iter: &mut BatchIter) -> (Vec<u64>, Vec<f32>) {
    let device = Default::default();
    let mut ids = Vec::new();
    let mut pixels = Vec::new();
    while let Some(batch) = iter.next_batch::<NdArray<f32>>(&device).expect("batch") {
        ids.extend(batch.meta.iter().map(|m| m.image_id));
        pixels.extend(batch.images.into_data().to_vec::<f32>().expect("pixels"));
    }
    (ids, pixels)
}

#[test]
fn same_seed_gives_same_order_and_pixels() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = write_many(dir.path(), 8);
    let ds = FaceDataset::load(&csv, dir.path(), LabelMap::oxford_pets()).expect("load");

    let (ids_a, px_a) = drain(&mut seeded_iter(ds.clone(), 11));
    let (ids_b, px_b) = drain(&mut seeded_iter(ds, 11));
    assert_eq!(ids_a.len(), 8);
    assert_eq!(ids_a, ids_b);
    assert_eq!(px_a, px_b);
}

#[test]
fn reset_reshuffles_the_epoch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = write_many(dir.path(), 8);
    let ds = FaceDataset::load(&csv, dir.path(), LabelMap::oxford_pets()).expect("load");
    let mut iter = seeded_iter(ds, 5);

    let (first, _) = drain(&mut iter);
    let mut changed = false;
    for _ in 0..4 {
        iter.reset();
        let (next, _) = drain(&mut iter);
        let mut sorted = next.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..8).collect::<Vec<u64>>());
        changed |= next != first;
    }
    assert!(changed, "order never changed across epochs: {first:?}");
}

#[test]
fn augmentation_varies_with_salt_but_repeats_per_salt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv = write_many(dir.path(), 1);
    let records = load_csv(&csv, None).expect("load");
    let img = image::open(dir.path().join("pet_0.png"))
        .expect("open")
        .to_rgb8();
    let pipeline = jitter_pipeline(3);

    let epoch0 = pipeline.apply(img.clone(), &records[0], 0);
    let epoch0_again = pipeline.apply(img.clone(), &records[0], 0);
    let epoch1 = pipeline.apply(img, &records[0], 1);
    assert_eq!(epoch0.image_chw, epoch0_again.image_chw);
    assert_ne!(epoch0.image_chw, epoch1.image_chw);
}
