//! Annotation CSV loading.

use crate::types::{DatasetResult, FaceDatasetError};
use data_contracts::{group_rows, AnnotationRow, ImageRecord, LabelMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Parse and validate every row of an annotation CSV, then group rows by filename.
/// The first invalid row aborts the load.
pub fn load_csv(path: &Path, label_map: Option<&LabelMap>) -> DatasetResult<Vec<ImageRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| FaceDatasetError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

    let mut rows = Vec::new();
    for (i, result) in reader.deserialize::<AnnotationRow>().enumerate() {
        let row = result.map_err(|source| FaceDatasetError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        row.validate(label_map)
            .map_err(|source| FaceDatasetError::Validation {
                path: path.to_path_buf(),
                row: i + 1,
                source,
            })?;
        rows.push(row);
    }
    let records = group_rows(rows);
    debug!(
        path = %path.display(),
        images = records.len(),
        "parsed annotation csv"
    );
    Ok(records)
}

/// File size in MiB, for load-time logging.
pub fn file_size_mib(path: &Path) -> DatasetResult<f64> {
    let meta = std::fs::metadata(path).map_err(|source| FaceDatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(meta.len() as f64 / (1024.0 * 1024.0))
}

/// A split loaded from one CSV, with images resolved against `image_root`.
#[derive(Debug, Clone)]
pub struct FaceDataset {
    source: PathBuf,
    image_root: PathBuf,
    records: Vec<ImageRecord>,
    label_map: LabelMap,
}

impl FaceDataset {
    pub fn load(csv_path: &Path, image_root: &Path, label_map: LabelMap) -> DatasetResult<Self> {
        let records = load_csv(csv_path, Some(&label_map))?;
        let ds = Self {
            source: csv_path.to_path_buf(),
            image_root: image_root.to_path_buf(),
            records,
            label_map,
        };
        info!(
            "Loaded {} ({:.3} MiB): {} images, {} boxes",
            csv_path.display(),
            file_size_mib(csv_path)?,
            ds.len(),
            ds.num_boxes()
        );
        Ok(ds)
    }

    pub fn from_records(
        records: Vec<ImageRecord>,
        image_root: &Path,
        label_map: LabelMap,
    ) -> Self {
        Self {
            source: PathBuf::new(),
            image_root: image_root.to_path_buf(),
            records,
            label_map,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn image_root(&self) -> &Path {
        &self.image_root
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn label_map(&self) -> &LabelMap {
        &self.label_map
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn num_boxes(&self) -> usize {
        self.records.iter().map(|r| r.boxes.len()).sum()
    }

    /// Absolute filenames are kept as-is.
    pub fn image_path(&self, record: &ImageRecord) -> PathBuf {
        resolve_image_path(&self.image_root, &record.filename)
    }
}

pub fn resolve_image_path(root: &Path, filename: &str) -> PathBuf {
    let p = Path::new(filename);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

pub(crate) fn load_image(path: &Path) -> DatasetResult<image::RgbImage> {
    if !path.exists() {
        return Err(FaceDatasetError::MissingImage {
            path: path.to_path_buf(),
        });
    }
    let img = image::open(path).map_err(|source| FaceDatasetError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(img.to_rgb8())
}
