//! MNIST IDX files.
//!
//! The four files are expected under one directory with their canonical names:
//! `train-images-idx3-ubyte`, `train-labels-idx1-ubyte`, `t10k-images-idx3-ubyte`,
//! `t10k-labels-idx1-ubyte`. All header fields are big-endian `u32`.

use std::path::Path;

use crate::data::normalize_pixels;
use crate::{Dataset, Error, Result};

pub const IMAGE_ROWS: usize = 28;
pub const IMAGE_COLS: usize = 28;
pub const NUM_CLASSES: usize = 10;

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

/// Raw pixels (0..=255) and integer labels for one split.
#[derive(Debug, Clone)]
pub struct RawSplit {
    /// `len * rows * cols` bytes, row-major per image.
    pub images: Vec<u8>,
    pub labels: Vec<u8>,
    pub rows: usize,
    pub cols: usize,
}

impl RawSplit {
    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Normalize pixels to `[0, 1]` and one-hot encode labels to width 10.
    pub fn into_dataset(self) -> Result<Dataset> {
        let input_dim = self.rows * self.cols;
        if self.images.len() != self.labels.len() * input_dim {
            return Err(Error::InvalidData(format!(
                "{} image bytes do not match {} labels of {}x{}",
                self.images.len(),
                self.labels.len(),
                self.rows,
                self.cols
            )));
        }
        Dataset::from_labels(
            normalize_pixels(&self.images),
            input_dim,
            &self.labels,
            NUM_CLASSES,
        )
    }
}

/// Read the training and test splits from `dir`.
pub fn load(dir: impl AsRef<Path>) -> Result<(RawSplit, RawSplit)> {
    let dir = dir.as_ref();
    let train = load_split(&dir.join(TRAIN_IMAGES), &dir.join(TRAIN_LABELS))?;
    let test = load_split(&dir.join(TEST_IMAGES), &dir.join(TEST_LABELS))?;
    log::debug!(
        "loaded MNIST from {}: {} train / {} test images",
        dir.display(),
        train.len(),
        test.len()
    );
    Ok((train, test))
}

fn load_split(images_path: &Path, labels_path: &Path) -> Result<RawSplit> {
    let image_bytes = std::fs::read(images_path).map_err(|e| Error::io(images_path, e))?;
    let label_bytes = std::fs::read(labels_path).map_err(|e| Error::io(labels_path, e))?;

    let (images, count, rows, cols) = parse_images(&image_bytes)?;
    let labels = parse_labels(&label_bytes)?;
    if labels.len() != count {
        return Err(Error::InvalidData(format!(
            "{} has {count} images but {} has {} labels",
            images_path.display(),
            labels_path.display(),
            labels.len()
        )));
    }

    Ok(RawSplit {
        images: images.to_vec(),
        labels: labels.to_vec(),
        rows,
        cols,
    })
}

/// Parse an IDX3 image file, returning `(pixels, count, rows, cols)`.
pub fn parse_images(data: &[u8]) -> Result<(&[u8], usize, usize, usize)> {
    let mut offset = 0;
    let magic = read_be_u32(data, &mut offset)?;
    if magic != IMAGES_MAGIC {
        return Err(Error::InvalidData(format!(
            "bad image file magic {magic}, expected {IMAGES_MAGIC}"
        )));
    }
    let count = read_be_u32(data, &mut offset)? as usize;
    let rows = read_be_u32(data, &mut offset)? as usize;
    let cols = read_be_u32(data, &mut offset)? as usize;
    if rows == 0 || cols == 0 {
        return Err(Error::InvalidData(format!(
            "image dimensions must be > 0, got {rows}x{cols}"
        )));
    }

    let end = count
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .and_then(|total| total.checked_add(offset))
        .ok_or_else(|| {
            Error::InvalidData(format!("image header {count}x{rows}x{cols} overflows"))
        })?;
    let pixels = data
        .get(offset..end)
        .ok_or_else(|| Error::InvalidData("image file is truncated".to_owned()))?;
    Ok((pixels, count, rows, cols))
}

/// Parse an IDX1 label file.
pub fn parse_labels(data: &[u8]) -> Result<&[u8]> {
    let mut offset = 0;
    let magic = read_be_u32(data, &mut offset)?;
    if magic != LABELS_MAGIC {
        return Err(Error::InvalidData(format!(
            "bad label file magic {magic}, expected {LABELS_MAGIC}"
        )));
    }
    let count = read_be_u32(data, &mut offset)? as usize;
    let end = offset
        .checked_add(count)
        .ok_or_else(|| Error::InvalidData(format!("label header count {count} overflows")))?;
    data.get(offset..end)
        .ok_or_else(|| Error::InvalidData("label file is truncated".to_owned()))
}

fn read_be_u32(data: &[u8], offset: &mut usize) -> Result<u32> {
    let bytes: [u8; 4] = data
        .get(*offset..*offset + 4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::InvalidData("IDX header is truncated".to_owned()))?;
    *offset += 4;
    Ok(u32::from_be_bytes(bytes))
}
