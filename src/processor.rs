//! This module turns a captured photo into a model-ready tensor.
//!
//! It defines the `ImageProcessor` trait for generic preprocessing and a
//! concrete `ImagePreprocessor` that performs, in order: EXIF orientation
//! correction, decode, alpha-channel removal, bilinear resize to the model's
//! trained resolution, optional horizontal mirroring for front-camera
//! captures, pixel normalization, and batch-axis insertion.

use image::{imageops, imageops::FilterType, DynamicImage, RgbImage};
use ndarray::{Array, Axis, Ix4};
use std::io::Cursor;

use crate::config::Normalization;
use crate::error::{ClassifierError, Result};

/// A trait for processing decoded images into model input tensors.
pub trait ImageProcessor {
    /// Processes a single image into a `[1, H, W, 3]` tensor.
    ///
    /// `mirror` flips the image left-right before normalization; pass `true`
    /// for front-camera captures, whose preview is mirrored but whose stored
    /// pixels are not.
    fn process(&self, image: &DynamicImage, mirror: bool) -> Array<f32, Ix4>;
}

/// Reads the EXIF orientation tag (0x0112) from raw image bytes.
///
/// Returns 1 (upright) when the bytes carry no EXIF data or no orientation
/// tag, so untagged images pass through unchanged.
fn read_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(reader) => reader,
        Err(_) => return 1,
    };
    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(1)
}

/// Applies an EXIF orientation value (1..=8) so pixel data is upright.
fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Decodes compressed photo bytes into an upright image.
///
/// Orientation metadata is honored before any numeric processing; camera
/// sensors and gallery-picked photos may carry rotation that must not leak
/// into the tensor.
pub fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage> {
    let orientation = read_orientation(bytes);
    let image = image::load_from_memory(bytes)
        .map_err(|e| ClassifierError::ImageDecode(e.to_string()))?;
    Ok(apply_orientation(image, orientation))
}

/// A preprocessor that resizes, mirrors, and normalizes photos into the
/// fixed-shape tensor a deployed model expects.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    pub height: u32,
    pub width: u32,
    pub normalization: Normalization,
}

impl ImagePreprocessor {
    /// Creates a new `ImagePreprocessor`.
    pub fn new(height: u32, width: u32, normalization: Normalization) -> Self {
        Self {
            height,
            width,
            normalization,
        }
    }

    /// Creates a preprocessor matching a model manifest's input contract.
    pub fn from_manifest(manifest: &crate::config::ModelManifest) -> Self {
        Self::new(
            manifest.input_size,
            manifest.input_size,
            manifest.normalization,
        )
    }

    /// Normalizes pixel values into an NHWC tensor with a batch axis.
    fn to_tensor(&self, image: &RgbImage) -> Array<f32, Ix4> {
        let mut tensor = Array::zeros((self.height as usize, self.width as usize, 3));
        for (x, y, pixel) in image.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            tensor[[y as usize, x as usize, 0]] = self.normalization.scale(r);
            tensor[[y as usize, x as usize, 1]] = self.normalization.scale(g);
            tensor[[y as usize, x as usize, 2]] = self.normalization.scale(b);
        }
        tensor.insert_axis(Axis(0))
    }
}

impl ImageProcessor for ImagePreprocessor {
    fn process(&self, image: &DynamicImage, mirror: bool) -> Array<f32, Ix4> {
        // RGB first: the model accepts exactly 3 channels, so any alpha
        // channel is dropped before resampling.
        let rgb = image.to_rgb8();
        let mut resized = imageops::resize(&rgb, self.width, self.height, FilterType::Triangle);
        if mirror {
            resized = imageops::flip_horizontal(&resized);
        }
        self.to_tensor(&resized)
    }
}
