//! Image preprocessing for model input
//!
//! Decode, force RGB, resize to 224x224, scale to [0, 1], normalize with the
//! ImageNet statistics the classifiers were trained with, and shape as a
//! single-item batch `[1, 3, 224, 224]`.

use std::path::Path;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::{DynamicImage, Rgb, RgbImage};

use crate::utils::error::{Result, XrayError};
use crate::IMAGE_SIZE;

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// File extensions accepted for uploaded X-rays
pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Number of values in one preprocessed image (CHW)
pub const INPUT_LEN: usize = 3 * IMAGE_SIZE * IMAGE_SIZE;

/// Per-channel `(min, max)` of normalized values, i.e. the images of 0 and 1
pub fn normalized_bounds() -> [(f32, f32); 3] {
    std::array::from_fn(|c| {
        (
            (0.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c],
            (1.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c],
        )
    })
}

/// Check that a path has one of the [`ACCEPTED_EXTENSIONS`] (case-insensitive)
pub fn check_extension(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if ACCEPTED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(XrayError::UnsupportedFormat(ext))
    }
}

/// Decode an in-memory image (JPEG or PNG)
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| XrayError::ImageDecode(e.to_string()))
}

/// Load an image file after checking its extension
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    check_extension(path)?;
    let bytes = std::fs::read(path)?;
    image::load_from_memory(&bytes)
        .map_err(|e| XrayError::ImageDecode(format!("{}: {}", path.display(), e)))
}

/// Contributing source range and normalized weights for every output index
fn resample_weights(src_len: usize, dst_len: usize) -> Vec<(usize, Vec<f32>)> {
    let scale = src_len as f32 / dst_len as f32;
    // Widen the kernel when downscaling so every source pixel contributes
    let support = scale.max(1.0);

    (0..dst_len)
        .map(|i| {
            let center = (i as f32 + 0.5) * scale;
            let start = (center - support).floor().max(0.0) as usize;
            let end = ((center + support).ceil() as usize).min(src_len);

            let mut weights: Vec<f32> = (start..end)
                .map(|s| {
                    let dist = ((s as f32 + 0.5) - center).abs() / support;
                    (1.0 - dist).max(0.0)
                })
                .collect();

            let total: f32 = weights.iter().sum();
            if total > 0.0 {
                weights.iter_mut().for_each(|w| *w /= total);
            }

            (start, weights)
        })
        .collect()
}

fn to_rgb(acc: [f32; 3]) -> Rgb<u8> {
    Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
}

/// Antialiased bilinear resize, matching PIL's `Image.resize(size, BILINEAR)`
///
/// Separable: a horizontal pass into an 8-bit intermediate, then a vertical
/// pass, as PIL does.
pub fn resize_bilinear(src: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_width, src_height) = src.dimensions();
    if (src_width, src_height) == (width, height) {
        return src.clone();
    }

    let x_weights = resample_weights(src_width as usize, width as usize);
    let y_weights = resample_weights(src_height as usize, height as usize);

    let mut horizontal = RgbImage::new(width, src_height);
    for y in 0..src_height {
        for (dx, (start, weights)) in x_weights.iter().enumerate() {
            let mut acc = [0.0f32; 3];
            for (k, w) in weights.iter().enumerate() {
                let pixel = src.get_pixel((start + k) as u32, y);
                for c in 0..3 {
                    acc[c] += pixel[c] as f32 * w;
                }
            }
            horizontal.put_pixel(dx as u32, y, to_rgb(acc));
        }
    }

    let mut output = RgbImage::new(width, height);
    for (dy, (start, weights)) in y_weights.iter().enumerate() {
        for x in 0..width {
            let mut acc = [0.0f32; 3];
            for (k, w) in weights.iter().enumerate() {
                let pixel = horizontal.get_pixel(x, (start + k) as u32);
                for c in 0..3 {
                    acc[c] += pixel[c] as f32 * w;
                }
            }
            output.put_pixel(x, dy as u32, to_rgb(acc));
        }
    }

    output
}

/// Normalize an RGB image to a flat vector with ImageNet normalization
/// Returns CHW layout: [C, H, W] flattened
pub fn normalize_image(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let num_pixels = (width * height) as usize;

    let mut normalized = vec![0.0f32; 3 * num_pixels];

    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            normalized[c * num_pixels + i] =
                (pixel[c] as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    normalized
}

/// Full transform: force RGB, resize to 224x224, normalize
pub fn preprocess_image(image: &DynamicImage) -> Result<Vec<f32>> {
    if image.width() == 0 || image.height() == 0 {
        return Err(XrayError::InvalidInput("image has no pixels".to_string()));
    }

    // Drops alpha and expands grayscale X-rays to three channels
    let rgb = image.to_rgb8();
    let resized = resize_bilinear(&rgb, IMAGE_SIZE as u32, IMAGE_SIZE as u32);

    Ok(normalize_image(&resized))
}

/// Shape preprocessed values as a single-item batch `[1, 3, 224, 224]`
pub fn to_tensor<B: Backend>(values: Vec<f32>, device: &B::Device) -> Result<Tensor<B, 4>> {
    if values.len() != INPUT_LEN {
        return Err(XrayError::InvalidInput(format!(
            "expected {} values, got {}",
            INPUT_LEN,
            values.len()
        )));
    }

    let data = TensorData::new(values, [1, 3, IMAGE_SIZE, IMAGE_SIZE]);
    Ok(Tensor::from_data(data, device))
}
