//! Preprocessing for region crop images.
//!
//! The transform matches the one the extractors were trained with: resize
//! to a fixed square, center-crop, scale to `[0, 1]`, then normalize each
//! channel with the backbone's original pretraining statistics. Channels
//! stay in RGB order, laid out CHW.

use std::path::Path;

use anyhow::Result;
use image::{DynamicImage, imageops::FilterType};
use tract_onnx::prelude::Tensor;

use bonescan_utils::{
    center_crop, config::ImageSettings, load_rgb_image, rgb_to_chw_normalized, timing_guard,
};

/// Per-channel means from the backbone's pretraining normalization.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Per-channel standard deviations from the backbone's pretraining normalization.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resize and crop dimensions applied before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessConfig {
    /// Square edge length the image is resized to first.
    pub resize: u32,
    /// Square edge length of the final center crop.
    pub crop: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            resize: 256,
            crop: 224,
        }
    }
}

impl From<ImageSettings> for PreprocessConfig {
    fn from(settings: ImageSettings) -> Self {
        Self {
            resize: settings.resize,
            crop: settings.crop,
        }
    }
}

/// Preprocess an image file into an extractor-ready `[1, 3, crop, crop]` tensor.
///
/// Fails if the file cannot be decoded as an image.
///
/// # Arguments
///
/// * `path` - The path to the image file.
/// * `config` - Resize and crop dimensions.
pub fn preprocess_image<P: AsRef<Path>>(path: P, config: &PreprocessConfig) -> Result<Tensor> {
    let _guard = timing_guard("bonescan_core::preprocess_image", log::Level::Debug);
    let path_ref = path.as_ref();
    anyhow::ensure!(
        path_ref.exists(),
        "input image does not exist: {}",
        path_ref.display()
    );

    let rgb = load_rgb_image(path_ref)?;
    preprocess_dynamic_image(&DynamicImage::ImageRgb8(rgb), config)
}

/// Preprocess an in-memory image (useful for tests).
///
/// # Arguments
///
/// * `image` - The dynamic image to process.
/// * `config` - Resize and crop dimensions.
pub fn preprocess_dynamic_image(image: &DynamicImage, config: &PreprocessConfig) -> Result<Tensor> {
    let _guard = timing_guard("bonescan_core::preprocess_dynamic_image", log::Level::Trace);
    anyhow::ensure!(
        config.crop > 0 && config.resize >= config.crop,
        "invalid preprocess dimensions: resize {} must be >= crop {} > 0",
        config.resize,
        config.crop
    );

    let resized = bonescan_utils::resize_image(image, config.resize, config.resize, FilterType::Triangle);
    let cropped = center_crop(&resized, config.crop)?;
    let chw = rgb_to_chw_normalized(&cropped, IMAGENET_MEAN, IMAGENET_STD);

    let shape = [1usize, 3, config.crop as usize, config.crop as usize];
    let (data, offset) = chw.into_raw_vec_and_offset();
    debug_assert_eq!(offset, Some(0), "expected contiguous array");
    Tensor::from_shape(&shape, &data)
        .map_err(|e| anyhow::anyhow!("failed to build input tensor: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn uniform_image(width: u32, height: u32, rgb: [u8; 3]) -> DynamicImage {
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = image::Rgb(rgb);
        }
        DynamicImage::ImageRgb8(image)
    }

    #[test]
    fn output_tensor_has_single_sample_chw_shape() {
        let image = uniform_image(300, 180, [128, 128, 128]);
        let tensor = preprocess_dynamic_image(&image, &PreprocessConfig::default()).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn uniform_image_normalizes_per_channel() {
        let image = uniform_image(256, 256, [255, 0, 255]);
        let tensor = preprocess_dynamic_image(&image, &PreprocessConfig::default()).unwrap();
        let values = tensor.as_slice::<f32>().unwrap();
        let plane = 224 * 224;

        let expected_r = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let expected_g = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!((values[0] - expected_r).abs() < 1e-6);
        assert!((values[plane] - expected_g).abs() < 1e-6);
        assert!((values[2 * plane] - (1.0 - IMAGENET_MEAN[2]) / IMAGENET_STD[2]).abs() < 1e-6);
    }

    #[test]
    fn preprocessing_is_deterministic() {
        let mut image = RgbImage::new(97, 131);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
        }
        let image = DynamicImage::ImageRgb8(image);
        let config = PreprocessConfig::default();

        let first = preprocess_dynamic_image(&image, &config).unwrap();
        let second = preprocess_dynamic_image(&image, &config).unwrap();
        assert_eq!(
            first.as_slice::<f32>().unwrap(),
            second.as_slice::<f32>().unwrap()
        );
    }

    #[test]
    fn crop_larger_than_resize_is_rejected() {
        let image = uniform_image(64, 64, [0, 0, 0]);
        let config = PreprocessConfig {
            resize: 128,
            crop: 256,
        };
        assert!(preprocess_dynamic_image(&image, &config).is_err());
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let result = preprocess_image("no_such_scan.jpg", &PreprocessConfig::default());
        assert!(result.is_err());
    }
}
