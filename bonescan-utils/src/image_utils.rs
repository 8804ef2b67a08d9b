use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage, imageops::FilterType};
use ndarray::Array3;

/// Load an image from disk and force a 3-channel RGB representation.
///
/// # Arguments
///
/// * `path` - The path to the image file.
pub fn load_rgb_image<P: AsRef<Path>>(path: P) -> Result<RgbImage> {
    let path_ref = path.as_ref();
    let image = image::open(path_ref)
        .with_context(|| format!("failed to decode image {}", path_ref.display()))?;
    Ok(image.to_rgb8())
}

/// Resize an image to the requested resolution using the provided filter.
///
/// # Arguments
///
/// * `image` - The image to resize.
/// * `width` - The target width.
/// * `height` - The target height.
/// * `filter` - The sampling filter to use for resizing.
pub fn resize_image(image: &DynamicImage, width: u32, height: u32, filter: FilterType) -> RgbImage {
    image.resize_exact(width, height, filter).to_rgb8()
}

/// Extract a centered square crop of `size x size` pixels.
///
/// # Arguments
///
/// * `image` - The source image; both dimensions must be >= `size`.
/// * `size` - The edge length of the crop.
pub fn center_crop(image: &RgbImage, size: u32) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    anyhow::ensure!(
        width >= size && height >= size,
        "cannot center-crop {size}x{size} from a {width}x{height} image"
    );
    let x = (width - size) / 2;
    let y = (height - size) / 2;
    Ok(image::imageops::crop_imm(image, x, y, size, size).to_image())
}

/// Convert an RGB image into a CHW array scaled to `[0, 1]` and normalized
/// per channel with the provided mean and standard deviation.
///
/// This rearranges the memory layout from HWC (height, width, channels) to
/// CHW (channels, height, width); the channel order stays RGB.
///
/// # Arguments
///
/// * `image` - The RGB image to convert.
/// * `mean` - Per-channel means subtracted after scaling to `[0, 1]`.
/// * `std` - Per-channel standard deviations divided out after the mean.
pub fn rgb_to_chw_normalized(image: &RgbImage, mean: [f32; 3], std: [f32; 3]) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut array = Array3::<f32>::zeros((3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let (xi, yi) = (x as usize, y as usize);
        for channel in 0..3 {
            let scaled = pixel[channel] as f32 / 255.0;
            array[(channel, yi, xi)] = (scaled - mean[channel]) / std[channel];
        }
    }
    array
}
