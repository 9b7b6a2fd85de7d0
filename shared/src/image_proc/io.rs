//! Display conversion and PNG export for exposure pixel data.

use image::{ImageBuffer, ImageResult, Luma};
use ndarray::{Array2, ArrayView2};
use std::path::Path;

/// Write an 8-bit grayscale array to disk.
///
/// The file format is determined from the extension. Row 0 of the array is
/// written as the top row of the file.
pub fn save_u8_image<P: AsRef<Path>>(image: &Array2<u8>, path: P) -> ImageResult<()> {
    let (height, width) = image.dim();

    let mut img_buffer = ImageBuffer::new(width as u32, height as u32);
    for (x, y, pixel) in img_buffer.enumerate_pixels_mut() {
        *pixel = Luma([image[[y as usize, x as usize]]]);
    }

    img_buffer.save(path)
}

/// Value at `percentile` (0-100) of the finite pixels, by nearest rank.
pub fn percentile(image: &ArrayView2<f32>, percentile: f64) -> Option<f32> {
    let mut values: Vec<f32> = image.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f32::total_cmp);

    let rank = (percentile.clamp(0.0, 100.0) / 100.0 * (values.len() - 1) as f64).round();
    Some(values[rank as usize])
}

/// Map pixel values linearly onto 0-255 between two percentiles.
///
/// Values below the lower percentile become 0 and values above the upper
/// become 255. Non-finite pixels are written as 0. A flat image maps to 0.
pub fn linear_stretch_to_u8(
    image: &ArrayView2<f32>,
    lower_percentile: f64,
    upper_percentile: f64,
) -> Array2<u8> {
    let (Some(low), Some(high)) = (
        percentile(image, lower_percentile),
        percentile(image, upper_percentile),
    ) else {
        return Array2::zeros(image.dim());
    };

    let span = high - low;
    if span <= 0.0 {
        return Array2::zeros(image.dim());
    }

    image.mapv(|v| {
        if !v.is_finite() {
            return 0;
        }
        (((v - low) / span).clamp(0.0, 1.0) * 255.0).round() as u8
    })
}
