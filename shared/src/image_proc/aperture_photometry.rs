//! Aperture photometry utilities.
//!
//! Pixels are included when their centre falls within the aperture. Centres
//! are given in array coordinates, `x` along columns and `y` along rows.

use ndarray::ArrayView2;

/// Values inside a circle of `aperture_radius`, plus those in the optional
/// `(inner, outer)` annulus around the same sub-pixel centre.
///
/// The second vector is empty when no annulus is given.
pub fn collect_aperture_pixels(
    image: &ArrayView2<f64>,
    x_center: f64,
    y_center: f64,
    aperture_radius: f64,
    background_radii: Option<(f64, f64)>,
) -> (Vec<f64>, Vec<f64>) {
    let (height, width) = image.dim();
    let outer = background_radii.map_or(aperture_radius, |(_, outer)| outer.max(aperture_radius));

    if height == 0 || width == 0 || !(outer >= 0.0) {
        return (Vec::new(), Vec::new());
    }

    let reach = outer.ceil() as isize;
    let x_min = (x_center.floor() as isize - reach).max(0) as usize;
    let x_max = (x_center.ceil() as isize + reach + 1).clamp(0, width as isize) as usize;
    let y_min = (y_center.floor() as isize - reach).max(0) as usize;
    let y_max = (y_center.ceil() as isize + reach + 1).clamp(0, height as isize) as usize;

    let mut aperture_pixels = Vec::new();
    let mut background_pixels = Vec::new();

    for y in y_min..y_max {
        for x in x_min..x_max {
            let dx = x as f64 - x_center;
            let dy = y as f64 - y_center;
            let distance = (dx * dx + dy * dy).sqrt();

            if distance <= aperture_radius {
                aperture_pixels.push(image[[y, x]]);
            } else if let Some((inner, outer)) = background_radii {
                if distance >= inner && distance <= outer {
                    background_pixels.push(image[[y, x]]);
                }
            }
        }
    }

    (aperture_pixels, background_pixels)
}

/// Sum of pixel values whose centres lie within `radius` of `(x_center, y_center)`.
pub fn aperture_sum(image: &ArrayView2<f64>, x_center: f64, y_center: f64, radius: f64) -> f64 {
    collect_aperture_pixels(image, x_center, y_center, radius, None)
        .0
        .iter()
        .sum()
}
