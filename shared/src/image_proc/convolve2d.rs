//! 2D convolution in direct space.
//!
//! Kernels are applied as a true convolution (flipped), so asymmetric
//! kernels shift flux in the direction their mass is offset. Only output
//! pixels whose full kernel footprint lies inside the input are produced;
//! callers pad the input by the kernel half-size to get a same-sized result.

use ndarray::{Array2, ArrayView2};

/// Convolve `image` with `kernel` over the fully overlapping region.
///
/// The output has shape `image - kernel + 1` and is empty when the kernel
/// does not fit inside the image.
pub fn convolve2d(image: &ArrayView2<f64>, kernel: &ArrayView2<f64>) -> Array2<f64> {
    let (img_rows, img_cols) = image.dim();
    let (ker_rows, ker_cols) = kernel.dim();

    if ker_rows == 0 || ker_cols == 0 || img_rows < ker_rows || img_cols < ker_cols {
        return Array2::zeros((0, 0));
    }

    let out_rows = img_rows - ker_rows + 1;
    let out_cols = img_cols - ker_cols + 1;
    let mut output = Array2::zeros((out_rows, out_cols));

    for ((i, j), out) in output.indexed_iter_mut() {
        let mut sum = 0.0;
        for ((ki, kj), &k) in kernel.indexed_iter() {
            if k == 0.0 {
                continue;
            }
            // Output (i, j) sits at image (i + ker_rows - 1, j + ker_cols - 1)
            sum += image[[i + ker_rows - 1 - ki, j + ker_cols - 1 - kj]] * k;
        }
        *out = sum;
    }

    output
}
