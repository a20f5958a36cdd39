//! PSF kernels and 2D convolution.
//!
//! Convolution is done directly in image space: kernels are small compared to
//! the images we fit, and direct summation keeps edge handling explicit
//! (pixels outside the image contribute zero).

use rayon::prelude::*;

use crate::error::AppError;

/// A square, odd-sized convolution kernel normalised to unit sum.
#[derive(Debug, Clone, PartialEq)]
pub struct PsfKernel {
    size: usize,
    data: Vec<f64>,
}

impl PsfKernel {
    /// Build a kernel from raw row-major values, normalising to unit sum.
    pub fn new(size: usize, data: Vec<f64>) -> Result<Self, AppError> {
        if size == 0 || size % 2 == 0 {
            return Err(AppError::input(format!("PSF kernel size must be odd and > 0 (got {size}).")));
        }
        if data.len() != size * size {
            return Err(AppError::input(format!(
                "PSF kernel has {} values, expected {}.",
                data.len(),
                size * size
            )));
        }
        let sum: f64 = data.iter().sum();
        if !(sum.is_finite() && sum > 0.0) {
            return Err(AppError::input("PSF kernel must have a positive, finite sum."));
        }
        let data = data.into_iter().map(|v| v / sum).collect();
        Ok(Self { size, data })
    }

    /// A 1x1 identity kernel (no blurring).
    pub fn delta() -> Self {
        Self {
            size: 1,
            data: vec![1.0],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn half(&self) -> usize {
        self.size / 2
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }

    pub fn at(&self, i: usize, j: usize) -> f64 {
        self.data[j * self.size + i]
    }
}

/// Convolve a row-major `nx` x `ny` image with `kernel`, returning an image of
/// the same shape.
///
/// `out(x, y) = Σ k(i, j) * img(x - (i - h), y - (j - h))` with `h` the kernel
/// half-width; samples outside the image are zero.
pub fn convolve2d(image: &[f64], nx: usize, ny: usize, kernel: &PsfKernel) -> Vec<f64> {
    debug_assert_eq!(image.len(), nx * ny);
    if kernel.size() == 1 {
        let k = kernel.values()[0];
        return image.iter().map(|v| v * k).collect();
    }

    let h = kernel.half() as isize;
    let ks = kernel.size();
    let kv = kernel.values();
    let (nxi, nyi) = (nx as isize, ny as isize);

    let mut out = vec![0.0; nx * ny];
    out.par_chunks_mut(nx).enumerate().for_each(|(y, row)| {
        let y = y as isize;
        for (x, px) in row.iter_mut().enumerate() {
            let x = x as isize;
            let mut acc = 0.0;
            for j in 0..ks {
                let sy = y - (j as isize - h);
                if sy < 0 || sy >= nyi {
                    continue;
                }
                let src_row = &image[(sy as usize) * nx..(sy as usize + 1) * nx];
                let krow = &kv[j * ks..(j + 1) * ks];
                for (i, k) in krow.iter().enumerate() {
                    let sx = x - (i as isize - h);
                    if sx < 0 || sx >= nxi {
                        continue;
                    }
                    acc += k * src_row[sx as usize];
                }
            }
            *px = acc;
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_is_normalised() {
        let k = PsfKernel::new(3, vec![1.0; 9]).unwrap();
        let sum: f64 = k.values().iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn even_kernel_is_rejected() {
        assert!(PsfKernel::new(2, vec![1.0; 4]).is_err());
        assert!(PsfKernel::new(3, vec![0.0; 9]).is_err());
    }

    #[test]
    fn delta_kernel_is_identity() {
        let img = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(convolve2d(&img, 3, 2, &PsfKernel::delta()), img);
    }

    #[test]
    fn point_source_spreads_into_kernel_shape() {
        let (nx, ny) = (5, 5);
        let mut img = vec![0.0; nx * ny];
        img[2 * nx + 2] = 10.0;
        let k = PsfKernel::new(3, vec![0.0, 1.0, 0.0, 1.0, 4.0, 1.0, 0.0, 1.0, 0.0]).unwrap();
        let out = convolve2d(&img, nx, ny, &k);

        assert!((out[2 * nx + 2] - 5.0).abs() < 1e-12);
        assert!((out[2 * nx + 1] - 1.25).abs() < 1e-12);
        assert!((out[nx + 2] - 1.25).abs() < 1e-12);
        assert_eq!(out[0], 0.0);
        // Flux is conserved away from the edges.
        let total: f64 = out.iter().sum();
        assert!((total - 10.0).abs() < 1e-12);
    }

    #[test]
    fn offset_kernel_shifts_flux() {
        let (nx, ny) = (5, 1);
        let img = vec![0.0, 0.0, 1.0, 0.0, 0.0];
        // Kernel with all weight at i = 2 (one pixel right of centre).
        let k = PsfKernel::new(3, vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]).unwrap();
        let out = convolve2d(&img, nx, ny, &k);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 1.0, 0.0]);
    }
}
