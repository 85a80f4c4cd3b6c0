//! Separable Gaussian filtering and the small pointwise volume operations
//! used by the scale pyramid.

use ndarray::{Array3, Axis, Zip};

use crate::volume::Volume;

/// Normalized 1D Gaussian kernel truncated at about three sigma.
/// Sigma of zero (or less) yields the identity kernel.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let radius = ((3.0 * sigma).round() as usize).max(1);
    let two_sq_sigma = 2.0 * sigma * sigma;
    let mut kernel = Vec::with_capacity(2 * radius + 1);
    for i in 0..=2 * radius {
        let d = i as f32 - radius as f32;
        kernel.push((-d * d / two_sq_sigma).exp());
    }
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

fn convolve_axis(data: &Array3<f32>, kernel: &[f32], axis: Axis) -> Array3<f32> {
    let mut out = Array3::zeros(data.raw_dim());
    let radius = kernel.len() / 2;
    Zip::from(data.lanes(axis))
        .and(out.lanes_mut(axis))
        .for_each(|lane, mut dst| {
            let n = lane.len();
            for i in 0..n {
                let mut acc = 0.0;
                for (t, &k) in kernel.iter().enumerate() {
                    // edge replication at the borders
                    let j = (i as isize + t as isize - radius as isize)
                        .clamp(0, n as isize - 1) as usize;
                    acc += k * lane[j];
                }
                dst[i] = acc;
            }
        });
    out
}

/// Blurs a volume with an isotropic Gaussian, three separable 1D passes.
pub fn gauss(v: &Volume, sigma: f32) -> Volume {
    gauss_anisotropic(v, sigma, sigma, sigma)
}

/// Blurs a volume with per-axis sigmas.
pub fn gauss_anisotropic(v: &Volume, sigma_x: f32, sigma_y: f32, sigma_z: f32) -> Volume {
    let kx = gaussian_kernel(sigma_x);
    let ky = gaussian_kernel(sigma_y);
    let kz = gaussian_kernel(sigma_z);
    let data = convolve_axis(v.data(), &kx, Axis(2));
    let data = convolve_axis(&data, &ky, Axis(1));
    let data = convolve_axis(&data, &kz, Axis(0));
    Volume::new(data, v.spacing())
}

/// Element-wise `a - b`. The volumes must have the same dimensions.
pub fn sub(a: &Volume, b: &Volume) -> Volume {
    assert_eq!(
        a.data().dim(),
        b.data().dim(),
        "subtracting volumes of different dimensions"
    );
    Volume::new(a.data() - b.data(), a.spacing())
}

/// In-place rescale of all intensities to fill `[0, scale]`.
/// A perfectly flat volume becomes all zeros.
pub fn enhance(v: &mut Volume, scale: f32) {
    let (min, max) = v.min_max();
    let range = max - min;
    if range <= 0.0 {
        v.data_mut().fill(0.0);
        return;
    }
    let s = scale / range;
    v.data_mut().mapv_inplace(|x| s * (x - min));
}

/// Normalized 3D Gaussian impulse with its center moved off the middle
/// sample by `offset`, used to weight the orientation sign test.
/// Addressed `[z, y, x]`.
pub(crate) fn gaussian_kernel_3d_offset(sigma: f32, offset: [f32; 3]) -> Array3<f32> {
    if sigma <= 0.0 {
        let mut kernel = Array3::zeros((3, 3, 3));
        kernel[(1, 1, 1)] = 1.0;
        return kernel;
    }
    let size = (2 * (3.0 * sigma).round() as usize + 1).max(3);
    let half = (size / 2) as f32;
    let two_sq_sigma = 2.0 * sigma * sigma;
    let mut kernel = Array3::zeros((size, size, size));
    let mut sum = 0.0;
    for z in 0..size {
        let fz = z as f32 - half - offset[2];
        for y in 0..size {
            let fy = y as f32 - half - offset[1];
            for x in 0..size {
                let fx = x as f32 - half - offset[0];
                let v = (-(fx * fx + fy * fy + fz * fz) / two_sq_sigma).exp();
                kernel[(z, y, x)] = v;
                sum += v;
            }
        }
    }
    kernel.mapv_inplace(|v| v / sum);
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Volume {
        Volume::from_fn(n, n, n, [1.0; 3], |x, y, z| (x + 2 * y + 3 * z) as f32)
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(1.5);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert_eq!(k.len() % 2, 1);
        for i in 0..k.len() / 2 {
            assert_eq!(k[i], k[k.len() - 1 - i]);
        }
    }

    #[test]
    fn zero_sigma_blur_is_identity() {
        let v = ramp(6);
        let blurred = gauss(&v, 0.0);
        for (a, b) in v.as_slice().iter().zip(blurred.as_slice()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn blur_preserves_constant_volumes() {
        let v = Volume::from_fn(5, 5, 5, [1.0; 3], |_, _, _| 7.0);
        let blurred = gauss(&v, 2.0);
        for &b in blurred.as_slice() {
            assert!((b - 7.0).abs() < 1e-4);
        }
    }

    #[test]
    fn subtracting_a_volume_from_itself_is_zero() {
        let v = ramp(5);
        let blurred = gauss(&v, 1.2);
        let diff = sub(&blurred, &blurred);
        assert!(diff.as_slice().iter().all(|&x| x == 0.0));
    }

    #[test]
    #[should_panic]
    fn sub_rejects_shape_mismatch() {
        let a = ramp(4);
        let b = ramp(5);
        sub(&a, &b);
    }

    #[test]
    fn enhance_fills_requested_range() {
        let mut v = ramp(4);
        enhance(&mut v, 255.0);
        let (min, max) = v.min_max();
        assert_eq!(min, 0.0);
        assert!((max - 255.0).abs() < 1e-3);
    }

    #[test]
    fn enhance_flattens_constant_volume_to_zero() {
        let mut v = Volume::from_fn(3, 3, 3, [1.0; 3], |_, _, _| 42.0);
        enhance(&mut v, 255.0);
        assert!(v.as_slice().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn offset_kernel_sums_to_one() {
        let k = gaussian_kernel_3d_offset(1.3, [0.2, -0.4, 0.1]);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }
}
