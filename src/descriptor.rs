//! Orientation frame estimation and descriptor sampling.
//!
//! Each accepted candidate gets a local orthonormal frame from the
//! eigen-decomposition of the Hessian of a heavily smoothed image, then a
//! rotated cubic patch of intensities is sampled and min-max normalized
//! into the descriptor vector.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};

use crate::extrema::Candidate;
use crate::filter;
use crate::volume::Volume;
use crate::PATCH_SCALE;

/// Dominant local orientation at a candidate, as a right-handed orthonormal
/// basis. Columns are ordered by descending absolute eigenvalue of the
/// spatial Hessian: steepest curvature first.
///
/// The signs of the first and last axes are fixed by comparing
/// Gauss-weighted intensity sums on either side of each axis, so the frame
/// comes out the same for similar structures; the middle axis is the cross
/// product of the other two. Returns `None` for degenerate frames, which
/// simply drops the candidate.
pub fn extract_orientation(
    candidate: &Candidate,
    octave_sigma: f32,
    img: &Volume,
    smoothed: &Volume,
) -> Option<Matrix3<f32>> {
    let ix = candidate.x.round() as isize;
    let iy = candidate.y.round() as isize;
    let iz = candidate.z.round() as isize;
    let w = smoothed.width() as isize;
    let h = smoothed.height() as isize;
    let d = smoothed.depth() as isize;
    if ix < 1 || iy < 1 || iz < 1 || ix > w - 2 || iy > h - 2 || iz > d - 2 {
        return None;
    }

    let hessian = hessian3(smoothed, ix as usize, iy as usize, iz as usize);
    let eigen = SymmetricEigen::new(hessian);

    // order eigenvectors by descending |eigenvalue|
    let mag = [
        eigen.eigenvalues[0].abs(),
        eigen.eigenvalues[1].abs(),
        eigen.eigenvalues[2].abs(),
    ];
    let mut order = [0_usize, 1, 2];
    order.sort_by(|&a, &b| mag[b].total_cmp(&mag[a]));
    let mut alpha_axis: Vector3<f32> = eigen.eigenvectors.column(order[0]).into_owned();
    let mut gamma_axis: Vector3<f32> = eigen.eigenvectors.column(order[2]).into_owned();

    // Gauss-weighted intensity sums on either side of the dominant and least
    // dominant axes decide their signs.
    let kernel = filter::gaussian_kernel_3d_offset(
        octave_sigma,
        [
            candidate.x - ix as f32,
            candidate.y - iy as f32,
            candidate.z - iz as f32,
        ],
    );
    let size = kernel.dim().0;
    let r = (size / 2) as isize;
    let mut alpha = [0.0_f32; 2];
    let mut gamma = [0.0_f32; 2];
    for kz in 0..size {
        let lz = iz - r + kz as isize;
        for ky in 0..size {
            let ly = iy - r + ky as isize;
            for kx in 0..size {
                let lx = ix - r + kx as isize;
                let v = Vector3::new(
                    lx as f32 - candidate.x,
                    ly as f32 - candidate.y,
                    lz as f32 - candidate.z,
                );
                let side_alpha = usize::from(v.dot(&alpha_axis) >= 0.0);
                let side_gamma = usize::from(v.dot(&gamma_axis) >= 0.0);
                let val = img.get_clamped(lx, ly, lz) * kernel[(kz, ky, kx)];
                alpha[side_alpha] += val;
                gamma[side_gamma] += val;
            }
        }
    }
    if alpha[0] < alpha[1] {
        alpha_axis = -alpha_axis;
    }
    if gamma[0] < gamma[1] {
        gamma_axis = -gamma_axis;
    }

    let alpha_len = alpha_axis.norm();
    let gamma_len = gamma_axis.norm();
    if alpha_len <= f32::EPSILON || gamma_len <= f32::EPSILON {
        return None;
    }
    alpha_axis /= alpha_len;
    gamma_axis /= gamma_len;

    // middle axis completes a right-handed frame
    let beta_axis = gamma_axis.cross(&alpha_axis);
    Some(Matrix3::from_columns(&[alpha_axis, beta_axis, gamma_axis]))
}

fn hessian3(v: &Volume, x: usize, y: usize, z: usize) -> Matrix3<f32> {
    let v2 = 2.0 * v.get(x, y, z);
    let hxx = v.get(x + 1, y, z) - v2 + v.get(x - 1, y, z);
    let hyy = v.get(x, y + 1, z) - v2 + v.get(x, y - 1, z);
    let hzz = v.get(x, y, z + 1) - v2 + v.get(x, y, z - 1);
    let hxy = (v.get(x + 1, y + 1, z) - v.get(x - 1, y + 1, z)) / 4.0
        - (v.get(x + 1, y - 1, z) - v.get(x - 1, y - 1, z)) / 4.0;
    let hxz = (v.get(x + 1, y, z + 1) - v.get(x - 1, y, z + 1)) / 4.0
        - (v.get(x + 1, y, z - 1) - v.get(x - 1, y, z - 1)) / 4.0;
    let hyz = (v.get(x, y + 1, z + 1) - v.get(x, y - 1, z + 1)) / 4.0
        - (v.get(x, y + 1, z - 1) - v.get(x, y - 1, z - 1)) / 4.0;
    #[rustfmt::skip]
    let h = Matrix3::new(
        hxx, hxy, hxz,
        hxy, hyy, hyz,
        hxz, hyz, hzz,
    );
    h
}

/// Samples a cubic grid of `fd_width` points per axis around the candidate,
/// spaced `octave_sigma * PATCH_SCALE` apart and rotated into the local
/// frame, reading with edge-replicating addressing. The result is min-max
/// normalized so the patch spans `[0, 1]`; a perfectly flat patch yields all
/// zeros rather than NaN.
pub fn sample_descriptor(
    candidate: &Candidate,
    octave_sigma: f32,
    smoothed: &Volume,
    orientation: &Matrix3<f32>,
    fd_width: usize,
) -> Vec<f32> {
    let pitch = octave_sigma * PATCH_SCALE;
    let half = fd_width as f32 / 2.0;
    let mut desc = Vec::with_capacity(fd_width * fd_width * fd_width);
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for z in 0..fd_width {
        let zs = (z as f32 - half + 0.5) * pitch;
        for y in 0..fd_width {
            let ys = (y as f32 - half + 0.5) * pitch;
            for x in 0..fd_width {
                let xs = (x as f32 - half + 0.5) * pitch;
                let p = orientation * Vector3::new(xs, ys, zs);
                let xg = (p.x + candidate.x).round() as isize;
                let yg = (p.y + candidate.y).round() as isize;
                let zg = (p.z + candidate.z).round() as isize;
                let v = smoothed.get_clamped(xg, yg, zg);
                min = min.min(v);
                max = max.max(v);
                desc.push(v);
            }
        }
    }
    let range = max - min;
    if range > 0.0 {
        for v in &mut desc {
            *v = (*v - min) / range;
        }
    } else {
        desc.fill(0.0);
    }
    desc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_volume(n: usize, sigma: f32) -> Volume {
        let c = (n / 2) as f32;
        Volume::from_fn(n, n, n, [1.0; 3], |x, y, z| {
            let dx = x as f32 - c;
            let dy = y as f32 - c;
            let dz = z as f32 - c;
            200.0 * (-(dx * dx + dy * dy + dz * dz) / (2.0 * sigma * sigma)).exp()
        })
    }

    fn center_candidate(n: usize) -> Candidate {
        let c = (n / 2) as f32;
        Candidate {
            x: c,
            y: c,
            z: c,
            scale: 1.0,
        }
    }

    #[test]
    fn orientation_frame_is_orthonormal_and_right_handed() {
        let vol = blob_volume(24, 3.0);
        let smoothed = filter::gauss(&vol, 2.0);
        let frame = extract_orientation(&center_candidate(24), 1.6, &vol, &smoothed)
            .expect("non-degenerate frame");
        let identity = frame.transpose() * frame;
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((identity[(i, j)] - expected).abs() < 1e-4);
            }
        }
        assert!((frame.determinant() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn descriptor_spans_zero_to_one() {
        let vol = blob_volume(24, 3.0);
        let frame = Matrix3::identity();
        let desc = sample_descriptor(&center_candidate(24), 1.6, &vol, &frame, 4);
        assert_eq!(desc.len(), 64);
        assert!(desc.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(desc.iter().any(|&v| v == 0.0));
        assert!(desc.iter().any(|&v| v == 1.0));
    }

    #[test]
    fn flat_patch_yields_all_zeros() {
        let vol = Volume::from_fn(16, 16, 16, [1.0; 3], |_, _, _| 3.5);
        let frame = Matrix3::identity();
        let desc = sample_descriptor(&center_candidate(16), 1.6, &vol, &frame, 4);
        assert!(desc.iter().all(|&v| v == 0.0));
    }
}
