//! Difference-of-Gaussian extrema detection with iterative sub-voxel
//! localization and the contrast / curvature-ratio rejection filters.

use nalgebra::{Matrix3, Matrix4, SymmetricEigen, Vector4};

use crate::octave::ScaleOctave;
use crate::volume::Volume;
use crate::{MAX_LOCALIZATION_STEPS, MAX_OFFSET_SQ};

/// Localized extremum in an octave's index space: fractional voxel
/// coordinates plus a fractional DoG scale index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub scale: f32,
}

/// Outcome of refining one discrete extremum.
struct Localized {
    pos: [f32; 4],
    /// DoG value at the final integer location.
    value: f32,
    /// Gradient dotted with the accepted offset, for the contrast test.
    grad_dot_offset: f32,
    /// Spatial 3x3 sub-block of the Hessian at the final location.
    hessian_xyz: Matrix3<f32>,
}

/// Scans every interior DoG level of a built octave for 3D+scale extrema,
/// localizes them with sub-voxel accuracy and drops low-contrast and
/// edge-like responses.
///
/// `contrast_threshold` is scaled by the octave's step ratio:
/// the effective minimum contrast is `contrast_threshold * (k - 1)`.
pub fn detect_candidates(
    octave: &ScaleOctave,
    contrast_threshold: f32,
    max_curvature_ratio: f32,
) -> Vec<Candidate> {
    let dog = octave.dog_images();
    let min_contrast = contrast_threshold * (octave.k() - 1.0);
    let mut candidates = Vec::new();
    for di in 1..dog.len() - 1 {
        scan_level(dog, di, min_contrast, max_curvature_ratio, &mut candidates);
        log::debug!(
            "dog level {di}: {} candidates accumulated",
            candidates.len()
        );
    }
    candidates
}

fn scan_level(
    dog: &[Volume],
    di: usize,
    min_contrast: f32,
    max_curvature_ratio: f32,
    candidates: &mut Vec<Candidate>,
) {
    let w = dog[0].width();
    let h = dog[0].height();
    let d = dog[0].depth();
    if w < 3 || h < 3 || d < 3 {
        return;
    }
    // Contiguous planes for the stencil test, bounds handled by the loop
    // ranges below.
    let prev = dog[di - 1].as_slice();
    let curr = dog[di].as_slice();
    let next = dog[di + 1].as_slice();
    let planes = [prev, curr, next];
    let idx = |x: usize, y: usize, z: usize| (z * h + y) * w + x;

    for z in 1..d - 1 {
        for y in 1..h - 1 {
            'voxel: for x in 1..w - 1 {
                let v = curr[idx(x, y, z)];
                let mut is_max = true;
                let mut is_min = true;
                // 3x3x3 spatial by 3 scale stencil, 80 neighbours.
                for n in 0..81 {
                    if n == 40 {
                        continue;
                    }
                    let ms = n / 27;
                    let mz = (n % 27) / 9;
                    let my = (n % 9) / 3;
                    let mx = n % 3;
                    let v2 = planes[ms][idx(x + mx - 1, y + my - 1, z + mz - 1)];
                    if v2 > v {
                        is_max = false;
                    }
                    if v2 < v {
                        is_min = false;
                    }
                    if !(is_min || is_max) {
                        continue 'voxel;
                    }
                }

                let Some(localized) = localize(dog, x, y, z, di) else {
                    continue;
                };

                // low contrast extrema are noise
                if (localized.value + 0.5 * localized.grad_dot_offset).abs() < min_contrast {
                    continue;
                }

                // high curvature ratio means an edge-like rather than
                // blob-like response
                if curvature_ratio_too_high(&localized.hessian_xyz, max_curvature_ratio) {
                    continue;
                }

                let [cx, cy, cz, cs] = localized.pos;
                candidates.push(Candidate {
                    x: cx,
                    y: cy,
                    z: cz,
                    scale: cs,
                });
            }
        }
    }
}

/// Iterative Newton refinement of a discrete extremum, up to
/// [`MAX_LOCALIZATION_STEPS`] re-centerings. Returns `None` when the
/// extremum cannot be localized: singular Hessian, offset too large,
/// re-centering leaving the valid interior, or iteration budget exhausted.
fn localize(dog: &[Volume], x0: usize, y0: usize, z0: usize, s0: usize) -> Option<Localized> {
    let w = dog[0].width() as isize;
    let h = dog[0].height() as isize;
    let d = dog[0].depth() as isize;
    let ns = dog.len() as isize;

    // cumulative integer re-centering offsets
    let mut ox = 0_isize;
    let mut oy = 0_isize;
    let mut oz = 0_isize;
    let mut os = 0_isize;

    for _ in 0..MAX_LOCALIZATION_STEPS {
        let xi = (x0 as isize + ox) as usize;
        let yi = (y0 as isize + oy) as usize;
        let zi = (z0 as isize + oz) as usize;
        let si = (s0 as isize + os) as usize;

        let c = &dog[si];
        let m = &dog[si - 1];
        let p = &dog[si + 1];
        let v = c.get(xi, yi, zi);

        // gradient by central differences in x, y, z, scale
        let grad = Vector4::new(
            (c.get(xi + 1, yi, zi) - c.get(xi - 1, yi, zi)) / 2.0,
            (c.get(xi, yi + 1, zi) - c.get(xi, yi - 1, zi)) / 2.0,
            (c.get(xi, yi, zi + 1) - c.get(xi, yi, zi - 1)) / 2.0,
            (p.get(xi, yi, zi) - m.get(xi, yi, zi)) / 2.0,
        );

        let v2 = 2.0 * v;
        let hxx = c.get(xi + 1, yi, zi) - v2 + c.get(xi - 1, yi, zi);
        let hyy = c.get(xi, yi + 1, zi) - v2 + c.get(xi, yi - 1, zi);
        let hzz = c.get(xi, yi, zi + 1) - v2 + c.get(xi, yi, zi - 1);
        let hss = p.get(xi, yi, zi) - v2 + m.get(xi, yi, zi);
        let hxy = (c.get(xi + 1, yi + 1, zi) - c.get(xi - 1, yi + 1, zi)) / 4.0
            - (c.get(xi + 1, yi - 1, zi) - c.get(xi - 1, yi - 1, zi)) / 4.0;
        let hxz = (c.get(xi + 1, yi, zi + 1) - c.get(xi - 1, yi, zi + 1)) / 4.0
            - (c.get(xi + 1, yi, zi - 1) - c.get(xi - 1, yi, zi - 1)) / 4.0;
        let hyz = (c.get(xi, yi + 1, zi + 1) - c.get(xi, yi - 1, zi + 1)) / 4.0
            - (c.get(xi, yi + 1, zi - 1) - c.get(xi, yi - 1, zi - 1)) / 4.0;
        let hxs = (p.get(xi + 1, yi, zi) - p.get(xi - 1, yi, zi)) / 4.0
            - (m.get(xi + 1, yi, zi) - m.get(xi - 1, yi, zi)) / 4.0;
        let hys = (p.get(xi, yi + 1, zi) - p.get(xi, yi - 1, zi)) / 4.0
            - (m.get(xi, yi + 1, zi) - m.get(xi, yi - 1, zi)) / 4.0;
        let hzs = (p.get(xi, yi, zi + 1) - p.get(xi, yi, zi - 1)) / 4.0
            - (m.get(xi, yi, zi + 1) - m.get(xi, yi, zi - 1)) / 4.0;

        #[rustfmt::skip]
        let hessian = Matrix4::new(
            hxx, hxy, hxz, hxs,
            hxy, hyy, hyz, hys,
            hxz, hyz, hzz, hzs,
            hxs, hys, hzs, hss,
        );

        let hessian_inv = hessian.try_inverse()?;
        let offset = -(hessian_inv * grad);
        if offset.norm_squared() >= MAX_OFFSET_SQ {
            return None;
        }

        if offset.iter().all(|o| o.abs() <= 0.5) {
            let pos = [
                xi as f32 + offset.x,
                yi as f32 + offset.y,
                zi as f32 + offset.z,
                si as f32 + offset.w,
            ];
            let in_bounds = pos[0] >= 1.0
                && pos[1] >= 1.0
                && pos[2] >= 1.0
                && pos[3] >= 1.0
                && pos[0] <= (w - 2) as f32
                && pos[1] <= (h - 2) as f32
                && pos[2] <= (d - 2) as f32
                && pos[3] <= (ns - 2) as f32;
            if !in_bounds {
                return None;
            }
            #[rustfmt::skip]
            let hessian_xyz = Matrix3::new(
                hxx, hxy, hxz,
                hxy, hyy, hyz,
                hxz, hyz, hzz,
            );
            return Some(Localized {
                pos,
                value: v,
                grad_dot_offset: grad.dot(&offset),
                hessian_xyz,
            });
        }

        // The extremum belongs to a neighbouring voxel or scale; re-center
        // there and refine again.
        ox = (ox as f32 + offset.x).round() as isize;
        oy = (oy as f32 + offset.y).round() as isize;
        oz = (oz as f32 + offset.z).round() as isize;
        os = (os as f32 + offset.w).round() as isize;
        let xi = x0 as isize + ox;
        let yi = y0 as isize + oy;
        let zi = z0 as isize + oz;
        let si = s0 as isize + os;
        if xi < 1 || yi < 1 || zi < 1 || si < 1 || xi > w - 2 || yi > h - 2 || zi > d - 2
            || si > ns - 2
        {
            return None;
        }
    }
    None
}

fn curvature_ratio_too_high(hessian_xyz: &Matrix3<f32>, max_ratio: f32) -> bool {
    let eigen = SymmetricEigen::new(*hessian_xyz);
    let mut min_ev = f32::MAX;
    let mut max_ev = 0.0_f32;
    for ev in eigen.eigenvalues.iter() {
        let a = ev.abs();
        min_ev = min_ev.min(a);
        max_ev = max_ev.max(a);
    }
    if min_ev <= 0.0 {
        return true;
    }
    max_ev / min_ev > max_ratio
}
