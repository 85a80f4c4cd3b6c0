//! Matrix-driven maximum intensity projection of a voxel volume.
//!
//! Three engines share the module: forward splatting (every voxel is
//! transformed into screen space and max-composited), per-pixel ray casting
//! with nearest-neighbour or trilinear sampling, and an integer Bresenham
//! fast path that reuses one precomputed step template for every ray of an
//! orthographic projection. Intensities are treated as `[0, 255]` and the
//! projection is returned as an 8-bit grayscale image.

use image::GrayImage;
use nalgebra::{Matrix4, Point3, Rotation3, Vector3};

use crate::error::{ParameterError, Result};
use crate::volume::Volume;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    NearestNeighbour,
    Trilinear,
}

/// Configuration for [`ray_cast`].
#[derive(Debug, Clone, PartialEq)]
pub struct RayCastParams {
    /// Output resolution.
    pub width: u32,
    pub height: u32,
    /// Distance stepped along the ray per iteration, in voxels. 1.0 steps a
    /// whole voxel at a time.
    pub increment: f32,
    /// Rays terminate early once their running maximum reaches this value.
    pub threshold: u8,
    pub interpolation: Interpolation,
    /// Ratio of slice depth to pixel width.
    pub z_scale: f32,
    /// Depth-MIP: attenuate intensity by normalized distance along the ray,
    /// favouring nearer material when tied.
    pub depth_weighted: bool,
}

impl RayCastParams {
    pub fn new(width: u32, height: u32) -> RayCastParams {
        RayCastParams {
            width,
            height,
            increment: 1.0,
            threshold: 255,
            interpolation: Interpolation::Trilinear,
            z_scale: 1.0,
            depth_weighted: false,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.width < 1 || self.height < 1 {
            return Err(ParameterError::Resolution(self.width, self.height));
        }
        if self.increment <= 0.0 {
            return Err(ParameterError::RayCastIncrement(self.increment));
        }
        if self.threshold < 1 {
            return Err(ParameterError::Threshold);
        }
        if self.z_scale <= 0.0 {
            return Err(ParameterError::ZScale(self.z_scale));
        }
        Ok(())
    }
}

/// Rotation matrix composed from Euler angles (radians), applied X then Y
/// then Z. Callers animating a view hold one explicit accumulator and
/// compose onto it per frame.
pub fn euler_rotation(rx: f32, ry: f32, rz: f32) -> Matrix4<f32> {
    Rotation3::from_euler_angles(rx, ry, rz).to_homogeneous()
}

/// Euler angles (radians, X/Y/Z order) recovered from the rotation part of
/// a homogeneous transform. Inverse of [`euler_rotation`] away from gimbal
/// lock.
pub fn euler_angles(m: &Matrix4<f32>) -> (f32, f32, f32) {
    let r = m.fixed_view::<3, 3>(0, 0).into_owned();
    Rotation3::from_matrix_unchecked(r).euler_angles()
}

fn to_byte(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn round_half_away(v: f32) -> i32 {
    if v > 0.0 {
        (v + 0.5) as i32
    } else {
        (v - 0.5) as i32
    }
}

fn make_image(answer: &[f32], width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        image::Luma([to_byte(answer[(y * width + x) as usize])])
    })
}

/// Projects the volume straight down the z axis.
pub fn project_axial(volume: &Volume) -> GrayImage {
    let (w, h, d) = (volume.width(), volume.height(), volume.depth());
    let mut answer = vec![0.0_f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut max = volume.get(x, y, 0);
            for z in 1..d {
                max = max.max(volume.get(x, y, z));
            }
            answer[y * w + x] = max;
        }
    }
    make_image(&answer, w as u32, h as u32)
}

/// Forward splatting: every voxel is transformed by `rotation` about the
/// volume center into screen space and max-composited into its destination
/// pixel. A scatter rather than a gather; ties keep the larger intensity.
pub fn project_splat(volume: &Volume, rotation: &Matrix4<f32>) -> GrayImage {
    let (w, h, d) = (volume.width(), volume.height(), volume.depth());
    let hw = (w >> 1) as f32;
    let hh = (h >> 1) as f32;
    let hd = (d >> 1) as f32;
    let m = Matrix4::new_translation(&Vector3::new(hw, hh, hd))
        * rotation
        * Matrix4::new_translation(&Vector3::new(-hw, -hh, -hd));

    let mut answer = vec![0.0_f32; w * h];
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                let p = m.transform_point(&Point3::new(x as f32, y as f32, z as f32));
                let ix = round_half_away(p.x);
                let iy = round_half_away(p.y);
                if ix >= 0 && ix < w as i32 && iy >= 0 && iy < h as i32 {
                    let dst = &mut answer[iy as usize * w + ix as usize];
                    let val = volume.get(x, y, z);
                    if val > *dst {
                        *dst = val;
                    }
                }
            }
        }
        log::debug!("splat: slice {}/{}", z + 1, d);
    }
    make_image(&answer, w as u32, h as u32)
}

/// Casts one ray per output pixel through the volume and keeps the maximum
/// intensity seen along it.
///
/// The inverse of `rotation` is applied to each pixel's ray, which then
/// steps through voxel space at `params.increment` per iteration. A ray
/// terminates once its maximum reaches `params.threshold`, or once it exits
/// the volume's bounding box after having entered it.
pub fn ray_cast(volume: &Volume, rotation: &Matrix4<f32>, params: &RayCastParams) -> Result<GrayImage> {
    ray_cast_with_progress(volume, rotation, params, &mut |_, _| true)
}

/// [`ray_cast`] with a per-scan-line progress callback. Returning `false`
/// cancels the render; rows completed so far are returned unchanged.
pub fn ray_cast_with_progress(
    volume: &Volume,
    rotation: &Matrix4<f32>,
    params: &RayCastParams,
    progress: &mut dyn FnMut(u32, u32) -> bool,
) -> Result<GrayImage> {
    params.validate()?;
    let rot = rotation
        .try_inverse()
        .ok_or(ParameterError::SingularRotation)?;

    let res_x = params.width;
    let res_y = params.height;
    let direction = rot.transform_vector(&Vector3::new(0.0, 0.0, params.increment));

    // The voxels sit at the corners of (n - 1)^3 cells.
    let data_width = (volume.width() - 1) as f32;
    let data_height = (volume.height() - 1) as f32;
    let data_depth = (volume.depth() - 1) as f32 * params.z_scale;

    let x_step = if res_x > 1 { data_width / (res_x - 1) as f32 } else { 0.0 };
    let y_step = if res_y > 1 { data_height / (res_y - 1) as f32 } else { 0.0 };

    let centre = Vector3::new(data_width / 2.0, data_height / 2.0, data_depth / 2.0);
    // distance to a corner, the longest span through the volume
    let farthest = centre.norm() + 1.0;
    let max_steps = ((farthest * 2.0 + 1.0) / params.increment) as usize;
    let depth_factor = 1.0 / max_steps as f32;
    let threshold = params.threshold as f32;

    let mut answer = vec![0.0_f32; (res_x * res_y) as usize];
    'rows: for y in 0..res_y {
        for x in 0..res_x {
            let mut pos = rot.transform_point(&Point3::new(
                x as f32 * x_step - centre.x,
                y as f32 * y_step - centre.y,
                -farthest,
            ));

            let mut max = 0.0_f32;
            let mut visited = false;
            for i in 0..max_steps {
                // this containment check is what lets the samplers skip
                // their own bounds checks; note >= ... <
                if pos.x >= -centre.x
                    && pos.x < centre.x
                    && pos.y >= -centre.y
                    && pos.y < centre.y
                    && pos.z >= -centre.z
                    && pos.z < centre.z
                {
                    visited = true;
                    let real = Vector3::new(
                        pos.x + centre.x,
                        pos.y + centre.y,
                        (pos.z + centre.z) / params.z_scale,
                    );
                    let mut value = match params.interpolation {
                        Interpolation::NearestNeighbour => nearest_neighbour(volume, real),
                        Interpolation::Trilinear => trilinear_intensity(volume, real, max),
                    };
                    if params.depth_weighted {
                        value *= 1.0 - i as f32 * depth_factor;
                    }
                    if value > max {
                        max = value;
                        if max >= threshold {
                            break;
                        }
                    }
                } else if visited {
                    // left the voxel space for good
                    break;
                }
                pos += direction;
            }
            answer[(y * res_x + x) as usize] = max;
        }
        if !progress(y + 1, res_y) {
            log::info!("ray cast cancelled after {}/{} lines", y + 1, res_y);
            break 'rows;
        }
    }
    Ok(make_image(&answer, res_x, res_y))
}

/// The caller's ray containment check keeps `pos` inside
/// `[0, dim - 1)` on every axis, so the samplers can skip bounds checks.
fn nearest_neighbour(volume: &Volume, pos: Vector3<f32>) -> f32 {
    let x = round_half_away(pos.x) as usize;
    let y = round_half_away(pos.y) as usize;
    let z = round_half_away(pos.z) as usize;
    // SAFETY: rounding a coordinate in [0, dim - 1) stays within [0, dim - 1]
    unsafe { volume.get_unchecked(x, y, z) }
}

/// Trilinear interpolation of the 8 corner voxels of the containing cell.
/// Coordinates exactly on the upper boundary are nudged inward so the cell
/// stays fully inside the volume. When no corner can beat `max`, returns 0
/// without interpolating.
fn trilinear_intensity(volume: &Volume, pos: Vector3<f32>, max: f32) -> f32 {
    let (mut px, mut py, mut pz) = (pos.x, pos.y, pos.z);
    let mut x = px as usize;
    let mut y = py as usize;
    let mut z = pz as usize;
    if x == volume.width() - 1 {
        px = x as f32 - 1e-6;
        x -= 1;
    }
    if y == volume.height() - 1 {
        py = y as f32 - 1e-6;
        y -= 1;
    }
    if z == volume.depth() - 1 {
        pz = z as f32 - 1e-6;
        z -= 1;
    }

    // SAFETY: the cell index is at most dim - 2 on every axis, so all 8
    // corners are in bounds
    let (v000, v100, v010, v001, v101, v011, v110, v111) = unsafe {
        (
            volume.get_unchecked(x, y, z),
            volume.get_unchecked(x + 1, y, z),
            volume.get_unchecked(x, y + 1, z),
            volume.get_unchecked(x, y, z + 1),
            volume.get_unchecked(x + 1, y, z + 1),
            volume.get_unchecked(x, y + 1, z + 1),
            volume.get_unchecked(x + 1, y + 1, z),
            volume.get_unchecked(x + 1, y + 1, z + 1),
        )
    };

    if v000 < max && v100 < max && v010 < max && v001 < max && v101 < max && v011 < max
        && v110 < max && v111 < max
    {
        return 0.0;
    }

    let fx = px - x as f32;
    let fy = py - y as f32;
    let fz = pz - z as f32;
    let gx = 1.0 - fx;
    let gy = 1.0 - fy;
    let gz = 1.0 - fz;

    v000 * gx * gy * gz
        + v100 * fx * gy * gz
        + v010 * gx * fy * gz
        + v001 * gx * gy * fz
        + v101 * fx * gy * fz
        + v011 * gx * fy * fz
        + v110 * fx * fy * gz
        + v111 * fx * fy * fz
}

/// Orthographic fast path: computes one Bresenham step template from a
/// single reference ray and replays it for every output pixel. Valid only
/// when all rays are parallel, which holds for orthographic projection.
pub fn ray_cast_integer(
    volume: &Volume,
    rotation: &Matrix4<f32>,
    z_scale: f32,
    threshold: u8,
) -> Result<GrayImage> {
    if z_scale <= 0.0 {
        return Err(ParameterError::ZScale(z_scale));
    }
    if threshold < 1 {
        return Err(ParameterError::Threshold);
    }
    let (w, h, d) = (volume.width(), volume.height(), volume.depth());
    let hw = (w >> 1) as i32;
    let hh = (h >> 1) as i32;
    let hd = d as f32 * z_scale * 0.5;
    let ihd = hd as i32;

    let centre = Vector3::new(hw as f32, hh as f32, hd);
    let farthest = centre.norm() + 1.0;
    let direction = rotation.transform_vector(&Vector3::new(0.0, 0.0, farthest * 2.0));

    let project_start = |x: i32, y: i32| -> [i32; 3] {
        let p = rotation.transform_point(&Point3::new(x as f32 - hw as f32, y as f32 - hh as f32, -farthest));
        [
            p.x as i32 + hw,
            p.y as i32 + hh,
            (((p.z as i32 + ihd) as f32) / z_scale) as i32,
        ]
    };

    // template from the corner ray, shared by all rays
    let start = project_start(0, 0);
    let end = {
        let p = rotation.transform_point(&Point3::new(-(hw as f32), -(hh as f32), -farthest))
            + direction;
        [
            p.x as i32 + hw,
            p.y as i32 + hh,
            (((p.z as i32 + ihd) as f32) / z_scale) as i32,
        ]
    };
    let mut ray = IntegerRay::new(start, end);
    let steps = ray.steps();
    let template = ray.template();

    let threshold = threshold as f32;
    let mut answer = vec![0.0_f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut pos = project_start(x as i32, y as i32);
            let mut max = 0.0_f32;
            let mut visited = false;
            for &flags in &template {
                if flags & 0x01 != 0 {
                    pos[0] += steps[0];
                }
                if flags & 0x02 != 0 {
                    pos[1] += steps[1];
                }
                if flags & 0x04 != 0 {
                    pos[2] += steps[2];
                }
                if pos[0] >= 0
                    && pos[0] < w as i32
                    && pos[1] >= 0
                    && pos[1] < h as i32
                    && pos[2] >= 0
                    && pos[2] < d as i32
                {
                    visited = true;
                    let v = volume.get(pos[0] as usize, pos[1] as usize, pos[2] as usize);
                    if v > max {
                        max = v;
                        if max >= threshold {
                            break;
                        }
                    }
                } else if visited {
                    break;
                }
            }
            answer[y * w + x] = max;
        }
    }
    Ok(make_image(&answer, w as u32, h as u32))
}

/// Integer line walk between two grid points, Bresenham-style in 3D.
/// Produces a step template of 3-bit flags (x/y/z increment per step) that
/// can be replayed for any parallel ray.
struct IntegerRay {
    pos: [i32; 3],
    delta: [i32; 3],
    inc: [i32; 3],
    frac: [i32; 3],
    trace_axis: usize,
}

impl IntegerRay {
    fn new(start: [i32; 3], end: [i32; 3]) -> IntegerRay {
        let mut delta = [0_i32; 3];
        let mut inc = [0_i32; 3];
        for i in 0..3 {
            let d = end[i] - start[i];
            delta[i] = d.abs();
            inc[i] = if d < 0 { -1 } else { 1 };
        }
        let [dx, dy, dz] = delta;
        let mut frac = [0_i32; 3];
        let trace_axis = if dx > dy && dx > dz {
            frac[1] = (dy << 1) - dx;
            frac[2] = (dz << 1) - dx;
            0
        } else if dy > dx && dy > dz {
            frac[0] = (dx << 1) - dy;
            frac[2] = (dz << 1) - dy;
            1
        } else {
            frac[0] = (dx << 1) - dz;
            frac[1] = (dy << 1) - dz;
            2
        };
        IntegerRay {
            pos: start,
            delta: [dx << 1, dy << 1, dz << 1],
            inc,
            frac,
            trace_axis,
        }
    }

    fn steps(&self) -> [i32; 3] {
        self.inc
    }

    fn next(&mut self) -> [i32; 3] {
        let major = self.trace_axis;
        for axis in 0..3 {
            if axis == major {
                continue;
            }
            if self.frac[axis] >= 0 {
                self.pos[axis] += self.inc[axis];
                self.frac[axis] -= self.delta[major];
            }
            self.frac[axis] += self.delta[axis];
        }
        self.pos[major] += self.inc[major];
        self.pos
    }

    fn template(&mut self) -> Vec<u8> {
        let length = (self.delta[self.trace_axis] >> 1) as usize;
        let mut template = vec![0_u8; length];
        for flags in &mut template {
            let before = self.pos;
            let after = self.next();
            if after[0] != before[0] {
                *flags |= 0x01;
            }
            if after[1] != before[1] {
                *flags |= 0x02;
            }
            if after[2] != before[2] {
                *flags |= 0x04;
            }
        }
        template
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_voxel_volume(n: usize, value: f32) -> Volume {
        let c = n / 2;
        Volume::from_fn(n, n, n, [1.0; 3], |x, y, z| {
            if (x, y, z) == (c, c, c) {
                value
            } else {
                0.0
            }
        })
    }

    fn brightest_pixel(img: &GrayImage) -> (u32, u32, u8) {
        let mut best = (0, 0, 0_u8);
        for (x, y, p) in img.enumerate_pixels() {
            if p.0[0] > best.2 {
                best = (x, y, p.0[0]);
            }
        }
        best
    }

    #[test]
    fn zero_volume_projects_to_zero_everywhere() {
        let vol = Volume::zeros(16, 16, 16, [1.0; 3]);
        let rot = euler_rotation(0.4, -0.2, 0.9);
        assert!(project_axial(&vol).pixels().all(|p| p.0[0] == 0));
        assert!(project_splat(&vol, &rot).pixels().all(|p| p.0[0] == 0));
        let img = ray_cast(&vol, &rot, &RayCastParams::new(16, 16)).unwrap();
        assert!(img.pixels().all(|p| p.0[0] == 0));
        let img = ray_cast_integer(&vol, &rot, 1.0, 255).unwrap();
        assert!(img.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn splat_identity_puts_center_voxel_at_center_pixel() {
        let vol = single_voxel_volume(17, 200.0);
        let img = project_splat(&vol, &Matrix4::identity());
        let (x, y, v) = brightest_pixel(&img);
        assert_eq!((x, y), (8, 8));
        assert_eq!(v, 200);
    }

    #[test]
    fn ray_cast_identity_puts_center_voxel_at_center_pixel() {
        let vol = single_voxel_volume(17, 200.0);
        for interpolation in [Interpolation::NearestNeighbour, Interpolation::Trilinear] {
            let mut params = RayCastParams::new(17, 17);
            params.interpolation = interpolation;
            params.increment = 0.5;
            let img = ray_cast(&vol, &Matrix4::identity(), &params).unwrap();
            let (x, y, v) = brightest_pixel(&img);
            assert!((x as i32 - 8).abs() <= 1, "x = {x}");
            assert!((y as i32 - 8).abs() <= 1, "y = {y}");
            assert!(v > 0);
        }
    }

    #[test]
    fn early_termination_never_changes_pixel_values() {
        // nearest-neighbour sampling makes every ray see either 0 or the
        // full voxel value, so terminating at the threshold cannot lose a
        // later, larger sample
        let vol = single_voxel_volume(15, 200.0);
        let rot = euler_rotation(0.3, 0.1, -0.2);
        let mut slow = RayCastParams::new(15, 15);
        slow.increment = 0.5;
        slow.interpolation = Interpolation::NearestNeighbour;
        let mut fast = slow.clone();
        fast.threshold = 50;
        let reference = ray_cast(&vol, &rot, &slow).unwrap();
        let terminated = ray_cast(&vol, &rot, &fast).unwrap();
        for (a, b) in reference.pixels().zip(terminated.pixels()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn depth_weighting_darkens_far_material() {
        let vol = single_voxel_volume(15, 200.0);
        let mut params = RayCastParams::new(15, 15);
        params.increment = 0.5;
        let plain = ray_cast(&vol, &Matrix4::identity(), &params).unwrap();
        params.depth_weighted = true;
        let weighted = ray_cast(&vol, &Matrix4::identity(), &params).unwrap();
        let (_, _, plain_max) = brightest_pixel(&plain);
        let (_, _, weighted_max) = brightest_pixel(&weighted);
        assert!(weighted_max < plain_max);
        assert!(weighted_max > 0);
    }

    #[test]
    fn invalid_parameters_are_rejected_before_running() {
        let vol = Volume::zeros(8, 8, 8, [1.0; 3]);
        let rot = Matrix4::identity();
        let mut params = RayCastParams::new(0, 8);
        assert!(matches!(
            ray_cast(&vol, &rot, &params),
            Err(ParameterError::Resolution(0, 8))
        ));
        params = RayCastParams::new(8, 8);
        params.increment = 0.0;
        assert!(matches!(
            ray_cast(&vol, &rot, &params),
            Err(ParameterError::RayCastIncrement(_))
        ));
        params = RayCastParams::new(8, 8);
        params.threshold = 0;
        assert!(matches!(
            ray_cast(&vol, &rot, &params),
            Err(ParameterError::Threshold)
        ));
        assert!(matches!(
            ray_cast_integer(&vol, &rot, 0.0, 255),
            Err(ParameterError::ZScale(_))
        ));
    }

    #[test]
    fn cancelled_render_keeps_completed_rows() {
        let vol = single_voxel_volume(15, 200.0);
        let params = RayCastParams::new(15, 15);
        let mut lines = 0;
        let img = ray_cast_with_progress(&vol, &Matrix4::identity(), &params, &mut |done, _| {
            lines = done;
            done < 5
        })
        .unwrap();
        assert_eq!(lines, 5);
        assert_eq!(img.dimensions(), (15, 15));
    }

    #[test]
    fn integer_ray_walks_the_dominant_axis() {
        let mut ray = IntegerRay::new([0, 0, 0], [50, 25, -4]);
        assert_eq!(ray.steps(), [1, 1, -1]);
        let template = ray.template();
        assert_eq!(template.len(), 50);
        // every step advances x, the dominant axis
        assert!(template.iter().all(|f| f & 0x01 != 0));
        let y_steps = template.iter().filter(|f| *f & 0x02 != 0).count();
        let z_steps = template.iter().filter(|f| *f & 0x04 != 0).count();
        assert_eq!(y_steps, 25);
        assert_eq!(z_steps, 4);
    }

    #[test]
    fn euler_angles_round_trip() {
        let (rx, ry, rz) = (0.3_f32, -0.5, 0.2);
        let (ex, ey, ez) = euler_angles(&euler_rotation(rx, ry, rz));
        assert!((ex - rx).abs() < 1e-5);
        assert!((ey - ry).abs() < 1e-5);
        assert!((ez - rz).abs() < 1e-5);
    }

    #[test]
    fn axial_projection_takes_max_along_z() {
        let vol = Volume::from_fn(4, 4, 3, [1.0; 3], |x, y, z| (x + y + z * 10) as f32);
        let img = project_axial(&vol);
        // max is always in the last slice
        assert_eq!(img.get_pixel(0, 0).0[0], 20);
        assert_eq!(img.get_pixel(3, 3).0[0], 26);
    }
}
