//! Render an animated maximum intensity projection of a synthetic volume,
//! one PNG per frame, rotating a little further each frame.

use mops3d::{euler_rotation, ray_cast_with_progress, Interpolation, RayCastParams, Volume};

const FRAMES: usize = 12;
const DEGREE: f32 = std::f32::consts::PI / 180.0;

fn main() {
    let out_dir = std::env::args().nth(1).unwrap_or_else(|| "mip-frames".into());
    std::fs::create_dir_all(&out_dir).expect("create output directory");

    let n = 64;
    let volume = Volume::from_fn(n, n, n, [1.0; 3], |x, y, z| {
        // a bright tilted rod plus a blob, enough structure to see rotation
        let (fx, fy, fz) = (x as f32 - 32.0, y as f32 - 32.0, z as f32 - 32.0);
        let rod = ((fx - fz).powi(2) + fy.powi(2)).sqrt();
        let rod: f32 = if rod < 4.0 { 220.0 } else { 0.0 };
        let blob = 180.0 * (-(fx * fx + (fy - 12.0).powi(2) + fz * fz) / 50.0).exp();
        rod.max(blob)
    });

    let mut params = RayCastParams::new(128, 128);
    params.increment = 0.8;
    params.interpolation = Interpolation::Trilinear;

    let step = euler_rotation(0.0, 30.0 * DEGREE / FRAMES as f32, 0.0);
    // single explicit rotation accumulator, composed per frame
    let mut rotation = euler_rotation(0.0, 0.0, 0.0);
    for frame in 0..FRAMES {
        let img = ray_cast_with_progress(&volume, &rotation, &params, &mut |line, total| {
            if line == total {
                eprintln!("frame {frame}: {total} lines");
            }
            true
        })
        .expect("valid parameters");
        let path = format!("{out_dir}/projection{frame:03}.png");
        img.save(&path).expect("write frame");
        println!("{path}");
        rotation = step * rotation;
    }
}
