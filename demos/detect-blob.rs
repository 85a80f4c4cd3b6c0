//! Detect features in a synthetic two-blob volume and print them.

use mops3d::{detect_features_with_progress, DetectionParams, Volume};

fn main() {
    let n = 64;
    let blobs = [([20.0_f32, 24.0, 32.0], 4.0_f32), ([44.0, 40.0, 32.0], 6.0)];
    let volume = Volume::from_fn(n, n, n, [1.0; 3], |x, y, z| {
        blobs
            .iter()
            .map(|([cx, cy, cz], sigma)| {
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;
                let dz = z as f32 - cz;
                200.0 * (-(dx * dx + dy * dy + dz * dz) / (2.0 * sigma * sigma)).exp()
            })
            .sum()
    });

    let params = DetectionParams {
        min_size: 16,
        fd_width: 8,
        ..DetectionParams::default()
    };
    let features = detect_features_with_progress(&volume, &params, &mut |done, total| {
        eprintln!("octave {done}/{total}");
        true
    })
    .expect("valid parameters");

    println!("{} features", features.len());
    for f in &features {
        println!(
            "({:6.2}, {:6.2}, {:6.2})  sigma {:5.2}",
            f.x, f.y, f.z, f.scale
        );
    }
}
