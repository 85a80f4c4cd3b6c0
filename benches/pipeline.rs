use divan::{black_box, Bencher};
use mops3d::{
    detect_features, filter, ray_cast, DetectionParams, Matrix4, RayCastParams, Volume,
};

fn main() {
    divan::main();
}

fn blob_volume(n: usize) -> Volume {
    let c = (n / 2) as f32;
    Volume::from_fn(n, n, n, [1.0; 3], |x, y, z| {
        let dx = x as f32 - c;
        let dy = y as f32 - c;
        let dz = z as f32 - c;
        200.0 * (-(dx * dx + dy * dy + dz * dz) / 32.0).exp()
    })
}

#[divan::bench]
fn gauss_sigma2_64(bencher: Bencher) {
    let volume = blob_volume(64);
    bencher.bench(|| filter::gauss(black_box(&volume), 2.0));
}

#[divan::bench]
fn detect_features_48(bencher: Bencher) {
    let volume = blob_volume(48);
    let params = DetectionParams {
        min_size: 16,
        fd_width: 8,
        ..DetectionParams::default()
    };
    bencher.bench(|| detect_features(black_box(&volume), &params));
}

#[divan::bench]
fn ray_cast_trilinear_64(bencher: Bencher) {
    let volume = blob_volume(64);
    let rotation = mops3d::euler_rotation(0.3, 0.5, 0.0);
    let params = RayCastParams::new(64, 64);
    bencher.bench(|| ray_cast(black_box(&volume), &rotation, &params));
}

#[divan::bench]
fn project_splat_64(bencher: Bencher) {
    let volume = blob_volume(64);
    let rotation: Matrix4<f32> = mops3d::euler_rotation(0.3, 0.5, 0.0);
    bencher.bench(|| mops3d::project_splat(black_box(&volume), &rotation));
}
