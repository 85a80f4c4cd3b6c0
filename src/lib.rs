//! 3D scale-invariant feature detection and maximum intensity projection
//! for volumetric images.
//!
//! The feature pipeline implements Multi-Scale Oriented Patches for 3D
//! volumes, using the Difference-of-Gaussians detector: an octave pyramid of
//! progressively blurred copies of the input, 3D+scale extrema detection
//! with sub-voxel Newton localization, and a rotation-invariant descriptor
//! sampled in a frame derived from the local Hessian. A separate engine
//! renders maximum intensity projections of the same volumes by forward
//! splatting, per-pixel ray casting or an orthographic integer fast path.
//!
//! Useful resources:
//! - [1]: [Brown, Szeliski, Winder 2005](https://www.cs.ubc.ca/~mbrown/papers/cvpr05.pdf)
//!   (Multi-Image Matching Using Multi-Scale Oriented Patches)
//! - [2]: [Lowe 2004](https://www.cs.ubc.ca/~lowe/papers/ijcv04.pdf)
//!   (Distinctive Image Features from Scale-Invariant Keypoints)
//!
//! The detector follows [2] generalized to three spatial dimensions plus
//! scale; the descriptor follows [1], with the patch orientation taken from
//! the eigenvectors of the local Hessian instead of a gradient histogram.
//!
//! ```
//! use mops3d::{detect_features, DetectionParams, Volume};
//!
//! let volume = Volume::from_fn(32, 32, 32, [1.0; 3], |x, y, z| {
//!     let (dx, dy, dz) = (x as f32 - 16.0, y as f32 - 16.0, z as f32 - 16.0);
//!     (-(dx * dx + dy * dy + dz * dz) / 32.0).exp()
//! });
//! let params = DetectionParams {
//!     min_size: 16,
//!     ..DetectionParams::default()
//! };
//! let features = detect_features(&volume, &params).unwrap();
//! for f in &features {
//!     println!("({}, {}, {}) at sigma {}", f.x, f.y, f.z, f.scale);
//! }
//! ```

pub mod error;
pub mod extrema;
pub mod filter;
pub mod matching;
pub mod mip;
pub mod octave;
pub mod volume;

mod descriptor;

pub use descriptor::{extract_orientation, sample_descriptor};
pub use error::{ParameterError, Result};
pub use extrema::Candidate;
pub use matching::{descriptor_distance, match_features, spatial_distance, FeatureMatch};
pub use mip::{
    euler_angles, euler_rotation, project_axial, project_splat, ray_cast, ray_cast_integer,
    ray_cast_with_progress, Interpolation, RayCastParams,
};
pub use octave::ScaleOctave;
pub use volume::Volume;

// linear algebra value types used throughout the public API
pub use nalgebra::{Matrix3, Matrix4, Vector3};

/// Maximum number of Newton re-centering iterations during sub-voxel
/// localization.
pub(crate) const MAX_LOCALIZATION_STEPS: usize = 5;

/// Candidates whose squared localization offset reaches this value are
/// rejected as unstable.
pub(crate) const MAX_OFFSET_SQ: f32 = 2.0;

/// Descriptor sample pitch in units of the feature's octave sigma,
/// empirically chosen patch-scale multiplier.
pub(crate) const PATCH_SCALE: f32 = 5.0;

/// Blur of the orientation image family relative to each step's sigma. The
/// orientation Hessian and the descriptor patch are read from these heavily
/// smoothed images.
const ORIENTATION_SMOOTH_SCALE: f32 = 4.5;

/// A detected feature: location in physical units, the sigma it was
/// detected at (in full-resolution voxel units), a right-handed orthonormal
/// orientation frame and the min-max normalized descriptor of length
/// `fd_width^3`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Feature {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub scale: f32,
    pub orientation: Matrix3<f32>,
    pub descriptor: Vec<f32>,
}

/// Pipeline configuration. All knobs are validated before any work runs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectionParams {
    /// Gaussian smoothing steps per scale octave.
    pub steps: usize,
    /// Sigma of the generating kernel assumed for the input volume.
    pub initial_sigma: f32,
    /// Smallest octave extent processed; the pyramid stops halving here.
    pub min_size: usize,
    /// Octaves larger than this are skipped to save memory and time.
    pub max_size: usize,
    /// Side length of the cubic descriptor in samples.
    pub fd_width: usize,
    /// Extrema whose principal curvature ratio exceeds this are rejected as
    /// edge-like responses.
    pub max_curvature_ratio: f32,
    /// Multiplier for the contrast rejection threshold `t * (k - 1)`. The
    /// default assumes intensities roughly in `[0, 1]`.
    pub contrast_threshold: f32,
}

impl Default for DetectionParams {
    fn default() -> DetectionParams {
        DetectionParams {
            steps: 3,
            initial_sigma: 1.6,
            min_size: 32,
            max_size: 1024,
            fd_width: 16,
            max_curvature_ratio: 5.0,
            contrast_threshold: 0.1,
        }
    }
}

impl DetectionParams {
    fn validate(&self) -> Result<()> {
        if self.steps < 1 {
            return Err(ParameterError::Steps);
        }
        if self.initial_sigma <= 0.0 {
            return Err(ParameterError::InitialSigma(self.initial_sigma));
        }
        if self.fd_width < 1 {
            return Err(ParameterError::DescriptorWidth);
        }
        if self.max_curvature_ratio <= 0.0 {
            return Err(ParameterError::CurvatureRatio(self.max_curvature_ratio));
        }
        if self.contrast_threshold < 0.0 {
            return Err(ParameterError::ContrastThreshold(self.contrast_threshold));
        }
        if self.min_size < 1 || self.max_size < self.min_size {
            return Err(ParameterError::OctaveBounds {
                min: self.min_size,
                max: self.max_size,
            });
        }
        Ok(())
    }
}

/// Detects features in all scale octaves of `volume`.
///
/// Feature locations come back in physical units (voxel coordinates scaled
/// by the volume spacing); scale is the detection sigma in full-resolution
/// voxel units.
pub fn detect_features(volume: &Volume, params: &DetectionParams) -> Result<Vec<Feature>> {
    detect_features_with_progress(volume, params, &mut |_, _| true)
}

/// [`detect_features`] with a progress callback invoked after every octave.
/// Returning `false` cancels the pipeline; features of the octaves
/// completed so far are returned.
pub fn detect_features_with_progress(
    volume: &Volume,
    params: &DetectionParams,
    progress: &mut dyn FnMut(usize, usize) -> bool,
) -> Result<Vec<Feature>> {
    params.validate()?;
    let mut octaves = build_octaves(volume, params);
    let total = octaves.len();
    let mut features = Vec::new();
    for (oi, octave) in octaves.iter_mut().enumerate() {
        if octave.is_cleared() {
            // octave was larger than max_size
            continue;
        }
        features.extend(run_octave(octave, oi, volume.spacing(), params));
        // free memory before the next octave; peak usage stays at roughly
        // one built octave regardless of pyramid depth
        octave.clear();
        log::debug!("octave {}/{}: {} features total", oi + 1, total, features.len());
        if !progress(oi + 1, total) {
            log::info!("feature detection cancelled after octave {}", oi + 1);
            break;
        }
    }
    log::info!("detected {} features across {} octaves", features.len(), total);
    Ok(features)
}

/// Initializes the scale pyramid as octave stubs, each seeded by resampling
/// its predecessor's most-blurred image.
fn build_octaves(volume: &Volume, params: &DetectionParams) -> Vec<ScaleOctave> {
    let count = params.steps + 3;
    let sigma0 = params.initial_sigma;
    let mut sigma = vec![sigma0; count];
    let mut sigma_diff = vec![0.0_f32; count];
    let mut smoothed_sigma_diff = vec![0.0_f32; count];
    smoothed_sigma_diff[0] =
        (ORIENTATION_SMOOTH_SCALE * ORIENTATION_SMOOTH_SCALE * sigma0 * sigma0 - sigma0 * sigma0)
            .sqrt();
    for i in 1..count {
        sigma[i] = sigma0 * 2_f32.powf(i as f32 / params.steps as f32);
        sigma_diff[i] = (sigma[i] * sigma[i] - sigma0 * sigma0).sqrt();
        smoothed_sigma_diff[i] = (ORIENTATION_SMOOTH_SCALE * ORIENTATION_SMOOTH_SCALE
            * sigma[i]
            * sigma[i]
            - sigma0 * sigma0)
            .sqrt();
    }

    let mut octave_count = 0;
    let mut w = volume.width() as f32;
    let mut h = volume.height() as f32;
    let mut d = volume.depth() as f32;
    while w > params.min_size as f32 && h > params.min_size as f32 && d > params.min_size as f32 {
        w /= 2.0;
        h /= 2.0;
        d /= 2.0;
        octave_count += 1;
    }

    let mut octaves = Vec::with_capacity(octave_count);
    let mut src = volume.clone();
    for _ in 0..octave_count {
        let mut octave = ScaleOctave::new(src, &sigma, &sigma_diff, &smoothed_sigma_diff);
        let next = octave.resample();
        if octave.width() > params.max_size
            || octave.height() > params.max_size
            || octave.depth() > params.max_size
        {
            octave.clear();
        }
        octaves.push(octave);
        src = next;
    }
    octaves
}

fn run_octave(
    octave: &mut ScaleOctave,
    octave_index: usize,
    spacing: [f32; 3],
    params: &DetectionParams,
) -> Vec<Feature> {
    octave.build();
    let candidates = extrema::detect_candidates(
        octave,
        params.contrast_threshold,
        params.max_curvature_ratio,
    );
    log::debug!(
        "octave {}: {} localized candidates",
        octave_index,
        candidates.len()
    );

    let octave_scale = 2_f32.powi(octave_index as i32);
    let mut features = Vec::with_capacity(candidates.len());
    for c in candidates {
        let si = c.scale.round() as usize;
        let octave_sigma = octave.sigma(0) * 2_f32.powf(c.scale / octave.steps() as f32);
        let Some(orientation) =
            descriptor::extract_orientation(&c, octave_sigma, octave.img(si), octave.smoothed(si))
        else {
            continue;
        };
        let desc = descriptor::sample_descriptor(
            &c,
            octave_sigma,
            octave.smoothed(si),
            &orientation,
            params.fd_width,
        );
        features.push(Feature {
            x: c.x * octave_scale * spacing[0],
            y: c.y * octave_scale * spacing[1],
            z: c.z * octave_scale * spacing[2],
            scale: octave_sigma * octave_scale,
            orientation,
            descriptor: desc,
        });
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_validate() {
        assert!(DetectionParams::default().validate().is_ok());
    }

    #[test]
    fn invalid_params_are_rejected() {
        let volume = Volume::zeros(8, 8, 8, [1.0; 3]);
        let mut params = DetectionParams::default();
        params.steps = 0;
        assert_eq!(
            detect_features(&volume, &params),
            Err(ParameterError::Steps)
        );
        params = DetectionParams::default();
        params.initial_sigma = -1.0;
        assert!(matches!(
            detect_features(&volume, &params),
            Err(ParameterError::InitialSigma(_))
        ));
        params = DetectionParams::default();
        params.min_size = 64;
        params.max_size = 32;
        assert!(matches!(
            detect_features(&volume, &params),
            Err(ParameterError::OctaveBounds { .. })
        ));
    }

    #[test]
    fn octave_count_follows_min_size() {
        let volume = Volume::zeros(40, 40, 40, [1.0; 3]);
        let params = DetectionParams {
            min_size: 16,
            ..DetectionParams::default()
        };
        let octaves = build_octaves(&volume, &params);
        assert_eq!(octaves.len(), 2);
        assert_eq!(octaves[0].width(), 40);
        assert_eq!(octaves[1].width(), 20);
    }

    #[test]
    fn oversized_octaves_are_skipped() {
        let volume = Volume::zeros(40, 40, 40, [1.0; 3]);
        let params = DetectionParams {
            min_size: 16,
            max_size: 32,
            ..DetectionParams::default()
        };
        let octaves = build_octaves(&volume, &params);
        assert_eq!(octaves.len(), 2);
        assert!(octaves[0].is_cleared());
        assert!(!octaves[1].is_cleared());
    }

    #[test]
    fn small_volume_yields_empty_pyramid() {
        let volume = Volume::zeros(8, 8, 8, [1.0; 3]);
        let features = detect_features(&volume, &DetectionParams::default()).unwrap();
        assert!(features.is_empty());
    }
}
