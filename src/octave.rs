//! One octave of the scale pyramid: a stack of progressively blurred copies
//! of a base volume, their pairwise differences, and a second, more heavily
//! blurred family used for orientation estimation.

use crate::filter;
use crate::volume::Volume;

/// Lifecycle of an octave. Only built octaves may be queried for DoG or
/// smoothed images; a cleared octave is inert and any further access is a
/// wiring bug.
enum Stage {
    /// Holds the caller-supplied base image and the pre-blurred image at
    /// `sigma[steps]`, which seeds the next octave via [`ScaleOctave::resample`].
    Seeded { base: Volume, widest: Volume },
    Built {
        img: Vec<Volume>,
        dog: Vec<Volume>,
        smoothed: Vec<Volume>,
    },
    Cleared,
}

pub struct ScaleOctave {
    steps: usize,
    k: f32,
    sigma: Vec<f32>,
    sigma_diff: Vec<f32>,
    smoothed_sigma_diff: Vec<f32>,
    width: usize,
    height: usize,
    depth: usize,
    stage: Stage,
}

impl ScaleOctave {
    /// `sigma` must have length `steps + 3`; `sigma_diff[i]` is the
    /// incremental blur taking the base from `sigma[0]` to `sigma[i]`, and
    /// `smoothed_sigma_diff` likewise for the orientation family.
    pub(crate) fn new(
        base: Volume,
        sigma: &[f32],
        sigma_diff: &[f32],
        smoothed_sigma_diff: &[f32],
    ) -> ScaleOctave {
        assert!(sigma.len() >= 4, "sigma schedule needs steps + 3 entries");
        assert_eq!(sigma.len(), sigma_diff.len());
        assert_eq!(sigma.len(), smoothed_sigma_diff.len());
        let steps = sigma.len() - 3;
        let widest = filter::gauss(&base, sigma_diff[steps]);
        ScaleOctave {
            steps,
            k: 2_f32.powf(1.0 / steps as f32),
            sigma: sigma.to_vec(),
            sigma_diff: sigma_diff.to_vec(),
            smoothed_sigma_diff: smoothed_sigma_diff.to_vec(),
            width: base.width(),
            height: base.height(),
            depth: base.depth(),
            stage: Stage::Seeded { base, widest },
        }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Scale ratio between adjacent steps, `2^(1/steps)`.
    pub fn k(&self) -> f32 {
        self.k
    }

    pub fn sigma(&self, i: usize) -> f32 {
        self.sigma[i]
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_cleared(&self) -> bool {
        matches!(self.stage, Stage::Cleared)
    }

    /// Populates the blur stack, the difference-of-Gaussian images and the
    /// orientation smoothing family. Building twice is a no-op.
    pub fn build(&mut self) {
        match self.stage {
            Stage::Built { .. } => return,
            Stage::Cleared => panic!("octave accessed after clear()"),
            Stage::Seeded { .. } => {}
        }
        let Stage::Seeded { base, widest } = std::mem::replace(&mut self.stage, Stage::Cleared)
        else {
            unreachable!()
        };

        let n = self.sigma.len();
        let smoothed: Vec<Volume> = self
            .smoothed_sigma_diff
            .iter()
            .map(|&s| filter::gauss(&base, s))
            .collect();

        let mut widest = Some(widest);
        let mut img: Vec<Volume> = Vec::with_capacity(n);
        img.push(base);
        for i in 1..n {
            let vol = if i == self.steps {
                widest.take().expect("resample seed consumed once")
            } else {
                filter::gauss(&img[0], self.sigma_diff[i])
            };
            img.push(vol);
        }

        let dog: Vec<Volume> = img.windows(2).map(|w| filter::sub(&w[1], &w[0])).collect();
        log::debug!(
            "built octave {}x{}x{}: {} blur levels, {} dog levels",
            self.width,
            self.height,
            self.depth,
            img.len(),
            dog.len()
        );
        self.stage = Stage::Built { img, dog, smoothed };
    }

    /// Half-resolution copy of the most-blurred image, with doubled spacing.
    /// This seeds the next octave of the pyramid.
    pub fn resample(&self) -> Volume {
        let src = match &self.stage {
            Stage::Seeded { widest, .. } => widest,
            Stage::Built { img, .. } => &img[self.steps],
            Stage::Cleared => panic!("octave accessed after clear()"),
        };
        let w = src.width() / 2 + src.width() % 2;
        let h = src.height() / 2 + src.height() % 2;
        let d = src.depth() / 2 + src.depth() % 2;
        let [sx, sy, sz] = src.spacing();
        Volume::from_fn(w, h, d, [sx * 2.0, sy * 2.0, sz * 2.0], |x, y, z| {
            src.get(x * 2, y * 2, z * 2)
        })
    }

    /// Releases all held volumes to bound peak memory across the pyramid.
    pub fn clear(&mut self) {
        self.stage = Stage::Cleared;
    }

    /// The `steps + 2` difference-of-Gaussian images.
    pub fn dog_images(&self) -> &[Volume] {
        match &self.stage {
            Stage::Built { dog, .. } => dog,
            _ => panic!("octave not built"),
        }
    }

    pub fn img(&self, i: usize) -> &Volume {
        match &self.stage {
            Stage::Built { img, .. } => &img[i],
            _ => panic!("octave not built"),
        }
    }

    /// Image of the orientation smoothing family at step `i`.
    pub fn smoothed(&self, i: usize) -> &Volume {
        match &self.stage {
            Stage::Built { smoothed, .. } => &smoothed[i],
            _ => panic!("octave not built"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn octave(n: usize, steps: usize) -> ScaleOctave {
        let base = Volume::from_fn(n, n, n, [1.0; 3], |x, y, z| (x * y + z) as f32);
        let count = steps + 3;
        let sigma0 = 1.6_f32;
        let mut sigma = vec![sigma0; count];
        let mut sigma_diff = vec![0.0; count];
        let mut smoothed_diff = vec![(sigma0 * sigma0 * (4.5 * 4.5 - 1.0)).sqrt(); count];
        for i in 1..count {
            sigma[i] = sigma0 * 2_f32.powf(i as f32 / steps as f32);
            sigma_diff[i] = (sigma[i] * sigma[i] - sigma0 * sigma0).sqrt();
            smoothed_diff[i] = (4.5 * 4.5 * sigma[i] * sigma[i] - sigma0 * sigma0).sqrt();
        }
        ScaleOctave::new(base, &sigma, &sigma_diff, &smoothed_diff)
    }

    #[test]
    fn resample_halves_dimensions_and_doubles_spacing() {
        let oct = octave(9, 3);
        let half = oct.resample();
        assert_eq!(half.width(), 5);
        assert_eq!(half.height(), 5);
        assert_eq!(half.depth(), 5);
        assert_eq!(half.spacing(), [2.0, 2.0, 2.0]);
    }

    #[test]
    fn build_creates_expected_stacks() {
        let mut oct = octave(8, 3);
        oct.build();
        assert_eq!(oct.dog_images().len(), 5);
        assert_eq!(oct.img(0).width(), 8);
        assert_eq!(oct.smoothed(5).width(), 8);
    }

    #[test]
    fn build_twice_is_a_no_op() {
        let mut oct = octave(6, 1);
        oct.build();
        oct.build();
        assert_eq!(oct.dog_images().len(), 3);
    }

    #[test]
    #[should_panic(expected = "after clear")]
    fn cleared_octave_rejects_access() {
        let mut oct = octave(6, 1);
        oct.build();
        oct.clear();
        oct.resample();
    }

    #[test]
    #[should_panic(expected = "not built")]
    fn dog_images_require_build() {
        let oct = octave(6, 1);
        oct.dog_images();
    }
}
