use ndarray::Array3;

/// Dense 3D scalar field with anisotropic voxel spacing.
///
/// The backing array is indexed `[z, y, x]` and stays logically read-only
/// once a pipeline stage has handed the volume off; every stage that changes
/// intensities produces a new `Volume`.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Array3<f32>,
    /// Physical size of one voxel along x, y, z.
    spacing: [f32; 3],
}

impl Volume {
    pub fn new(data: Array3<f32>, spacing: [f32; 3]) -> Volume {
        assert!(
            spacing.iter().all(|s| *s > 0.0),
            "voxel spacing must be positive"
        );
        let (d, h, w) = data.dim();
        assert!(w > 0 && h > 0 && d > 0, "volume dimensions must be nonzero");
        Volume { data, spacing }
    }

    pub fn zeros(width: usize, height: usize, depth: usize, spacing: [f32; 3]) -> Volume {
        Volume::new(Array3::zeros((depth, height, width)), spacing)
    }

    /// Builds a volume by evaluating `f(x, y, z)` at every voxel.
    pub fn from_fn(
        width: usize,
        height: usize,
        depth: usize,
        spacing: [f32; 3],
        mut f: impl FnMut(usize, usize, usize) -> f32,
    ) -> Volume {
        let data = Array3::from_shape_fn((depth, height, width), |(z, y, x)| f(x, y, z));
        Volume::new(data, spacing)
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn depth(&self) -> usize {
        self.data.dim().0
    }

    pub fn spacing(&self) -> [f32; 3] {
        self.spacing
    }

    /// Checked access. Panics when the coordinate lies outside `[0, dim)`;
    /// an out-of-range read here is a pipeline wiring bug, not a data
    /// condition.
    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        self.data[(z, y, x)]
    }

    /// Unchecked access for hot loops.
    ///
    /// # Safety
    /// The caller must have validated `x < width`, `y < height`, `z < depth`.
    #[inline]
    pub unsafe fn get_unchecked(&self, x: usize, y: usize, z: usize) -> f32 {
        *self.data.uget((z, y, x))
    }

    /// Edge-replicating ("ping-pong") access: out-of-range coordinates are
    /// clamped back into the grid so boundary samples degrade gracefully.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize, z: isize) -> f32 {
        let x = x.clamp(0, self.width() as isize - 1) as usize;
        let y = y.clamp(0, self.height() as isize - 1) as usize;
        let z = z.clamp(0, self.depth() as isize - 1) as usize;
        self.data[(z, y, x)]
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    /// Contiguous `[z, y, x]` view of the voxel data.
    pub(crate) fn as_slice(&self) -> &[f32] {
        self.data.as_slice().expect("volume data is contiguous")
    }

    /// Smallest and largest intensity in the volume.
    pub fn min_max(&self) -> (f32, f32) {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for &v in self.as_slice() {
            min = min.min(v);
            max = max.max(v);
        }
        (min, max)
    }
}
