//! Correspondence search between two feature sets: nearest and second
//! nearest descriptor distance with a ratio-of-distances test, followed by
//! removal of ambiguous matches. Model fitting on top of the
//! correspondences is the caller's concern.

use itertools::Itertools;

use crate::Feature;

/// A correspondence between `set1[index1]` and `set2[index2]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch {
    pub index1: usize,
    pub index2: usize,
    /// Descriptor distance of the accepted pair.
    pub distance: f32,
}

/// Euclidean distance between two descriptor vectors.
pub fn descriptor_distance(a: &Feature, b: &Feature) -> f32 {
    assert_eq!(
        a.descriptor.len(),
        b.descriptor.len(),
        "matching features with different descriptor widths"
    );
    a.descriptor
        .iter()
        .zip(&b.descriptor)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Euclidean distance between two feature locations, in physical units.
pub fn spatial_distance(a: &Feature, b: &Feature) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Identifies corresponding features.
///
/// For every feature of `set1` the closest and second closest descriptors
/// in `set2` are found; the pair is kept when
/// `closest / second_closest < rod` (ratio of distances, typically around
/// 0.9). Matches sharing a target feature are ambiguous and all dropped.
pub fn match_features(set1: &[Feature], set2: &[Feature], rod: f32) -> Vec<FeatureMatch> {
    let mut matches = Vec::new();
    for (i, f1) in set1.iter().enumerate() {
        let mut best: Option<usize> = None;
        let mut best_d = f32::MAX;
        let mut second_best_d = f32::MAX;
        for (j, f2) in set2.iter().enumerate() {
            let d = descriptor_distance(f1, f2);
            if d < best_d {
                second_best_d = best_d;
                best_d = d;
                best = Some(j);
            } else if d < second_best_d {
                second_best_d = d;
            }
        }
        if let Some(j) = best {
            if second_best_d < f32::MAX && best_d / second_best_d < rod {
                matches.push(FeatureMatch {
                    index1: i,
                    index2: j,
                    distance: best_d,
                });
            }
        }
    }

    // drop ambiguous matches: every group of matches that shares a target
    let counts = matches.iter().counts_by(|m| m.index2);
    matches.retain(|m| counts[&m.index2] == 1);
    matches
}
