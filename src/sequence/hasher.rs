//! Deterministic mapping from a sequence position to a 3D coordinate.
//!
//! Each position is placed on a golden-angle spiral whose radius grows with
//! `sqrt(position)`. The three symbols of the codon starting at the position
//! scale the spiral point per axis by a digital root in `1..=9`, so
//! neighbouring positions stay close while differing codons spread apart.

use serde::{Deserialize, Serialize};

use crate::core::types::Vec3;
use super::symbol_code;

/// Symbols of context needed per position
pub const CODON_LEN: usize = 3;

/// 2π / φ², radians advanced per position
pub const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653;

/// Digital root of `code + position * k`, folded into `1..=9`.
/// Integer arithmetic only; `position` is reduced first so nothing overflows.
#[inline]
fn digital_root(code: u8, position: u64, k: u64) -> u32 {
    let folded = (u64::from(code) + (position % 9) * k) % 9;
    if folded == 0 { 9 } else { folded as u32 }
}

/// Coordinate hasher with a configurable spiral scale
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinateHasher {
    /// Multiplier on the spiral radius
    pub radius_scale: f32,
}

impl Default for CoordinateHasher {
    fn default() -> Self {
        Self { radius_scale: 1.0 }
    }
}

impl CoordinateHasher {
    pub fn new(radius_scale: f32) -> Self {
        Self { radius_scale }
    }

    /// Spiral radius at a position
    pub fn radius(&self, position: u64) -> f64 {
        f64::from(self.radius_scale) * (position as f64).sqrt()
    }

    /// Map the codon at the start of `window` to a coordinate.
    ///
    /// Windows shorter than [`CODON_LEN`] map to `Vec3::ZERO`.
    pub fn hash(&self, window: &[u8], position: u64) -> Vec3 {
        let [a, b, c] = match window {
            [a, b, c, ..] => [*a, *b, *c],
            _ => return Vec3::ZERO,
        };

        let dx = f64::from(digital_root(symbol_code(a), position, 1));
        let dy = f64::from(digital_root(symbol_code(b), position, 2));
        let dz = f64::from(digital_root(symbol_code(c), position, 3));

        let angle = (position as f64 * GOLDEN_ANGLE).rem_euclid(std::f64::consts::TAU);
        let r = self.radius(position);

        Vec3::new(
            (r * angle.cos() * dx / 9.0) as f32,
            (r * angle.sin() * dy / 9.0) as f32,
            (r * dz / 9.0) as f32,
        )
    }

    /// Largest distance a single-symbol substitution can move a coordinate
    pub fn locality_bound(&self, position: u64) -> f32 {
        (self.radius(position) * (8.0 / 9.0) * 3f64.sqrt()) as f32
    }
}

/// Hash with the default radius scale
pub fn hash(window: &[u8], position: u64) -> Vec3 {
    CoordinateHasher::default().hash(window, position)
}
