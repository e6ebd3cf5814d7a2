//! Sequence symbols and the position-to-coordinate hash

pub mod hasher;

pub use hasher::{hash, CoordinateHasher, GOLDEN_ANGLE, CODON_LEN};

/// Numeric code for a sequence symbol: A=1, T=2, G=3, C=4, anything else 0.
/// Case-insensitive.
#[inline]
pub fn symbol_code(symbol: u8) -> u8 {
    match symbol.to_ascii_uppercase() {
        b'A' => 1,
        b'T' => 2,
        b'G' => 3,
        b'C' => 4,
        _ => 0,
    }
}

/// Display color for a symbol code (RGBA)
pub fn base_color(code: u8) -> [f32; 4] {
    match code {
        1 => [1.0, 0.0, 0.0, 1.0], // A
        2 => [1.0, 1.0, 0.0, 1.0], // T
        3 => [0.0, 0.0, 1.0, 1.0], // G
        4 => [0.0, 1.0, 0.0, 1.0], // C
        _ => [0.5, 0.5, 0.5, 1.0],
    }
}
