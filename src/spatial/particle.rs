//! Particle data type

use bytemuck::{Pod, Zeroable};

use crate::core::types::Vec3;
use crate::sequence::base_color;

/// Single particle - exactly 48 bytes, uploadable as raw bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Particle {
    /// World position
    pub position: [f32; 3],
    /// Render size
    pub size: f32,
    /// RGBA color
    pub color: [f32; 4],
    /// Opaque caller data, the sequence position by convention
    pub metadata: u64,
    /// Source symbol code
    pub category: u32,
    _pad: u32,
}

impl Particle {
    /// Create a particle colored by its symbol code
    pub fn new(position: Vec3, category: u8, metadata: u64) -> Self {
        Self {
            position: position.to_array(),
            size: 1.0,
            color: base_color(category),
            metadata,
            category: u32::from(category),
            _pad: 0,
        }
    }

    pub fn with_color(self, color: [f32; 4]) -> Self {
        Self { color, ..self }
    }

    pub fn with_size(self, size: f32) -> Self {
        Self { size, ..self }
    }

    /// Position as a vector
    #[inline]
    pub fn pos(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }
}
