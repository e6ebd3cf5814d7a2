//! Per-frame visibility: culling and frame assembly

pub mod culling;
pub mod frame;

pub use culling::{VisibilityCuller, DEFAULT_PLANE_EPSILON};
pub use frame::{Frame, FrameBuilder, FrameStats};
