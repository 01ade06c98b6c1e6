//! Color and pixel-buffer model.
//!
//! Scope:
//! - premultiplied `f32` colors used by vertex color scales and blending
//! - helpers over tightly packed premultiplied RGBA8 buffers
//!
//! Geometry types remain in `coords`.

pub mod color;
pub mod pixels;

pub use color::Color;
