//! Mural engine crate.
//!
//! Restorable images and the graphics command layer of a 2D renderer:
//! callers draw between logical images through [`Graphics`]; work is batched
//! into a command queue, packed into shared atlas textures, and every image
//! keeps enough history to be rebuilt after the GPU device is lost.

pub mod atlas;
pub mod command;
pub mod coords;
pub mod core;
pub mod driver;
pub mod error;
pub mod logging;
pub mod paint;
pub mod render;
pub mod restorable;

pub use crate::core::{DrawTriangles, FrameReport, Graphics, GraphicsConfig};
pub use crate::error::{GraphicsError, Result};
pub use crate::restorable::ImageId;
