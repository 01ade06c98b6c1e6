//! Upward API.
//!
//! [`Graphics`] is the one object the rendering layer talks to. It validates
//! requests, records them for restoration, and turns them into queued driver
//! work against the atlas.

mod config;
mod graphics;

pub use config::GraphicsConfig;
pub use graphics::{DrawTriangles, FrameReport, Graphics};
