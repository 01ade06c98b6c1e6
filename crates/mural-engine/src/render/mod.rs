//! Draw primitives shared by the command queue, restoration logs and drivers.
//!
//! Convention:
//! - geometry is in texels (top-left origin, +Y down)
//! - colors are premultiplied
//! - a draw is a triangle list plus a shader, a blend mode and a fill rule

mod blend;
mod shader;
mod vertex;

pub use blend::{BlendFactor, BlendMode, FillRule};
pub use shader::{Shader, ShaderId};
pub use vertex::{quad_vertices, Vertex, VertexAttribute, QUAD_INDICES, SRC_IMAGE_COUNT};

pub(crate) use vertex::vertex_bounds;
