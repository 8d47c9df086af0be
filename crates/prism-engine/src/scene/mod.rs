//! Hard-coded scene: two textured quads, an orbiting camera and the asset
//! names the viewer loads.

mod camera;
mod vertex;

pub use camera::{model_matrix, projection_matrix, view_matrix};
pub use vertex::{Vertex, INDICES, VERTICES};

pub const GEOMETRY_VERTEX_SHADER: &str = "default.vert.wgsl";
pub const GEOMETRY_FRAGMENT_SHADER: &str = "default.frag.wgsl";
pub const COMPOSITE_VERTEX_SHADER: &str = "screen_quad.vert.wgsl";
pub const COMPOSITE_FRAGMENT_SHADER: &str = "screen_quad.frag.wgsl";
pub const ALBEDO_TEXTURE: &str = "texture.png";
