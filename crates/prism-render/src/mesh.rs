// SPDX-License-Identifier: CEPL-1.0
//! Host-side geometry and texture data handed to a renderer at load time.

use bytemuck::{Pod, Zeroable};

pub const MESHLET_MAX_VERTICES: usize = 64;
pub const MESHLET_MAX_TRIANGLES: usize = 126;

/// Packed vertex as read by the vertex-pulling shaders from a storage buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    /// Unit normal mapped from [-1, 1] to [0, 255]; last byte is padding.
    pub normal: [u8; 4],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal: pack_normal(normal),
            uv,
        }
    }

    /// Bitwise identity used for deduplication. Two vertices share an index
    /// only if every packed field matches exactly.
    pub fn key(&self) -> [u32; 6] {
        bytemuck::cast(*self)
    }
}

fn pack_normal(n: [f32; 3]) -> [u8; 4] {
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    let n = if len > 0.0 { n.map(|c| c / len) } else { n };
    let q = |c: f32| ((c * 0.5 + 0.5) * 255.0).clamp(0.0, 255.0) as u8;
    [q(n[0]), q(n[1]), q(n[2]), 0]
}

/// Cluster of at most 64 vertices and 126 triangles. `indices` are local
/// to `vertices`, which in turn index the global vertex buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Meshlet {
    pub vertices: [u32; MESHLET_MAX_VERTICES],
    pub indices: [u8; MESHLET_MAX_TRIANGLES * 3],
    pub triangle_count: u8,
    pub vertex_count: u8,
}

impl Default for Meshlet {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[derive(Clone, Debug)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8, row-major.
    pub rgba: Vec<u8>,
}

impl TextureData {
    /// 1x1 opaque white, used when no texture is configured.
    pub fn white() -> Self {
        Self {
            width: 1,
            height: 1,
            rgba: vec![255; 4],
        }
    }
}

#[derive(Clone, Debug)]
pub struct SceneData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub meshlets: Vec<Meshlet>,
    pub texture: TextureData,
}

impl SceneData {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_packing() {
        let v = Vertex::new([0.0; 3], [0.0, 0.0, 2.0], [0.0; 2]);
        assert_eq!(v.normal, [127, 127, 255, 0]);
        let v = Vertex::new([0.0; 3], [-1.0, 0.0, 0.0], [0.0; 2]);
        assert_eq!(v.normal[0], 0);
    }

    #[test]
    fn test_key_distinguishes_fields() {
        let a = Vertex::new([1.0, 2.0, 3.0], [0.0, 1.0, 0.0], [0.5, 0.5]);
        let mut b = a;
        assert_eq!(a.key(), b.key());
        b.uv[1] = 0.25;
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_gpu_layout_sizes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        assert_eq!(std::mem::size_of::<Meshlet>(), 64 * 4 + 378 + 2);
    }
}
