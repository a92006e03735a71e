// SPDX-License-Identifier: CEPL-1.0
//! Load-time asset preparation: OBJ geometry, texture pixels and meshlets.

use anyhow::{bail, Context, Result};
use prism_render::mesh::{MESHLET_MAX_TRIANGLES, MESHLET_MAX_VERTICES};
use prism_render::{Meshlet, SceneData, TextureData, Vertex};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Collapses bit-identical vertices and returns the index list into the
/// unique set, in first-seen order.
pub fn dedup_vertices(corners: impl IntoIterator<Item = Vertex>) -> (Vec<Vertex>, Vec<u32>) {
    let mut unique = HashMap::new();
    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    for v in corners {
        let index = *unique.entry(v.key()).or_insert_with(|| {
            vertices.push(v);
            (vertices.len() - 1) as u32
        });
        indices.push(index);
    }
    (vertices, indices)
}

/// Greedy clustering in index order. A meshlet is closed as soon as the next
/// triangle would push it past the vertex or triangle limit.
pub fn build_meshlets(indices: &[u32]) -> Vec<Meshlet> {
    let mut meshlets = Vec::new();
    let mut cur = Meshlet::default();

    for tri in indices.chunks_exact(3) {
        let local = |m: &Meshlet, g: u32| m.vertices[..m.vertex_count as usize].iter().position(|&v| v == g);
        let fresh = tri
            .iter()
            .enumerate()
            .filter(|&(i, g)| local(&cur, *g).is_none() && !tri[..i].contains(g))
            .count();
        if cur.vertex_count as usize + fresh > MESHLET_MAX_VERTICES
            || cur.triangle_count as usize == MESHLET_MAX_TRIANGLES
        {
            meshlets.push(std::mem::take(&mut cur));
        }

        let base = cur.triangle_count as usize * 3;
        for (corner, &g) in tri.iter().enumerate() {
            let slot = match local(&cur, g) {
                Some(slot) => slot,
                None => {
                    let slot = cur.vertex_count as usize;
                    cur.vertices[slot] = g;
                    cur.vertex_count += 1;
                    slot
                }
            };
            cur.indices[base + corner] = slot as u8;
        }
        cur.triangle_count += 1;
    }
    if cur.triangle_count > 0 {
        meshlets.push(cur);
    }
    meshlets
}

/// Triangulated OBJ. Texture V is flipped to Vulkan's top-left origin;
/// missing normals or UVs become zero.
pub fn load_obj(path: &Path) -> Result<(Vec<Vertex>, Vec<u32>)> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            single_index: false,
            triangulate: true,
            ignore_lines: true,
            ignore_points: true,
            ..Default::default()
        },
    )
    .with_context(|| format!("loading {}", path.display()))?;

    let mut corners = Vec::new();
    for model in &models {
        let m = &model.mesh;
        for (k, &pi) in m.indices.iter().enumerate() {
            let p = pi as usize * 3;
            let position = [m.positions[p], m.positions[p + 1], m.positions[p + 2]];
            let normal = match m.normal_indices.get(k) {
                Some(&ni) => {
                    let n = ni as usize * 3;
                    [m.normals[n], m.normals[n + 1], m.normals[n + 2]]
                }
                None => [0.0; 3],
            };
            let uv = match m.texcoord_indices.get(k) {
                Some(&ti) => {
                    let t = ti as usize * 2;
                    [m.texcoords[t], 1.0 - m.texcoords[t + 1]]
                }
                None => [0.0; 2],
            };
            corners.push(Vertex::new(position, normal, uv));
        }
    }
    if corners.is_empty() {
        bail!("{}: no faces to draw", path.display());
    }
    let (vertices, indices) = dedup_vertices(corners);
    info!(
        "{}: {} models, {} unique vertices, {} triangles",
        path.display(),
        models.len(),
        vertices.len(),
        indices.len() / 3
    );
    Ok((vertices, indices))
}

pub fn load_texture(path: &Path) -> Result<TextureData> {
    let img = image::open(path)
        .with_context(|| format!("loading {}", path.display()))?
        .to_rgba8();
    let (width, height) = img.dimensions();
    Ok(TextureData {
        width,
        height,
        rgba: img.into_raw(),
    })
}

/// Unit quad facing +Z, used when no model is configured.
pub fn fallback_quad() -> (Vec<Vertex>, Vec<u32>) {
    let n = [0.0, 0.0, 1.0];
    let vertices = vec![
        Vertex::new([-0.5, -0.5, 0.0], n, [0.0, 1.0]),
        Vertex::new([0.5, -0.5, 0.0], n, [1.0, 1.0]),
        Vertex::new([0.5, 0.5, 0.0], n, [1.0, 0.0]),
        Vertex::new([-0.5, 0.5, 0.0], n, [0.0, 0.0]),
    ];
    (vertices, vec![0, 1, 2, 2, 3, 0])
}

pub fn load_scene(model: Option<&Path>, texture: Option<&Path>) -> Result<SceneData> {
    let (vertices, indices) = match model {
        Some(p) => load_obj(p)?,
        None => fallback_quad(),
    };
    let texture = match texture {
        Some(p) => load_texture(p)?,
        None => TextureData::white(),
    };
    let meshlets = build_meshlets(&indices);
    info!("{} meshlets", meshlets.len());
    Ok(SceneData {
        vertices,
        indices,
        meshlets,
        texture,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_shares_identical_corners() {
        let (quad, _) = fallback_quad();
        let corners = [quad[0], quad[1], quad[2], quad[2], quad[3], quad[0]];
        let (vertices, indices) = dedup_vertices(corners);
        assert_eq!(vertices.len(), 4);
        assert_eq!(indices, vec![0, 1, 2, 2, 3, 0]);
    }

    #[test]
    fn test_dedup_keeps_vertices_differing_only_in_uv() {
        let a = Vertex::new([0.0; 3], [0.0, 1.0, 0.0], [0.0, 0.0]);
        let b = Vertex::new([0.0; 3], [0.0, 1.0, 0.0], [0.0, 1.0]);
        let (vertices, indices) = dedup_vertices([a, b, a]);
        assert_eq!(vertices.len(), 2);
        assert_eq!(indices, vec![0, 1, 0]);
    }

    /// Strip of `n` triangles over `n + 2` vertices.
    fn strip(n: u32) -> Vec<u32> {
        (0..n).flat_map(|i| [i, i + 1, i + 2]).collect()
    }

    fn expand(meshlets: &[Meshlet]) -> Vec<u32> {
        meshlets
            .iter()
            .flat_map(|m| {
                m.indices[..m.triangle_count as usize * 3]
                    .iter()
                    .map(move |&l| m.vertices[l as usize])
            })
            .collect()
    }

    #[test]
    fn test_meshlets_respect_limits_and_reproduce_indices() {
        let indices = strip(500);
        let meshlets = build_meshlets(&indices);
        assert!(meshlets.len() > 1);
        for m in &meshlets {
            assert!(m.vertex_count as usize <= MESHLET_MAX_VERTICES);
            assert!(m.triangle_count as usize <= MESHLET_MAX_TRIANGLES);
            assert!(m.triangle_count > 0);
        }
        assert_eq!(expand(&meshlets), indices);
    }

    #[test]
    fn test_meshlet_closes_on_vertex_limit() {
        // disjoint triangles: 3 new vertices each, so 21 fit in 64 vertices
        let indices: Vec<u32> = (0..30 * 3).collect();
        let meshlets = build_meshlets(&indices);
        assert_eq!(meshlets[0].triangle_count, 21);
        assert_eq!(meshlets[0].vertex_count, 63);
        assert_eq!(meshlets.len(), 2);
        assert_eq!(expand(&meshlets), indices);
    }

    #[test]
    fn test_meshlet_closes_on_triangle_limit() {
        // every triangle reuses the same three vertices
        let indices: Vec<u32> = (0..200).flat_map(|_| [0, 1, 2]).collect();
        let meshlets = build_meshlets(&indices);
        assert_eq!(meshlets[0].triangle_count as usize, MESHLET_MAX_TRIANGLES);
        assert_eq!(meshlets[0].vertex_count, 3);
        assert_eq!(meshlets[1].triangle_count as usize, 200 - MESHLET_MAX_TRIANGLES);
    }

    fn write_obj(name: &str, body: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("prism-{}-{name}.obj", std::process::id()));
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_obj_without_faces_is_rejected() {
        let path = write_obj("points", "v 0 0 0\nv 1 0 0\nv 0 1 0\n");
        let err = load_obj(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(format!("{err:#}").contains("no faces"), "{err:#}");
    }

    #[test]
    fn test_obj_single_triangle_loads() {
        let path = write_obj("tri", "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n");
        let (vertices, indices) = load_obj(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(vertices.len(), 3);
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_no_indices_no_meshlets() {
        assert!(build_meshlets(&[]).is_empty());
    }
}
