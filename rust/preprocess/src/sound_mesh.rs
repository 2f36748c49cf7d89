// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Final preprocessed mesh handed to the propagation engine

use crate::diffraction::{free_vertex, DiffractionEdge};
use crate::mesh::{Aabb, RawMesh, SoundMaterial, SoundTriangle, SoundVertex};
use crate::visibility::DiffractionGraph;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Corner pairs of the three triangle edges
const EDGE_CORNERS: [[usize; 2]; 3] = [[0, 1], [0, 2], [1, 2]];

/// Output triangle with its diffuse subdivision and diffraction edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshTriangle {
    pub v: [u32; 3],
    pub material: u32,
    /// Corner opposite the edge with the largest height
    pub key_vertex: u8,
    /// Diffuse patch rows, measured along the height from that edge
    pub rows: u32,
    /// Diffuse patch columns, measured along that edge
    pub columns: u32,
    /// Diffraction edge on each edge slot, see [`DiffractionEdge::edge_indices`]
    pub diffraction_edges: [Option<u32>; 3],
}

/// Diffuse subdivision of a triangle.
///
/// Picks the edge with the largest height `2 * area / length` (the first
/// one on ties) and returns the opposite corner with the row and column
/// counts, each at least 1.
pub fn diffuse_subdivision(corners: [&SoundVertex; 3], resolution: f32) -> (u8, u32, u32) {
    let area2 = (corners[1] - corners[0]).cross(&(corners[2] - corners[0])).norm();
    let mut best_edge = 0;
    let mut max_height = 0.0f32;
    let mut max_length = 0.0f32;
    for (e, [a, b]) in EDGE_CORNERS.iter().enumerate() {
        let length = (corners[*b] - corners[*a]).norm();
        let height = area2 / length;
        if height > max_height {
            best_edge = e;
            max_height = height;
            max_length = length;
        }
    }
    let count = |extent: f32| ((extent / resolution).ceil() as u32).max(1);
    (free_vertex(best_edge) as u8, count(max_height), count(max_length))
}

impl MeshTriangle {
    pub fn new(triangle: &SoundTriangle, vertices: &[SoundVertex], diffuse_resolution: f32) -> Self {
        let corners = triangle.v.map(|i| &vertices[i as usize]);
        let (key_vertex, rows, columns) = diffuse_subdivision(corners, diffuse_resolution);
        Self {
            v: triangle.v,
            material: triangle.material,
            key_vertex,
            rows,
            columns,
            diffraction_edges: [None; 3],
        }
    }

    /// Unit normal following the winding
    pub fn normal(&self, vertices: &[SoundVertex]) -> Vector3<f32> {
        let [p0, p1, p2] = self.v.map(|i| vertices[i as usize]);
        (p1 - p0).cross(&(p2 - p0)).normalize()
    }
}

/// Preprocessed mesh with its diffraction graph
#[derive(Debug, Clone)]
pub struct SoundMesh {
    pub vertices: Vec<SoundVertex>,
    pub triangles: Vec<MeshTriangle>,
    pub materials: Arc<[SoundMaterial]>,
    pub diffraction_graph: DiffractionGraph,
    pub bounds: Aabb,
}

impl SoundMesh {
    /// Output mesh for a plain mesh, without diffraction data
    pub fn from_raw(mesh: &RawMesh, materials: Arc<[SoundMaterial]>, diffuse_resolution: f32) -> Self {
        let triangles = mesh
            .triangles
            .iter()
            .map(|t| MeshTriangle::new(t, &mesh.vertices, diffuse_resolution))
            .collect();
        Self {
            vertices: mesh.vertices.clone(),
            triangles,
            materials,
            diffraction_graph: DiffractionGraph::default(),
            bounds: mesh.bounds(),
        }
    }

    /// Attach a diffraction graph and the per-triangle edge slots
    pub fn set_diffraction(&mut self, graph: DiffractionGraph, triangle_edges: &[[Option<u32>; 3]]) {
        for (triangle, edges) in self.triangles.iter_mut().zip(triangle_edges) {
            triangle.diffraction_edges = *edges;
        }
        self.diffraction_graph = graph;
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    #[inline]
    pub fn diffraction_edges(&self) -> &[DiffractionEdge] {
        &self.diffraction_graph.edges
    }

    pub fn material(&self, triangle: usize) -> &SoundMaterial {
        &self.materials[self.triangles[triangle].material as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn test_diffuse_subdivision_picks_tallest_edge() {
        // Long thin triangle: the short edge (1,2) has the largest height
        let p = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.0, 0.5, 0.0),
        ];
        let (key, rows, columns) = diffuse_subdivision([&p[0], &p[1], &p[2]], 0.5);
        assert_eq!(key, 0);
        assert_eq!(rows, 4);
        assert_eq!(columns, 1);
    }

    #[test]
    fn test_tiny_triangle_has_one_patch() {
        let p = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.01, 0.0, 0.0),
            Point3::new(0.0, 0.01, 0.0),
        ];
        let (_, rows, columns) = diffuse_subdivision([&p[0], &p[1], &p[2]], 0.5);
        assert_eq!((rows, columns), (1, 1));
    }

    #[test]
    fn test_from_raw() {
        let cube = RawMesh::cuboid(&Aabb::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0)), 0);
        let materials: Arc<[SoundMaterial]> = Arc::from(vec![SoundMaterial::default()]);
        let mesh = SoundMesh::from_raw(&cube, materials, 0.5);
        assert_eq!(mesh.triangle_count(), 12);
        assert!(mesh.diffraction_edges().is_empty());
        assert_eq!(mesh.bounds.max, Point3::new(1.0, 1.0, 1.0));
        for t in &mesh.triangles {
            // Right isosceles triangles with unit legs
            assert_eq!(t.rows, 2);
            assert_eq!(t.columns, 2);
            assert!(t.key_vertex < 3);
        }
        assert_eq!(mesh.material(3), &SoundMaterial::default());
    }
}
