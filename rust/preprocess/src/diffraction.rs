// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Diffraction edge extraction
//!
//! A diffraction edge is a mesh edge shared by two triangles whose dihedral
//! angle is sharp enough for sound to bend around it. Each edge keeps the two
//! triangle planes, oriented away from the wedge, that bound its shadow
//! region.

use crate::fat_mesh::{FatMesh, Plane};
use crate::mesh::SoundVertex;
use crate::visibility::DiffractionGraph;
use crate::EPSILON;
use nalgebra::Vector3;

/// Index of the triangle edge between corners `a < b`: (0,1) → 0, (0,2) → 1, (1,2) → 2
#[inline]
pub(crate) fn edge_index(a: usize, b: usize) -> usize {
    debug_assert!(a < b && b < 3);
    a + b - 1
}

/// Corner of a triangle not on edge `edge`
#[inline]
pub(crate) fn free_vertex(edge: usize) -> usize {
    2 - edge
}

/// Sharp edge between two triangles
#[derive(Debug, Clone, PartialEq)]
pub struct DiffractionEdge {
    pub v1: SoundVertex,
    pub v2: SoundVertex,
    /// Vertex indices of `v1` and `v2`
    pub vertices: [u32; 2],
    /// The two triangles sharing the edge
    pub triangles: [u32; 2],
    /// Edge slot of this edge within each triangle
    pub edge_indices: [u8; 2],
    /// Plane of the first triangle, normal pointing out of the wedge
    pub plane1: Plane,
    /// Plane of the second triangle, normal pointing out of the wedge
    pub plane2: Plane,
    /// Start of this edge's neighbors in [`DiffractionGraph::neighbors`]
    pub neighbor_offset: u32,
    pub neighbor_count: u32,
}

impl DiffractionEdge {
    /// Vector from `v1` to `v2`
    #[inline]
    pub fn extent(&self) -> Vector3<f32> {
        self.v2 - self.v1
    }

    #[inline]
    pub fn length(&self) -> f32 {
        self.extent().norm()
    }

    /// Unit direction from `v1` to `v2`
    #[inline]
    pub fn direction(&self) -> Vector3<f32> {
        self.extent().normalize()
    }

    /// Unit vector bisecting the two plane normals.
    ///
    /// When the normals cancel (a knife edge) the result is perpendicular to
    /// the edge and the first normal instead.
    pub fn normal(&self) -> Vector3<f32> {
        let sum = self.plane1.normal + self.plane2.normal;
        let magnitude = sum.norm();
        if magnitude > EPSILON {
            sum / magnitude
        } else {
            self.plane1.normal.cross(&self.extent()).normalize()
        }
    }

    /// False if `point` is more than `offset` in front of both planes or
    /// more than `offset` behind both planes.
    #[inline]
    pub fn test_orientation(&self, point: &SoundVertex, offset: f32) -> bool {
        let d1 = self.plane1.signed_distance(point);
        let d2 = self.plane2.signed_distance(point);
        let front = d1 > offset && d2 > offset;
        let behind = d1 < -offset && d2 < -offset;
        !(front || behind)
    }

    /// Edges visible from this one
    pub fn neighbors<'a>(&self, graph: &'a DiffractionGraph) -> &'a [u32] {
        let start = self.neighbor_offset as usize;
        &graph.neighbors[start..start + self.neighbor_count as usize]
    }
}

/// Output of [`find_edges`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeSet {
    pub edges: Vec<DiffractionEdge>,
    /// Per triangle, the diffraction edge on each of its edge slots
    pub triangle_edges: Vec<[Option<u32>; 3]>,
}

/// Dot-product threshold below which two wedge normals form a diffraction edge
#[inline]
fn angle_threshold(min_angle_degrees: f32) -> f32 {
    (min_angle_degrees % 90.0).to_radians().cos().abs()
}

/// Find every edge whose dihedral angle exceeds `min_angle_degrees` and
/// whose length is at least `min_length`.
///
/// Each qualifying triangle pair yields exactly one edge; the edge slot of
/// both triangles is marked so the pair is skipped when met again from the
/// other triangle. Collapsed triangles are ignored.
pub fn find_edges(mesh: &FatMesh, min_angle_degrees: f32, min_length: f32) -> EdgeSet {
    let threshold = angle_threshold(min_angle_degrees);
    let mut edges = Vec::new();
    let mut slots = vec![[None; 3]; mesh.triangles.len()];

    for (i, t1) in mesh.triangles.iter().enumerate() {
        if t1.collapsed {
            continue;
        }
        for a in 0..3 {
            let vertex = t1.v[a];
            for &j in &mesh.vertices[vertex as usize].triangles {
                let j = j as usize;
                let t2 = &mesh.triangles[j];
                if j == i || t2.collapsed {
                    continue;
                }
                for b in a + 1..3 {
                    let search = t1.v[b];
                    let Some(k) = t2.v.iter().position(|&v| v == search) else {
                        continue;
                    };
                    let Some(m) = (0..3).find(|&m| m != k && t2.v[m] == vertex) else {
                        continue;
                    };

                    let edge1 = edge_index(a, b);
                    let edge2 = edge_index(k.min(m), k.max(m));
                    if slots[i][edge1].is_some() || slots[j][edge2].is_some() {
                        continue;
                    }

                    let p1 = *mesh.position(vertex);
                    let p2 = *mesh.position(search);
                    if (p2 - p1).norm() < min_length {
                        continue;
                    }

                    let free1 = mesh.position(t1.v[free_vertex(edge1)]);
                    let free2 = mesh.position(t2.v[free_vertex(edge2)]);
                    let mut plane1 = t1.plane;
                    if plane1.signed_distance(free2) > 0.0 {
                        plane1 = plane1.flipped();
                    }
                    let mut plane2 = t2.plane;
                    if plane2.signed_distance(free1) > 0.0 {
                        plane2 = plane2.flipped();
                    }

                    if plane1.normal.dot(&plane2.normal) < threshold {
                        let id = edges.len() as u32;
                        slots[i][edge1] = Some(id);
                        slots[j][edge2] = Some(id);
                        edges.push(DiffractionEdge {
                            v1: p1,
                            v2: p2,
                            vertices: [vertex, search],
                            triangles: [i as u32, j as u32],
                            edge_indices: [edge1 as u8, edge2 as u8],
                            plane1,
                            plane2,
                            neighbor_offset: 0,
                            neighbor_count: 0,
                        });
                    }
                }
            }
        }
    }

    EdgeSet {
        edges,
        triangle_edges: slots,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat_mesh::fatten;
    use crate::mesh::{Aabb, RawMesh, SoundTriangle};
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use nalgebra::Point3;

    /// Two right triangles sharing the unit edge (0,0,0)-(1,0,0); the second
    /// one rotated about that edge by `degrees`.
    fn hinge(degrees: f32) -> FatMesh {
        let (s, c) = degrees.to_radians().sin_cos();
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, -c, s),
        ];
        let triangles = vec![SoundTriangle::new(0, 1, 2, 0), SoundTriangle::new(0, 3, 1, 0)];
        fatten(&vertices, &triangles)
    }

    #[test]
    fn test_edge_numbering() {
        assert_eq!(edge_index(0, 1), 0);
        assert_eq!(edge_index(0, 2), 1);
        assert_eq!(edge_index(1, 2), 2);
        assert_eq!(free_vertex(0), 2);
        assert_eq!(free_vertex(1), 1);
        assert_eq!(free_vertex(2), 0);
    }

    #[test]
    fn test_coplanar_pair_has_no_edge() {
        let set = find_edges(&hinge(0.0), 10.0, 0.5);
        assert!(set.edges.is_empty());
        assert!(set.triangle_edges.iter().flatten().all(Option::is_none));
    }

    #[test]
    fn test_right_angle_pair_has_one_edge() {
        let set = find_edges(&hinge(90.0), 10.0, 0.5);
        assert_eq!(set.edges.len(), 1);

        let edge = &set.edges[0];
        assert_relative_eq!(edge.length(), 1.0, epsilon = 1e-6);
        assert_eq!(edge.vertices, [0, 1]);
        assert_eq!(edge.triangles, [0, 1]);
        assert_eq!(set.triangle_edges[0], [Some(0), None, None]);
        assert_eq!(set.triangle_edges[1][edge.edge_indices[1] as usize], Some(0));

        // Both normals point away from the wedge
        assert_abs_diff_eq!(edge.plane1.normal, Vector3::new(0.0, 0.0, -1.0), epsilon = 1e-5);
        assert_abs_diff_eq!(edge.plane2.normal, Vector3::new(0.0, -1.0, 0.0), epsilon = 1e-5);
        let n = edge.normal();
        assert_relative_eq!(n.norm(), 1.0, epsilon = 1e-5);
        assert!(n.y < 0.0 && n.z < 0.0);
    }

    #[test]
    fn test_angle_threshold() {
        assert!(find_edges(&hinge(5.0), 10.0, 0.5).edges.is_empty());
        assert_eq!(find_edges(&hinge(15.0), 10.0, 0.5).edges.len(), 1);
        assert_eq!(find_edges(&hinge(150.0), 10.0, 0.5).edges.len(), 1);
    }

    #[test]
    fn test_short_edges_are_skipped() {
        assert!(find_edges(&hinge(90.0), 10.0, 1.5).edges.is_empty());
    }

    #[test]
    fn test_cube_edges_are_unique() {
        let bounds = Aabb::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let cube = RawMesh::cuboid(&bounds, 0);
        let set = find_edges(&fatten(&cube.vertices, &cube.triangles), 10.0, 0.5);

        // Face diagonals are flat, the 12 box edges are sharp
        assert_eq!(set.edges.len(), 12);
        let mut pairs: Vec<[u32; 2]> = set
            .edges
            .iter()
            .map(|e| {
                let mut t = e.triangles;
                t.sort_unstable();
                t
            })
            .collect();
        pairs.sort_unstable();
        pairs.dedup();
        assert_eq!(pairs.len(), 12);

        for (id, edge) in set.edges.iter().enumerate() {
            assert_relative_eq!(edge.length(), 1.0, epsilon = 1e-6);
            for side in 0..2 {
                let t = edge.triangles[side] as usize;
                let slot = edge.edge_indices[side] as usize;
                assert_eq!(set.triangle_edges[t][slot], Some(id as u32));
            }
        }
        let marked = set.triangle_edges.iter().flatten().filter(|s| s.is_some()).count();
        assert_eq!(marked, 24);
    }

    #[test]
    fn test_orientation_region() {
        let set = find_edges(&hinge(90.0), 10.0, 0.5);
        let edge = &set.edges[0];
        // Outside the wedge, in the shadow region of the edge
        assert!(edge.test_orientation(&Point3::new(0.5, -1.0, 1.0), 0.001));
        // Inside the solid wedge: behind both planes
        assert!(!edge.test_orientation(&Point3::new(0.5, 0.5, 0.5), 0.001));
        // In front of both planes
        assert!(!edge.test_orientation(&Point3::new(0.5, -1.0, -1.0), 0.001));
    }
}
