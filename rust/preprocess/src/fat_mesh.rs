// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Adjacency-annotated ("fat") mesh
//!
//! [`fatten`] adds vertex/triangle adjacency and triangle planes to a plain
//! mesh, [`flatten`] compacts away collapsed elements while keeping the
//! adjacency, and [`diet`] compacts back into a plain [`RawMesh`].

use crate::mesh::{RawMesh, SoundTriangle, SoundVertex};
use crate::EPSILON;
use nalgebra::{Point3, Vector3, Vector4};
use smallvec::SmallVec;

/// Adjacency list of a fat vertex
pub type AdjacencyList = SmallVec<[u32; 8]>;

/// Plane `normal · p + offset = 0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit normal
    pub normal: Vector3<f32>,
    pub offset: f32,
}

impl Plane {
    /// Plane with unit `normal` through `point`
    #[inline]
    pub fn new(normal: Vector3<f32>, point: &Point3<f32>) -> Self {
        Self {
            normal,
            offset: -normal.dot(&point.coords),
        }
    }

    /// Plane of a triangle, `None` if the triangle is (nearly) degenerate
    pub fn from_triangle(p0: &Point3<f32>, p1: &Point3<f32>, p2: &Point3<f32>) -> Option<Self> {
        let normal = (p1 - p0).cross(&(p2 - p0));
        let magnitude = normal.norm();
        if magnitude < EPSILON {
            return None;
        }
        Some(Self::new(normal / magnitude, p0))
    }

    /// Signed distance from the plane (positive on the normal side)
    #[inline]
    pub fn signed_distance(&self, point: &Point3<f32>) -> f32 {
        self.normal.dot(&point.coords) + self.offset
    }

    #[inline]
    pub fn flipped(&self) -> Self {
        Self {
            normal: -self.normal,
            offset: -self.offset,
        }
    }

    /// Homogeneous form `(n, d)`
    #[inline]
    pub fn to_homogeneous(&self) -> Vector4<f32> {
        Vector4::new(self.normal.x, self.normal.y, self.normal.z, self.offset)
    }
}

/// Vertex with adjacency and simplification state
#[derive(Debug, Clone, PartialEq)]
pub struct FatVertex {
    pub position: SoundVertex,
    /// Triangles using this vertex
    pub triangles: AdjacencyList,
    /// Vertices sharing a triangle with this vertex, each listed once
    pub neighbors: AdjacencyList,
    /// Merged into another vertex
    pub collapsed: bool,
    /// Edge candidates already gathered from this vertex
    pub checked: bool,
}

impl FatVertex {
    pub fn new(position: SoundVertex) -> Self {
        Self {
            position,
            triangles: AdjacencyList::new(),
            neighbors: AdjacencyList::new(),
            collapsed: false,
            checked: false,
        }
    }
}

/// Triangle with its plane and simplification state
#[derive(Debug, Clone, PartialEq)]
pub struct FatTriangle {
    pub v: [u32; 3],
    pub material: u32,
    pub plane: Plane,
    pub collapsed: bool,
}

impl FatTriangle {
    pub fn new(v: [u32; 3], material: u32, plane: Plane) -> Self {
        Self {
            v,
            material,
            plane,
            collapsed: false,
        }
    }

    #[inline]
    pub fn contains(&self, vertex: u32) -> bool {
        self.v.contains(&vertex)
    }
}

/// Mesh with full vertex/triangle adjacency
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FatMesh {
    pub vertices: Vec<FatVertex>,
    pub triangles: Vec<FatTriangle>,
}

impl FatMesh {
    /// Vertices not merged away by simplification
    pub fn live_vertex_count(&self) -> usize {
        self.vertices.iter().filter(|v| !v.collapsed).count()
    }

    pub fn live_triangle_count(&self) -> usize {
        self.triangles.iter().filter(|t| !t.collapsed).count()
    }

    #[inline]
    pub fn position(&self, vertex: u32) -> &SoundVertex {
        &self.vertices[vertex as usize].position
    }

    /// Number of triangles containing both `a` and `b`
    pub fn shared_triangle_count(&self, a: u32, b: u32) -> usize {
        self.vertices[a as usize]
            .triangles
            .iter()
            .filter(|&&t| self.triangles[t as usize].contains(b))
            .count()
    }
}

/// Build adjacency and planes for a plain mesh.
///
/// Triangles with repeated indices or a near-zero cross product are skipped.
/// Indices must be in range.
pub fn fatten(vertices: &[SoundVertex], triangles: &[SoundTriangle]) -> FatMesh {
    let mut mesh = FatMesh {
        vertices: vertices.iter().copied().map(FatVertex::new).collect(),
        triangles: Vec::with_capacity(triangles.len()),
    };

    for triangle in triangles {
        if triangle.has_duplicate_indices() {
            continue;
        }
        let [p0, p1, p2] = triangle.v.map(|i| vertices[i as usize]);
        let Some(plane) = Plane::from_triangle(&p0, &p1, &p2) else {
            continue;
        };

        let index = mesh.triangles.len() as u32;
        mesh.triangles
            .push(FatTriangle::new(triangle.v, triangle.material, plane));
        for &v in &triangle.v {
            mesh.vertices[v as usize].triangles.push(index);
        }
    }

    let FatMesh {
        vertices: fat_vertices,
        triangles: fat_triangles,
    } = &mut mesh;
    for (i, vertex) in fat_vertices.iter_mut().enumerate() {
        let i = i as u32;
        for &t in &vertex.triangles {
            for &neighbor in &fat_triangles[t as usize].v {
                if neighbor != i && !vertex.neighbors.contains(&neighbor) {
                    vertex.neighbors.push(neighbor);
                }
            }
        }
    }

    mesh
}

/// New index of every live vertex, `u32::MAX` for collapsed ones
fn vertex_remap(vertices: &[FatVertex]) -> (Vec<u32>, usize) {
    let mut next = 0u32;
    let remap = vertices
        .iter()
        .map(|v| {
            if v.collapsed {
                u32::MAX
            } else {
                next += 1;
                next - 1
            }
        })
        .collect();
    (remap, next as usize)
}

/// Compact away collapsed vertices and triangles, keeping adjacency.
///
/// Triangles whose area falls below epsilon after compaction are dropped as
/// well, and every adjacency list is remapped to the dense indices.
pub fn flatten(mesh: &FatMesh) -> FatMesh {
    let (vertex_index, live_vertices) = vertex_remap(&mesh.vertices);

    let mut vertices: Vec<FatVertex> = Vec::with_capacity(live_vertices);
    for vertex in mesh.vertices.iter().filter(|v| !v.collapsed) {
        let mut flat = FatVertex::new(vertex.position);
        flat.neighbors = vertex
            .neighbors
            .iter()
            .map(|&n| vertex_index[n as usize])
            .filter(|&n| n != u32::MAX)
            .collect();
        vertices.push(flat);
    }

    let mut triangle_index = vec![u32::MAX; mesh.triangles.len()];
    let mut triangles = Vec::with_capacity(mesh.triangles.len());
    for (i, triangle) in mesh.triangles.iter().enumerate() {
        if triangle.collapsed {
            continue;
        }
        let v = triangle.v.map(|v| vertex_index[v as usize]);
        let [p0, p1, p2] = v.map(|v| vertices[v as usize].position);
        let area = 0.5 * (p2 - p0).cross(&(p2 - p1)).norm();
        if area < EPSILON {
            continue;
        }
        triangle_index[i] = triangles.len() as u32;
        triangles.push(FatTriangle::new(v, triangle.material, triangle.plane));
    }

    for (vertex, flat) in mesh
        .vertices
        .iter()
        .filter(|v| !v.collapsed)
        .zip(vertices.iter_mut())
    {
        flat.triangles = vertex
            .triangles
            .iter()
            .map(|&t| triangle_index[t as usize])
            .filter(|&t| t != u32::MAX)
            .collect();
    }

    FatMesh {
        vertices,
        triangles,
    }
}

/// Compact away collapsed elements into a plain mesh
pub fn diet(mesh: &FatMesh) -> RawMesh {
    let (vertex_index, live_vertices) = vertex_remap(&mesh.vertices);
    let mut output = RawMesh::with_capacity(live_vertices, mesh.triangles.len());
    output.vertices.extend(
        mesh.vertices
            .iter()
            .filter(|v| !v.collapsed)
            .map(|v| v.position),
    );
    output.triangles.extend(
        mesh.triangles
            .iter()
            .filter(|t| !t.collapsed)
            .map(|t| SoundTriangle {
                v: t.v.map(|v| vertex_index[v as usize]),
                material: t.material,
            }),
    );
    output
}
