// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Plain mesh data structures shared by every preprocessing stage

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// A mesh vertex. Vertices have no identity beyond their position.
pub type SoundVertex = Point3<f32>;

/// Indexed triangle with a material index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SoundTriangle {
    /// Vertex indices; the order defines the winding and the normal
    pub v: [u32; 3],
    /// Index into the mesh's material list
    pub material: u32,
}

impl SoundTriangle {
    #[inline]
    pub fn new(v0: u32, v1: u32, v2: u32, material: u32) -> Self {
        Self {
            v: [v0, v1, v2],
            material,
        }
    }

    /// True if two of the vertex indices are equal
    #[inline]
    pub fn has_duplicate_indices(&self) -> bool {
        self.v[0] == self.v[1] || self.v[0] == self.v[2] || self.v[1] == self.v[2]
    }

    /// True if every index is below `vertex_count`
    #[inline]
    pub fn in_range(&self, vertex_count: usize) -> bool {
        self.v.iter().all(|&i| (i as usize) < vertex_count)
    }

    #[inline]
    pub fn contains(&self, vertex: u32) -> bool {
        self.v.contains(&vertex)
    }

    /// Unnormalized normal (cross product of the two edges from v0)
    #[inline]
    pub fn cross(&self, vertices: &[SoundVertex]) -> Vector3<f32> {
        let p0 = vertices[self.v[0] as usize];
        let p1 = vertices[self.v[1] as usize];
        let p2 = vertices[self.v[2] as usize];
        (p1 - p0).cross(&(p2 - p0))
    }

    #[inline]
    pub fn area(&self, vertices: &[SoundVertex]) -> f32 {
        0.5 * self.cross(vertices).norm()
    }
}

/// Acoustic material data
///
/// The preprocessor never interprets materials, it only validates indices
/// into the material list and passes the list through to the output mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundMaterial {
    /// Per frequency band reflection coefficient
    pub reflectivity: Vec<f32>,
    /// Per frequency band scattering coefficient
    pub scattering: Vec<f32>,
    /// Per frequency band transmission coefficient
    pub transmission: Vec<f32>,
}

impl Default for SoundMaterial {
    fn default() -> Self {
        Self {
            reflectivity: vec![0.9],
            scattering: vec![0.1],
            transmission: vec![0.0],
        }
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    #[inline]
    pub fn new(min: Point3<f32>, max: Point3<f32>) -> Self {
        Self { min, max }
    }

    /// An inverted box that any `enclose` call will replace
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f32::MAX, f32::MAX, f32::MAX),
            max: Point3::new(f32::MIN, f32::MIN, f32::MIN),
        }
    }

    /// Bounding box of a set of points (empty box for no points)
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<f32>>) -> Self {
        let mut bounds = Self::empty();
        for p in points {
            bounds.enclose(p);
        }
        bounds
    }

    /// Grow the box to contain `p`
    #[inline]
    pub fn enclose(&mut self, p: &Point3<f32>) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    #[inline]
    pub fn center(&self) -> Point3<f32> {
        nalgebra::center(&self.min, &self.max)
    }

    #[inline]
    pub fn size(&self) -> Vector3<f32> {
        self.max - self.min
    }

    /// Largest of the three extents
    #[inline]
    pub fn max_extent(&self) -> f32 {
        self.size().max()
    }

    /// Inclusive containment test
    #[inline]
    pub fn contains(&self, p: &Point3<f32>) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

/// Vertex and triangle lists without adjacency
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMesh {
    pub vertices: Vec<SoundVertex>,
    pub triangles: Vec<SoundTriangle>,
}

impl RawMesh {
    pub fn new(vertices: Vec<SoundVertex>, triangles: Vec<SoundTriangle>) -> Self {
        Self {
            vertices,
            triangles,
        }
    }

    pub fn with_capacity(vertex_count: usize, triangle_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            triangles: Vec::with_capacity(triangle_count),
        }
    }

    /// Closed box with outward-facing triangles, two per face.
    ///
    /// Corner `i` sits at `min` or `max` per axis according to bits
    /// `x | y << 1 | z << 2`.
    pub fn cuboid(bounds: &Aabb, material: u32) -> Self {
        const FACES: [[u32; 4]; 6] = [
            [0, 2, 3, 1],
            [4, 5, 7, 6],
            [0, 1, 5, 4],
            [2, 6, 7, 3],
            [0, 4, 6, 2],
            [1, 3, 7, 5],
        ];
        let vertices = (0..8u32)
            .map(|i| {
                Point3::new(
                    if i & 1 == 0 { bounds.min.x } else { bounds.max.x },
                    if i & 2 == 0 { bounds.min.y } else { bounds.max.y },
                    if i & 4 == 0 { bounds.min.z } else { bounds.max.z },
                )
            })
            .collect();
        let triangles = FACES
            .iter()
            .flat_map(|f| {
                [
                    SoundTriangle::new(f[0], f[1], f[2], material),
                    SoundTriangle::new(f[0], f[2], f[3], material),
                ]
            })
            .collect();
        Self::new(vertices, triangles)
    }

    /// Append another mesh, offsetting its indices
    pub fn merge(&mut self, other: &RawMesh) {
        if other.is_empty() {
            return;
        }
        let offset = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.triangles
            .extend(other.triangles.iter().map(|t| SoundTriangle {
                v: [t.v[0] + offset, t.v[1] + offset, t.v[2] + offset],
                material: t.material,
            }));
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
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(&self.vertices)
    }

    /// True if every triangle has distinct, in-range indices
    pub fn triangles_valid(&self) -> bool {
        let n = self.vertices.len();
        self.triangles
            .iter()
            .all(|t| t.in_range(n) && !t.has_duplicate_indices())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_triangle_area_and_duplicates() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
        ];
        let tri = SoundTriangle::new(0, 1, 2, 0);
        assert_relative_eq!(tri.area(&vertices), 2.0);
        assert!(!tri.has_duplicate_indices());
        assert!(SoundTriangle::new(0, 1, 0, 0).has_duplicate_indices());
        assert!(!SoundTriangle::new(0, 1, 3, 0).in_range(3));
    }

    #[test]
    fn test_aabb() {
        let points = [Point3::new(-1.0, 0.0, 2.0), Point3::new(3.0, 1.0, -2.0)];
        let bounds = Aabb::from_points(&points);
        assert_eq!(bounds.min, Point3::new(-1.0, 0.0, -2.0));
        assert_eq!(bounds.max, Point3::new(3.0, 1.0, 2.0));
        assert_relative_eq!(bounds.max_extent(), 4.0);
        assert_eq!(bounds.center(), Point3::new(1.0, 0.5, 0.0));
        assert!(bounds.contains(&Point3::new(3.0, 1.0, 2.0)));
        assert!(!bounds.contains(&Point3::new(3.1, 1.0, 2.0)));
        assert!(Aabb::empty().is_empty());
    }

    #[test]
    fn test_merge_offsets_indices() {
        let mut a = RawMesh::new(
            vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
            vec![SoundTriangle::new(0, 1, 2, 0)],
        );
        let b = a.clone();
        a.merge(&b);
        assert_eq!(a.vertex_count(), 6);
        assert_eq!(a.triangles[1].v, [3, 4, 5]);
        assert!(a.triangles_valid());
    }

    #[test]
    fn test_cuboid_faces_outward() {
        let bounds = Aabb::new(Point3::new(-1.0, 0.0, 0.0), Point3::new(1.0, 2.0, 3.0));
        let mesh = RawMesh::cuboid(&bounds, 2);
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.triangle_count(), 12);
        assert!(mesh.triangles_valid());
        let center = bounds.center();
        let total: f32 = mesh.triangles.iter().map(|t| t.area(&mesh.vertices)).sum();
        assert_relative_eq!(total, 2.0 * (2.0 * 2.0 + 2.0 * 3.0 + 2.0 * 3.0), epsilon = 1e-5);
        for t in &mesh.triangles {
            let p = mesh.vertices[t.v[0] as usize];
            assert!(t.cross(&mesh.vertices).dot(&(p - center)) > 0.0);
            assert_eq!(t.material, 2);
        }
    }
}
