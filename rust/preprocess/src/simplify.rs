// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Quadric error metric edge-collapse simplification
//!
//! Each vertex accumulates the quadric `Q = Σ p pᵀ` of its triangle planes
//! `p = (n, d)`. Every edge is a collapse candidate whose target is the
//! cheapest of its two endpoints and their midpoint under `Q1 + Q2`.
//! Candidates are processed cheapest first until the cheapest remaining one
//! exceeds the tolerance. Border vertices never move and collapses that would
//! flip a surviving triangle are skipped.

use crate::collapse_queue::CollapseQueue;
use crate::fat_mesh::{FatMesh, Plane};
use crate::mesh::SoundVertex;
use nalgebra::{Matrix4, Point3};
use smallvec::SmallVec;
use tracing::debug;

/// Candidate merge of `v1` into `v2`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeCollapse {
    pub v1: u32,
    pub v2: u32,
    pub target: SoundVertex,
    pub cost: f32,
}

impl EdgeCollapse {
    #[inline]
    fn is_degenerate(&self) -> bool {
        self.v1 == self.v2
    }

    #[inline]
    fn other(&self, vertex: u32) -> u32 {
        if self.v1 == vertex {
            self.v2
        } else {
            self.v1
        }
    }
}

/// Per-vertex quadric and the candidates touching the vertex
#[derive(Debug, Clone)]
struct QemVertex {
    q: Matrix4<f32>,
    collapses: SmallVec<[u32; 8]>,
}

/// Summary of a simplification pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollapseSummary {
    /// Initial candidate edges
    pub candidates: usize,
    /// Accepted collapses (vertices removed)
    pub collapsed: usize,
    /// Candidates skipped because an endpoint is on a border
    pub rejected_border: usize,
    /// Candidates skipped because a triangle would flip
    pub rejected_inversion: usize,
}

/// Quadric of the planes of a vertex's triangles
fn vertex_quadric(mesh: &FatMesh, vertex: u32) -> Matrix4<f32> {
    mesh.vertices[vertex as usize]
        .triangles
        .iter()
        .map(|&t| {
            let p = mesh.triangles[t as usize].plane.to_homogeneous();
            p * p.transpose()
        })
        .fold(Matrix4::zeros(), |q, kp| q + kp)
}

/// Quadric error `|vᵀ Q v|` of a point
#[inline]
pub fn quadric_error(q: &Matrix4<f32>, v: &Point3<f32>) -> f32 {
    let v4 = v.to_homogeneous();
    v4.dot(&(q * v4)).abs()
}

/// Cheapest of `v1`, the midpoint and `v2`, preferring them in that order on ties
pub fn collapse_target(q: &Matrix4<f32>, v1: &Point3<f32>, v2: &Point3<f32>) -> (SoundVertex, f32) {
    let midpoint = nalgebra::center(v1, v2);
    let c1 = quadric_error(q, v1);
    let cm = quadric_error(q, &midpoint);
    let c2 = quadric_error(q, v2);
    if c1 <= cm && c1 <= c2 {
        (*v1, c1)
    } else if cm <= c2 {
        (midpoint, cm)
    } else {
        (*v2, c2)
    }
}

/// A vertex that must not move: its triangles disagree on material, or it
/// shares exactly one triangle with some neighbour (an open edge).
pub fn vertex_is_border(mesh: &FatMesh, vertex: u32) -> bool {
    let fat = &mesh.vertices[vertex as usize];
    let mut materials = fat
        .triangles
        .iter()
        .map(|&t| mesh.triangles[t as usize].material);
    if let Some(first) = materials.next() {
        if materials.any(|m| m != first) {
            return true;
        }
    }

    fat.neighbors.iter().any(|&neighbor| {
        fat.triangles
            .iter()
            .filter(|&&t| mesh.triangles[t as usize].contains(neighbor))
            .count()
            == 1
    })
}

/// False if moving `moved` to `target` flips a triangle of `moved` that
/// does not also contain `other`.
fn keeps_orientation(mesh: &FatMesh, moved: u32, other: u32, target: &SoundVertex) -> bool {
    mesh.vertices[moved as usize].triangles.iter().all(|&t| {
        let triangle = &mesh.triangles[t as usize];
        if triangle.contains(other) {
            return true;
        }
        let [p0, p1, p2] = triangle.v.map(|v| {
            if v == moved {
                *target
            } else {
                *mesh.position(v)
            }
        });
        let normal = (p1 - p0).cross(&(p2 - p0));
        triangle.plane.normal.dot(&normal) >= 0.0
    })
}

struct Simplifier<'a> {
    mesh: &'a mut FatMesh,
    qem: Vec<QemVertex>,
    collapses: Vec<EdgeCollapse>,
    queue: CollapseQueue,
}

impl Simplifier<'_> {
    fn new(mesh: &mut FatMesh) -> Simplifier<'_> {
        let mut qem: Vec<QemVertex> = (0..mesh.vertices.len() as u32)
            .map(|v| QemVertex {
                q: vertex_quadric(mesh, v),
                collapses: SmallVec::new(),
            })
            .collect();
        for vertex in &mut mesh.vertices {
            vertex.checked = false;
        }

        // One candidate per undirected edge
        let mut collapses = Vec::new();
        for i in 0..mesh.vertices.len() {
            if mesh.vertices[i].collapsed {
                continue;
            }
            for &neighbor in &mesh.vertices[i].neighbors {
                let other = &mesh.vertices[neighbor as usize];
                if other.checked || other.collapsed {
                    continue;
                }
                let q = qem[i].q + qem[neighbor as usize].q;
                let (target, cost) =
                    collapse_target(&q, &mesh.vertices[i].position, &other.position);
                collapses.push(EdgeCollapse {
                    v1: i as u32,
                    v2: neighbor,
                    target,
                    cost,
                });
            }
            mesh.vertices[i].checked = true;
        }

        let mut queue = CollapseQueue::with_capacity(collapses.len());
        for (id, collapse) in collapses.iter().enumerate() {
            let id = id as u32;
            qem[collapse.v1 as usize].collapses.push(id);
            qem[collapse.v2 as usize].collapses.push(id);
            queue.push(id, -collapse.cost);
        }

        Simplifier {
            mesh,
            qem,
            collapses,
            queue,
        }
    }

    fn run(&mut self, max_cost: f32) -> CollapseSummary {
        let mut summary = CollapseSummary {
            candidates: self.collapses.len(),
            ..CollapseSummary::default()
        };

        while let Some(id) = self.queue.pop() {
            let collapse = self.collapses[id as usize];
            if collapse.cost > max_cost {
                break;
            }
            if collapse.is_degenerate() {
                continue;
            }

            let (from, to) = (collapse.v1, collapse.v2);
            if self.mesh.vertices[from as usize].collapsed || self.mesh.vertices[to as usize].collapsed {
                continue;
            }
            if vertex_is_border(self.mesh, from) || vertex_is_border(self.mesh, to) {
                summary.rejected_border += 1;
                continue;
            }
            if !keeps_orientation(self.mesh, from, to, &collapse.target)
                || !keeps_orientation(self.mesh, to, from, &collapse.target)
            {
                summary.rejected_inversion += 1;
                continue;
            }

            self.apply(id, &collapse);
            summary.collapsed += 1;
        }

        summary
    }

    /// Merge `collapse.v1` into `collapse.v2` and refresh every candidate touching `v2`.
    fn apply(&mut self, id: u32, collapse: &EdgeCollapse) {
        let (from, to) = (collapse.v1, collapse.v2);
        let mesh = &mut *self.mesh;

        mesh.vertices[from as usize].collapsed = true;
        mesh.vertices[to as usize].position = collapse.target;

        // Triangles
        let from_triangles = std::mem::take(&mut mesh.vertices[from as usize].triangles);
        for &t in &from_triangles {
            let triangle = &mut mesh.triangles[t as usize];
            if triangle.contains(to) {
                triangle.collapsed = true;
                let corners = triangle.v;
                for v in corners.into_iter().filter(|&v| v != from) {
                    mesh.vertices[v as usize].triangles.retain(|other| *other != t);
                }
            } else {
                for v in triangle.v.iter_mut().filter(|v| **v == from) {
                    *v = to;
                }
                let corners = triangle.v;
                let [p0, p1, p2] = corners.map(|v| mesh.vertices[v as usize].position);
                let triangle = &mut mesh.triangles[t as usize];
                if let Some(plane) = Plane::from_triangle(&p0, &p1, &p2) {
                    triangle.plane = plane;
                }
                mesh.vertices[to as usize].triangles.push(t);
            }
        }

        // Vertex neighbours
        mesh.vertices[to as usize].neighbors.retain(|n| *n != from);
        let from_neighbors = std::mem::take(&mut mesh.vertices[from as usize].neighbors);
        for &n in from_neighbors.iter().filter(|&&n| n != to) {
            let neighbor = &mut mesh.vertices[n as usize].neighbors;
            neighbor.retain(|v| *v != from);
            if !neighbor.contains(&to) {
                neighbor.push(to);
            }
            let to_neighbors = &mut mesh.vertices[to as usize].neighbors;
            if !to_neighbors.contains(&n) {
                to_neighbors.push(n);
            }
        }

        // Quadrics and candidate lists
        let from_q = self.qem[from as usize].q;
        self.qem[to as usize].q += from_q;
        self.qem[to as usize].collapses.retain(|c| *c != id);

        let from_collapses = std::mem::take(&mut self.qem[from as usize].collapses);
        for c in from_collapses {
            let record = &mut self.collapses[c as usize];
            if record.v1 == from {
                record.v1 = to;
            } else if record.v2 == from {
                record.v2 = to;
            }
            if record.is_degenerate() {
                continue;
            }

            let other = record.other(to);
            let duplicate = self.qem[to as usize]
                .collapses
                .iter()
                .any(|&existing| self.collapses[existing as usize].other(to) == other);
            if duplicate {
                // Same edge already queued from `to`; retire this copy
                let record = &mut self.collapses[c as usize];
                record.v1 = to;
                record.v2 = to;
                self.qem[other as usize].collapses.retain(|existing| *existing != c);
            } else {
                self.qem[to as usize].collapses.push(c);
            }
        }

        for &c in &self.qem[to as usize].collapses {
            let record = &mut self.collapses[c as usize];
            let q = self.qem[record.v1 as usize].q + self.qem[record.v2 as usize].q;
            let (target, cost) = collapse_target(
                &q,
                &self.mesh.vertices[record.v1 as usize].position,
                &self.mesh.vertices[record.v2 as usize].position,
            );
            record.target = target;
            record.cost = cost;
            self.queue.update(c, -cost);
        }
    }
}

/// Collapse edges of `mesh` in increasing quadric error until the cheapest
/// remaining candidate costs more than `max_cost`.
///
/// Collapsed vertices and triangles are only flagged; run
/// [`flatten`](crate::fat_mesh::flatten) afterwards to compact the mesh.
pub fn collapse_edges(mesh: &mut FatMesh, max_cost: f32) -> CollapseSummary {
    let summary = Simplifier::new(mesh).run(max_cost);
    debug!(
        candidates = summary.candidates,
        collapsed = summary.collapsed,
        rejected_border = summary.rejected_border,
        rejected_inversion = summary.rejected_inversion,
        "edge collapse pass"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat_mesh::{fatten, flatten};
    use crate::mesh::SoundTriangle;
    use approx::assert_relative_eq;

    /// Regular `n x n` grid of quads in the z = 0 plane
    fn grid(n: u32, material: impl Fn(u32, u32) -> u32) -> (Vec<SoundVertex>, Vec<SoundTriangle>) {
        let mut vertices = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                vertices.push(Point3::new(x as f32, y as f32, 0.0));
            }
        }
        let index = |x: u32, y: u32| y * (n + 1) + x;
        let mut triangles = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let m = material(x, y);
                triangles.push(SoundTriangle::new(index(x, y), index(x + 1, y), index(x + 1, y + 1), m));
                triangles.push(SoundTriangle::new(index(x, y), index(x + 1, y + 1), index(x, y + 1), m));
            }
        }
        (vertices, triangles)
    }

    /// Closed octahedron around the origin
    fn octahedron(scale: f32) -> (Vec<SoundVertex>, Vec<SoundTriangle>) {
        let vertices = vec![
            Point3::new(scale, 0.0, 0.0),
            Point3::new(-scale, 0.0, 0.0),
            Point3::new(0.0, scale, 0.0),
            Point3::new(0.0, -scale, 0.0),
            Point3::new(0.0, 0.0, scale),
            Point3::new(0.0, 0.0, -scale),
        ];
        let triangles = vec![
            SoundTriangle::new(0, 2, 4, 0),
            SoundTriangle::new(2, 1, 4, 0),
            SoundTriangle::new(1, 3, 4, 0),
            SoundTriangle::new(3, 0, 4, 0),
            SoundTriangle::new(2, 0, 5, 0),
            SoundTriangle::new(1, 2, 5, 0),
            SoundTriangle::new(3, 1, 5, 0),
            SoundTriangle::new(0, 3, 5, 0),
        ];
        (vertices, triangles)
    }

    #[test]
    fn test_quadric_error_is_squared_plane_distance() {
        let mesh = fatten(
            &[Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
            &[SoundTriangle::new(0, 1, 2, 0)],
        );
        let q = vertex_quadric(&mesh, 0);
        assert_relative_eq!(quadric_error(&q, &Point3::new(3.0, -2.0, 0.5)), 0.25);
        assert_relative_eq!(quadric_error(&q, &Point3::new(3.0, -2.0, 0.0)), 0.0);
    }

    #[test]
    fn test_collapse_target_tie_breaks() {
        let zero = Matrix4::zeros();
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(2.0, 0.0, 0.0);
        assert_eq!(collapse_target(&zero, &a, &b).0, a);

        // Error grows along +x: v1 is cheapest
        let p = nalgebra::Vector4::new(1.0, 0.0, 0.0, 0.0);
        let q = p * p.transpose();
        assert_eq!(collapse_target(&q, &b, &a).0, a);
        assert_eq!(collapse_target(&q, &a, &b).0, a);
    }

    #[test]
    fn test_border_detection() {
        let (vertices, triangles) = grid(2, |_, _| 0);
        let mesh = fatten(&vertices, &triangles);
        // Corner and edge vertices lie on the open border, the center does not
        assert!(vertex_is_border(&mesh, 0));
        assert!(vertex_is_border(&mesh, 1));
        assert!(!vertex_is_border(&mesh, 4));

        let (vertices, triangles) = grid(2, |x, _| x);
        let mesh = fatten(&vertices, &triangles);
        assert!(vertex_is_border(&mesh, 4));
    }

    #[test]
    fn test_flat_grid_interior_collapses() {
        let (vertices, triangles) = grid(4, |_, _| 0);
        let mut mesh = fatten(&vertices, &triangles);
        let before = mesh.live_vertex_count();

        let summary = collapse_edges(&mut mesh, 1e-6);
        assert!(summary.collapsed > 0);
        assert_eq!(mesh.live_vertex_count(), before - summary.collapsed);

        // Border vertices never move
        for (i, v) in mesh.vertices.iter().enumerate() {
            let p = vertices[i];
            let on_border = p.x == 0.0 || p.y == 0.0 || p.x == 4.0 || p.y == 4.0;
            if on_border {
                assert!(!v.collapsed);
                assert_eq!(v.position, p);
            }
        }

        // No surviving triangle flips and no triangle references a collapsed vertex
        for t in mesh.triangles.iter().filter(|t| !t.collapsed) {
            assert!(t.v.iter().all(|&v| !mesh.vertices[v as usize].collapsed));
            let [p0, p1, p2] = t.v.map(|v| mesh.vertices[v as usize].position);
            assert!((p1 - p0).cross(&(p2 - p0)).z >= 0.0);
        }

        let flat = flatten(&mesh);
        assert_eq!(flat.vertices.len(), mesh.live_vertex_count());
        let area: f32 = flat
            .triangles
            .iter()
            .map(|t| {
                let [p0, p1, p2] = t.v.map(|v| flat.vertices[v as usize].position);
                0.5 * (p1 - p0).cross(&(p2 - p0)).norm()
            })
            .sum();
        assert_relative_eq!(area, 16.0, epsilon = 1e-4);
    }

    #[test]
    fn test_zero_tolerance_keeps_curved_surface() {
        let (vertices, triangles) = octahedron(1.0);
        let mut mesh = fatten(&vertices, &triangles);
        let summary = collapse_edges(&mut mesh, 0.0);
        assert_eq!(summary.collapsed, 0);
        assert_eq!(mesh.live_vertex_count(), 6);
        assert_eq!(summary.candidates, 12);
    }

    #[test]
    fn test_large_tolerance_reduces_closed_mesh() {
        let (vertices, triangles) = octahedron(1.0);
        let mut mesh = fatten(&vertices, &triangles);
        let summary = collapse_edges(&mut mesh, f32::MAX);
        assert!(summary.collapsed > 0);
        assert!(mesh.live_vertex_count() < 6);

        for t in mesh.triangles.iter().filter(|t| !t.collapsed) {
            assert!(!t.v.iter().any(|&v| mesh.vertices[v as usize].collapsed));
            assert!(t.v[0] != t.v[1] && t.v[0] != t.v[2] && t.v[1] != t.v[2]);
        }
        for (i, v) in mesh.vertices.iter().enumerate() {
            if v.collapsed {
                assert!(v.triangles.is_empty());
                assert!(v.neighbors.is_empty());
            } else {
                assert!(!v.neighbors.contains(&(i as u32)));
                for &n in &v.neighbors {
                    assert!(!mesh.vertices[n as usize].collapsed);
                }
            }
        }
    }
}
