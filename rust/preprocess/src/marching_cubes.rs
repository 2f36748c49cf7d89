// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Marching cubes over a sparse voxel octree
//!
//! Every leaf forms a cell with its seven neighbours on the positive side:
//!
//! ```text
//!        7 -------- 6
//!       /|         /|        corner 0 = the leaf itself
//!      4 -------- 5 |        +x: 0 -> 1, +y: 0 -> 3, +z: 0 -> 4
//!      | 3 -------|-2
//!      |/         |/
//!      0 -------- 1
//! ```
//!
//! Neighbour fills are resolved through a stack of the ancestors visited on
//! the way down: the nearest ancestor containing the neighbour is descended
//! again to the leaf depth.

mod tables;

pub use tables::{EDGE_CORNERS, EDGE_TABLE, TRI_TABLE};

use crate::mesh::{Aabb, RawMesh, SoundTriangle, SoundVertex};
use crate::voxel::{child_center, VoxelId, VoxelTree};
use crate::EPSILON;
use nalgebra::{Point3, Vector3};

/// Offset of each cell corner in voxel units
const CORNER_OFFSETS: [[f32; 3]; 8] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [1.0, 1.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [1.0, 0.0, 1.0],
    [1.0, 1.0, 1.0],
    [0.0, 1.0, 1.0],
];

/// An ancestor of the voxel being triangulated
struct Parent {
    id: VoxelId,
    center: Point3<f32>,
    size: f32,
    bounds: Aabb,
}

/// Cell corners with their fills and materials
#[derive(Debug, Clone, Copy)]
struct Octet {
    position: [Point3<f32>; 8],
    fill: [f32; 8],
    material: [u32; 8],
}

struct Triangulator<'a> {
    tree: &'a VoxelTree,
    max_depth: usize,
    region: &'a Aabb,
    threshold: f32,
    parents: Vec<Parent>,
    output: RawMesh,
}

impl Triangulator<'_> {
    fn visit(&mut self, id: VoxelId, center: Point3<f32>, size: f32, depth: usize) {
        if depth >= self.max_depth {
            self.triangulate_leaf(center, size);
            return;
        }

        let half = Vector3::repeat(0.5 * size);
        self.parents.push(Parent {
            id,
            center,
            size,
            bounds: Aabb::new(center - half, center + half),
        });

        for octant in 0..8 {
            let Some(child) = self.tree.child(id, octant) else {
                continue;
            };
            let child_center = child_center(&center, size, octant);
            if !self.region.contains(&child_center) {
                continue;
            }
            self.visit(child, child_center, 0.5 * size, depth + 1);
        }

        self.parents.pop();
    }

    /// Fill of the leaf-depth voxel centered at `point`; zero outside the tree
    fn neighbor_fill(&self, point: &Point3<f32>) -> (f32, u32) {
        let count = self.parents.len();
        self.parents
            .iter()
            .enumerate()
            .rev()
            .find(|(_, parent)| parent.bounds.contains(point))
            .map(|(i, parent)| {
                self.tree
                    .fill_below(parent.id, parent.center, parent.size, point, count - i)
            })
            .unwrap_or((0.0, 0))
    }

    fn triangulate_leaf(&mut self, center: Point3<f32>, size: f32) {
        let mut octet = Octet {
            position: [center; 8],
            fill: [0.0; 8],
            material: [0; 8],
        };
        for (i, offset) in CORNER_OFFSETS.iter().enumerate() {
            let p = center + Vector3::from(*offset) * size;
            let (fill, material) = self.neighbor_fill(&p);
            octet.position[i] = p;
            octet.fill[i] = fill;
            octet.material[i] = material;
        }
        triangulate_octet(&octet, self.threshold, &mut self.output);
    }
}

fn triangulate_octet(octet: &Octet, threshold: f32, output: &mut RawMesh) {
    let cube = octet
        .fill
        .iter()
        .enumerate()
        .filter(|&(_, &fill)| fill < threshold)
        .fold(0usize, |cube, (i, _)| cube | (1 << i));

    let edges = EDGE_TABLE[cube];
    if edges == 0 {
        return;
    }

    let mut edge_vertex = [0u32; 12];
    let mut edge_material = [0u32; 12];
    for (e, &[a, b]) in EDGE_CORNERS.iter().enumerate() {
        if edges & (1 << e) == 0 {
            continue;
        }
        let (position, material) = interpolate(
            &octet.position[a],
            &octet.position[b],
            octet.fill[a],
            octet.fill[b],
            threshold,
            octet.material[a],
            octet.material[b],
        );
        edge_vertex[e] = output.vertices.len() as u32;
        edge_material[e] = material;
        output.vertices.push(position);
    }

    for tri in TRI_TABLE[cube].chunks_exact(3).take_while(|tri| tri[0] != -1) {
        let [e0, e1, e2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        output.triangles.push(SoundTriangle::new(
            edge_vertex[e0],
            edge_vertex[e1],
            edge_vertex[e2],
            best_material(edge_material[e0], edge_material[e1], edge_material[e2]),
        ));
    }
}

/// Point on segment `p1 p2` where the fill crosses `threshold`
///
/// The material comes from the endpoint nearer the crossing.
pub fn interpolate(
    p1: &SoundVertex,
    p2: &SoundVertex,
    value1: f32,
    value2: f32,
    threshold: f32,
    material1: u32,
    material2: u32,
) -> (SoundVertex, u32) {
    if (threshold - value1).abs() < EPSILON {
        return (*p1, material1);
    }
    if (threshold - value2).abs() < EPSILON {
        return (*p2, material2);
    }
    if (value2 - value1).abs() < EPSILON {
        return (*p1, material1);
    }

    let mu = (threshold - value1) / (value2 - value1);
    let material = if mu > 0.5 { material2 } else { material1 };
    (p1 + (p2 - p1) * mu, material)
}

/// Majority material of a triangle's vertices, falling back to the last one
#[inline]
fn best_material(m0: u32, m1: u32, m2: u32) -> u32 {
    if m0 == m1 || m0 == m2 {
        m0
    } else if m1 == m2 {
        m1
    } else {
        m2
    }
}

/// Extract the `threshold` isosurface of `tree` at leaf depth `depth`.
///
/// Only cells whose voxel center lies inside `region` are triangulated.
/// Vertices are not shared between cells; weld the result afterwards.
pub fn triangulate(tree: &VoxelTree, depth: usize, region: &Aabb, threshold: f32) -> RawMesh {
    let mut triangulator = Triangulator {
        tree,
        max_depth: depth,
        region,
        threshold,
        parents: Vec::with_capacity(depth),
        output: RawMesh::default(),
    };
    triangulator.visit(VoxelTree::ROOT, tree.center, tree.size, 0);
    triangulator.output
}
