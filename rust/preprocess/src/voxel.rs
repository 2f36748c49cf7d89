// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sparse voxel octree built from a triangle soup
//!
//! Each voxel stores a fill fraction in `[0, 1]` derived from the distance
//! between its center and the closest candidate triangle, together with the
//! material of that triangle. Nodes live in one contiguous arena; the eight
//! children of an internal node occupy consecutive slots.
//!
//! Octant layout (shared with the triangulator):
//! ```text
//!   octant = x << 2 | y << 1 | z      (1 = positive half along that axis)
//! ```

use crate::error::{Error, Result};
use crate::mesh::{Aabb, SoundTriangle, SoundVertex};
use nalgebra::{Point3, Vector3};

/// Arena index of a voxel
pub type VoxelId = u32;

const NO_CHILDREN: VoxelId = VoxelId::MAX;

/// One octree node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voxel {
    /// Occupancy estimate in `[0, 1]`
    pub fill: f32,
    /// Material of the triangle that produced `fill`
    pub material: u32,
    first_child: VoxelId,
}

impl Voxel {
    fn new(fill: f32, material: u32) -> Self {
        Self {
            fill,
            material,
            first_child: NO_CHILDREN,
        }
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        self.first_child != NO_CHILDREN
    }

    /// A voxel that no triangle reaches; never subdivided
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fill == 0.0
    }
}

/// Octree over a cubic region, root at index 0
#[derive(Debug, Clone)]
pub struct VoxelTree {
    /// World-space center of the root cube
    pub center: Point3<f32>,
    /// Edge length of the root cube
    pub size: f32,
    /// Depth of the finest voxels
    pub max_depth: usize,
    nodes: Vec<Voxel>,
}

impl VoxelTree {
    pub const ROOT: VoxelId = 0;

    #[inline]
    pub fn voxel(&self, id: VoxelId) -> &Voxel {
        &self.nodes[id as usize]
    }

    /// Child of `id` in the given octant, `None` for leaves and empty voxels
    #[inline]
    pub fn child(&self, id: VoxelId, octant: usize) -> Option<VoxelId> {
        let voxel = self.voxel(id);
        voxel
            .has_children()
            .then(|| voxel.first_child + octant as VoxelId)
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Bounds of the root cube
    pub fn bounds(&self) -> Aabb {
        let half = Vector3::repeat(0.5 * self.size);
        Aabb::new(self.center - half, self.center + half)
    }

    /// Fill of the voxel at `depth` containing `point`, descending from `start`
    /// whose cube is centered at `center` with edge `size`.
    ///
    /// Returns `(0.0, 0)` when the descent hits a node without children.
    pub fn fill_below(
        &self,
        start: VoxelId,
        center: Point3<f32>,
        size: f32,
        point: &Point3<f32>,
        depth: usize,
    ) -> (f32, u32) {
        let mut id = start;
        let mut center = center;
        let mut size = size;
        for _ in 0..depth {
            let x = point.x > center.x;
            let y = point.y > center.y;
            let z = point.z > center.z;
            let octant = (usize::from(x) << 2) | (usize::from(y) << 1) | usize::from(z);
            let Some(child) = self.child(id, octant) else {
                return (0.0, 0);
            };
            size *= 0.5;
            let quarter = 0.5 * size;
            center = Point3::new(
                if x { center.x + quarter } else { center.x - quarter },
                if y { center.y + quarter } else { center.y - quarter },
                if z { center.z + quarter } else { center.z - quarter },
            );
            id = child;
        }
        let voxel = self.voxel(id);
        (voxel.fill, voxel.material)
    }
}

/// Center of the child cube in `octant` of a cube at `center` with edge `size`
#[inline]
pub(crate) fn child_center(center: &Point3<f32>, size: f32, octant: usize) -> Point3<f32> {
    let quarter = 0.25 * size;
    let offset = |bit: usize| if octant & bit != 0 { quarter } else { -quarter };
    Point3::new(
        center.x + offset(4),
        center.y + offset(2),
        center.z + offset(1),
    )
}

/// Closest point to `p` on triangle `abc`, classifying `p` by Voronoi region
/// in the order A, B, AB, C, AC, BC, face.
pub fn closest_point_on_triangle(
    a: &Point3<f32>,
    b: &Point3<f32>,
    c: &Point3<f32>,
    p: &Point3<f32>,
) -> Point3<f32> {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

#[inline]
fn triangle_distance(vertices: &[SoundVertex], triangle: &SoundTriangle, p: &Point3<f32>) -> f32 {
    let [a, b, c] = triangle.v.map(|i| &vertices[i as usize]);
    nalgebra::distance(&closest_point_on_triangle(a, b, c, p), p)
}

struct Voxelizer<'a> {
    vertices: &'a [SoundVertex],
    triangles: &'a [SoundTriangle],
    /// Candidate triangles per depth; level `d + 1` is rebuilt by every voxel at depth `d`
    candidates: Vec<Vec<u32>>,
    max_depth: usize,
    nodes: Vec<Voxel>,
}

impl Voxelizer<'_> {
    fn build(&mut self, slot: usize, center: Point3<f32>, size: f32, depth: usize) {
        // Distance at which a triangle stops contributing (the voxel diagonal)
        let max_distance = 3.0f32.sqrt() * size;
        let mut fill = 0.0f32;
        let mut material = 0;

        let subdivide = depth < self.max_depth;
        let (current, deeper) = self.candidates.split_at_mut(depth + 1);
        let current = &current[depth];
        let mut children = deeper.first_mut().filter(|_| subdivide);
        if let Some(children) = children.as_deref_mut() {
            children.clear();
        }

        for &t in current {
            let triangle = &self.triangles[t as usize];
            let distance = triangle_distance(self.vertices, triangle, &center);
            if distance < max_distance {
                let contribution = 1.0 - distance / max_distance;
                if contribution > fill {
                    fill = contribution;
                    material = triangle.material;
                }
                if let Some(children) = children.as_deref_mut() {
                    children.push(t);
                }
            }
        }

        self.nodes[slot] = Voxel::new(fill, material);
        if fill == 0.0 || !subdivide {
            return;
        }

        let first = self.nodes.len();
        self.nodes
            .extend(std::iter::repeat(Voxel::new(0.0, 0)).take(8));
        self.nodes[slot].first_child = first as VoxelId;

        let child_size = 0.5 * size;
        for octant in 0..8 {
            self.build(
                first + octant,
                child_center(&center, size, octant),
                child_size,
                depth + 1,
            );
        }
    }
}

/// Voxelize a triangle soup over the cube enclosing `region`.
///
/// Leaves sit at `max_depth`, so the finest voxel edge is
/// `region.max_extent() / 2^max_depth`.
pub fn voxelize(
    vertices: &[SoundVertex],
    triangles: &[SoundTriangle],
    region: &Aabb,
    max_depth: usize,
) -> Result<VoxelTree> {
    Error::check_counts(vertices.len(), triangles.len())?;
    if region.is_empty() {
        return Err(Error::VoxelizationFailed("empty region".into()));
    }

    let center = region.center();
    let size = region.max_extent();
    let reach = 3.0f32.sqrt() * size;

    let mut candidates = vec![Vec::new(); max_depth + 1];
    candidates[0] = triangles
        .iter()
        .enumerate()
        .filter(|(_, t)| triangle_distance(vertices, t, &center) < reach)
        .map(|(i, _)| i as u32)
        .collect();

    let mut voxelizer = Voxelizer {
        vertices,
        triangles,
        candidates,
        max_depth,
        nodes: vec![Voxel::new(0.0, 0)],
    };
    voxelizer.build(VoxelTree::ROOT as usize, center, size, 0);

    Ok(VoxelTree {
        center,
        size,
        max_depth,
        nodes: voxelizer.nodes,
    })
}
