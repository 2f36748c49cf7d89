// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tiling of the voxel grid into independently remeshed regions

use crate::fat_mesh::{diet, fatten, flatten};
use crate::marching_cubes::triangulate;
use crate::mesh::{Aabb, RawMesh, SoundTriangle, SoundVertex};
use crate::request::{MeshFlags, MeshRequest};
use crate::simplify::collapse_edges;
use crate::voxel::voxelize;
use crate::weld::weld;
use nalgebra::Vector3;
use tracing::warn;

/// Deepest octree built for a single region
pub const MAX_REGION_DEPTH: usize = 7;
/// Voxels shared by neighbouring regions
pub const REGION_OVERLAP: usize = 1;
/// Empty voxels kept on each side of the mesh so the isosurface, which
/// sits up to half a voxel diagonal outside the input, is fully enclosed
pub const GRID_MARGIN: usize = 2;
/// Isosurface level extracted from the fill values
pub const SURFACE_THRESHOLD: f32 = 0.5;

/// One cubic remeshing region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemeshRegion {
    /// Cube that is voxelized
    pub bounds: Aabb,
    /// Part of `bounds` whose cells this region triangulates: the cube less
    /// its last voxel layer, which the next region owns
    pub triangulation: Aabb,
}

/// Regions covering a mesh and the octree depth used for each
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPlan {
    pub regions: Vec<RemeshRegion>,
    pub depth: usize,
    /// Regions per axis
    pub counts: [usize; 3],
}

/// Split the voxel grid around `bounds` into overlapping cubic regions.
///
/// The grid has cells of `voxel_size` and [`GRID_MARGIN`] spare voxels on
/// every side of the mesh. Regions are at most `2^MAX_REGION_DEPTH` voxels
/// across and advance by their size less [`REGION_OVERLAP`] voxels, so the
/// tiles jointly cover the whole grid.
pub fn plan_regions(bounds: &Aabb, voxel_size: f32) -> RegionPlan {
    let margin = (2 * GRID_MARGIN) as f32;
    let size = bounds.size();
    let fitted = [0, 1, 2].map(|axis| size[axis].max(0.0) / voxel_size + margin);

    // Depth at which the whole grid would fit in one octree
    let full_depth = fitted
        .iter()
        .map(|f| f.log2().floor().max(0.0) as usize + 1)
        .max()
        .unwrap_or(1);
    let depth = MAX_REGION_DEPTH.min(full_depth);
    let grid = 1usize << depth;
    let stride = grid - REGION_OVERLAP;

    let counts = [0, 1, 2].map(|axis| {
        let needed = (fitted[axis] - REGION_OVERLAP as f32) / stride as f32;
        (needed.ceil() as usize).max(1)
    });

    let region_size = grid as f32 * voxel_size;
    let stride_size = stride as f32 * voxel_size;
    let covered = Vector3::from_fn(|axis, _| ((counts[axis] - 1) * stride + grid) as f32 * voxel_size);
    let origin = bounds.center() - covered * 0.5;

    let mut regions = Vec::with_capacity(counts.iter().product());
    for x in 0..counts[0] {
        for y in 0..counts[1] {
            for z in 0..counts[2] {
                let min = origin + Vector3::new(x as f32, y as f32, z as f32) * stride_size;
                let max = min + Vector3::repeat(region_size);
                regions.push(RemeshRegion {
                    bounds: Aabb::new(min, max),
                    triangulation: Aabb::new(min, max - Vector3::repeat(voxel_size)),
                });
            }
        }
    }

    RegionPlan {
        regions,
        depth,
        counts,
    }
}

/// Voxelize, triangulate, weld and simplify one region.
///
/// Returns an empty mesh when the region holds no surface.
pub fn remesh_region(
    vertices: &[SoundVertex],
    triangles: &[SoundTriangle],
    region: &RemeshRegion,
    depth: usize,
    request: &MeshRequest,
) -> RawMesh {
    let tree = match voxelize(vertices, triangles, &region.bounds, depth) {
        Ok(tree) => tree,
        Err(e) => {
            warn!(error = %e, "skipping region");
            return RawMesh::default();
        }
    };

    let surface = triangulate(&tree, depth, &region.triangulation, SURFACE_THRESHOLD);
    drop(tree);
    if surface.is_empty() {
        return RawMesh::default();
    }

    let surface = if request.has(MeshFlags::WELD) {
        weld(&surface.vertices, &surface.triangles, request.weld_tolerance).mesh
    } else {
        surface
    };

    let mut fat = fatten(&surface.vertices, &surface.triangles);
    if request.has(MeshFlags::SIMPLIFY) {
        collapse_edges(&mut fat, request.simplify_tolerance);
    }
    diet(&flatten(&fat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;
    use rustc_hash::FxHashMap;

    #[test]
    fn test_small_mesh_uses_one_region() {
        let bounds = Aabb::new(Point3::origin(), Point3::new(1.0, 0.5, 0.25));
        let plan = plan_regions(&bounds, 0.1);
        // 14 voxels across including the margin
        assert_eq!(plan.depth, 4);
        assert_eq!(plan.counts, [1, 1, 1]);

        let region = plan.regions[0];
        assert_relative_eq!(region.bounds.size().x, 1.6, epsilon = 1e-5);
        assert_relative_eq!(region.bounds.center(), bounds.center(), epsilon = 1e-5);
        assert!(region.bounds.contains(&bounds.min));
        assert!(region.bounds.contains(&bounds.max));
        assert_relative_eq!(region.triangulation.max.x, region.bounds.max.x - 0.1, epsilon = 1e-5);
    }

    #[test]
    fn test_large_mesh_is_tiled() {
        let bounds = Aabb::new(Point3::origin(), Point3::new(30.0, 1.0, 1.0));
        let plan = plan_regions(&bounds, 0.1);
        assert_eq!(plan.depth, MAX_REGION_DEPTH);
        // 304 voxels, 127 per additional region
        assert_eq!(plan.counts, [3, 1, 1]);
        assert_eq!(plan.regions.len(), 3);

        let first = plan.regions[0].bounds;
        let second = plan.regions[1].bounds;
        assert_relative_eq!(second.min.x - first.min.x, 12.7, epsilon = 1e-3);
        assert_relative_eq!(first.max.x - second.min.x, 0.1, epsilon = 1e-3);

        let last = plan.regions[2].triangulation;
        assert!(first.min.x < bounds.min.x - 0.1);
        assert!(last.max.x > bounds.max.x + 0.1);
    }

    #[test]
    fn test_flat_mesh_still_gets_depth() {
        let bounds = Aabb::new(Point3::origin(), Point3::new(0.0, 0.0, 0.0));
        let plan = plan_regions(&bounds, 0.1);
        assert_eq!(plan.depth, 3);
        assert_eq!(plan.regions.len(), 1);
    }

    #[test]
    fn test_remesh_region_produces_closed_surface() {
        let cube = RawMesh::cuboid(&Aabb::new(Point3::new(0.23, 0.23, 0.23), Point3::new(0.77, 0.77, 0.77)), 0);
        let plan = plan_regions(&cube.bounds(), 0.1);
        assert_eq!(plan.regions.len(), 1);
        let request = MeshRequest {
            flags: MeshFlags::WELD,
            weld_tolerance: 1e-4,
            ..MeshRequest::default()
        };
        let mesh = remesh_region(&cube.vertices, &cube.triangles, &plan.regions[0], plan.depth, &request);
        assert!(!mesh.is_empty());
        assert!(mesh.triangles_valid());

        let mut edge_uses: FxHashMap<(u32, u32), usize> = FxHashMap::default();
        for t in &mesh.triangles {
            for (a, b) in [(t.v[0], t.v[1]), (t.v[1], t.v[2]), (t.v[2], t.v[0])] {
                *edge_uses.entry((a.min(b), a.max(b))).or_default() += 1;
            }
        }
        assert!(edge_uses.values().all(|&n| n == 2));

        // The isosurface sits outside the original faces
        let remeshed = mesh.bounds();
        assert!(remeshed.min.x < 0.23 && remeshed.max.x > 0.77);
        assert!(remeshed.min.x > 0.0 && remeshed.max.x < 1.0);
    }
}
