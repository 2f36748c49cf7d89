// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Edge-to-edge visibility between diffraction edges
//!
//! The edge range is split into one contiguous block per worker. Each block
//! collects its neighbor indices into its own buffer; the buffers are then
//! concatenated in edge order so the merged graph does not depend on the
//! scheduling.

use crate::diffraction::DiffractionEdge;
use crate::occlusion::OcclusionQuery;
use crate::request::{MeshFlags, MeshRequest};
use crate::EPSILON;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Offset from an edge's planes within which its endpoints count as on the plane
const ORIENTATION_OFFSET: f32 = 0.0001;
/// Offset used when testing a sample point against the other edge's planes
const SAMPLE_OFFSET: f32 = 0.001;
/// A sample ray pointing this far into both planes of its source edge is skipped
const RAY_DIRECTION_THRESHOLD: f32 = 0.001;

/// Diffraction edges and the flat list of their visible neighbors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffractionGraph {
    pub edges: Vec<DiffractionEdge>,
    /// Neighbor edge indices; edge `i` owns
    /// `neighbors[offset_i..offset_i + count_i]`
    pub neighbors: Vec<u32>,
}

impl DiffractionGraph {
    /// Graph with edges but no neighbor lists
    pub fn edges_only(mut edges: Vec<DiffractionEdge>) -> Self {
        for edge in &mut edges {
            edge.neighbor_offset = 0;
            edge.neighbor_count = 0;
        }
        Self {
            edges,
            neighbors: Vec::new(),
        }
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    #[inline]
    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Neighbors of edge `edge`
    pub fn neighbors_of(&self, edge: usize) -> &[u32] {
        self.edges[edge].neighbors(self)
    }
}

/// Ray sampling parameters of the visibility test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisibilitySettings {
    pub edge_resolution: f32,
    pub min_rays_per_edge: usize,
    pub max_rays_per_edge: usize,
    pub edge_offset: f32,
}

impl From<&MeshRequest> for VisibilitySettings {
    fn from(request: &MeshRequest) -> Self {
        Self {
            edge_resolution: request.edge_resolution,
            min_rays_per_edge: request.min_rays_per_edge,
            max_rays_per_edge: request.max_rays_per_edge,
            edge_offset: request.edge_offset,
        }
    }
}

impl VisibilitySettings {
    /// Number of samples along an edge
    #[inline]
    pub fn ray_count(&self, edge: &DiffractionEdge) -> usize {
        let rays = (edge.length() / self.edge_resolution).ceil();
        let rays = if rays.is_finite() { rays as usize } else { self.max_rays_per_edge };
        rays.clamp(self.min_rays_per_edge, self.max_rays_per_edge.max(self.min_rays_per_edge))
    }
}

/// True if both endpoints of `edge` lie strictly in front of both of
/// `other`'s planes, or strictly behind both.
fn outside_shadow_region(edge: &DiffractionEdge, other: &DiffractionEdge) -> bool {
    let d11 = other.plane1.signed_distance(&edge.v1);
    let d12 = other.plane2.signed_distance(&edge.v1);
    let d21 = other.plane1.signed_distance(&edge.v2);
    let d22 = other.plane2.signed_distance(&edge.v2);
    let front = [d11, d12, d21, d22].iter().all(|&d| d > ORIENTATION_OFFSET);
    let behind = [d11, d12, d21, d22].iter().all(|&d| d < -ORIENTATION_OFFSET);
    front || behind
}

/// Cheap geometric rejection: false if either edge lies completely outside
/// the other's shadow region.
pub fn test_edge_orientation(edge1: &DiffractionEdge, edge2: &DiffractionEdge) -> bool {
    !outside_shadow_region(edge1, edge2) && !outside_shadow_region(edge2, edge1)
}

/// Sample points along an edge, pushed off the edge along its normal
fn sample_points(edge: &DiffractionEdge, settings: &VisibilitySettings) -> impl Iterator<Item = nalgebra::Point3<f32>> {
    let rays = settings.ray_count(edge);
    let offset = edge.normal() * settings.edge_offset;
    let extent = edge.extent();
    let start = edge.v1;
    (0..rays).map(move |i| start + extent * ((i + 1) as f32 / (rays + 1) as f32) + offset)
}

/// Ray-traced visibility between two edges.
///
/// Stops at the first unoccluded sample pair.
pub fn edges_visible<Q: OcclusionQuery + ?Sized>(
    edge1: &DiffractionEdge,
    edge2: &DiffractionEdge,
    query: &Q,
    settings: &VisibilitySettings,
) -> bool {
    let offset = settings.edge_offset;
    let targets: Vec<_> = sample_points(edge2, settings).collect();

    for p1 in sample_points(edge1, settings) {
        if !edge2.test_orientation(&p1, SAMPLE_OFFSET) {
            continue;
        }
        for p2 in &targets {
            if !edge1.test_orientation(p2, offset) {
                continue;
            }
            let delta = p2 - p1;
            let distance = delta.norm();
            if distance < EPSILON {
                continue;
            }
            let direction = delta / distance;
            if direction.dot(&edge1.plane1.normal) < -RAY_DIRECTION_THRESHOLD
                && direction.dot(&edge1.plane2.normal) < -RAY_DIRECTION_THRESHOLD
            {
                continue;
            }
            let origin = p1 + direction * offset;
            if !query.segment_occluded(&origin, &direction, distance - 2.0 * offset) {
                return true;
            }
        }
    }
    false
}

/// Neighbor lists of one contiguous block of edges
#[derive(Debug, Default)]
struct Partition {
    neighbors: Vec<u32>,
    /// `(offset, count)` into `neighbors`, one per edge of the block
    ranges: Vec<(u32, u32)>,
}

fn test_range<Q: OcclusionQuery + ?Sized>(
    edges: &[DiffractionEdge],
    start: usize,
    count: usize,
    query: &Q,
    settings: &VisibilitySettings,
) -> Partition {
    let mut partition = Partition {
        neighbors: Vec::new(),
        ranges: Vec::with_capacity(count),
    };
    for e in start..start + count {
        let edge = &edges[e];
        let offset = partition.neighbors.len();
        for (e2, other) in edges.iter().enumerate() {
            if e2 == e || !test_edge_orientation(edge, other) {
                continue;
            }
            if edges_visible(edge, other, query, settings) {
                partition.neighbors.push(e2 as u32);
            }
        }
        let found = partition.neighbors.len() - offset;
        partition.ranges.push((offset as u32, found as u32));
    }
    partition
}

/// Build the diffraction graph for `edges`.
///
/// Without [`MeshFlags::DIFFRACTION_GRAPH`] the graph has no neighbor
/// lists. Otherwise the edges are split into one block per pool thread and
/// the per-block results are merged in edge order.
pub fn build_graph<Q: OcclusionQuery + ?Sized>(
    edges: Vec<DiffractionEdge>,
    query: &Q,
    request: &MeshRequest,
    pool: &ThreadPool,
) -> DiffractionGraph {
    if !request.has(MeshFlags::DIFFRACTION_GRAPH) || edges.is_empty() {
        return DiffractionGraph::edges_only(edges);
    }

    let settings = VisibilitySettings::from(request);
    let threads = pool.current_num_threads().max(1);
    let block = edges.len().div_ceil(threads);

    let partitions: Vec<Partition> = pool.install(|| {
        edges
            .par_chunks(block)
            .enumerate()
            .map(|(i, chunk)| test_range(&edges, i * block, chunk.len(), query, &settings))
            .collect()
    });

    let total: usize = partitions.iter().map(|p| p.neighbors.len()).sum();
    let mut neighbors = Vec::with_capacity(total);
    let mut edges = edges;
    let mut e = 0;
    for partition in &partitions {
        for &(offset, count) in &partition.ranges {
            let edge = &mut edges[e];
            edge.neighbor_offset = neighbors.len() as u32;
            edge.neighbor_count = count;
            let offset = offset as usize;
            neighbors.extend_from_slice(&partition.neighbors[offset..offset + count as usize]);
            e += 1;
        }
    }

    debug!(
        edges = edges.len(),
        neighbors = neighbors.len(),
        blocks = partitions.len(),
        "built diffraction graph"
    );

    DiffractionGraph { edges, neighbors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diffraction::find_edges;
    use crate::fat_mesh::fatten;
    use crate::mesh::{Aabb, RawMesh, SoundTriangle};
    use crate::occlusion::TriangleSoup;
    use nalgebra::Point3;
    use rayon::ThreadPoolBuilder;

    fn pool(threads: usize) -> ThreadPool {
        ThreadPoolBuilder::new().num_threads(threads).build().unwrap()
    }

    fn unit_cube() -> RawMesh {
        RawMesh::cuboid(&Aabb::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0)), 0)
    }

    fn cube_edges(cube: &RawMesh) -> Vec<DiffractionEdge> {
        find_edges(&fatten(&cube.vertices, &cube.triangles), 10.0, 0.5).edges
    }

    fn sorted_neighbors(graph: &DiffractionGraph) -> Vec<Vec<u32>> {
        (0..graph.edge_count())
            .map(|e| {
                let mut n = graph.neighbors_of(e).to_vec();
                n.sort_unstable();
                n
            })
            .collect()
    }

    /// Index of the edge with endpoints `a` and `b` in either order
    fn find(edges: &[DiffractionEdge], a: Point3<f32>, b: Point3<f32>) -> usize {
        edges
            .iter()
            .position(|e| (e.v1 == a && e.v2 == b) || (e.v1 == b && e.v2 == a))
            .unwrap()
    }

    #[test]
    fn test_ray_count() {
        let cube = unit_cube();
        let edges = cube_edges(&cube);
        let mut settings = VisibilitySettings::from(&MeshRequest::default());
        assert_eq!(settings.ray_count(&edges[0]), 2);
        settings.edge_resolution = 0.01;
        assert_eq!(settings.ray_count(&edges[0]), 5);
        settings.edge_resolution = 10.0;
        assert_eq!(settings.ray_count(&edges[0]), 1);
    }

    #[test]
    fn test_cube_edges_see_edges_on_shared_faces() {
        let cube = unit_cube();
        let soup = TriangleSoup::new(&cube.vertices, &cube.triangles);
        let request = MeshRequest::default();
        let graph = build_graph(cube_edges(&cube), &soup, &request, &pool(2));

        assert_eq!(graph.edge_count(), 12);
        for (e, neighbors) in sorted_neighbors(&graph).iter().enumerate() {
            // Three other edges on each of the two faces meeting at the edge
            assert_eq!(neighbors.len(), 6, "edge {e}");
            assert!(!neighbors.contains(&(e as u32)));
            for &n in neighbors {
                assert!(graph.neighbors_of(n as usize).contains(&(e as u32)));
            }
        }

        let bottom_front = find(&graph.edges, Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0));
        let top_back = find(&graph.edges, Point3::new(0.0, 1.0, 1.0), Point3::new(1.0, 1.0, 1.0));
        assert!(!test_edge_orientation(&graph.edges[bottom_front], &graph.edges[top_back]));
    }

    #[test]
    fn test_thread_count_does_not_change_neighbor_sets() {
        let cube = unit_cube();
        let soup = TriangleSoup::new(&cube.vertices, &cube.triangles);
        let request = MeshRequest {
            edge_resolution: 0.2,
            ..MeshRequest::default()
        };
        let single = build_graph(cube_edges(&cube), &soup, &request, &pool(1));
        for threads in [2, 3, 5, 16] {
            let multi = build_graph(cube_edges(&cube), &soup, &request, &pool(threads));
            assert_eq!(sorted_neighbors(&single), sorted_neighbors(&multi), "{threads} threads");
            assert_eq!(single.neighbors, multi.neighbors);
        }
    }

    #[test]
    fn test_neighbor_ranges_are_contiguous() {
        let cube = unit_cube();
        let soup = TriangleSoup::new(&cube.vertices, &cube.triangles);
        let graph = build_graph(cube_edges(&cube), &soup, &MeshRequest::default(), &pool(3));
        let mut expected = 0;
        for edge in &graph.edges {
            assert_eq!(edge.neighbor_offset, expected);
            expected += edge.neighbor_count;
        }
        assert_eq!(expected as usize, graph.neighbor_count());
    }

    #[test]
    fn test_occluder_blocks_visibility() {
        let cube = unit_cube();
        let edges = cube_edges(&cube);
        let settings = VisibilitySettings::from(&MeshRequest::default());
        let front = find(&edges, Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0));
        let back = find(&edges, Point3::new(0.0, 1.0, 0.0), Point3::new(1.0, 1.0, 0.0));

        let open = TriangleSoup::new(&cube.vertices, &cube.triangles);
        assert!(edges_visible(&edges[front], &edges[back], &open, &settings));

        // Wall at y = 0.5 under the bottom face
        let mut scene = cube.clone();
        scene.merge(&RawMesh::new(
            vec![
                Point3::new(-1.0, 0.5, -1.0),
                Point3::new(2.0, 0.5, -1.0),
                Point3::new(2.0, 0.5, 0.5),
                Point3::new(-1.0, 0.5, 0.5),
            ],
            vec![SoundTriangle::new(0, 1, 2, 0), SoundTriangle::new(0, 2, 3, 0)],
        ));
        let walled = TriangleSoup::new(&scene.vertices, &scene.triangles);
        assert!(!edges_visible(&edges[front], &edges[back], &walled, &settings));
    }

    #[test]
    fn test_graph_flag_off_gives_edges_only() {
        let cube = unit_cube();
        let soup = TriangleSoup::new(&cube.vertices, &cube.triangles);
        let request = MeshRequest {
            flags: MeshFlags::DIFFRACTION_EDGES,
            ..MeshRequest::default()
        };
        let graph = build_graph(cube_edges(&cube), &soup, &request, &pool(2));
        assert_eq!(graph.edge_count(), 12);
        assert_eq!(graph.neighbor_count(), 0);
        assert!(graph.edges.iter().all(|e| e.neighbor_count == 0));
    }
}
