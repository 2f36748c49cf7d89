// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Vertex welding with a spatial hash grid
//!
//! Every vertex is compared against the representatives stored in the grid
//! cells its tolerance ball overlaps. The first representative within the
//! tolerance wins, so the result depends on the input order but is fully
//! deterministic for a given order.

use crate::mesh::{RawMesh, SoundTriangle, SoundVertex};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Result of a weld including the input-to-output vertex remap
#[derive(Debug, Clone, Default)]
pub struct WeldResult {
    pub mesh: RawMesh,
    /// Output vertex index for every input vertex
    pub remap: Vec<u32>,
    /// Number of input vertices merged into an earlier one
    pub welded: usize,
}

/// Unbounded uniform grid of representative vertex indices
struct WeldGrid {
    cell_size: f32,
    tolerance: f32,
    cells: FxHashMap<[i32; 3], SmallVec<[u32; 4]>>,
}

impl WeldGrid {
    fn new(tolerance: f32, capacity: usize) -> Self {
        // A zero tolerance only merges exact duplicates, any cell size works
        let cell_size = if tolerance > 0.0 { 2.0 * tolerance } else { 1.0 };
        let mut cells = FxHashMap::default();
        cells.reserve(capacity);
        Self {
            cell_size,
            tolerance: tolerance.max(0.0),
            cells,
        }
    }

    #[inline]
    fn cell(&self, value: f32) -> i32 {
        (value / self.cell_size).floor() as i32
    }

    /// Inclusive cell ranges overlapped by the tolerance ball around `p`
    fn cell_range(&self, p: &SoundVertex) -> ([i32; 3], [i32; 3]) {
        let t = self.tolerance;
        (
            [self.cell(p.x - t), self.cell(p.y - t), self.cell(p.z - t)],
            [self.cell(p.x + t), self.cell(p.y + t), self.cell(p.z + t)],
        )
    }

    /// First stored representative within the tolerance of `p`
    fn find(&self, p: &SoundVertex, vertices: &[SoundVertex]) -> Option<u32> {
        let (lo, hi) = self.cell_range(p);
        let tolerance_sq = self.tolerance * self.tolerance;
        for x in lo[0]..=hi[0] {
            for y in lo[1]..=hi[1] {
                for z in lo[2]..=hi[2] {
                    let Some(bucket) = self.cells.get(&[x, y, z]) else {
                        continue;
                    };
                    if let Some(&found) = bucket.iter().find(|&&candidate| {
                        (vertices[candidate as usize] - p).norm_squared() <= tolerance_sq
                    }) {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    /// Store `index` in every cell its tolerance ball overlaps
    fn insert(&mut self, index: u32, p: &SoundVertex) {
        let (lo, hi) = self.cell_range(p);
        for x in lo[0]..=hi[0] {
            for y in lo[1]..=hi[1] {
                for z in lo[2]..=hi[2] {
                    self.cells.entry([x, y, z]).or_default().push(index);
                }
            }
        }
    }
}

/// Merge vertices closer than `tolerance` and drop triangles that degenerate.
///
/// Output vertices keep the relative order of their first occurrence.
pub fn weld(vertices: &[SoundVertex], triangles: &[SoundTriangle], tolerance: f32) -> WeldResult {
    let mut grid = WeldGrid::new(tolerance, vertices.len());

    // Representative (input index) of each input vertex
    let mut representative = Vec::with_capacity(vertices.len());
    for (i, p) in vertices.iter().enumerate() {
        let i = i as u32;
        match grid.find(p, vertices) {
            Some(target) => representative.push(target),
            None => {
                grid.insert(i, p);
                representative.push(i);
            }
        }
    }

    let mut output_index = vec![u32::MAX; vertices.len()];
    let mut mesh = RawMesh::with_capacity(vertices.len(), triangles.len());
    for (i, p) in vertices.iter().enumerate() {
        if representative[i] == i as u32 {
            output_index[i] = mesh.vertices.len() as u32;
            mesh.vertices.push(*p);
        }
    }

    let remap: Vec<u32> = representative
        .iter()
        .map(|&r| output_index[r as usize])
        .collect();

    mesh.triangles.extend(
        triangles
            .iter()
            .map(|t| SoundTriangle {
                v: [
                    remap[t.v[0] as usize],
                    remap[t.v[1] as usize],
                    remap[t.v[2] as usize],
                ],
                material: t.material,
            })
            .filter(|t| !t.has_duplicate_indices()),
    );

    WeldResult {
        welded: vertices.len() - mesh.vertices.len(),
        mesh,
        remap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn test_weld_close_pair_drops_degenerate_triangle() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 0.0005),
            Point3::new(1.0, 0.0, 0.0),
        ];
        let triangles = vec![SoundTriangle::new(0, 1, 2, 0)];
        let result = weld(&vertices, &triangles, 0.001);

        assert_eq!(result.mesh.vertex_count(), 2);
        assert_eq!(result.mesh.triangle_count(), 0);
        assert_eq!(result.remap, vec![0, 0, 1]);
        assert_eq!(result.welded, 1);
    }

    #[test]
    fn test_weld_exactly_coincident_vertices() {
        let vertices = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, 0.0005)];
        let result = weld(&vertices, &[], 0.001);
        assert_eq!(result.mesh.vertex_count(), 1);
    }

    #[test]
    fn test_weld_negative_coordinates() {
        let vertices = vec![
            Point3::new(-0.0002, -5.0, -3.0),
            Point3::new(0.0002, -5.0, -3.0),
            Point3::new(-1.0, -1.0, -1.0),
        ];
        let result = weld(&vertices, &[], 0.001);
        assert_eq!(result.mesh.vertex_count(), 2);
        assert_eq!(result.remap, vec![0, 0, 1]);
    }

    #[test]
    fn test_first_match_wins_chain() {
        // 1 is within tolerance of 0, 2 is within tolerance of 1 but not of 0
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0008, 0.0, 0.0),
            Point3::new(0.0016, 0.0, 0.0),
        ];
        let result = weld(&vertices, &[], 0.001);
        assert_eq!(result.remap, vec![0, 0, 1]);
        assert_eq!(result.mesh.vertices[1], vertices[2]);
    }

    #[test]
    fn test_weld_is_idempotent() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 0.0004),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let triangles = vec![SoundTriangle::new(0, 1, 2, 0), SoundTriangle::new(0, 3, 4, 1)];
        let once = weld(&vertices, &triangles, 0.001);
        let twice = weld(&once.mesh.vertices, &once.mesh.triangles, 0.001);

        assert_eq!(once.mesh, twice.mesh);
        assert_eq!(twice.welded, 0);
        assert!(twice.mesh.triangles_valid());
    }

    #[test]
    fn test_zero_tolerance_merges_exact_duplicates_only() {
        let vertices = vec![
            Point3::new(0.5, 0.5, 0.5),
            Point3::new(0.5, 0.5, 0.5),
            Point3::new(0.5, 0.5, 0.50001),
        ];
        let result = weld(&vertices, &[], 0.0);
        assert_eq!(result.mesh.vertex_count(), 2);
    }
}
