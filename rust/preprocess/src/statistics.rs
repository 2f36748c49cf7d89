// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timings and counts of one preprocessing request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessStatistics {
    /// Whole request
    pub preprocess_time: Duration,
    /// Voxelization and triangulation of all regions
    pub remesh_time: Duration,
    pub weld_time: Duration,
    pub simplify_time: Duration,
    /// Building the occlusion structure
    pub bvh_time: Duration,
    /// Finding diffraction edges
    pub edge_time: Duration,
    /// Edge-to-edge visibility
    pub edge_visibility_time: Duration,

    pub input_vertex_count: usize,
    pub input_triangle_count: usize,
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub edge_count: usize,
    /// Total length of all neighbor lists
    pub edge_neighbor_count: usize,
    /// Remeshing regions, 0 without voxelization
    pub region_count: usize,
}

impl PreprocessStatistics {
    /// Average number of visible neighbors per diffraction edge
    pub fn mean_edge_neighbors(&self) -> f32 {
        if self.edge_count == 0 {
            0.0
        } else {
            self.edge_neighbor_count as f32 / self.edge_count as f32
        }
    }
}
