// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Preprocessing request: stage flags and numeric parameters.
//!
//! A request can be built in code, deserialized, or loaded from
//! `SOUNDMESH_*` environment variables on top of the defaults.

use bitflags::bitflags;
use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

bitflags! {
    /// Which preprocessing stages run
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MeshFlags: u32 {
        /// Find the mesh's diffraction edges.
        const DIFFRACTION_EDGES = 1 << 0;
        /// Compute edge-to-edge visibility between diffraction edges.
        const DIFFRACTION_GRAPH = 1 << 1;
        /// Voxelize and remesh the input before the other stages.
        const VOXELIZE = 1 << 2;
        /// Weld vertices closer than the weld tolerance.
        const WELD = 1 << 3;
        /// Collapse edges whose quadric error is below the simplify tolerance.
        const SIMPLIFY = 1 << 4;
        /// Collect timing and count statistics.
        const STATISTICS = 1 << 30;
    }
}

impl Default for MeshFlags {
    fn default() -> Self {
        MeshFlags::DIFFRACTION_EDGES
            | MeshFlags::DIFFRACTION_GRAPH
            | MeshFlags::WELD
            | MeshFlags::SIMPLIFY
    }
}

/// Parameters for a mesh preprocessing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshRequest {
    /// Stages to run
    pub flags: MeshFlags,
    /// Homogeneous transform applied to every input vertex
    #[serde(skip)]
    pub transform: Option<Matrix4<f32>>,
    /// Voxel edge length used when remeshing. Larger voxels are faster but
    /// lose more detail; a remeshed surface is inflated by about half a voxel.
    pub voxel_size: f32,
    /// Vertices closer than this are merged
    pub weld_tolerance: f32,
    /// Maximum quadric error of an accepted edge collapse
    pub simplify_tolerance: f32,
    /// Minimum wedge angle in degrees between two triangles for their
    /// shared edge to diffract
    pub min_diffraction_edge_angle: f32,
    /// Shorter edges never diffract
    pub min_diffraction_edge_length: f32,
    /// Spacing between visibility samples along an edge
    pub edge_resolution: f32,
    pub min_rays_per_edge: usize,
    pub max_rays_per_edge: usize,
    /// Distance that visibility samples are pushed off an edge
    pub edge_offset: f32,
    /// Maximum size of a triangle's diffuse subdivision patch
    pub diffuse_resolution: f32,
    /// Worker threads used for remeshing and edge visibility
    pub num_threads: usize,
}

impl Default for MeshRequest {
    fn default() -> Self {
        Self {
            flags: MeshFlags::default(),
            transform: None,
            voxel_size: 0.1,
            weld_tolerance: 0.001,
            simplify_tolerance: 0.01,
            min_diffraction_edge_angle: 10.0,
            min_diffraction_edge_length: 0.5,
            edge_resolution: 0.5,
            min_rays_per_edge: 1,
            max_rays_per_edge: 5,
            edge_offset: 0.01,
            diffuse_resolution: 0.5,
            num_threads: num_cpus::get(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl MeshRequest {
    /// Load a request from environment variables, falling back to the defaults.
    ///
    /// `SOUNDMESH_FLAGS` takes the raw flag bits; unknown bits are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            flags: MeshFlags::from_bits_truncate(env_or(
                "SOUNDMESH_FLAGS",
                defaults.flags.bits(),
            )),
            transform: None,
            voxel_size: env_or("SOUNDMESH_VOXEL_SIZE", defaults.voxel_size),
            weld_tolerance: env_or("SOUNDMESH_WELD_TOLERANCE", defaults.weld_tolerance),
            simplify_tolerance: env_or("SOUNDMESH_SIMPLIFY_TOLERANCE", defaults.simplify_tolerance),
            min_diffraction_edge_angle: env_or(
                "SOUNDMESH_MIN_DIFFRACTION_EDGE_ANGLE",
                defaults.min_diffraction_edge_angle,
            ),
            min_diffraction_edge_length: env_or(
                "SOUNDMESH_MIN_DIFFRACTION_EDGE_LENGTH",
                defaults.min_diffraction_edge_length,
            ),
            edge_resolution: env_or("SOUNDMESH_EDGE_RESOLUTION", defaults.edge_resolution),
            min_rays_per_edge: env_or("SOUNDMESH_MIN_RAYS_PER_EDGE", defaults.min_rays_per_edge),
            max_rays_per_edge: env_or("SOUNDMESH_MAX_RAYS_PER_EDGE", defaults.max_rays_per_edge),
            edge_offset: env_or("SOUNDMESH_EDGE_OFFSET", defaults.edge_offset),
            diffuse_resolution: env_or("SOUNDMESH_DIFFUSE_RESOLUTION", defaults.diffuse_resolution),
            num_threads: env_or("SOUNDMESH_THREADS", defaults.num_threads),
        }
    }

    /// Copy of the request with every parameter clamped to its legal range.
    ///
    /// NaN parameters fall back to the lower bound of their range.
    pub fn sanitized(&self) -> Self {
        let max_threads = 2 * num_cpus::get().max(1);
        let min_rays = self.min_rays_per_edge.max(1);
        Self {
            flags: self.flags,
            transform: self.transform,
            voxel_size: non_negative(self.voxel_size),
            weld_tolerance: non_negative(self.weld_tolerance),
            simplify_tolerance: non_negative(self.simplify_tolerance),
            min_diffraction_edge_angle: clamp(self.min_diffraction_edge_angle, 0.01, 90.0),
            min_diffraction_edge_length: clamp(self.min_diffraction_edge_length, 0.01, 10.0),
            edge_resolution: clamp(self.edge_resolution, 0.01, 10.0),
            min_rays_per_edge: min_rays,
            max_rays_per_edge: self.max_rays_per_edge.max(min_rays),
            edge_offset: clamp(self.edge_offset, 0.01, 10.0),
            diffuse_resolution: clamp(self.diffuse_resolution, 0.01, 10.0),
            num_threads: self.num_threads.clamp(1, max_threads),
        }
    }

    #[inline]
    pub fn has(&self, flag: MeshFlags) -> bool {
        self.flags.contains(flag)
    }
}

#[inline]
fn non_negative(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.max(0.0)
    }
}

#[inline]
fn clamp(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_flags() {
        let request = MeshRequest::default();
        assert!(request.has(MeshFlags::WELD));
        assert!(request.has(MeshFlags::SIMPLIFY));
        assert!(request.has(MeshFlags::DIFFRACTION_GRAPH));
        assert!(!request.has(MeshFlags::VOXELIZE));
        assert!(!request.has(MeshFlags::STATISTICS));
        assert_eq!(MeshFlags::STATISTICS.bits(), 1 << 30);
    }

    #[test]
    fn test_sanitized_clamps_ranges() {
        let request = MeshRequest {
            voxel_size: -1.0,
            weld_tolerance: f32::NAN,
            min_diffraction_edge_angle: 500.0,
            edge_offset: 0.0,
            min_rays_per_edge: 0,
            max_rays_per_edge: 0,
            num_threads: 0,
            ..MeshRequest::default()
        }
        .sanitized();

        assert_eq!(request.voxel_size, 0.0);
        assert_eq!(request.weld_tolerance, 0.0);
        assert_eq!(request.min_diffraction_edge_angle, 90.0);
        assert_eq!(request.edge_offset, 0.01);
        assert_eq!(request.min_rays_per_edge, 1);
        assert_eq!(request.max_rays_per_edge, 1);
        assert_eq!(request.num_threads, 1);
    }

    #[test]
    fn test_deserialize_partial_request() {
        let request: MeshRequest =
            serde_json::from_str(r#"{ "voxel_size": 0.25, "num_threads": 3 }"#).unwrap();
        assert_eq!(request.voxel_size, 0.25);
        assert_eq!(request.num_threads, 3);
        assert_eq!(request.weld_tolerance, MeshRequest::default().weld_tolerance);
        assert_eq!(request.flags, MeshFlags::default());
    }
}
