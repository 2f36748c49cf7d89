// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # SoundMesh Preprocessor
//!
//! Turns raw triangle soups into meshes ready for geometric acoustics:
//! welded, simplified, optionally remeshed through a voxel grid, and
//! annotated with diffraction edges and their mutual visibility.
//!
//! ## Overview
//!
//! - **Welding**: spatial-hash vertex merging ([`weld`])
//! - **Remeshing**: octree voxelization and marching cubes, tiled into
//!   regions processed in parallel ([`voxelize`], [`triangulate`])
//! - **Simplification**: quadric error edge collapses ([`collapse_edges`])
//! - **Diffraction**: sharp-edge extraction ([`find_edges`]) and a
//!   ray-traced edge visibility graph ([`build_graph`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use soundmesh_preprocess::{MeshPreprocessor, MeshRequest, TriangleSoupBuilder};
//!
//! let preprocessor = MeshPreprocessor::new(MeshRequest::from_env())?;
//! let output = preprocessor.process_mesh(&vertices, &triangles, &materials, &TriangleSoupBuilder)?;
//!
//! for edge in output.mesh.diffraction_edges() {
//!     println!("{} visible edges", edge.neighbor_count);
//! }
//! ```
//!
//! The preprocessor never installs a `tracing` subscriber; stage timings and
//! counts are emitted as `debug` events inside a `process_mesh` span.

pub mod collapse_queue;
pub mod diffraction;
pub mod error;
pub mod fat_mesh;
pub mod marching_cubes;
pub mod mesh;
pub mod occlusion;
pub mod pipeline;
pub mod request;
pub mod sanitize;
pub mod simplify;
pub mod sound_mesh;
pub mod statistics;
pub mod visibility;
pub mod voxel;
pub mod weld;

/// Tolerance for degenerate normals, areas and interpolation slopes
pub(crate) const EPSILON: f32 = f32::EPSILON;

// Re-export nalgebra types for convenience
pub use nalgebra::{Matrix4, Point3, Vector3};

pub use diffraction::{find_edges, DiffractionEdge, EdgeSet};
pub use error::{Error, Result};
pub use fat_mesh::{diet, fatten, flatten, FatMesh, FatTriangle, FatVertex, Plane};
pub use marching_cubes::triangulate;
pub use mesh::{Aabb, RawMesh, SoundMaterial, SoundTriangle, SoundVertex};
pub use occlusion::{OcclusionBuilder, OcclusionQuery, TriangleSoup, TriangleSoupBuilder};
pub use pipeline::{plan_regions, process_mesh, MeshPreprocessor, PreprocessOutput, RegionPlan};
pub use request::{MeshFlags, MeshRequest};
pub use sanitize::sanitize;
pub use simplify::{collapse_edges, CollapseSummary};
pub use sound_mesh::{MeshTriangle, SoundMesh};
pub use statistics::PreprocessStatistics;
pub use visibility::{build_graph, DiffractionGraph, VisibilitySettings};
pub use voxel::{voxelize, VoxelTree};
pub use weld::{weld, WeldResult};
