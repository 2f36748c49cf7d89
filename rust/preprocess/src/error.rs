// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Result type for preprocessing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while preprocessing a sound mesh
///
/// Any error aborts the whole request; no partial mesh is ever returned.
#[derive(Error, Debug)]
pub enum Error {
    /// Fewer than three usable vertices
    #[error("too few vertices: {count} (at least 3 required)")]
    TooFewVertices { count: usize },

    /// No usable triangle
    #[error("too few triangles: {count} (at least 1 required)")]
    TooFewTriangles { count: usize },

    /// A pipeline stage produced no geometry
    #[error("empty mesh after {0}")]
    EmptyMesh(String),

    #[error("voxelization failed: {0}")]
    VoxelizationFailed(String),

    /// The worker pool could not be created
    #[error("thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The external occlusion structure could not be built
    #[error("occlusion structure: {0}")]
    Occlusion(String),
}

impl Error {
    /// Check the minimum vertex/triangle counts every stage requires.
    pub(crate) fn check_counts(vertices: usize, triangles: usize) -> Result<()> {
        if vertices < 3 {
            return Err(Error::TooFewVertices { count: vertices });
        }
        if triangles < 1 {
            return Err(Error::TooFewTriangles { count: triangles });
        }
        Ok(())
    }
}
