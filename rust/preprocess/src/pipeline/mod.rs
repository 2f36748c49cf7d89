// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mesh preprocessing pipeline
//!
//! ```text
//! sanitize ─┬─ voxelize regions (parallel) ─ weld seams ─ simplify ×2 ─┬─ flatten
//!           └─ weld ─ simplify ────────────────────────────────────────┘
//!   ─ occlusion structure ─ diffraction edges ─ edge visibility (parallel)
//! ```
//!
//! Every stage is a pure function of its input. A failing stage aborts the
//! request and nothing is returned.

mod regions;


pub use regions::{
    plan_regions, remesh_region, RegionPlan, RemeshRegion, GRID_MARGIN, MAX_REGION_DEPTH,
    REGION_OVERLAP, SURFACE_THRESHOLD,
};

use crate::diffraction::{find_edges, EdgeSet};
use crate::error::{Error, Result};
use crate::fat_mesh::{diet, fatten, flatten, FatMesh};
use crate::mesh::{RawMesh, SoundMaterial, SoundTriangle, SoundVertex};
use crate::occlusion::{OcclusionBuilder, TriangleSoup, TriangleSoupBuilder};
use crate::request::{MeshFlags, MeshRequest};
use crate::sanitize::sanitize;
use crate::simplify::collapse_edges;
use crate::sound_mesh::SoundMesh;
use crate::statistics::PreprocessStatistics;
use crate::visibility::build_graph;
use crate::weld::weld;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, info_span};

/// Result of a successful preprocessing request
#[derive(Debug)]
pub struct PreprocessOutput<Q> {
    pub mesh: SoundMesh,
    /// Occlusion structure built over the final mesh
    pub occlusion: Q,
    /// Present when the request sets [`MeshFlags::STATISTICS`]
    pub statistics: Option<PreprocessStatistics>,
}

/// Runs preprocessing requests on a dedicated worker pool
#[derive(Debug)]
pub struct MeshPreprocessor {
    request: MeshRequest,
    pool: ThreadPool,
}

impl MeshPreprocessor {
    /// Create a preprocessor for `request`.
    ///
    /// The request is sanitized first; the pool gets `num_threads` workers.
    pub fn new(request: MeshRequest) -> Result<Self> {
        let request = request.sanitized();
        let pool = ThreadPoolBuilder::new()
            .num_threads(request.num_threads)
            .thread_name(|i| format!("soundmesh-preprocess-{i}"))
            .build()?;
        Ok(Self { request, pool })
    }

    /// The sanitized request
    pub fn request(&self) -> &MeshRequest {
        &self.request
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Preprocess a raw mesh into a [`SoundMesh`].
    ///
    /// `builder` turns the final mesh into the occlusion structure used for
    /// edge visibility; it is returned with the mesh.
    pub fn process_mesh<B: OcclusionBuilder>(
        &self,
        vertices: &[SoundVertex],
        triangles: &[SoundTriangle],
        materials: &[SoundMaterial],
        builder: &B,
    ) -> Result<PreprocessOutput<B::Query>> {
        let span = info_span!(
            "process_mesh",
            vertices = vertices.len(),
            triangles = triangles.len()
        );
        let _enter = span.enter();

        let start = Instant::now();
        let request = &self.request;
        let mut stats = PreprocessStatistics {
            input_vertex_count: vertices.len(),
            input_triangle_count: triangles.len(),
            ..Default::default()
        };

        let input = sanitize(vertices, triangles, materials, request.transform.as_ref())?;

        let flat = if request.has(MeshFlags::VOXELIZE) && request.voxel_size > 0.0 {
            self.remesh(&input.mesh, &mut stats)?
        } else {
            self.clean(&input.mesh, &mut stats)?
        };
        Error::check_counts(flat.vertices.len(), flat.triangles.len())?;

        let raw = diet(&flat);
        let mut mesh = SoundMesh::from_raw(&raw, input.materials, request.diffuse_resolution);

        let timer = Instant::now();
        let occlusion = builder.build(&raw.vertices, &raw.triangles)?;
        stats.bvh_time = timer.elapsed();

        if request.has(MeshFlags::DIFFRACTION_EDGES) {
            let timer = Instant::now();
            let EdgeSet {
                edges,
                triangle_edges,
            } = find_edges(
                &flat,
                request.min_diffraction_edge_angle,
                request.min_diffraction_edge_length,
            );
            stats.edge_time = timer.elapsed();
            debug!(edges = edges.len(), "found diffraction edges");

            let timer = Instant::now();
            let graph = build_graph(edges, &occlusion, request, &self.pool);
            stats.edge_visibility_time = timer.elapsed();
            mesh.set_diffraction(graph, &triangle_edges);
        }

        stats.vertex_count = mesh.vertex_count();
        stats.triangle_count = mesh.triangle_count();
        stats.edge_count = mesh.diffraction_graph.edge_count();
        stats.edge_neighbor_count = mesh.diffraction_graph.neighbor_count();
        stats.preprocess_time = start.elapsed();

        info!(
            vertices = stats.vertex_count,
            triangles = stats.triangle_count,
            edges = stats.edge_count,
            neighbors = stats.edge_neighbor_count,
            elapsed_ms = stats.preprocess_time.as_secs_f64() * 1000.0,
            "preprocessed mesh"
        );

        Ok(PreprocessOutput {
            mesh,
            occlusion,
            statistics: request.has(MeshFlags::STATISTICS).then_some(stats),
        })
    }

    /// Voxel path: remesh every region in parallel, weld the seams and
    /// simplify twice.
    fn remesh(&self, mesh: &RawMesh, stats: &mut PreprocessStatistics) -> Result<FatMesh> {
        let request = &self.request;
        let timer = Instant::now();
        let plan = plan_regions(&mesh.bounds(), request.voxel_size);
        stats.region_count = plan.regions.len();

        let output: Mutex<Vec<(usize, RawMesh)>> = Mutex::new(Vec::with_capacity(plan.regions.len()));
        self.pool.install(|| {
            plan.regions.par_iter().enumerate().for_each(|(i, region)| {
                let remeshed = remesh_region(&mesh.vertices, &mesh.triangles, region, plan.depth, request);
                if !remeshed.is_empty() {
                    output
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((i, remeshed));
                }
            });
        });

        // Region order, not completion order
        let mut pieces = output.into_inner().unwrap_or_else(PoisonError::into_inner);
        pieces.sort_unstable_by_key(|(i, _)| *i);
        let mut combined = RawMesh::default();
        for (_, piece) in &pieces {
            combined.merge(piece);
        }
        stats.remesh_time = timer.elapsed();
        debug!(
            regions = plan.regions.len(),
            depth = plan.depth,
            vertices = combined.vertex_count(),
            triangles = combined.triangle_count(),
            "remeshed regions"
        );
        if combined.is_empty() {
            return Err(Error::EmptyMesh("remeshing".into()));
        }

        let timer = Instant::now();
        let welded = weld(&combined.vertices, &combined.triangles, request.weld_tolerance);
        Error::check_counts(welded.mesh.vertex_count(), welded.mesh.triangle_count())?;
        let mut fat = fatten(&welded.mesh.vertices, &welded.mesh.triangles);
        stats.weld_time = timer.elapsed();

        let timer = Instant::now();
        if request.has(MeshFlags::SIMPLIFY) {
            collapse_edges(&mut fat, request.simplify_tolerance);
            collapse_edges(&mut fat, request.simplify_tolerance);
        }
        let flat = flatten(&fat);
        stats.simplify_time = timer.elapsed();
        Ok(flat)
    }

    /// Direct path: optional weld, then at most one simplification pass.
    fn clean(&self, mesh: &RawMesh, stats: &mut PreprocessStatistics) -> Result<FatMesh> {
        let request = &self.request;
        let timer = Instant::now();
        let mut fat = if request.has(MeshFlags::WELD) {
            let welded = weld(&mesh.vertices, &mesh.triangles, request.weld_tolerance);
            debug!(welded = welded.welded, "welded vertices");
            Error::check_counts(welded.mesh.vertex_count(), welded.mesh.triangle_count())?;
            let fat = fatten(&welded.mesh.vertices, &welded.mesh.triangles);
            stats.weld_time = timer.elapsed();
            fat
        } else {
            fatten(&mesh.vertices, &mesh.triangles)
        };

        let timer = Instant::now();
        if request.has(MeshFlags::SIMPLIFY) {
            collapse_edges(&mut fat, request.simplify_tolerance);
        }
        let flat = flatten(&fat);
        stats.simplify_time = timer.elapsed();
        Ok(flat)
    }
}

/// Preprocess with a one-off worker pool and the brute-force occlusion query
pub fn process_mesh(
    vertices: &[SoundVertex],
    triangles: &[SoundTriangle],
    materials: &[SoundMaterial],
    request: MeshRequest,
) -> Result<PreprocessOutput<TriangleSoup>> {
    MeshPreprocessor::new(request)?.process_mesh(vertices, triangles, materials, &TriangleSoupBuilder)
}
