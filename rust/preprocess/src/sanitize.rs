// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Input validation and cleanup ahead of every other stage

use crate::error::{Error, Result};
use crate::mesh::{RawMesh, SoundMaterial, SoundTriangle, SoundVertex};
use nalgebra::Matrix4;
use std::sync::Arc;
use tracing::debug;

/// Cleaned input mesh and its material list
#[derive(Debug, Clone)]
pub struct SanitizedInput {
    pub mesh: RawMesh,
    /// Never empty
    pub materials: Arc<[SoundMaterial]>,
    /// Triangles dropped for out-of-range or repeated indices
    pub dropped_triangles: usize,
    /// Vertex components reset to zero
    pub zeroed_components: usize,
}

/// Zero out NaN, infinite and subnormal components
#[inline]
fn clean_component(value: f32, zeroed: &mut usize) -> f32 {
    if value.is_normal() || value == 0.0 {
        value
    } else {
        *zeroed += 1;
        0.0
    }
}

/// Validate and clean a raw input mesh.
///
/// Vertex components that are not finite or are subnormal become 0 before
/// `transform` is applied. Triangles with an out-of-range or repeated index
/// are dropped. Material indices past the end of `materials` become 0, and
/// an empty material list is replaced by a single default material.
pub fn sanitize(
    vertices: &[SoundVertex],
    triangles: &[SoundTriangle],
    materials: &[SoundMaterial],
    transform: Option<&Matrix4<f32>>,
) -> Result<SanitizedInput> {
    Error::check_counts(vertices.len(), triangles.len())?;

    let mut zeroed_components = 0;
    let clean: Vec<SoundVertex> = vertices
        .iter()
        .map(|v| {
            let p = v.map(|c| clean_component(c, &mut zeroed_components));
            match transform {
                Some(m) => m.transform_point(&p),
                None => p,
            }
        })
        .collect();

    let material_count = materials.len() as u32;
    let kept: Vec<SoundTriangle> = triangles
        .iter()
        .filter(|t| t.in_range(clean.len()) && !t.has_duplicate_indices())
        .map(|t| SoundTriangle {
            v: t.v,
            material: if t.material < material_count { t.material } else { 0 },
        })
        .collect();
    let dropped_triangles = triangles.len() - kept.len();

    Error::check_counts(clean.len(), kept.len())?;

    let materials: Arc<[SoundMaterial]> = if materials.is_empty() {
        Arc::from(vec![SoundMaterial::default()])
    } else {
        Arc::from(materials)
    };

    if dropped_triangles > 0 || zeroed_components > 0 {
        debug!(dropped_triangles, zeroed_components, "sanitized input mesh");
    }

    Ok(SanitizedInput {
        mesh: RawMesh::new(clean, kept),
        materials,
        dropped_triangles,
        zeroed_components,
    })
}
