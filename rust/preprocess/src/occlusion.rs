// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Occlusion queries against the preprocessed scene
//!
//! The visibility pass only needs to know whether a segment hits anything.
//! Callers normally plug in their own acceleration structure through
//! [`OcclusionBuilder`]; [`TriangleSoup`] is a brute-force fallback.

use crate::error::Result;
use crate::mesh::{Aabb, SoundTriangle, SoundVertex};
use nalgebra::{Point3, Vector3};

/// Segment occlusion test. Must be callable from several threads at once.
pub trait OcclusionQuery: Sync {
    /// True if the segment from `origin` along the unit vector `direction`
    /// hits geometry strictly after `origin` and no later than `max_distance`.
    fn segment_occluded(&self, origin: &Point3<f32>, direction: &Vector3<f32>, max_distance: f32) -> bool;
}

impl<Q: OcclusionQuery + ?Sized> OcclusionQuery for &Q {
    #[inline]
    fn segment_occluded(&self, origin: &Point3<f32>, direction: &Vector3<f32>, max_distance: f32) -> bool {
        (**self).segment_occluded(origin, direction, max_distance)
    }
}

/// Builds an [`OcclusionQuery`] over the final mesh
pub trait OcclusionBuilder {
    type Query: OcclusionQuery;

    fn build(&self, vertices: &[SoundVertex], triangles: &[SoundTriangle]) -> Result<Self::Query>;
}

/// Möller–Trumbore ray/triangle intersection.
///
/// Returns the ray parameter of the hit, `None` if the ray is parallel to the
/// triangle or misses it. Hits behind `origin` are reported as negative
/// parameters.
pub fn ray_triangle_distance(
    origin: &Point3<f32>,
    dir: &Vector3<f32>,
    v0: &Point3<f32>,
    v1: &Point3<f32>,
    v2: &Point3<f32>,
) -> Option<f32> {
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;

    let h = dir.cross(&edge2);
    let a = edge1.dot(&h);
    if a.abs() < 1e-12 {
        return None;
    }

    let f = 1.0 / a;
    let s = origin - v0;
    let u = f * s.dot(&h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(&edge1);
    let v = f * dir.dot(&q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    Some(f * edge2.dot(&q))
}

/// Unaccelerated triangle list, every query tests every triangle
#[derive(Debug, Clone, Default)]
pub struct TriangleSoup {
    triangles: Vec<[Point3<f32>; 3]>,
    bounds: Aabb,
}

impl TriangleSoup {
    pub fn new(vertices: &[SoundVertex], triangles: &[SoundTriangle]) -> Self {
        let triangles: Vec<[Point3<f32>; 3]> = triangles
            .iter()
            .filter(|t| t.in_range(vertices.len()))
            .map(|t| t.v.map(|i| vertices[i as usize]))
            .collect();
        let bounds = Aabb::from_points(triangles.iter().flatten());
        Self { triangles, bounds }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }
}

impl OcclusionQuery for TriangleSoup {
    fn segment_occluded(&self, origin: &Point3<f32>, direction: &Vector3<f32>, max_distance: f32) -> bool {
        if max_distance <= 0.0 {
            return false;
        }
        self.triangles.iter().any(|[v0, v1, v2]| {
            ray_triangle_distance(origin, direction, v0, v1, v2)
                .is_some_and(|t| t > 1e-6 && t <= max_distance)
        })
    }
}

/// Builder for [`TriangleSoup`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TriangleSoupBuilder;

impl OcclusionBuilder for TriangleSoupBuilder {
    type Query = TriangleSoup;

    fn build(&self, vertices: &[SoundVertex], triangles: &[SoundTriangle]) -> Result<TriangleSoup> {
        Ok(TriangleSoup::new(vertices, triangles))
    }
}
