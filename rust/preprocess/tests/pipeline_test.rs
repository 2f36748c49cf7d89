// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end preprocessing of small scenes through the public API.

use approx::assert_relative_eq;
use soundmesh_preprocess::{
    process_mesh, Aabb, MeshFlags, MeshPreprocessor, MeshRequest, Point3, PreprocessStatistics,
    RawMesh, SoundMaterial, SoundTriangle, SoundVertex, TriangleSoupBuilder,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Every triangle gets its own copy of its corners
fn unwelded(mesh: &RawMesh) -> (Vec<SoundVertex>, Vec<SoundTriangle>) {
    let mut vertices = Vec::with_capacity(mesh.triangles.len() * 3);
    let mut triangles = Vec::with_capacity(mesh.triangles.len());
    for t in &mesh.triangles {
        let base = vertices.len() as u32;
        vertices.extend(t.v.iter().map(|&i| mesh.vertices[i as usize]));
        triangles.push(SoundTriangle::new(base, base + 1, base + 2, t.material));
    }
    (vertices, triangles)
}

/// Two right triangles sharing the edge (0,0,0)-(1,0,0), given as a soup
fn hinge(bent: bool) -> (Vec<SoundVertex>, Vec<SoundTriangle>) {
    let free = if bent {
        Point3::new(0.0, 0.0, 1.0)
    } else {
        Point3::new(0.0, -1.0, 0.0)
    };
    let vertices = vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.0, 0.0, 0.0),
        Point3::new(0.0, 1.0, 0.0),
        Point3::new(0.0, 0.0, 0.0),
        free,
        Point3::new(1.0, 0.0, 0.0),
    ];
    let triangles = vec![SoundTriangle::new(0, 1, 2, 0), SoundTriangle::new(3, 4, 5, 0)];
    (vertices, triangles)
}

fn request(flags: MeshFlags, threads: usize) -> MeshRequest {
    MeshRequest {
        flags,
        num_threads: threads,
        ..MeshRequest::default()
    }
}

#[test]
fn test_coplanar_hinge_has_no_diffraction_edge() {
    init_tracing();
    let (vertices, triangles) = hinge(false);
    let out = process_mesh(&vertices, &triangles, &[], request(MeshFlags::default(), 1)).unwrap();
    assert_eq!(out.mesh.vertex_count(), 4);
    assert!(out.mesh.diffraction_edges().is_empty());
}

#[test]
fn test_bent_hinge_has_one_diffraction_edge() {
    init_tracing();
    let (vertices, triangles) = hinge(true);
    let out = process_mesh(&vertices, &triangles, &[], request(MeshFlags::default(), 1)).unwrap();

    let edges = out.mesh.diffraction_edges();
    assert_eq!(edges.len(), 1);
    assert_relative_eq!(edges[0].length(), 1.0, epsilon = 1e-6);
    assert!(out.mesh.diffraction_graph.neighbors_of(0).is_empty());
}

#[test]
fn test_unwelded_hinge_has_no_shared_edge() {
    let (vertices, triangles) = hinge(true);
    let out = process_mesh(&vertices, &triangles, &[], request(MeshFlags::DIFFRACTION_EDGES, 1)).unwrap();
    assert_eq!(out.mesh.vertex_count(), 6);
    assert!(out.mesh.diffraction_edges().is_empty());
}

#[test]
fn test_triangle_soup_room_is_welded() {
    init_tracing();
    let room = RawMesh::cuboid(&Aabb::new(Point3::new(-2.0, -1.5, 0.0), Point3::new(2.0, 1.5, 2.7)), 1);
    let (vertices, triangles) = unwelded(&room);
    assert_eq!(vertices.len(), 36);

    let materials = vec![SoundMaterial::default(), SoundMaterial::default()];
    let out = process_mesh(&vertices, &triangles, &materials, request(MeshFlags::default(), 2)).unwrap();
    assert_eq!(out.mesh.vertex_count(), 8);
    assert_eq!(out.mesh.triangle_count(), 12);
    assert_eq!(out.mesh.diffraction_edges().len(), 12);
    assert!(out.mesh.triangles.iter().all(|t| t.material == 1));
    assert_eq!(out.mesh.materials.len(), 2);
}

#[test]
fn test_two_boxes_graph_is_deterministic() {
    let mut scene = RawMesh::cuboid(&Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)), 0);
    scene.merge(&RawMesh::cuboid(
        &Aabb::new(Point3::new(2.0, 0.0, 0.0), Point3::new(3.0, 1.5, 2.0)),
        0,
    ));

    let mut reference: Option<Vec<Vec<u32>>> = None;
    for threads in [1, 2, 3, 8] {
        let preprocessor = MeshPreprocessor::new(request(MeshFlags::default(), threads)).unwrap();
        let out = preprocessor
            .process_mesh(&scene.vertices, &scene.triangles, &[], &TriangleSoupBuilder)
            .unwrap();
        let graph = &out.mesh.diffraction_graph;
        assert_eq!(graph.edge_count(), 24);

        let mut offset = 0;
        for edge in &graph.edges {
            assert_eq!(edge.neighbor_offset, offset);
            offset += edge.neighbor_count;
        }
        assert_eq!(offset as usize, graph.neighbor_count());

        let sets: Vec<Vec<u32>> = (0..graph.edge_count())
            .map(|e| {
                let mut n = graph.neighbors_of(e).to_vec();
                n.sort_unstable();
                n
            })
            .collect();
        match &reference {
            Some(expected) => assert_eq!(&sets, expected, "{threads} threads"),
            None => reference = Some(sets),
        }
    }
}

#[test]
fn test_statistics_serialize() {
    let room = RawMesh::cuboid(&Aabb::new(Point3::origin(), Point3::new(3.0, 3.0, 3.0)), 0);
    let out = process_mesh(
        &room.vertices,
        &room.triangles,
        &[],
        request(MeshFlags::default() | MeshFlags::STATISTICS, 2),
    )
    .unwrap();
    let stats = out.statistics.unwrap();
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["edge_count"], 12);
    assert_eq!(json["triangle_count"], 12);
    let back: PreprocessStatistics = serde_json::from_value(json).unwrap();
    assert_eq!(back, stats);
}

#[test]
fn test_request_roundtrips_through_json() {
    let request = MeshRequest {
        flags: MeshFlags::VOXELIZE | MeshFlags::WELD,
        voxel_size: 0.25,
        ..MeshRequest::default()
    };
    let json = serde_json::to_string(&request).unwrap();
    let back: MeshRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(back, request);

    let partial: MeshRequest = serde_json::from_str(
        r#"{ "flags": "DIFFRACTION_EDGES | DIFFRACTION_GRAPH", "edge_offset": 0.5 }"#,
    )
    .unwrap();
    assert_eq!(partial.flags, MeshFlags::DIFFRACTION_EDGES | MeshFlags::DIFFRACTION_GRAPH);
    assert_relative_eq!(partial.edge_offset, 0.5);
    assert_relative_eq!(partial.voxel_size, MeshRequest::default().voxel_size);
}
