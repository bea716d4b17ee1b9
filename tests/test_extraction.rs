use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use nalgebra::Vector3;

use isoextract::comm::{channel::LocalCluster, Communicator, SerialComm};
use isoextract::corners::IngestError;
use isoextract::grid::UniformBlockIndex;
use isoextract::{
    build_implicit_surfaces, CellId, Dimension, ExtractOptions, ExtractionError, GridIndex,
    GroupMask, UniformBlock,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn temp_file(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("isoextract-e2e-{}-{}", std::process::id(), name));
    path
}

/// Writes a corner file: `dim` little-endian i32 extents, then the samples
fn write_corner_file(path: &PathBuf, extents: &[i32], values: &[u8]) {
    let mut file = File::create(path).unwrap();
    for e in extents {
        file.write_all(&e.to_le_bytes()).unwrap();
    }
    file.write_all(values).unwrap();
}

fn write_type_file(path: &PathBuf, extents: &[i32], values: &[i32]) {
    let mut file = File::create(path).unwrap();
    for e in extents {
        file.write_all(&e.to_le_bytes()).unwrap();
    }
    for v in values {
        file.write_all(&v.to_le_bytes()).unwrap();
    }
}

fn unit_grid_3d(cells_per_dim: [i32; 3]) -> UniformBlockIndex<i32, f64> {
    UniformBlockIndex::new_serial(
        Dimension::Three,
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(1.0, 1.0, 1.0),
        cells_per_dim,
    )
    .unwrap()
}

/// Lattice values for a 2x3x3 block where the two cells straddling the face
/// x = 1 both resolve to the connected saddle and put a triangle pair on it
fn shared_face_values() -> Vec<u8> {
    // 3 x 4 x 4 lattice points, x fastest
    let mut values = vec![0u8; 48];
    let at = |px: usize, py: usize, pz: usize| pz * 12 + py * 3 + px;
    values[at(1, 1, 1)] = 255;
    values[at(1, 2, 2)] = 255;
    values[at(1, 2, 1)] = 100;
    values[at(1, 1, 2)] = 100;
    values
}

#[test]
fn test_2d_single_interior_corner() {
    init_logging();
    // one hot lattice point shared by all four cells: one segment per cell
    let grid = UniformBlockIndex::<i32, f64>::new_serial(
        Dimension::Two,
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(1.0, 1.0, 1.0),
        [2, 2, 1],
    )
    .unwrap();

    let mut values = vec![0u8; 9];
    values[4] = 200; // lattice point (1, 1)
    let path = temp_file("2d-corner");
    write_corner_file(&path, &[3, 3], &values);

    let options = ExtractOptions::new(2, 2, 1, &path, 127.5);
    let result = build_implicit_surfaces(&grid, &SerialComm, &SerialComm, &options).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(result.num_global, 4);
    assert_eq!(result.pool.lines.len(), 4);
    assert!(result.pool.tris.is_empty());
    for (cell, surfs) in result.cell_surfs.iter().enumerate() {
        assert_eq!(surfs.len(), 1, "cell {}", cell);
    }
    for line in &result.pool.lines {
        assert_eq!(line.p1.z, 0.0);
        assert_eq!(line.p2.z, 0.0);
        assert_eq!(line.label, 1);
        assert!((line.norm.norm() - 1.0).abs() < 1e-12);
    }
}

#[test]
fn test_3d_single_interior_corner() {
    init_logging();
    // the hot point (1,1,1) is a corner of all eight cells: one triangle each
    let grid = unit_grid_3d([2, 2, 2]);
    let mut values = vec![0u8; 27];
    values[13] = 200;
    let path = temp_file("3d-corner");
    write_corner_file(&path, &[3, 3, 3], &values);

    let options = ExtractOptions::new(2, 2, 2, &path, 127.5);
    let result = build_implicit_surfaces(&grid, &SerialComm, &SerialComm, &options).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(result.num_global, 8);
    for (cell, surfs) in result.cell_surfs.iter().enumerate() {
        assert_eq!(surfs.len(), 1, "cell {}", cell);
    }
    let t = 127.5 / 200.0;
    for tri in &result.pool.tris {
        // each vertex sits on a cell edge incident to the hot point, at the
        // interpolated parameter distance from it
        for p in [&tri.p1, &tri.p2, &tri.p3] {
            let d = (p - Vector3::new(1.0, 1.0, 1.0)).abs();
            let on_axis_count = (0..3).filter(|&k| d[k] == 0.0).count();
            assert_eq!(on_axis_count, 2);
            assert!((d.max() - t).abs() < 1e-12);
        }
        assert!((tri.norm.norm() - 1.0).abs() < 1e-12);
    }
}

#[test]
fn test_uniform_field_produces_nothing_end_to_end() {
    init_logging();
    // a uniform field has no crossings anywhere; the whole pipeline runs and
    // emits nothing
    let grid = unit_grid_3d([2, 2, 2]);
    let path = temp_file("uniform");
    write_corner_file(&path, &[3, 3, 3], &vec![0u8; 27]);

    let options = ExtractOptions::new(2, 2, 2, &path, 127.5);
    let result = build_implicit_surfaces(&grid, &SerialComm, &SerialComm, &options).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(result.num_global, 0);
    assert!(result.pool.tris.is_empty());
    assert!(result.pool.lines.is_empty());
    assert!(result.cell_surfs.iter().all(|surfs| surfs.is_empty()));
}

#[test]
fn test_case13_saddle_end_to_end() {
    init_logging();
    // the centre cell of a 3x3x3 block sees a perturbed alternating pattern
    // and resolves to a case-13 sub-configuration with six triangles, two of
    // them on the face towards its connected-saddle x-neighbour; both sides
    // claim that face, so cleanup clears the pair from each
    let grid = unit_grid_3d([3, 3, 3]);
    let mut values = vec![0u8; 64];
    let at = |px: usize, py: usize, pz: usize| pz * 16 + py * 4 + px;
    values[at(1, 1, 1)] = 255;
    values[at(2, 1, 1)] = 10;
    values[at(1, 2, 1)] = 10;
    values[at(2, 2, 1)] = 230;
    values[at(1, 1, 2)] = 10;
    values[at(2, 1, 2)] = 230;
    values[at(1, 2, 2)] = 240;
    values[at(2, 2, 2)] = 10;
    let path = temp_file("case13");
    write_corner_file(&path, &[4, 4, 4], &values);

    let options = ExtractOptions::new(3, 3, 3, &path, 127.5);
    let result = build_implicit_surfaces(&grid, &SerialComm, &SerialComm, &options).unwrap();
    std::fs::remove_file(&path).ok();

    // 36 triangles before cleanup, four die on the contested face
    assert_eq!(result.num_global, 32);
    let centre = grid.local_cell(CellId(14)).unwrap();
    assert_eq!(result.cell_surfs[centre].len(), 4);
    let x_neighbour = grid.local_cell(CellId(13)).unwrap();
    assert_eq!(result.cell_surfs[x_neighbour].len(), 2);
    for tri in &result.pool.tris {
        let on_contested_plane = tri.p1.x == 1.0 && tri.p2.x == 1.0 && tri.p3.x == 1.0;
        assert!(!on_contested_plane, "contested face pair survived cleanup");
    }
}

#[test]
fn test_round_trip_is_deterministic() {
    let grid = unit_grid_3d([2, 3, 3]);
    let values = shared_face_values();
    let path = temp_file("roundtrip");
    write_corner_file(&path, &[3, 4, 4], &values);

    let options = ExtractOptions::new(2, 3, 3, &path, 127.5);
    let first = build_implicit_surfaces(&grid, &SerialComm, &SerialComm, &options).unwrap();
    let second = build_implicit_surfaces(&grid, &SerialComm, &SerialComm, &options).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(first.pool.tris.len(), second.pool.tris.len());
    for (a, b) in first.pool.tris.iter().zip(second.pool.tris.iter()) {
        assert_eq!(a.cell, b.cell);
        assert_eq!(a.p1, b.p1);
        assert_eq!(a.p2, b.p2);
        assert_eq!(a.p3, b.p3);
    }
    assert_eq!(first.cell_surfs, second.cell_surfs);
}

#[test]
fn test_shared_face_pairs_are_deleted() {
    init_logging();
    // both cells around the face x = 1 resolve the connected saddle and put
    // two coplanar triangles on it, normals pointing into their own cell:
    // cleanup removes all four
    let grid = unit_grid_3d([2, 3, 3]);
    let values = shared_face_values();
    let path = temp_file("cleanup");
    write_corner_file(&path, &[3, 4, 4], &values);

    let options = ExtractOptions::new(2, 3, 3, &path, 127.5);
    let result = build_implicit_surfaces(&grid, &SerialComm, &SerialComm, &options).unwrap();
    std::fs::remove_file(&path).ok();

    // 12 single-corner cells and the two saddle cells at 4 each, minus the
    // four face triangles
    assert_eq!(result.num_global, 16);
    for tri in &result.pool.tris {
        let on_shared_plane =
            tri.p1.x == 1.0 && tri.p2.x == 1.0 && tri.p3.x == 1.0;
        assert!(!on_shared_plane, "face triangle survived cleanup");
    }

    // the saddle cells keep their two interior corner caps
    let saddle_a = grid.local_cell(CellId(9)).unwrap();
    let saddle_b = grid.local_cell(CellId(10)).unwrap();
    assert_eq!(result.cell_surfs[saddle_a].len(), 2);
    assert_eq!(result.cell_surfs[saddle_b].len(), 2);
}

#[test]
fn test_shared_face_pairs_across_two_ranks() {
    init_logging();
    // the same field with the block split at the shared face: each rank
    // deletes its own pair during the cross-rank pass
    let values = shared_face_values();
    let path = temp_file("cleanup-2rank");
    write_corner_file(&path, &[3, 4, 4], &values);

    // x-low column of cells on rank 0, x-high column on rank 1
    let mut owners = Vec::new();
    for _ in 0..9 {
        owners.push(0);
        owners.push(1);
    }

    let endpoints = LocalCluster::connect(2);
    let mut locals = Vec::new();
    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for comm in endpoints {
            let path = path.clone();
            let owners = owners.clone();
            handles.push(scope.spawn(move || {
                let block = UniformBlock::new(
                    Vector3::new(0.0, 0.0, 0.0),
                    Vector3::new(1.0, 1.0, 1.0),
                    [2i32, 3, 3],
                )
                .unwrap();
                let grid = UniformBlockIndex::partitioned(
                    Dimension::Three,
                    block,
                    owners,
                    comm.rank(),
                )
                .unwrap();
                let options = ExtractOptions::new(2, 3, 3, &path, 127.5);
                let result = build_implicit_surfaces(&grid, &comm, &comm, &options).unwrap();

                for tri in &result.pool.tris {
                    assert!(
                        !(tri.p1.x == 1.0 && tri.p2.x == 1.0 && tri.p3.x == 1.0),
                        "face triangle survived cross-rank cleanup"
                    );
                }
                (result.num_global, result.pool.tris.len())
            }));
        }
        for handle in handles {
            locals.push(handle.join().unwrap());
        }
    });
    std::fs::remove_file(&path).ok();

    // both ranks report the same global count as the serial run; each lost
    // its two face triangles
    for (global, _) in &locals {
        assert_eq!(*global, 16);
    }
    let total: usize = locals.iter().map(|(_, local)| local).sum();
    assert_eq!(total, 16);
    assert_eq!(locals[0].1, 8);
    assert_eq!(locals[1].1, 8);
}

#[test]
fn test_boundary_violation_aborts() {
    let grid = unit_grid_3d([2, 2, 2]);
    let mut values = vec![0u8; 27];
    values[12] = 5; // lattice point (0, 1, 1) on the x = 0 boundary
    let path = temp_file("boundary");
    write_corner_file(&path, &[3, 3, 3], &values);

    let options = ExtractOptions::new(2, 2, 2, &path, 127.5);
    let result = build_implicit_surfaces(&grid, &SerialComm, &SerialComm, &options);
    std::fs::remove_file(&path).ok();

    assert!(matches!(
        result,
        Err(ExtractionError::Ingest(IngestError::BoundaryNotZero { .. }))
    ));
}

#[test]
fn test_argument_validation() {
    let grid = unit_grid_3d([2, 2, 2]);
    let path = temp_file("unused");

    let options = ExtractOptions::new(2, 2, 2, &path, 100.0);
    assert!(matches!(
        build_implicit_surfaces(&grid, &SerialComm, &SerialComm, &options),
        Err(ExtractionError::BadArguments(_))
    ));

    let options = ExtractOptions::new(2, 2, 2, &path, 300.0);
    assert!(matches!(
        build_implicit_surfaces(&grid, &SerialComm, &SerialComm, &options),
        Err(ExtractionError::BadArguments(_))
    ));

    // requested extents disagree with the grid block
    let options = ExtractOptions::new(3, 2, 2, &path, 127.5);
    assert!(matches!(
        build_implicit_surfaces(&grid, &SerialComm, &SerialComm, &options),
        Err(ExtractionError::BadArguments(_))
    ));

    let mut options = ExtractOptions::new(2, 2, 2, &path, 127.5);
    options.preconditions.particles_exist = true;
    assert!(matches!(
        build_implicit_surfaces(&grid, &SerialComm, &SerialComm, &options),
        Err(ExtractionError::BadPrerequisite(_))
    ));
}

#[test]
fn test_type_labels_group_mask_and_retention() {
    let grid = unit_grid_3d([2, 2, 2]);
    let mut values = vec![0u8; 27];
    values[13] = 200;
    let corner_path = temp_file("typed-corners");
    write_corner_file(&corner_path, &[3, 3, 3], &values);

    let type_path = temp_file("typed-types");
    let labels: Vec<i32> = (0..8).map(|i| 10 + i).collect();
    write_type_file(&type_path, &[2, 2, 2], &labels);

    let group = GroupMask::from_bits_retain(1 << 3);
    let mut options = ExtractOptions::new(2, 2, 2, &corner_path, 127.5);
    options.type_file = Some(type_path.clone());
    options.group = Some(group);
    options.retain_corners = true;

    let result = build_implicit_surfaces(&grid, &SerialComm, &SerialComm, &options).unwrap();
    std::fs::remove_file(&corner_path).ok();
    std::fs::remove_file(&type_path).ok();

    for (cell, surfs) in result.cell_surfs.iter().enumerate() {
        for &handle in surfs {
            let tri = &result.pool.tris[handle];
            assert_eq!(tri.label, 10 + cell as i32);
            assert!(tri.mask.contains(group));
            assert!(tri.mask.contains(GroupMask::ALL));
        }
    }

    let corners = result.corners.expect("corner field retained");
    assert_eq!(corners.num_cells(), 8);
    assert_eq!(corners.corners(0)[7], 200);
}

#[test]
fn test_threshold_monotonicity() {
    // raising the threshold shrinks the enclosed region: every cell that
    // still carries primitives was cut or fully inside at the lower threshold
    let grid = unit_grid_3d([3, 3, 3]);
    let mut values = vec![0u8; 64];
    let at = |px: usize, py: usize, pz: usize| pz * 16 + py * 4 + px;
    values[at(1, 1, 1)] = 220;
    values[at(2, 1, 1)] = 180;
    values[at(1, 2, 1)] = 140;
    values[at(2, 2, 2)] = 90;
    values[at(1, 1, 2)] = 60;
    let path = temp_file("monotone");
    write_corner_file(&path, &[4, 4, 4], &values);

    let run = |threshold: f64| {
        let mut options = ExtractOptions::new(3, 3, 3, &path, threshold);
        options.retain_corners = true;
        build_implicit_surfaces(&grid, &SerialComm, &SerialComm, &options).unwrap()
    };
    let low = run(50.5);
    let high = run(200.5);
    std::fs::remove_file(&path).ok();

    assert!(high.num_global <= low.num_global);
    let low_corners = low.corners.unwrap();
    for (cell, surfs) in high.cell_surfs.iter().enumerate() {
        if surfs.is_empty() {
            continue;
        }
        let cut_low = !low.cell_surfs[cell].is_empty();
        let inside_low = low_corners.corners(cell).iter().all(|&v| v as f64 > 50.5);
        assert!(cut_low || inside_low, "cell {} appeared from nowhere", cell);
    }
}
