//! Driver internals for the implicit surface build
//!
//! Orchestrates ingestion, per-cell extraction, normal computation, face
//! cleanup and the final hand-off, with one barrier between phases and a
//! wall-clock partition reported on rank 0.

use std::time::Instant;

use log::info;

use crate::cleanup::cleanup_faces;
use crate::comm::{Communicator, IrregularExchange};
use crate::corners::{build_cell_hash, read_corners, read_types};
use crate::grid::{Dimension, GridIndex};
use crate::marching_cubes::marching_cubes;
use crate::marching_squares::marching_squares;
use crate::surface::SurfacePool;
use crate::{ExtractOptions, ExtractionError, ImplicitSurfaces, Index, Real};

pub(crate) fn build_implicit_surfaces_impl<
    I: Index,
    R: Real,
    G: GridIndex<I, R>,
    C: Communicator,
    X: IrregularExchange,
>(
    grid: &G,
    comm: &C,
    exchange: &X,
    options: &ExtractOptions<R>,
) -> Result<ImplicitSurfaces<R>, ExtractionError> {
    check_prerequisites(grid, options)?;
    check_arguments(grid, options)?;

    let dimension = grid.dimension();
    let rank0 = comm.rank() == 0;

    if rank0 {
        info!("Reading implicit surface corner file {:?}", options.corner_file);
    }

    comm.barrier();
    let t0 = Instant::now();

    // ingest corner samples (and type values) into the owned cells
    let cell_hash = build_cell_hash(grid);
    let mut field = read_corners(&options.corner_file, grid, comm, &cell_hash)?;
    if let Some(type_file) = &options.type_file {
        read_types(type_file, grid, comm, &cell_hash, &mut field)?;
    }
    drop(cell_hash);

    comm.barrier();
    let t_read = t0.elapsed();

    // per-cell extraction binds every primitive to its source cell
    let mut pool = SurfacePool::new_implicit();
    let mut cell_surfs = vec![Vec::new(); grid.num_cells()];
    match dimension {
        Dimension::Two => {
            marching_squares(grid, &field, options.threshold, &mut pool, &mut cell_surfs)
        }
        Dimension::Three => {
            marching_cubes(grid, &field, options.threshold, &mut pool, &mut cell_surfs)?
        }
    }

    comm.barrier();
    let t_extract = t0.elapsed();

    // normals are needed before cleanup; cleanup decisions are normal-driven
    match dimension {
        Dimension::Two => pool.compute_line_normals(),
        Dimension::Three => pool.compute_tri_normals(),
    }
    report_extent(comm, &pool, rank0);

    comm.barrier();
    let t_normals = t0.elapsed();

    if dimension.is_three() {
        cleanup_faces(grid, comm, exchange, &mut pool, &mut cell_surfs)?;
    }

    comm.barrier();
    let t_cleanup = t0.elapsed();

    // apply the optional group bits and retain the corner field for the
    // ablation collaborator when requested
    if let Some(mask) = options.group {
        pool.apply_group_mask(mask);
    }
    let corners = options.retain_corners.then_some(field);

    let num_global = comm.all_reduce_sum(pool.num_local() as u64);

    comm.barrier();
    let t_total = t0.elapsed();

    if rank0 {
        info!("Built {} implicit surface primitives", num_global);
        let pct = |d: std::time::Duration, prev: std::time::Duration| {
            100.0 * (d - prev).as_secs_f64() / t_total.as_secs_f64().max(f64::MIN_POSITIVE)
        };
        info!("  CPU time = {:.6} secs", t_total.as_secs_f64());
        info!(
            "  read/extract/normals/cleanup/store percent = {:.3} {:.3} {:.3} {:.3} {:.3}",
            pct(t_read, std::time::Duration::ZERO),
            pct(t_extract, t_read),
            pct(t_normals, t_extract),
            pct(t_cleanup, t_normals),
            pct(t_total, t_cleanup),
        );
    }

    Ok(ImplicitSurfaces {
        pool,
        cell_surfs,
        corners,
        num_global,
    })
}

fn check_prerequisites<I: Index, R: Real, G: GridIndex<I, R>>(
    grid: &G,
    options: &ExtractOptions<R>,
) -> Result<(), ExtractionError> {
    let pre = &options.preconditions;
    if !pre.surfaces_implicit {
        return Err(ExtractionError::BadPrerequisite(
            "global surfaces must be declared implicit",
        ));
    }
    if pre.surfaces_exist {
        return Err(ExtractionError::BadPrerequisite(
            "surfaces already exist",
        ));
    }
    if pre.particles_exist {
        return Err(ExtractionError::BadPrerequisite(
            "cannot build implicit surfaces when particles exist",
        ));
    }
    if grid.axisymmetric() {
        return Err(ExtractionError::BadPrerequisite(
            "cannot build implicit surfaces for axisymmetric domains",
        ));
    }
    Ok(())
}

fn check_arguments<I: Index, R: Real, G: GridIndex<I, R>>(
    grid: &G,
    options: &ExtractOptions<R>,
) -> Result<(), ExtractionError> {
    let threshold = options.threshold;
    if threshold <= R::zero() || threshold >= R::from_float(255.0) {
        return Err(ExtractionError::BadArguments(format!(
            "threshold {:?} out of range (0, 255)",
            threshold
        )));
    }
    // an integer threshold could coincide with a corner sample and produce a
    // degenerate crossing; reject it outright
    if threshold.floor() == threshold {
        return Err(ExtractionError::BadArguments(format!(
            "integer threshold {:?} is not allowed",
            threshold
        )));
    }

    let dims = grid.block().dims();
    if dims != [options.nx, options.ny, options.nz] {
        return Err(ExtractionError::BadArguments(format!(
            "grid block {:?} does not match requested extents {:?}",
            dims,
            [options.nx, options.ny, options.nz]
        )));
    }
    if grid.dimension() == Dimension::Two && options.nz != 1 {
        return Err(ExtractionError::BadArguments(
            "a 2D extraction requires nz = 1".to_string(),
        ));
    }
    Ok(())
}

/// All-reduced extent of the emitted geometry, logged on rank 0
fn report_extent<R: Real, C: Communicator>(comm: &C, pool: &SurfacePool<R>, rank0: bool) {
    let extent = pool.local_extent();
    let mut lo = [f64::MAX; 3];
    let mut hi = [f64::MIN; 3];
    if let Some(extent) = &extent {
        for d in 0..3 {
            lo[d] = extent.min()[d].to_f64().unwrap_or(f64::MAX);
            hi[d] = extent.max()[d].to_f64().unwrap_or(f64::MIN);
        }
    }
    comm.all_reduce_min(&mut lo);
    comm.all_reduce_max(&mut hi);
    if rank0 && lo[0] <= hi[0] {
        info!(
            "  surface extent {:?} to {:?}",
            lo, hi
        );
    }
}
