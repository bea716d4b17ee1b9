//! 2D implicit surface extraction via marching squares
//!
//! Each cell is processed independently: the four corner samples form a
//! 4-bit case index selecting 0, 1 or 2 line segments. Corner samples are
//! stored x fastest, so bits 2 and 3 are swapped to obtain the conventional
//! counter-clockwise case numbering. The two saddle cases are disambiguated
//! by the sample average at the cell centre. Segment endpoints are ordered so
//! that the normal points into the flow region.

use log::debug;
use nalgebra::Vector3;

use crate::corners::CornerField;
use crate::grid::GridIndex;
use crate::interpolation::edge_crossing;
use crate::surface::SurfacePool;
use crate::{Index, Real};

/// Extracts line segments for all owned cells and binds them to their cells
pub fn marching_squares<I: Index, R: Real, G: GridIndex<I, R>>(
    grid: &G,
    field: &CornerField,
    threshold: R,
    pool: &mut SurfacePool<R>,
    cell_surfs: &mut [Vec<usize>],
) {
    let mut pt = [Vector3::<R>::zeros(); 4];

    for cell in 0..grid.num_cells() {
        let bounds = grid.cell_bounds(cell);
        let lo = bounds.min();
        let hi = bounds.max();

        // Corner samples are ordered lower-left, lower-right, upper-left,
        // upper-right (the yx bit encoding)
        let corners = field.corners(cell);
        let (v00, v01, v10, v11) = (corners[0], corners[1], corners[2], corners[3]);

        let above = |v: u8| R::from_u8_sample(v) > threshold;
        let bit0 = above(v00) as usize;
        let bit1 = above(v01) as usize;
        let bit2 = above(v11) as usize;
        let bit3 = above(v10) as usize;

        let which = (bit3 << 3) + (bit2 << 2) + (bit1 << 1) + bit0;

        let nsurf = match which {
            0 | 15 => 0,

            1 => {
                pt[0].x = lo.x;
                pt[0].y = edge_crossing(v00, v10, lo.y, hi.y, threshold);
                pt[1].x = edge_crossing(v00, v01, lo.x, hi.x, threshold);
                pt[1].y = lo.y;
                1
            }

            2 => {
                pt[0].x = edge_crossing(v00, v01, lo.x, hi.x, threshold);
                pt[0].y = lo.y;
                pt[1].x = hi.x;
                pt[1].y = edge_crossing(v01, v11, lo.y, hi.y, threshold);
                1
            }

            3 => {
                pt[0].x = lo.x;
                pt[0].y = edge_crossing(v00, v10, lo.y, hi.y, threshold);
                pt[1].x = hi.x;
                pt[1].y = edge_crossing(v01, v11, lo.y, hi.y, threshold);
                1
            }

            4 => {
                pt[0].x = hi.x;
                pt[0].y = edge_crossing(v01, v11, lo.y, hi.y, threshold);
                pt[1].x = edge_crossing(v10, v11, lo.x, hi.x, threshold);
                pt[1].y = hi.y;
                1
            }

            5 => {
                let ave = R::from_float(0.25)
                    * (R::from_u8_sample(v00)
                        + R::from_u8_sample(v01)
                        + R::from_u8_sample(v10)
                        + R::from_u8_sample(v11));
                if ave > threshold {
                    // The central region connects: the segment pairs cross
                    pt[0].x = lo.x;
                    pt[0].y = edge_crossing(v00, v10, lo.y, hi.y, threshold);
                    pt[1].x = edge_crossing(v10, v11, lo.x, hi.x, threshold);
                    pt[1].y = hi.y;
                    pt[2].x = hi.x;
                    pt[2].y = edge_crossing(v01, v11, lo.y, hi.y, threshold);
                    pt[3].x = edge_crossing(v00, v01, lo.x, hi.x, threshold);
                    pt[3].y = lo.y;
                } else {
                    pt[0].x = lo.x;
                    pt[0].y = edge_crossing(v00, v10, lo.y, hi.y, threshold);
                    pt[1].x = edge_crossing(v00, v01, lo.x, hi.x, threshold);
                    pt[1].y = lo.y;
                    pt[2].x = hi.x;
                    pt[2].y = edge_crossing(v01, v11, lo.y, hi.y, threshold);
                    pt[3].x = edge_crossing(v10, v11, lo.x, hi.x, threshold);
                    pt[3].y = hi.y;
                }
                2
            }

            6 => {
                pt[0].x = edge_crossing(v00, v01, lo.x, hi.x, threshold);
                pt[0].y = lo.y;
                pt[1].x = edge_crossing(v10, v11, lo.x, hi.x, threshold);
                pt[1].y = hi.y;
                1
            }

            7 => {
                pt[0].x = lo.x;
                pt[0].y = edge_crossing(v00, v10, lo.y, hi.y, threshold);
                pt[1].x = edge_crossing(v10, v11, lo.x, hi.x, threshold);
                pt[1].y = hi.y;
                1
            }

            8 => {
                pt[0].x = edge_crossing(v10, v11, lo.x, hi.x, threshold);
                pt[0].y = hi.y;
                pt[1].x = lo.x;
                pt[1].y = edge_crossing(v00, v10, lo.y, hi.y, threshold);
                1
            }

            9 => {
                pt[0].x = edge_crossing(v10, v11, lo.x, hi.x, threshold);
                pt[0].y = hi.y;
                pt[1].x = edge_crossing(v00, v01, lo.x, hi.x, threshold);
                pt[1].y = lo.y;
                1
            }

            10 => {
                let ave = R::from_float(0.25)
                    * (R::from_u8_sample(v00)
                        + R::from_u8_sample(v01)
                        + R::from_u8_sample(v10)
                        + R::from_u8_sample(v11));
                if ave > threshold {
                    pt[0].x = edge_crossing(v00, v01, lo.x, hi.x, threshold);
                    pt[0].y = lo.y;
                    pt[1].x = lo.x;
                    pt[1].y = edge_crossing(v00, v10, lo.y, hi.y, threshold);
                    pt[2].x = edge_crossing(v10, v11, lo.x, hi.x, threshold);
                    pt[2].y = hi.y;
                    pt[3].x = hi.x;
                    pt[3].y = edge_crossing(v01, v11, lo.y, hi.y, threshold);
                } else {
                    pt[0].x = edge_crossing(v10, v11, lo.x, hi.x, threshold);
                    pt[0].y = hi.y;
                    pt[1].x = lo.x;
                    pt[1].y = edge_crossing(v00, v10, lo.y, hi.y, threshold);
                    pt[2].x = edge_crossing(v00, v01, lo.x, hi.x, threshold);
                    pt[2].y = lo.y;
                    pt[3].x = hi.x;
                    pt[3].y = edge_crossing(v01, v11, lo.y, hi.y, threshold);
                }
                2
            }

            11 => {
                pt[0].x = edge_crossing(v10, v11, lo.x, hi.x, threshold);
                pt[0].y = hi.y;
                pt[1].x = hi.x;
                pt[1].y = edge_crossing(v01, v11, lo.y, hi.y, threshold);
                1
            }

            12 => {
                pt[0].x = hi.x;
                pt[0].y = edge_crossing(v01, v11, lo.y, hi.y, threshold);
                pt[1].x = lo.x;
                pt[1].y = edge_crossing(v00, v10, lo.y, hi.y, threshold);
                1
            }

            13 => {
                pt[0].x = hi.x;
                pt[0].y = edge_crossing(v01, v11, lo.y, hi.y, threshold);
                pt[1].x = edge_crossing(v00, v01, lo.x, hi.x, threshold);
                pt[1].y = lo.y;
                1
            }

            14 => {
                pt[0].x = edge_crossing(v00, v01, lo.x, hi.x, threshold);
                pt[0].y = lo.y;
                pt[1].x = lo.x;
                pt[1].y = edge_crossing(v00, v10, lo.y, hi.y, threshold);
                1
            }

            _ => unreachable!("4-bit case index"),
        };

        let label = field.label(cell);
        let id = grid.cell_id(cell);
        for i in 0..nsurf {
            let handle = pool.add_line(label, pt[2 * i], pt[2 * i + 1], id);
            cell_surfs[cell].push(handle);
        }
    }

    debug!(
        "Marching squares produced {} segments on this rank",
        pool.lines.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Dimension, UniformBlockIndex};

    fn single_cell_grid() -> UniformBlockIndex<i32, f64> {
        UniformBlockIndex::new_serial(
            Dimension::Two,
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0),
            [1, 1, 1],
        )
        .unwrap()
    }

    fn extract(corners: [u8; 4], threshold: f64) -> (SurfacePool<f64>, Vec<Vec<usize>>) {
        let grid = single_cell_grid();
        let mut field = CornerField::new(Dimension::Two, 1);
        for (k, v) in corners.into_iter().enumerate() {
            field.set_corner(0, k, v);
        }
        let mut pool = SurfacePool::new_implicit();
        let mut cell_surfs = vec![Vec::new(); 1];
        marching_squares(&grid, &field, threshold, &mut pool, &mut cell_surfs);
        (pool, cell_surfs)
    }

    #[test]
    fn test_uniform_cell_produces_nothing() {
        let (pool, _) = extract([0, 0, 0, 0], 127.5);
        assert!(pool.lines.is_empty());
        let (pool, _) = extract([255, 255, 255, 255], 127.5);
        assert!(pool.lines.is_empty());
    }

    #[test]
    fn test_single_corner_above() {
        // Only the lower-left corner is inside; one segment cuts the corner
        // and its normal points away from it
        let (mut pool, cell_surfs) = extract([200, 0, 0, 0], 127.5);
        assert_eq!(pool.lines.len(), 1);
        assert_eq!(cell_surfs[0], vec![0]);

        let t = 127.5 / 200.0;
        let line = &pool.lines[0];
        assert!((line.p1 - Vector3::new(0.0, t, 0.0)).norm() < 1e-12);
        assert!((line.p2 - Vector3::new(t, 0.0, 0.0)).norm() < 1e-12);

        pool.compute_line_normals();
        let norm = pool.lines[0].norm;
        assert!(norm.x > 0.0 && norm.y > 0.0);
    }

    #[test]
    fn test_saddle_connected_above() {
        // Corners 00 and 11 inside with a high average: two crossing
        // segments enclosing the connected centre
        let (pool, _) = extract([255, 10, 10, 255], 127.5);
        assert_eq!(pool.lines.len(), 2);
        // The first segment runs from the low-x edge to the high-y edge
        assert_eq!(pool.lines[0].p1.x, 0.0);
        assert_eq!(pool.lines[0].p2.y, 1.0);
    }

    #[test]
    fn test_saddle_disconnected_below() {
        // Same sign pattern but a low average: the two inside corners stay
        // separate
        let (pool, _) = extract([129, 0, 0, 129], 127.5);
        assert_eq!(pool.lines.len(), 2);
        // The first segment cuts off the lower-left corner
        assert_eq!(pool.lines[0].p1.x, 0.0);
        assert_eq!(pool.lines[0].p2.y, 0.0);
    }

    #[test]
    fn test_default_label_without_type_map() {
        let grid = single_cell_grid();
        let mut field = CornerField::new(Dimension::Two, 1);
        field.set_corner(0, 0, 200);
        let mut pool = SurfacePool::new_implicit();
        let mut cell_surfs = vec![Vec::new(); 1];
        marching_squares(&grid, &field, 127.5, &mut pool, &mut cell_surfs);
        assert_eq!(pool.lines[0].label, 1);
    }
}
