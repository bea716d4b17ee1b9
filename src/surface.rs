//! Storage for extracted surface primitives
//!
//! Primitives live in a contiguous per-rank pool; every primitive records the
//! ID of the cell it is bound to, and every cell keeps a list of handles into
//! the pool. Deleting from the pool moves the last element into the hole, so
//! the single back-pointer in the owning cell's handle list must be repatched
//! by the caller.

use bitflags::bitflags;
use nalgebra::Vector3;

use crate::aabb::Aabb3d;
use crate::grid::CellId;
use crate::topology::CellFace;
use crate::Real;

bitflags! {
    /// Per-primitive group membership bits
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct GroupMask: u32 {
        /// The default group every primitive belongs to
        const ALL = 1;
    }
}

impl Default for GroupMask {
    fn default() -> Self {
        GroupMask::ALL
    }
}

/// An oriented line segment bound to a grid cell (2D extraction)
#[derive(Clone, Debug)]
pub struct Line<R: Real> {
    /// ID of the cell the segment is bound to
    pub cell: CellId,
    /// Material label, from the type map or 1
    pub label: i32,
    pub mask: GroupMask,
    /// Unit normal, points into the flow region
    pub norm: Vector3<R>,
    pub p1: Vector3<R>,
    pub p2: Vector3<R>,
}

/// An oriented triangle bound to a grid cell (3D extraction)
#[derive(Clone, Debug)]
pub struct Tri<R: Real> {
    /// ID of the cell the triangle is bound to
    pub cell: CellId,
    /// Material label, from the type map or 1
    pub label: i32,
    pub mask: GroupMask,
    /// Unit normal, points into the flow region
    pub norm: Vector3<R>,
    pub p1: Vector3<R>,
    pub p2: Vector3<R>,
    pub p3: Vector3<R>,
}

/// Contiguous per-rank pool of surface primitives
#[derive(Clone, Debug)]
pub struct SurfacePool<R: Real> {
    implicit: bool,
    pub lines: Vec<Line<R>>,
    pub tris: Vec<Tri<R>>,
}

impl<R: Real> SurfacePool<R> {
    /// Constructs an empty pool declared to hold implicit surfaces
    pub fn new_implicit() -> Self {
        Self {
            implicit: true,
            lines: Vec::new(),
            tris: Vec::new(),
        }
    }

    /// Whether the pool was declared to hold implicit surfaces
    pub fn is_implicit(&self) -> bool {
        self.implicit
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.tris.is_empty()
    }

    /// Number of primitives owned by this rank
    pub fn num_local(&self) -> usize {
        self.lines.len() + self.tris.len()
    }

    /// Appends a segment and returns its handle
    pub fn add_line(&mut self, label: i32, p1: Vector3<R>, p2: Vector3<R>, cell: CellId) -> usize {
        self.lines.push(Line {
            cell,
            label,
            mask: GroupMask::default(),
            norm: Vector3::zeros(),
            p1,
            p2,
        });
        self.lines.len() - 1
    }

    /// Appends a triangle and returns its handle
    pub fn add_tri(
        &mut self,
        label: i32,
        p1: Vector3<R>,
        p2: Vector3<R>,
        p3: Vector3<R>,
        cell: CellId,
    ) -> usize {
        self.tris.push(Tri {
            cell,
            label,
            mask: GroupMask::default(),
            norm: Vector3::zeros(),
            p1,
            p2,
            p3,
        });
        self.tris.len() - 1
    }

    /// ORs the given group bits into the mask of every primitive
    pub fn apply_group_mask(&mut self, mask: GroupMask) {
        for line in &mut self.lines {
            line.mask |= mask;
        }
        for tri in &mut self.tris {
            tri.mask |= mask;
        }
    }

    /// Computes unit normals for all segments
    ///
    /// The normal is the z-axis crossed with the segment direction, so the
    /// endpoint order fixed by the extraction cases makes it point into the
    /// flow region.
    pub fn compute_line_normals(&mut self) {
        for line in &mut self.lines {
            let d = line.p2 - line.p1;
            line.norm = Vector3::new(-d.y, d.x, R::zero()).normalize();
        }
    }

    /// Computes unit normals for all triangles from their stored winding
    pub fn compute_tri_normals(&mut self) {
        for tri in &mut self.tris {
            tri.norm = (tri.p2 - tri.p1).cross(&(tri.p3 - tri.p1)).normalize();
        }
    }

    /// Smallest AABB containing all primitive corner points of this rank
    pub fn local_extent(&self) -> Option<Aabb3d<R>> {
        let mut points = self
            .lines
            .iter()
            .flat_map(|l| [l.p1, l.p2])
            .chain(self.tris.iter().flat_map(|t| [t.p1, t.p2, t.p3]));

        let first = points.next()?;
        let mut extent = Aabb3d::new(first, first);
        for p in points {
            extent.join_with_point(&p);
        }
        Some(extent)
    }
}

/// Returns the cell face all three triangle vertices lie on, if any
///
/// Comparison is exact: crossing points are clamped onto the cell bounds by
/// the edge interpolation, so face-coplanar triangles have bit-identical face
/// coordinates.
pub fn tri_on_cell_face<R: Real>(tri: &Tri<R>, bounds: &Aabb3d<R>) -> Option<CellFace> {
    let lo = bounds.min();
    let hi = bounds.max();

    for d in 0..3 {
        if tri.p1[d] == lo[d] && tri.p2[d] == lo[d] && tri.p3[d] == lo[d] {
            return Some(CellFace::from_index(2 * d));
        }
        if tri.p1[d] == hi[d] && tri.p2[d] == hi[d] && tri.p3[d] == hi[d] {
            return Some(CellFace::from_index(2 * d + 1));
        }
    }
    None
}

/// Whether the normal of a face-coplanar triangle points into the interior of the cell
///
/// For a low face the inward direction is positive along the face axis, for a
/// high face it is negative.
#[inline(always)]
pub fn normal_is_inward<R: Real>(norm: &Vector3<R>, face: CellFace) -> bool {
    let component = norm[face.axis().dim()];
    if face.direction().is_positive() {
        component < R::zero()
    } else {
        component > R::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Axis, Direction};

    fn unit_cell() -> Aabb3d<f64> {
        Aabb3d::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0))
    }

    fn face_tri(x: f64) -> Tri<f64> {
        Tri {
            cell: CellId(1),
            label: 1,
            mask: GroupMask::default(),
            norm: Vector3::zeros(),
            p1: Vector3::new(x, 0.0, 0.0),
            p2: Vector3::new(x, 1.0, 0.0),
            p3: Vector3::new(x, 0.0, 1.0),
        }
    }

    #[test]
    fn test_tri_on_cell_face() {
        let bounds = unit_cell();
        assert_eq!(
            tri_on_cell_face(&face_tri(0.0), &bounds),
            Some(Axis::X.with_direction(Direction::Negative))
        );
        assert_eq!(
            tri_on_cell_face(&face_tri(1.0), &bounds),
            Some(Axis::X.with_direction(Direction::Positive))
        );
        assert_eq!(tri_on_cell_face(&face_tri(0.5), &bounds), None);
    }

    #[test]
    fn test_normal_inward() {
        let xhi = Axis::X.with_direction(Direction::Positive);
        let xlo = Axis::X.with_direction(Direction::Negative);
        let inward_for_hi = Vector3::new(-1.0, 0.0, 0.0);
        assert!(normal_is_inward(&inward_for_hi, xhi));
        assert!(!normal_is_inward(&inward_for_hi, xlo));
    }

    #[test]
    fn test_line_normal_points_left_of_direction() {
        let mut pool = SurfacePool::<f64>::new_implicit();
        // Segment running from +y towards +x; the flow side is towards (1, 1)
        pool.add_line(
            1,
            Vector3::new(0.0, 0.5, 0.0),
            Vector3::new(0.5, 0.0, 0.0),
            CellId(1),
        );
        pool.compute_line_normals();
        let norm = pool.lines[0].norm;
        assert!(norm.x > 0.0 && norm.y > 0.0);
        assert!((norm.norm() - 1.0).abs() < 1e-12);
    }
}
