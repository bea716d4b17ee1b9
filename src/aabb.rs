//! Axis-aligned bounding boxes for grid cells

use std::fmt;
use std::fmt::Debug;

use nalgebra::SVector;

use crate::Real;

/// Type representing an axis aligned bounding box in arbitrary dimensions
#[derive(Clone, Eq, PartialEq)]
pub struct AxisAlignedBoundingBox<R: Real, const D: usize> {
    min: SVector<R, D>,
    max: SVector<R, D>,
}

/// Convenience type alias for an AABB in three dimensions
pub type Aabb3d<R> = AxisAlignedBoundingBox<R, 3>;

impl<R, const D: usize> AxisAlignedBoundingBox<R, D>
where
    R: Real,
{
    /// Constructs an AABB with the given min and max bounding points
    #[inline(always)]
    pub fn new(min: SVector<R, D>, max: SVector<R, D>) -> Self {
        Self { min, max }
    }

    /// Constructs a degenerate AABB with min and max set to zero
    #[inline(always)]
    pub fn zeros() -> Self {
        let zero = SVector::zeros();
        Self {
            min: zero,
            max: zero,
        }
    }

    /// Constructs the smallest AABB fitting around all the given points
    pub fn from_points(points: &[SVector<R, D>]) -> Self {
        let mut point_iter = points.iter();
        if let Some(first_point) = point_iter.next().cloned() {
            let mut aabb = Self {
                min: first_point,
                max: first_point,
            };
            for next_point in point_iter {
                aabb.join_with_point(next_point)
            }
            aabb
        } else {
            Self::zeros()
        }
    }

    /// Returns the min coordinate of the bounding box
    #[inline(always)]
    pub fn min(&self) -> &SVector<R, D> {
        &self.min
    }

    /// Returns the max coordinate of the bounding box
    #[inline(always)]
    pub fn max(&self) -> &SVector<R, D> {
        &self.max
    }

    /// Returns whether the AABB contains the given point (min and max inclusive)
    pub fn contains_point(&self, point: &SVector<R, D>) -> bool {
        for i in 0..D {
            if point[i] < self.min[i] || point[i] > self.max[i] {
                return false;
            }
        }
        true
    }

    /// Returns the extents of the bounding box along each axis
    pub fn extents(&self) -> SVector<R, D> {
        &self.max - &self.min
    }

    /// Enlarges this bounding box to the smallest AABB containing both itself and the other AABB
    pub fn join(&mut self, other: &Self) {
        for i in 0..D {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }

    /// Enlarges this bounding box to the smallest AABB containing itself and the given point
    pub fn join_with_point(&mut self, point: &SVector<R, D>) {
        for i in 0..D {
            self.min[i] = self.min[i].min(point[i]);
            self.max[i] = self.max[i].max(point[i]);
        }
    }
}

impl<R: Real, const D: usize> Debug for AxisAlignedBoundingBox<R, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AxisAlignedBoundingBox {{ min: [{:.7?}], max: [{:.7?}] }}",
            self.min.as_slice(),
            self.max.as_slice()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_aabb_contains_point() {
        let aabb = Aabb3d::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 2.0, 3.0));
        assert!(aabb.contains_point(&Vector3::new(0.5, 1.0, 2.9)));
        assert!(aabb.contains_point(&Vector3::new(0.0, 0.0, 0.0)));
        assert!(!aabb.contains_point(&Vector3::new(1.5, 1.0, 1.0)));
    }

    #[test]
    fn test_aabb_join() {
        let mut aabb = Aabb3d::from_points(&[Vector3::new(1.0, 1.0, 1.0)]);
        aabb.join(&Aabb3d::new(
            Vector3::new(-1.0, 0.0, 0.0),
            Vector3::new(0.0, 3.0, 0.5),
        ));
        assert_eq!(aabb.min(), &Vector3::new(-1.0, 0.0, 0.0));
        assert_eq!(aabb.max(), &Vector3::new(1.0, 3.0, 1.0));
    }
}
