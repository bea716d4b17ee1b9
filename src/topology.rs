//! Helper types for cartesian coordinate system topology

use std::fmt;

/// Direction on a coordinate axis
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Direction {
    Negative = 0,
    Positive = 1,
}

/// Abbreviated type alias for cartesian coordinate axes in 3D
pub type Axis = CartesianAxis3d;

/// The cartesian coordinate axes in 3D
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum CartesianAxis3d {
    /// The x-axis
    X = 0,
    /// The y-axis
    Y = 1,
    /// The z-axis
    Z = 2,
}

/// One of the six faces of a grid cell, ordered x-lo, x-hi, y-lo, y-hi, z-lo, z-hi
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CellFace(u8);

const ALL_DIRECTIONS: [Direction; 2] = [Direction::Negative, Direction::Positive];

impl Direction {
    /// Returns a reference to an array containing all possible directions
    pub const fn all_possible() -> &'static [Direction; 2] {
        &ALL_DIRECTIONS
    }

    /// Constructs a new positive or negative direction depending on the flag
    #[inline(always)]
    pub const fn new_positive(is_positive: bool) -> Self {
        if is_positive {
            Direction::Positive
        } else {
            Direction::Negative
        }
    }

    /// Returns the opposite direction
    pub const fn opposite(&self) -> Self {
        match self {
            Direction::Positive => Direction::Negative,
            Direction::Negative => Direction::Positive,
        }
    }

    /// Returns whether the direction is positive
    #[inline(always)]
    pub const fn is_positive(&self) -> bool {
        matches!(self, Direction::Positive)
    }
}

impl CartesianAxis3d {
    /// Returns a reference to an array containing all 3D cartesian axes
    pub const fn all_possible() -> &'static [Axis; 3] {
        const ALL_AXES: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];
        &ALL_AXES
    }

    /// Converts the cartesian axis into the corresponding 3D dimension index (x: 0, y: 1, z: 2)
    #[inline(always)]
    pub const fn dim(self) -> usize {
        self as usize
    }

    /// Returns the cell face on this axis in the given direction
    #[inline(always)]
    pub const fn with_direction(self, direction: Direction) -> CellFace {
        CellFace(2 * (self as u8) + direction as u8)
    }
}

impl CellFace {
    /// All six cell faces in index order
    pub const fn all_possible() -> &'static [CellFace; 6] {
        const ALL_FACES: [CellFace; 6] = [
            CellFace(0),
            CellFace(1),
            CellFace(2),
            CellFace(3),
            CellFace(4),
            CellFace(5),
        ];
        &ALL_FACES
    }

    /// Constructs a face from its index, panics if out of range
    #[inline(always)]
    pub fn from_index(index: usize) -> Self {
        assert!(index < 6, "cell face index out of range");
        CellFace(index as u8)
    }

    /// The face index in 0..6
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// The axis the face is orthogonal to
    #[inline(always)]
    pub const fn axis(self) -> Axis {
        match self.0 / 2 {
            0 => Axis::X,
            1 => Axis::Y,
            _ => Axis::Z,
        }
    }

    /// The direction of the face along its axis
    #[inline(always)]
    pub const fn direction(self) -> Direction {
        if self.0 % 2 == 1 {
            Direction::Positive
        } else {
            Direction::Negative
        }
    }

    /// The same face as seen from the neighbouring cell
    #[inline(always)]
    pub const fn opposite(self) -> Self {
        if self.0 % 2 == 1 {
            CellFace(self.0 - 1)
        } else {
            CellFace(self.0 + 1)
        }
    }
}

impl fmt::Display for CellFace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            0 => "x-lo",
            1 => "x-hi",
            2 => "y-lo",
            3 => "y-hi",
            4 => "z-lo",
            _ => "z-hi",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_axis_direction_roundtrip() {
        for &axis in Axis::all_possible() {
            for &dir in Direction::all_possible() {
                let face = axis.with_direction(dir);
                assert_eq!(face.axis(), axis);
                assert_eq!(face.direction(), dir);
                assert_eq!(face.opposite().opposite(), face);
                assert_eq!(face.opposite().axis(), axis);
                assert_eq!(face.opposite().direction(), dir.opposite());
            }
        }
    }

    #[test]
    fn test_face_index_order() {
        assert_eq!(Axis::X.with_direction(Direction::Negative).index(), 0);
        assert_eq!(Axis::X.with_direction(Direction::Positive).index(), 1);
        assert_eq!(Axis::Z.with_direction(Direction::Positive).index(), 5);
    }
}
