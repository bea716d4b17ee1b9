use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::ops::{AddAssign, MulAssign, SubAssign};

use bytemuck::Pod;
use nalgebra::RealField;
use num::{Bounded, CheckedAdd, CheckedMul, CheckedSub, FromPrimitive, Integer, ToPrimitive};

/// Convenience trait that combines `Send` and `Sync`
pub trait ThreadSafe: Sync + Send {}
impl<T> ThreadSafe for T where T: Sync + Send {}

/// Trait that has to be implemented for types to be used as grid extents and linear lattice indices in the context of the library
pub trait Index:
    Copy
    + Hash
    + Integer
    + Bounded
    + CheckedAdd
    + CheckedSub
    + CheckedMul
    + AddAssign
    + SubAssign
    + MulAssign
    + FromPrimitive
    + ToPrimitive
    + Default
    + Debug
    + Display
    + Pod
    + ThreadSafe
    + 'static
{
    /// Converts the value to the specified [Real] type. If the value cannot be represented by the target type, `None` is returned.
    fn to_real<R: Real>(self) -> Option<R> {
        R::from_f64(self.to_f64()?)
    }

    /// Converts the value to the specified [Real] type, panics if the value cannot be represented by the target type.
    fn to_real_unchecked<R: Real>(self) -> R {
        R::from_f64(self.to_f64().unwrap()).unwrap()
    }

    /// Converts the value to a `usize`, panics if the value cannot be represented by `usize`.
    fn to_usize_unchecked(self) -> usize {
        self.to_usize().unwrap()
    }

    /// Multiplies the value by the specified `i32` coefficient. Panics if the coefficient cannot be converted into the target type.
    fn times(self, n: i32) -> Self {
        self.mul(Self::from_i32(n).unwrap())
    }
}

/// Trait that has to be implemented for types to be used as floating point values in the context of the library (coordinates, thresholds, iso values)
pub trait Real:
    RealField + FromPrimitive + ToPrimitive + Debug + Default + Pod + ThreadSafe
{
    /// Tries to convert the value to another [Real] type, returns `None` if the conversion fails
    fn try_convert<T: Real>(self) -> Option<T> {
        T::from_f64(self.to_f64()?)
    }

    /// Converts an `f64` literal to the value type, panics if it cannot be represented
    fn from_float(x: f64) -> Self {
        Self::from_f64(x).unwrap()
    }

    /// Converts an unsigned byte sample to the value type
    fn from_u8_sample(v: u8) -> Self {
        Self::from_u8(v).unwrap()
    }

    /// Converts the value to the specified [Index] type. If the value cannot be represented by the target type, `None` is returned.
    fn to_index<I: Index>(self) -> Option<I> {
        I::from_f64(self.to_f64()?)
    }

    /// Multiplies the value by the specified `i32` coefficient. Panics if the coefficient cannot be converted into the target type.
    fn times(self, n: i32) -> Self {
        self.mul(Self::from_i32(n).unwrap())
    }
}

impl<T> Index for T where
    T: Copy
        + Hash
        + Integer
        + Bounded
        + CheckedAdd
        + CheckedSub
        + CheckedMul
        + AddAssign
        + SubAssign
        + MulAssign
        + FromPrimitive
        + ToPrimitive
        + Debug
        + Default
        + Display
        + Pod
        + ThreadSafe
        + 'static
{
}

impl<T: RealField + FromPrimitive + ToPrimitive + Debug + Default + Pod + ThreadSafe + 'static> Real
    for T
{
}
