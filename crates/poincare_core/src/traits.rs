use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in state vectors.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A first-order ODE right-hand side, y' = f(z, y).
///
/// Implementations must be pure: two calls with the same arguments write
/// the same derivative.
pub trait VectorField<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the derivative at independent variable `z` and state `y`,
    /// writing the result into `dydz`.
    fn eval(&self, z: T, y: &[T], dydz: &mut [T]);
}
