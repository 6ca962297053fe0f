//! Numerical engine for Poincaré surface-of-section maps of driven
//! action-angle systems.
//!
//! Key components:
//! - **Traits**: `Scalar` (numeric type abstraction), `VectorField` (ODE
//!   right-hand sides).
//! - **Solver**: adaptive integration with automatic stiff/non-stiff
//!   method switching, sampled on a caller-supplied evaluation grid.
//! - **Section**: stroboscopic sampling of a batch of initial conditions
//!   into a single phase-plane point cloud.
//! - **Density**: Gaussian kernel density estimation used to color the
//!   cloud.

pub mod density;
pub mod section;
pub mod solver;
pub mod system;
pub mod traits;
