//! hp-adaptive Finite Elements on triangular meshes refined by newest-vertex bisection
//!
//! A [`Partition`] couples a [`Mesh`] with per-element polynomial degrees, a right-hand-side and
//! (once solved) a solution of the Poisson problem `-Δu = f` with homogeneous Dirichlet boundary.
//!
//! [`NearBest`] builds an hp-partition that approximates a given piecewise polynomial target
//! nearly as well as the best partition of similar size, and [`RefineEstimator`] estimates the
//! error of a solution by comparison with the solution on a refined copy of the partition.

/// hp-approximation of piecewise polynomials: local errors, the near-best algorithm and an error estimator
pub mod approximation;
/// Meshes, reference bases, DoF bookkeeping and the Partition that ties them together
pub mod domain;
/// Sparse matrices and the dense Cholesky solver
pub mod linalg;
/// Small numeric helpers
pub mod math;

pub use approximation::estimator::{EstimatorReport, RefineEstimator};
pub use approximation::near_best::{NearBest, NearBestReport};
pub use approximation::Approximator;
pub use domain::basis::Bases;
pub use domain::fields::{PiecewisePolynomial, Rhs, Solution};
pub use domain::mesh::{Mesh, MeshFileError};
pub use domain::{Partition, SolveReport};
pub use linalg::nalgebra_solve::SolveError;
