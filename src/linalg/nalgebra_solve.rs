use super::LinearSystem;
use nalgebra::DVector;
use thiserror::Error;
use tracing::debug;

// TODO: use Nalgebra's Sparse crate
pub const MAX_DENSE_SIZE: usize = 1000;

/// Solve a symmetric positive definite system with Nalgebra's dense Cholesky Decomposition
///
/// The sparse matrix is cast to a dense matrix object, which uses a very large amount of memory
/// when the system is large; larger problems are rejected.
pub fn nalgebra_solve(system: &LinearSystem) -> Result<DVector<f64>, SolveError> {
    let n = system.a.dimension;
    if n > MAX_DENSE_SIZE {
        return Err(SolveError::ProblemTooLarge(n));
    }
    if n == 0 {
        return Ok(DVector::zeros(0));
    }

    let cholesky = system
        .a
        .to_dense()
        .cholesky()
        .ok_or(SolveError::NotPositiveDefinite)?;

    debug!("solved dense {0}x{0} system", n);
    Ok(cholesky.solve(&system.b))
}

/// Error type for the dense solver
#[derive(Debug, Clone, Error)]
pub enum SolveError {
    #[error("system matrix is not positive definite (Cholesky failed); cannot solve!")]
    NotPositiveDefinite,
    #[error("system of size {0} exceeds the maximum dense size ({max}x{max}); cannot solve!", max = MAX_DENSE_SIZE)]
    ProblemTooLarge(usize),
}
