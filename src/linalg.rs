/// Use Nalgebra's Cholesky decomposition to solve a symmetric positive definite system
pub mod nalgebra_solve;
/// Sparsely Packed Matrix
pub mod sparse_matrix;

use nalgebra::{DMatrix, DVector};
use sparse_matrix::SparseMatrix;

/// Linear System
///
/// Au = b
#[derive(Clone, Debug)]
pub struct LinearSystem {
    /// A Matrix (symmetric)
    pub a: SparseMatrix,
    /// b Vector
    pub b: DVector<f64>,
}

impl LinearSystem {
    pub fn new(num_dofs: usize) -> Self {
        Self {
            a: SparseMatrix::new(num_dofs),
            b: DVector::zeros(num_dofs),
        }
    }

    pub fn num_dofs(&self) -> usize {
        self.a.dimension
    }

    /// Scatter-add an element matrix and vector; slots without a global index are skipped
    pub fn add_element(&mut self, indices: &[Option<usize>], local_a: &DMatrix<f64>, local_b: &DVector<f64>) {
        assert!(
            local_a.nrows() == indices.len() && local_a.ncols() == indices.len() && local_b.len() == indices.len(),
            "Element matrices do not match the number of local slots ({}); cannot assemble!",
            indices.len()
        );

        let mut entries = Vec::with_capacity(indices.len() * (indices.len() + 1) / 2);
        for (i, gi) in indices.iter().enumerate() {
            let gi = match gi {
                Some(gi) => *gi,
                None => continue,
            };
            self.b[gi] += local_b[i];

            // only the upper triangle is stored
            for (j, gj) in indices.iter().enumerate().skip(i) {
                if let Some(gj) = gj {
                    entries.push(([gi, *gj], local_a[(i, j)]));
                }
            }
        }
        self.a.insert_group(entries);
    }

    /// `xᵀ b`
    pub fn energy(&self, x: &DVector<f64>) -> f64 {
        x.dot(&self.b)
    }
}
