use crate::domain::{Partition, SolveReport};
use crate::linalg::nalgebra_solve::SolveError;

use std::collections::BTreeMap;
use tracing::info;

/// Estimates the error of a solution by comparing it with the solution on a refined copy of its partition
///
/// The copy has every leaf's degree raised by `p`, and is then refined uniformly `h` times.
#[derive(Clone, Copy, Debug)]
pub struct RefineEstimator {
    pub p: usize,
    pub h: usize,
}

#[derive(Clone, Debug)]
pub struct EstimatorReport {
    /// Squared H1-seminorm of the difference on each leaf of the estimated partition
    pub squared_errors: BTreeMap<usize, f64>,
    /// Solution of the refined problem
    pub fine: SolveReport,
}

impl EstimatorReport {
    pub fn squared_total(&self) -> f64 {
        self.squared_errors.values().sum()
    }

    pub fn total(&self) -> f64 {
        self.squared_total().sqrt()
    }
}

impl Default for RefineEstimator {
    /// Two uniform refinements, no increase in degree
    fn default() -> Self {
        Self { p: 0, h: 2 }
    }
}

impl RefineEstimator {
    pub fn new(p: usize, h: usize) -> Self {
        Self { p, h }
    }

    /// Estimate the error of `partition`'s current solution (the partition itself is not modified)
    pub fn estimate(&self, partition: &Partition) -> Result<EstimatorReport, SolveError> {
        assert!(
            partition.mesh.leaves().iter().all(|l| partition.sol.has(*l)),
            "Partition has not been solved; cannot estimate!"
        );

        let mut fine = partition.clone();
        if self.p > 0 {
            fine.increase_leaf_degrees_by(self.p);
        }
        for _ in 0..self.h {
            fine.refine_leaves_uniformly();
        }
        let fine_report = fine.solve()?;

        let mut coarse = (*partition.sol).clone();
        let squared_errors = partition
            .mesh
            .leaves()
            .iter()
            .map(|leaf_id| {
                (
                    *leaf_id,
                    coarse.squared_h1_norm_of_difference_on(&fine.mesh, &fine.bases, *leaf_id, &fine.sol),
                )
            })
            .collect();

        let report = EstimatorReport {
            squared_errors,
            fine: fine_report,
        };
        info!(
            "refine estimator (p + {}, h x {}): error {:e} with {} fine dofs",
            self.p,
            self.h,
            report.total(),
            report.fine.num_dofs()
        );
        Ok(report)
    }
}
