/// Error estimation by comparison with a uniformly refined solution
pub mod estimator;
/// The hp near-best tree algorithm
pub mod near_best;

use crate::domain::basis::Bases;
use crate::domain::dof::dof_to_dim;
use crate::domain::fields::{local_poly, PiecewisePolynomial};
use crate::domain::mesh::Mesh;

use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;
use tracing::warn;

/// Local best-approximation errors of a piecewise polynomial target
///
/// `error(K, dof)` is the squared H1-seminorm distance between the target and its best
/// approximation on `K` by a single polynomial with `dof` hierarchical coefficients.
///
/// Integrals of the target are memoized per Element; an Approximator must only be used
/// with a single target (which may be copied further down the tree in the meantime).
#[derive(Clone, Debug, Default)]
pub struct Approximator {
    integrals: BTreeMap<usize, f64>,
}

impl Approximator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(
        &mut self,
        mesh: &Mesh,
        bases: &Bases,
        target: &PiecewisePolynomial,
        elt_id: usize,
        dof: usize,
    ) -> f64 {
        let dim = dof_to_dim(dof);

        let x = match dim {
            // no approximation at all
            0 => return target.squared_h1_norm_on(mesh, bases, elt_id),
            // the best constant is the mean value; vertex functions form a partition of unity
            1 => {
                let c = self.integral(mesh, bases, target, elt_id) / mesh.area(elt_id);
                DVector::from_element(3, c)
            }
            _ => {
                if target.has(elt_id) && dim >= target.local_dim(elt_id) {
                    return 0.0;
                }
                assert!(
                    dim <= bases.dim(),
                    "Cannot approximate with {} coefficients; the basis only has {}!",
                    dim,
                    bases.dim()
                );

                let rhs = self.approximation_rhs(mesh, bases, target, elt_id, dim);
                let system = approximation_matrix(mesh, bases, elt_id, dim);
                system
                    .col_piv_qr()
                    .solve(&rhs)
                    .expect("Bordered approximation system must be non-singular!")
                    .rows(0, dim)
                    .clone_owned()
            }
        };

        let mut approximation = PiecewisePolynomial::new();
        approximation.insert_vector(elt_id, x, true);
        let error = approximation.squared_h1_norm_of_difference_on(mesh, bases, elt_id, target);

        if error < -f64::EPSILON {
            warn!(
                "negative squared approximation error {:e} on element {} with {} coefficients",
                error, elt_id, dof
            );
        }
        error.max(0.0)
    }

    /// Drop the memoized integral of an Element
    pub fn forget(&mut self, elt_id: usize) {
        self.integrals.remove(&elt_id);
    }

    /// `∫_K target`, summed over the subtree where the target is polynomial
    fn integral(&mut self, mesh: &Mesh, bases: &Bases, target: &PiecewisePolynomial, elt_id: usize) -> f64 {
        if let Some(value) = self.integrals.get(&elt_id) {
            return *value;
        }

        let value = if target.has(elt_id) {
            local_poly::integral(mesh, bases, elt_id, target.locally_at(elt_id))
        } else {
            let [left, right] = children_or_panic(mesh, elt_id);
            self.integral(mesh, bases, target, left) + self.integral(mesh, bases, target, right)
        };
        self.integrals.insert(elt_id, value);
        value
    }

    /// `[(∇target, ∇φi)_K for i < dim; ∫_K target]`
    fn approximation_rhs(
        &mut self,
        mesh: &Mesh,
        bases: &Bases,
        target: &PiecewisePolynomial,
        elt_id: usize,
        dim: usize,
    ) -> DVector<f64> {
        let head = if target.has(elt_id) {
            let local = target.locally_at(elt_id);
            let n = dim.max(local.len());
            let padded = local_poly::padded(local, n);
            let a = bases.stiffness(mesh.tri_type(elt_id), &mesh.element_points(elt_id), n);

            self.integrals
                .insert(elt_id, local_poly::integral(mesh, bases, elt_id, &padded));
            (a * padded).rows(0, dim).clone_owned()
        } else {
            let children = children_or_panic(mesh, elt_id);
            let tri_type = mesh.tri_type(elt_id);

            let mut head = DVector::zeros(dim);
            let mut integral = 0.0;
            for (side, child) in children.into_iter().enumerate() {
                let child_rhs = self.approximation_rhs(mesh, bases, target, child, dim);
                let t = bases.transfer_corner(tri_type, side, dim, dim);
                head += t.transpose() * child_rhs.rows(0, dim);
                integral += child_rhs[dim];
            }
            self.integrals.insert(elt_id, integral);
            head
        };

        let integral = self.integrals[&elt_id];
        DVector::from_fn(dim + 1, |i, _| if i < dim { head[i] } else { integral })
    }
}

/// `[[A_K, b_K], [b_Kᵀ, 0]]`
fn approximation_matrix(mesh: &Mesh, bases: &Bases, elt_id: usize, dim: usize) -> DMatrix<f64> {
    let tri_type = mesh.tri_type(elt_id);
    let points = mesh.element_points(elt_id);
    let a = bases.stiffness(tri_type, &points, dim);
    let b = bases.integrals(tri_type, &points, dim);

    let mut system = DMatrix::zeros(dim + 1, dim + 1);
    system.slice_mut((0, 0), (dim, dim)).copy_from(&a);
    system.slice_mut((0, dim), (dim, 1)).copy_from(&b);
    system.slice_mut((dim, 0), (1, dim)).copy_from(&b.transpose());
    system
}

fn children_or_panic(mesh: &Mesh, elt_id: usize) -> [usize; 2] {
    mesh.active_children(elt_id).unwrap_or_else(|| {
        panic!(
            "Element {} is a leaf, but the target is not available on it!",
            elt_id
        )
    })
}
