/// Hierarchical shape functions on the reference triangle
pub mod hierarchical;
/// Exact bivariate polynomials
pub mod polynomial;

use super::dof::tri_num;
use super::mesh::space::Point;
use super::mesh::tri_type::TriType;
use hierarchical::{hierarchical_basis, lattice_points};
use polynomial::Polynomial;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::info;

/// Largest polynomial degree the reference tables can be built for
pub const MAX_POLYNOMIAL_DEGREE: usize = 10;
/// Degree of the reference tables when none is requested explicitly
pub const DEFAULT_BASIS_DEGREE: usize = 5;

/// Corners of the reference triangle
pub const REFERENCE_TRIANGLE: [[f64; 2]; 3] = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];

/// Corners of the two children of the reference triangle (in its own coordinates)
const REFERENCE_CHILDREN: [[[f64; 2]; 3]; 2] = [
    [[0.5, 0.5], [0.0, 0.0], [1.0, 0.0]],
    [[0.5, 0.5], [0.0, 1.0], [0.0, 0.0]],
];

/// Precomputed integrals of the hierarchical basis of one [`TriType`]
#[derive(Clone, Debug)]
pub struct ReferenceBasis {
    pub tri_type: TriType,
    functions: Vec<Polynomial>,
    /// `[∫φx ψx, ∫(φx ψy + φy ψx), ∫φy ψy]`
    stiffness_parts: [DMatrix<f64>; 3],
    mass: DMatrix<f64>,
    integrals: DVector<f64>,
    /// Coefficient maps onto the `[left, right]` children
    transfers: [DMatrix<f64>; 2],
}

impl ReferenceBasis {
    pub fn new(tri_type: TriType, degree: usize) -> Self {
        let functions = hierarchical_basis(tri_type, degree);
        let n = functions.len();
        let dx: Vec<Polynomial> = functions.iter().map(|f| f.dx()).collect();
        let dy: Vec<Polynomial> = functions.iter().map(|f| f.dy()).collect();

        let mut stiffness_parts = [DMatrix::zeros(n, n), DMatrix::zeros(n, n), DMatrix::zeros(n, n)];
        let mut mass = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in i..n {
                let a0 = dx[i].integrate_product(&dx[j]);
                let a1 = dx[i].integrate_product(&dy[j]) + dy[i].integrate_product(&dx[j]);
                let a2 = dy[i].integrate_product(&dy[j]);
                let m = functions[i].integrate_product(&functions[j]);

                for (part, value) in stiffness_parts.iter_mut().zip([a0, a1, a2]) {
                    part[(i, j)] = value;
                    part[(j, i)] = value;
                }
                mass[(i, j)] = m;
                mass[(j, i)] = m;
            }
        }

        let integrals = DVector::from_iterator(n, functions.iter().map(|f| f.integrate_reference()));

        let transfers = [0, 1].map(|side| {
            let child_functions = hierarchical_basis(tri_type.child(side), degree);
            transfer_matrix(&functions, &child_functions, REFERENCE_CHILDREN[side], degree)
        });

        Self {
            tri_type,
            functions,
            stiffness_parts,
            mass,
            integrals,
            transfers,
        }
    }

    pub fn dim(&self) -> usize {
        self.functions.len()
    }

    pub fn functions(&self) -> &[Polynomial] {
        &self.functions
    }

    pub fn stiffness_parts(&self) -> &[DMatrix<f64>; 3] {
        &self.stiffness_parts
    }

    pub fn mass(&self) -> &DMatrix<f64> {
        &self.mass
    }

    pub fn integrals(&self) -> &DVector<f64> {
        &self.integrals
    }

    pub fn transfer(&self, side: usize) -> &DMatrix<f64> {
        &self.transfers[side]
    }

    /// Evaluate a coefficient vector at a point in reference coordinates
    pub fn eval(&self, coefficients: &DVector<f64>, point: [f64; 2]) -> f64 {
        coefficients
            .iter()
            .zip(self.functions.iter())
            .map(|(c, f)| c * f.eval(point))
            .sum()
    }
}

/// The reference tables of all eight [`TriType`]s for a fixed maximum degree
#[derive(Clone, Debug)]
pub struct Bases {
    degree: usize,
    references: Vec<ReferenceBasis>,
}

impl Default for Bases {
    fn default() -> Self {
        Self::new(DEFAULT_BASIS_DEGREE)
    }
}

impl Bases {
    pub fn new(degree: usize) -> Self {
        assert!(
            (1..=MAX_POLYNOMIAL_DEGREE).contains(&degree),
            "Basis degree must be in 1..={}; got {}!",
            MAX_POLYNOMIAL_DEGREE,
            degree
        );

        let references = TriType::ALL
            .par_iter()
            .map(|tt| ReferenceBasis::new(*tt, degree))
            .collect();

        info!("built reference bases of degree {} ({} functions each)", degree, tri_num(degree));
        Self { degree, references }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Number of basis functions per Element
    pub fn dim(&self) -> usize {
        tri_num(self.degree)
    }

    pub fn reference(&self, tri_type: TriType) -> &ReferenceBasis {
        &self.references[tri_type.to_int()]
    }

    /// Full transfer matrix from an Element of some type to one of its children
    pub fn transfer(&self, tri_type: TriType, side: usize) -> &DMatrix<f64> {
        self.reference(tri_type).transfer(side)
    }

    /// Top-left `child_dim x dim` corner of a transfer matrix
    pub fn transfer_corner(&self, tri_type: TriType, side: usize, child_dim: usize, dim: usize) -> DMatrix<f64> {
        self.check_dim(child_dim.max(dim));
        self.transfer(tri_type, side)
            .slice((0, 0), (child_dim, dim))
            .clone_owned()
    }

    /// Stiffness matrix `∫∇φi·∇φj` of the first `dim` basis functions on a physical triangle
    pub fn stiffness(&self, tri_type: TriType, points: &[Point; 3], dim: usize) -> DMatrix<f64> {
        self.check_dim(dim);
        let e1 = points[1] - points[0];
        let e2 = points[2] - points[0];
        let d = e1.cross(&e2).abs();

        let [a0, a1, a2] = self
            .reference(tri_type)
            .stiffness_parts()
            .each_ref()
            .map(|part| part.slice((0, 0), (dim, dim)).clone_owned());

        (a0 * e2.norm_squared() - a1 * e1.dot(&e2) + a2 * e1.norm_squared()) / d
    }

    /// Mass matrix `∫φi φj` of the first `rows x cols` basis functions on a physical triangle
    pub fn mass(&self, tri_type: TriType, points: &[Point; 3], rows: usize, cols: usize) -> DMatrix<f64> {
        self.check_dim(rows.max(cols));
        let d = jacobian_determinant(points);
        self.reference(tri_type).mass().slice((0, 0), (rows, cols)) * d
    }

    /// Element vector `∫φi` of the first `dim` basis functions on a physical triangle
    pub fn integrals(&self, tri_type: TriType, points: &[Point; 3], dim: usize) -> DVector<f64> {
        self.check_dim(dim);
        let d = jacobian_determinant(points);
        self.reference(tri_type).integrals().rows(0, dim) * d
    }

    /// Coefficient map from a triangle onto a sub-triangle given by its corners in reference coordinates
    ///
    /// Used to re-express data attached to an input triangle on the Elements that replaced it.
    pub fn restriction_matrix(
        &self,
        tri_type: TriType,
        corners: [[f64; 2]; 3],
        sub_tri_type: TriType,
        dim: usize,
    ) -> DMatrix<f64> {
        self.check_dim(dim);
        transfer_matrix(
            self.reference(tri_type).functions(),
            self.reference(sub_tri_type).functions(),
            corners,
            self.degree,
        )
        .slice((0, 0), (dim, dim))
        .clone_owned()
    }

    fn check_dim(&self, dim: usize) {
        assert!(
            dim <= self.dim(),
            "Requested {} basis functions, but only {} are available; cannot build local matrix!",
            dim,
            self.dim()
        );
    }
}

/// Express a triangle's basis in terms of the basis of a sub-triangle, by interpolation on the lattice of the sub-triangle
///
/// The result `T` satisfies `Σ (T c)_j ψ_j = Σ c_i φ_i` on the sub-triangle.
fn transfer_matrix(
    functions: &[Polynomial],
    sub_functions: &[Polynomial],
    corners: [[f64; 2]; 3],
    degree: usize,
) -> DMatrix<f64> {
    let sub_points = lattice_points(REFERENCE_TRIANGLE, degree);
    let points = lattice_points(corners, degree);

    let sub_values = DMatrix::from_fn(sub_points.len(), sub_functions.len(), |l, j| {
        sub_functions[j].eval(sub_points[l])
    });
    let values = DMatrix::from_fn(points.len(), functions.len(), |l, i| functions[i].eval(points[l]));

    sub_values
        .col_piv_qr()
        .solve(&values)
        .expect("Lattice points must be unisolvent; cannot build transfer matrix!")
}

/// Twice the area of a triangle
pub fn jacobian_determinant(points: &[Point; 3]) -> f64 {
    (points[1] - points[0]).cross(&(points[2] - points[0])).abs()
}

/// Coordinates of a point with respect to a triangle's reference map `v0 + ξ (v1 - v0) + η (v2 - v0)`
pub fn reference_coords(points: &[Point; 3], p: &Point) -> [f64; 2] {
    let e1 = points[1] - points[0];
    let e2 = points[2] - points[0];
    let r = *p - points[0];
    let det = e1.cross(&e2);
    [r.cross(&e2) / det, e1.cross(&r) / det]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn right_triangle() -> [Point; 3] {
        [Point::new(0.0, 0.0), Point::new(1.0, 0.0), Point::new(0.0, 1.0)]
    }

    fn skewed_triangle() -> [Point; 3] {
        [Point::new(0.5, 0.5), Point::new(2.0, 0.0), Point::new(1.5, 1.25)]
    }

    #[test]
    fn default_degree() {
        let bases = Bases::default();
        assert_eq!(bases.dim(), tri_num(DEFAULT_BASIS_DEGREE));
    }

    #[test]
    fn stiffness_properties() {
        let bases = Bases::new(4);
        for tt in TriType::ALL {
            let a = bases.stiffness(tt, &skewed_triangle(), bases.dim());
            assert_relative_eq!(a.clone(), a.transpose(), epsilon = 1e-12);

            // constants are in the kernel
            let mut one = DVector::zeros(bases.dim());
            one.rows_mut(0, 3).fill(1.0);
            assert!((&a * &one).norm() < 1e-11);

            // positive definite on the non-constant part
            let bubble = a.slice((3, 3), (bases.dim() - 3, bases.dim() - 3)).clone_owned();
            assert!(bubble.cholesky().is_some());
        }
    }

    #[test]
    fn reference_element_matrices() {
        let bases = Bases::new(3);
        let tt = TriType::default();
        let reference = bases.reference(tt);
        let [a0, _, a2] = reference.stiffness_parts();

        let a = bases.stiffness(tt, &right_triangle(), 6);
        assert_relative_eq!(a, (a0 + a2).slice((0, 0), (6, 6)).clone_owned(), epsilon = 1e-14);

        // linear stiffness matrix of the unit right triangle
        assert_relative_eq!(a[(0, 0)], 1.0, epsilon = 1e-14);
        assert_relative_eq!(a[(1, 1)], 0.5, epsilon = 1e-14);
        assert_relative_eq!(a[(0, 1)], -0.5, epsilon = 1e-14);
        assert_relative_eq!(a[(1, 2)], 0.0, epsilon = 1e-14);
    }

    #[test]
    fn mass_and_integrals() {
        let bases = Bases::new(3);
        let points = skewed_triangle();
        let area = jacobian_determinant(&points) / 2.0;
        for tt in TriType::ALL {
            let m = bases.mass(tt, &points, 3, 3);
            assert_relative_eq!(m.sum(), area, epsilon = 1e-14);

            let b = bases.integrals(tt, &points, bases.dim());
            assert_relative_eq!(b.rows(0, 3).sum(), area, epsilon = 1e-14);
            for i in 0..3 {
                assert_relative_eq!(b[i], area / 3.0, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn transfer_reproduces_parent() {
        let bases = Bases::new(4);
        let coefficients = DVector::from_fn(bases.dim(), |i, _| ((i * 7 + 3) % 5) as f64 - 2.0);

        for tt in TriType::ALL {
            let parent = bases.reference(tt);
            for side in 0..2 {
                let child = bases.reference(tt.child(side));
                let child_coefficients = parent.transfer(side) * &coefficients;
                let [c0, c1, c2] = REFERENCE_CHILDREN[side];

                for xi in [[0.2, 0.3], [0.6, 0.1], [0.05, 0.9]] {
                    let w = [1.0 - xi[0] - xi[1], xi[0], xi[1]];
                    let x = [
                        w[0] * c0[0] + w[1] * c1[0] + w[2] * c2[0],
                        w[0] * c0[1] + w[1] * c1[1] + w[2] * c2[1],
                    ];
                    assert_relative_eq!(
                        child.eval(&child_coefficients, xi),
                        parent.eval(&coefficients, x),
                        epsilon = 1e-10
                    );
                }
            }
        }
    }

    #[test]
    fn transfer_is_hierarchical() {
        let bases = Bases::new(4);
        for tt in TriType::ALL {
            for side in 0..2 {
                let t = bases.transfer(tt, side);
                for d in 1..4 {
                    let n = tri_num(d);
                    let lower_left = t.slice((n, 0), (bases.dim() - n, n));
                    assert!(lower_left.amax() < 1e-10);
                }
            }
        }
    }

    #[test]
    fn upward_sweep_reproduces_integrals() {
        let bases = Bases::new(3);
        for tt in TriType::ALL {
            let parent = bases.reference(tt).integrals().clone();
            let swept: DVector<f64> = (0..2)
                .map(|side| bases.transfer(tt, side).transpose() * bases.reference(tt.child(side)).integrals())
                .fold(DVector::zeros(bases.dim()), |acc, b| acc + b)
                * 0.5;
            assert_relative_eq!(parent, swept, epsilon = 1e-12);
        }
    }

    #[test]
    fn restriction_matches_transfer() {
        let bases = Bases::new(3);
        let tt = TriType::new(true, false, true);
        let r = bases.restriction_matrix(tt, REFERENCE_CHILDREN[1], tt.right(), 6);
        assert_relative_eq!(
            r,
            bases.transfer(tt, 1).slice((0, 0), (6, 6)).clone_owned(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn coordinates() {
        let points = skewed_triangle();
        let [x, y] = reference_coords(&points, &points[2]);
        assert_relative_eq!(x, 0.0, epsilon = 1e-14);
        assert_relative_eq!(y, 1.0, epsilon = 1e-14);
        let mid = Point::between(&points[1], &points[2]);
        let [x, y] = reference_coords(&points, &mid);
        assert_relative_eq!(x, 0.5, epsilon = 1e-14);
        assert_relative_eq!(y, 0.5, epsilon = 1e-14);
    }

    #[test]
    #[should_panic]
    fn degree_too_large() {
        let _ = Bases::new(MAX_POLYNOMIAL_DEGREE + 1);
    }
}
