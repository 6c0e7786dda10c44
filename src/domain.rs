/// Hierarchical reference bases and element matrices
pub mod basis;
/// Degrees of Freedom
pub mod dof;
/// Piecewise polynomial fields over the refinement tree
pub mod fields;
/// The internal geometric structure of a Domain
pub mod mesh;

use crate::linalg::nalgebra_solve::{nalgebra_solve, SolveError};
use crate::linalg::LinearSystem;
use basis::{reference_coords, Bases};
use dof::{handler::DofHandler, tri_num, LINEAR};
use fields::{local_poly, Rhs, Solution};
use mesh::{tri_type::TriType, Mesh, MeshFileError};

#[cfg(feature = "json_export")]
use json::object;
use json::JsonValue;
use nalgebra::DVector;
use std::collections::BTreeSet;
use std::fs::read_to_string;
#[cfg(feature = "json_export")]
use std::fs::File;
#[cfg(feature = "json_export")]
use std::io::BufWriter;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A Mesh together with everything needed to solve `-Δu = f` on its current partition
///
/// The parts are kept consistent by the refinement operations below: whenever an Element
/// is bisected, the right-hand side and the solution are copied down to its children; whenever
/// an Element is trimmed, everything attached to its descendants is forgotten.
#[derive(Clone, Debug)]
pub struct Partition {
    pub mesh: Mesh,
    pub bases: Arc<Bases>,
    /// Global DoF indices of the leaves
    pub handler: DofHandler,
    pub rhs: Rhs,
    pub sol: Solution,
}

/// Result of a call to [`Partition::solve`]
#[derive(Clone, Debug)]
pub struct SolveReport {
    /// The assembled system
    pub system: LinearSystem,
    /// Global coefficient vector of the discrete solution
    pub solution: DVector<f64>,
}

impl SolveReport {
    pub fn num_dofs(&self) -> usize {
        self.system.num_dofs()
    }

    /// `uᵀ b`, the squared energy norm of the discrete solution
    pub fn energy(&self) -> f64 {
        self.system.energy(&self.solution)
    }
}

impl Partition {
    /// Load a Partition from a mesh file and a right-hand-side file (see [`Mesh::from_file`] and [`Rhs::parse_values`])
    pub fn from_files(
        mesh_path: impl AsRef<str>,
        rhs_path: impl AsRef<str>,
        max_degree: usize,
    ) -> Result<Self, MeshFileError> {
        let mesh_json = json::parse(&read_to_string(mesh_path.as_ref())?)?;
        let rhs_json = json::parse(&read_to_string(rhs_path.as_ref())?)?;
        Self::from_json(&mesh_json, &rhs_json, max_degree)
    }

    pub fn from_json(mesh_json: &JsonValue, rhs_json: &JsonValue, max_degree: usize) -> Result<Self, MeshFileError> {
        let mesh = Mesh::from_json(mesh_json)?;
        let rhs_values = Rhs::parse_values(rhs_json, mesh.elements.len())?;
        Ok(Self::from_mesh(mesh, rhs_values, max_degree))
    }

    /// Build a Partition from a freshly loaded Mesh and one rhs vector per input Element
    ///
    /// The Mesh is normalized; the rhs is re-expressed on the resulting roots, and every root gets linear DoFs.
    pub fn from_mesh(mut mesh: Mesh, (rhs_dim, rhs_values): (usize, Vec<DVector<f64>>), max_degree: usize) -> Self {
        assert_eq!(
            rhs_values.len(),
            mesh.elements.len(),
            "Need one rhs vector per input Element; cannot construct Partition!"
        );
        let bases = Arc::new(Bases::new(max_degree));

        let input_types: Vec<TriType> = mesh
            .elements
            .iter()
            .map(|elt| elt.tri_type.unwrap_or_default())
            .collect();
        let input_points: Vec<_> = (0..mesh.elements.len()).map(|elt_id| mesh.element_points(elt_id)).collect();

        mesh.normalize();

        // smallest complete polynomial space holding the input coefficients
        let mut rhs_dof = (0..).map(tri_num).find(|n| *n >= rhs_dim).unwrap_or(rhs_dim);
        if rhs_dof > bases.dim() {
            warn!(
                "truncating rhs with {} coefficients to the basis dimension {}",
                rhs_dim,
                bases.dim()
            );
            rhs_dof = bases.dim();
        }

        let mut rhs = Rhs::new(rhs_dof);
        let roots: Vec<usize> = mesh.roots().iter().copied().collect();
        for root_id in roots {
            let origin = mesh.element(root_id).origin;
            let corners = mesh
                .element_points(root_id)
                .map(|p| reference_coords(&input_points[origin], &p));
            let restriction =
                bases.restriction_matrix(input_types[origin], corners, mesh.tri_type(root_id), rhs_dof);
            let v = restriction * local_poly::padded(&rhs_values[origin], rhs_dof);
            rhs.insert_vector(root_id, v, true);
        }

        let mut handler = DofHandler::new();
        handler.determine_uniform(&mesh, mesh.leaves().iter().copied(), LINEAR);

        info!(
            "loaded partition: {} elements, {} dofs, rhs with {} coefficients",
            mesh.leaves().len(),
            handler.num_dofs(),
            rhs_dof
        );

        Self {
            mesh,
            bases,
            handler,
            rhs,
            sol: Solution::default(),
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // Refinement
    // ----------------------------------------------------------------------------------------------------

    /// Bisect a leaf; DoFs are not touched
    pub fn bisect(&mut self, elt_id: usize, check_boundary: bool) -> [usize; 2] {
        let children = self.mesh.bisect(elt_id, check_boundary);
        self.copy_fields_to_children(elt_id);
        children
    }

    /// Trim an Element to a leaf, forgetting everything attached to its descendants
    ///
    /// If any of the descendants had DoFs, the Element takes over the largest of their budgets.
    pub fn trim(&mut self, elt_id: usize) -> Vec<usize> {
        let removed = self.mesh.trim(elt_id);

        let mut dof = None;
        for r in removed.iter() {
            if self.rhs.has(*r) {
                self.rhs.erase(*r);
            }
            if self.sol.has(*r) {
                self.sol.erase(*r);
            }
            if self.handler.has(*r) {
                dof = dof.max(Some(self.handler.find(*r).dof()));
                self.handler.erase(*r);
            }
        }
        if let Some(dof) = dof {
            self.handler.set(elt_id, dof);
        }

        removed
    }

    /// Remove hanging vertices; the bisected Elements hand their DoF budgets to their children
    pub fn make_conform(&mut self) -> Vec<usize> {
        let bisected = self.mesh.make_conform();
        for b in bisected.iter() {
            self.copy_fields_to_children(*b);

            if self.handler.has(*b) {
                let dof = self.handler.find(*b).dof();
                self.handler.erase(*b);
                for child in self.mesh.element(*b).children.into_iter().flatten() {
                    self.handler.set(child, dof);
                }
            }
        }
        bisected
    }

    /// Conforming refinement of a single leaf (see [`Mesh::refine_element`])
    pub fn refine_element(&mut self, elt_id: usize) -> Vec<usize> {
        self.ensure_dofs();
        let bisected = self.mesh.refine_element(elt_id, &mut self.handler);
        for b in bisected.iter() {
            self.copy_fields_to_children(*b);
        }
        bisected
    }

    /// Conforming refinement of a set of leaves; returns the new leaves
    pub fn refine<'a>(&mut self, elements: impl IntoIterator<Item = &'a usize>) -> BTreeSet<usize> {
        self.ensure_dofs();
        let (new_leaves, bisected) = self.mesh.refine(elements, &mut self.handler);
        for b in bisected.iter() {
            self.copy_fields_to_children(*b);
        }
        new_leaves
    }

    /// Bisect every leaf twice
    pub fn refine_leaves_uniformly(&mut self) -> Vec<usize> {
        self.ensure_dofs();
        let bisected = self.mesh.refine_leaves_uniformly(&mut self.handler);
        for b in bisected.iter() {
            self.copy_fields_to_children(*b);
        }
        bisected
    }

    /// Raise the polynomial degree of every leaf by `by`
    pub fn increase_leaf_degrees_by(&mut self, by: usize) {
        self.ensure_dofs();
        let leaves: Vec<usize> = self.mesh.leaves().iter().copied().collect();
        self.handler
            .increase_set_degree_by(&self.mesh, &leaves, by, self.bases.dim());
    }

    /// Refine until every Element the solution is defined on is covered by enough leaves to plot it as a linear interpolant
    pub fn linearize_solution(&mut self) {
        loop {
            let mut to_refine = BTreeSet::new();
            for elt_id in self.sol.defined_on().iter() {
                let leaves = self.mesh.subtree_leaves(*elt_id);
                let factor = 0.5_f64.powi(self.mesh.element(*elt_id).generation as i32);
                if (leaves.len() as f64) < factor * self.sol.local_dim(*elt_id) as f64 {
                    to_refine.extend(leaves);
                }
            }

            if to_refine.is_empty() {
                break;
            }
            debug!("linearizing solution: refining {} leaves", to_refine.len());
            self.refine(&to_refine);
        }
    }

    fn copy_fields_to_children(&mut self, parent_id: usize) {
        let [left, right] = match self.mesh.active_children(parent_id) {
            Some(children) => children,
            None => return,
        };

        for poly in [&mut *self.rhs, &mut *self.sol] {
            if poly.has(parent_id) && !poly.has(left) && !poly.has(right) {
                poly.copy_to_children(&self.mesh, &self.bases, parent_id);
            }
        }
    }

    /// Make sure that exactly the leaves have valid DoFs, inheriting budgets from ancestors where needed
    fn ensure_dofs(&mut self) {
        let leaves = self.mesh.leaves();
        let complete = self.handler.len() == leaves.len() && leaves.iter().all(|l| self.handler.has(*l));

        if !complete || !self.handler.is_valid() {
            let leaves: Vec<usize> = leaves.iter().copied().collect();
            self.handler.redetermine_on(&self.mesh, &leaves);
            debug!("redetermined dofs: {}", self.handler.num_dofs());
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // Solution
    // ----------------------------------------------------------------------------------------------------

    /// Assemble and solve the Galerkin system of `-Δu = f` (zero Dirichlet data) on the current partition
    pub fn solve(&mut self) -> Result<SolveReport, SolveError> {
        assert!(
            self.mesh.is_conform(true),
            "Mesh has hanging vertices; cannot solve!"
        );
        self.ensure_dofs();

        let mut system = LinearSystem::new(self.handler.num_dofs());
        let leaves: Vec<usize> = self.mesh.leaves().iter().copied().collect();
        for leaf_id in leaves {
            self.rhs.ensure_available(&self.mesh, &self.bases, leaf_id);

            let g = self.handler.find(leaf_id);
            let size = g.dim();
            let tri_type = self.mesh.tri_type(leaf_id);
            let points = self.mesh.element_points(leaf_id);

            let f = self.rhs.locally_at(leaf_id);
            let k = size.min(f.len());
            let local_a = self.bases.stiffness(tri_type, &points, size);
            let local_b = self.bases.mass(tri_type, &points, size, k) * f.rows(0, k);

            system.add_element(g.values(), &local_a, &local_b);
        }

        let solution = if system.num_dofs() == 0 {
            DVector::zeros(0)
        } else {
            nalgebra_solve(&system)?
        };
        self.sol = Solution::new(solution.clone(), &self.handler);

        let report = SolveReport { system, solution };
        info!(
            "solved system with {} dofs; energy {:e}",
            report.num_dofs(),
            report.energy()
        );
        Ok(report)
    }

    // ----------------------------------------------------------------------------------------------------
    // Export
    // ----------------------------------------------------------------------------------------------------

    /// Write the current leaves with their solution coefficients to a JSON file
    #[cfg(feature = "json_export")]
    pub fn export_to_json(&mut self, path: impl AsRef<str>) -> std::io::Result<()> {
        let f = File::create(path.as_ref())?;
        let mut w = BufWriter::new(&f);

        self.to_json().write_pretty(&mut w, 4)?;

        Ok(())
    }

    #[cfg(feature = "json_export")]
    pub fn to_json(&mut self) -> JsonValue {
        let leaves: Vec<usize> = self.mesh.leaves().iter().copied().collect();
        let solved = !self.sol.defined_on().is_empty();
        if solved {
            for leaf_id in leaves.iter() {
                self.sol.ensure_available(&self.mesh, &self.bases, *leaf_id);
            }
        }

        let elements = if solved {
            self.sol.to_json(&self.mesh, &leaves)
        } else {
            self.mesh.to_json()["Elements"].clone()
        };

        object! {
            "Vertices": JsonValue::from(self.mesh.vertices.iter().map(|v| v.coords).collect::<Vec<_>>()),
            "Boundary": JsonValue::from(self.mesh.vertices.iter().map(|v| v.boundary).collect::<Vec<_>>()),
            "Elements": elements,
            "DoFs": self.handler.to_json(&self.mesh),
        }
    }
}

/// Hands out consecutive ids
#[derive(Clone, Debug, Default)]
pub(crate) struct IdTracker {
    next_id: usize,
}

impl IdTracker {
    pub fn new(start: usize) -> Self {
        Self { next_id: start }
    }

    pub fn next_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id - 1
    }

    /// Number of ids handed out (when started at 0)
    pub fn num_ids(&self) -> usize {
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use dof::QUADRATIC;

    fn unit_square() -> Partition {
        Partition::from_files(
            "./test_input/unit_square.json",
            "./test_input/unit_square_rhs.json",
            3,
        )
        .unwrap()
    }

    #[test]
    fn id_tracker() {
        let mut ids = IdTracker::new(0);
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.num_ids(), 2);

        let mut ids = IdTracker::new(5);
        assert_eq!(ids.next_id(), 5);
    }

    #[test]
    fn load_partition() {
        let p = unit_square();

        assert_eq!(p.mesh.leaves().len(), 2);
        assert_eq!(p.rhs.dof(), 3);
        // every vertex of the unit square is on the boundary
        assert_eq!(p.handler.num_dofs(), 0);

        // the constant rhs survives the change of orientations
        for root_id in p.mesh.roots() {
            let f = p.rhs.locally_at(*root_id);
            for i in 0..3 {
                assert_relative_eq!(f[i], 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn malformed_rhs() {
        let mesh_json = json::parse(&read_to_string("./test_input/unit_square.json").unwrap()).unwrap();
        let rhs_json = json::parse(r#"{ "dim": 3, "Values": [[1.0, 1.0, 1.0]] }"#).unwrap();
        assert!(matches!(
            Partition::from_json(&mesh_json, &rhs_json, 3),
            Err(MeshFileError::Format(_))
        ));
        assert!(Partition::from_files("./test_input/missing.json", "./test_input/unit_square_rhs.json", 3).is_err());
    }

    #[test]
    fn solve_without_dofs() {
        let mut p = unit_square();
        let report = p.solve().unwrap();
        assert_eq!(report.num_dofs(), 0);
        assert_eq!(report.energy(), 0.0);
        assert_eq!(p.sol.squared_h1_norm(&p.mesh, &p.bases), 0.0);
    }

    #[test]
    fn solve_poisson_on_unit_square() {
        let mut p = unit_square();
        p.refine_leaves_uniformly();
        assert_eq!(p.mesh.leaves().len(), 8);

        let linear = p.solve().unwrap();
        // only the center is an interior vertex
        assert_eq!(linear.num_dofs(), 1);
        assert!(linear.solution[0] > 0.0);

        let dense = linear.system.a.to_dense();
        assert_eq!(dense, dense.transpose());

        let leaves: Vec<usize> = p.mesh.leaves().iter().copied().collect();
        p.handler
            .increase_set_to(&p.mesh, &leaves, QUADRATIC, p.bases.dim());
        let quadratic = p.solve().unwrap();
        assert!(quadratic.num_dofs() > linear.num_dofs());

        assert!(quadratic.system.a.to_dense().cholesky().is_some());

        // Galerkin energies grow towards ∫u ≈ 0.0351 for nested spaces
        assert!(linear.energy() > 0.0);
        assert!(quadratic.energy() >= linear.energy());
        assert!(quadratic.energy() < 0.0352);
        assert_relative_eq!(
            quadratic.energy(),
            p.sol.squared_h1_norm(&p.mesh, &p.bases),
            epsilon = 1e-10
        );
    }

    #[test]
    fn trim_restores_containers() {
        let mut p = unit_square();
        let root = *p.mesh.roots().iter().next().unwrap();

        let [l, r] = p.bisect(root, true);
        assert!(p.rhs.has(l) && p.rhs.has(r));

        let removed = p.trim(root);
        assert_eq!(removed.len(), 2);
        assert!(!p.rhs.has(l) && !p.rhs.has(r));
        assert!(p.rhs.has(root));
        assert!(p.mesh.is_leaf(root));
    }

    #[test]
    fn make_conform_keeps_budgets() {
        let mut p = unit_square();
        let root = *p.mesh.roots().iter().next().unwrap();

        let [_, r] = p.bisect(root, true);
        let [_, rr] = p.bisect(r, true);
        p.bisect(rr, true);
        let bisected = p.make_conform();
        assert!(!bisected.is_empty());
        assert!(p.mesh.is_conform(true));

        let report = p.solve().unwrap();
        assert_eq!(p.handler.len(), p.mesh.leaves().len());
        assert!(p.mesh.leaves().iter().all(|l| p.handler.find(*l).dof() == LINEAR));
        assert!(report.num_dofs() > 0);
        assert!(p.mesh.leaves().iter().all(|l| p.sol.has(*l)));
    }

    #[test]
    fn linearize() {
        let mut p = unit_square();
        p.refine_leaves_uniformly();
        let leaves: Vec<usize> = p.mesh.leaves().iter().copied().collect();
        p.handler
            .increase_set_to(&p.mesh, &leaves, QUADRATIC, p.bases.dim());
        p.solve().unwrap();

        p.linearize_solution();
        for elt_id in p.sol.defined_on() {
            let factor = 0.5_f64.powi(p.mesh.element(*elt_id).generation as i32);
            assert!(p.mesh.subtree_leaves(*elt_id).len() as f64 >= factor * p.sol.local_dim(*elt_id) as f64);
        }
    }
}
