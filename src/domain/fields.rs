/// Operations on the coefficient vector of a single Element
pub mod local_poly;

use super::basis::Bases;
use super::dof::handler::DofHandler;
use super::dof::Dofs;
use super::mesh::{Mesh, MeshFileError};

#[cfg(feature = "json_export")]
use json::object;
use json::JsonValue;
use nalgebra::DVector;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, DerefMut};

/// A function given by one coefficient vector (w.r.t. the hierarchical basis) per Element
///
/// The function is *defined on* a set of Elements (usually some partition) and *available on*
/// every Element that carries a vector, including descendants the vectors were copied down to.
#[derive(Clone, Debug, Default)]
pub struct PiecewisePolynomial {
    vectors: BTreeMap<usize, DVector<f64>>,
    defined_on: BTreeSet<usize>,
    available_on: BTreeSet<usize>,
}

impl PiecewisePolynomial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_vector(&mut self, elt_id: usize, local: DVector<f64>, defined_on: bool) {
        assert!(
            !self.vectors.contains_key(&elt_id),
            "Element {} already has a local polynomial; cannot insert!",
            elt_id
        );
        self.vectors.insert(elt_id, local);
        if defined_on {
            self.defined_on.insert(elt_id);
        }
        self.available_on.insert(elt_id);
    }

    pub fn erase(&mut self, elt_id: usize) {
        assert!(
            self.vectors.remove(&elt_id).is_some(),
            "Element {} has no local polynomial; cannot erase!",
            elt_id
        );
        self.available_on.remove(&elt_id);
        self.defined_on.remove(&elt_id);
    }

    pub fn locally_at(&self, elt_id: usize) -> &DVector<f64> {
        self.vectors
            .get(&elt_id)
            .unwrap_or_else(|| panic!("Element {} has no local polynomial!", elt_id))
    }

    pub fn has(&self, elt_id: usize) -> bool {
        self.vectors.contains_key(&elt_id)
    }

    pub fn local_dim(&self, elt_id: usize) -> usize {
        self.locally_at(elt_id).len()
    }

    pub fn maximum_dim<'a>(&self, on: impl IntoIterator<Item = &'a usize>) -> usize {
        on.into_iter()
            .map(|elt_id| self.local_dim(*elt_id))
            .max()
            .unwrap_or(0)
    }

    pub fn defined_on(&self) -> &BTreeSet<usize> {
        &self.defined_on
    }

    pub fn available_on(&self) -> &BTreeSet<usize> {
        &self.available_on
    }

    pub fn iter(&self) -> impl Iterator<Item = (&usize, &DVector<f64>)> + '_ {
        self.vectors.iter()
    }

    // ----------------------------------------------------------------------------------------------------
    // Copying down the refinement tree
    // ----------------------------------------------------------------------------------------------------

    /// Restrict the polynomial on a refined Element to its two children
    pub fn copy_to_children(&mut self, mesh: &Mesh, bases: &Bases, parent_id: usize) {
        let v = self.locally_at(parent_id).clone();
        let [left, right] = mesh.active_children(parent_id).unwrap_or_else(|| {
            panic!("Element {} is a leaf; cannot copy to children!", parent_id)
        });

        self.insert_vector(left, local_poly::on_child(mesh, bases, parent_id, &v, 0), false);
        self.insert_vector(right, local_poly::on_child(mesh, bases, parent_id, &v, 1), false);
    }

    /// Make sure a vector is present on an Element by copying down from its closest ancestor that has one
    pub fn ensure_available(&mut self, mesh: &Mesh, bases: &Bases, elt_id: usize) {
        if self.has(elt_id) {
            return;
        }
        let parent = mesh.element(elt_id).parent.unwrap_or_else(|| {
            panic!("Neither Element {} nor its ancestors have a local polynomial!", elt_id)
        });
        self.ensure_available(mesh, bases, parent);
        if let Some([left, right]) = mesh.active_children(parent) {
            if !self.has(left) && !self.has(right) {
                self.copy_to_children(mesh, bases, parent);
            }
        }
    }

    /// Copy our vectors down to wherever `other` is available; returns those Elements
    ///
    /// Only valid if `other` is defined on a refinement of our partition.
    pub fn copy_to(&mut self, mesh: &Mesh, bases: &Bases, other: &PiecewisePolynomial) -> BTreeSet<usize> {
        let defined_on: Vec<usize> = self.defined_on.iter().copied().collect();
        defined_on
            .into_iter()
            .flat_map(|elt_id| self.copy_to_recursive(mesh, bases, other, elt_id))
            .collect()
    }

    fn copy_to_recursive(
        &mut self,
        mesh: &Mesh,
        bases: &Bases,
        other: &PiecewisePolynomial,
        elt_id: usize,
    ) -> BTreeSet<usize> {
        if other.has(elt_id) {
            return BTreeSet::from([elt_id]);
        }

        let [left, right] = mesh.active_children(elt_id).unwrap_or_else(|| {
            panic!(
                "Element {} is a leaf, but the other polynomial is not available on it; cannot copy!",
                elt_id
            )
        });
        if !self.has(left) {
            self.copy_to_children(mesh, bases, elt_id);
        }

        let mut available = self.copy_to_recursive(mesh, bases, other, left);
        available.extend(self.copy_to_recursive(mesh, bases, other, right));
        available
    }

    // ----------------------------------------------------------------------------------------------------
    // Norms on a subtree
    // ----------------------------------------------------------------------------------------------------

    /// Squared H1-seminorm on each Element below `elt_id` (inclusive) that carries a vector
    pub fn squared_h1_norms_on(&self, mesh: &Mesh, bases: &Bases, elt_id: usize) -> BTreeMap<usize, f64> {
        self.norms_recursive(mesh, elt_id, &|elt, v| local_poly::squared_h1_norm(mesh, bases, elt, v))
    }

    pub fn squared_l2_norms_on(&self, mesh: &Mesh, bases: &Bases, elt_id: usize) -> BTreeMap<usize, f64> {
        self.norms_recursive(mesh, elt_id, &|elt, v| local_poly::squared_l2_norm(mesh, bases, elt, v))
    }

    pub fn squared_h1_norm_on(&self, mesh: &Mesh, bases: &Bases, elt_id: usize) -> f64 {
        self.squared_h1_norms_on(mesh, bases, elt_id).values().sum()
    }

    pub fn squared_l2_norm_on(&self, mesh: &Mesh, bases: &Bases, elt_id: usize) -> f64 {
        self.squared_l2_norms_on(mesh, bases, elt_id).values().sum()
    }

    fn norms_recursive(
        &self,
        mesh: &Mesh,
        elt_id: usize,
        norm: &dyn Fn(usize, &DVector<f64>) -> f64,
    ) -> BTreeMap<usize, f64> {
        match self.vectors.get(&elt_id) {
            Some(v) => BTreeMap::from([(elt_id, norm(elt_id, v))]),
            None => {
                let [left, right] = mesh.active_children(elt_id).unwrap_or_else(|| {
                    panic!("Element {} is a leaf without a local polynomial!", elt_id)
                });
                let mut norms = self.norms_recursive(mesh, left, norm);
                norms.extend(self.norms_recursive(mesh, right, norm));
                norms
            }
        }
    }

    /// Squared H1-seminorm of `self - other` on each Element below `elt_id` where `other` is available
    pub fn squared_h1_norms_of_difference_on(
        &mut self,
        mesh: &Mesh,
        bases: &Bases,
        elt_id: usize,
        other: &PiecewisePolynomial,
    ) -> BTreeMap<usize, f64> {
        self.copy_to_recursive(mesh, bases, other, elt_id)
            .into_iter()
            .map(|elt| (elt, self.squared_h1_norm_of_local_difference(mesh, bases, elt, other)))
            .collect()
    }

    pub fn squared_h1_norm_of_difference_on(
        &mut self,
        mesh: &Mesh,
        bases: &Bases,
        elt_id: usize,
        other: &PiecewisePolynomial,
    ) -> f64 {
        self.squared_h1_norms_of_difference_on(mesh, bases, elt_id, other)
            .values()
            .sum()
    }

    fn squared_h1_norm_of_local_difference(
        &self,
        mesh: &Mesh,
        bases: &Bases,
        elt_id: usize,
        other: &PiecewisePolynomial,
    ) -> f64 {
        let diff = local_poly::minus(self.locally_at(elt_id), other.locally_at(elt_id));
        local_poly::squared_h1_norm(mesh, bases, elt_id, &diff)
    }

    // ----------------------------------------------------------------------------------------------------
    // Norms on the whole partition
    // ----------------------------------------------------------------------------------------------------

    pub fn squared_h1_norms(&self, mesh: &Mesh, bases: &Bases) -> BTreeMap<usize, f64> {
        self.defined_on
            .iter()
            .map(|elt| (*elt, local_poly::squared_h1_norm(mesh, bases, *elt, self.locally_at(*elt))))
            .collect()
    }

    pub fn squared_l2_norms(&self, mesh: &Mesh, bases: &Bases) -> BTreeMap<usize, f64> {
        self.defined_on
            .iter()
            .map(|elt| (*elt, local_poly::squared_l2_norm(mesh, bases, *elt, self.locally_at(*elt))))
            .collect()
    }

    pub fn squared_h1_norm(&self, mesh: &Mesh, bases: &Bases) -> f64 {
        self.squared_h1_norms(mesh, bases).values().sum()
    }

    pub fn squared_l2_norm(&self, mesh: &Mesh, bases: &Bases) -> f64 {
        self.squared_l2_norms(mesh, bases).values().sum()
    }

    /// Squared H1-seminorm of `self - other` per Element, where `other` lives on a refinement of our partition
    ///
    /// If we have nothing to compare against, this is the norm of `other` alone.
    pub fn squared_h1_norms_of_difference_with(
        &mut self,
        mesh: &Mesh,
        bases: &Bases,
        other: &PiecewisePolynomial,
    ) -> BTreeMap<usize, f64> {
        let elements = self.copy_to(mesh, bases, other);
        if elements.is_empty() {
            other.squared_h1_norms(mesh, bases)
        } else {
            elements
                .into_iter()
                .map(|elt| (elt, self.squared_h1_norm_of_local_difference(mesh, bases, elt, other)))
                .collect()
        }
    }

    pub fn squared_h1_norm_of_difference_with(
        &mut self,
        mesh: &Mesh,
        bases: &Bases,
        other: &PiecewisePolynomial,
    ) -> f64 {
        self.squared_h1_norms_of_difference_with(mesh, bases, other)
            .values()
            .sum()
    }

    /// Local vectors on a set of Elements with their vertices and types
    #[cfg(feature = "json_export")]
    pub fn to_json<'a>(&self, mesh: &Mesh, on: impl IntoIterator<Item = &'a usize>) -> JsonValue {
        JsonValue::from(
            on.into_iter()
                .map(|elt_id| {
                    let elt = mesh.element(*elt_id);
                    let v = self.locally_at(*elt_id);
                    object! {
                        "vertices": JsonValue::from(elt.vertices.to_vec()),
                        "type": elt.tri_type.map(|tt| tt.to_int()).unwrap_or(0),
                        "dim": v.len(),
                        "coefficients": JsonValue::from(v.iter().copied().collect::<Vec<f64>>()),
                    }
                })
                .collect::<Vec<_>>(),
        )
    }
}

// ----------------------------------------------------------------------------------------------------
// Right-hand side
// ----------------------------------------------------------------------------------------------------

/// The right-hand side `f` of `-Δu = f`, as a piecewise polynomial with a fixed number of coefficients
#[derive(Clone, Debug, Default)]
pub struct Rhs {
    dof: usize,
    poly: PiecewisePolynomial,
}

impl Rhs {
    pub fn new(dof: usize) -> Self {
        Self {
            dof,
            poly: PiecewisePolynomial::new(),
        }
    }

    /// Parse `{"dim": n, "Values": [[...], ...]}` with one row of `n` coefficients per input Element
    pub fn parse_values(rhs_json: &JsonValue, num_elements: usize) -> Result<(usize, Vec<DVector<f64>>), MeshFileError> {
        let dim = rhs_json["dim"]
            .as_usize()
            .ok_or_else(|| MeshFileError::Format("Rhs must have a numerical dim!".to_string()))?;

        if !rhs_json["Values"].is_array() || rhs_json["Values"].len() != num_elements {
            return Err(MeshFileError::Format(format!(
                "Rhs Values must be an Array with one entry per Element ({})!",
                num_elements
            )));
        }

        let values = rhs_json["Values"]
            .members()
            .enumerate()
            .map(|(elt_id, row)| {
                if !row.is_array() || row.len() != dim {
                    return Err(MeshFileError::Format(format!(
                        "Rhs of Element {} must have {} values!",
                        elt_id, dim
                    )));
                }
                row.members()
                    .map(|value| {
                        value.as_f64().ok_or_else(|| {
                            MeshFileError::Format(format!(
                                "Rhs of Element {} must be composed of numerical values!",
                                elt_id
                            ))
                        })
                    })
                    .collect::<Result<Vec<f64>, _>>()
                    .map(DVector::from_vec)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((dim, values))
    }

    pub fn dof(&self) -> usize {
        self.dof
    }

    /// Forget everything except the vectors on a set of Elements, which become the new partition
    pub fn retain_only(&mut self, elements: &BTreeSet<usize>) {
        let vectors = elements
            .iter()
            .map(|elt_id| {
                assert!(
                    self.poly.has(*elt_id),
                    "Rhs is not available on Element {}; cannot retain!",
                    elt_id
                );
                (*elt_id, self.poly.vectors[elt_id].clone())
            })
            .collect();

        self.poly = PiecewisePolynomial {
            vectors,
            defined_on: elements.clone(),
            available_on: elements.clone(),
        };
    }
}

impl Deref for Rhs {
    type Target = PiecewisePolynomial;

    fn deref(&self) -> &Self::Target {
        &self.poly
    }
}

impl DerefMut for Rhs {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.poly
    }
}

// ----------------------------------------------------------------------------------------------------
// Solution
// ----------------------------------------------------------------------------------------------------

/// A discrete solution: the global coefficient vector, scattered onto the Elements through their DoFs
///
/// Slots without a global DoF read as zero.
#[derive(Clone, Debug)]
pub struct Solution {
    global: DVector<f64>,
    dofs: BTreeMap<usize, Dofs>,
    poly: PiecewisePolynomial,
}

impl Default for Solution {
    fn default() -> Self {
        Self {
            global: DVector::zeros(0),
            dofs: BTreeMap::new(),
            poly: PiecewisePolynomial::new(),
        }
    }
}

impl Solution {
    pub fn new(global: DVector<f64>, handler: &DofHandler) -> Self {
        let mut sol = Self {
            global,
            dofs: BTreeMap::new(),
            poly: PiecewisePolynomial::new(),
        };
        for (elt_id, g) in handler.iter() {
            sol.insert_dofs(*elt_id, g.clone(), true);
        }
        sol
    }

    fn insert_dofs(&mut self, elt_id: usize, g: Dofs, defined_on: bool) {
        assert!(
            !self.dofs.contains_key(&elt_id),
            "Element {} already has solution DoFs; cannot insert!",
            elt_id
        );
        let local = self.index_solution(&g);
        self.dofs.insert(elt_id, g);
        self.poly.insert_vector(elt_id, local, defined_on);
    }

    /// Gather the local coefficients of an Element from the global vector
    pub fn index_solution(&self, g: &Dofs) -> DVector<f64> {
        DVector::from_iterator(
            g.dim(),
            g.values()
                .iter()
                .map(|index| index.map(|i| self.global[i]).unwrap_or(0.0)),
        )
    }

    pub fn global(&self) -> &DVector<f64> {
        &self.global
    }

    /// Forget an Element (including its DoFs, if it had any of its own)
    pub fn erase(&mut self, elt_id: usize) {
        self.poly.erase(elt_id);
        self.dofs.remove(&elt_id);
    }
}

impl Deref for Solution {
    type Target = PiecewisePolynomial;

    fn deref(&self) -> &Self::Target {
        &self.poly
    }
}

impl DerefMut for Solution {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.poly
    }
}
