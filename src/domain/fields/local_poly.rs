use crate::domain::basis::Bases;
use crate::domain::mesh::Mesh;

use nalgebra::DVector;

/// `v1 - v2`, padding the shorter vector with zeros
pub fn minus(v1: &DVector<f64>, v2: &DVector<f64>) -> DVector<f64> {
    let mut res = padded(v1, v1.len().max(v2.len()));
    for (i, b) in v2.iter().enumerate() {
        res[i] -= b;
    }
    res
}

/// `v1 + v2`, padding the shorter vector with zeros
pub fn plus(v1: &DVector<f64>, v2: &DVector<f64>) -> DVector<f64> {
    let mut res = padded(v1, v1.len().max(v2.len()));
    for (i, b) in v2.iter().enumerate() {
        res[i] += b;
    }
    res
}

/// A copy of `v` extended (or truncated) to `len` entries
pub fn padded(v: &DVector<f64>, len: usize) -> DVector<f64> {
    let mut res = DVector::zeros(len);
    let n = v.len().min(len);
    res.rows_mut(0, n).copy_from(&v.rows(0, n));
    res
}

/// The coefficients of a local polynomial on one of an Element's children (0: left, 1: right)
pub fn on_child(mesh: &Mesh, bases: &Bases, elt_id: usize, v: &DVector<f64>, side: usize) -> DVector<f64> {
    assert!(
        mesh.active_children(elt_id).is_some(),
        "Element {} is a leaf; cannot restrict to a child!",
        elt_id
    );
    bases.transfer_corner(mesh.tri_type(elt_id), side, v.len(), v.len()) * v
}

/// `vᵀ A_K v`
pub fn squared_h1_norm(mesh: &Mesh, bases: &Bases, elt_id: usize, v: &DVector<f64>) -> f64 {
    let a = bases.stiffness(mesh.tri_type(elt_id), &mesh.element_points(elt_id), v.len());
    v.dot(&(a * v))
}

/// `vᵀ M_K v`
pub fn squared_l2_norm(mesh: &Mesh, bases: &Bases, elt_id: usize, v: &DVector<f64>) -> f64 {
    let m = bases.mass(mesh.tri_type(elt_id), &mesh.element_points(elt_id), v.len(), v.len());
    v.dot(&(m * v))
}

/// `∫_K` of the local polynomial: `v · b_K`
pub fn integral(mesh: &Mesh, bases: &Bases, elt_id: usize, v: &DVector<f64>) -> f64 {
    v.dot(&bases.integrals(mesh.tri_type(elt_id), &mesh.element_points(elt_id), v.len()))
}
