/// Assignment of global DoF indices to the local slots of each Element
pub mod handler;

use json::JsonValue;

pub const CONSTANT: usize = 1;
pub const LINEAR: usize = 3;
pub const QUADRATIC: usize = 6;
pub const CUBIC: usize = 10;
pub const QUARTIC: usize = 15;
pub const QUINTIC: usize = 21;

/// Number of polynomials of total degree `<= n` in two variables: `(n+1)(n+2)/2`
pub const fn tri_num(n: usize) -> usize {
    (n + 1) * (n + 2) / 2
}

/// The largest polynomial degree that fits into a budget of `dof` coefficients (`None` if `dof == 0`)
pub fn degree(dof: usize) -> Option<usize> {
    if dof == 0 {
        return None;
    }
    let mut d = 0;
    while tri_num(d + 1) <= dof {
        d += 1;
    }
    Some(d)
}

/// The number of coefficients actually used by a budget of `dof` coefficients
pub fn dof_to_dim(dof: usize) -> usize {
    degree(dof).map(tri_num).unwrap_or(0)
}

/// Dimension of the space of polynomials of some (possibly non-existent) degree
pub fn degree_to_dim(degree: Option<usize>) -> usize {
    degree.map(tri_num).unwrap_or(0)
}

/// Global DoF indices of the local basis functions of one Element
///
/// Slot layout for an Element of degree `p`:
/// * `0..3`: vertex functions
/// * for each level `k` in `1..=p`:
///     * `k >= 3`: `k - 2` face functions (degree `k`)
///     * `k < p`: one edge function per local edge (degree `k + 1`)
///
/// `None` marks a slot that has no global DoF (boundary, or an edge that is not shared).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Dofs {
    dof: usize,
    indices: Vec<Option<usize>>,
}

impl Dofs {
    /// An unassigned set of slots for a budget of `dof` coefficients
    pub fn new(dof: usize) -> Self {
        Self {
            dof,
            indices: vec![None; dof_to_dim(dof)],
        }
    }

    /// Discard all indices and resize for a new budget
    pub fn reset(&mut self, dof: usize) {
        *self = Self::new(dof);
    }

    /// Change the budget while keeping existing indices
    pub fn resize(&mut self, dof: usize) {
        self.dof = dof;
        self.indices.resize(dof_to_dim(dof), None);
    }

    /// The requested number of coefficients
    pub fn dof(&self) -> usize {
        self.dof
    }

    /// The number of local slots
    pub fn dim(&self) -> usize {
        self.indices.len()
    }

    pub fn degree(&self) -> Option<usize> {
        degree(self.dim())
    }

    /// True if the Element carries edge functions of level `k`
    pub fn has_edge_level(&self, k: usize) -> bool {
        matches!(self.degree(), Some(p) if k < p)
    }

    pub fn values(&self) -> &[Option<usize>] {
        &self.indices
    }

    pub fn get(&self, slot: usize) -> Option<usize> {
        self.indices[slot]
    }

    pub fn vertex(&self, local_idx: usize) -> Option<usize> {
        self.indices[local_idx]
    }

    pub fn set_vertex(&mut self, local_idx: usize, index: Option<usize>) {
        assert!(local_idx < 3, "Triangles only have three vertices!");
        self.indices[local_idx] = index;
    }

    pub fn edge(&self, k: usize, local_idx: usize) -> Option<usize> {
        self.indices[edge_slot(k, local_idx)]
    }

    pub fn set_edge(&mut self, k: usize, local_idx: usize, index: Option<usize>) {
        assert!(local_idx < 3, "Triangles only have three edges!");
        assert!(
            self.has_edge_level(k),
            "Dofs of degree {:?} have no edge functions on level {}!",
            self.degree(),
            k
        );
        self.indices[edge_slot(k, local_idx)] = index;
    }

    pub fn face(&self, k: usize, i: usize) -> Option<usize> {
        self.indices[face_slot(k, i)]
    }

    pub fn set_face(&mut self, k: usize, i: usize, index: Option<usize>) {
        assert!(
            k >= 3 && i <= k - 3,
            "There is no face function {} on level {}!",
            i,
            k
        );
        self.indices[face_slot(k, i)] = index;
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::from(
            self.indices
                .iter()
                .map(|i| match i {
                    Some(i) => JsonValue::from(*i),
                    None => JsonValue::from(-1),
                })
                .collect::<Vec<_>>(),
        )
    }
}

/// Local slot of the edge function on level `k` along a local edge
pub const fn edge_slot(k: usize, local_idx: usize) -> usize {
    tri_num(k) + local_idx
}

/// Local slot of the `i`-th face function on level `k >= 3`
pub const fn face_slot(k: usize, i: usize) -> usize {
    tri_num(k) - (k - 2) + i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_degrees() {
        assert_eq!(degree(0), None);
        assert_eq!(degree(CONSTANT), Some(0));
        assert_eq!(degree(2), Some(0));
        assert_eq!(degree(LINEAR), Some(1));
        assert_eq!(degree(5), Some(1));
        assert_eq!(degree(QUADRATIC), Some(2));
        assert_eq!(degree(CUBIC), Some(3));
        assert_eq!(degree(QUARTIC), Some(4));
        assert_eq!(degree(QUINTIC), Some(5));

        for d in 0..10 {
            assert_eq!(degree(tri_num(d)), Some(d));
            assert_eq!(dof_to_dim(tri_num(d)), tri_num(d));
            assert_eq!(dof_to_dim(tri_num(d + 1) - 1), tri_num(d));
        }
        assert_eq!(dof_to_dim(0), 0);
        assert_eq!(degree_to_dim(None), 0);
    }

    #[test]
    fn slot_layout() {
        // vertex, edges of level 1, edges of level 2, face of level 3, edges of level 3, faces of level 4
        assert_eq!(edge_slot(1, 0), 3);
        assert_eq!(edge_slot(1, 2), 5);
        assert_eq!(edge_slot(2, 0), 6);
        assert_eq!(face_slot(3, 0), 9);
        assert_eq!(edge_slot(3, 0), 10);
        assert_eq!(face_slot(4, 0), 13);
        assert_eq!(face_slot(4, 1), 14);
        assert_eq!(edge_slot(4, 0), 15);

        // the last slot of every degree is the last face (or edge) function
        for p in 3..8 {
            assert_eq!(face_slot(p, p - 3), tri_num(p) - 1);
        }
    }

    #[test]
    fn dofs_accessors() {
        let mut g = Dofs::new(CUBIC);
        assert_eq!(g.dim(), 10);
        assert_eq!(g.degree(), Some(3));
        assert!(g.has_edge_level(2));
        assert!(!g.has_edge_level(3));

        g.set_vertex(1, Some(4));
        g.set_edge(2, 1, Some(7));
        g.set_face(3, 0, Some(9));
        assert_eq!(g.get(1), Some(4));
        assert_eq!(g.get(7), Some(7));
        assert_eq!(g.get(9), Some(9));
        assert_eq!(g.values().iter().flatten().count(), 3);

        g.resize(QUARTIC);
        assert_eq!(g.dim(), 15);
        assert_eq!(g.edge(2, 1), Some(7));
        assert_eq!(g.edge(3, 0), None);

        g.reset(8);
        assert_eq!(g.dof(), 8);
        assert_eq!(g.dim(), QUADRATIC);
        assert!(g.values().iter().all(|i| i.is_none()));
    }

    #[test]
    #[should_panic]
    fn edge_beyond_degree() {
        let mut g = Dofs::new(QUADRATIC);
        g.set_edge(2, 0, Some(0));
    }
}
