use super::{degree, degree_to_dim, Dofs, LINEAR};
use crate::domain::mesh::Mesh;
use crate::domain::IdTracker;

#[cfg(feature = "json_export")]
use json::object;
use json::JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Maps the local basis functions of the current partition onto global DoF indices
///
/// Vertex functions are shared by every Element touching a (non-boundary) Vertex.
/// Edge functions of level `k` are shared by the two Elements along an edge if both
/// carry them; otherwise (or on the boundary) they are left unassigned.
#[derive(Clone, Debug)]
pub struct DofHandler {
    element_dofs: BTreeMap<usize, Dofs>,
    vertex_dofs: BTreeMap<usize, Option<usize>>,
    counter: IdTracker,
    valid: bool,
}

impl Default for DofHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DofHandler {
    pub fn new() -> Self {
        Self {
            element_dofs: BTreeMap::new(),
            vertex_dofs: BTreeMap::new(),
            counter: IdTracker::new(0),
            valid: false,
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // Full (re)determination
    // ----------------------------------------------------------------------------------------------------

    /// Assign global indices to every `(Element, dof)` pair from scratch
    ///
    /// Afterwards the assigned indices are exactly `0..num_dofs()`
    pub fn determine(&mut self, mesh: &Mesh, element_dofs: impl IntoIterator<Item = (usize, usize)>) {
        self.counter = IdTracker::new(0);
        self.vertex_dofs.clear();
        self.element_dofs = element_dofs
            .into_iter()
            .map(|(elt_id, dof)| (elt_id, Dofs::new(dof)))
            .collect();

        let elt_ids: Vec<usize> = self.element_dofs.keys().copied().collect();
        for elt_id in elt_ids {
            let elt = mesh.element(elt_id);
            let mut g = self.element_dofs[&elt_id].clone();

            for (i, v) in elt.vertices.iter().enumerate().take(g.dim()) {
                let index = self.vertex_index(mesh, *v);
                g.set_vertex(i, index);
            }

            if let Some(p) = g.degree().filter(|p| *p >= 2) {
                for k in 1..=p {
                    if k >= 3 {
                        for i in 0..=(k - 3) {
                            g.set_face(k, i, Some(self.counter.next_id()));
                        }
                    }

                    if k < p {
                        for e in 0..3 {
                            if g.edge(k, e).is_some() {
                                continue;
                            }
                            let (nbr_id, nbr_edge) = match self.shared_edge_neighbor(mesh, elt_id, e, k) {
                                Some(nbr) => nbr,
                                None => continue,
                            };

                            if let Some(nbr_g) = self.element_dofs.get_mut(&nbr_id) {
                                let index = match nbr_g.edge(k, nbr_edge) {
                                    Some(index) => index,
                                    None => {
                                        let index = self.counter.next_id();
                                        nbr_g.set_edge(k, nbr_edge, Some(index));
                                        index
                                    }
                                };
                                g.set_edge(k, e, Some(index));
                            }
                        }
                    }
                }
            }

            self.element_dofs.insert(elt_id, g);
        }

        self.valid = true;
        debug!(
            "determined {} DoFs on {} elements",
            self.num_dofs(),
            self.element_dofs.len()
        );
    }

    /// Determine the DoFs with the same budget on every Element of a set
    pub fn determine_uniform(&mut self, mesh: &Mesh, elements: impl IntoIterator<Item = usize>, dof: usize) {
        self.determine(mesh, elements.into_iter().map(|elt_id| (elt_id, dof)));
    }

    /// Re-assign indices while keeping every Element's budget
    pub fn redetermine(&mut self, mesh: &Mesh) {
        let current: Vec<(usize, usize)> = self
            .element_dofs
            .iter()
            .map(|(elt_id, g)| (*elt_id, g.dof()))
            .collect();
        self.determine(mesh, current);
    }

    /// Determine the DoFs on a new set of Elements, each inheriting the size of its nearest mapped ancestor
    pub fn redetermine_on<'a>(&mut self, mesh: &Mesh, elements: impl IntoIterator<Item = &'a usize>) {
        let current: Vec<(usize, usize)> = elements
            .into_iter()
            .map(|elt_id| (*elt_id, self.detect_dim(mesh, *elt_id)))
            .collect();
        self.determine(mesh, current);
    }

    // ----------------------------------------------------------------------------------------------------
    // Local edits
    // ----------------------------------------------------------------------------------------------------

    /// Give an Element a fresh (unassigned) set of slots; invalidates the handler
    pub fn set(&mut self, elt_id: usize, dof: usize) {
        self.element_dofs.insert(elt_id, Dofs::new(dof));
        self.valid = false;
    }

    /// Resize an existing Element's slots, discarding its indices; invalidates the handler
    pub fn reset(&mut self, elt_id: usize, dof: usize) {
        self.find_mut(elt_id).reset(dof);
        self.valid = false;
    }

    /// Add unassigned slots for an Element that is not mapped yet
    pub fn construct(&mut self, elt_id: usize, dof: usize) {
        assert!(
            !self.has(elt_id),
            "Element {} already has DoFs; cannot construct!",
            elt_id
        );
        self.element_dofs.insert(elt_id, Dofs::new(dof));
    }

    pub fn erase(&mut self, elt_id: usize) {
        assert!(
            self.element_dofs.remove(&elt_id).is_some(),
            "Element {} has no DoFs; cannot erase!",
            elt_id
        );
        self.valid = false;
    }

    /// Remove every Element
    pub fn clear(&mut self) {
        self.element_dofs.clear();
        self.vertex_dofs.clear();
        self.counter = IdTracker::new(0);
        self.valid = false;
    }

    // ----------------------------------------------------------------------------------------------------
    // Refinement
    // ----------------------------------------------------------------------------------------------------

    /// Give the children of a bisected Element the same number of slots, re-using the parent's indices where possible
    ///
    /// The neighbor across the parent's bisection edge (if any) must have been bisected as well,
    /// and its children must already be mapped.
    pub fn copy_to_children(&mut self, mesh: &Mesh, parent_id: usize) {
        assert!(self.valid, "DoFs are not valid; cannot copy to children!");
        let [left_id, right_id] = mesh.active_children(parent_id).unwrap_or_else(|| {
            panic!("Element {} is a leaf; cannot copy DoFs to children!", parent_id)
        });

        let g = self.find(parent_id).clone();
        let mut left_g = Dofs::new(g.dim());
        let mut right_g = Dofs::new(g.dim());

        let left = mesh.element(left_id);
        let right = mesh.element(right_id);

        if g.dim() >= LINEAR {
            // newest vertex is shared by both children
            let new_vertex = self.vertex_index(mesh, left.vertices[0]);
            left_g.set_vertex(0, new_vertex);
            right_g.set_vertex(0, new_vertex);

            for i in 1..3 {
                left_g.set_vertex(i, self.find_vertex(left.vertices[i]));
                right_g.set_vertex(i, self.find_vertex(right.vertices[i]));
            }
        }

        let nbr = mesh.bisection_neighbor(parent_id).map(|(nbr_id, nbr_edge)| {
            assert!(
                nbr_edge == 1,
                "Element {} does not share its bisection edge with {}; cannot copy DoFs!",
                parent_id,
                nbr_id
            );
            mesh.active_children(nbr_id).unwrap_or_else(|| {
                panic!(
                    "Neighbor {} of {} has not been bisected; cannot copy DoFs!",
                    nbr_id, parent_id
                )
            })
        });

        if let Some(p) = g.degree().filter(|p| *p >= 2) {
            for k in 1..=p {
                if k >= 3 {
                    for i in 0..=(k - 3) {
                        left_g.set_face(k, i, g.face(k, i));
                        right_g.set_face(k, i, Some(self.counter.next_id()));
                    }
                }

                if k < p {
                    // outer edges of the children are edges of the parent
                    left_g.set_edge(k, 1, g.edge(k, 0));
                    right_g.set_edge(k, 1, g.edge(k, 2));

                    // the new interior edge
                    let interior = Some(self.counter.next_id());
                    left_g.set_edge(k, 0, interior);
                    right_g.set_edge(k, 2, interior);

                    let [nbr_left, nbr_right] = match nbr {
                        Some(nbr_children) => nbr_children,
                        None => continue,
                    };

                    // our left child meets the neighbor's right child, and vice versa
                    if let Some(nbr_right_g) = self.element_dofs.get(&nbr_right) {
                        if nbr_right_g.has_edge_level(k) {
                            left_g.set_edge(k, 2, nbr_right_g.edge(k, 0).or(g.edge(k, 1)));
                        }
                    }

                    let nbr_left_index = self
                        .element_dofs
                        .get(&nbr_left)
                        .filter(|nbr_left_g| nbr_left_g.has_edge_level(k))
                        .map(|nbr_left_g| nbr_left_g.edge(k, 2));
                    if let Some(index) = nbr_left_index {
                        right_g.set_edge(k, 0, index.or_else(|| Some(self.counter.next_id())));
                    }
                }
            }
        }

        self.element_dofs.insert(left_id, left_g);
        self.element_dofs.insert(right_id, right_g);
        self.valid = true;
    }

    /// [`DofHandler::copy_to_children`], then forget the parent
    pub fn transfer_to_children(&mut self, mesh: &Mesh, parent_id: usize) {
        self.copy_to_children(mesh, parent_id);
        self.element_dofs.remove(&parent_id);
    }

    // ----------------------------------------------------------------------------------------------------
    // Degree increases
    // ----------------------------------------------------------------------------------------------------

    /// Grow an Element's budget by `by` coefficients (truncated at the basis dimension)
    ///
    /// New face functions get fresh indices, new edge functions are shared with every
    /// neighbor that already carries the same level.
    pub fn increase_by(&mut self, mesh: &Mesh, elt_id: usize, by: usize, basis_dim: usize) {
        assert!(self.valid, "DoFs are not valid; cannot increase degree!");
        let mut g = self.find(elt_id).clone();

        if g.dof() + by > basis_dim {
            warn!(
                "truncating element {} to the maximum basis dimension {}",
                elt_id, basis_dim
            );
        }
        let stop_dof = (g.dof() + by).min(basis_dim);
        let start_degree = degree(g.dof()).map(|d| d + 1).unwrap_or(0);
        let stop_degree = match degree(stop_dof) {
            Some(d) => d,
            None => return,
        };
        g.resize(stop_dof);

        if stop_degree >= 2 {
            for k in start_degree.max(1)..=stop_degree {
                if k >= 3 {
                    for i in 0..=(k - 3) {
                        g.set_face(k, i, Some(self.counter.next_id()));
                    }
                }

                // edge functions of degree k live on level k - 1
                if k >= 2 {
                    for e in 0..3 {
                        if let Some((nbr_id, nbr_edge)) = self.shared_edge_neighbor(mesh, elt_id, e, k - 1) {
                            let index = Some(self.counter.next_id());
                            g.set_edge(k - 1, e, index);
                            let nbr_g = self.find_mut(nbr_id);
                            assert!(
                                nbr_g.edge(k - 1, nbr_edge).is_none(),
                                "Element {} already shares edge level {} with {}; DoFs are corrupt!",
                                nbr_id,
                                k - 1,
                                elt_id
                            );
                            nbr_g.set_edge(k - 1, nbr_edge, index);
                        }
                    }
                }
            }
        }

        self.element_dofs.insert(elt_id, g);
    }

    /// Grow an Element's budget up to `dof` coefficients
    pub fn increase_to(&mut self, mesh: &Mesh, elt_id: usize, dof: usize, basis_dim: usize) {
        let current = self.find(elt_id).dof();
        assert!(
            current <= dof,
            "Element {} already has {} coefficients; cannot increase to {}!",
            elt_id,
            current,
            dof
        );
        self.increase_by(mesh, elt_id, dof - current, basis_dim);
    }

    /// Raise an Element's polynomial degree by `by`
    pub fn increase_degree_by(&mut self, mesh: &Mesh, elt_id: usize, by: usize, basis_dim: usize) {
        let g = self.find(elt_id);
        let residue = g.dof() - g.dim();
        let target = g.degree().map(|d| d + by).or_else(|| by.checked_sub(1));
        let increase = (degree_to_dim(target) + residue).saturating_sub(g.dof());
        self.increase_by(mesh, elt_id, increase, basis_dim);
    }

    pub fn increase_set_by<'a>(
        &mut self,
        mesh: &Mesh,
        elements: impl IntoIterator<Item = &'a usize>,
        by: usize,
        basis_dim: usize,
    ) {
        for elt_id in elements {
            self.increase_by(mesh, *elt_id, by, basis_dim);
        }
    }

    pub fn increase_set_to<'a>(
        &mut self,
        mesh: &Mesh,
        elements: impl IntoIterator<Item = &'a usize>,
        dof: usize,
        basis_dim: usize,
    ) {
        for elt_id in elements {
            self.increase_to(mesh, *elt_id, dof, basis_dim);
        }
    }

    pub fn increase_set_degree_by<'a>(
        &mut self,
        mesh: &Mesh,
        elements: impl IntoIterator<Item = &'a usize>,
        by: usize,
        basis_dim: usize,
    ) {
        for elt_id in elements {
            self.increase_degree_by(mesh, *elt_id, by, basis_dim);
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // Queries
    // ----------------------------------------------------------------------------------------------------

    pub fn has(&self, elt_id: usize) -> bool {
        self.element_dofs.contains_key(&elt_id)
    }

    pub fn find(&self, elt_id: usize) -> &Dofs {
        self.element_dofs
            .get(&elt_id)
            .unwrap_or_else(|| panic!("Element {} has no DoFs!", elt_id))
    }

    fn find_mut(&mut self, elt_id: usize) -> &mut Dofs {
        self.element_dofs
            .get_mut(&elt_id)
            .unwrap_or_else(|| panic!("Element {} has no DoFs!", elt_id))
    }

    /// The global index of a Vertex function (`None` on the boundary or if the Vertex is unknown)
    pub fn find_vertex(&self, vertex_id: usize) -> Option<usize> {
        self.vertex_dofs.get(&vertex_id).copied().flatten()
    }

    /// Number of local slots of an Element, or of its closest mapped ancestor
    pub fn detect_dim(&self, mesh: &Mesh, elt_id: usize) -> usize {
        match self.element_dofs.get(&elt_id) {
            Some(g) => g.dim(),
            None => {
                let parent = mesh.element(elt_id).parent.unwrap_or_else(|| {
                    panic!(
                        "Neither Element {} nor any of its ancestors have DoFs!",
                        elt_id
                    )
                });
                self.detect_dim(mesh, parent)
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Number of global DoFs handed out so far
    pub fn num_dofs(&self) -> usize {
        self.counter.num_ids()
    }

    /// Count the distinct global indices, checking that they form the range `0..N`
    pub fn recompute_num_dofs(&self) -> usize {
        let indices: BTreeSet<usize> = self
            .element_dofs
            .values()
            .flat_map(|g| g.values().iter().flatten().copied())
            .collect();
        let n = indices.len();
        assert!(
            indices.iter().next_back().map(|max| max + 1).unwrap_or(0) == n,
            "Global DoF indices are not contiguous; {} indices up to {:?}!",
            n,
            indices.iter().next_back()
        );
        n
    }

    pub fn max_degree(&self) -> Option<usize> {
        self.element_dofs.values().filter_map(|g| g.degree()).max()
    }

    pub fn elements(&self) -> impl Iterator<Item = &usize> + '_ {
        self.element_dofs.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&usize, &Dofs)> + '_ {
        self.element_dofs.iter()
    }

    pub fn len(&self) -> usize {
        self.element_dofs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.element_dofs.is_empty()
    }

    /// The DoF map as JSON (one entry per Element with its vertices, type and global indices)
    #[cfg(feature = "json_export")]
    pub fn to_json(&self, mesh: &Mesh) -> JsonValue {
        JsonValue::from(
            self.element_dofs
                .iter()
                .map(|(elt_id, g)| {
                    let elt = mesh.element(*elt_id);
                    object! {
                        "element": *elt_id,
                        "vertices": JsonValue::from(elt.vertices.to_vec()),
                        "type": elt.tri_type.map(|tt| tt.to_int()).unwrap_or(0),
                        "dofs": g.to_json(),
                    }
                })
                .collect::<Vec<_>>(),
        )
    }

    #[cfg(not(feature = "json_export"))]
    pub fn to_json(&self, _mesh: &Mesh) -> JsonValue {
        JsonValue::Null
    }

    // ----------------------------------------------------------------------------------------------------
    // Helpers
    // ----------------------------------------------------------------------------------------------------

    /// The shared index of a Vertex function, created on first sight
    fn vertex_index(&mut self, mesh: &Mesh, vertex_id: usize) -> Option<usize> {
        if mesh.vertices[vertex_id].boundary {
            self.vertex_dofs.entry(vertex_id).or_insert(None);
            return None;
        }

        match self.vertex_dofs.get(&vertex_id) {
            Some(Some(index)) => Some(*index),
            _ => {
                let index = self.counter.next_id();
                self.vertex_dofs.insert(vertex_id, Some(index));
                Some(index)
            }
        }
    }

    /// The mapped neighbor across a local edge, if both sides carry edge functions of level `k`
    fn shared_edge_neighbor(&self, mesh: &Mesh, elt_id: usize, local_edge: usize, k: usize) -> Option<(usize, usize)> {
        let (nbr_id, nbr_edge) = mesh.neighbor(elt_id, local_edge)?;
        self.element_dofs
            .get(&nbr_id)
            .filter(|nbr_g| nbr_g.has_edge_level(k))
            .map(|_| (nbr_id, nbr_edge))
    }
}
