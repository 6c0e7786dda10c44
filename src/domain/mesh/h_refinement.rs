use super::element::{Conformity, Element};
use super::space::Point;
use super::Mesh;
use crate::domain::dof::handler::DofHandler;

use smallvec::SmallVec;
use std::collections::BTreeSet;
use tracing::{debug, trace};

impl Mesh {
    // ----------------------------------------------------------------------------------------------------
    // Bisection and Trimming
    // ----------------------------------------------------------------------------------------------------

    /// Bisect a leaf along the edge opposite of its newest vertex, returning the ids of its `[left, right]` children
    ///
    /// Children are `{new, v0, v1}` (left) and `{new, v2, v0}` (right). An Element which was previously
    /// trimmed gets its old children back. If `check_boundary` is set and there is no Element across the
    /// bisection edge, the new Vertex is marked as a boundary Vertex.
    ///
    /// The result is not necessarily conforming.
    pub fn bisect(&mut self, elt_id: usize, check_boundary: bool) -> [usize; 2] {
        assert!(
            self.is_leaf(elt_id),
            "Element {} is not a leaf; cannot bisect!",
            elt_id
        );

        let children = match self.elements[elt_id].children {
            Some(children) => children,
            None => self.create_children(elt_id, check_boundary),
        };

        self.leaves.remove(&elt_id);
        for child in children {
            self.leaves.insert(child);
            self.finder.register(&self.elements[child]);
        }

        self.conformity = Conformity::Unknown;
        self.matching = Conformity::Unknown;
        self.tri_types = Conformity::Unknown;

        trace!("bisected element {} into {:?}", elt_id, children);
        children
    }

    fn create_children(&mut self, elt_id: usize, check_boundary: bool) -> [usize; 2] {
        let new_vertex = self.bisection_vertex(elt_id, check_boundary);

        let parent = &self.elements[elt_id];
        let [v0, v1, v2] = parent.vertices;
        let tri_type = parent.tri_type;
        let generation = parent.generation + 1;
        let origin = parent.origin;
        let child_area = parent.area / 2.0;

        let left_id = self.elements.len();
        let right_id = left_id + 1;

        self.elements.push(Element::new(
            left_id,
            [new_vertex, v0, v1],
            Some(elt_id),
            tri_type.map(|tt| tt.left()),
            child_area,
            generation,
            origin,
        ));
        self.elements.push(Element::new(
            right_id,
            [new_vertex, v2, v0],
            Some(elt_id),
            tri_type.map(|tt| tt.right()),
            child_area,
            generation,
            origin,
        ));

        self.elements[elt_id].children = Some([left_id, right_id]);
        [left_id, right_id]
    }

    /// Find (or create) the midpoint of an Element's bisection edge
    fn bisection_vertex(&mut self, elt_id: usize, check_boundary: bool) -> usize {
        let elt = &self.elements[elt_id];
        let nbr = self.finder.opposite_bisection(elt);

        // the neighbor may already have been split along this edge
        if let Some((nbr_id, nbr_edge)) = nbr {
            if let Some([nbr_left, nbr_right]) = self.active_children(nbr_id) {
                let existing = match nbr_edge {
                    1 => Some(self.elements[nbr_left].vertices[0]),
                    0 => self
                        .active_children(nbr_left)
                        .map(|[ll, _]| self.elements[ll].vertices[0]),
                    2 => self
                        .active_children(nbr_right)
                        .map(|[rl, _]| self.elements[rl].vertices[0]),
                    _ => unreachable!(),
                };
                if let Some(vertex_id) = existing {
                    return vertex_id;
                }
            }
        }

        // sum the endpoints in a fixed order so that both sides produce the same coordinates
        let [_, v1, v2] = elt.vertices;
        let (first, second) = if v1 < v2 { (v1, v2) } else { (v2, v1) };
        let midpoint = Point::between(&self.vertices[first].coords, &self.vertices[second].coords);

        self.vertex_or_insert(midpoint, check_boundary && nbr.is_none())
    }

    /// Remove all descendants of an Element from the partition, making it a leaf again
    ///
    /// Returns the ids of the removed Elements (deepest first). Child records are kept
    /// so that a later bisection of the Element reproduces the same children.
    pub fn trim(&mut self, elt_id: usize) -> Vec<usize> {
        assert!(
            !self.is_leaf(elt_id) && self.elements[elt_id].children.is_some(),
            "Element {} is a leaf; cannot trim!",
            elt_id
        );

        let mut removed = Vec::new();
        self.trim_descendants(elt_id, &mut removed);

        self.leaves.insert(elt_id);
        self.finder.register(&self.elements[elt_id]);

        self.conformity = Conformity::Unknown;
        self.matching = Conformity::Unknown;
        self.tri_types = Conformity::Unknown;

        trace!("trimmed element {} ({} descendants)", elt_id, removed.len());
        removed
    }

    fn trim_descendants(&mut self, elt_id: usize, removed: &mut Vec<usize>) {
        if let Some(children) = self.elements[elt_id].children {
            for child in children {
                if !self.is_leaf(child) {
                    self.trim_descendants(child, removed);
                }
                self.leaves.remove(&child);
                self.finder.remove(&self.elements[child]);
                removed.push(child);
            }
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // Conformity
    // ----------------------------------------------------------------------------------------------------

    /// True if a neighbor of this leaf was bisected along the shared edge
    pub fn has_hanging_vertex(&self, elt_id: usize) -> bool {
        self.elements[elt_id].edges().iter().any(|edge| {
            matches!(
                self.finder.opposite(edge),
                Some((nbr_id, 1)) if !self.is_leaf(nbr_id)
            )
        })
    }

    /// Check (or force a re-check of) whether any leaf has a hanging vertex
    pub fn is_conform(&mut self, force: bool) -> bool {
        if force || self.conformity == Conformity::Unknown {
            let conform = !self.leaves.iter().any(|l| self.has_hanging_vertex(*l));
            self.conformity = Conformity::from(conform);
        }
        self.conformity == Conformity::Yes
    }

    /// Bisect leaves until there are no hanging vertices left
    ///
    /// Returns the ids of the bisected Elements in the order they were bisected.
    pub fn make_conform(&mut self) -> Vec<usize> {
        let mut worklist: BTreeSet<usize> = self
            .leaves
            .iter()
            .copied()
            .filter(|l| self.has_hanging_vertex(*l))
            .collect();

        let mut bisected = Vec::new();
        while let Some(elt_id) = worklist.pop_first() {
            if !self.is_leaf(elt_id) {
                continue;
            }

            let children = self.bisect(elt_id, false);
            bisected.push(elt_id);

            for child in children {
                if self.has_hanging_vertex(child) {
                    worklist.insert(child);
                }
            }

            for edge in self.elements[elt_id].edges() {
                if let Some((nbr_id, _)) = self.finder.opposite(&edge) {
                    if self.is_leaf(nbr_id) && self.has_hanging_vertex(nbr_id) {
                        worklist.insert(nbr_id);
                    }
                }
            }
        }

        if !bisected.is_empty() {
            debug!(
                "made mesh conforming with {} additional bisections",
                bisected.len()
            );
        }
        self.conformity = Conformity::Yes;
        bisected
    }

    // ----------------------------------------------------------------------------------------------------
    // Conforming Refinement with DoF transfer
    // ----------------------------------------------------------------------------------------------------

    /// Refine a leaf while keeping the Mesh conforming; DoFs are handed down to the new Elements
    ///
    /// Returns the ids of all Elements that were bisected (parents before their children).
    pub fn refine_element(&mut self, elt_id: usize, handler: &mut DofHandler) -> Vec<usize> {
        let mut bisected = Vec::new();
        self.refine_element_recursive(elt_id, handler, &mut bisected);
        bisected
    }

    fn refine_element_recursive(
        &mut self,
        elt_id: usize,
        handler: &mut DofHandler,
        bisected: &mut Vec<usize>,
    ) {
        assert!(
            self.is_leaf(elt_id),
            "Element {} is not a leaf; cannot refine!",
            elt_id
        );

        match self.bisection_neighbor(elt_id) {
            // bisection edge on the boundary
            None => {
                self.bisect(elt_id, true);
                bisected.push(elt_id);
                handler.transfer_to_children(self, elt_id);
            }
            // shared bisection edge
            Some((nbr_id, 1)) => {
                assert!(
                    self.is_leaf(nbr_id),
                    "Element {} has a hanging vertex; cannot refine a non-conforming mesh!",
                    elt_id
                );
                self.bisect(elt_id, true);
                let nbr_children = self.bisect(nbr_id, true);
                bisected.extend([elt_id, nbr_id]);

                let nbr_dim = handler.detect_dim(self, nbr_id);
                for child in nbr_children {
                    handler.construct(child, nbr_dim);
                }
                handler.transfer_to_children(self, elt_id);
                handler.transfer_to_children(self, nbr_id);
            }
            // the neighbor has to be refined first
            Some((nbr_id, _)) => {
                self.refine_element_recursive(nbr_id, handler, bisected);

                let (nbr_child, nbr_child_edge) = self
                    .bisection_neighbor(elt_id)
                    .expect("Neighbor disappeared during refinement; mesh is corrupt!");
                assert_eq!(
                    nbr_child_edge, 1,
                    "Bisection edges do not line up after refining the neighbor; mesh is not matching!"
                );

                self.bisect(elt_id, true);
                let nbr_grandchildren = self.bisect(nbr_child, true);
                bisected.extend([elt_id, nbr_child]);

                let nbr_child_dim = handler.detect_dim(self, nbr_child);
                for grandchild in nbr_grandchildren {
                    handler.construct(grandchild, nbr_child_dim);
                }
                handler.transfer_to_children(self, elt_id);
                handler.transfer_to_children(self, nbr_child);
            }
        }
    }

    /// Conforming refinement of a set of leaves
    ///
    /// Returns the leaves that were created by the refinement, and the ids of all bisected Elements
    pub fn refine<'a>(
        &mut self,
        elements: impl IntoIterator<Item = &'a usize>,
        handler: &mut DofHandler,
    ) -> (BTreeSet<usize>, Vec<usize>) {
        assert!(
            self.is_conform(false),
            "Mesh is not conforming; cannot refine!"
        );

        let mut bisected = Vec::new();
        for elt_id in elements {
            if self.is_leaf(*elt_id) {
                self.refine_element_recursive(*elt_id, handler, &mut bisected);
            }
        }

        let new_leaves = bisected
            .iter()
            .filter_map(|b| self.elements[*b].children)
            .flatten()
            .filter(|c| self.is_leaf(*c))
            .collect();

        self.conformity = Conformity::Yes;
        (new_leaves, bisected)
    }

    /// Bisect every leaf twice (plus whatever is needed to remain conforming)
    ///
    /// Returns the ids of all Elements that were bisected
    pub fn refine_leaves_uniformly(&mut self, handler: &mut DofHandler) -> Vec<usize> {
        let leaves: Vec<usize> = self.leaves.iter().copied().collect();
        let (_, mut bisected) = self.refine(&leaves, handler);

        let children: SmallVec<[usize; 64]> = leaves
            .iter()
            .filter_map(|l| self.elements[*l].children)
            .flatten()
            .collect();
        let (_, more_bisected) = self.refine(&children, handler);
        bisected.extend(more_bisected);

        debug!(
            "uniform refinement: {} -> {} leaves",
            leaves.len(),
            self.leaves.len()
        );
        bisected
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::unit_square;
    use super::*;
    use crate::domain::dof::LINEAR;

    #[test]
    fn bisect_shares_midpoints() {
        let mut mesh = unit_square();
        let [l0, r0] = mesh.bisect(0, true);
        let [l1, r1] = mesh.bisect(1, true);

        assert_eq!(mesh.vertices.len(), 5);
        assert_eq!(mesh.element(l0).vertices[0], mesh.element(l1).vertices[0]);
        assert_eq!(mesh.element(l0).vertices, [4, 1, 2]);
        assert_eq!(mesh.element(r0).vertices, [4, 0, 1]);
        assert_eq!(mesh.element(r1).vertices, [4, 2, 3]);

        // the shared bisection edge is interior
        assert!(!mesh.vertices[4].boundary);
        assert_eq!(mesh.leaves().len(), 4);
        for child in [l0, r0, l1, r1] {
            assert!((mesh.area(child) - 0.25).abs() < 1e-15);
            assert_eq!(mesh.element(child).generation, 1);
        }
        assert_eq!(mesh.tri_type(l0), mesh.tri_type(0).left());
        assert_eq!(mesh.tri_type(r1), mesh.tri_type(1).right());
    }

    #[test]
    fn bisect_boundary_vertex() {
        let mut mesh = unit_square();
        let [l, _] = mesh.bisect(0, true);
        let [ll, _] = mesh.bisect(l, true);

        let new_vertex = mesh.element(ll).vertices[0];
        assert_eq!(mesh.vertices[new_vertex].coords, Point::new(1.0, 0.5));
        assert!(mesh.vertices[new_vertex].boundary);
    }

    #[test]
    fn children_area_sums_to_parent() {
        let mut mesh = unit_square();
        mesh.make_conform();
        let mut frontier = vec![0, 1];
        for _ in 0..4 {
            let mut next = Vec::new();
            for elt in frontier {
                let [l, r] = mesh.bisect(elt, true);
                let parent_area = mesh.area(elt);
                let child_areas = mesh.area(l) + mesh.area(r);
                assert!((parent_area - child_areas).abs() < 1e-15);
                next.extend([l, r]);
            }
            frontier = next;
        }

        let total: f64 = mesh.leaves().iter().map(|l| mesh.area(*l)).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn hanging_vertices() {
        let mut mesh = unit_square();
        assert!(mesh.is_conform(true));

        mesh.bisect(0, true);
        assert!(mesh.has_hanging_vertex(1));
        assert!(!mesh.is_conform(false));

        let bisected = mesh.make_conform();
        assert_eq!(bisected, vec![1]);
        assert!(mesh.is_conform(true));
    }

    #[test]
    fn conformity_closure() {
        let mut mesh = unit_square();
        mesh.bisect(0, true);
        mesh.make_conform();

        // repeatedly refine towards the corner at (1, 0)
        for _ in 0..6 {
            let corner_leaf = *mesh
                .leaves()
                .iter()
                .find(|l| {
                    mesh.element(**l)
                        .vertices
                        .iter()
                        .any(|v| mesh.vertices[*v].coords == Point::new(1.0, 0.0))
                })
                .unwrap();
            mesh.bisect(corner_leaf, true);
            mesh.make_conform();
            assert!(mesh.is_conform(true));
        }

        let total: f64 = mesh.leaves().iter().map(|l| mesh.area(*l)).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn trim_restores_partition() {
        let mut mesh = unit_square();
        let leaves_before = mesh.leaves().clone();
        let num_vertices = mesh.vertices.len();

        let [l, r] = mesh.bisect(0, true);
        let [ll, lr] = mesh.bisect(l, true);
        let removed = mesh.trim(0);

        assert_eq!(removed, vec![ll, lr, l, r]);
        assert_eq!(mesh.leaves(), &leaves_before);
        assert!(mesh.is_conform(true));
        assert_eq!(mesh.bisection_neighbor(1), Some((0, 1)));
        assert_eq!(mesh.bisection_neighbor(0), Some((1, 1)));

        // bisecting again re-uses the same children and vertices
        assert_eq!(mesh.bisect(0, true), [l, r]);
        assert_eq!(mesh.vertices.len(), num_vertices + 2);
    }

    #[test]
    #[should_panic]
    fn trim_leaf() {
        let mut mesh = unit_square();
        mesh.trim(0);
    }

    #[test]
    #[should_panic]
    fn bisect_non_leaf() {
        let mut mesh = unit_square();
        mesh.bisect(0, true);
        mesh.bisect(0, true);
    }

    #[test]
    fn conforming_refinement() {
        let mut mesh = unit_square();
        mesh.determine_boundary_vertices();
        let mut handler = DofHandler::new();
        handler.determine_uniform(&mesh, mesh.leaves().clone(), LINEAR);

        // both halves are refined together
        let (new_leaves, bisected) = mesh.refine(&[0], &mut handler);
        assert_eq!(bisected, vec![0, 1]);
        assert_eq!(new_leaves.len(), 4);
        assert!(mesh.is_conform(true));

        // refining one of the quarters forces its neighbor to be refined as well
        let quarter = *new_leaves.iter().next().unwrap();
        mesh.refine(&[quarter], &mut handler);
        assert!(mesh.is_conform(true));
        for leaf in mesh.leaves() {
            assert!(handler.has(*leaf));
        }
        assert_eq!(handler.recompute_num_dofs(), handler.num_dofs());
    }

    #[test]
    fn uniform_refinement() {
        let mut mesh = unit_square();
        mesh.determine_boundary_vertices();
        let mut handler = DofHandler::new();
        handler.determine_uniform(&mesh, mesh.leaves().clone(), LINEAR);

        mesh.refine_leaves_uniformly(&mut handler);
        assert_eq!(mesh.leaves().len(), 8);
        assert!(mesh.is_conform(true));

        mesh.refine_leaves_uniformly(&mut handler);
        assert_eq!(mesh.leaves().len(), 32);

        // one linear DoF per interior vertex of the uniform grid with h = 1/4
        assert_eq!(handler.recompute_num_dofs(), 9);
    }
}
