use super::element::Conformity;
use super::tri_type::TriType;
use super::Mesh;

use tracing::{debug, info};

impl Mesh {
    // ----------------------------------------------------------------------------------------------------
    // Matching
    // ----------------------------------------------------------------------------------------------------

    /// Check (or force a re-check of) whether every leaf shares its bisection edge with the leaf across it
    pub fn is_matching(&mut self, force: bool) -> bool {
        if force || self.matching == Conformity::Unknown {
            let matching = self.leaves.iter().all(|leaf_id| {
                match self.finder.opposite_bisection(&self.elements[*leaf_id]) {
                    None => true,
                    Some((nbr_id, nbr_edge)) => {
                        nbr_edge == 1
                            && self.is_leaf(nbr_id)
                            && matches!(
                                self.finder.opposite_bisection(&self.elements[nbr_id]),
                                Some((back, _)) if back == *leaf_id
                            )
                    }
                }
            });
            self.matching = Conformity::from(matching);
        }
        self.matching == Conformity::Yes
    }

    /// Turn a conforming partition into a matching one, making the resulting leaves the new roots
    ///
    /// Every leaf is bisected twice and its four grandchildren are relabeled so that
    /// neighboring bisection edges coincide.
    pub fn make_matching(&mut self) {
        if self.is_matching(false) {
            return;
        }
        if !self.is_conform(false) {
            self.make_conform();
        }

        let leaves: Vec<usize> = self.leaves.iter().copied().collect();
        for leaf_id in leaves {
            let [left, right] = self.bisect(leaf_id, false);
            self.match_children(left, [2, 0, 1], [1, 2, 0]);
            self.match_children(right, [2, 0, 1], [1, 2, 0]);
        }

        self.reset_roots();
        self.conformity = Conformity::Yes;
        self.matching = Conformity::Yes;
        debug!("made mesh matching; {} roots", self.roots.len());
    }

    /// Bisect an Element and permute the vertices of its children
    fn match_children(&mut self, elt_id: usize, left_order: [usize; 3], right_order: [usize; 3]) {
        let children = self.bisect(elt_id, false);
        for (child, order) in children.into_iter().zip([left_order, right_order]) {
            let old = self.elements[child].vertices;
            self.elements[child].vertices = order.map(|i| old[i]);
            // a rotation keeps the directed edges; only the local indices change
            self.finder.register(&self.elements[child]);
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // Edge Orientations
    // ----------------------------------------------------------------------------------------------------

    /// Check (or force a re-check of) whether neighboring leaves have opposite orientations on their shared edges
    pub fn is_tri_types_correct(&mut self, force: bool) -> bool {
        if force || self.tri_types == Conformity::Unknown {
            let correct = self.leaves.iter().all(|leaf_id| {
                let elt = &self.elements[*leaf_id];
                let tt = match elt.tri_type {
                    Some(tt) => tt,
                    None => return false,
                };
                (0..3).all(|i| match self.finder.opposite(&elt.edge(i)) {
                    Some((nbr_id, nbr_edge)) if self.is_leaf(nbr_id) => {
                        match self.elements[nbr_id].tri_type {
                            Some(nbr_tt) => nbr_tt.bit(nbr_edge) != tt.bit(i),
                            None => false,
                        }
                    }
                    _ => true,
                })
            });
            self.tri_types = Conformity::from(correct);
        }
        self.tri_types == Conformity::Yes
    }

    /// Assign edge orientations to the roots such that neighbors disagree on every shared edge
    ///
    /// Roots are visited in order; an edge shared with a root of smaller id gets the negation
    /// of that root's orientation, all other edges are `false`.
    pub fn make_tri_types_correct(&mut self) {
        self.reset_roots();

        let roots: Vec<usize> = self.roots.iter().copied().collect();
        for root_id in roots {
            let mut tt = TriType::default();
            for i in 0..3 {
                if let Some((nbr_id, nbr_edge)) = self.finder.opposite(&self.elements[root_id].edge(i)) {
                    if nbr_id < root_id {
                        let nbr_tt = self.tri_type(nbr_id);
                        tt.set_bit(i, !nbr_tt.bit(nbr_edge));
                    }
                }
            }
            self.elements[root_id].tri_type = Some(tt);
        }

        self.tri_types = Conformity::Yes;
    }

    /// Bring a freshly loaded Mesh into the state required by the solver:
    /// conforming, matching, with boundary Vertices and consistent edge orientations
    pub fn normalize(&mut self) {
        self.reset_roots();
        self.make_conform();
        self.make_matching();
        self.determine_boundary_vertices();
        self.make_tri_types_correct();
        info!(
            "mesh normalized: {} roots, {} vertices",
            self.roots.len(),
            self.vertices.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::super::space::Point;
    use super::super::tests::unit_square;
    use super::*;

    fn single_triangle() -> Mesh {
        Mesh::new(
            vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0), Point::new(0.0, 1.0)],
            vec![([0, 1, 2], None)],
        )
    }

    #[test]
    fn unit_square_is_matching() {
        let mut mesh = unit_square();
        assert!(mesh.is_matching(true));

        mesh.make_matching();
        // already matching: nothing happens
        assert_eq!(mesh.elements.len(), 2);
    }

    #[test]
    fn make_matching_non_matching_pair() {
        // two triangles sharing the diagonal, but the second one bisects a boundary edge first
        let mut mesh = Mesh::new(
            vec![
                Point::new(0.0, 0.0),
                Point::new(1.0, 0.0),
                Point::new(1.0, 1.0),
                Point::new(0.0, 1.0),
            ],
            vec![([1, 2, 0], None), ([0, 2, 3], None)],
        );
        assert!(!mesh.is_matching(true));

        mesh.make_matching();
        assert_eq!(mesh.leaves().len(), 8);
        assert_eq!(mesh.roots(), mesh.leaves());
        assert!(mesh.is_conform(true));
        assert!(mesh.is_matching(true));

        let total: f64 = mesh.leaves().iter().map(|l| mesh.area(*l)).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn single_triangle_matching() {
        let mut mesh = single_triangle();
        // a lone triangle has no neighbors, so it is trivially matching
        assert!(mesh.is_matching(true));
    }

    #[test]
    fn l_shape_normalization() {
        let mut mesh = Mesh::from_file("./test_input/l_shape.json").unwrap();
        mesh.normalize();

        assert!(mesh.is_conform(true));
        assert!(mesh.is_matching(true));
        assert!(mesh.is_tri_types_correct(true));
        assert_eq!(mesh.roots(), mesh.leaves());

        let total: f64 = mesh.leaves().iter().map(|l| mesh.area(*l)).sum();
        assert!((total - 3.0).abs() < 1e-12);

        // the input is already matching, so every vertex lies on the boundary of the L
        assert_eq!(mesh.roots().len(), 6);
        assert!(mesh.vertices.iter().all(|v| v.boundary));

        // the re-entrant corner stays on the boundary, the center of the upper right square is interior
        let corner = mesh.vertex_at(&Point::new(0.0, 0.0)).unwrap();
        mesh.bisect(0, true);
        mesh.determine_boundary_vertices();
        assert!(mesh.vertices[corner].boundary);
        let center = mesh.vertex_at(&Point::new(0.5, 0.5)).unwrap();
        assert!(!mesh.vertices[center].boundary);
    }

    #[test]
    fn tri_types_survive_refinement() {
        let mut mesh = Mesh::from_file("./test_input/l_shape.json").unwrap();
        mesh.normalize();

        for _ in 0..3 {
            let first = *mesh.leaves().iter().next().unwrap();
            mesh.bisect(first, true);
            mesh.make_conform();
        }

        assert!(mesh.is_conform(true));
        assert!(mesh.is_tri_types_correct(true));
    }

    #[test]
    fn tri_types_detect_conflicts() {
        let mut mesh = unit_square();
        mesh.make_tri_types_correct();
        assert!(mesh.is_tri_types_correct(true));
        assert_ne!(
            mesh.tri_type(0).bit(1),
            mesh.tri_type(1).bit(1),
        );

        mesh.elements[1].tri_type = Some(TriType::new(false, false, false));
        mesh.elements[0].tri_type = Some(TriType::new(false, false, false));
        assert!(!mesh.is_tri_types_correct(true));
    }
}
