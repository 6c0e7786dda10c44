use super::Approximator;
use crate::domain::dof::{degree, dof_to_dim, CONSTANT, LINEAR};
use crate::domain::fields::PiecewisePolynomial;
use crate::domain::Partition;
use crate::math::{almost_equal, recip};

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info, trace};

/// A node of the near-best tree
///
/// Above the mesh roots, the tree is closed off by synthetic nodes: `Combination`s join two
/// nodes into one, and `Virtual` nodes (with zero error) pad out an odd number of nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeId {
    Mesh(usize),
    Combination(usize),
    Virtual(usize),
}

/// Result of a near-best run
#[derive(Clone, Debug)]
pub struct NearBestReport {
    /// Number of nodes of the final near-best tree (before trimming)
    pub nodes: usize,
    /// Squared error achieved on the root
    pub squared_error: f64,
    /// Number of coefficients assigned to each leaf of the resulting partition
    pub dofs: BTreeMap<usize, usize>,
}

/// Adaptive hp-approximation of a target function by the near-best tree algorithm
///
/// The tree is grown one node at a time along the largest modified error; every node keeps
/// track of the best hp-error of its subtree for a given number of coefficients. Afterwards,
/// subtrees that do not improve on their root's p-approximation are trimmed, and the DoF
/// budgets are committed to the partition's [`DofHandler`](crate::domain::dof::handler::DofHandler).
pub struct NearBest<'p> {
    partition: &'p mut Partition,
    target: &'p mut PiecewisePolynomial,
    approximator: Approximator,

    root: NodeId,
    leaves: BTreeSet<NodeId>,
    combinations: BTreeMap<usize, [NodeId; 2]>,
    virtuals: BTreeSet<usize>,
    /// Parents of synthetic nodes and of the mesh roots (mesh Elements otherwise know their own)
    parents: BTreeMap<NodeId, NodeId>,

    e: BTreeMap<NodeId, BTreeMap<Option<usize>, f64>>,
    ehp: BTreeMap<NodeId, BTreeMap<Option<usize>, f64>>,
    ehp_tilde: BTreeMap<NodeId, BTreeMap<Option<usize>, f64>>,
    e_tilde: BTreeMap<NodeId, f64>,
    q: BTreeMap<NodeId, f64>,
    r: BTreeMap<NodeId, usize>,
    t: BTreeMap<NodeId, NodeId>,
}

impl<'p> NearBest<'p> {
    /// Approximate `target` on `partition` until the squared error drops below `epsilon²`, or the tree has `max_n` nodes
    ///
    /// The partition's Mesh is refined (and afterwards trimmed) as needed; `target` is copied down
    /// to new Elements. On return, the partition's DoF handler holds one (unassigned) set of
    /// slots per leaf; it must be made conforming and redetermined before solving.
    pub fn run(
        partition: &'p mut Partition,
        target: &'p mut PiecewisePolynomial,
        epsilon: f64,
        max_n: usize,
    ) -> NearBestReport {
        assert!(max_n > 0, "Near-best tree must be allowed at least one node!");

        let mut nb = Self::new(partition, target);
        let (nodes, squared_error) = nb.grow(epsilon * epsilon, max_n);
        nb.remove_combined_roots();
        nb.trim();
        let dofs = nb.commit();

        info!(
            "near-best: {} nodes, squared error {:e}, {} leaves",
            nodes,
            squared_error,
            dofs.len()
        );
        NearBestReport {
            nodes,
            squared_error,
            dofs,
        }
    }

    fn new(partition: &'p mut Partition, target: &'p mut PiecewisePolynomial) -> Self {
        let mut nb = Self {
            partition,
            target,
            approximator: Approximator::new(),
            root: NodeId::Virtual(0),
            leaves: BTreeSet::new(),
            combinations: BTreeMap::new(),
            virtuals: BTreeSet::new(),
            parents: BTreeMap::new(),
            e: BTreeMap::new(),
            ehp: BTreeMap::new(),
            ehp_tilde: BTreeMap::new(),
            e_tilde: BTreeMap::new(),
            q: BTreeMap::new(),
            r: BTreeMap::new(),
            t: BTreeMap::new(),
        };
        nb.combine_roots();
        nb
    }

    // ----------------------------------------------------------------------------------------------------
    // Tree structure
    // ----------------------------------------------------------------------------------------------------

    /// Pair up the mesh roots (round by round) until a single root is left
    fn combine_roots(&mut self) {
        let mut pull: VecDeque<NodeId> = self
            .partition
            .mesh
            .roots()
            .iter()
            .map(|r| NodeId::Mesh(*r))
            .collect();
        assert!(!pull.is_empty(), "Mesh has no roots; cannot build near-best tree!");

        while pull.len() > 1 {
            let mut push = VecDeque::new();
            while let Some(left) = pull.pop_front() {
                let right = match pull.pop_front() {
                    Some(right) => right,
                    None => {
                        let v = self.virtuals.len();
                        self.virtuals.insert(v);
                        NodeId::Virtual(v)
                    }
                };
                push.push_back(self.combine(left, right));
            }
            pull = push;
        }

        self.root = pull[0];
        debug!(
            "combined mesh roots under {:?} ({} combinations, {} virtual nodes)",
            self.root,
            self.combinations.len(),
            self.virtuals.len()
        );
    }

    fn combine(&mut self, left: NodeId, right: NodeId) -> NodeId {
        let c = self.combinations.len();
        self.combinations.insert(c, [left, right]);
        let node = NodeId::Combination(c);
        self.parents.insert(left, node);
        self.parents.insert(right, node);
        node
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        match self.parents.get(&node) {
            Some(parent) => Some(*parent),
            None => match node {
                NodeId::Mesh(elt_id) => self.partition.mesh.element(elt_id).parent.map(NodeId::Mesh),
                _ => None,
            },
        }
    }

    fn children(&self, node: NodeId) -> [NodeId; 2] {
        match node {
            NodeId::Mesh(elt_id) => self
                .partition
                .mesh
                .active_children(elt_id)
                .unwrap_or_else(|| panic!("Element {} is a leaf; it has no children!", elt_id))
                .map(NodeId::Mesh),
            NodeId::Combination(c) => self.combinations[&c],
            NodeId::Virtual(_) => panic!("Virtual nodes have no children!"),
        }
    }

    /// True if the node cannot be split without bisecting
    fn is_tree_leaf(&self, node: NodeId) -> bool {
        match node {
            NodeId::Mesh(elt_id) => self.partition.mesh.is_leaf(elt_id),
            NodeId::Combination(_) => false,
            NodeId::Virtual(_) => true,
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // Per-node quantities
    // ----------------------------------------------------------------------------------------------------

    /// Squared error of the best approximation on a node with `dof` coefficients (memoized per degree)
    fn error(&mut self, node: NodeId, dof: usize) -> f64 {
        let deg = degree(dof);
        if let Some(e) = self.e.get(&node).and_then(|by_degree| by_degree.get(&deg)) {
            return *e;
        }

        let value = match node {
            NodeId::Virtual(_) => 0.0,
            NodeId::Combination(c) => {
                let [left, right] = self.combinations[&c];
                let dim = dof_to_dim(dof);
                let mut best = f64::MAX;
                for d1 in 0..=dim {
                    best = best.min(self.error(left, d1) + self.error(right, dim - d1));
                }
                best
            }
            NodeId::Mesh(elt_id) => self.approximator.error(
                &self.partition.mesh,
                &self.partition.bases,
                self.target,
                elt_id,
                dof,
            ),
        };

        self.e.entry(node).or_default().insert(deg, value);
        value
    }

    /// Number of coefficients assigned to a node (as stored, or derived from its children)
    fn r_forced(&mut self, node: NodeId) -> usize {
        if let Some(r) = self.r.get(&node) {
            return *r;
        }

        let r = if self.leaves.contains(&node) {
            CONSTANT
        } else {
            let [left, right] = self.children(node);
            self.r_forced(left) + self.r_forced(right)
        };
        self.r.insert(node, r);
        r
    }

    /// Number of coefficients of a node, clamped at the basis dimension
    fn r(&mut self, node: NodeId) -> usize {
        self.r_forced(node).min(self.partition.bases.dim())
    }

    fn ehp(&self, node: NodeId, dof: usize) -> f64 {
        lookup(&self.ehp, node, dof, "ehp")
    }

    fn ehp_tilde(&self, node: NodeId, dof: usize) -> f64 {
        lookup(&self.ehp_tilde, node, dof, "ehp_tilde")
    }

    fn set_ehp(&mut self, node: NodeId, dof: usize, value: f64) {
        self.ehp.entry(node).or_default().insert(degree(dof), value);
    }

    fn set_ehp_tilde(&mut self, node: NodeId, dof: usize, value: f64) {
        self.ehp_tilde.entry(node).or_default().insert(degree(dof), value);
    }

    fn error_on_root(&mut self) -> f64 {
        let r = self.r(self.root);
        self.ehp(self.root, r)
    }

    fn setup_root(&mut self) {
        let root = self.root;
        let e = self.error(root, CONSTANT);

        self.r.insert(root, CONSTANT);
        self.e_tilde.insert(root, e);
        self.set_ehp(root, CONSTANT, e);
        self.set_ehp_tilde(root, CONSTANT, e);
        self.q.insert(root, e);
        self.t.insert(root, root);
        self.leaves.insert(root);
    }

    fn setup_leaf(&mut self, node: NodeId) {
        let parent = self
            .parent(node)
            .unwrap_or_else(|| panic!("Near-best leaf {:?} has no parent; cannot set up!", node));
        let e = self.error(node, CONSTANT);
        let e_tilde = recip(e, self.e_tilde[&parent]);

        self.r.insert(node, CONSTANT);
        self.e_tilde.insert(node, e_tilde);
        self.set_ehp(node, CONSTANT, e);
        self.set_ehp_tilde(node, CONSTANT, e_tilde);
        self.q.insert(node, e_tilde);
        self.t.insert(node, node);
    }

    /// Forget everything known about a node
    fn forget(&mut self, node: NodeId) {
        if let NodeId::Mesh(elt_id) = node {
            self.approximator.forget(elt_id);
        }
        self.e.remove(&node);
        self.ehp.remove(&node);
        self.ehp_tilde.remove(&node);
        self.e_tilde.remove(&node);
        self.q.remove(&node);
        self.r.remove(&node);
        self.t.remove(&node);
    }

    // ----------------------------------------------------------------------------------------------------
    // Phases
    // ----------------------------------------------------------------------------------------------------

    /// Grow the near-best tree; returns the number of nodes and the squared error on the root
    fn grow(&mut self, squared_epsilon: f64, max_n: usize) -> (usize, f64) {
        self.setup_root();
        let root = self.root;
        let mut n = 1;

        if n < max_n && self.error_on_root() > squared_epsilon {
            loop {
                let node_n = self.t[&root];
                if let NodeId::Virtual(_) = node_n {
                    debug!("near-best: largest error on a virtual node; nothing left to refine");
                    break;
                }

                if let NodeId::Mesh(elt_id) = node_n {
                    if self.is_tree_leaf(node_n) {
                        self.partition.bisect(elt_id, true);
                    }
                    self.copy_target_to_children(elt_id);
                }

                let [left, right] = self.children(node_n);
                self.leaves.remove(&node_n);
                self.leaves.insert(left);
                self.leaves.insert(right);
                self.setup_leaf(left);
                self.setup_leaf(right);

                n += 1;
                if n > max_n || self.error_on_root() < squared_epsilon {
                    break;
                }

                let mut node = node_n;
                loop {
                    let r = self.r(node) + 1;
                    self.r.insert(node, r);
                    let r = self.r(node);

                    let [left, right] = self.children(node);
                    let (r_left, r_right) = (self.r(left), self.r(right));
                    let ehp = (self.ehp(left, r_left) + self.ehp(right, r_right)).min(self.error(node, r));
                    let ehp_tilde = recip(ehp, self.ehp_tilde(node, r - 1));
                    self.set_ehp(node, r, ehp);
                    self.set_ehp_tilde(node, r, ehp_tilde);

                    let x = if self.q[&right] > self.q[&left] { right } else { left };
                    let q = self.q[&x].min(ehp_tilde);
                    let t = self.t[&x];
                    self.q.insert(node, q);
                    self.t.insert(node, t);

                    trace!(
                        "near-best update {:?}: r = {}, ehp = {:e}, q = {:e}, t = {:?}",
                        node,
                        r,
                        ehp,
                        q,
                        t
                    );

                    if node == root {
                        break;
                    }
                    node = self
                        .parent(node)
                        .unwrap_or_else(|| panic!("Node {:?} is detached from the near-best root!", node));
                }
            }
        }

        let squared_error = self.error_on_root();
        debug!("near-best tree grown to {} nodes", n);
        (n, squared_error)
    }

    /// The target has to be available on a node's children before their errors can be computed
    fn copy_target_to_children(&mut self, elt_id: usize) {
        let [left, right] = self
            .partition
            .mesh
            .active_children(elt_id)
            .unwrap_or_else(|| panic!("Element {} is a leaf; cannot copy target!", elt_id));
        if self.target.has(elt_id) && !self.target.has(left) && !self.target.has(right) {
            self.target
                .copy_to_children(&self.partition.mesh, &self.partition.bases, elt_id);
        }
    }

    /// Remove all synthetic nodes, leaving the mesh roots as roots of the near-best tree
    fn remove_combined_roots(&mut self) {
        self.remove_combined_recursive(self.root);
        self.combinations.clear();
        self.virtuals.clear();
        self.parents.clear();
    }

    fn remove_combined_recursive(&mut self, node: NodeId) {
        match node {
            NodeId::Mesh(_) => {}
            NodeId::Virtual(v) => {
                self.leaves.remove(&node);
                self.virtuals.remove(&v);
                self.forget(node);
            }
            NodeId::Combination(c) => {
                let children = self.combinations[&c];
                if self.leaves.remove(&node) {
                    for child in children {
                        self.leaves.insert(child);
                        if let NodeId::Mesh(_) = child {
                            self.trim_node(child);
                        }
                    }
                }
                for child in children {
                    self.remove_combined_recursive(child);
                }
                self.forget(node);
            }
        }
    }

    /// Trim subtrees that do not do better than their root's p-approximation
    fn trim(&mut self) {
        let roots: Vec<usize> = self.partition.mesh.roots().iter().copied().collect();
        for root in roots {
            self.trim_recursive(NodeId::Mesh(root));
        }
    }

    fn trim_recursive(&mut self, node: NodeId) {
        if self.leaves.contains(&node) {
            // the Mesh may have been refined below a near-best leaf before the run
            self.trim_node(node);
        } else {
            let [left, right] = self.children(node);
            self.trim_recursive(left);
            self.trim_recursive(right);

            let r = self.r(node);
            if almost_equal(self.ehp(node, r), self.error(node, r), 1) {
                self.trim_node(node);
            }
        }

        let r = self.r(node);
        self.r.insert(node, r.max(LINEAR));
    }

    /// Make a node a near-best leaf, trimming the Mesh below it
    fn trim_node(&mut self, node: NodeId) {
        if !self.is_tree_leaf(node) {
            let [left, right] = self.children(node);
            self.erase_subtree(right);
            self.erase_subtree(left);
            if let NodeId::Mesh(elt_id) = node {
                self.partition.trim(elt_id);
            }
        }
        self.leaves.insert(node);
    }

    fn erase_subtree(&mut self, node: NodeId) {
        if !self.leaves.contains(&node) && !self.is_tree_leaf(node) {
            let [left, right] = self.children(node);
            self.erase_subtree(right);
            self.erase_subtree(left);
        }
        self.leaves.remove(&node);
        self.forget(node);
    }

    /// Hand the DoF budgets of the near-best leaves to the DoF handler
    fn commit(&mut self) -> BTreeMap<usize, usize> {
        let leaves: Vec<NodeId> = self.leaves.iter().copied().collect();
        let mut dofs = BTreeMap::new();

        self.partition.handler.clear();
        for leaf in leaves {
            match leaf {
                NodeId::Mesh(elt_id) => {
                    let r = self.r(leaf);
                    self.partition.handler.set(elt_id, r);
                    dofs.insert(elt_id, r);
                }
                _ => panic!("Synthetic node {:?} survived as a near-best leaf!", leaf),
            }
        }
        dofs
    }
}

fn lookup(map: &BTreeMap<NodeId, BTreeMap<Option<usize>, f64>>, node: NodeId, dof: usize, name: &str) -> f64 {
    *map.get(&node)
        .and_then(|by_degree| by_degree.get(&degree(dof)))
        .unwrap_or_else(|| panic!("{} of {:?} is unknown for {} coefficients!", name, node, dof))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::basis::{hierarchical::lattice_points, REFERENCE_TRIANGLE};
    use crate::domain::dof::{QUADRATIC, QUARTIC};
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector};

    fn partition(path: &str) -> Partition {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let mesh_json = json::parse(&std::fs::read_to_string(path).unwrap()).unwrap();
        let num_elements = mesh_json["Elements"].len();
        let rhs_json = json::object! {
            "dim": 3,
            "Values": json::JsonValue::from(vec![vec![1.0, 1.0, 1.0]; num_elements]),
        };
        Partition::from_json(&mesh_json, &rhs_json, 4).unwrap()
    }

    /// Interpolate `f` on the quadratic lattice of every leaf (exact for quadratics)
    fn interpolated(p: &Partition, f: impl Fn(f64, f64) -> f64) -> PiecewisePolynomial {
        let lattice = lattice_points(REFERENCE_TRIANGLE, 2);
        let mut target = PiecewisePolynomial::new();

        for leaf_id in p.mesh.leaves() {
            let [p0, p1, p2] = p.mesh.element_points(*leaf_id);
            let functions = p.bases.reference(p.mesh.tri_type(*leaf_id)).functions();

            let values = DMatrix::from_fn(QUADRATIC, QUADRATIC, |l, j| functions[j].eval(lattice[l]));
            let samples = DVector::from_fn(QUADRATIC, |l, _| {
                let [xi, eta] = lattice[l];
                f(
                    p0.x + xi * (p1.x - p0.x) + eta * (p2.x - p0.x),
                    p0.y + xi * (p1.y - p0.y) + eta * (p2.y - p0.y),
                )
            });
            target.insert_vector(*leaf_id, values.lu().solve(&samples).unwrap(), true);
        }
        target
    }

    fn x_squared(p: &Partition) -> PiecewisePolynomial {
        interpolated(p, |x, _| x * x)
    }

    #[test]
    fn combined_roots() {
        let mut p = partition("./test_input/l_shape.json");
        let mut target = x_squared(&p);
        let nb = NearBest::new(&mut p, &mut target);

        // 6 roots -> 3 -> 2 (one padded with a virtual node) -> 1
        assert_eq!(nb.combinations.len(), 6);
        assert_eq!(nb.virtuals.len(), 1);
        assert!(matches!(nb.root, NodeId::Combination(5)));
    }

    #[test]
    fn single_root_is_used_directly() {
        let mesh_json = json::parse(
            r#"{ "Vertices": [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]], "Elements": [{ "vertices": [0, 1, 2], "type": 0 }] }"#,
        )
        .unwrap();
        let rhs_json = json::parse(r#"{ "dim": 3, "Values": [[1.0, 1.0, 1.0]] }"#).unwrap();
        let mut p = Partition::from_json(&mesh_json, &rhs_json, 3).unwrap();
        let root = *p.mesh.roots().iter().next().unwrap();

        let mut target = PiecewisePolynomial::new();
        target.insert_vector(root, DVector::from_vec(vec![0.0, 1.0, 0.0]), true);
        let nb = NearBest::new(&mut p, &mut target);
        assert_eq!(nb.root, NodeId::Mesh(root));
        assert!(nb.combinations.is_empty());
    }

    #[test]
    fn infinite_tolerance_stops_immediately() {
        let mesh_json = json::parse(
            r#"{ "Vertices": [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]], "Elements": [{ "vertices": [0, 1, 2], "type": 0 }] }"#,
        )
        .unwrap();
        let rhs_json = json::parse(r#"{ "dim": 3, "Values": [[1.0, 1.0, 1.0]] }"#).unwrap();
        let mut p = Partition::from_json(&mesh_json, &rhs_json, 3).unwrap();
        let root = *p.mesh.roots().iter().next().unwrap();
        let mut target = x_squared(&p);

        let report = NearBest::run(&mut p, &mut target, f64::INFINITY, 1);
        assert_eq!(report.nodes, 1);
        assert_eq!(p.mesh.leaves().len(), 1);
        assert!(p.mesh.is_leaf(root));
        assert_eq!(report.dofs[&root], LINEAR);
    }

    #[test]
    fn exact_target_needs_no_refinement() {
        let mut p = partition("./test_input/unit_square.json");
        let mut target = x_squared(&p);

        // quadratic on each root, so a quadratic on both roots is exact
        let report = NearBest::run(&mut p, &mut target, 1e-6, 50);

        assert!(report.squared_error < 1e-12);
        assert!(report.nodes < 50);
        assert_eq!(report.dofs.len(), p.mesh.leaves().len());
        for (leaf_id, dof) in report.dofs.iter() {
            assert!(p.mesh.is_leaf(*leaf_id));
            assert!(*dof >= LINEAR);
            assert!(p.handler.has(*leaf_id));
        }
    }

    #[test]
    fn budget_bounds_the_tree() {
        let mut p = partition("./test_input/l_shape.json");
        let mut target = x_squared(&p);
        let seminorm = target.squared_h1_norm(&p.mesh, &p.bases);

        let report = NearBest::run(&mut p, &mut target, 0.0, 8);
        assert!(report.nodes <= 9);
        assert!(report.squared_error <= seminorm + 1e-12);

        // every leaf of the resulting partition got a budget
        assert_eq!(report.dofs.len(), p.mesh.leaves().len());
        for leaf_id in p.mesh.leaves() {
            assert!(report.dofs[leaf_id] >= LINEAR);
            assert!(report.dofs[leaf_id] <= p.bases.dim());
        }
    }

    #[test]
    fn committed_budgets_can_be_solved() {
        let mut p = partition("./test_input/l_shape.json");
        let mut target = x_squared(&p);

        NearBest::run(&mut p, &mut target, 1e-3, 20);
        p.make_conform();
        let report = p.solve().unwrap();

        assert_eq!(p.handler.len(), p.mesh.leaves().len());
        assert!(report.energy() >= 0.0);
    }

    #[test]
    fn combination_error_splits_degrees() {
        let mut p = partition("./test_input/unit_square.json");
        let mut target = x_squared(&p);
        let mut nb = NearBest::new(&mut p, &mut target);

        let [left, right] = nb.children(nb.root);
        let combined = nb.error(nb.root, QUADRATIC);
        let mut best = f64::MAX;
        for d1 in 0..=QUADRATIC {
            best = best.min(nb.error(left, d1) + nb.error(right, QUADRATIC - d1));
        }
        assert_relative_eq!(combined, best);

        // both roots are quadratic
        assert_eq!(nb.error(nb.root, QUARTIC), 0.0);
        assert!(nb.error(nb.root, QUADRATIC) > 0.0);
    }
}
