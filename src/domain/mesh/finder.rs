use super::element::Element;
use std::collections::BTreeMap;

/// A directed pair of Vertex ids
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub a: usize,
    pub b: usize,
}

impl Edge {
    pub fn new(a: usize, b: usize) -> Self {
        assert_ne!(a, b, "An Edge must connect two distinct Vertices!");
        Self { a, b }
    }

    pub fn reversed(&self) -> Self {
        Self {
            a: self.b,
            b: self.a,
        }
    }
}

/// Neighbor index: maps each directed edge onto the (finest registered) Element running along it
///
/// Children overwrite the entries of their parent, except for the parent's bisection edge;
/// that entry keeps pointing at the (non-leaf) parent, which is how hanging vertices are detected.
#[derive(Clone, Debug, Default)]
pub struct ElementFinder {
    along: BTreeMap<Edge, (usize, usize)>,
}

impl ElementFinder {
    pub fn new() -> Self {
        Self {
            along: BTreeMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.along.clear();
    }

    /// Register the three directed edges of an Element
    pub fn register(&mut self, elt: &Element) {
        for (local_idx, edge) in elt.edges().into_iter().enumerate() {
            self.along.insert(edge, (elt.id, local_idx));
        }
    }

    /// Remove the entries that still point at an Element
    pub fn remove(&mut self, elt: &Element) {
        for edge in elt.edges() {
            if matches!(self.along.get(&edge), Some((id, _)) if *id == elt.id) {
                self.along.remove(&edge);
            }
        }
    }

    /// The Element (and its local edge index) running along a directed edge
    pub fn along(&self, edge: &Edge) -> Option<(usize, usize)> {
        self.along.get(edge).copied()
    }

    /// The Element (and its local edge index) on the other side of a directed edge
    pub fn opposite(&self, edge: &Edge) -> Option<(usize, usize)> {
        self.along(&edge.reversed())
    }

    /// The Element on the other side of an Element's bisection edge
    pub fn opposite_bisection(&self, elt: &Element) -> Option<(usize, usize)> {
        self.opposite(&elt.bisection_edge())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Edge, &(usize, usize))> + '_ {
        self.along.iter()
    }

    pub fn len(&self) -> usize {
        self.along.len()
    }

    pub fn is_empty(&self) -> bool {
        self.along.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbor_lookup() {
        let a = Element::new(0, [0, 1, 2], None, None, 0.5, 0, 0);
        let b = Element::new(1, [3, 2, 1], None, None, 0.5, 0, 1);

        let mut finder = ElementFinder::new();
        finder.register(&a);
        finder.register(&b);

        assert_eq!(finder.len(), 6);
        assert_eq!(finder.opposite_bisection(&a), Some((1, 1)));
        assert_eq!(finder.opposite_bisection(&b), Some((0, 1)));
        assert_eq!(finder.opposite(&a.edge(0)), None);
        assert_eq!(finder.along(&Edge::new(2, 0)), Some((0, 2)));
    }

    #[test]
    fn remove_only_own_entries() {
        let parent = Element::new(0, [0, 1, 2], None, None, 0.5, 0, 0);
        let child = Element::new(1, [3, 0, 1], Some(0), None, 0.25, 1, 0);

        let mut finder = ElementFinder::new();
        finder.register(&parent);
        finder.register(&child);
        assert_eq!(finder.along(&Edge::new(0, 1)), Some((1, 1)));

        finder.remove(&parent);
        assert_eq!(finder.along(&Edge::new(0, 1)), Some((1, 1)));
        assert_eq!(finder.along(&Edge::new(1, 2)), None);

        finder.remove(&child);
        assert!(finder.is_empty());
    }

    #[test]
    #[should_panic]
    fn degenerate_edge() {
        let _ = Edge::new(3, 3);
    }
}
