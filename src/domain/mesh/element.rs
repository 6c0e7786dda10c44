use super::finder::Edge;
use super::tri_type::TriType;
#[cfg(feature = "json_export")]
use json::{object, JsonValue};

/// Cached answer to a global mesh property that is invalidated by refinement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conformity {
    Unknown,
    No,
    Yes,
}

impl From<bool> for Conformity {
    fn from(value: bool) -> Self {
        if value {
            Self::Yes
        } else {
            Self::No
        }
    }
}

/// A triangle in the refinement forest
///
/// Vertex 0 is the "newest" vertex; the edge opposite of it (local edge 1) is the bisection edge.
#[derive(Clone, Debug)]
pub struct Element {
    pub id: usize,
    pub vertices: [usize; 3],
    pub parent: Option<usize>,
    /// Left and right children. These are kept when the Element is trimmed, and re-used if it is bisected again
    pub children: Option<[usize; 2]>,
    pub generation: usize,
    pub tri_type: Option<TriType>,
    pub area: f64,
    /// The Element from the input mesh that this Element was refined from
    pub origin: usize,
}

impl Element {
    pub fn new(
        id: usize,
        vertices: [usize; 3],
        parent: Option<usize>,
        tri_type: Option<TriType>,
        area: f64,
        generation: usize,
        origin: usize,
    ) -> Self {
        assert!(
            area > 0.0,
            "Element {} with vertices {:?} is degenerate; cannot construct Element!",
            id,
            vertices
        );
        Self {
            id,
            vertices,
            parent,
            children: None,
            generation,
            tri_type,
            area,
            origin,
        }
    }

    /// Directed local edge: `0: (v0, v1)`, `1: (v1, v2)`, `2: (v2, v0)`
    pub fn edge(&self, local_idx: usize) -> Edge {
        assert!(local_idx < 3, "Triangles only have three edges!");
        Edge::new(self.vertices[local_idx], self.vertices[(local_idx + 1) % 3])
    }

    pub fn edges(&self) -> [Edge; 3] {
        [self.edge(0), self.edge(1), self.edge(2)]
    }

    pub fn bisection_edge(&self) -> Edge {
        self.edge(1)
    }

    /// Local index of a directed edge along this Element
    pub fn local_edge_idx(&self, edge: &Edge) -> Option<usize> {
        (0..3).find(|i| self.edge(*i) == *edge)
    }

    pub fn left(&self) -> Option<usize> {
        self.children.map(|[l, _]| l)
    }

    pub fn right(&self) -> Option<usize> {
        self.children.map(|[_, r]| r)
    }

    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "vertices": JsonValue::from(self.vertices.to_vec()),
            "parent": match self.parent {
                Some(p) => JsonValue::from(p),
                None => JsonValue::Null,
            },
            "children": match self.children {
                Some(c) => JsonValue::from(c.to_vec()),
                None => JsonValue::Null,
            },
            "type": match self.tri_type {
                Some(tt) => JsonValue::from(tt),
                None => JsonValue::Null,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_edges() {
        let elt = Element::new(0, [4, 7, 9], None, None, 0.5, 0, 0);

        assert_eq!(elt.edge(0), Edge::new(4, 7));
        assert_eq!(elt.bisection_edge(), Edge::new(7, 9));
        assert_eq!(elt.edge(2), Edge::new(9, 4));

        assert_eq!(elt.local_edge_idx(&Edge::new(9, 4)), Some(2));
        assert_eq!(elt.local_edge_idx(&Edge::new(4, 9)), None);
    }

    #[cfg(feature = "json_export")]
    #[test]
    fn element_json() {
        let mut elt = Element::new(3, [4, 7, 9], Some(1), Some(TriType::default()), 0.5, 2, 0);
        elt.children = Some([5, 6]);

        let elt_json = elt.to_json();
        assert_eq!(elt_json["id"].as_usize(), Some(3));
        assert_eq!(elt_json["vertices"].len(), 3);
        assert_eq!(elt_json["vertices"][2].as_usize(), Some(9));
        assert_eq!(elt_json["parent"].as_usize(), Some(1));
        assert_eq!(elt_json["children"][1].as_usize(), Some(6));
        assert_eq!(elt_json["type"].as_usize(), Some(TriType::default().to_int()));

        let root = Element::new(0, [0, 1, 2], None, None, 0.5, 0, 0);
        assert!(root.to_json()["parent"].is_null());
        assert!(root.to_json()["children"].is_null());
    }

    #[test]
    #[should_panic]
    fn degenerate_element() {
        let _ = Element::new(0, [0, 1, 2], None, None, 0.0, 0, 0);
    }
}
