/// A Triangle in the refinement forest
pub mod element;
/// Directed Edges and the neighbor index built from them
pub mod finder;
/// Newest-vertex bisection, trimming, and conforming refinement
pub mod h_refinement;
/// Matching partitions and consistent edge orientations
pub mod matching;
/// A Point in Real Space
pub mod space;
/// Edge orientation descriptors that select a reference basis
pub mod tri_type;

use element::{Conformity, Element};
use finder::{Edge, ElementFinder};
use space::Point;
use tri_type::TriType;

#[cfg(feature = "json_export")]
use json::object;
use json::JsonValue;
use std::collections::{BTreeSet, HashMap};
use std::fs::read_to_string;
#[cfg(feature = "json_export")]
use std::fs::File;
#[cfg(feature = "json_export")]
use std::io::BufWriter;
use thiserror::Error;

/// Failure to construct a Mesh (or a right-hand-side) from its JSON description
#[derive(Debug, Error)]
pub enum MeshFileError {
    #[error("unable to read mesh file: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse mesh file as JSON: {0}")]
    Json(#[from] json::Error),
    #[error("malformed mesh description: {0}")]
    Format(String),
}

/// A corner of one or more Elements
#[derive(Clone, Debug)]
pub struct Vertex {
    pub id: usize,
    pub coords: Point,
    pub boundary: bool,
}

impl Vertex {
    pub fn new(id: usize, coords: Point, boundary: bool) -> Self {
        Self {
            id,
            coords,
            boundary,
        }
    }
}

/// A binary forest of triangles refined by newest-vertex bisection
///
/// Elements are stored in an arena and addressed by id. An Element is part of the
/// current partition iff it is in the leaf set. Elements removed by trimming stay
/// in the arena (unreachable from the roots) so that they can be revived by a later bisection.
#[derive(Clone, Debug)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub elements: Vec<Element>,
    roots: BTreeSet<usize>,
    leaves: BTreeSet<usize>,
    finder: ElementFinder,
    vertex_lookup: HashMap<Point, usize>,
    conformity: Conformity,
    matching: Conformity,
    tri_types: Conformity,
}

impl Mesh {
    /// Construct a completely empty Mesh
    pub fn blank() -> Self {
        Self {
            vertices: Vec::new(),
            elements: Vec::new(),
            roots: BTreeSet::new(),
            leaves: BTreeSet::new(),
            finder: ElementFinder::new(),
            vertex_lookup: HashMap::new(),
            conformity: Conformity::Unknown,
            matching: Conformity::Unknown,
            tri_types: Conformity::Unknown,
        }
    }

    /// Construct a Mesh from a list of points and a list of triangles (vertex ids and optional edge orientations)
    ///
    /// Every triangle becomes a root (and a leaf). No boundary information is computed here; see [`Mesh::normalize`].
    pub fn new(points: Vec<Point>, triangles: Vec<([usize; 3], Option<TriType>)>) -> Self {
        assert!(
            !has_duplicates(&points),
            "All Vertices must be at unique locations; cannot construct Mesh!"
        );

        let mut mesh = Self::blank();
        for point in points {
            mesh.push_vertex(point, false);
        }

        for (elt_id, (vertex_ids, tri_type)) in triangles.into_iter().enumerate() {
            for v in vertex_ids {
                assert!(
                    v < mesh.vertices.len(),
                    "Element {} references Vertex {} which does not exist; cannot construct Mesh!",
                    elt_id,
                    v
                );
            }
            let area = mesh.triangle_area(vertex_ids);
            let element = Element::new(elt_id, vertex_ids, None, tri_type, area, 0, elt_id);
            mesh.finder.register(&element);
            mesh.roots.insert(elt_id);
            mesh.leaves.insert(elt_id);
            mesh.elements.push(element);
        }

        mesh
    }

    /// Construct a Mesh from a JSON file with the following format
    ///
    /// The following describes the unit square split along its diagonal:
    /// ```text
    ///     3               2
    /// 1.0 *---------------*
    ///     |            /  |
    ///     |         /     |
    ///     |      /        |
    ///     |   /           |
    /// 0.0 *---------------*
    ///  y  0               1
    ///  x 0.0             1.0
    /// ```
    ///
    /// mesh.json
    /// ```JSON
    /// {
    ///     "Vertices": [
    ///         [0.0, 0.0],
    ///         [1.0, 0.0],
    ///         [1.0, 1.0],
    ///         [0.0, 1.0]
    ///     ],
    ///     "Elements": [
    ///         { "vertices": [0, 1, 2], "type": 0 },
    ///         { "vertices": [2, 3, 0], "type": 0 }
    ///     ]
    /// }
    /// ```
    ///
    /// The first vertex of each Element is its "newest" vertex; the edge opposite of it will be bisected first.
    pub fn from_file(path: impl AsRef<str>) -> Result<Self, MeshFileError> {
        let mesh_file_contents = read_to_string(path.as_ref())?;
        let mesh_file_json = json::parse(&mesh_file_contents)?;
        Self::from_json(&mesh_file_json)
    }

    /// Construct a Mesh from an already parsed JSON description (see [`Mesh::from_file`])
    pub fn from_json(mesh_json: &JsonValue) -> Result<Self, MeshFileError> {
        let points = parse_vertex_information(mesh_json)?;
        let triangles = parse_element_information(mesh_json, points.len())?;

        if has_duplicates(&points) {
            return Err(MeshFileError::Format(
                "All Vertices must be at unique locations!".to_string(),
            ));
        }

        Ok(Self::new(points, triangles))
    }

    /// Write the current partition to a JSON file (Vertices with boundary flags, leaves with vertex ids and types)
    #[cfg(feature = "json_export")]
    pub fn export_to_json(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        let f = File::create(path.as_ref())?;
        let mut w = BufWriter::new(&f);

        self.to_json().write_pretty(&mut w, 4)?;

        Ok(())
    }

    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "Vertices": JsonValue::from(self.vertices.iter().map(|v| v.coords).collect::<Vec<_>>()),
            "Boundary": JsonValue::from(self.vertices.iter().map(|v| v.boundary).collect::<Vec<_>>()),
            "Elements": JsonValue::from(
                self.leaves
                    .iter()
                    .map(|leaf_id| {
                        let elt = &self.elements[*leaf_id];
                        object! {
                            "vertices": JsonValue::from(elt.vertices.to_vec()),
                            "type": elt.tri_type.map(|tt| tt.to_int()).unwrap_or(0),
                        }
                    })
                    .collect::<Vec<_>>()
            ),
        }
    }

    /// Full refinement history of the Mesh (every Element in the arena)
    #[cfg(feature = "json_export")]
    pub fn tree_to_json(&self) -> JsonValue {
        object! {
            "Roots": JsonValue::from(self.roots.iter().copied().collect::<Vec<_>>()),
            "Elements": JsonValue::from(self.elements.iter().map(|elt| elt.to_json()).collect::<Vec<_>>()),
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // General Data Retrieval
    // ----------------------------------------------------------------------------------------------------

    pub fn element(&self, elt_id: usize) -> &Element {
        assert!(
            elt_id < self.elements.len(),
            "Element {} does not exist!",
            elt_id
        );
        &self.elements[elt_id]
    }

    pub fn roots(&self) -> &BTreeSet<usize> {
        &self.roots
    }

    pub fn leaves(&self) -> &BTreeSet<usize> {
        &self.leaves
    }

    pub fn is_leaf(&self, elt_id: usize) -> bool {
        self.leaves.contains(&elt_id)
    }

    pub fn is_root(&self, elt_id: usize) -> bool {
        self.roots.contains(&elt_id)
    }

    /// The children of an Element that is currently refined
    pub fn active_children(&self, elt_id: usize) -> Option<[usize; 2]> {
        if self.is_leaf(elt_id) {
            None
        } else {
            self.element(elt_id).children
        }
    }

    /// The three corner [`Point`]s of an Element
    pub fn element_points(&self, elt_id: usize) -> [Point; 3] {
        self.element(elt_id)
            .vertices
            .map(|v| self.vertices[v].coords)
    }

    /// The edge orientations of an Element (panics if they have not been assigned)
    pub fn tri_type(&self, elt_id: usize) -> TriType {
        self.element(elt_id).tri_type.unwrap_or_else(|| {
            panic!(
                "Element {} has no TriType; edge orientations must be determined first!",
                elt_id
            )
        })
    }

    pub fn area(&self, elt_id: usize) -> f64 {
        self.element(elt_id).area
    }

    /// The Element (and its local edge index) across one of an Element's local edges
    pub fn neighbor(&self, elt_id: usize, local_edge: usize) -> Option<(usize, usize)> {
        self.finder.opposite(&self.element(elt_id).edge(local_edge))
    }

    /// The Element (and its local edge index) across an Element's bisection edge
    pub fn bisection_neighbor(&self, elt_id: usize) -> Option<(usize, usize)> {
        self.finder.opposite_bisection(self.element(elt_id))
    }

    /// The Element (and its local edge index) registered along a directed Edge
    pub fn element_along(&self, edge: &Edge) -> Option<(usize, usize)> {
        self.finder.along(edge)
    }

    /// Get the id of the Vertex at some location (if there is one)
    pub fn vertex_at(&self, point: &Point) -> Option<usize> {
        self.vertex_lookup.get(point).copied()
    }

    /// The current leaves descending from an Element (including the Element itself if it is a leaf)
    pub fn subtree_leaves(&self, elt_id: usize) -> Vec<usize> {
        match self.active_children(elt_id) {
            None => vec![elt_id],
            Some([l, r]) => {
                let mut leaves = self.subtree_leaves(l);
                leaves.extend(self.subtree_leaves(r));
                leaves
            }
        }
    }

    /// Get a list of an Element's ancestors' ids (closest first)
    pub fn ancestors(&self, elt_id: usize) -> Vec<usize> {
        let mut ancestors = Vec::new();
        let mut current = self.element(elt_id).parent;
        while let Some(p) = current {
            ancestors.push(p);
            current = self.elements[p].parent;
        }
        ancestors
    }

    /// Get a list of an Element's active descendants' ids
    pub fn descendant_elements(
        &self,
        elt_id: usize,
        include_starting_elt: bool,
    ) -> Result<Vec<usize>, String> {
        if elt_id >= self.elements.len() {
            return Err(format!("Element {} does not exist!", elt_id));
        }

        let mut descendants = Vec::new();
        if include_starting_elt {
            descendants.push(elt_id);
        }
        let mut stack = Vec::from(self.active_children(elt_id).unwrap_or_default());
        while let Some(current) = stack.pop() {
            descendants.push(current);
            if let Some(children) = self.active_children(current) {
                stack.extend(children);
            }
        }
        Ok(descendants)
    }

    /// True if one of the Elements in the set is an ancestor of another
    pub fn has_overlap<'a>(&self, elements: impl IntoIterator<Item = &'a usize>) -> bool {
        let set: BTreeSet<usize> = elements.into_iter().copied().collect();
        set.iter()
            .any(|elt_id| self.ancestors(*elt_id).iter().any(|a| set.contains(a)))
    }

    // ----------------------------------------------------------------------------------------------------
    // Structural Maintenance
    // ----------------------------------------------------------------------------------------------------

    /// Make the current leaves the new roots of the forest, forgetting all coarser history
    pub fn reset_roots(&mut self) {
        self.roots = self.leaves.clone();
        for root in self.roots.iter() {
            let elt = &mut self.elements[*root];
            elt.parent = None;
            elt.generation = 0;
        }
        self.rebuild_finder();
    }

    /// Recompute the neighbor index from the roots down
    pub fn rebuild_finder(&mut self) {
        self.finder.clear();
        let roots: Vec<usize> = self.roots.iter().copied().collect();
        for root in roots {
            self.register_recursive(root);
        }
    }

    fn register_recursive(&mut self, elt_id: usize) {
        self.finder.register(&self.elements[elt_id]);
        if let Some([l, r]) = self.active_children(elt_id) {
            self.register_recursive(l);
            self.register_recursive(r);
        }
    }

    /// Mark the Vertices that lie on the boundary of the domain
    ///
    /// A Vertex `v` is on the boundary iff there is some `w` such that an Element runs along
    /// `(v, w)` but none runs along `(w, v)`. The Mesh is made conforming first.
    pub fn determine_boundary_vertices(&mut self) {
        self.make_conform();

        for v in self.vertices.iter_mut() {
            v.boundary = false;
        }

        let mut boundary = BTreeSet::new();
        for leaf_id in self.leaves.iter() {
            for edge in self.elements[*leaf_id].edges() {
                if self.finder.opposite(&edge).is_none() {
                    boundary.insert(edge.a);
                    boundary.insert(edge.b);
                }
            }
        }

        for v in boundary {
            self.vertices[v].boundary = true;
        }
    }

    fn push_vertex(&mut self, coords: Point, boundary: bool) -> usize {
        let id = self.vertices.len();
        self.vertices.push(Vertex::new(id, coords, boundary));
        self.vertex_lookup.insert(coords, id);
        id
    }

    /// Get the Vertex at a location, creating it if it does not exist yet
    fn vertex_or_insert(&mut self, coords: Point, boundary: bool) -> usize {
        match self.vertex_at(&coords) {
            Some(id) => id,
            None => self.push_vertex(coords, boundary),
        }
    }

    fn triangle_area(&self, vertex_ids: [usize; 3]) -> f64 {
        let [p0, p1, p2] = vertex_ids.map(|v| self.vertices[v].coords);
        ((p1 - p0).cross(&(p2 - p0)) / 2.0).abs()
    }
}

fn parse_vertex_information(mesh_json: &JsonValue) -> Result<Vec<Point>, MeshFileError> {
    if !mesh_json["Vertices"].is_array() {
        return Err(MeshFileError::Format(
            "Vertices must be an Array!".to_string(),
        ));
    }

    mesh_json["Vertices"]
        .members()
        .map(|json_vertex| {
            if !json_vertex.is_array() || json_vertex.members().count() != 2 {
                return Err(MeshFileError::Format(
                    "Vertices must be arrays of length 2!".to_string(),
                ));
            }
            match (json_vertex[0].as_f64(), json_vertex[1].as_f64()) {
                (Some(x), Some(y)) => Ok(Point::new(x, y)),
                _ => Err(MeshFileError::Format(
                    "Vertices must be composed of numerical values!".to_string(),
                )),
            }
        })
        .collect()
}

fn parse_element_information(
    mesh_json: &JsonValue,
    num_vertices: usize,
) -> Result<Vec<([usize; 3], Option<TriType>)>, MeshFileError> {
    if !mesh_json["Elements"].is_array() {
        return Err(MeshFileError::Format(
            "Elements must be an Array!".to_string(),
        ));
    }

    mesh_json["Elements"]
        .members()
        .enumerate()
        .map(|(elt_id, json_elt)| {
            let json_vertices = &json_elt["vertices"];
            if !json_vertices.is_array() || json_vertices.members().count() != 3 {
                return Err(MeshFileError::Format(format!(
                    "Element {} must have an array of 3 vertex ids!",
                    elt_id
                )));
            }

            let mut vertex_ids = [0; 3];
            for (i, json_id) in json_vertices.members().enumerate() {
                vertex_ids[i] = match json_id.as_usize() {
                    Some(id) if id < num_vertices => id,
                    _ => {
                        return Err(MeshFileError::Format(format!(
                            "Element {} references an invalid vertex: {}!",
                            elt_id, json_id
                        )))
                    }
                };
            }

            let tri_type = if json_elt["type"].is_null() {
                None
            } else {
                match json_elt["type"].as_usize() {
                    Some(t) if t < 8 => Some(TriType::from_int(t)),
                    _ => {
                        return Err(MeshFileError::Format(format!(
                            "Element {} has an invalid type: {}!",
                            elt_id, json_elt["type"]
                        )))
                    }
                }
            };

            Ok((vertex_ids, tri_type))
        })
        .collect()
}

fn has_duplicates<T>(values: &[T]) -> bool
where
    T: PartialEq,
{
    for (i, val) in values.iter().enumerate() {
        for val_cmp in values.iter().skip(i + 1) {
            if val == val_cmp {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// The unit square split along its diagonal into two triangles sharing their bisection edge
    pub fn unit_square() -> Mesh {
        Mesh::new(
            vec![
                Point::new(0.0, 0.0),
                Point::new(1.0, 0.0),
                Point::new(1.0, 1.0),
                Point::new(0.0, 1.0),
            ],
            vec![
                ([1, 2, 0], Some(TriType::new(false, false, false))),
                ([3, 0, 2], Some(TriType::new(false, true, false))),
            ],
        )
    }

    #[test]
    fn build_mesh() {
        let mesh = unit_square();

        assert_eq!(mesh.elements.len(), 2);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.roots().len(), 2);
        assert_eq!(mesh.leaves().len(), 2);
        assert!((mesh.area(0) - 0.5).abs() < 1e-15);
        assert!((mesh.area(1) - 0.5).abs() < 1e-15);

        assert_eq!(mesh.bisection_neighbor(0), Some((1, 1)));
        assert_eq!(mesh.neighbor(0, 0), None);
        assert_eq!(mesh.vertex_at(&Point::new(1.0, 1.0)), Some(2));
    }

    #[test]
    fn mesh_from_json() {
        let mesh_json = json::parse(
            r#"{
                "Vertices": [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
                "Elements": [{ "vertices": [0, 1, 2], "type": 5 }]
            }"#,
        )
        .unwrap();

        let mesh = Mesh::from_json(&mesh_json).unwrap();
        assert_eq!(mesh.tri_type(0), TriType::from_int(5));
        assert!((mesh.area(0) - 0.5).abs() < 1e-15);
    }

    #[test]
    fn mesh_from_bad_json() {
        let duplicate_vertex = json::parse(
            r#"{
                "Vertices": [[0.0, 0.0], [1.0, 0.0], [1.0, 0.0]],
                "Elements": [{ "vertices": [0, 1, 2], "type": 0 }]
            }"#,
        )
        .unwrap();
        assert!(matches!(
            Mesh::from_json(&duplicate_vertex),
            Err(MeshFileError::Format(_))
        ));

        let missing_vertex = json::parse(
            r#"{
                "Vertices": [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
                "Elements": [{ "vertices": [0, 1, 3], "type": 0 }]
            }"#,
        )
        .unwrap();
        assert!(Mesh::from_json(&missing_vertex).is_err());
    }

    #[test]
    fn mesh_from_file() {
        let mesh = Mesh::from_file("./test_input/unit_square.json").unwrap();
        assert_eq!(mesh.leaves().len(), 2);
        assert!(matches!(
            Mesh::from_file("./test_input/does_not_exist.json"),
            Err(MeshFileError::Io(_))
        ));
    }

    #[test]
    fn boundary_vertices() {
        let mut mesh = unit_square();
        mesh.determine_boundary_vertices();
        assert!(mesh.vertices.iter().all(|v| v.boundary));

        mesh.bisect(0, false);
        mesh.bisect(1, false);
        mesh.bisect(2, false);
        mesh.determine_boundary_vertices();

        // the center of the square is the only interior vertex
        let interior: Vec<usize> = mesh
            .vertices
            .iter()
            .filter(|v| !v.boundary)
            .map(|v| v.id)
            .collect();
        assert_eq!(interior.len(), 1);
        assert_eq!(mesh.vertices[interior[0]].coords, Point::new(0.5, 0.5));
    }

    #[test]
    fn retrieval() {
        let mut mesh = unit_square();
        let [l, r] = mesh.bisect(0, false);
        let [ll, lr] = mesh.bisect(l, false);

        let mut subtree = mesh.subtree_leaves(0);
        subtree.sort();
        assert_eq!(subtree, vec![r, ll, lr]);
        assert_eq!(mesh.ancestors(lr), vec![l, 0]);
        assert!(mesh.has_overlap(&[0, ll]));
        assert!(!mesh.has_overlap(&[r, ll, lr, 1]));
        assert_eq!(mesh.descendant_elements(0, false).unwrap().len(), 4);
        assert!(mesh.descendant_elements(100, true).is_err());
    }

    #[test]
    #[should_panic]
    fn element_with_missing_vertex() {
        let _ = Mesh::new(
            vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)],
            vec![([0, 1, 2], None)],
        );
    }
}
