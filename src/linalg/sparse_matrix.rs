use std::collections::BTreeMap;

use nalgebra::DMatrix;

//TODO: switch to something more efficient than a BTreeMap (preallocate with know num zeros)

/// Wrapper around a BTreeMap to store square-symmetric matrices in a sparse data structure
#[derive(Clone, Debug)]
pub struct SparseMatrix {
    /// Size of the square matrix
    pub dimension: usize,
    /// Matrix Entries (upper triangle only)
    entries: BTreeMap<[u32; 2], f64>,
}

impl SparseMatrix {
    pub fn new(dimension: usize) -> Self {
        assert!(
            dimension <= (u32::MAX as usize),
            "Matrix Dimension cannot exceed the size of a u32!"
        );

        Self {
            dimension,
            entries: BTreeMap::new(),
        }
    }

    /// Add a value to an entry. Assumes symmetry: row/col order does not matter.
    pub fn insert(&mut self, [row_idx, col_idx]: [usize; 2], value: f64) {
        let coordinates = self.upper_coordinates(row_idx, col_idx);

        self.entries
            .entry(coordinates)
            .and_modify(|current_value| *current_value += value)
            .or_insert(value);
    }

    /// Insert a group of entries (such as the contributions of one Element)
    pub fn insert_group(&mut self, entry_group: Vec<([usize; 2], f64)>) {
        for (rc, value) in entry_group {
            self.insert(rc, value);
        }
    }

    /// Value of an entry (zero if it was never inserted)
    pub fn get(&self, [row_idx, col_idx]: [usize; 2]) -> f64 {
        let coordinates = self.upper_coordinates(row_idx, col_idx);
        self.entries.get(&coordinates).copied().unwrap_or(0.0)
    }

    fn upper_coordinates(&self, row_idx: usize, col_idx: usize) -> [u32; 2] {
        assert!(
            row_idx < self.dimension,
            "row_idx exceeded matrix dimension; cannot access value!"
        );
        assert!(
            col_idx < self.dimension,
            "col_idx exceeded matrix dimension; cannot access value!"
        );

        let (r, c) = if row_idx <= col_idx {
            (row_idx, col_idx)
        } else {
            (col_idx, row_idx)
        };
        [
            r.try_into().expect("Row Idx was too large!"),
            c.try_into().expect("Col Idx was too large!"),
        ]
    }

    /// Iterate over the upper triangle of the matrix.
    pub fn iter_upper_tri(&self) -> impl Iterator<Item = ([usize; 2], f64)> + '_ {
        self.entries
            .iter()
            .map(|(coords, value)| ([coords[0] as usize, coords[1] as usize], *value))
    }

    /// Dense copy of the full matrix
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.dimension, self.dimension);
        for ([r, c], v) in self.iter_upper_tri() {
            dense[(r, c)] = v;
            dense[(c, r)] = v;
        }
        dense
    }
}
