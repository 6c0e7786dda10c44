use json::JsonValue;
use std::fmt;

/// Orientation of the three edges of a triangle, used to select one of eight reference bases
///
/// Each bit decides in which direction the hierarchical edge functions along the
/// corresponding local edge are parametrized. Two triangles sharing an edge must
/// carry opposite bits on it so that their edge functions coincide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TriType {
    bits: [bool; 3],
}

impl TriType {
    pub const ALL: [TriType; 8] = [
        Self::new(false, false, false),
        Self::new(true, false, false),
        Self::new(false, true, false),
        Self::new(true, true, false),
        Self::new(false, false, true),
        Self::new(true, false, true),
        Self::new(false, true, true),
        Self::new(true, true, true),
    ];

    pub const fn new(x: bool, y: bool, z: bool) -> Self {
        Self { bits: [x, y, z] }
    }

    /// Decode the integer representation `4z + 2y + x`
    pub fn from_int(value: usize) -> Self {
        assert!(value < 8, "TriType must be in the range 0..8; got {}!", value);
        Self::new(value & 1 == 1, (value >> 1) & 1 == 1, (value >> 2) & 1 == 1)
    }

    pub fn to_int(&self) -> usize {
        4 * self.bits[2] as usize + 2 * self.bits[1] as usize + self.bits[0] as usize
    }

    /// Orientation bit of a local edge
    pub fn bit(&self, edge_idx: usize) -> bool {
        self.bits[edge_idx]
    }

    pub fn set_bit(&mut self, edge_idx: usize, value: bool) {
        self.bits[edge_idx] = value;
    }

    /// Type of the left child produced by bisection
    pub fn left(&self) -> Self {
        let [x, y, _] = self.bits;
        Self::new(!x, x, y)
    }

    /// Type of the right child produced by bisection
    pub fn right(&self) -> Self {
        let [x, y, z] = self.bits;
        Self::new(y, z, x)
    }

    /// Type of a child by side (0: left, 1: right)
    pub fn child(&self, side: usize) -> Self {
        match side {
            0 => self.left(),
            1 => self.right(),
            _ => panic!("Triangles only have two children; cannot get child {}!", side),
        }
    }
}

impl From<TriType> for JsonValue {
    fn from(tt: TriType) -> Self {
        JsonValue::from(tt.to_int())
    }
}

impl fmt::Display for TriType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_int())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_representation() {
        for (i, tt) in TriType::ALL.iter().enumerate() {
            assert_eq!(tt.to_int(), i);
            assert_eq!(TriType::from_int(i), *tt);
        }

        let tt = TriType::from_int(6);
        assert!(!tt.bit(0));
        assert!(tt.bit(1));
        assert!(tt.bit(2));
    }

    #[test]
    fn children_keep_edge_bits() {
        for tt in TriType::ALL {
            let (l, r) = (tt.left(), tt.right());

            // outer edges of the children are (parts of) the edges of the parent
            assert_eq!(l.bit(1), tt.bit(0));
            assert_eq!(l.bit(2), tt.bit(1));
            assert_eq!(r.bit(0), tt.bit(1));
            assert_eq!(r.bit(1), tt.bit(2));

            // the shared interior edge is traversed in opposite directions
            assert_ne!(l.bit(0), r.bit(2));
        }
    }

    #[test]
    #[should_panic]
    fn invalid_int() {
        let _ = TriType::from_int(8);
    }
}
