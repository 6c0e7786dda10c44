/// The "harmonic-like" combination of two error indicators used by the near-best algorithm
///
/// `recip(a, b) = 1 / (1/a + 1/b)`, or zero if either argument is zero
pub fn recip(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        0.0
    } else {
        1.0 / (1.0 / a + 1.0 / b)
    }
}

/// Compare two floats to within `ulp` units of relative machine precision
pub fn almost_equal(x: f64, y: f64, ulp: u32) -> bool {
    let diff = (x - y).abs();
    diff < f64::EPSILON * (x + y).abs() * ulp as f64 || diff < f64::MIN_POSITIVE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recip_is_commutative() {
        let pairs = [(1.0, 2.0), (0.5, 7.25), (3.0, 3.0), (1e-8, 4.0)];
        for (a, b) in pairs {
            assert_eq!(recip(a, b), recip(b, a));
        }
        assert!((recip(1.0, 1.0) - 0.5).abs() < 1e-15);
        assert!((recip(2.0, 6.0) - 1.5).abs() < 1e-15);
    }

    #[test]
    fn recip_with_zero() {
        assert_eq!(recip(0.0, 5.0), 0.0);
        assert_eq!(recip(5.0, 0.0), 0.0);
        assert_eq!(recip(0.0, 0.0), 0.0);
    }

    #[test]
    fn almost_equal_tolerance() {
        assert!(almost_equal(1.0, 1.0, 1));
        assert!(almost_equal(1.0, 1.0 + f64::EPSILON, 1));
        assert!(!almost_equal(1.0, 1.0 + 1e-10, 1));
        assert!(almost_equal(0.0, 0.0, 1));
        assert!(almost_equal(1e6, 1e6 + 1e-6, 10_000));
        assert!(!almost_equal(1e6, 1e6 + 1e-6, 100));
    }
}
