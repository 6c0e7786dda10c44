use std::collections::BTreeMap;
use std::ops::{Add, Mul, Neg, Sub};

/// A polynomial in two variables with exact monomial coefficients
///
/// Stored as a map from exponents `[a, b]` (for `x^a y^b`) to coefficients.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Polynomial {
    terms: BTreeMap<[u32; 2], f64>,
}

impl Polynomial {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self::monomial(value, [0, 0])
    }

    pub fn monomial(coefficient: f64, exponents: [u32; 2]) -> Self {
        let mut p = Self::zero();
        p.add_term(exponents, coefficient);
        p
    }

    pub fn x() -> Self {
        Self::monomial(1.0, [1, 0])
    }

    pub fn y() -> Self {
        Self::monomial(1.0, [0, 1])
    }

    fn add_term(&mut self, exponents: [u32; 2], coefficient: f64) {
        if coefficient == 0.0 {
            return;
        }
        let c = self.terms.entry(exponents).or_insert(0.0);
        *c += coefficient;
        if *c == 0.0 {
            self.terms.remove(&exponents);
        }
    }

    pub fn terms(&self) -> impl Iterator<Item = ([u32; 2], f64)> + '_ {
        self.terms.iter().map(|(e, c)| (*e, *c))
    }

    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    /// Total degree (`None` for the zero polynomial)
    pub fn degree(&self) -> Option<u32> {
        self.terms.keys().map(|[a, b]| a + b).max()
    }

    pub fn scale(&self, factor: f64) -> Self {
        let mut p = Self::zero();
        for (e, c) in self.terms() {
            p.add_term(e, c * factor);
        }
        p
    }

    pub fn powi(&self, n: u32) -> Self {
        (0..n).fold(Self::constant(1.0), |acc, _| &acc * self)
    }

    /// Substitute this polynomial into a univariate polynomial given by its coefficients (lowest power first)
    pub fn compose_into(&self, coefficients: &[f64]) -> Self {
        // Horner
        coefficients
            .iter()
            .rev()
            .fold(Self::zero(), |acc, c| &(&acc * self) + &Self::constant(*c))
    }

    pub fn dx(&self) -> Self {
        let mut p = Self::zero();
        for ([a, b], c) in self.terms() {
            if a > 0 {
                p.add_term([a - 1, b], c * a as f64);
            }
        }
        p
    }

    pub fn dy(&self) -> Self {
        let mut p = Self::zero();
        for ([a, b], c) in self.terms() {
            if b > 0 {
                p.add_term([a, b - 1], c * b as f64);
            }
        }
        p
    }

    pub fn eval(&self, [x, y]: [f64; 2]) -> f64 {
        self.terms()
            .map(|([a, b], c)| c * x.powi(a as i32) * y.powi(b as i32))
            .sum()
    }

    /// Exact integral over the reference triangle `(0,0), (1,0), (0,1)`
    pub fn integrate_reference(&self) -> f64 {
        self.terms()
            .map(|([a, b], c)| c * reference_monomial_integral(a, b))
            .sum()
    }

    /// Exact integral of `self * other` over the reference triangle (without forming the product)
    pub fn integrate_product(&self, other: &Self) -> f64 {
        let mut sum = 0.0;
        for ([a0, b0], c0) in self.terms() {
            for ([a1, b1], c1) in other.terms() {
                sum += c0 * c1 * reference_monomial_integral(a0 + a1, b0 + b1);
            }
        }
        sum
    }
}

/// `∫ x^a y^b` over the reference triangle: `a! b! / (a + b + 2)!`
pub fn reference_monomial_integral(a: u32, b: u32) -> f64 {
    // a! / (a+b+2)! as a product of reciprocals, times b!
    let mut value = 1.0;
    for k in (a + 1)..=(a + b + 2) {
        value /= k as f64;
    }
    for k in 2..=b {
        value *= k as f64;
    }
    value
}

impl Add for &Polynomial {
    type Output = Polynomial;

    fn add(self, other: Self) -> Polynomial {
        let mut p = self.clone();
        for (e, c) in other.terms() {
            p.add_term(e, c);
        }
        p
    }
}

impl Sub for &Polynomial {
    type Output = Polynomial;

    fn sub(self, other: Self) -> Polynomial {
        let mut p = self.clone();
        for (e, c) in other.terms() {
            p.add_term(e, -c);
        }
        p
    }
}

impl Mul for &Polynomial {
    type Output = Polynomial;

    fn mul(self, other: Self) -> Polynomial {
        let mut p = Polynomial::zero();
        for ([a0, b0], c0) in self.terms() {
            for ([a1, b1], c1) in other.terms() {
                p.add_term([a0 + a1, b0 + b1], c0 * c1);
            }
        }
        p
    }
}

impl Neg for &Polynomial {
    type Output = Polynomial;

    fn neg(self) -> Polynomial {
        self.scale(-1.0)
    }
}

impl Add for Polynomial {
    type Output = Polynomial;

    fn add(self, other: Self) -> Polynomial {
        &self + &other
    }
}

impl Sub for Polynomial {
    type Output = Polynomial;

    fn sub(self, other: Self) -> Polynomial {
        &self - &other
    }
}

impl Mul for Polynomial {
    type Output = Polynomial;

    fn mul(self, other: Self) -> Polynomial {
        &self * &other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn monomial_integrals() {
        assert_relative_eq!(reference_monomial_integral(0, 0), 0.5);
        assert_relative_eq!(reference_monomial_integral(1, 0), 1.0 / 6.0);
        assert_relative_eq!(reference_monomial_integral(0, 1), 1.0 / 6.0);
        assert_relative_eq!(reference_monomial_integral(1, 1), 1.0 / 24.0);
        assert_relative_eq!(reference_monomial_integral(2, 0), 1.0 / 12.0);
        assert_relative_eq!(reference_monomial_integral(3, 2), 12.0 / 5040.0);
    }

    #[test]
    fn arithmetic() {
        let x = Polynomial::x();
        let y = Polynomial::y();
        let one = Polynomial::constant(1.0);

        // (1 - x - y)^2 = 1 - 2x - 2y + x^2 + 2xy + y^2
        let l1 = &(&one - &x) - &y;
        let sq = &l1 * &l1;
        assert_eq!(sq.degree(), Some(2));
        assert_eq!(sq.terms().count(), 6);
        assert_relative_eq!(sq.eval([0.25, 0.5]), 0.0625);

        let zero = &l1 - &l1;
        assert!(zero.is_zero());
        assert_eq!(zero.degree(), None);

        assert_eq!(l1.powi(2), sq);
        assert_eq!((-&x).eval([2.0, 0.0]), -2.0);
    }

    #[test]
    fn derivatives() {
        // p = 3x^2 y + y^3
        let p = Polynomial::monomial(3.0, [2, 1]) + Polynomial::monomial(1.0, [0, 3]);
        assert_eq!(p.dx(), Polynomial::monomial(6.0, [1, 1]));
        assert_eq!(
            p.dy(),
            Polynomial::monomial(3.0, [2, 0]) + Polynomial::monomial(3.0, [0, 2])
        );
        assert!(Polynomial::constant(4.0).dx().is_zero());
    }

    #[test]
    fn composition() {
        // t^2 - 1 evaluated at t = 2x - 1
        let t = &Polynomial::x().scale(2.0) - &Polynomial::constant(1.0);
        let p = t.compose_into(&[-1.0, 0.0, 1.0]);
        for x in [0.0, 0.3, 1.0] {
            assert_relative_eq!(p.eval([x, 0.7]), (2.0 * x - 1.0).powi(2) - 1.0, epsilon = 1e-14);
        }
    }

    #[test]
    fn product_integral() {
        let x = Polynomial::x();
        let y = Polynomial::y();
        let xy = &x * &y;
        assert_relative_eq!(x.integrate_product(&y), xy.integrate_reference());
        assert_relative_eq!(xy.integrate_reference(), 1.0 / 24.0);
    }
}
