use super::polynomial::Polynomial;
use crate::domain::dof::tri_num;
use crate::domain::mesh::tri_type::TriType;

/// Barycentric coordinates `[L1, L2, L3] = [1 - x - y, x, y]` of the reference triangle
pub fn barycentric() -> [Polynomial; 3] {
    let x = Polynomial::x();
    let y = Polynomial::y();
    let l1 = &(&Polynomial::constant(1.0) - &x) - &y;
    [l1, x, y]
}

/// Coefficients (lowest power first) of the Legendre polynomial `P_k`
pub fn legendre(k: usize) -> Vec<f64> {
    let mut p_prev = vec![1.0];
    if k == 0 {
        return p_prev;
    }
    let mut p = vec![0.0, 1.0];

    // (n + 1) P_{n+1} = (2n + 1) t P_n - n P_{n-1}
    for n in 1..k {
        let n_ = n as f64;
        let mut next = vec![0.0; n + 2];
        for (i, c) in p.iter().enumerate() {
            next[i + 1] += (2.0 * n_ + 1.0) * c;
        }
        for (i, c) in p_prev.iter().enumerate() {
            next[i] -= n_ * c;
        }
        for c in next.iter_mut() {
            *c /= n_ + 1.0;
        }
        p_prev = std::mem::replace(&mut p, next);
    }
    p
}

/// Coefficients of the derivative of a univariate polynomial
pub fn derivative(coefficients: &[f64]) -> Vec<f64> {
    coefficients
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, c)| i as f64 * c)
        .collect()
}

/// Edge function of level `k >= 1` (degree `k + 1`) along local edge `edge_idx`
///
/// The edge runs from vertex `edge_idx` to vertex `edge_idx + 1 (mod 3)`; its
/// parametrization is reversed if the TriType bit of that edge is set.
pub fn edge_function(tri_type: TriType, edge_idx: usize, k: usize) -> Polynomial {
    assert!(k >= 1, "Edge functions start at level 1!");
    let l = barycentric();
    let la = &l[edge_idx];
    let lb = &l[(edge_idx + 1) % 3];

    let k_ = k as f64;
    let scale = -8.0 * (4.0 * k_ + 2.0).sqrt() / (k_ * (k_ + 1.0));

    let mut arg = lb - la;
    if tri_type.bit(edge_idx) {
        arg = -&arg;
    }
    let kernel = arg.compose_into(&derivative(&legendre(k)));

    (&(la * lb) * &kernel).scale(scale)
}

/// Face (bubble) function `i` on level `k >= 3`: `L1 L2 L3 (L2 - L1)^(k-3-i) (2 L3 - 1)^i`
pub fn face_function(k: usize, i: usize) -> Polynomial {
    assert!(k >= 3 && i <= k - 3, "There is no face function {} on level {}!", i, k);
    let [l1, l2, l3] = barycentric();
    let bubble = &(&l1 * &l2) * &l3;
    let r1 = (&l2 - &l1).powi((k - 3 - i) as u32);
    let r2 = (&l3.scale(2.0) - &Polynomial::constant(1.0)).powi(i as u32);
    &(&bubble * &r1) * &r2
}

/// All hierarchical basis functions up to some degree, in slot order
pub fn hierarchical_basis(tri_type: TriType, degree: usize) -> Vec<Polynomial> {
    let mut functions: Vec<Polynomial> = barycentric().into_iter().collect();
    functions.reserve(tri_num(degree).saturating_sub(3));

    for d in 1..=degree {
        if d >= 3 {
            functions.extend((0..=(d - 3)).map(|i| face_function(d, i)));
        }
        if d < degree {
            functions.extend((0..3).map(|e| edge_function(tri_type, e, d)));
        }
    }

    functions
}

/// The points `(k c0 + j c1 + i c2) / degree` with `i + j + k = degree` of a triangle
pub fn lattice_points(corners: [[f64; 2]; 3], degree: usize) -> Vec<[f64; 2]> {
    let [c0, c1, c2] = corners;
    let n = degree as f64;
    let mut points = Vec::with_capacity(tri_num(degree));
    for i in 0..=degree {
        for j in 0..=(degree - i) {
            let k = degree - i - j;
            let [w0, w1, w2] = [k as f64 / n, j as f64 / n, i as f64 / n];
            points.push([
                w0 * c0[0] + w1 * c1[0] + w2 * c2[0],
                w0 * c0[1] + w1 * c1[1] + w2 * c2[1],
            ]);
        }
    }
    points
}
