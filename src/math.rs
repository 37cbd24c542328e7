//! Small exact helpers on 3$\times$3 integer matrices.
//!
//! Folding offsets between lattices has to be exact, so everything here works on
//! integers and never touches floating point. Products are taken in `i128` with
//! checked arithmetic; `None` means the result does not fit.

pub type IMat3 = [[i64; 3]; 3];
/// Matrix of widened entries for intermediate products.
pub type WideMat3 = [[i128; 3]; 3];

pub fn widen(m: &IMat3) -> WideMat3 {
    m.map(|row| row.map(i128::from))
}

pub fn widen_vec(v: &[i64; 3]) -> [i128; 3] {
    v.map(i128::from)
}

/// $ad-bc$
#[inline(always)]
fn cross(a: i128, b: i128, c: i128, d: i128) -> Option<i128> {
    a.checked_mul(d)?.checked_sub(b.checked_mul(c)?)
}

/// Classical adjoint, $\mathrm{adj}(M)=\det(M)\,M^{-1}$.
pub fn adjugate3(m: &WideMat3) -> Option<WideMat3> {
    let mut adj = [[0i128; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            // cofactor C_{ji}, rows/cols taken cyclically so the sign is built in
            let (r0, r1) = ((j + 1) % 3, (j + 2) % 3);
            let (c0, c1) = ((i + 1) % 3, (i + 2) % 3);
            adj[i][j] = cross(m[r0][c0], m[r0][c1], m[r1][c0], m[r1][c1])?;
        }
    }
    Some(adj)
}

/// Determinant from a precomputed adjugate, $\det M=\sum_j M_{0j}\,\mathrm{adj}(M)_{j0}$.
pub fn det3_from_adjugate(m: &WideMat3, adj: &WideMat3) -> Option<i128> {
    (0..3).try_fold(0i128, |acc, j| acc.checked_add(m[0][j].checked_mul(adj[j][0])?))
}

pub fn det3(m: &WideMat3) -> Option<i128> {
    det3_from_adjugate(m, &adjugate3(m)?)
}

pub fn transpose3<T: Copy>(m: &[[T; 3]; 3]) -> [[T; 3]; 3] {
    let mut t = *m;
    for i in 0..3 {
        for j in 0..3 {
            t[i][j] = m[j][i];
        }
    }
    t
}

pub fn matvec3(a: &WideMat3, v: &[i128; 3]) -> Option<[i128; 3]> {
    let mut out = [0i128; 3];
    for i in 0..3 {
        out[i] = (0..3).try_fold(0i128, |acc, k| acc.checked_add(a[i][k].checked_mul(v[k])?))?;
    }
    Some(out)
}
