//!这个模块是用来求解大矩阵的部分本征值的模块, 用 shift-invert 块 Lanczos 求离 $\sigma$ 最近的几个本征值.
//!
//! The operator $(M-\sigma)^{-1}$ is applied through one LU factorisation of
//! $M-\sigma$. Its largest eigenvalues $\theta$ in modulus belong to the
//! eigenvalues $\lambda=\sigma+1/\theta$ of $M$ closest to $\sigma$. The Krylov
//! space is grown a block of `count` vectors at a time, so a degenerate
//! eigenvalue shows up with its full multiplicity among the wanted ones. The
//! basis is fully reorthogonalised and the Ritz values come from the
//! Rayleigh quotient of the operator on the whole basis.
#[cfg(any(feature = "intel-mkl-system", feature = "intel-mkl-static"))]
extern crate intel_mkl_src as _src;

#[cfg(any(feature = "openblas-system", feature = "openblas-static"))]
extern crate openblas_src as _src;

#[cfg(any(feature = "netlib-system", feature = "netlib-static"))]
extern crate netlib_src as _src;

use log::debug;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use ndarray_linalg::{Eigh, Factorize, Solve, UPLO};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::distribute::CancellationToken;
use crate::error::{Result, TbError};

/// Stopping rule of the Lanczos iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LanczosParams {
    /// Largest Krylov dimension, `None` for the dimension of the matrix.
    pub max_iterations: Option<usize>,
    /// Ritz pairs are accepted once $\|W\bm s_i-\theta_i Q\bm s_i\|\le$ `tolerance`$\cdot|\theta_i|$.
    pub tolerance: f64,
}

impl Default for LanczosParams {
    fn default() -> Self {
        LanczosParams {
            max_iterations: None,
            tolerance: 1e-12,
        }
    }
}

/// Relative norm below which a new block vector counts as already in the basis.
const DEFLATION: f64 = 1e-10;

fn start_vector(n: usize, b: usize) -> Array1<Complex64> {
    // 固定的起始向量, 避免和本征态正交
    let phase = b as f64;
    Array1::from_shape_fn(n, |i| {
        let x = i as f64;
        Complex64::new(
            (1.3 * x + 0.7 + 0.61 * phase).sin() + 1.1,
            ((0.9 + 0.23 * phase) * x + 0.1 + 1.7 * phase).cos(),
        )
    })
}

#[inline(always)]
fn norm2(v: &Array1<Complex64>) -> f64 {
    v.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt()
}

/// $\bm u^\dagger\bm v$
#[inline(always)]
fn inner(u: &Array1<Complex64>, v: &Array1<Complex64>) -> Complex64 {
    u.iter().zip(v.iter()).map(|(a, b)| a.conj() * b).sum()
}

/// Removes the components of `w` along the (orthonormal) `basis`, twice.
fn reorthogonalise(w: &mut Array1<Complex64>, basis: &[Array1<Complex64>]) {
    for _ in 0..2 {
        for q in basis.iter() {
            let c = inner(q, w);
            w.scaled_add(-c, q);
        }
    }
}

/// Orthonormalises `candidates` against `basis` and each other, dropping the
/// ones that are (numerically) in the span already. At most `limit` vectors are
/// returned.
fn next_block(
    candidates: Vec<Array1<Complex64>>,
    basis: &[Array1<Complex64>],
    limit: usize,
) -> Vec<Array1<Complex64>> {
    let mut block: Vec<Array1<Complex64>> = Vec::with_capacity(candidates.len());
    for mut w in candidates {
        if block.len() == limit {
            break;
        }
        let before = norm2(&w);
        reorthogonalise(&mut w, basis);
        reorthogonalise(&mut w, &block);
        let after = norm2(&w);
        if after > DEFLATION * before {
            block.push(w.mapv(|x| x / after));
        }
    }
    block
}

/// The `count` eigenvalues of the Hermitian matrix `m` closest to `shift`,
/// ascending, degenerate eigenvalues repeated.
///
/// # Arguments
///
/// * `m` - Hermitian matrix; only its action through $(M-\sigma)^{-1}$ is used
/// * `count` - number of eigenvalues, at most the dimension of `m`
/// * `shift` - target energy $\sigma$
/// * `params` - stopping rule
/// * `token` - checked once per block step
pub fn shift_invert_eigenvalues<S>(
    m: &ArrayBase<S, Ix2>,
    count: usize,
    shift: f64,
    params: &LanczosParams,
    token: &CancellationToken,
) -> Result<Array1<f64>>
where
    S: Data<Elem = Complex64>,
{
    let n = m.nrows();
    if count > n {
        return Err(TbError::TooManyEigenvalues {
            requested: count,
            dim: n,
        });
    }
    if count == 0 {
        return Ok(Array1::zeros(0));
    }
    let mut shifted = m.to_owned();
    for i in 0..n {
        shifted[[i, i]] -= Complex64::new(shift, 0.0);
    }
    let lu = shifted.factorize()?;
    let max_dim = params.max_iterations.unwrap_or(n).clamp(count, n);

    // Q: orthonormal basis, W: its images under (M - shift)^-1
    let mut basis: Vec<Array1<Complex64>> = Vec::with_capacity(max_dim);
    let mut images: Vec<Array1<Complex64>> = Vec::with_capacity(max_dim);
    let mut projected = Array2::<Complex64>::zeros((0, 0));
    let mut block = next_block((0..count).map(|b| start_vector(n, b)).collect(), &basis, count);
    let mut steps = 0usize;
    let mut restart = 0usize;

    loop {
        token.check()?;
        if block.is_empty() {
            block = vec![fresh_direction(n, &basis)];
            restart += 1;
        }
        let old = basis.len();
        for v in block.drain(..) {
            images.push(lu.solve(&v)?);
            basis.push(v);
        }
        steps += 1;
        let m_dim = basis.len();
        projected = grow_projection(&projected, &basis, &images, old);

        let (theta, s) = projected.eigh(UPLO::Lower)?;
        let mut order: Vec<usize> = (0..m_dim).collect();
        order.sort_by(|&x, &y| theta[y].abs().total_cmp(&theta[x].abs()));
        let wanted = &order[..count.min(m_dim)];
        let converged = m_dim >= count
            && wanted.iter().all(|&i| {
                ritz_residual(&basis, &images, &s.column(i).to_owned(), theta[i])
                    <= params.tolerance * theta[i].abs()
            });

        if converged || m_dim == n {
            let mut lambda: Vec<f64> = wanted.iter().map(|&i| shift + 1.0 / theta[i]).collect();
            lambda.sort_by(f64::total_cmp);
            debug!(
                "shift-invert block Lanczos: {} eigenvalues near {} after {} steps, dimension {} ({} restarts)",
                count, shift, steps, m_dim, restart
            );
            return Ok(Array1::from_vec(lambda));
        }
        if m_dim >= max_dim {
            return Err(TbError::LanczosNotConverged { iterations: m_dim });
        }
        block = next_block(images[old..].to_vec(), &basis, (n - m_dim).min(count));
    }
}

/// $Q^\dagger W$ with the rows and columns of the basis vectors from `old` on
/// added to `prev`, Hermitised.
fn grow_projection(
    prev: &Array2<Complex64>,
    basis: &[Array1<Complex64>],
    images: &[Array1<Complex64>],
    old: usize,
) -> Array2<Complex64> {
    let m = basis.len();
    let mut h = Array2::<Complex64>::zeros((m, m));
    h.slice_mut(ndarray::s![..old, ..old]).assign(prev);
    for j in old..m {
        for i in 0..=j {
            let a = inner(&basis[i], &images[j]);
            let b = inner(&basis[j], &images[i]).conj();
            let v = (a + b) * 0.5;
            h[[i, j]] = v;
            h[[j, i]] = v.conj();
        }
    }
    h
}

/// $\|W\bm s-\theta Q\bm s\|$
fn ritz_residual(
    basis: &[Array1<Complex64>],
    images: &[Array1<Complex64>],
    s: &Array1<Complex64>,
    theta: f64,
) -> f64 {
    let n = basis[0].len();
    let mut r = Array1::<Complex64>::zeros(n);
    for ((q, w), c) in basis.iter().zip(images.iter()).zip(s.iter()) {
        r.scaled_add(*c, w);
        r.scaled_add(-*c * theta, q);
    }
    norm2(&r)
}

/// Unit vector with the largest component outside of span(`basis`), orthonormalised.
fn fresh_direction(n: usize, basis: &[Array1<Complex64>]) -> Array1<Complex64> {
    let mut best = Array1::<Complex64>::zeros(n);
    let mut best_norm = 0.0;
    for i in 0..n {
        let mut e = Array1::<Complex64>::zeros(n);
        e[i] = Complex64::new(1.0, 0.0);
        reorthogonalise(&mut e, basis);
        let norm = norm2(&e);
        if norm > best_norm {
            best_norm = norm;
            best = e;
        }
    }
    // basis.len() < n, so some direction survives
    best.mapv(|x| x / best_norm)
}
