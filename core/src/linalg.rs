//! Linear algebra helpers for robust covariance handling.
//!
//! Public API:
//!     pub fn symmetrize<const N: usize>(m: &SMatrix<f64, N, N>) -> SMatrix<f64, N, N>
//!     pub fn chol_solve_spd<const C: usize>(a, b, opt) -> Option<SMatrix<f64, 7, C>>
//!
//! Strategy for the SPD solve:
//! 1) Symmetrize A ← 0.5 (A + Aᵀ)
//! 2) Cholesky
//! 3) Jittered Cholesky (geometric ramp)
//! 4) Give up (return None) — the caller treats this as a soft failure
//!
//! Unlike a general-purpose solver there is no eigenvalue-decomposition or
//! explicit-inverse fallback here: a 7x7 innovation covariance that defeats the
//! jitter ramp is genuinely degenerate, and the filter's policy for that case is
//! to skip the measurement update rather than inject garbage into the state.

use nalgebra::{Cholesky, SMatrix};

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Simple matrix symmetrization function that reduces round-off errors associated
/// with floating point arithmetic.
///
/// # Arguments
/// * `m` - the matrix to symmetrize
///
/// # Returns
/// A symmetrized version of the input matrix.
#[inline]
pub fn symmetrize<const N: usize>(m: &SMatrix<f64, N, N>) -> SMatrix<f64, N, N> {
    0.5 * (m + m.transpose())
}

/// Options for the jittered Cholesky solve.
#[derive(Debug, Clone, Copy)]
pub struct SolveOptions {
    pub initial_jitter: f64, // e.g., 1e-12
    pub max_jitter: f64,     // e.g., 1e-6
    pub max_tries: usize,    // e.g., 6
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            initial_jitter: 1e-12,
            max_jitter: 1e-6,
            max_tries: 6,
        }
    }
}

/// Solve A X = B for SPD-ish A via Cholesky, with jitter retries.
///
/// The matrix is symmetrized first (SPD drift is common), then factored; if the
/// plain factorization fails the diagonal is jittered on a geometric ramp.
/// Returns None if all attempts fail.
///
/// # Arguments
/// * `a` - the 7x7 left-hand side, assumed symmetric positive definite up to round-off
/// * `b` - the right-hand side
/// * `opt` - jitter schedule
///
/// # Returns
/// * `Some(X)` with `A X ≈ B`, or `None` if A is numerically singular.
pub fn chol_solve_spd<const C: usize>(
    a: &SMatrix<f64, 7, 7>,
    b: &SMatrix<f64, 7, C>,
    opt: SolveOptions,
) -> Option<SMatrix<f64, 7, C>> {
    let a_sym = symmetrize(a);

    // Try plain Cholesky
    if let Some(ch) = Cholesky::new(a_sym) {
        return Some(ch.solve(b));
    }

    // Jitter ramp
    let mut jitter = opt.initial_jitter;
    for _ in 0..opt.max_tries {
        let mut a_j = a_sym;
        for i in 0..7 {
            a_j[(i, i)] += jitter;
        }
        if let Some(ch) = Cholesky::new(a_j) {
            return Some(ch.solve(b));
        }
        jitter *= 10.0;
        if jitter > opt.max_jitter {
            break;
        }
    }
    None
}

/* =============================== Tests ==================================== */
