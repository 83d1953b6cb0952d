//! csrc-portfolio: sampling helpers
//!
//! Thin wrappers over `rand_distr` that never fail on a degenerate parameter.
//! Every caller passes a seeded `ChaCha20Rng`, so a fixed seed reproduces
//! each draw bit-for-bit.

use rand::Rng;
use rand_distr::{Beta, Distribution, Gamma};

/// Fills `out` with one Dirichlet(`alphas`) draw, built from independent
/// `Gamma(αᵢ, 1)` draws normalized by their sum.
///
/// Non-positive or non-finite concentrations contribute zero mass. A draw with
/// no usable mass falls back to the normalized `alphas`, so `out` always sums
/// to 1.
pub fn dirichlet_into<R: Rng + ?Sized>(rng: &mut R, alphas: &[f64], out: &mut [f64]) {
    debug_assert_eq!(alphas.len(), out.len());
    let mut total = 0.0;
    for (o, a) in out.iter_mut().zip(alphas.iter()) {
        *o = match Gamma::new(*a, 1.0) {
            Ok(g) if a.is_finite() => g.sample(rng),
            _ => 0.0,
        };
        total += *o;
    }
    if !(total > 0.0 && total.is_finite()) {
        out.copy_from_slice(alphas);
        crate::types::normalize_simplex(out);
        return;
    }
    for o in out.iter_mut() {
        *o /= total;
    }
}

/// One Beta(a, b) draw; the distribution mean when the parameters are unusable.
pub fn beta_draw<R: Rng + ?Sized>(rng: &mut R, a: f64, b: f64) -> f64 {
    match Beta::new(a, b) {
        Ok(d) if a.is_finite() && b.is_finite() => d.sample(rng),
        _ if a > 0.0 && b > 0.0 && (a + b).is_finite() => a / (a + b),
        _ => 0.5,
    }
}
