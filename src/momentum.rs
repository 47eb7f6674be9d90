//! Momentum updates on the unit sphere.
//!
//! The momentum of a microcanonical chain is a unit vector `u`. It is
//! rotated towards the direction of decreasing potential by the closed-form
//! solution of the momentum equation under a locally constant gradient,
//! and partially randomized after every step.

use rand::Rng;

use crate::math_base::Math;

/// Draw a standard normal vector into `dest`, optionally projected onto the
/// unit sphere (which makes it uniformly distributed there).
pub fn random_direction<M: Math, R: Rng + ?Sized>(
    math: &mut M,
    rng: &mut R,
    dest: &mut M::Vector,
    normalize: bool,
) {
    math.array_gaussian(rng, dest);
    if normalize {
        normalize_array(math, dest);
    }
}

/// Scale `array` to unit euclidean norm and return the previous norm.
///
/// Arrays with zero norm are left as they are.
pub(crate) fn normalize_array<M: Math>(math: &mut M, array: &mut M::Vector) -> f64 {
    let norm = math.array_norm(array);
    if norm > 0. {
        math.scale(array, norm.recip());
    }
    norm
}

/// Advance the unit momentum `momentum` by `eff_eps` given `gradient`.
///
/// With `e = -g / |g|`, `ue = <u, e>` and `a = eff_eps * |g| / d` this computes
///
/// ```text
/// u' = (u + e (sinh a + ue (cosh a - 1))) / (cosh a + ue sinh a)
/// ```
///
/// and returns `delta_r = ln(cosh a) + ln(1 + ue tanh a)`, the log of the
/// jacobian factor of the map. Both are evaluated in a form that stays finite
/// for arbitrarily large `a`. `eff_eps` may be negative, and the map with
/// `-eff_eps` inverts the map with `eff_eps`.
///
/// A zero gradient leaves the momentum untouched and returns `0`.
pub fn update_momentum<M: Math>(
    math: &mut M,
    momentum: &mut M::Vector,
    gradient: &M::Vector,
    eff_eps: f64,
) -> f64 {
    let g_norm = math.array_norm(gradient);
    if g_norm == 0. {
        return 0.;
    }
    let dim = math.dim() as f64;

    let ue = (-math.array_vector_dot(momentum, gradient) / g_norm).clamp(-1., 1.);
    let a = eff_eps * g_norm / dim;
    let b = a.abs();
    let sign = if a < 0. { -1. } else { 1. };

    // Numerator and denominator are both multiplied by 2 exp(-|a|), so that
    // cosh a -> 2 + zeta_m1 and sinh a -> -sign * zeta_m1.
    let zeta_m1 = (-2. * b).exp_m1();
    let q = -(-b).exp_m1();
    let s = ue * sign;
    let denom = 2. + zeta_m1 * (1. - s);

    if !(denom > f64::MIN_POSITIVE) {
        // u points exactly against e, a fixed point of the flow.
        return -b;
    }

    let coef_u = 2. * (1. - q) / denom;
    let coef_e = (-sign * zeta_m1 + ue * q * q) / denom;
    math.axpby(gradient, momentum, coef_u, -coef_e / g_norm);
    normalize_array(math, momentum);

    b + (0.5 * (1. - s) * zeta_m1).ln_1p()
}

/// Mix isotropic noise of scale `nu` into the momentum and project back onto
/// the unit sphere. `noise` is scratch space.
pub fn partially_refresh_momentum<M: Math, R: Rng + ?Sized>(
    math: &mut M,
    rng: &mut R,
    momentum: &mut M::Vector,
    noise: &mut M::Vector,
    nu: f64,
) {
    if nu == 0. {
        return;
    }
    random_direction(math, rng, noise, false);
    math.axpy(noise, momentum, nu);
    normalize_array(math, momentum);
}

/// Noise scale of the partial refreshment for step size `eps` and momentum
/// decoherence length `l` in `dim` dimensions.
pub fn eval_nu(eps: f64, l: f64, dim: usize) -> f64 {
    ((2. * eps / l).exp_m1() / dim as f64).sqrt()
}
