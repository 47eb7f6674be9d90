use rand::Rng;

use crate::{
    dynamics::{Dynamics, Hyperparameters},
    error::{MchmcError, Result},
    math_base::Math,
    momentum::eval_nu,
    state::State,
    LogpError,
};

/// Settings for the step size search
#[derive(Debug, Clone, Copy)]
pub struct TuningOptions {
    /// Target value of the per-dimension variance of the energy error.
    pub var_e_wanted: f64,
    /// Number of steps of the first iteration. Iterations that land close
    /// to the target measure with twice as many steps as the previous one,
    /// up to 32 times this value.
    pub samples: u64,
    /// Maximum number of iterations.
    pub maxiter: u64,
    /// Relative tolerance around `var_e_wanted`.
    pub tolerance: f64,
}

impl Default for TuningOptions {
    fn default() -> TuningOptions {
        TuningOptions {
            var_e_wanted: 0.2,
            samples: 100,
            maxiter: 10,
            tolerance: 0.25,
        }
    }
}

/// Outcome of the step size search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningReport {
    pub eps: f64,
    pub l: f64,
    pub nu: f64,
    /// Energy error variance per dimension measured at `eps`.
    /// `NaN` if no iteration produced a finite value.
    pub var_e: f64,
    pub iterations: u64,
    pub converged: bool,
}

/// Welford estimate of a variance.
pub(crate) struct RunningVariance {
    mean: f64,
    m2: f64,
    count: u64,
}

impl RunningVariance {
    pub(crate) fn new() -> RunningVariance {
        RunningVariance {
            mean: 0.,
            m2: 0.,
            count: 0,
        }
    }

    pub(crate) fn add(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// A single value is measured against an ideal mean of zero.
    pub(crate) fn current(&self) -> f64 {
        match self.count {
            0 => f64::NAN,
            1 => self.mean * self.mean,
            n => self.m2 / (n - 1) as f64,
        }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

/// Largest multiple of `TuningOptions::samples` an iteration may run.
const SAMPLES_GROWTH_LIMIT: u64 = 32;

/// Measurements within this factor of the target grow the next iteration.
const NEAR_TARGET: f64 = 4.;

/// Searches for the step size at which the variance of the energy error
/// per dimension matches a target, keeping `l` fixed.
pub struct Tuner {
    options: TuningOptions,
}

impl Tuner {
    pub fn new(options: TuningOptions) -> Tuner {
        Tuner { options }
    }

    /// Starting point of the search for a target of dimension `dim`.
    pub fn initial_hyperparameters(dim: usize, lambda_c: f64) -> Hyperparameters {
        let l = (dim as f64).sqrt();
        let eps = 0.5 * l;
        Hyperparameters {
            eps,
            l,
            nu: eval_nu(eps, l, dim),
            lambda_c,
        }
    }

    fn within_tolerance(&self, var_e: f64) -> bool {
        (var_e / self.options.var_e_wanted).ln().abs() <= self.options.tolerance.ln_1p()
    }

    /// Run the search from the current hyperparameters of `dynamics`, moving
    /// `state` along. On return `dynamics` holds the chosen step size and the
    /// energy of `state` is reset.
    ///
    /// Only unrecoverable errors of the target are fatal. Not reaching the
    /// tolerance within `maxiter` iterations is reported in the result.
    pub fn tune<M: Math, R: Rng + ?Sized>(
        &self,
        math: &mut M,
        rng: &mut R,
        dynamics: &mut Dynamics<M>,
        state: &mut State<M>,
    ) -> Result<TuningReport> {
        let dim = math.dim();
        let exponent = 1. / (2 * dynamics.integrator().order() + 2) as f64;
        let mut hyper = *dynamics.hyperparameters();

        let mut backup = State::new(math);
        // (eps, var_e, log distance to the target)
        let mut best: Option<(f64, f64, f64)> = None;
        let mut converged = false;
        let mut iterations = 0;
        let mut samples = self.options.samples;
        let max_samples = self.options.samples.saturating_mul(SAMPLES_GROWTH_LIMIT);

        while iterations < self.options.maxiter {
            iterations += 1;
            state.copy_into(math, &mut backup);

            let mut var_e = RunningVariance::new();
            let mut failed = false;
            while var_e.count() < samples {
                match dynamics.transition(math, rng, state) {
                    Ok(error) if error.is_finite() => var_e.add(error),
                    Ok(_) => {
                        failed = true;
                        break;
                    }
                    Err(err) if err.is_recoverable() => {
                        log::debug!("Recoverable logp error during tuning: {err}");
                        failed = true;
                        break;
                    }
                    Err(err) => return Err(MchmcError::logp(err)),
                }
            }
            let var_e = var_e.current() / dim as f64;

            if failed || !var_e.is_finite() {
                backup.copy_into(math, state);
                hyper.eps *= 0.5;
                log::debug!(
                    "Tuning iteration {iterations}: diverged, shrinking eps to {}",
                    hyper.eps
                );
            } else {
                let distance = (var_e / self.options.var_e_wanted).ln().abs();
                if best.map_or(true, |(_, _, best_distance)| distance < best_distance) {
                    best = Some((hyper.eps, var_e, distance));
                }
                log::debug!(
                    "Tuning iteration {iterations}: eps = {}, varE = {var_e} from {samples} steps",
                    hyper.eps
                );
                if self.within_tolerance(var_e) {
                    converged = true;
                    break;
                }
                // Near the target the noise of the estimate decides the outcome.
                if distance <= NEAR_TARGET.ln() {
                    samples = samples.saturating_mul(2).min(max_samples);
                }
                let factor = (self.options.var_e_wanted / var_e).powf(exponent);
                hyper.eps *= factor.clamp(0.25, 4.);
            }
            hyper.nu = eval_nu(hyper.eps, hyper.l, dim);
            dynamics.set_hyperparameters(hyper);
        }

        let var_e = match best {
            Some((eps, var_e, _)) => {
                hyper.eps = eps;
                var_e
            }
            None => f64::NAN,
        };
        hyper.nu = eval_nu(hyper.eps, hyper.l, dim);
        dynamics.set_hyperparameters(hyper);
        state.energy = 0.;

        if converged {
            log::info!(
                "Tuning converged after {iterations} iterations: eps = {}, L = {}, varE = {var_e}",
                hyper.eps,
                hyper.l
            );
        } else {
            log::warn!(
                "Tuning did not reach varE = {} within {iterations} iterations, \
                 continuing with eps = {} (varE = {var_e})",
                self.options.var_e_wanted,
                hyper.eps
            );
        }

        Ok(TuningReport {
            eps: hyper.eps,
            l: hyper.l,
            nu: hyper.nu,
            var_e,
            iterations,
            converged,
        })
    }
}
