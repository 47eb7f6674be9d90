use rand::Rng;

use crate::{
    integrator::Integrator, math_base::Math, momentum::partially_refresh_momentum, state::State,
};

/// Parameters of the microcanonical dynamics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hyperparameters {
    /// Step size.
    pub eps: f64,
    /// Momentum decoherence length.
    pub l: f64,
    /// Scale of the noise mixed into the momentum after each step.
    pub nu: f64,
    /// Coefficient of the minimal-norm integrator.
    pub lambda_c: f64,
}

/// One step of the chain: a deterministic integrator step followed by a
/// partial refreshment of the momentum.
pub struct Dynamics<M: Math> {
    integrator: Integrator,
    hyper: Hyperparameters,
    advance_time: bool,
    noise: M::Vector,
    grad_evals: u64,
}

impl<M: Math> Dynamics<M> {
    pub fn new(
        math: &mut M,
        integrator: Integrator,
        hyper: Hyperparameters,
        advance_time: bool,
    ) -> Self {
        Self {
            integrator,
            hyper,
            advance_time,
            noise: math.new_array(),
            grad_evals: 0,
        }
    }

    pub fn integrator(&self) -> Integrator {
        self.integrator
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyper
    }

    pub(crate) fn set_hyperparameters(&mut self, hyper: Hyperparameters) {
        self.hyper = hyper;
    }

    /// Total number of gradient evaluations so far.
    pub fn grad_evals(&self) -> u64 {
        self.grad_evals
    }

    /// Move `state` by one step and return the kinetic energy change.
    ///
    /// The log density and the energy of the state are not updated, see
    /// [`Dynamics::transition`] for that. `time` is only advanced (by `eps`)
    /// if the dynamics were created with `advance_time`.
    pub fn step<R: Rng + ?Sized>(
        &mut self,
        math: &mut M,
        rng: &mut R,
        state: &mut State<M>,
    ) -> Result<f64, M::LogpErr> {
        let Hyperparameters {
            eps, nu, lambda_c, ..
        } = self.hyper;

        self.grad_evals += self.integrator.grad_evals();
        let kinetic_change = self.integrator.advance(math, state, eps, lambda_c)?;
        partially_refresh_momentum(math, rng, &mut state.momentum, &mut self.noise, nu);

        if self.advance_time {
            state.time += eps;
        }
        Ok(kinetic_change)
    }

    /// A full transition: [`Dynamics::step`], then the log density at the new
    /// position and the energy estimate. Returns the energy error of the step.
    pub fn transition<R: Rng + ?Sized>(
        &mut self,
        math: &mut M,
        rng: &mut R,
        state: &mut State<M>,
    ) -> Result<f64, M::LogpErr> {
        let nlogp = state.nlogp;
        let kinetic_change = self.step(math, rng, state)?;
        state.update_nlogp(math)?;

        let (_, energy) = track_energy(state.energy, nlogp, state.nlogp, kinetic_change);
        let energy_error = energy - state.energy;
        state.energy = energy;
        Ok(energy_error)
    }
}

/// Random walk of the total energy.
///
/// Given the energy estimate before a step, the negative log density before
/// and after it and the kinetic change of the step, return the log density
/// at the new position and the new energy estimate.
pub fn track_energy(energy: f64, nlogp: f64, new_nlogp: f64, kinetic_change: f64) -> (f64, f64) {
    (-new_nlogp, energy + kinetic_change + new_nlogp - nlogp)
}
