use rand::Rng;

use crate::{
    error::{MchmcError, Result},
    math_base::Math,
    momentum::random_direction,
};

/// A point in the phase space of the microcanonical dynamics.
///
/// The gradient is stored pre-multiplied by `d / (d - 1)`, the factor that
/// makes the position marginal of the dynamics equal to the target.
pub struct State<M: Math> {
    pub position: M::Vector,
    /// Unit momentum direction.
    pub momentum: M::Vector,
    pub gradient: M::Vector,
    /// Negative log density at `position`.
    pub nlogp: f64,
    /// Running energy estimate, a diagnostic only.
    pub energy: f64,
    pub time: f64,
}

impl<M: Math> State<M> {
    pub fn new(math: &mut M) -> Self {
        Self {
            position: math.new_array(),
            momentum: math.new_array(),
            gradient: math.new_array(),
            nlogp: 0f64,
            energy: 0f64,
            time: 0f64,
        }
    }

    /// Set up a chain at `init`, or at a draw from the prior of the target if
    /// no initial position is given. The momentum direction is uniform on the
    /// sphere.
    pub fn init<R: Rng + ?Sized>(
        math: &mut M,
        rng: &mut R,
        init: Option<&[f64]>,
    ) -> Result<Self> {
        let dim = math.dim();
        if dim < 2 {
            return Err(MchmcError::DimensionTooSmall(dim));
        }

        let mut state = Self::new(math);
        match init {
            Some(init) => {
                if init.len() != dim {
                    return Err(MchmcError::BadInitPosition {
                        expected: dim,
                        found: init.len(),
                    });
                }
                math.read_from_slice(&mut state.position, init);
            }
            None => math
                .prior_draw(rng, &mut state.position)
                .map_err(MchmcError::logp)?,
        }

        state.update_gradient(math).map_err(MchmcError::logp)?;
        state.update_nlogp(math).map_err(MchmcError::logp)?;
        if !state.nlogp.is_finite() || !math.array_all_finite(&state.gradient) {
            return Err(MchmcError::BadInitGrad);
        }

        random_direction(math, rng, &mut state.momentum, true);
        Ok(state)
    }

    pub(crate) fn update_gradient(&mut self, math: &mut M) -> std::result::Result<(), M::LogpErr> {
        math.grad_nlogp_array(&self.position, &mut self.gradient)?;
        let dim = math.dim() as f64;
        math.scale(&mut self.gradient, dim / (dim - 1.));
        Ok(())
    }

    pub(crate) fn update_nlogp(&mut self, math: &mut M) -> std::result::Result<(), M::LogpErr> {
        self.nlogp = math.nlogp_array(&self.position)?;
        Ok(())
    }

    pub fn logp(&self) -> f64 {
        -self.nlogp
    }

    pub fn copy_into(&self, math: &mut M, other: &mut Self) {
        let Self {
            position,
            momentum,
            gradient,
            nlogp,
            energy,
            time,
        } = self;
        math.copy_into(position, &mut other.position);
        math.copy_into(momentum, &mut other.momentum);
        math.copy_into(gradient, &mut other.gradient);
        other.nlogp = *nlogp;
        other.energy = *energy;
        other.time = *time;
    }
}
