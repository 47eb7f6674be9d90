use std::{fmt, str::FromStr};

use crate::{error::MchmcError, math_base::Math, momentum::update_momentum, state::State};

/// Coefficient of the minimal-norm splitting (Omelyan et al. 2003).
pub const LAMBDA_C: f64 = 0.1931833275037836;

/// The discretization of the microcanonical flow used for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Integrator {
    /// A full position step followed by a full momentum step.
    /// One gradient evaluation per step, first order.
    SingleStage,
    /// `B(λε) A(ε/2) B((1-2λ)ε) A(ε/2) B(λε)`.
    /// Two gradient evaluations per step, second order and time reversible.
    #[default]
    MinimalNorm,
}

impl Integrator {
    pub fn name(&self) -> &'static str {
        match self {
            Integrator::SingleStage => "single-stage",
            Integrator::MinimalNorm => "minimal-norm",
        }
    }

    /// Order of the global error in the step size.
    pub fn order(&self) -> u32 {
        match self {
            Integrator::SingleStage => 1,
            Integrator::MinimalNorm => 2,
        }
    }

    pub fn grad_evals(&self) -> u64 {
        match self {
            Integrator::SingleStage => 1,
            Integrator::MinimalNorm => 2,
        }
    }

    /// Advance `state` by one step of size `eps` and return the kinetic
    /// energy change of the step.
    ///
    /// `lambda_c` is only used by the minimal-norm scheme. The energy and
    /// the time of the state are left alone, as is the log density: only
    /// position, momentum and gradient change.
    pub fn advance<M: Math>(
        &self,
        math: &mut M,
        state: &mut State<M>,
        eps: f64,
        lambda_c: f64,
    ) -> Result<f64, M::LogpErr> {
        let dim = math.dim() as f64;
        let delta_r = match self {
            Integrator::SingleStage => {
                math.axpy(&state.momentum, &mut state.position, eps);
                state.update_gradient(math)?;
                update_momentum(math, &mut state.momentum, &state.gradient, eps)
            }
            Integrator::MinimalNorm => {
                let mut delta_r =
                    update_momentum(math, &mut state.momentum, &state.gradient, eps * lambda_c);

                math.axpy(&state.momentum, &mut state.position, eps * 0.5);
                state.update_gradient(math)?;
                delta_r += update_momentum(
                    math,
                    &mut state.momentum,
                    &state.gradient,
                    eps * (1. - 2. * lambda_c),
                );

                math.axpy(&state.momentum, &mut state.position, eps * 0.5);
                state.update_gradient(math)?;
                delta_r
                    + update_momentum(math, &mut state.momentum, &state.gradient, eps * lambda_c)
            }
        };
        Ok(delta_r * (dim - 1.))
    }
}

impl fmt::Display for Integrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Integrator {
    type Err = MchmcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single-stage" => Ok(Integrator::SingleStage),
            "minimal-norm" => Ok(Integrator::MinimalNorm),
            _ => Err(MchmcError::UnknownIntegrator(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_math::{test_logps::NormalLogp, CpuMath};
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn setup(dim: usize, seed: u64) -> (CpuMath<NormalLogp>, State<CpuMath<NormalLogp>>) {
        let mut math = CpuMath::new(NormalLogp::new(dim, 0.));
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let state = State::init(&mut math, &mut rng, None).unwrap();
        (math, state)
    }

    fn max_diff(a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0f64, f64::max)
    }

    fn energy_error(
        integrator: Integrator,
        math: &mut CpuMath<NormalLogp>,
        state: &State<CpuMath<NormalLogp>>,
        eps: f64,
    ) -> f64 {
        let mut next = State::new(math);
        state.copy_into(math, &mut next);
        let kinetic_change = integrator.advance(math, &mut next, eps, LAMBDA_C).unwrap();
        next.update_nlogp(math).unwrap();
        kinetic_change + next.nlogp - state.nlogp
    }

    #[test]
    fn parse_names() {
        assert_eq!(
            "single-stage".parse::<Integrator>().unwrap(),
            Integrator::SingleStage
        );
        assert_eq!(
            "minimal-norm".parse::<Integrator>().unwrap(),
            Integrator::MinimalNorm
        );
        assert!(matches!(
            "leapfrog".parse::<Integrator>(),
            Err(MchmcError::UnknownIntegrator(name)) if name == "leapfrog"
        ));
        assert_eq!(Integrator::default().to_string(), "minimal-norm");
    }

    #[test]
    fn minimal_norm_is_reversible() {
        let (mut math, start) = setup(10, 1);
        let mut state = State::new(&mut math);
        start.copy_into(&mut math, &mut state);

        let forward = Integrator::MinimalNorm
            .advance(&mut math, &mut state, 0.3, LAMBDA_C)
            .unwrap();
        math.scale(&mut state.momentum, -1.);
        let backward = Integrator::MinimalNorm
            .advance(&mut math, &mut state, 0.3, LAMBDA_C)
            .unwrap();
        math.scale(&mut state.momentum, -1.);

        assert!((forward + backward).abs() < 1e-10);
        assert!(
            max_diff(
                &math.box_array(&state.position),
                &math.box_array(&start.position)
            ) < 1e-10
        );
        assert!(
            max_diff(
                &math.box_array(&state.momentum),
                &math.box_array(&start.momentum)
            ) < 1e-10
        );
    }

    #[test]
    fn half_steps_approach_single_stage() {
        let (mut math, start) = setup(5, 2);

        let mut last_ratio = f64::INFINITY;
        for eps in [1e-1, 1e-2, 1e-3] {
            let mut single = State::new(&mut math);
            start.copy_into(&mut math, &mut single);
            Integrator::SingleStage
                .advance(&mut math, &mut single, eps, LAMBDA_C)
                .unwrap();

            let mut halves = State::new(&mut math);
            start.copy_into(&mut math, &mut halves);
            for _ in 0..2 {
                Integrator::MinimalNorm
                    .advance(&mut math, &mut halves, eps / 2., LAMBDA_C)
                    .unwrap();
            }

            let diff = max_diff(
                &math.box_array(&single.position),
                &math.box_array(&halves.position),
            )
            .max(max_diff(
                &math.box_array(&single.momentum),
                &math.box_array(&halves.momentum),
            ));
            // Both agree with the flow to first order, so the difference
            // shrinks faster than the step itself.
            let ratio = diff / eps;
            assert!(ratio < last_ratio);
            assert!(diff < 10. * eps * eps);
            last_ratio = ratio;
        }
    }

    #[test]
    fn energy_is_nearly_conserved() {
        let (mut math, start) = setup(10, 3);
        for integrator in [Integrator::SingleStage, Integrator::MinimalNorm] {
            let coarse = energy_error(integrator, &mut math, &start, 1e-2).abs();
            let fine = energy_error(integrator, &mut math, &start, 1e-3).abs();
            assert!(coarse < 1e-2);
            assert!(fine < coarse);
        }
    }
}
