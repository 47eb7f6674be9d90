use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{
    cpu_math::{CpuLogpFunc, CpuMath},
    dynamics::{Dynamics, Hyperparameters},
    error::{MchmcError, Result},
    integrator::{Integrator, LAMBDA_C},
    math_base::Math,
    momentum::eval_nu,
    state::State,
    trace::{Draw, Trace},
    tuning::{Tuner, TuningOptions, TuningReport},
};

/// Settings for the microcanonical sampler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    /// Seed of the random stream of the chain.
    pub seed: u64,
    /// Per-dimension variance of the energy error the tuner aims for.
    pub var_e_wanted: f64,
    /// Number of steps whose output is discarded before tuning and sampling.
    pub burn_in: u64,
    /// Number of steps in each tuning iteration.
    pub tune_samples: u64,
    /// Maximum number of tuning iterations.
    pub tune_maxiter: u64,
    /// Relative tolerance of the tuner around `var_e_wanted`.
    pub tune_tolerance: f64,
    pub integrator: Integrator,
    /// Noise scale of the momentum refreshment. Derived from `eps` and `l`
    /// if not set. Ignored when the step size is tuned.
    pub nu: Option<f64>,
    /// Coefficient of the minimal-norm integrator.
    pub lambda_c: f64,
    /// Accumulate the integration time `eps` per step in the chain state.
    pub advance_time: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            seed: 0,
            var_e_wanted: 0.2,
            burn_in: 0,
            tune_samples: 100,
            tune_maxiter: 10,
            tune_tolerance: 0.25,
            integrator: Integrator::MinimalNorm,
            nu: None,
            lambda_c: LAMBDA_C,
            advance_time: false,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| MchmcError::InvalidOption {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl Settings {
    /// Build settings from string key/value pairs, starting from the
    /// defaults. Unknown keys are an error.
    ///
    /// Recognized keys are `seed`, `varE_wanted`, `burn_in`, `tune_samples`,
    /// `tune_maxiter`, `tune_tolerance`, `integrator`, `nu`, `lambda_c` and
    /// `advance_time`.
    pub fn from_options<I, K, V>(options: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = Settings::default();
        for (key, value) in options {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "seed" => settings.seed = parse_value(key, value)?,
                "varE_wanted" | "var_e_wanted" => settings.var_e_wanted = parse_value(key, value)?,
                "burn_in" => settings.burn_in = parse_value(key, value)?,
                "tune_samples" => settings.tune_samples = parse_value(key, value)?,
                "tune_maxiter" => settings.tune_maxiter = parse_value(key, value)?,
                "tune_tolerance" => settings.tune_tolerance = parse_value(key, value)?,
                "integrator" => settings.integrator = value.trim().parse()?,
                "nu" => settings.nu = Some(parse_value(key, value)?),
                "lambda_c" => settings.lambda_c = parse_value(key, value)?,
                "advance_time" => settings.advance_time = parse_value(key, value)?,
                _ => return Err(MchmcError::UnknownOption(key.to_string())),
            }
        }
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tune_samples == 0 {
            return Err(MchmcError::BadSettings(
                "tune_samples must be positive".to_string(),
            ));
        }
        if self.tune_maxiter == 0 {
            return Err(MchmcError::BadSettings(
                "tune_maxiter must be positive".to_string(),
            ));
        }
        if !(self.var_e_wanted.is_finite() && self.var_e_wanted > 0.) {
            return Err(MchmcError::BadSettings(format!(
                "varE_wanted must be positive, got {}",
                self.var_e_wanted
            )));
        }
        if !(self.tune_tolerance.is_finite() && self.tune_tolerance > 0.) {
            return Err(MchmcError::BadSettings(format!(
                "tune_tolerance must be positive, got {}",
                self.tune_tolerance
            )));
        }
        if !(self.lambda_c > 0. && self.lambda_c < 0.5) {
            return Err(MchmcError::BadSettings(format!(
                "lambda_c must be in (0, 0.5), got {}",
                self.lambda_c
            )));
        }
        if let Some(nu) = self.nu {
            if !(nu.is_finite() && nu >= 0.) {
                return Err(MchmcError::BadSettings(format!(
                    "nu must be finite and non-negative, got {nu}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn tuning_options(&self) -> TuningOptions {
        TuningOptions {
            var_e_wanted: self.var_e_wanted,
            samples: self.tune_samples,
            maxiter: self.tune_maxiter,
            tolerance: self.tune_tolerance,
        }
    }
}

/// Options of a single sampling run.
#[derive(Debug, Clone, Default)]
pub struct SampleOptions {
    /// Start the chain here instead of at a draw from the prior.
    pub initial_x: Option<Vec<f64>>,
    /// Record the energy estimate with every draw.
    pub monitor_energy: bool,
}

/// Phases of a sampling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    BurnIn,
    Tune,
    Produce,
    Done,
}

/// A microcanonical sampler. `eps` and `l` equal to zero mean that they
/// should be chosen automatically; the step size is only tuned if both are
/// zero.
#[derive(Debug, Clone)]
pub struct Sampler {
    eps: f64,
    l: f64,
    settings: Settings,
}

impl Sampler {
    pub fn new(eps: f64, l: f64, settings: Settings) -> Result<Self> {
        for (name, value) in [("eps", eps), ("L", l)] {
            if !(value.is_finite() && value >= 0.) {
                return Err(MchmcError::BadSettings(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        settings.validate()?;
        Ok(Self { eps, l, settings })
    }

    /// Shorthand for [`Settings::from_options`] followed by [`Sampler::new`].
    pub fn from_options<I, K, V>(eps: f64, l: f64, options: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::new(eps, l, Settings::from_options(options)?)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn l(&self) -> f64 {
        self.l
    }

    /// Whether a run of this sampler tunes the step size.
    pub fn will_tune(&self) -> bool {
        self.eps == 0. && self.l == 0.
    }

    fn initial_hyperparameters(&self, dim: usize) -> Hyperparameters {
        let lambda_c = self.settings.lambda_c;
        if self.will_tune() {
            return Tuner::initial_hyperparameters(dim, lambda_c);
        }

        let defaults = Tuner::initial_hyperparameters(dim, lambda_c);
        let l = if self.l == 0. {
            log::info!("L not set, using sqrt(d) = {}", defaults.l);
            defaults.l
        } else {
            self.l
        };
        let eps = if self.eps == 0. {
            log::info!("eps not set, using sqrt(d) / 2 = {}", defaults.eps);
            defaults.eps
        } else {
            self.eps
        };
        Hyperparameters {
            eps,
            l,
            nu: self.settings.nu.unwrap_or_else(|| eval_nu(eps, l, dim)),
            lambda_c,
        }
    }

    /// Run a chain of `num_steps` steps on a target that lives in main memory.
    pub fn sample<F: CpuLogpFunc>(
        &self,
        logp: F,
        num_steps: u64,
        options: &SampleOptions,
    ) -> Result<Trace> {
        let mut math = CpuMath::new(logp);
        self.sample_with_math(&mut math, num_steps, options)
    }

    /// Run a chain of `num_steps` steps.
    ///
    /// The trace contains `num_steps + 1` draws, the first being the state
    /// after burn-in and tuning. The same seed and options give the same
    /// trace.
    pub fn sample_with_math<M: Math>(
        &self,
        math: &mut M,
        num_steps: u64,
        options: &SampleOptions,
    ) -> Result<Trace> {
        let settings = &self.settings;
        let dim = math.dim();
        let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);

        let mut dynamics = Dynamics::new(
            math,
            settings.integrator,
            self.initial_hyperparameters(dim),
            settings.advance_time,
        );
        let mut state = State::new(math);
        let mut tuning: Option<TuningReport> = None;
        let mut draws = Vec::with_capacity(draws_capacity(num_steps));
        let mut phase = Phase::Init;

        loop {
            log::trace!("Entering phase {phase:?}");
            phase = match phase {
                Phase::Init => {
                    state = State::init(math, &mut rng, options.initial_x.as_deref())?;
                    Phase::BurnIn
                }
                Phase::BurnIn => {
                    if settings.burn_in > 0 {
                        log::info!("Burn-in of {} steps", settings.burn_in);
                    }
                    for _ in 0..settings.burn_in {
                        dynamics
                            .step(math, &mut rng, &mut state)
                            .map_err(MchmcError::logp)?;
                    }
                    // The log density is only needed from here on.
                    state.update_nlogp(math).map_err(MchmcError::logp)?;
                    if self.will_tune() {
                        Phase::Tune
                    } else {
                        Phase::Produce
                    }
                }
                Phase::Tune => {
                    let tuner = Tuner::new(settings.tuning_options());
                    tuning = Some(tuner.tune(math, &mut rng, &mut dynamics, &mut state)?);
                    Phase::Produce
                }
                Phase::Produce => {
                    let hyper = dynamics.hyperparameters();
                    log::info!(
                        "Sampling {num_steps} steps with eps = {}, L = {}, nu = {}",
                        hyper.eps,
                        hyper.l,
                        hyper.nu
                    );
                    state.energy = 0.;
                    draws.push(make_draw(math, &state, options.monitor_energy)?);
                    for _ in 0..num_steps {
                        dynamics
                            .transition(math, &mut rng, &mut state)
                            .map_err(MchmcError::logp)?;
                        draws.push(make_draw(math, &state, options.monitor_energy)?);
                    }
                    Phase::Done
                }
                Phase::Done => break,
            };
        }

        Ok(Trace {
            draws,
            hyperparameters: *dynamics.hyperparameters(),
            integrator: dynamics.integrator(),
            tuning,
            grad_evals: dynamics.grad_evals(),
        })
    }
}

/// Draws reserved up front. Longer traces grow on demand.
const MAX_RESERVED_DRAWS: usize = 1 << 16;

fn draws_capacity(num_steps: u64) -> usize {
    usize::try_from(num_steps)
        .map_or(MAX_RESERVED_DRAWS, |n| n.saturating_add(1))
        .min(MAX_RESERVED_DRAWS)
}

fn make_draw<M: Math>(math: &mut M, state: &State<M>, monitor_energy: bool) -> Result<Draw> {
    let mut position = vec![0f64; math.dim()];
    math.inv_transform(&state.position, &mut position)
        .map_err(MchmcError::logp)?;
    Ok(Draw {
        position: position.into(),
        energy: monitor_energy.then_some(state.energy),
        logp: state.logp(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cpu_math::test_logps::{LogNormalLogp, NormalLogp},
        LogpError,
    };
    use pretty_assertions::assert_eq;
    use thiserror::Error;

    #[test]
    fn default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.integrator, Integrator::MinimalNorm);
        assert_eq!(settings.var_e_wanted, 0.2);
        assert_eq!(settings.lambda_c, LAMBDA_C);
        assert!(settings.validate().is_ok());
        assert_eq!(Settings::from_options::<_, &str, &str>([]).unwrap(), settings);
    }

    #[test]
    fn settings_from_options() {
        let settings = Settings::from_options([
            ("seed", "42"),
            ("varE_wanted", "0.1"),
            ("burn_in", "10"),
            ("tune_samples", "50"),
            ("tune_maxiter", "3"),
            ("integrator", "single-stage"),
            ("nu", "0.5"),
            ("lambda_c", "0.2"),
            ("advance_time", "true"),
        ])
        .unwrap();
        assert_eq!(
            settings,
            Settings {
                seed: 42,
                var_e_wanted: 0.1,
                burn_in: 10,
                tune_samples: 50,
                tune_maxiter: 3,
                tune_tolerance: 0.25,
                integrator: Integrator::SingleStage,
                nu: Some(0.5),
                lambda_c: 0.2,
                advance_time: true,
            }
        );
    }

    #[test]
    fn bad_options() {
        assert!(matches!(
            Settings::from_options([("step_size", "0.1")]),
            Err(MchmcError::UnknownOption(key)) if key == "step_size"
        ));
        assert!(matches!(
            Settings::from_options([("burn_in", "-1")]),
            Err(MchmcError::InvalidOption { key, value }) if key == "burn_in" && value == "-1"
        ));
        assert!(matches!(
            Sampler::from_options(0.1, 1., [("integrator", "leapfrog")]),
            Err(MchmcError::UnknownIntegrator(_))
        ));
    }

    #[test]
    fn invalid_settings() {
        for settings in [
            Settings {
                tune_samples: 0,
                ..Settings::default()
            },
            Settings {
                tune_maxiter: 0,
                ..Settings::default()
            },
            Settings {
                var_e_wanted: 0.,
                ..Settings::default()
            },
            Settings {
                nu: Some(f64::NAN),
                ..Settings::default()
            },
            Settings {
                lambda_c: 0.5,
                ..Settings::default()
            },
        ] {
            assert!(matches!(
                Sampler::new(0.1, 1., settings),
                Err(MchmcError::BadSettings(_))
            ));
        }
        assert!(Sampler::new(-0.1, 1., Settings::default()).is_err());
        assert!(Sampler::new(0.1, f64::INFINITY, Settings::default()).is_err());
    }

    #[test]
    fn zero_steps_give_initial_state() {
        let sampler = Sampler::new(0.1, 1., Settings::default()).unwrap();
        let options = SampleOptions {
            initial_x: Some(vec![1., 2.]),
            monitor_energy: true,
        };
        let trace = sampler.sample(NormalLogp::new(2, 0.), 0, &options).unwrap();
        assert_eq!(trace.len(), 1);
        assert_eq!(&*trace.draws[0].position, &[1., 2.]);
        assert_eq!(trace.draws[0].logp, -2.5);
        assert_eq!(trace.draws[0].energy, Some(0.));
        assert_eq!(trace.grad_evals, 0);
    }

    #[test]
    fn output_shape() {
        let sampler = Sampler::new(0.2, 2., Settings::default()).unwrap();
        let trace = sampler
            .sample(NormalLogp::new(3, 0.), 25, &SampleOptions::default())
            .unwrap();
        assert_eq!(trace.len(), 26);
        assert!(trace.tuning.is_none());
        assert!(trace.draws.iter().all(|draw| draw.energy.is_none()));
        assert!(trace.draws.iter().all(|draw| draw.position.len() == 3));
        assert_eq!(trace.grad_evals, 50);
        assert_eq!(trace.hyperparameters.eps, 0.2);
        assert_eq!(trace.hyperparameters.nu, eval_nu(0.2, 2., 3));
    }

    #[test]
    fn positions_are_transformed() {
        let sampler = Sampler::new(0.2, 2., Settings::default()).unwrap();
        let trace = sampler
            .sample(LogNormalLogp { dim: 2 }, 10, &SampleOptions::default())
            .unwrap();
        assert!(trace.positions().flatten().all(|&x| x > 0.));
    }

    #[test]
    fn same_seed_same_trace() {
        let settings = Settings {
            seed: 7,
            burn_in: 5,
            ..Settings::default()
        };
        let options = SampleOptions {
            initial_x: None,
            monitor_energy: true,
        };
        let a = Sampler::new(0.3, 1.5, settings)
            .unwrap()
            .sample(NormalLogp::new(4, 1.), 50, &options)
            .unwrap();
        let b = Sampler::new(0.3, 1.5, settings)
            .unwrap()
            .sample(NormalLogp::new(4, 1.), 50, &options)
            .unwrap();
        assert_eq!(a.draws, b.draws);

        let c = Sampler::new(0.3, 1.5, Settings { seed: 8, ..settings })
            .unwrap()
            .sample(NormalLogp::new(4, 1.), 50, &options)
            .unwrap();
        assert_ne!(a.draws, c.draws);
    }

    #[test]
    fn tuning_only_without_eps_and_l() {
        let settings = Settings {
            tune_maxiter: 2,
            ..Settings::default()
        };
        let options = SampleOptions::default();
        let target = NormalLogp::new(5, 0.);

        let trace = Sampler::new(0., 0., settings)
            .unwrap()
            .sample(target.clone(), 5, &options)
            .unwrap();
        let report = trace.tuning.expect("tuner did not run");
        assert_eq!(trace.hyperparameters.eps, report.eps);
        assert!(report.iterations >= 1 && report.iterations <= 2);

        let trace = Sampler::new(0.1, 1., settings)
            .unwrap()
            .sample(target.clone(), 5, &options)
            .unwrap();
        assert!(trace.tuning.is_none());
        assert_eq!(trace.hyperparameters.eps, 0.1);

        // Only one of them set: the other takes its default, no tuning.
        let trace = Sampler::new(0., 2., settings)
            .unwrap()
            .sample(target.clone(), 5, &options)
            .unwrap();
        assert!(trace.tuning.is_none());
        assert_eq!(trace.hyperparameters.eps, 0.5 * 5f64.sqrt());
        assert_eq!(trace.hyperparameters.l, 2.);

        let trace = Sampler::new(0.1, 0., settings)
            .unwrap()
            .sample(target, 5, &options)
            .unwrap();
        assert!(trace.tuning.is_none());
        assert_eq!(trace.hyperparameters.l, 5f64.sqrt());
    }

    #[test]
    fn explicit_nu() {
        let settings = Settings {
            nu: Some(0.),
            ..Settings::default()
        };
        let trace = Sampler::new(0.1, 1., settings)
            .unwrap()
            .sample(NormalLogp::new(2, 0.), 3, &SampleOptions::default())
            .unwrap();
        assert_eq!(trace.hyperparameters.nu, 0.);
    }

    #[test]
    fn bad_initial_position() {
        let sampler = Sampler::new(0.1, 1., Settings::default()).unwrap();
        let options = SampleOptions {
            initial_x: Some(vec![0.; 3]),
            monitor_energy: false,
        };
        assert!(matches!(
            sampler.sample(NormalLogp::new(2, 0.), 1, &options),
            Err(MchmcError::BadInitPosition {
                expected: 2,
                found: 3
            })
        ));
        assert!(matches!(
            sampler.sample(NormalLogp::new(1, 0.), 1, &SampleOptions::default()),
            Err(MchmcError::DimensionTooSmall(1))
        ));
    }

    #[derive(Debug, Error)]
    #[error("target evaluation failed")]
    struct Broken;

    impl LogpError for Broken {
        fn is_recoverable(&self) -> bool {
            false
        }
    }

    /// A standard normal whose gradient fails after a number of calls.
    struct FailsAfter {
        calls: usize,
        limit: usize,
    }

    impl CpuLogpFunc for FailsAfter {
        type LogpError = Broken;

        fn dim(&self) -> usize {
            2
        }

        fn nlogp(&mut self, position: &[f64]) -> std::result::Result<f64, Broken> {
            Ok(position.iter().map(|x| 0.5 * x * x).sum())
        }

        fn grad_nlogp(
            &mut self,
            position: &[f64],
            gradient: &mut [f64],
        ) -> std::result::Result<(), Broken> {
            self.calls += 1;
            if self.calls > self.limit {
                return Err(Broken);
            }
            gradient.copy_from_slice(position);
            Ok(())
        }
    }

    #[test]
    fn target_errors_propagate() {
        let sampler = Sampler::new(0.1, 1., Settings::default()).unwrap();
        let result = sampler.sample(
            FailsAfter { calls: 0, limit: 5 },
            10,
            &SampleOptions::default(),
        );
        assert!(matches!(result, Err(MchmcError::LogpFailure(_))));

        let result = Sampler::new(0., 0., Settings::default()).unwrap().sample(
            FailsAfter { calls: 0, limit: 5 },
            10,
            &SampleOptions::default(),
        );
        assert!(matches!(result, Err(MchmcError::LogpFailure(_))));
    }

    #[test]
    fn huge_step_counts() {
        assert_eq!(draws_capacity(0), 1);
        assert_eq!(draws_capacity(999), 1000);
        assert_eq!(draws_capacity(u64::MAX), MAX_RESERVED_DRAWS);
        assert_eq!(draws_capacity(u64::MAX - 1), MAX_RESERVED_DRAWS);

        let sampler = Sampler::new(0.1, 1., Settings::default()).unwrap();
        let result = sampler.sample(
            FailsAfter { calls: 0, limit: 5 },
            u64::MAX,
            &SampleOptions::default(),
        );
        assert!(matches!(result, Err(MchmcError::LogpFailure(_))));
    }
}
