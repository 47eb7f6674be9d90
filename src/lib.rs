//! Sample from posterior distributions using microcanonical Hamiltonian
//! Monte Carlo.
//!
//! The chain moves a position together with a unit momentum direction along
//! a flow that conserves an energy exactly in the continuum. There is no
//! accept/reject step: the discretization error is controlled through the
//! step size, and a partial refreshment of the momentum after every step
//! makes the chain ergodic. The step size can be tuned automatically so that
//! the variance of the energy error per dimension matches a target.
//!
//! Users define the target density by implementing [`CpuLogpFunc`], for
//! which a gradient of the negative log density is needed.
//!
//! ## Example
//!
//! ```
//! use mchmc_rs::{CpuLogpFunc, LogpError, Sampler, SampleOptions, Settings};
//! use thiserror::Error;
//!
//! // Define a function that computes the unnormalized negative log density
//! // of an isotropic normal distribution and its gradient.
//! struct PosteriorDensity {}
//!
//! // The density might fail in a recoverable or non-recoverable manner...
//! #[derive(Debug, Error)]
//! enum PosteriorLogpError {}
//! impl LogpError for PosteriorLogpError {
//!     fn is_recoverable(&self) -> bool { false }
//! }
//!
//! impl CpuLogpFunc for PosteriorDensity {
//!     type LogpError = PosteriorLogpError;
//!
//!     fn dim(&self) -> usize { 10 }
//!
//!     fn nlogp(&mut self, position: &[f64]) -> Result<f64, Self::LogpError> {
//!         let mu = 3f64;
//!         Ok(position.iter().map(|x| 0.5 * (x - mu) * (x - mu)).sum())
//!     }
//!
//!     fn grad_nlogp(&mut self, position: &[f64], grad: &mut [f64]) -> Result<(), Self::LogpError> {
//!         let mu = 3f64;
//!         for (g, x) in grad.iter_mut().zip(position) {
//!             *g = x - mu;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! // Leave eps and L at zero to tune the step size.
//! let mut settings = Settings::default();
//! settings.seed = 42;
//! let sampler = Sampler::new(0., 0., settings).unwrap();
//!
//! let options = SampleOptions { initial_x: None, monitor_energy: true };
//! let trace = sampler.sample(PosteriorDensity {}, 1000, &options).unwrap();
//! assert_eq!(trace.len(), 1001);
//! let report = trace.tuning.unwrap();
//! println!("eps = {}, varE = {}", report.eps, report.var_e);
//! ```

mod cpu_math;
mod dynamics;
mod error;
mod integrator;
mod math;
mod math_base;
pub mod momentum;
mod sampler;
mod state;
mod trace;
mod tuning;

pub use cpu_math::{test_logps, CpuLogpFunc, CpuMath};
pub use dynamics::{track_energy, Dynamics, Hyperparameters};
pub use error::{LogpError, MchmcError, Result};
pub use integrator::{Integrator, LAMBDA_C};
pub use math_base::Math;
pub use sampler::{SampleOptions, Sampler, Settings};
pub use state::State;
pub use trace::{Draw, Trace};
pub use tuning::{Tuner, TuningOptions, TuningReport};
