use std::{error::Error, fmt::Debug};

use faer::Col;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::{
    math::{axpby, axpy, scale, vector_dot},
    math_base::Math,
    LogpError,
};

/// A target density that lives in main memory.
///
/// This needs to be implemented by users of the library to define the
/// distribution they want to sample from. Positions are in the
/// (possibly reparametrized) space the dynamics run in; `inv_transform`
/// maps them back for reporting.
pub trait CpuLogpFunc {
    type LogpError: Debug + Send + Sync + Error + LogpError + 'static;

    fn dim(&self) -> usize;

    /// Negative log density, up to an additive constant.
    fn nlogp(&mut self, position: &[f64]) -> Result<f64, Self::LogpError>;

    /// Gradient of the negative log density.
    fn grad_nlogp(&mut self, position: &[f64], gradient: &mut [f64])
        -> Result<(), Self::LogpError>;

    /// Draw an initial position. Defaults to independent standard normals.
    fn prior_draw<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        position: &mut [f64],
    ) -> Result<(), Self::LogpError> {
        position
            .iter_mut()
            .for_each(|x| *x = rng.sample(StandardNormal));
        Ok(())
    }

    /// Map a position to the natural parametrization of the model.
    fn inv_transform(&mut self, position: &[f64], out: &mut [f64]) -> Result<(), Self::LogpError> {
        out.copy_from_slice(position);
        Ok(())
    }
}

#[derive(Debug)]
pub struct CpuMath<F: CpuLogpFunc> {
    logp_func: F,
    arch: pulp::Arch,
}

impl<F: CpuLogpFunc> CpuMath<F> {
    pub fn new(logp_func: F) -> Self {
        let arch = pulp::Arch::new();
        Self { logp_func, arch }
    }
}

// Owned columns are always contiguous.
fn as_slice(col: &Col<f64>) -> &[f64] {
    col.try_as_col_major().unwrap().as_slice()
}

fn as_slice_mut(col: &mut Col<f64>) -> &mut [f64] {
    col.try_as_col_major_mut().unwrap().as_slice_mut()
}

impl<F: CpuLogpFunc> Math for CpuMath<F> {
    type Vector = Col<f64>;
    type LogpErr = F::LogpError;

    fn new_array(&self) -> Self::Vector {
        Col::zeros(self.dim())
    }

    fn dim(&self) -> usize {
        self.logp_func.dim()
    }

    fn nlogp_array(&mut self, position: &Self::Vector) -> Result<f64, Self::LogpErr> {
        self.logp_func.nlogp(as_slice(position))
    }

    fn grad_nlogp_array(
        &mut self,
        position: &Self::Vector,
        gradient: &mut Self::Vector,
    ) -> Result<(), Self::LogpErr> {
        self.logp_func.grad_nlogp(as_slice(position), as_slice_mut(gradient))
    }

    fn prior_draw<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        position: &mut Self::Vector,
    ) -> Result<(), Self::LogpErr> {
        self.logp_func.prior_draw(rng, as_slice_mut(position))
    }

    fn inv_transform(
        &mut self,
        position: &Self::Vector,
        out: &mut [f64],
    ) -> Result<(), Self::LogpErr> {
        self.logp_func.inv_transform(as_slice(position), out)
    }

    fn read_from_slice(&mut self, dest: &mut Self::Vector, source: &[f64]) {
        as_slice_mut(dest).copy_from_slice(source);
    }

    fn write_to_slice(&mut self, source: &Self::Vector, dest: &mut [f64]) {
        dest.copy_from_slice(as_slice(source))
    }

    fn copy_into(&mut self, array: &Self::Vector, dest: &mut Self::Vector) {
        dest.clone_from(array)
    }

    fn axpy(&mut self, x: &Self::Vector, y: &mut Self::Vector, a: f64) {
        axpy(as_slice(x), as_slice_mut(y), a);
    }

    fn axpby(&mut self, x: &Self::Vector, y: &mut Self::Vector, a: f64, b: f64) {
        axpby(as_slice(x), as_slice_mut(y), a, b);
    }

    fn scale(&mut self, array: &mut Self::Vector, a: f64) {
        scale(as_slice_mut(array), a);
    }

    fn array_all_finite(&mut self, array: &Self::Vector) -> bool {
        self.arch.dispatch(|| as_slice(array).iter().all(|x| x.is_finite()))
    }

    fn array_vector_dot(&mut self, array1: &Self::Vector, array2: &Self::Vector) -> f64 {
        vector_dot(as_slice(array1), as_slice(array2))
    }

    fn array_gaussian<R: Rng + ?Sized>(&mut self, rng: &mut R, dest: &mut Self::Vector) {
        let dist = StandardNormal;
        as_slice_mut(dest).iter_mut().for_each(|p| {
            let norm: f64 = rng.sample(dist);
            *p = norm;
        });
    }
}

pub mod test_logps {
    use crate::{cpu_math::CpuLogpFunc, LogpError};
    use thiserror::Error;

    /// Independent normal distribution with common mean and scale.
    #[derive(Clone, Debug)]
    pub struct NormalLogp {
        pub dim: usize,
        pub mu: f64,
        pub sigma: f64,
    }

    impl NormalLogp {
        pub fn new(dim: usize, mu: f64) -> NormalLogp {
            NormalLogp { dim, mu, sigma: 1. }
        }
    }

    #[derive(Error, Debug)]
    pub enum NormalLogpError {}

    impl LogpError for NormalLogpError {
        fn is_recoverable(&self) -> bool {
            false
        }
    }

    impl CpuLogpFunc for NormalLogp {
        type LogpError = NormalLogpError;

        fn dim(&self) -> usize {
            self.dim
        }

        fn nlogp(&mut self, position: &[f64]) -> Result<f64, NormalLogpError> {
            let inv_var = self.sigma.powi(-2);
            Ok(position
                .iter()
                .map(|&x| {
                    let diff = x - self.mu;
                    0.5 * diff * diff * inv_var
                })
                .sum())
        }

        fn grad_nlogp(
            &mut self,
            position: &[f64],
            gradient: &mut [f64],
        ) -> Result<(), NormalLogpError> {
            let n = position.len();
            assert!(gradient.len() == n);

            let inv_var = self.sigma.powi(-2);
            position
                .iter()
                .zip(gradient.iter_mut())
                .for_each(|(&x, g)| *g = (x - self.mu) * inv_var);
            Ok(())
        }
    }

    /// A log-normal target sampled in log space, reported on the natural scale.
    #[derive(Clone, Debug)]
    pub struct LogNormalLogp {
        pub dim: usize,
    }

    impl CpuLogpFunc for LogNormalLogp {
        type LogpError = NormalLogpError;

        fn dim(&self) -> usize {
            self.dim
        }

        fn nlogp(&mut self, position: &[f64]) -> Result<f64, NormalLogpError> {
            Ok(position.iter().map(|x| 0.5 * x * x).sum())
        }

        fn grad_nlogp(
            &mut self,
            position: &[f64],
            gradient: &mut [f64],
        ) -> Result<(), NormalLogpError> {
            gradient.copy_from_slice(position);
            Ok(())
        }

        fn inv_transform(
            &mut self,
            position: &[f64],
            out: &mut [f64],
        ) -> Result<(), NormalLogpError> {
            out.iter_mut()
                .zip(position.iter())
                .for_each(|(out, x)| *out = x.exp());
            Ok(())
        }
    }
}
