use std::fmt::Debug;

use crate::LogpError;

/// Vector backend of the sampler, together with access to the target.
///
/// All state vectors of a chain are `Self::Vector`s created by
/// [`Math::new_array`], so a backend can keep them in whatever layout
/// suits it. The dynamics only ever talk to the target through this trait.
pub trait Math {
    type Vector: Debug;
    type LogpErr: Debug + Send + Sync + LogpError + 'static;

    fn new_array(&self) -> Self::Vector;

    /// The dimension of the parameter space.
    fn dim(&self) -> usize;

    /// Negative log density of the target at `position`.
    fn nlogp_array(&mut self, position: &Self::Vector) -> Result<f64, Self::LogpErr>;

    /// Gradient of the negative log density of the target at `position`.
    fn grad_nlogp_array(
        &mut self,
        position: &Self::Vector,
        gradient: &mut Self::Vector,
    ) -> Result<(), Self::LogpErr>;

    /// Draw a starting position from the prior of the target.
    fn prior_draw<R: rand::Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        position: &mut Self::Vector,
    ) -> Result<(), Self::LogpErr>;

    /// Map a position back to the natural parametrization of the model.
    fn inv_transform(&mut self, position: &Self::Vector, out: &mut [f64])
        -> Result<(), Self::LogpErr>;

    fn read_from_slice(&mut self, dest: &mut Self::Vector, source: &[f64]);
    fn write_to_slice(&mut self, source: &Self::Vector, dest: &mut [f64]);
    fn copy_into(&mut self, array: &Self::Vector, dest: &mut Self::Vector);
    fn axpy(&mut self, x: &Self::Vector, y: &mut Self::Vector, a: f64);

    /// `y = a * y + b * x`
    fn axpby(&mut self, x: &Self::Vector, y: &mut Self::Vector, a: f64, b: f64);
    fn scale(&mut self, array: &mut Self::Vector, a: f64);

    fn box_array(&mut self, array: &Self::Vector) -> Box<[f64]> {
        let mut data = vec![0f64; self.dim()];
        self.write_to_slice(array, &mut data);
        data.into()
    }

    fn array_all_finite(&mut self, array: &Self::Vector) -> bool;
    fn array_vector_dot(&mut self, array1: &Self::Vector, array2: &Self::Vector) -> f64;

    fn array_norm(&mut self, array: &Self::Vector) -> f64 {
        self.array_vector_dot(array, array).sqrt()
    }

    /// Fill `dest` with independent standard normal draws.
    fn array_gaussian<R: rand::Rng + ?Sized>(&mut self, rng: &mut R, dest: &mut Self::Vector);
}
