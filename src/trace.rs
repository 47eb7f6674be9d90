use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::{
    array::{Array, ArrayBuilder, FixedSizeListBuilder, PrimitiveBuilder, StructArray},
    datatypes::{Field, Float64Type},
};

use crate::{dynamics::Hyperparameters, integrator::Integrator, tuning::TuningReport};

/// One output record of a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Draw {
    /// Position in the natural parametrization of the target.
    pub position: Box<[f64]>,
    /// Running energy estimate, if the run monitored it.
    pub energy: Option<f64>,
    /// Log density at the position, in the space the chain moves in.
    pub logp: f64,
}

/// The output of a sampling run.
#[derive(Debug, Clone)]
pub struct Trace {
    /// The initial state of the production phase followed by one draw per
    /// step.
    pub draws: Vec<Draw>,
    /// Hyperparameters the draws were produced with.
    pub hyperparameters: Hyperparameters,
    pub integrator: Integrator,
    /// Present if the step size was tuned.
    pub tuning: Option<TuningReport>,
    /// Gradient evaluations of the whole run, including burn-in and tuning.
    pub grad_evals: u64,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn positions(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.draws.iter().map(|draw| &*draw.position)
    }

    /// Values of one coordinate over all draws.
    pub fn coordinate(&self, index: usize) -> impl Iterator<Item = f64> + '_ {
        self.draws.iter().map(move |draw| draw.position[index])
    }

    /// Convert the draws to an arrow struct array with columns `position`,
    /// `energy` (null if not monitored) and `logp`.
    pub fn to_arrow(&self) -> Result<StructArray> {
        let dim = self.draws.first().map_or(0, |draw| draw.position.len());

        let mut position = FixedSizeListBuilder::with_capacity(
            PrimitiveBuilder::<Float64Type>::with_capacity(dim * self.len()),
            dim as i32,
            self.len(),
        );
        let mut energy = PrimitiveBuilder::<Float64Type>::with_capacity(self.len());
        let mut logp = PrimitiveBuilder::<Float64Type>::with_capacity(self.len());

        for draw in self.draws.iter() {
            position.values().append_slice(&draw.position);
            position.append(true);
            energy.append_option(draw.energy);
            logp.append_value(draw.logp);
        }

        let arrays: Vec<Arc<dyn Array>> = vec![
            ArrayBuilder::finish(&mut position),
            ArrayBuilder::finish(&mut energy),
            ArrayBuilder::finish(&mut logp),
        ];
        let fields = vec![
            Field::new("position", arrays[0].data_type().clone(), false),
            Field::new("energy", arrays[1].data_type().clone(), true),
            Field::new("logp", arrays[2].data_type().clone(), false),
        ];

        StructArray::try_new(fields.into(), arrays, None).context("Could not build draw table")
    }
}
