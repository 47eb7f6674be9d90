use thiserror::Error;

/// Errors that happen when we evaluate the target density or its gradient
pub trait LogpError: std::error::Error + Send + Sync {
    /// Unrecoverable errors during logp computation stop sampling,
    /// recoverable errors during tuning are treated like an infinite
    /// energy error and shrink the step size.
    fn is_recoverable(&self) -> bool;
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum MchmcError {
    #[error("Logp function returned unrecoverable error")]
    LogpFailure(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Unknown integrator `{0}`, expected `single-stage` or `minimal-norm`")]
    UnknownIntegrator(String),

    #[error("Unknown sampler option `{0}`")]
    UnknownOption(String),

    #[error("Invalid value `{value}` for sampler option `{key}`")]
    InvalidOption { key: String, value: String },

    #[error("Invalid sampler settings: {0}")]
    BadSettings(String),

    #[error("Microcanonical dynamics need at least two dimensions, the target has {0}")]
    DimensionTooSmall(usize),

    #[error("Initial position has length {found}, but the target has dimension {expected}")]
    BadInitPosition { expected: usize, found: usize },

    #[error("Log density or gradient at the initial position is not finite")]
    BadInitGrad,
}

pub type Result<T> = std::result::Result<T, MchmcError>;

impl MchmcError {
    pub(crate) fn logp<E: LogpError + 'static>(err: E) -> Self {
        MchmcError::LogpFailure(Box::new(err))
    }
}
