//! nanotrap - stochastic simulation of a feedback-cooled trapped nanoparticle
//!
//! A particle in a harmonic (optionally cubic) trap is driven by thermal
//! noise and integrated with Euler–Maruyama. A Butterworth band-pass filter
//! runs alongside the integrator on the position signal and can drive a
//! cubic electrical feedback force. Decimated trajectories from many
//! independent realizations are averaged into a power spectral density.

pub mod config;
pub mod constants;
pub mod control;
pub mod decimate;
pub mod ensemble;
pub mod filter;
pub mod force;
pub mod integrator;
pub mod noise;
pub mod params;
pub mod physical;
pub mod sim;
pub mod spectral;
pub mod state;

use thiserror::Error;

// Re-export main types
pub use config::{Experiment, ExperimentConfig};
pub use control::{CancelToken, RunControl};
pub use decimate::{decimate, Decimator};
pub use ensemble::{
    compare_feedback_modes, EnsembleConfig, EnsembleOutcome, EnsembleRunner, FeedbackComparison,
};
pub use filter::{DigitalBandpassFilter, FilterCoefficients, FilterDesign};
pub use force::{FeedbackLaw, FeedbackSource, ForceModel, PositionScheme};
pub use integrator::StochasticIntegrator;
pub use noise::NoiseRealization;
pub use params::ParameterSet;
pub use physical::{OpticalTrap, SpringSource, TrapPhysics};
pub use sim::{run_realization, RunOutcome, RunSetup, Termination, Trajectory};
pub use spectral::{PsdAccumulator, PsdEstimate, SpectralMethod, SpectralPeak};
pub use state::IntegratorState;

#[derive(Debug, Error)]
pub enum TrapError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("invalid filter design: {0}")]
    FilterDesign(String),
    #[error("state dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },
    #[error("{context} length mismatch: expected {expected}, got {got}")]
    LengthMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
