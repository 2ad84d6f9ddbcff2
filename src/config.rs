//! Experiment configuration
//!
//! TOML-facing description of one feedback experiment. Every field has a
//! default, so a config file only lists what it changes:
//!
//! ```toml
//! period_count = 200.0
//! force_on = 0.9
//! feedback_filter = true
//! ensemble_size = 8
//!
//! [filter_design]
//! order = 2
//! low = 99000.0
//! high = 101000.0
//!
//! [spectral]
//! kind = "welch"
//! segment_len = 1024
//! ```

use serde::{Deserialize, Serialize};

use crate::ensemble::{EnsembleConfig, EnsembleRunner, DEFAULT_ENSEMBLE_SIZE, DEFAULT_SEED};
use crate::filter::FilterDesign;
use crate::force::{FeedbackLaw, FeedbackSource, ForceModel, PositionScheme};
use crate::params::ParameterSet;
use crate::physical::TrapPhysics;
use crate::sim::RunSetup;
use crate::spectral::SpectralMethod;
use crate::state::STATE_DIM;
use crate::TrapError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub physics: TrapPhysics,
    /// Run length in natural periods
    pub period_count: f64,
    /// Feedback gain in `[0, 1]`
    pub force_on: f64,
    /// Feed back the band-passed position instead of the raw one
    pub feedback_filter: bool,
    pub filter_design: FilterDesign,
    pub perturbation_ratio: f64,
    pub electrons: f64,
    pub ensemble_size: usize,
    pub seed: u64,
    pub threads: Option<usize>,
    pub scheme: PositionScheme,
    pub spectral: SpectralMethod,
    pub initial_state: Vec<f64>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            physics: TrapPhysics::default(),
            period_count: 1000.0,
            force_on: 0.9,
            feedback_filter: true,
            filter_design: FilterDesign::default(),
            perturbation_ratio: 0.009,
            electrons: 20.0,
            ensemble_size: DEFAULT_ENSEMBLE_SIZE,
            seed: DEFAULT_SEED,
            threads: None,
            scheme: PositionScheme::Velocity,
            spectral: SpectralMethod::Periodogram,
            initial_state: vec![0.0; STATE_DIM],
        }
    }
}

/// Everything needed to run the configured experiment
#[derive(Debug, Clone)]
pub struct Experiment {
    pub params: ParameterSet,
    pub setup: RunSetup,
    pub law: FeedbackLaw,
    pub runner: EnsembleRunner,
}

impl ExperimentConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, TrapError> {
        let cfg: Self = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), TrapError> {
        self.physics.validate()?;

        if !self.period_count.is_finite() || self.period_count <= 0.0 {
            return Err(TrapError::Configuration(format!(
                "period_count must be finite and > 0, got {}",
                self.period_count
            )));
        }
        if !self.force_on.is_finite() || !(0.0..=1.0).contains(&self.force_on) {
            return Err(TrapError::Configuration(format!(
                "force_on must lie in [0, 1], got {}",
                self.force_on
            )));
        }
        if !self.perturbation_ratio.is_finite() {
            return Err(TrapError::Configuration(
                "perturbation_ratio must be finite".to_string(),
            ));
        }
        if let PositionScheme::ScaledVelocity { omega_v } = self.scheme {
            if !omega_v.is_finite() {
                return Err(TrapError::Configuration(
                    "scheme omega_v must be finite".to_string(),
                ));
            }
        }
        if self.initial_state.len() != STATE_DIM {
            return Err(TrapError::Dimension {
                expected: STATE_DIM,
                got: self.initial_state.len(),
            });
        }

        self.ensemble_config().validate()
    }

    pub fn ensemble_config(&self) -> EnsembleConfig {
        EnsembleConfig {
            ensemble_size: self.ensemble_size,
            seed: self.seed,
            threads: self.threads,
            method: self.spectral,
        }
    }

    pub fn feedback_source(&self) -> FeedbackSource {
        if self.feedback_filter {
            FeedbackSource::Filtered
        } else {
            FeedbackSource::Position
        }
    }

    /// Actuator sized from `perturbation_ratio` and `electrons`
    pub fn feedback_law(&self, params: &ParameterSet) -> Result<FeedbackLaw, TrapError> {
        FeedbackLaw::from_perturbation_ratio(
            params,
            self.perturbation_ratio,
            self.electrons,
            self.force_on,
            self.feedback_source(),
        )
    }

    /// Force model of the configured single mode
    pub fn force_model(&self, params: &ParameterSet) -> Result<ForceModel, TrapError> {
        if self.force_on > 0.0 {
            return Ok(ForceModel::CubicWithFeedback(self.feedback_law(params)?));
        }
        if params.nonlinear_coeff() != 0.0 {
            Ok(ForceModel::Cubic)
        } else {
            Ok(ForceModel::Linear)
        }
    }

    /// Resolve the configuration into parameters, run setup and runner
    pub fn build(&self) -> Result<Experiment, TrapError> {
        self.validate()?;
        let params = self.physics.parameter_set()?;
        let n_time = params.steps_for_periods(self.period_count)?;

        let setup = RunSetup::new(&params, n_time, self.force_model(&params)?, &self.filter_design)?
            .with_scheme(self.scheme)
            .with_initial_state(&self.initial_state)?;
        let law = self.feedback_law(&params)?;
        let runner = EnsembleRunner::new(params, self.ensemble_config())?;

        Ok(Experiment {
            params,
            setup,
            law,
            runner,
        })
    }
}
