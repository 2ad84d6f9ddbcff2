//! Ensemble averaging
//!
//! Runs `ensemble_size` independent realizations on the rayon pool, turns
//! every completed trajectory into a spectrum and folds it into a per-worker
//! accumulator. Accumulators are merged at the end; no locks are taken.
//! Realization `i` always uses noise stream `i`, so results do not depend on
//! scheduling.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::control::RunControl;
use crate::force::{FeedbackLaw, FeedbackSource, ForceModel};
use crate::noise::NoiseRealization;
use crate::params::ParameterSet;
use crate::sim::{run_realization, RunOutcome, RunSetup, Termination};
use crate::spectral::{PsdAccumulator, PsdEstimate, SpectralMethod};
use crate::TrapError;

pub const DEFAULT_ENSEMBLE_SIZE: usize = 30;
pub const DEFAULT_SEED: u64 = 2024;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnsembleConfig {
    pub ensemble_size: usize,
    pub seed: u64,
    /// Worker count; `None` uses the global rayon pool
    pub threads: Option<usize>,
    pub method: SpectralMethod,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            ensemble_size: DEFAULT_ENSEMBLE_SIZE,
            seed: DEFAULT_SEED,
            threads: None,
            method: SpectralMethod::Periodogram,
        }
    }
}

impl EnsembleConfig {
    pub fn validate(&self) -> Result<(), TrapError> {
        if self.ensemble_size == 0 {
            return Err(TrapError::Configuration(
                "ensemble_size must be at least 1".to_string(),
            ));
        }
        if self.threads == Some(0) {
            return Err(TrapError::Configuration(
                "threads must be at least 1 when set".to_string(),
            ));
        }
        if let SpectralMethod::Welch { segment_len: 0 } = self.method {
            return Err(TrapError::Configuration(
                "welch segment length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Averaged spectrum plus how the realizations ended
#[derive(Debug, Clone, Serialize)]
pub struct EnsembleOutcome {
    /// Mean over completed realizations, `None` if none completed
    pub psd: Option<PsdEstimate>,
    pub requested: usize,
    pub completed: usize,
    pub diverged: usize,
    pub cancelled: usize,
}

impl EnsembleOutcome {
    /// Realizations excluded from the average
    pub fn truncated(&self) -> usize {
        self.diverged + self.cancelled
    }
}

#[derive(Debug, Default)]
struct Tally {
    psd: PsdAccumulator,
    diverged: usize,
    cancelled: usize,
}

impl Tally {
    fn merge(self, other: Self) -> Result<Self, TrapError> {
        Ok(Self {
            psd: self.psd.merge(other.psd)?,
            diverged: self.diverged + other.diverged,
            cancelled: self.cancelled + other.cancelled,
        })
    }
}

/// Parallel driver for many independent realizations
#[derive(Debug, Clone)]
pub struct EnsembleRunner {
    params: ParameterSet,
    config: EnsembleConfig,
    control: RunControl,
}

impl EnsembleRunner {
    pub fn new(params: ParameterSet, config: EnsembleConfig) -> Result<Self, TrapError> {
        config.validate()?;
        Ok(Self {
            params,
            config,
            control: RunControl::unbounded(),
        })
    }

    /// Attach a cancellation token and/or deadline
    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Run realization `index` alone, with the noise it gets inside an ensemble
    pub fn run_single(&self, setup: &RunSetup, index: usize) -> Result<RunOutcome, TrapError> {
        let noise = NoiseRealization::generate(self.config.seed, index as u64, setup.noise_len());
        run_realization(&self.params, setup, &noise, &self.control)
    }

    /// Run the whole ensemble and average the spectra of completed runs
    pub fn run(&self, setup: &RunSetup) -> Result<EnsembleOutcome, TrapError> {
        let size = self.config.ensemble_size;
        let fs = self.params.sampling_rate();
        info!(
            model = setup.model().label(),
            realizations = size,
            n_time = setup.n_time(),
            "starting ensemble"
        );

        let tally = match self.config.threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| TrapError::Configuration(format!("thread pool: {e}")))?;
                pool.install(|| self.run_parallel(setup, fs))?
            }
            None => self.run_parallel(setup, fs)?,
        };

        let nominal_len = setup.n_time() / self.params.reduction();
        let frequencies = self.config.method.frequencies(nominal_len, fs);
        let completed = tally.psd.count();
        let psd = tally.psd.finish(frequencies)?;

        info!(
            model = setup.model().label(),
            completed,
            diverged = tally.diverged,
            cancelled = tally.cancelled,
            "ensemble finished"
        );

        Ok(EnsembleOutcome {
            psd,
            requested: size,
            completed,
            diverged: tally.diverged,
            cancelled: tally.cancelled,
        })
    }

    fn run_parallel(&self, setup: &RunSetup, fs: f64) -> Result<Tally, TrapError> {
        (0..self.config.ensemble_size)
            .into_par_iter()
            .try_fold(Tally::default, |tally, index| {
                self.fold_realization(tally, setup, index, fs)
            })
            .try_reduce(Tally::default, Tally::merge)
    }

    fn fold_realization(
        &self,
        mut tally: Tally,
        setup: &RunSetup,
        index: usize,
        fs: f64,
    ) -> Result<Tally, TrapError> {
        if self.control.should_stop() {
            tally.cancelled += 1;
            return Ok(tally);
        }
        let outcome = self.run_single(setup, index)?;
        debug!(index, samples = outcome.trajectory.len(), "realization done");

        match outcome.termination {
            Termination::Completed => {
                let power = self.config.method.estimate(&outcome.trajectory.x, fs)?;
                tally.psd.add(&power)?;
            }
            Termination::Diverged { .. } => tally.diverged += 1,
            Termination::Cancelled { .. } => tally.cancelled += 1,
        }
        Ok(tally)
    }
}

/// Ensembles without feedback, with raw-position feedback and with filtered feedback
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackComparison {
    pub baseline: EnsembleOutcome,
    pub position: EnsembleOutcome,
    pub filtered: EnsembleOutcome,
}

impl FeedbackComparison {
    pub fn modes(&self) -> [(&'static str, &EnsembleOutcome); 3] {
        [
            ("baseline", &self.baseline),
            ("position", &self.position),
            ("filtered", &self.filtered),
        ]
    }
}

/// Run the three feedback modes with identical noise
///
/// The baseline keeps the cubic trap of `setup` and drops the actuator.
pub fn compare_feedback_modes(
    runner: &EnsembleRunner,
    setup: &RunSetup,
    law: FeedbackLaw,
) -> Result<FeedbackComparison, TrapError> {
    let baseline = runner.run(&setup.clone().with_model(ForceModel::Cubic))?;
    let position = runner.run(
        &setup
            .clone()
            .with_model(ForceModel::CubicWithFeedback(law.with_source(FeedbackSource::Position))),
    )?;
    let filtered = runner.run(
        &setup
            .clone()
            .with_model(ForceModel::CubicWithFeedback(law.with_source(FeedbackSource::Filtered))),
    )?;

    Ok(FeedbackComparison {
        baseline,
        position,
        filtered,
    })
}
