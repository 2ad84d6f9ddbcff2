//! Single-realization run loop
//!
//! Co-steps the integrator and the feedback filter, watches the filter for
//! divergence and hands every `reduction`-th sample to the trajectory.

use serde::Serialize;
use tracing::{debug, warn};

use crate::control::{RunControl, CANCEL_POLL_INTERVAL};
use crate::decimate::Decimator;
use crate::filter::{DigitalBandpassFilter, FilterCoefficients, FilterDesign};
use crate::force::{ForceModel, PositionScheme};
use crate::integrator::StochasticIntegrator;
use crate::noise::NoiseRealization;
use crate::params::{ParameterSet, MAX_STEPS};
use crate::state::IntegratorState;
use crate::TrapError;

/// Everything a run needs besides the parameters and the noise
#[derive(Debug, Clone)]
pub struct RunSetup {
    n_time: usize,
    model: ForceModel,
    scheme: PositionScheme,
    initial_state: IntegratorState,
    filter: FilterCoefficients,
}

impl RunSetup {
    /// Create a setup whose filter is designed at the integration rate
    pub fn new(
        params: &ParameterSet,
        n_time: usize,
        model: ForceModel,
        design: &FilterDesign,
    ) -> Result<Self, TrapError> {
        let filter = design.coefficients(params.integration_rate())?;
        Self::with_coefficients(n_time, model, filter)
    }

    /// Create a setup with an already built coefficient set
    pub fn with_coefficients(
        n_time: usize,
        model: ForceModel,
        filter: FilterCoefficients,
    ) -> Result<Self, TrapError> {
        if n_time == 0 || n_time > MAX_STEPS {
            return Err(TrapError::Configuration(format!(
                "n_time must lie in [1, {MAX_STEPS}], got {n_time}"
            )));
        }
        Ok(Self {
            n_time,
            model,
            scheme: PositionScheme::default(),
            initial_state: IntegratorState::zero(),
            filter,
        })
    }

    pub fn with_scheme(mut self, scheme: PositionScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Start every realization from `[x, v]`
    pub fn with_initial_state(mut self, initial: &[f64]) -> Result<Self, TrapError> {
        self.initial_state = IntegratorState::from_slice(initial)?;
        Ok(self)
    }

    pub fn with_model(mut self, model: ForceModel) -> Self {
        self.model = model;
        self
    }

    pub fn n_time(&self) -> usize {
        self.n_time
    }

    /// Noise draws consumed by one complete run
    pub fn noise_len(&self) -> usize {
        self.n_time - 1
    }

    pub fn model(&self) -> &ForceModel {
        &self.model
    }

    pub fn scheme(&self) -> PositionScheme {
        self.scheme
    }

    pub fn initial_state(&self) -> IntegratorState {
        self.initial_state
    }

    pub fn filter(&self) -> &FilterCoefficients {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut FilterCoefficients {
        &mut self.filter
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    Completed,
    /// Filter output window went fully non-finite at integration step `step`
    Diverged { step: usize },
    /// Stop requested through the run control at integration step `step`
    Cancelled { step: usize },
}

impl Termination {
    pub fn is_completed(&self) -> bool {
        matches!(self, Termination::Completed)
    }
}

/// Decimated output of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Trajectory {
    pub x: Vec<f64>,
    pub v: Vec<f64>,
    pub filtered: Vec<f64>,
    /// Sample times [s]
    pub t: Vec<f64>,
}

impl Trajectory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            v: Vec::with_capacity(capacity),
            filtered: Vec::with_capacity(capacity),
            t: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, state: IntegratorState, filtered: f64, t: f64) {
        self.x.push(state.x);
        self.v.push(state.v);
        self.filtered.push(filtered);
        self.t.push(t);
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Variance of `x` over the samples after the first `skip`
    pub fn position_variance(&self, skip: usize) -> Option<f64> {
        let tail = self.x.get(skip..)?;
        if tail.len() < 2 {
            return None;
        }
        let n = tail.len() as f64;
        let mean = tail.iter().sum::<f64>() / n;
        Some(tail.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n)
    }
}

/// Trajectory plus the way the run ended
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub trajectory: Trajectory,
    pub termination: Termination,
    /// Length of the trajectory had the run completed
    pub nominal_len: usize,
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        self.termination.is_completed()
    }
}

/// Run one realization of `setup` driven by `noise`
///
/// Configuration problems are errors; divergence and cancellation are not and
/// come back as a truncated trajectory with the matching [`Termination`].
pub fn run_realization(
    params: &ParameterSet,
    setup: &RunSetup,
    noise: &NoiseRealization,
    control: &RunControl,
) -> Result<RunOutcome, TrapError> {
    let n_time = setup.n_time;
    if noise.len() < setup.noise_len() {
        return Err(TrapError::LengthMismatch {
            context: "noise realization",
            expected: setup.noise_len(),
            got: noise.len(),
        });
    }

    let mut integrator = StochasticIntegrator::new(params, setup.model, setup.scheme)
        .with_state(setup.initial_state);
    let mut filter = DigitalBandpassFilter::new(setup.filter.clone());
    let mut decimator = Decimator::new(n_time, params.reduction())?;
    let mut trajectory = Trajectory::with_capacity(decimator.output_len());
    let draws = noise.draws();
    let dt = params.dt();

    let mut termination = Termination::Completed;
    let mut warned = false;

    for k in 0..n_time {
        if k % CANCEL_POLL_INTERVAL == 0 && control.should_stop() {
            termination = Termination::Cancelled { step: k };
            break;
        }

        let state = integrator.state();
        let filtered = filter.push(state.x);

        if filter.has_non_finite() {
            if filter.is_saturated() {
                warn!(step = k, kept = trajectory.len(), "filter output diverged, stopping run");
                termination = Termination::Diverged { step: k };
                break;
            }
            if !warned {
                warn!(step = k, "non-finite value in filter output window");
                warned = true;
            }
        }

        if decimator.offer(k) {
            trajectory.push(state, filtered, k as f64 * dt);
        }

        if k + 1 < n_time {
            integrator.step(filtered, draws[k]);
        }
    }

    debug!(
        samples = trajectory.len(),
        nominal = decimator.output_len(),
        ?termination,
        "run finished"
    );

    Ok(RunOutcome {
        trajectory,
        termination,
        nominal_len: decimator.output_len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::CancelToken;
    use crate::force::{FeedbackLaw, FeedbackSource};

    fn params() -> ParameterSet {
        // f0 = 1 Hz, 100 steps per period
        ParameterSet::new(1.0, 0.5, 4.0 * std::f64::consts::PI.powi(2), 1.0, 0.01, 5)
            .and_then(|p| p.with_boltzmann(1.0))
            .unwrap()
    }

    fn setup(n_time: usize, model: ForceModel) -> RunSetup {
        RunSetup::new(&params(), n_time, model, &FilterDesign::new(2, 0.9, 1.1)).unwrap()
    }

    #[test]
    fn test_complete_run_has_nominal_length() {
        let setup = setup(1003, ForceModel::Linear);
        let noise = NoiseRealization::generate(1, 0, setup.noise_len());
        let outcome = run_realization(&params(), &setup, &noise, &RunControl::unbounded()).unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.trajectory.len(), 200);
        assert_eq!(outcome.nominal_len, 200);
        assert_eq!(outcome.trajectory.t[1], 0.05);
        assert_eq!(outcome.trajectory.x[0], 0.0);
    }

    #[test]
    fn test_same_noise_reproduces_bit_identical() {
        let law = FeedbackLaw::from_perturbation_ratio(&params(), 0.01, 20.0, 0.9, FeedbackSource::Filtered)
            .unwrap();
        let setup = setup(2000, ForceModel::CubicWithFeedback(law));
        let noise = NoiseRealization::generate(9, 4, setup.noise_len());
        let control = RunControl::unbounded();
        let a = run_realization(&params(), &setup, &noise, &control).unwrap();
        let b = run_realization(&params(), &setup, &noise, &control).unwrap();
        assert_eq!(a.trajectory, b.trajectory);
    }

    #[test]
    fn test_short_noise_is_rejected() {
        let setup = setup(100, ForceModel::Linear);
        let noise = NoiseRealization::generate(1, 0, 10);
        let result = run_realization(&params(), &setup, &noise, &RunControl::unbounded());
        assert!(matches!(
            result,
            Err(TrapError::LengthMismatch {
                expected: 99,
                got: 10,
                ..
            })
        ));
    }

    #[test]
    fn test_nan_coefficient_terminates_early() {
        let mut setup = setup(1000, ForceModel::Linear);
        setup.filter_mut().b_mut()[0] = f64::NAN;
        let noise = NoiseRealization::generate(1, 0, setup.noise_len());
        let outcome = run_realization(&params(), &setup, &noise, &RunControl::unbounded()).unwrap();

        // Four output taps, all poisoned after four pushes
        assert_eq!(outcome.termination, Termination::Diverged { step: 3 });
        assert!(outcome.trajectory.len() < outcome.nominal_len);
        assert_eq!(outcome.trajectory.len(), 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let setup = setup(5000, ForceModel::Linear);
        let noise = NoiseRealization::generate(1, 0, setup.noise_len());
        let token = CancelToken::new();
        token.cancel();
        let control = RunControl::unbounded().with_token(token);
        let outcome = run_realization(&params(), &setup, &noise, &control).unwrap();
        assert_eq!(outcome.termination, Termination::Cancelled { step: 0 });
        assert!(outcome.trajectory.is_empty());
    }

    #[test]
    fn test_cancelled_mid_run_stops_on_poll_boundary() {
        let n_time = 4_000_000;
        let setup = setup(n_time, ForceModel::Linear);
        let noise = NoiseRealization::generate(1, 0, setup.noise_len());
        let token = CancelToken::new();
        let control = RunControl::unbounded().with_token(token.clone());

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(5));
            token.cancel();
        });
        let outcome = run_realization(&params(), &setup, &noise, &control).unwrap();
        canceller.join().unwrap();

        let Termination::Cancelled { step } = outcome.termination else {
            panic!("expected cancellation, got {:?}", outcome.termination);
        };
        assert!(step > 0 && step < n_time, "step {step}");
        assert_eq!(step % CANCEL_POLL_INTERVAL, 0);
        // Samples 0, 5, 10, ... strictly before the stopping step
        assert_eq!(outcome.trajectory.len(), step.div_ceil(5));
        assert!(outcome.trajectory.len() < outcome.nominal_len);
        let last = outcome.trajectory.t[outcome.trajectory.len() - 1];
        assert!(last < step as f64 * 0.01);
    }

    #[test]
    fn test_oversized_run_is_rejected() {
        let coefficients = FilterCoefficients::new(vec![1.0], vec![1.0]).unwrap();
        assert!(matches!(
            RunSetup::with_coefficients(MAX_STEPS + 1, ForceModel::Linear, coefficients),
            Err(TrapError::Configuration(_))
        ));
    }

    #[test]
    fn test_silent_noise_keeps_particle_at_rest() {
        let setup = setup(500, ForceModel::Linear);
        let noise = NoiseRealization::from_draws(vec![0.0; setup.noise_len()]);
        let outcome = run_realization(&params(), &setup, &noise, &RunControl::unbounded()).unwrap();
        assert!(outcome.is_complete());
        assert!(outcome.trajectory.x.iter().all(|&x| x == 0.0));
        assert!(outcome.trajectory.filtered.iter().all(|&y| y == 0.0));
    }

    #[test]
    fn test_initial_state_is_first_sample() {
        let setup = setup(50, ForceModel::Linear)
            .with_initial_state(&[0.25, -1.0])
            .unwrap();
        let noise = NoiseRealization::generate(1, 0, setup.noise_len());
        let outcome = run_realization(&params(), &setup, &noise, &RunControl::unbounded()).unwrap();
        assert_eq!(outcome.trajectory.x[0], 0.25);
        assert_eq!(outcome.trajectory.v[0], -1.0);
    }

    #[test]
    fn test_position_variance_skips_burn_in() {
        let trajectory = Trajectory {
            x: vec![100.0, 1.0, -1.0, 1.0, -1.0],
            ..Default::default()
        };
        assert_eq!(trajectory.position_variance(1), Some(1.0));
        assert_eq!(trajectory.position_variance(4), None);
        assert_eq!(trajectory.position_variance(9), None);
    }
}
