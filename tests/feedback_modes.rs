//! Feedback comparison, divergence handling and reproducibility

use std::f64::consts::PI;

use nanotrap::{
    compare_feedback_modes, EnsembleConfig, EnsembleRunner, ExperimentConfig, FeedbackLaw,
    FeedbackSource, FilterDesign, ForceModel, ParameterSet, PsdEstimate, RunSetup, SpectralMethod,
    Termination,
};

fn params() -> ParameterSet {
    ParameterSet::new(1.0, 0.5, 4.0 * PI * PI, 1.0, 1.0 / 400.0, 50)
        .and_then(|p| p.with_boltzmann(1.0))
        .unwrap()
}

fn runner(ensemble_size: usize) -> EnsembleRunner {
    let config = EnsembleConfig {
        ensemble_size,
        seed: 99,
        threads: None,
        method: SpectralMethod::Periodogram,
    };
    EnsembleRunner::new(params(), config).unwrap()
}

/// Power-weighted mean frequency between 0.5 and 1.5 Hz
fn centroid(psd: &PsdEstimate) -> f64 {
    let (weighted, total) = psd
        .frequencies()
        .iter()
        .zip(psd.power())
        .filter(|(&f, _)| (0.5..=1.5).contains(&f))
        .fold((0.0, 0.0), |(w, t), (&f, &p)| (w + f * p, t + p));
    weighted / total
}

/// Half-power linewidth of the 9-bin smoothed spectrum
fn linewidth(psd: &PsdEstimate) -> f64 {
    let smooth = psd.smoothed(9);
    let peak = smooth.dominant_peak(0.25).unwrap();
    smooth.half_power_width(&peak).unwrap()
}

#[test]
fn cubic_feedback_stiffens_the_resonance() {
    let params = params();
    let n_time = params.steps_for_periods(200.0).unwrap();
    // Band centered on the 1 Hz resonance
    let setup = RunSetup::new(&params, n_time, ForceModel::Cubic, &FilterDesign::new(2, 0.5, 2.0))
        .unwrap();
    let law = FeedbackLaw::from_perturbation_ratio(&params, 0.005, 20.0, 0.9, FeedbackSource::Filtered)
        .unwrap();

    let comparison = compare_feedback_modes(&runner(6), &setup, law).unwrap();
    for (mode, outcome) in comparison.modes() {
        assert_eq!(outcome.completed, 6, "{mode}: {outcome:?}");
    }

    let baseline = comparison.baseline.psd.as_ref().unwrap();
    let position = comparison.position.psd.as_ref().unwrap();
    let filtered = comparison.filtered.psd.as_ref().unwrap();
    assert_eq!(baseline.frequencies(), filtered.frequencies());
    assert_ne!(baseline.power(), filtered.power());

    // The cubic actuator adds restoring force, so the line moves up
    let base = centroid(baseline);
    assert!(centroid(position) > base + 0.005, "{} vs {base}", centroid(position));
    assert!(centroid(filtered) > base + 0.005, "{} vs {base}", centroid(filtered));
}

#[test]
fn filtered_feedback_narrows_the_line_without_cooling() {
    // Reference trap in reduced units: Q = 20, pass band 1 % either side of f0
    let params = ParameterSet::new(1.0, 0.1 * PI, 4.0 * PI * PI, 1.0, 1.0 / 400.0, 50)
        .and_then(|p| p.with_boltzmann(1.0))
        .unwrap();
    let n_time = params.steps_for_periods(1000.0).unwrap();
    let setup = RunSetup::new(&params, n_time, ForceModel::Cubic, &FilterDesign::new(2, 0.99, 1.01))
        .unwrap();
    let law = FeedbackLaw::from_perturbation_ratio(&params, 0.009, 20.0, 0.9, FeedbackSource::Filtered)
        .unwrap();
    let config = EnsembleConfig {
        ensemble_size: 16,
        seed: 2024,
        threads: None,
        method: SpectralMethod::Periodogram,
    };
    let runner = EnsembleRunner::new(params, config).unwrap();

    let comparison = compare_feedback_modes(&runner, &setup, law).unwrap();
    assert_eq!(comparison.baseline.completed, 16);
    // The actuator occasionally runs away; those runs are dropped
    assert!(comparison.filtered.completed >= 12, "{:?}", comparison.filtered);

    let baseline = comparison.baseline.psd.as_ref().unwrap();
    let filtered = comparison.filtered.psd.as_ref().unwrap();

    // Free line: gamma / (2 pi m) = 0.05 Hz
    let free = linewidth(baseline);
    assert!(free > 0.03 && free < 0.08, "baseline width {free}");
    let fed = linewidth(filtered);
    assert!(fed < free, "filtered width {fed} vs baseline {free}");

    // The narrower line carries at least as much variance
    let (free_var, fed_var) = (baseline.band_power(0.0, 4.0), filtered.band_power(0.0, 4.0));
    assert!(fed_var > 0.99 * free_var, "{fed_var} vs {free_var}");
}

#[test]
fn zero_gain_feedback_matches_baseline() {
    let params = params();
    let n_time = params.steps_for_periods(50.0).unwrap();
    let setup = RunSetup::new(&params, n_time, ForceModel::Cubic, &FilterDesign::new(2, 0.5, 2.0))
        .unwrap();
    let law = FeedbackLaw::from_perturbation_ratio(&params, 0.005, 20.0, 0.0, FeedbackSource::Filtered)
        .unwrap();

    let comparison = compare_feedback_modes(&runner(2), &setup, law).unwrap();
    let baseline = comparison.baseline.psd.unwrap();
    assert_eq!(baseline.power(), comparison.position.psd.unwrap().power());
    assert_eq!(baseline.power(), comparison.filtered.psd.unwrap().power());
}

#[test]
fn poisoned_filter_never_fails_the_ensemble() {
    let params = params();
    let n_time = params.steps_for_periods(20.0).unwrap();
    let mut setup = RunSetup::new(&params, n_time, ForceModel::Linear, &FilterDesign::new(2, 0.5, 2.0))
        .unwrap();
    setup.filter_mut().b_mut()[0] = f64::NAN;

    let runner = runner(5);
    let outcome = runner.run(&setup).unwrap();
    assert_eq!(outcome.diverged, 5);
    assert!(outcome.psd.is_none());

    let single = runner.run_single(&setup, 0).unwrap();
    assert!(matches!(single.termination, Termination::Diverged { .. }));
    assert!(single.trajectory.len() <= single.nominal_len);
    assert!(single.trajectory.len() < 160);
}

#[test]
fn same_seed_reproduces_trajectories() {
    let raw = r#"
        period_count = 20.0
        ensemble_size = 2
        seed = 7
    "#;
    let first = ExperimentConfig::from_toml_str(raw).unwrap().build().unwrap();
    let second = ExperimentConfig::from_toml_str(raw).unwrap().build().unwrap();

    let a = first.runner.run_single(&first.setup, 1).unwrap();
    let b = second.runner.run_single(&second.setup, 1).unwrap();
    assert!(a.is_complete());
    assert_eq!(a.trajectory, b.trajectory);

    let other = first.runner.run_single(&first.setup, 0).unwrap();
    assert_ne!(a.trajectory.x, other.trajectory.x);
}

#[test]
fn reference_preset_resonates_near_100_khz() {
    let raw = r#"
        period_count = 100.0
        force_on = 0.0
        ensemble_size = 3
    "#;
    let experiment = ExperimentConfig::from_toml_str(raw).unwrap().build().unwrap();
    assert_eq!(experiment.setup.model().label(), "linear");

    let outcome = experiment.runner.run(&experiment.setup).unwrap();
    assert_eq!(outcome.completed, 3);
    let psd = outcome.psd.unwrap();
    let peak = psd.dominant_peak(2.5e4).unwrap();
    let f0 = experiment.params.resonance_frequency();
    assert!((peak.frequency - f0).abs() < 1.5e4, "peak {} vs f0 {f0}", peak.frequency);
}
