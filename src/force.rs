//! Force laws
//!
//! The restoring and actuation forces entering the velocity update. One
//! tagged [`ForceModel`] covers the harmonic trap, the Duffing-like trap with
//! a cubic term, and the cubic trap with an electrical feedback actuator.

use serde::{Deserialize, Serialize};

use crate::constants::ELEMENTARY_CHARGE;
use crate::params::ParameterSet;
use crate::TrapError;

/// Signal the feedback actuator listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSource {
    /// Raw particle position
    Position,
    /// Band-pass filtered position
    Filtered,
}

/// Cubic electrical actuator: `F = force_on * charge * E0 * (signal / x0)^3`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeedbackLaw {
    force_on: f64,
    charge: f64,
    field_amplitude: f64,
    length_scale: f64,
    source: FeedbackSource,
}

impl FeedbackLaw {
    pub fn new(
        force_on: f64,
        charge: f64,
        field_amplitude: f64,
        length_scale: f64,
        source: FeedbackSource,
    ) -> Result<Self, TrapError> {
        if !force_on.is_finite() || !(0.0..=1.0).contains(&force_on) {
            return Err(TrapError::Configuration(format!(
                "force_on must lie in [0, 1], got {force_on}"
            )));
        }
        if !length_scale.is_finite() || length_scale <= 0.0 {
            return Err(TrapError::Configuration(format!(
                "feedback length scale must be finite and > 0, got {length_scale}"
            )));
        }
        if !charge.is_finite() || !field_amplitude.is_finite() {
            return Err(TrapError::Configuration(
                "feedback charge and field amplitude must be finite".to_string(),
            ));
        }
        Ok(Self {
            force_on,
            charge,
            field_amplitude,
            length_scale,
            source,
        })
    }

    /// Actuator sized so that at `x = x0` it pushes with `2 * ratio` times the
    /// trap force, with `x0 = sqrt(kb T / spring)` and `electrons` excess charges.
    pub fn from_perturbation_ratio(
        params: &ParameterSet,
        perturbation_ratio: f64,
        electrons: f64,
        force_on: f64,
        source: FeedbackSource,
    ) -> Result<Self, TrapError> {
        let x0 = params.thermal_length().ok_or_else(|| {
            TrapError::Configuration("feedback actuator requires spring > 0".to_string())
        })?;
        if !electrons.is_finite() || electrons <= 0.0 {
            return Err(TrapError::Configuration(format!(
                "electrons must be finite and > 0, got {electrons}"
            )));
        }
        let charge = electrons * ELEMENTARY_CHARGE;
        let field_amplitude = 2.0 * params.spring() * x0 * perturbation_ratio / charge;
        Self::new(force_on, charge, field_amplitude, x0, source)
    }

    pub fn force_on(&self) -> f64 {
        self.force_on
    }

    pub fn source(&self) -> FeedbackSource {
        self.source
    }

    /// Same actuator listening to a different signal
    pub fn with_source(mut self, source: FeedbackSource) -> Self {
        self.source = source;
        self
    }

    /// Force exerted for a given input signal, including the gain
    #[inline]
    pub fn force(&self, signal: f64) -> f64 {
        let u = signal / self.length_scale;
        self.force_on * self.charge * self.field_amplitude * u * u * u
    }

    /// Pick the configured input out of the raw and filtered position
    #[inline]
    pub fn select(&self, position: f64, filtered: f64) -> f64 {
        match self.source {
            FeedbackSource::Position => position,
            FeedbackSource::Filtered => filtered,
        }
    }
}

/// Restoring and actuation forces applied in the velocity update
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ForceModel {
    /// Harmonic trap only
    Linear,
    /// Harmonic trap plus `K x^3`
    Cubic,
    /// Harmonic trap, `K x^3` and the feedback actuator
    CubicWithFeedback(FeedbackLaw),
}

impl ForceModel {
    /// Feedback law, if the model carries one with a non-zero gain
    pub fn feedback(&self) -> Option<&FeedbackLaw> {
        match self {
            ForceModel::CubicWithFeedback(law) if law.force_on > 0.0 => Some(law),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ForceModel::Linear => "linear",
            ForceModel::Cubic => "cubic",
            ForceModel::CubicWithFeedback(law) => match law.source {
                FeedbackSource::Position => "feedback_position",
                FeedbackSource::Filtered => "feedback_filtered",
            },
        }
    }
}

/// How the position follows the freshly updated velocity
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PositionScheme {
    /// `x' = x + v' dt`
    #[default]
    Velocity,
    /// `x' = x + omega_v v' dt`, for dimensionless momentum coordinates
    ScaledVelocity { omega_v: f64 },
}

impl PositionScheme {
    #[inline]
    pub fn advance(&self, x: f64, v: f64, dt: f64) -> f64 {
        match *self {
            PositionScheme::Velocity => x + v * dt,
            PositionScheme::ScaledVelocity { omega_v } => x + omega_v * v * dt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ParameterSet {
        ParameterSet::new(1.0, 0.1, 4.0, 1.0, 1e-3, 1)
            .and_then(|p| p.with_boltzmann(1.0))
            .unwrap()
    }

    fn law(force_on: f64, source: FeedbackSource) -> Result<FeedbackLaw, TrapError> {
        FeedbackLaw::from_perturbation_ratio(&params(), 0.01, 20.0, force_on, source)
    }

    #[test]
    fn test_perturbation_ratio_sizing() {
        let law = law(1.0, FeedbackSource::Position).unwrap();
        // x0 = 0.5, so the force at x0 is 2 * spring * x0 * ratio
        let expected = 2.0 * 4.0 * 0.5 * 0.01;
        assert!((law.force(0.5) - expected).abs() < 1e-12);
        assert!((law.force(-1.0) + 8.0 * expected).abs() < 1e-12);
    }

    #[test]
    fn test_gain_scales_force() {
        let full = law(1.0, FeedbackSource::Filtered).unwrap();
        let partial = law(0.25, FeedbackSource::Filtered).unwrap();
        assert!((partial.force(0.3) - 0.25 * full.force(0.3)).abs() < 1e-15);
        assert_eq!(partial.select(1.0, 2.0), 2.0);
    }

    #[test]
    fn test_force_on_outside_unit_interval_is_rejected() {
        for gain in [-0.1, 1.5, f64::NAN] {
            let result = law(gain, FeedbackSource::Position);
            assert!(matches!(result, Err(TrapError::Configuration(_))));
        }
    }

    #[test]
    fn test_zero_gain_disables_feedback() {
        let law = FeedbackLaw::new(0.0, 1.0, 1.0, 1.0, FeedbackSource::Position).unwrap();
        assert!(ForceModel::CubicWithFeedback(law).feedback().is_none());
        assert!(ForceModel::Linear.feedback().is_none());
    }

    #[test]
    fn test_position_schemes() {
        assert_eq!(PositionScheme::Velocity.advance(1.0, 2.0, 0.5), 2.0);
        let scaled = PositionScheme::ScaledVelocity { omega_v: 3.0 };
        assert_eq!(scaled.advance(1.0, 2.0, 0.5), 4.0);
    }
}
