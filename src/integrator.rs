//! Euler–Maruyama integrator
//!
//! Advances `(x, v)` by one physical step: velocity first, then position from
//! the updated velocity. The thermal kick is added exactly once per step.
//!
//! ```text
//! v' = v - (gamma/m) v dt - (k/m) x dt - K x^3 dt/m - F_fb dt/m + w
//! x' = x + v' dt                 (or x + omega_v v' dt)
//! ```

use crate::force::{ForceModel, PositionScheme};
use crate::params::ParameterSet;
use crate::state::IntegratorState;
use crate::TrapError;

/// Single-particle stochastic stepper
#[derive(Debug, Clone)]
pub struct StochasticIntegrator {
    model: ForceModel,
    scheme: PositionScheme,
    state: IntegratorState,
    dt: f64,
    damping_rate: f64,
    spring_rate: f64,
    mass: f64,
    nonlinear_coeff: f64,
    noise_std: f64,
}

impl StochasticIntegrator {
    /// Create an integrator with the particle at rest in the trap center
    pub fn new(params: &ParameterSet, model: ForceModel, scheme: PositionScheme) -> Self {
        Self {
            model,
            scheme,
            state: IntegratorState::zero(),
            dt: params.dt(),
            damping_rate: params.gamma() / params.mass(),
            spring_rate: params.spring() / params.mass(),
            mass: params.mass(),
            nonlinear_coeff: params.nonlinear_coeff(),
            noise_std: params.noise_std(),
        }
    }

    /// Start from `[x, v]`; any other length is a dimension error
    pub fn with_initial_state(mut self, initial: &[f64]) -> Result<Self, TrapError> {
        self.state = IntegratorState::from_slice(initial)?;
        Ok(self)
    }

    pub fn with_state(mut self, state: IntegratorState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> IntegratorState {
        self.state
    }

    pub fn model(&self) -> &ForceModel {
        &self.model
    }

    /// Per-step standard deviation of the velocity kick
    pub fn noise_std(&self) -> f64 {
        self.noise_std
    }

    /// Feedback force for the current position and filter output
    #[inline]
    pub fn feedback_force(&self, filtered: f64) -> f64 {
        match self.model.feedback() {
            Some(law) => law.force(law.select(self.state.x, filtered)),
            None => 0.0,
        }
    }

    /// Perform one integration step
    ///
    /// # Arguments
    /// * `filtered` - Filter output for the current position
    /// * `draw` - Standard-normal draw, scaled here by the thermal noise std
    #[inline]
    pub fn step(&mut self, filtered: f64, draw: f64) -> IntegratorState {
        let IntegratorState { x, v } = self.state;
        let dt = self.dt;
        let kick = self.noise_std * draw;

        let mut v_next = v - self.damping_rate * v * dt - self.spring_rate * x * dt;
        match self.model {
            ForceModel::Linear => {}
            ForceModel::Cubic => {
                v_next -= self.nonlinear_coeff * x * x * x * dt / self.mass;
            }
            ForceModel::CubicWithFeedback(_) => {
                v_next -= self.nonlinear_coeff * x * x * x * dt / self.mass;
                v_next -= self.feedback_force(filtered) * dt / self.mass;
            }
        }
        v_next += kick;

        let x_next = self.scheme.advance(x, v_next, dt);
        self.state = IntegratorState::new(x_next, v_next);
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::force::{FeedbackLaw, FeedbackSource};

    fn params(gamma: f64) -> ParameterSet {
        ParameterSet::new(2.0, gamma, 8.0, 1.0, 0.01, 1)
            .and_then(|p| p.with_boltzmann(1.0))
            .unwrap()
    }

    #[test]
    fn test_deterministic_step_matches_hand_calculation() {
        let p = params(0.4);
        let mut integrator = StochasticIntegrator::new(&p, ForceModel::Linear, PositionScheme::Velocity)
            .with_state(IntegratorState::new(1.0, 0.5));
        let next = integrator.step(0.0, 0.0);

        // v' = 0.5 - 0.2 * 0.5 * 0.01 - 4 * 1 * 0.01
        let v = 0.5 - 0.001 - 0.04;
        assert!((next.v - v).abs() < 1e-15);
        assert!((next.x - (1.0 + v * 0.01)).abs() < 1e-15);
    }

    #[test]
    fn test_noise_is_scaled_by_thermal_std() {
        let p = params(0.4);
        let mut integrator = StochasticIntegrator::new(&p, ForceModel::Linear, PositionScheme::Velocity);
        let next = integrator.step(0.0, 1.0);
        assert!((next.v - p.noise_std()).abs() < 1e-15);
    }

    #[test]
    fn test_cubic_term_depends_on_model() {
        let p = params(0.0).with_nonlinear_coeff(3.0).unwrap();
        let start = IntegratorState::new(1.0, 0.0);
        let mut linear = StochasticIntegrator::new(&p, ForceModel::Linear, PositionScheme::Velocity)
            .with_state(start);
        let mut cubic = StochasticIntegrator::new(&p, ForceModel::Cubic, PositionScheme::Velocity)
            .with_state(start);

        let dv = cubic.step(0.0, 0.0).v - linear.step(0.0, 0.0).v;
        // K x^3 dt / m = 3 * 0.01 / 2
        assert!((dv + 0.015).abs() < 1e-15);
    }

    #[test]
    fn test_feedback_uses_selected_source() {
        let p = params(0.0);
        let law = FeedbackLaw::new(1.0, 1.0, 2.0, 1.0, FeedbackSource::Filtered).unwrap();
        let integrator =
            StochasticIntegrator::new(&p, ForceModel::CubicWithFeedback(law), PositionScheme::Velocity)
                .with_state(IntegratorState::new(0.5, 0.0));
        assert_eq!(integrator.feedback_force(1.0), 2.0);

        let law = FeedbackLaw::new(1.0, 1.0, 2.0, 1.0, FeedbackSource::Position).unwrap();
        let integrator =
            StochasticIntegrator::new(&p, ForceModel::CubicWithFeedback(law), PositionScheme::Velocity)
                .with_state(IntegratorState::new(0.5, 0.0));
        assert_eq!(integrator.feedback_force(1.0), 0.25);
    }

    #[test]
    fn test_scaled_scheme_uses_updated_velocity() {
        let p = params(0.0);
        let scheme = PositionScheme::ScaledVelocity { omega_v: 2.0 };
        let mut integrator = StochasticIntegrator::new(&p, ForceModel::Linear, scheme)
            .with_state(IntegratorState::new(0.0, 1.0));
        let next = integrator.step(0.0, 0.0);
        assert_eq!(next.v, 1.0);
        assert!((next.x - 0.02).abs() < 1e-15);
    }

    #[test]
    fn test_wrong_dimension_is_rejected() {
        let p = params(0.1);
        let result = StochasticIntegrator::new(&p, ForceModel::Linear, PositionScheme::Velocity)
            .with_initial_state(&[0.0, 0.0, 0.0]);
        assert!(matches!(
            result,
            Err(TrapError::Dimension {
                expected: 2,
                got: 3
            })
        ));
    }
}
