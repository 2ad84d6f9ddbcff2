//! Trap parameters
//!
//! The scalar coefficients the integrator needs. Built once, outside the
//! hot loop, and never mutated afterwards.

use std::f64::consts::TAU;

use serde::Serialize;

use crate::constants::BOLTZMANN;
use crate::TrapError;

/// Upper bound on integration steps per realization
pub const MAX_STEPS: usize = 1 << 31;

/// Physical coefficients of one trapped particle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterSet {
    /// Particle mass
    mass: f64,
    /// Friction coefficient; the damping rate is `gamma / mass`
    gamma: f64,
    /// Linear trap stiffness
    spring: f64,
    /// Cubic force coefficient (signed)
    nonlinear_coeff: f64,
    /// Bath temperature
    temperature: f64,
    /// Boltzmann constant in the unit system of the other fields
    boltzmann: f64,
    /// Integration step
    dt: f64,
    /// Decimation factor
    reduction: usize,
}

impl ParameterSet {
    /// Create a validated parameter set in SI units with no cubic term
    pub fn new(
        mass: f64,
        gamma: f64,
        spring: f64,
        temperature: f64,
        dt: f64,
        reduction: usize,
    ) -> Result<Self, TrapError> {
        let params = Self {
            mass,
            gamma,
            spring,
            nonlinear_coeff: 0.0,
            temperature,
            boltzmann: BOLTZMANN,
            dt,
            reduction,
        };
        params.validate()?;
        Ok(params)
    }

    /// Set the cubic force coefficient
    pub fn with_nonlinear_coeff(mut self, nonlinear_coeff: f64) -> Result<Self, TrapError> {
        self.nonlinear_coeff = nonlinear_coeff;
        self.validate()?;
        Ok(self)
    }

    /// Use a Boltzmann constant from another unit system (or a reduced unit of 1.0)
    pub fn with_boltzmann(mut self, boltzmann: f64) -> Result<Self, TrapError> {
        self.boltzmann = boltzmann;
        self.validate()?;
        Ok(self)
    }

    /// Replace the integration step
    pub fn with_dt(mut self, dt: f64) -> Result<Self, TrapError> {
        self.dt = dt;
        self.validate()?;
        Ok(self)
    }

    /// Replace the temperature
    pub fn with_temperature(mut self, temperature: f64) -> Result<Self, TrapError> {
        self.temperature = temperature;
        self.validate()?;
        Ok(self)
    }

    /// Replace the decimation factor
    pub fn with_reduction(mut self, reduction: usize) -> Result<Self, TrapError> {
        self.reduction = reduction;
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), TrapError> {
        let positive = [
            ("mass", self.mass),
            ("temperature", self.temperature),
            ("dt", self.dt),
            ("boltzmann", self.boltzmann),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(TrapError::Configuration(format!(
                    "{name} must be finite and > 0, got {value}"
                )));
            }
        }

        let non_negative = [("gamma", self.gamma), ("spring", self.spring)];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(TrapError::Configuration(format!(
                    "{name} must be finite and >= 0, got {value}"
                )));
            }
        }

        if !self.nonlinear_coeff.is_finite() {
            return Err(TrapError::Configuration(
                "nonlinear_coeff must be finite".to_string(),
            ));
        }

        if self.reduction == 0 {
            return Err(TrapError::Configuration(
                "reduction must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn spring(&self) -> f64 {
        self.spring
    }

    pub fn nonlinear_coeff(&self) -> f64 {
        self.nonlinear_coeff
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn boltzmann(&self) -> f64 {
        self.boltzmann
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn reduction(&self) -> usize {
        self.reduction
    }

    /// Damping rate `gamma / mass` [1/s]
    pub fn damping_rate(&self) -> f64 {
        self.gamma / self.mass
    }

    /// Natural angular frequency `sqrt(spring / mass)`
    pub fn omega_resonance(&self) -> f64 {
        (self.spring / self.mass).sqrt()
    }

    /// Natural frequency in Hz
    pub fn resonance_frequency(&self) -> f64 {
        self.omega_resonance() / TAU
    }

    /// Natural oscillation period, `None` for a free particle
    pub fn period(&self) -> Option<f64> {
        if self.spring > 0.0 {
            Some(TAU / self.omega_resonance())
        } else {
            None
        }
    }

    /// Thermal energy `kb * T`
    pub fn thermal_energy(&self) -> f64 {
        self.boltzmann * self.temperature
    }

    /// Standard deviation of the per-step velocity kick, `sqrt(2 gamma kb T dt) / mass`
    pub fn noise_std(&self) -> f64 {
        (2.0 * self.gamma * self.thermal_energy() * self.dt).sqrt() / self.mass
    }

    /// Equipartition position scale `sqrt(kb T / spring)`
    pub fn thermal_length(&self) -> Option<f64> {
        if self.spring > 0.0 {
            Some((self.thermal_energy() / self.spring).sqrt())
        } else {
            None
        }
    }

    /// Rate at which the integrator (and the feedback filter) runs
    pub fn integration_rate(&self) -> f64 {
        1.0 / self.dt
    }

    /// Rate of the decimated trajectory
    pub fn sampling_rate(&self) -> f64 {
        self.integration_rate() / self.reduction as f64
    }

    /// Number of integration samples spanning `period_count` natural periods
    pub fn steps_for_periods(&self, period_count: f64) -> Result<usize, TrapError> {
        if !period_count.is_finite() || period_count <= 0.0 {
            return Err(TrapError::Configuration(format!(
                "period_count must be finite and > 0, got {period_count}"
            )));
        }
        let period = self.period().ok_or_else(|| {
            TrapError::Configuration("period_count requires spring > 0".to_string())
        })?;

        // Nudge before flooring so that e.g. 1000 periods at T/400 gives exactly 400000.
        let steps = (period_count * period / self.dt * (1.0 + 1e-12)).floor();
        if steps > MAX_STEPS as f64 {
            return Err(TrapError::Configuration(format!(
                "{period_count} periods need {steps:e} steps, more than the limit of {MAX_STEPS}"
            )));
        }
        Ok(steps as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_params() -> ParameterSet {
        ParameterSet::new(1.0, 0.1, 4.0, 1.0, 1e-3, 10)
            .and_then(|p| p.with_boltzmann(1.0))
            .expect("valid parameters")
    }

    #[test]
    fn test_derived_quantities() {
        let p = unit_params();
        assert!((p.omega_resonance() - 2.0).abs() < 1e-12);
        assert!((p.damping_rate() - 0.1).abs() < 1e-12);
        assert!((p.thermal_length().unwrap() - 0.5).abs() < 1e-12);
        assert!((p.noise_std() - (2.0 * 0.1 * 1e-3_f64).sqrt()).abs() < 1e-15);
        assert!((p.sampling_rate() - 100.0).abs() < 1e-9);

        let finer = p.with_reduction(4).unwrap();
        assert!((finer.sampling_rate() - 250.0).abs() < 1e-9);
        assert!(p.with_reduction(0).is_err());
    }

    #[test]
    fn test_steps_for_periods_is_exact() {
        let base = unit_params();
        let period = base.period().unwrap();
        let p = base.with_dt(period / 400.0).unwrap();
        assert_eq!(p.steps_for_periods(1000.0).unwrap(), 400_000);
        assert_eq!(p.steps_for_periods(3.0).unwrap(), 1200);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(ParameterSet::new(0.0, 0.1, 1.0, 1.0, 1e-3, 1).is_err());
        assert!(ParameterSet::new(1.0, -0.1, 1.0, 1.0, 1e-3, 1).is_err());
        assert!(ParameterSet::new(1.0, 0.1, 1.0, 0.0, 1e-3, 1).is_err());
        assert!(ParameterSet::new(1.0, 0.1, 1.0, 1.0, 0.0, 1).is_err());
        assert!(ParameterSet::new(1.0, 0.1, 1.0, 1.0, 1e-3, 0).is_err());
        assert!(ParameterSet::new(1.0, 0.1, 1.0, 1.0, f64::NAN, 1).is_err());
    }

    #[test]
    fn test_huge_period_count_is_rejected() {
        let p = unit_params();
        assert!(matches!(
            p.steps_for_periods(1e30),
            Err(TrapError::Configuration(_))
        ));
        let limit_periods = MAX_STEPS as f64 * p.dt() / p.period().unwrap();
        assert!(p.steps_for_periods(limit_periods * 1.01).is_err());
        assert!(p.steps_for_periods(limit_periods * 0.99).is_ok());
    }

    #[test]
    fn test_free_particle_has_no_period() {
        let p = ParameterSet::new(1.0, 0.1, 0.0, 1.0, 1e-3, 1).unwrap();
        assert!(p.period().is_none());
        assert!(p.steps_for_periods(10.0).is_err());
    }
}
