//! Physical trap description
//!
//! Turns raw experimental constants (particle size, gas, laser) into the
//! coefficients of a [`ParameterSet`]. Straight-line arithmetic, evaluated
//! once per experiment.
//!
//! All fields share one unit system chosen by the caller. The default preset
//! works in micrometres, kilograms and seconds, in which the Boltzmann
//! constant is `1.38e-11` pJ/K.

use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

use crate::constants::{
    BOLTZMANN, BOLTZMANN_MICROMETRE, NITROGEN_MOLECULE_MASS, SILICA_DENSITY, SPEED_OF_LIGHT,
};
use crate::params::ParameterSet;
use crate::TrapError;

/// Kinetic-theory prefactor of the free-molecular gas damping
const GAS_DAMPING_PREFACTOR: f64 = 15.8;

/// Single-beam optical tweezer in the Rayleigh regime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalTrap {
    pub medium_index: f64,
    pub particle_index: f64,
    pub numerical_aperture: f64,
    /// Laser power
    pub power: f64,
    /// Vacuum wavelength
    pub wavelength: f64,
    pub speed_of_light: f64,
}

impl Default for OpticalTrap {
    fn default() -> Self {
        Self {
            medium_index: 1.01,
            particle_index: 1.46,
            numerical_aperture: 0.7,
            power: 50e9,
            wavelength: 0.78,
            speed_of_light: SPEED_OF_LIGHT * 1e6,
        }
    }
}

impl OpticalTrap {
    /// Beam waist `lambda_m / (pi NA)`
    pub fn waist(&self) -> f64 {
        self.medium_wavelength() / (PI * self.numerical_aperture)
    }

    pub fn rayleigh_range(&self) -> f64 {
        PI * self.waist().powi(2) / self.medium_wavelength()
    }

    /// Axial stiffness `-2 V0 / z_r^2` for a sphere of `radius`
    pub fn spring(&self, radius: f64) -> f64 {
        let m = self.particle_index / self.medium_index;
        let intensity = 2.0 * self.power / (PI * self.waist().powi(2));
        let depth = -(2.0 * PI * self.medium_index * radius.powi(3) / self.speed_of_light)
            * ((m * m - 1.0) / (m * m + 2.0))
            * intensity;
        -2.0 * depth / self.rayleigh_range().powi(2)
    }

    fn medium_wavelength(&self) -> f64 {
        self.wavelength / self.medium_index
    }
}

/// Where the linear stiffness comes from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpringSource {
    /// Explicit stiffness
    Direct { spring: f64 },
    /// Natural frequency in Hz, `spring = m (2 pi f)^2`
    Frequency { frequency: f64 },
    /// Derived from the laser geometry
    Optical(OpticalTrap),
}

/// Raw constants of one trapped-particle experiment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrapPhysics {
    pub radius: f64,
    pub pressure: f64,
    pub gas_molecule_mass: f64,
    pub temperature: f64,
    pub boltzmann: f64,
    pub density: f64,
    pub spring: SpringSource,
    pub nonlinear_coeff: f64,
    /// Integration steps per natural period
    pub points_per_period: f64,
    pub reduction: usize,
}

impl Default for TrapPhysics {
    fn default() -> Self {
        Self::micrometre_preset()
    }
}

impl TrapPhysics {
    /// 75 nm silica sphere at 300 K in a 1.5e-6 stiffness trap, micrometre units
    pub fn micrometre_preset() -> Self {
        Self {
            radius: 75e-3,
            pressure: 1e-3,
            gas_molecule_mass: NITROGEN_MOLECULE_MASS,
            temperature: 300.0,
            boltzmann: BOLTZMANN_MICROMETRE,
            density: SILICA_DENSITY * 1e-18,
            spring: SpringSource::Direct {
                spring: 1.534_810_6e-6,
            },
            nonlinear_coeff: 0.0,
            points_per_period: 400.0,
            reduction: 50,
        }
    }

    /// 75 nm silica sphere at 80 kHz with a cubic stiffening term, SI units
    pub fn duffing_si_preset() -> Self {
        Self {
            radius: 75e-9,
            pressure: 1e3,
            gas_molecule_mass: NITROGEN_MOLECULE_MASS,
            temperature: 293.0,
            boltzmann: BOLTZMANN,
            density: SILICA_DENSITY,
            spring: SpringSource::Frequency { frequency: 8e4 },
            nonlinear_coeff: 5e6,
            points_per_period: 100.0,
            reduction: 1,
        }
    }

    pub fn validate(&self) -> Result<(), TrapError> {
        let positive = [
            ("radius", self.radius),
            ("gas_molecule_mass", self.gas_molecule_mass),
            ("temperature", self.temperature),
            ("boltzmann", self.boltzmann),
            ("density", self.density),
            ("points_per_period", self.points_per_period),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(TrapError::Configuration(format!(
                    "{name} must be finite and > 0, got {value}"
                )));
            }
        }
        if !self.pressure.is_finite() || self.pressure < 0.0 {
            return Err(TrapError::Configuration(format!(
                "pressure must be finite and >= 0, got {}",
                self.pressure
            )));
        }
        Ok(())
    }

    /// RMS speed of the gas molecules `sqrt(3 kb T / m_gas)`
    pub fn gas_velocity(&self) -> f64 {
        (3.0 * self.boltzmann * self.temperature / self.gas_molecule_mass).sqrt()
    }

    /// Gas friction coefficient `15.8 r^2 P / v_gas`
    pub fn gamma(&self) -> f64 {
        GAS_DAMPING_PREFACTOR * self.radius.powi(2) * self.pressure / self.gas_velocity()
    }

    /// Mass of a homogeneous sphere
    pub fn mass(&self) -> f64 {
        self.density * 4.0 * PI * self.radius.powi(3) / 3.0
    }

    pub fn spring(&self) -> Result<f64, TrapError> {
        let spring = match self.spring {
            SpringSource::Direct { spring } => spring,
            SpringSource::Frequency { frequency } => self.mass() * (TAU * frequency).powi(2),
            SpringSource::Optical(trap) => trap.spring(self.radius),
        };
        if !spring.is_finite() || spring <= 0.0 {
            return Err(TrapError::Configuration(format!(
                "trap stiffness must be finite and > 0, got {spring}"
            )));
        }
        Ok(spring)
    }

    /// Natural period `2 pi sqrt(m / k)`
    pub fn period(&self) -> Result<f64, TrapError> {
        Ok(TAU * (self.mass() / self.spring()?).sqrt())
    }

    /// Parameters with `dt = period / points_per_period`
    pub fn parameter_set(&self) -> Result<ParameterSet, TrapError> {
        self.validate()?;
        let dt = self.period()? / self.points_per_period;
        ParameterSet::new(
            self.mass(),
            self.gamma(),
            self.spring()?,
            self.temperature,
            dt,
            self.reduction,
        )?
        .with_boltzmann(self.boltzmann)?
        .with_nonlinear_coeff(self.nonlinear_coeff)
    }
}
