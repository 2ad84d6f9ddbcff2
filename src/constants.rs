//! Physical constants
//!
//! SI values. Unit systems other than SI only need a rescaled Boltzmann
//! constant, see [`ParameterSet::with_boltzmann`](crate::ParameterSet::with_boltzmann).

/// Boltzmann constant [J/K]
pub const BOLTZMANN: f64 = 1.380_648_52e-23;

/// Elementary charge [C]
pub const ELEMENTARY_CHARGE: f64 = 1.6e-19;

/// Speed of light in vacuum [m/s]
pub const SPEED_OF_LIGHT: f64 = 3.0e8;

/// Mass of a nitrogen molecule [kg]
pub const NITROGEN_MOLECULE_MASS: f64 = 2.325e-26;

/// Density of fused silica [kg/m^3]
pub const SILICA_DENSITY: f64 = 2200.0;

/// Boltzmann constant in kg µm² / (s² K), for simulations carried out in micrometres.
pub const BOLTZMANN_MICROMETRE: f64 = BOLTZMANN * 1.0e12;
