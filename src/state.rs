//! Particle state representation
//!
//! The integrator state consists of two components:
//! - x: position along the trap axis
//! - v: velocity

use crate::TrapError;

/// Number of components of the particle state
pub const STATE_DIM: usize = 2;

/// Position and velocity of the particle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegratorState {
    /// Position
    pub x: f64,
    /// Velocity
    pub v: f64,
}

impl IntegratorState {
    /// Create a new state
    pub fn new(x: f64, v: f64) -> Self {
        Self { x, v }
    }

    /// Create a particle at rest in the trap center
    pub fn zero() -> Self {
        Self { x: 0.0, v: 0.0 }
    }

    /// Build a state from a `[x, v]` slice
    pub fn from_slice(values: &[f64]) -> Result<Self, TrapError> {
        match values {
            [x, v] => Ok(Self::new(*x, *v)),
            _ => Err(TrapError::Dimension {
                expected: STATE_DIM,
                got: values.len(),
            }),
        }
    }
}

impl Default for IntegratorState {
    fn default() -> Self {
        Self::zero()
    }
}
