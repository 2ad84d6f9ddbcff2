//! Stride decimation of the integrated state
//!
//! Sample `k` is kept when `k % reduction == 0` and the whole window
//! `[k, k + reduction)` lies inside the run, so a run of `n_time` samples
//! yields exactly `n_time / reduction` kept samples. No anti-alias filtering.

use crate::TrapError;

/// Counter deciding which integration samples reach the trajectory
#[derive(Debug, Clone)]
pub struct Decimator {
    reduction: usize,
    capacity: usize,
    kept: usize,
}

impl Decimator {
    pub fn new(n_time: usize, reduction: usize) -> Result<Self, TrapError> {
        if reduction == 0 {
            return Err(TrapError::Configuration(
                "reduction must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            reduction,
            capacity: n_time / reduction,
            kept: 0,
        })
    }

    /// Whether sample `k` belongs to the decimated output
    #[inline]
    pub fn keeps(&self, k: usize) -> bool {
        k % self.reduction == 0 && k / self.reduction < self.capacity
    }

    /// Offer sample `k`; returns true and counts it if it is kept
    #[inline]
    pub fn offer(&mut self, k: usize) -> bool {
        let keep = self.keeps(k);
        if keep {
            self.kept += 1;
        }
        keep
    }

    /// Length of the decimated output for a complete run
    pub fn output_len(&self) -> usize {
        self.capacity
    }

    pub fn kept(&self) -> usize {
        self.kept
    }

    pub fn reduction(&self) -> usize {
        self.reduction
    }
}

/// Keep every `reduction`-th element of `samples`, dropping the partial tail
pub fn decimate<T: Copy>(samples: &[T], reduction: usize) -> Result<Vec<T>, TrapError> {
    let decimator = Decimator::new(samples.len(), reduction)?;
    Ok(samples
        .iter()
        .enumerate()
        .filter(|(k, _)| decimator.keeps(*k))
        .map(|(_, s)| *s)
        .collect())
}
