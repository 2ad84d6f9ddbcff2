//! Band-pass feedback filter
//!
//! Coefficient design for a digital Butterworth band-pass and the direct-form
//! IIR realization that runs once per integration step.
//!
//! The realization keeps two short tapped delay lines and evaluates
//!
//! ```text
//! y_k = sum_i b[i] * x_window[i] - sum_j a[j+1] * y_window[j]
//! ```
//!
//! with the newest sample at index 0 of each window.

use std::f64::consts::PI;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::TrapError;

/// Butterworth band-pass corner frequencies in Hz
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterDesign {
    /// Prototype low-pass order; the band-pass has twice as many poles
    pub order: usize,
    /// Lower band edge [Hz]
    pub low: f64,
    /// Upper band edge [Hz]
    pub high: f64,
}

impl Default for FilterDesign {
    fn default() -> Self {
        Self {
            order: 2,
            low: 99_000.0,
            high: 101_000.0,
        }
    }
}

impl FilterDesign {
    pub fn new(order: usize, low: f64, high: f64) -> Self {
        Self { order, low, high }
    }

    /// Band of relative half-width `relative_width` around `center`
    pub fn centered(order: usize, center: f64, relative_width: f64) -> Self {
        Self {
            order,
            low: center * (1.0 - relative_width),
            high: center * (1.0 + relative_width),
        }
    }

    pub fn validate(&self, sample_rate: f64) -> Result<(), TrapError> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(TrapError::FilterDesign(format!(
                "sample rate must be finite and > 0, got {sample_rate}"
            )));
        }
        if self.order == 0 {
            return Err(TrapError::FilterDesign("order must be >= 1".to_string()));
        }
        if !self.low.is_finite() || !self.high.is_finite() {
            return Err(TrapError::FilterDesign(
                "band edges must be finite".to_string(),
            ));
        }
        if self.low <= 0.0 {
            return Err(TrapError::FilterDesign(format!(
                "low edge must be > 0, got {}",
                self.low
            )));
        }
        if self.low >= self.high {
            return Err(TrapError::FilterDesign(format!(
                "low edge {} must be below high edge {}",
                self.low, self.high
            )));
        }
        let nyquist = sample_rate / 2.0;
        if self.high >= nyquist {
            return Err(TrapError::FilterDesign(format!(
                "high edge {} must be below the Nyquist frequency {nyquist}",
                self.high
            )));
        }
        Ok(())
    }

    /// Design the digital filter for a given sampling rate.
    ///
    /// Analog Butterworth prototype, pre-warped band edges, low-pass to
    /// band-pass transform and bilinear transform, all in pole/zero form.
    pub fn coefficients(&self, sample_rate: f64) -> Result<FilterCoefficients, TrapError> {
        self.validate(sample_rate)?;

        // Work on a normalized sampling rate of 2, so band edges are fractions of Nyquist.
        const FS: f64 = 2.0;
        let warp = |f: f64| {
            let wn = 2.0 * f / sample_rate;
            2.0 * FS * (PI * wn / FS).tan()
        };
        let w1 = warp(self.low);
        let w2 = warp(self.high);
        let wo = (w1 * w2).sqrt();
        let bw = w2 - w1;

        let n = self.order as i64;
        let prototype: Vec<Complex64> = (0..self.order)
            .map(|k| {
                let m = (-n + 1 + 2 * k as i64) as f64;
                -Complex64::from_polar(1.0, PI * m / (2.0 * n as f64))
            })
            .collect();

        // Low-pass to band-pass: each pole splits in two, N zeros land at the origin.
        let scaled: Vec<Complex64> = prototype.iter().map(|&p| p * (bw / 2.0)).collect();
        let mut poles = Vec::with_capacity(2 * self.order);
        poles.extend(scaled.iter().map(|&p| p + (p * p - wo * wo).sqrt()));
        poles.extend(scaled.iter().map(|&p| p - (p * p - wo * wo).sqrt()));
        let zeros = vec![Complex64::new(0.0, 0.0); self.order];
        let gain = bw.powi(self.order as i32);

        // Bilinear transform; the surplus poles get zeros at z = -1.
        let fs2 = Complex64::new(2.0 * FS, 0.0);
        let mut z_zeros: Vec<Complex64> =
            zeros.iter().map(|&z| (fs2 + z) / (fs2 - z)).collect();
        let z_poles: Vec<Complex64> = poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect();
        let surplus = poles.len() - zeros.len();
        z_zeros.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(surplus));

        let num: Complex64 = zeros.iter().map(|&z| fs2 - z).product();
        let den: Complex64 = poles.iter().map(|&p| fs2 - p).product();
        let z_gain = gain * (num / den).re;

        let b = poly(&z_zeros).into_iter().map(|c| z_gain * c).collect();
        let a = poly(&z_poles);

        FilterCoefficients::new(b, a)
    }
}

/// Real polynomial coefficients (highest power first) with the given roots
fn poly(roots: &[Complex64]) -> Vec<f64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for &root in roots {
        let mut next = vec![Complex64::new(0.0, 0.0); coeffs.len() + 1];
        for (i, &c) in coeffs.iter().enumerate() {
            next[i] += c;
            next[i + 1] -= c * root;
        }
        coeffs = next;
    }
    coeffs.into_iter().map(|c| c.re).collect()
}

/// Feed-forward (`b`) and feedback (`a`) coefficients with `a[0] == 1`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterCoefficients {
    b: Vec<f64>,
    a: Vec<f64>,
}

impl FilterCoefficients {
    /// Build a coefficient set, normalizing by `a[0]`.
    ///
    /// Values are not required to be finite, so degenerate sets can be injected.
    pub fn new(mut b: Vec<f64>, mut a: Vec<f64>) -> Result<Self, TrapError> {
        if b.is_empty() || a.is_empty() {
            return Err(TrapError::FilterDesign(
                "coefficient vectors must be non-empty".to_string(),
            ));
        }
        let a0 = a[0];
        if a0 == 0.0 {
            return Err(TrapError::FilterDesign("a[0] must be non-zero".to_string()));
        }
        if a0 != 1.0 {
            b.iter_mut().for_each(|c| *c /= a0);
            a.iter_mut().for_each(|c| *c /= a0);
        }
        Ok(Self { b, a })
    }

    pub fn b(&self) -> &[f64] {
        &self.b
    }

    pub fn a(&self) -> &[f64] {
        &self.a
    }

    /// Mutable access to the feed-forward taps
    pub fn b_mut(&mut self) -> &mut [f64] {
        &mut self.b
    }

    /// Magnitude response at `frequency` for a filter clocked at `sample_rate`
    pub fn gain_at(&self, frequency: f64, sample_rate: f64) -> f64 {
        let omega = 2.0 * PI * frequency / sample_rate;
        let eval = |coeffs: &[f64]| -> Complex64 {
            coeffs
                .iter()
                .enumerate()
                .map(|(k, &c)| c * Complex64::from_polar(1.0, -omega * k as f64))
                .sum()
        };
        (eval(&self.b) / eval(&self.a)).norm()
    }
}

/// Frequency of unity gain for a Butterworth band-pass designed with pre-warping
pub fn band_center(design: &FilterDesign, sample_rate: f64) -> f64 {
    let t1 = (PI * design.low / sample_rate).tan();
    let t2 = (PI * design.high / sample_rate).tan();
    (t1 * t2).sqrt().atan() * sample_rate / PI
}

/// Direct-form IIR filter with explicit delay lines
#[derive(Debug, Clone)]
pub struct DigitalBandpassFilter {
    coefficients: FilterCoefficients,
    /// Input history, newest first, one slot per `b` tap
    x_window: Vec<f64>,
    /// Output history, newest first, one slot per `a` tap after `a[0]`
    y_window: Vec<f64>,
    last_output: f64,
}

impl DigitalBandpassFilter {
    /// Create a filter with zeroed delay lines
    pub fn new(coefficients: FilterCoefficients) -> Self {
        let x_len = coefficients.b.len();
        let y_len = coefficients.a.len() - 1;
        Self {
            coefficients,
            x_window: vec![0.0; x_len],
            y_window: vec![0.0; y_len],
            last_output: 0.0,
        }
    }

    /// Design and build a filter in one go
    pub fn design(design: &FilterDesign, sample_rate: f64) -> Result<Self, TrapError> {
        Ok(Self::new(design.coefficients(sample_rate)?))
    }

    /// Build a filter from raw taps, normalized by `a[0]`
    pub fn from_coefficients(b: Vec<f64>, a: Vec<f64>) -> Result<Self, TrapError> {
        Ok(Self::new(FilterCoefficients::new(b, a)?))
    }

    /// Feed one input sample and return the filtered output
    pub fn push(&mut self, input: f64) -> f64 {
        self.x_window.rotate_right(1);
        self.x_window[0] = input;

        let forward: f64 = self
            .coefficients
            .b
            .iter()
            .zip(&self.x_window)
            .map(|(b, x)| b * x)
            .sum();
        let feedback: f64 = self.coefficients.a[1..]
            .iter()
            .zip(&self.y_window)
            .map(|(a, y)| a * y)
            .sum();
        let output = forward - feedback;

        if !self.y_window.is_empty() {
            self.y_window.rotate_right(1);
            self.y_window[0] = output;
        }
        self.last_output = output;
        output
    }

    /// Clear the delay lines
    pub fn reset(&mut self) {
        self.x_window.iter_mut().for_each(|x| *x = 0.0);
        self.y_window.iter_mut().for_each(|y| *y = 0.0);
        self.last_output = 0.0;
    }

    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    pub fn coefficients(&self) -> &FilterCoefficients {
        &self.coefficients
    }

    pub fn output_window(&self) -> &[f64] {
        &self.y_window
    }

    /// True if any value in the output window is NaN or infinite
    pub fn has_non_finite(&self) -> bool {
        if self.y_window.is_empty() {
            return !self.last_output.is_finite();
        }
        self.y_window.iter().any(|y| !y.is_finite())
    }

    /// True once every value in the output window is NaN or infinite
    pub fn is_saturated(&self) -> bool {
        if self.y_window.is_empty() {
            return !self.last_output.is_finite();
        }
        self.y_window.iter().all(|y| !y.is_finite())
    }
}
