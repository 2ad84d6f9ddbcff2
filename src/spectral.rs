//! Power spectral density estimation
//!
//! One-sided density estimates of a real signal sampled at `fs`:
//!
//! - periodogram: constant detrend, boxcar window, `c_k |X_k|^2 / (fs N)`
//! - Welch: periodic Hamming window, 50% overlap, per-segment detrend,
//!   `c_k |X_k|^2 / (fs sum w^2)` averaged over segments
//!
//! with `c_k = 2` except for DC and, for even lengths, the Nyquist bin.
//! The FFT accepts any length: radix-2 for powers of two, Bluestein's
//! chirp-z otherwise.

use std::f64::consts::{PI, TAU};

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::TrapError;

/// Estimator applied to each decimated trajectory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpectralMethod {
    #[default]
    Periodogram,
    Welch {
        segment_len: usize,
    },
}

impl SpectralMethod {
    /// Transform length used for a signal of `n` samples
    pub fn transform_len(&self, n: usize) -> usize {
        match *self {
            SpectralMethod::Periodogram => n,
            SpectralMethod::Welch { segment_len } => segment_len.min(n),
        }
    }

    /// Frequency bins of the estimate for a signal of `n` samples
    pub fn frequencies(&self, n: usize, fs: f64) -> Vec<f64> {
        frequency_bins(self.transform_len(n), fs)
    }

    pub fn estimate(&self, signal: &[f64], fs: f64) -> Result<Vec<f64>, TrapError> {
        match *self {
            SpectralMethod::Periodogram => Ok(periodogram(signal, fs)),
            SpectralMethod::Welch { segment_len } => welch(signal, fs, segment_len),
        }
    }
}

/// In-place radix-2 FFT; `data.len()` must be a power of two
fn fft_radix2(data: &mut [Complex64]) {
    let n = data.len();
    if n <= 1 {
        return;
    }
    debug_assert!(n.is_power_of_two());

    let mut j = 0usize;
    for i in 0..n {
        if i < j {
            data.swap(i, j);
        }
        let mut m = n >> 1;
        while m >= 1 && j >= m {
            j -= m;
            m >>= 1;
        }
        j += m;
    }

    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let angle = -TAU / len as f64;
        for start in (0..n).step_by(len) {
            for k in 0..half {
                let tw = Complex64::from_polar(1.0, angle * k as f64);
                let u = data[start + k];
                let v = data[start + k + half] * tw;
                data[start + k] = u + v;
                data[start + k + half] = u - v;
            }
        }
        len <<= 1;
    }
}

/// Chirp-z evaluation of an arbitrary-length DFT through a radix-2 convolution
fn bluestein(input: &[Complex64]) -> Vec<Complex64> {
    let n = input.len();
    let m = (2 * n - 1).next_power_of_two();

    // k^2 mod 2n keeps the chirp phase small for long inputs
    let chirp: Vec<Complex64> = (0..n)
        .map(|k| {
            let k2 = (k as u128 * k as u128 % (2 * n as u128)) as f64;
            Complex64::from_polar(1.0, -PI * k2 / n as f64)
        })
        .collect();

    let mut a = vec![Complex64::new(0.0, 0.0); m];
    for (slot, (&x, &w)) in a.iter_mut().zip(input.iter().zip(&chirp)) {
        *slot = x * w;
    }

    let mut b = vec![Complex64::new(0.0, 0.0); m];
    b[0] = chirp[0].conj();
    for k in 1..n {
        let w = chirp[k].conj();
        b[k] = w;
        b[m - k] = w;
    }

    fft_radix2(&mut a);
    fft_radix2(&mut b);
    for (x, &y) in a.iter_mut().zip(&b) {
        *x = (*x * y).conj();
    }
    // Inverse transform via conjugation
    fft_radix2(&mut a);
    let scale = 1.0 / m as f64;

    chirp
        .iter()
        .zip(&a)
        .map(|(&w, &c)| w * c.conj() * scale)
        .collect()
}

/// Discrete Fourier transform of any length
pub fn fft(input: &[Complex64]) -> Vec<Complex64> {
    let n = input.len();
    if n.is_power_of_two() || n <= 1 {
        let mut data = input.to_vec();
        fft_radix2(&mut data);
        data
    } else {
        bluestein(input)
    }
}

/// One-sided bins `k fs / n` for `k = 0..=n/2`
pub fn frequency_bins(n: usize, fs: f64) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    (0..=n / 2).map(|k| k as f64 * fs / n as f64).collect()
}

/// One-sided squared magnitudes of the detrended, windowed transform
fn one_sided_power(segment: &[f64], window: Option<&[f64]>) -> Vec<f64> {
    let n = segment.len();
    let mean = segment.iter().sum::<f64>() / n as f64;
    let data: Vec<Complex64> = match window {
        Some(w) => segment
            .iter()
            .zip(w)
            .map(|(&x, &w)| Complex64::new((x - mean) * w, 0.0))
            .collect(),
        None => segment
            .iter()
            .map(|&x| Complex64::new(x - mean, 0.0))
            .collect(),
    };

    let spectrum = fft(&data);
    let mut power: Vec<f64> = spectrum[..=n / 2].iter().map(|c| c.norm_sqr()).collect();
    let doubled_end = if n % 2 == 0 { n / 2 } else { n / 2 + 1 };
    for p in power.iter_mut().take(doubled_end).skip(1) {
        *p *= 2.0;
    }
    power
}

/// Periodogram with constant detrend, boxcar window and density scaling
pub fn periodogram(signal: &[f64], fs: f64) -> Vec<f64> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let scale = 1.0 / (fs * n as f64);
    let mut power = one_sided_power(signal, None);
    power.iter_mut().for_each(|p| *p *= scale);
    power
}

/// Periodic Hamming window of length `n`
pub fn hamming(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.54 - 0.46 * (TAU * i as f64 / n as f64).cos())
        .collect()
}

/// Welch estimate with Hamming segments of `segment_len` samples and 50% overlap
///
/// A segment longer than the signal is shortened to the signal length.
pub fn welch(signal: &[f64], fs: f64, segment_len: usize) -> Result<Vec<f64>, TrapError> {
    if segment_len == 0 {
        return Err(TrapError::Configuration(
            "welch segment length must be at least 1".to_string(),
        ));
    }
    let n = signal.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let nperseg = segment_len.min(n);
    let step = nperseg - nperseg / 2;
    let window = hamming(nperseg);
    let scale = 1.0 / (fs * window.iter().map(|w| w * w).sum::<f64>());

    let mut sum = vec![0.0; nperseg / 2 + 1];
    let mut segments = 0usize;
    let mut start = 0;
    while start + nperseg <= n {
        let power = one_sided_power(&signal[start..start + nperseg], Some(&window));
        sum.iter_mut().zip(&power).for_each(|(s, p)| *s += p);
        segments += 1;
        start += step;
    }

    let norm = scale / segments as f64;
    sum.iter_mut().for_each(|s| *s *= norm);
    Ok(sum)
}

/// Running sum of equal-length spectra
#[derive(Debug, Clone, Default)]
pub struct PsdAccumulator {
    sum: Vec<f64>,
    count: usize,
}

impl PsdAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, power: &[f64]) -> Result<(), TrapError> {
        if self.count == 0 {
            self.sum = power.to_vec();
        } else {
            if power.len() != self.sum.len() {
                return Err(TrapError::LengthMismatch {
                    context: "periodogram",
                    expected: self.sum.len(),
                    got: power.len(),
                });
            }
            self.sum.iter_mut().zip(power).for_each(|(s, p)| *s += p);
        }
        self.count += 1;
        Ok(())
    }

    /// Combine two partial sums
    pub fn merge(mut self, other: Self) -> Result<Self, TrapError> {
        if other.count == 0 {
            return Ok(self);
        }
        if self.count == 0 {
            return Ok(other);
        }
        if other.sum.len() != self.sum.len() {
            return Err(TrapError::LengthMismatch {
                context: "periodogram",
                expected: self.sum.len(),
                got: other.sum.len(),
            });
        }
        self.sum.iter_mut().zip(&other.sum).for_each(|(s, p)| *s += p);
        self.count += other.count;
        Ok(self)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean spectrum on `frequencies`, or `None` if nothing was added
    pub fn finish(self, frequencies: Vec<f64>) -> Result<Option<PsdEstimate>, TrapError> {
        if self.count == 0 {
            return Ok(None);
        }
        let count = self.count as f64;
        let power = self.sum.into_iter().map(|s| s / count).collect();
        PsdEstimate::new(frequencies, power, self.count).map(Some)
    }
}

/// A spectral line found in an estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpectralPeak {
    pub index: usize,
    pub frequency: f64,
    pub power: f64,
}

/// Averaged one-sided PSD
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PsdEstimate {
    frequencies: Vec<f64>,
    power: Vec<f64>,
    averaged: usize,
}

impl PsdEstimate {
    pub fn new(frequencies: Vec<f64>, power: Vec<f64>, averaged: usize) -> Result<Self, TrapError> {
        if frequencies.len() != power.len() {
            return Err(TrapError::LengthMismatch {
                context: "frequency bins",
                expected: power.len(),
                got: frequencies.len(),
            });
        }
        Ok(Self {
            frequencies,
            power,
            averaged,
        })
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn power(&self) -> &[f64] {
        &self.power
    }

    /// Number of spectra in the mean
    pub fn averaged(&self) -> usize {
        self.averaged
    }

    pub fn len(&self) -> usize {
        self.power.len()
    }

    pub fn is_empty(&self) -> bool {
        self.power.is_empty()
    }

    /// Bin spacing, `None` with fewer than two bins
    pub fn resolution(&self) -> Option<f64> {
        match self.frequencies.as_slice() {
            [f0, f1, ..] => Some(f1 - f0),
            _ => None,
        }
    }

    /// Centered moving average over `bins` bins, shortened at both ends
    ///
    /// Raw periodogram bins scatter by their own size, so take linewidths on
    /// the smoothed estimate.
    pub fn smoothed(&self, bins: usize) -> PsdEstimate {
        let half = bins / 2;
        let n = self.power.len();
        let power = (0..n)
            .map(|i| {
                let lo = i.saturating_sub(half);
                let hi = (i + half + 1).min(n);
                self.power[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
            })
            .collect();
        PsdEstimate {
            frequencies: self.frequencies.clone(),
            power,
            averaged: self.averaged,
        }
    }

    /// Largest bin at or above `min_frequency`
    pub fn dominant_peak(&self, min_frequency: f64) -> Option<SpectralPeak> {
        self.frequencies
            .iter()
            .zip(&self.power)
            .enumerate()
            .filter(|(_, (&f, p))| f >= min_frequency && p.is_finite())
            .max_by(|(_, (_, a)), (_, (_, b))| a.total_cmp(b))
            .map(|(index, (&frequency, &power))| SpectralPeak {
                index,
                frequency,
                power,
            })
    }

    /// Full width at half maximum around `peak`, interpolated between bins
    ///
    /// `None` if the power never drops below half on one of the sides.
    pub fn half_power_width(&self, peak: &SpectralPeak) -> Option<f64> {
        let half = peak.power / 2.0;
        let crossing = |i: usize, j: usize| {
            // Linear interpolation between bin i (above half) and bin j (below)
            let (fi, fj) = (self.frequencies[i], self.frequencies[j]);
            let (pi, pj) = (self.power[i], self.power[j]);
            fi + (half - pi) * (fj - fi) / (pj - pi)
        };

        let left = (0..peak.index)
            .rev()
            .find(|&j| self.power[j] < half)
            .map(|j| crossing(j + 1, j))?;
        let right = (peak.index + 1..self.power.len())
            .find(|&j| self.power[j] < half)
            .map(|j| crossing(j - 1, j))?;
        Some(right - left)
    }

    /// Integrated power over bins with `low <= f <= high`
    pub fn band_power(&self, low: f64, high: f64) -> f64 {
        let df = self.resolution().unwrap_or(0.0);
        self.frequencies
            .iter()
            .zip(&self.power)
            .filter(|(&f, _)| f >= low && f <= high)
            .map(|(_, p)| p * df)
            .sum()
    }
}
