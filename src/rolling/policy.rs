//! Sliding-window statistic policies.
//!
//! A policy is the sufficient statistic a [`RollingFilter`](crate::RollingFilter)
//! maintains over its window. The engine surfaces every slide as one
//! [`advance`](RollingPolicy::advance) call carrying both the evicted and the
//! incoming sample, so incremental policies update in O(1) and never observe a
//! half-slid window.
//!
//! All running accumulators are `f64`: subtracting a departing sample from a
//! 32-bit running sum loses precision fast, widening makes the incremental
//! value track a full recomputation for long streams.
//!
//! # Policies
//!
//! | Policy | Sufficient statistic | Result |
//! |--------|---------------------|--------|
//! | [`Mean`] | running sum | sum / count |
//! | [`Rms`] | running sum of squares | sqrt(sum² / count) |
//! | [`MeanAbsoluteValue`] | running sum of \|x\| | sum\|x\| / count |
//! | [`Variance`] | running sum + sum of squares | E\[x²\] − E\[x\]² |
//! | [`ZScore`] | running sum + sum of squares | (x − mean) / σ |
//! | [`Cma`] | all-time sum + count | cumulative mean |
//! | [`Ema`] | α, previous output | α·x + (1−α)·prev |
//! | [`Sum`] | running sum | sum |
//! | [`Counter`] | live sample count | count |
//! | [`Convolution`] | fixed kernel | kernel ⋆ window tail |
//!
//! [`Cma`] and [`Ema`] are all-history statistics: the window only bounds the
//! exported sample buffer, never their memory, and timestamp expiry does not
//! rebuild them.

use serde::{Deserialize, Serialize};

use crate::buffer::CircularBuffer;
use crate::error::FilterError;
use crate::kernel;

/// Relative tolerance for cross-checking a restored running statistic
/// against a recomputation over the restored samples.
const CONSISTENCY_TOLERANCE: f64 = 1e-4;

/// A sliding-window statistic driven by the [`RollingFilter`](crate::RollingFilter)
/// engine.
///
/// The engine guarantees `advance` is called exactly once per slide, with
/// `evicted` populated iff a sample left the window, and that `value` is
/// only consulted after the slide completes.
pub trait RollingPolicy {
    /// Folds one window slide into the statistic. `evicted` is the sample
    /// that left the window (if any), `incoming` the one that entered.
    fn advance(&mut self, evicted: Option<f32>, incoming: f32);

    /// Forgets all accumulated state.
    fn clear(&mut self);

    /// The current statistic over the live window contents.
    fn value(&self, window: &CircularBuffer) -> f32;

    /// Reconstructs the statistic after timestamp expiry removed samples.
    ///
    /// Window-bounded policies replay the survivors oldest-first;
    /// all-history policies ([`Cma`], [`Ema`]) keep their accumulation.
    fn rebuild(&mut self, window: &CircularBuffer) {
        self.clear();
        for sample in window.iter() {
            self.advance(None, sample);
        }
    }

    /// Whether a restored policy carries the same configuration as the
    /// live one. Stateless configuration means nothing to compare.
    fn config_matches(&self, other: &Self) -> bool {
        let _ = other;
        true
    }

    /// Cross-checks the accumulated statistic against the window contents.
    ///
    /// Used on restore: a deserialized running sum must agree with a fresh
    /// recomputation over the restored samples within a small relative
    /// tolerance. Policies whose statistic cannot be recomputed from the
    /// window alone accept by default.
    fn consistent_with(&self, window: &CircularBuffer) -> bool {
        let _ = window;
        true
    }
}

#[inline]
fn stat_close(stored: f64, recomputed: f64, magnitude: f64) -> bool {
    let scale = magnitude.abs().max(stored.abs()).max(recomputed.abs()).max(1.0);
    (stored - recomputed).abs() <= CONSISTENCY_TOLERANCE * scale
}

fn window_sum(window: &CircularBuffer) -> f64 {
    let (a, b) = window.as_slices();
    kernel::sum(a) + kernel::sum(b)
}

fn window_sum_of_squares(window: &CircularBuffer) -> f64 {
    let (a, b) = window.as_slices();
    kernel::sum_of_squares(a) + kernel::sum_of_squares(b)
}

fn window_sum_of_abs(window: &CircularBuffer) -> f64 {
    window.iter().map(|x| (x as f64).abs()).sum()
}

/// Sliding arithmetic mean.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Mean {
    sum: f64,
}

impl Mean {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RollingPolicy for Mean {
    #[inline]
    fn advance(&mut self, evicted: Option<f32>, incoming: f32) {
        if let Some(old) = evicted {
            self.sum -= old as f64;
        }
        self.sum += incoming as f64;
    }

    fn clear(&mut self) {
        self.sum = 0.0;
    }

    fn value(&self, window: &CircularBuffer) -> f32 {
        if window.is_empty() {
            return 0.0;
        }
        (self.sum / window.len() as f64) as f32
    }

    fn consistent_with(&self, window: &CircularBuffer) -> bool {
        let recomputed = window_sum(window);
        stat_close(self.sum, recomputed, window_sum_of_abs(window))
    }
}

/// Sliding root mean square.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rms {
    sum_squared: f64,
}

impl Rms {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RollingPolicy for Rms {
    #[inline]
    fn advance(&mut self, evicted: Option<f32>, incoming: f32) {
        if let Some(old) = evicted {
            let old = old as f64;
            self.sum_squared -= old * old;
        }
        let x = incoming as f64;
        self.sum_squared += x * x;
    }

    fn clear(&mut self) {
        self.sum_squared = 0.0;
    }

    fn value(&self, window: &CircularBuffer) -> f32 {
        if window.is_empty() {
            return 0.0;
        }
        // Clamp before the sqrt: incremental removal can drift a hair
        // below zero on an all-zero tail
        (self.sum_squared / window.len() as f64).max(0.0).sqrt() as f32
    }

    fn consistent_with(&self, window: &CircularBuffer) -> bool {
        let recomputed = window_sum_of_squares(window);
        stat_close(self.sum_squared, recomputed, recomputed)
    }
}

/// Sliding mean absolute value, the envelope statistic for EMG-style
/// amplitude tracking.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MeanAbsoluteValue {
    sum_abs: f64,
}

impl MeanAbsoluteValue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RollingPolicy for MeanAbsoluteValue {
    #[inline]
    fn advance(&mut self, evicted: Option<f32>, incoming: f32) {
        if let Some(old) = evicted {
            self.sum_abs -= (old as f64).abs();
        }
        self.sum_abs += (incoming as f64).abs();
    }

    fn clear(&mut self) {
        self.sum_abs = 0.0;
    }

    fn value(&self, window: &CircularBuffer) -> f32 {
        if window.is_empty() {
            return 0.0;
        }
        (self.sum_abs.max(0.0) / window.len() as f64) as f32
    }

    fn consistent_with(&self, window: &CircularBuffer) -> bool {
        let recomputed = window_sum_of_abs(window);
        stat_close(self.sum_abs, recomputed, recomputed)
    }
}

/// Sliding population variance: `E[x²] − E[x]²`, clamped at zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Variance {
    sum: f64,
    sum_squared: f64,
}

impl Variance {
    pub fn new() -> Self {
        Self::default()
    }

    fn variance(&self, count: usize) -> f64 {
        if count == 0 {
            return 0.0;
        }
        let n = count as f64;
        let mean = self.sum / n;
        (self.sum_squared / n - mean * mean).max(0.0)
    }
}

impl RollingPolicy for Variance {
    #[inline]
    fn advance(&mut self, evicted: Option<f32>, incoming: f32) {
        if let Some(old) = evicted {
            let old = old as f64;
            self.sum -= old;
            self.sum_squared -= old * old;
        }
        let x = incoming as f64;
        self.sum += x;
        self.sum_squared += x * x;
    }

    fn clear(&mut self) {
        self.sum = 0.0;
        self.sum_squared = 0.0;
    }

    fn value(&self, window: &CircularBuffer) -> f32 {
        self.variance(window.len()) as f32
    }

    fn consistent_with(&self, window: &CircularBuffer) -> bool {
        let sum = window_sum(window);
        let sum_sq = window_sum_of_squares(window);
        stat_close(self.sum, sum, window_sum_of_abs(window))
            && stat_close(self.sum_squared, sum_sq, sum_sq)
    }
}

/// Standard score of the newest sample against the window it belongs to:
/// `(x − mean) / σ`, 0 when the window deviation is below epsilon.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ZScore {
    sum: f64,
    sum_squared: f64,
}

impl ZScore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RollingPolicy for ZScore {
    #[inline]
    fn advance(&mut self, evicted: Option<f32>, incoming: f32) {
        if let Some(old) = evicted {
            let old = old as f64;
            self.sum -= old;
            self.sum_squared -= old * old;
        }
        let x = incoming as f64;
        self.sum += x;
        self.sum_squared += x * x;
    }

    fn clear(&mut self) {
        self.sum = 0.0;
        self.sum_squared = 0.0;
    }

    fn value(&self, window: &CircularBuffer) -> f32 {
        let Some(newest) = window.newest() else {
            return 0.0;
        };
        let n = window.len() as f64;
        let mean = self.sum / n;
        let variance = (self.sum_squared / n - mean * mean).max(0.0);
        let sigma = variance.sqrt();
        if sigma < f32::EPSILON as f64 {
            return 0.0;
        }
        ((newest as f64 - mean) / sigma) as f32
    }

    fn consistent_with(&self, window: &CircularBuffer) -> bool {
        let sum = window_sum(window);
        let sum_sq = window_sum_of_squares(window);
        stat_close(self.sum, sum, window_sum_of_abs(window))
            && stat_close(self.sum_squared, sum_sq, sum_sq)
    }
}

/// Cumulative moving average over the entire stream.
///
/// All-history: eviction and expiry never shrink its memory, the window
/// only bounds the exported sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Cma {
    sum: f64,
    count: u64,
}

impl Cma {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples absorbed since construction or the last clear.
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl RollingPolicy for Cma {
    #[inline]
    fn advance(&mut self, _evicted: Option<f32>, incoming: f32) {
        self.sum += incoming as f64;
        self.count += 1;
    }

    fn clear(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }

    fn value(&self, _window: &CircularBuffer) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        (self.sum / self.count as f64) as f32
    }

    // All-history: survivors of an expiry are already folded in
    fn rebuild(&mut self, _window: &CircularBuffer) {}

    fn consistent_with(&self, window: &CircularBuffer) -> bool {
        // The full stream is gone, but the all-time count can never be
        // smaller than the live window
        self.count >= window.len() as u64
    }
}

/// Exponential moving average: `α·x + (1−α)·prev`, primed by the first
/// sample.
///
/// All-history like [`Cma`]: eviction and expiry do not touch it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ema {
    alpha: f64,
    value: f64,
    primed: bool,
}

impl Ema {
    /// Creates an EMA with smoothing factor `alpha` in `(0, 1]`.
    ///
    /// Larger alpha weights recent samples more heavily; `alpha == 1`
    /// degenerates to passthrough.
    pub fn new(alpha: f64) -> Result<Self, FilterError> {
        if !alpha.is_finite() || alpha <= 0.0 || alpha > 1.0 {
            return Err(FilterError::Configuration(format!(
                "EMA smoothing factor must be in (0, 1], got {alpha}"
            )));
        }
        Ok(Self {
            alpha,
            value: 0.0,
            primed: false,
        })
    }

    /// The configured smoothing factor.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl RollingPolicy for Ema {
    #[inline]
    fn advance(&mut self, _evicted: Option<f32>, incoming: f32) {
        let x = incoming as f64;
        if self.primed {
            self.value = self.alpha * x + (1.0 - self.alpha) * self.value;
        } else {
            self.value = x;
            self.primed = true;
        }
    }

    fn clear(&mut self) {
        self.value = 0.0;
        self.primed = false;
    }

    fn value(&self, _window: &CircularBuffer) -> f32 {
        if self.primed {
            self.value as f32
        } else {
            0.0
        }
    }

    fn rebuild(&mut self, _window: &CircularBuffer) {}

    fn config_matches(&self, other: &Self) -> bool {
        self.alpha == other.alpha
    }

    fn consistent_with(&self, window: &CircularBuffer) -> bool {
        // A non-empty window implies at least one advance happened
        self.primed || window.is_empty()
    }
}

/// Sliding sum.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sum {
    sum: f64,
}

impl Sum {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RollingPolicy for Sum {
    #[inline]
    fn advance(&mut self, evicted: Option<f32>, incoming: f32) {
        if let Some(old) = evicted {
            self.sum -= old as f64;
        }
        self.sum += incoming as f64;
    }

    fn clear(&mut self) {
        self.sum = 0.0;
    }

    fn value(&self, _window: &CircularBuffer) -> f32 {
        self.sum as f32
    }

    fn consistent_with(&self, window: &CircularBuffer) -> bool {
        let recomputed = window_sum(window);
        stat_close(self.sum, recomputed, window_sum_of_abs(window))
    }
}

/// Live sample count, mostly useful with a time-aware window ("events in
/// the last T seconds").
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Counter {
    count: u64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RollingPolicy for Counter {
    #[inline]
    fn advance(&mut self, evicted: Option<f32>, _incoming: f32) {
        if evicted.is_some() {
            self.count = self.count.saturating_sub(1);
        }
        self.count += 1;
    }

    fn clear(&mut self) {
        self.count = 0;
    }

    fn value(&self, _window: &CircularBuffer) -> f32 {
        self.count as f32
    }

    fn consistent_with(&self, window: &CircularBuffer) -> bool {
        self.count == window.len() as u64
    }
}

/// Per-sample causal convolution of the window against a fixed kernel.
///
/// `kernel[0]` multiplies the newest sample, `kernel[j]` the sample `j`
/// slides back; before the window has seen `kernel.len()` samples the
/// missing history reads as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Convolution {
    kernel: Vec<f32>,
}

impl Convolution {
    /// Creates the policy; an empty kernel is a configuration error.
    pub fn new(kernel: Vec<f32>) -> Result<Self, FilterError> {
        if kernel.is_empty() {
            return Err(FilterError::Configuration(
                "convolution kernel must not be empty".into(),
            ));
        }
        Ok(Self { kernel })
    }

    /// The configured kernel.
    pub fn kernel(&self) -> &[f32] {
        &self.kernel
    }
}

impl RollingPolicy for Convolution {
    fn advance(&mut self, _evicted: Option<f32>, _incoming: f32) {}

    fn clear(&mut self) {}

    fn value(&self, window: &CircularBuffer) -> f32 {
        // Walk the window newest-first, zipped against the kernel; zip
        // stops at the shorter of the two, which is exactly the
        // zero-padded causal sum
        let (a, b) = window.as_slices();
        let newest_first = b.iter().rev().chain(a.iter().rev());
        let mut acc = 0.0f64;
        for (&k, &x) in self.kernel.iter().zip(newest_first) {
            acc += k as f64 * x as f64;
        }
        acc as f32
    }

    fn config_matches(&self, other: &Self) -> bool {
        self.kernel == other.kernel
    }
}
