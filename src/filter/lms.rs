//! LMS (Least Mean Squares) adaptive filter for interference cancellation.
//!
//! The LMS algorithm adjusts filter weights on every sample to minimize the
//! error between a desired signal and the filter output, which makes it the
//! workhorse for reference-based noise removal: feed the interference source
//! as input, the contaminated signal as desired, and the error output is the
//! cleaned signal.
//!
//! One engine covers three update rules, chosen at construction:
//!
//! # Algorithm
//!
//! ```text
//! y(n) = w^T(n-1) * u(n)                     // filter output
//! e(n) = d(n) - y(n)                         // error signal
//!
//! standard:    w(n) = w(n-1)            + mu * e(n) * u(n)
//! leaky:       w(n) = (1 - mu*lambda) * w(n-1) + mu * e(n) * u(n)
//! normalized:  w(n) = w(n-1) + [mu / (eps + p(n)*taps)] * e(n) * u(n)
//! ```
//!
//! where `p(n)` is an exponential moving average of the instantaneous input
//! power, so the normalized step auto-scales to the signal level. Leakage
//! `lambda` bleeds weight magnitude off each step, which keeps weights from
//! drifting without bound when the input is poorly excited.
//!
//! Every channel of a multi-channel filter carries its own weights, history
//! and power estimate; channels never mix.
//!
//! # Step Size Selection
//!
//! - **Standard/leaky**: stability depends on input power; 0.001 - 0.1 is
//!   typical for unit-variance signals.
//! - **Normalized**: the power division makes mu dimensionless; 0.1 - 1.0
//!   works across amplitude ranges where plain LMS diverges.
//!
//! # Example
//!
//! ```
//! use millrace::LmsFilter;
//!
//! // Identify an unknown system from input/desired pairs
//! let mut lms = LmsFilter::new(1, 3, 0.05).unwrap();
//!
//! for i in 0..2000 {
//!     let x = (i % 17) as f32 / 17.0 - 0.5;
//!     let d = 0.5 * x; // the unknown system: a simple gain
//!     let result = lms.adapt_sample(0, x, d).unwrap();
//!     assert!(result.error.is_finite());
//! }
//!
//! // The first weight has converged toward the gain
//! assert!((lms.weights(0)[0] - 0.5).abs() < 0.1);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::FilterError;
use crate::kernel;

/// EMA smoothing for the per-channel input power estimate.
const POWER_SMOOTHING: f64 = 0.99;

/// Regularizer in the normalized step denominator, guards the all-zero
/// input case.
const NORMALIZATION_EPSILON: f64 = 1e-6;

/// Output from one adaptive filter step.
///
/// Contains both the filtered output and the error signal. In cancellation
/// setups the error is the cleaned signal and the output is the estimated
/// interference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveOutput {
    /// Filter output `y(n) = w^T * u(n)`.
    pub output: f32,
    /// Error signal `e(n) = d(n) - y(n)`.
    pub error: f32,
}

/// Per-channel adaptive state.
#[derive(Debug, Clone, PartialEq)]
struct ChannelState {
    weights: Vec<f32>,
    /// Input ring, newest-first from `pos`: `history[pos]` is the latest
    /// sample, wrapping at the end
    history: Vec<f32>,
    pos: usize,
    /// EMA of instantaneous input power
    power: f64,
}

impl ChannelState {
    fn new(taps: usize) -> Self {
        Self {
            weights: vec![0.0; taps],
            history: vec![0.0; taps],
            pos: 0,
            power: 0.0,
        }
    }
}

/// Multi-channel LMS adaptive filter.
///
/// Weights update in O(taps) per sample per channel. Each step gathers the
/// input ring into a newest-first scratch line, so the SIMD inner product
/// accumulates in canonical tap order whatever the ring's rotation; a
/// restored filter therefore rounds exactly like the live one.
///
/// # Example
///
/// ```
/// use millrace::LmsFilter;
///
/// // 2 channels, 32 taps, normalized step 0.5
/// let mut lms = LmsFilter::new(2, 32, 0.5).unwrap().with_normalization();
///
/// // One interleaved frame: [ch0, ch1]
/// let input = [0.5, -0.5];
/// let desired = [1.0, -1.0];
/// let mut output = [0.0; 2];
/// lms.adapt(&input, &desired, &mut output).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct LmsFilter {
    channels: usize,
    taps: usize,
    mu: f32,
    leakage: f32,
    normalized: bool,
    state: Vec<ChannelState>,
    /// Newest-first gather of the active channel's ring, refilled per step
    scratch: Vec<f32>,
}

/// Serializable snapshot of an [`LmsFilter`].
///
/// Field order is the emission order: mode flag, configuration, then the
/// per-channel weights, history (oldest to newest) and power estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LmsState {
    /// Whether the normalized update rule is active.
    pub normalized: bool,
    /// Channel count.
    pub channels: usize,
    /// Taps per channel.
    pub taps: usize,
    /// Step size.
    pub mu: f32,
    /// Leakage factor.
    pub leakage: f32,
    /// Per-channel weight vectors.
    pub weights: Vec<Vec<f32>>,
    /// Per-channel input history, oldest to newest.
    pub history: Vec<Vec<f32>>,
    /// Per-channel input power estimates.
    pub power: Vec<f64>,
}

impl LmsFilter {
    /// Creates a standard LMS filter with zero-initialized weights.
    ///
    /// `channels` and `taps` must both be at least 1 and the step size must
    /// lie in `(0, 1]`.
    pub fn new(channels: usize, taps: usize, mu: f32) -> Result<Self, FilterError> {
        if channels == 0 {
            return Err(FilterError::Configuration(
                "adaptive filter needs at least one channel".into(),
            ));
        }
        if taps == 0 {
            return Err(FilterError::Configuration(
                "adaptive filter needs at least one tap".into(),
            ));
        }
        if !mu.is_finite() || mu <= 0.0 || mu > 1.0 {
            return Err(FilterError::Configuration(format!(
                "step size must lie in (0, 1], got {mu}"
            )));
        }
        Ok(Self {
            channels,
            taps,
            mu,
            leakage: 0.0,
            normalized: false,
            state: (0..channels).map(|_| ChannelState::new(taps)).collect(),
            scratch: vec![0.0; taps],
        })
    }

    /// Switches to the leaky update rule with leakage factor in `[0, 1)`.
    pub fn with_leakage(mut self, leakage: f32) -> Result<Self, FilterError> {
        if !leakage.is_finite() || !(0.0..1.0).contains(&leakage) {
            return Err(FilterError::Configuration(format!(
                "leakage factor must lie in [0, 1), got {leakage}"
            )));
        }
        self.leakage = leakage;
        Ok(self)
    }

    /// Switches to the normalized (NLMS) update rule: the step size is
    /// divided by a running estimate of the input power, making adaptation
    /// stable across input amplitude changes.
    pub fn with_normalization(mut self) -> Self {
        self.normalized = true;
        self
    }

    /// One adaptive step on a single channel: feed `input`, compare the
    /// filter output against `desired`, update that channel's weights.
    ///
    /// An out-of-range channel is a contract violation.
    pub fn adapt_sample(
        &mut self,
        channel: usize,
        input: f32,
        desired: f32,
    ) -> Result<AdaptiveOutput, FilterError> {
        if channel >= self.channels {
            return Err(FilterError::Contract(format!(
                "channel {channel} out of range for {} channels",
                self.channels
            )));
        }
        Ok(self.step(channel, input, desired, true))
    }

    /// Adapts over a block of interleaved frames.
    ///
    /// `input`, `desired` and `output` must have equal length and hold a
    /// whole number of frames (length divisible by the channel count);
    /// anything else is a contract violation and no samples are consumed.
    /// `output[i]` receives the filter output; the error signal is
    /// `desired[i] - output[i]`.
    pub fn adapt(
        &mut self,
        input: &[f32],
        desired: &[f32],
        output: &mut [f32],
    ) -> Result<(), FilterError> {
        self.check_block(input.len(), Some(desired.len()), output.len())?;
        for (i, out) in output.iter_mut().enumerate() {
            let channel = i % self.channels;
            *out = self.step(channel, input[i], desired[i], true).output;
        }
        Ok(())
    }

    /// Forward pass over a block of interleaved frames: feeds the history
    /// and computes outputs with the current weights, never adapts.
    pub fn filter(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), FilterError> {
        self.check_block(input.len(), None, output.len())?;
        for (i, out) in output.iter_mut().enumerate() {
            let channel = i % self.channels;
            *out = self.step(channel, input[i], 0.0, false).output;
        }
        Ok(())
    }

    fn check_block(
        &self,
        input: usize,
        desired: Option<usize>,
        output: usize,
    ) -> Result<(), FilterError> {
        if let Some(desired) = desired {
            if desired != input {
                return Err(FilterError::Contract(format!(
                    "desired length {desired} does not match input length {input}"
                )));
            }
        }
        if output != input {
            return Err(FilterError::Contract(format!(
                "output length {output} does not match input length {input}"
            )));
        }
        if input % self.channels != 0 {
            return Err(FilterError::Contract(format!(
                "input length {input} is not a whole number of {}-channel frames",
                self.channels
            )));
        }
        Ok(())
    }

    fn step(&mut self, channel: usize, input: f32, desired: f32, adapt: bool) -> AdaptiveOutput {
        let taps = self.taps;
        let ch = &mut self.state[channel];

        // Decrement-then-write keeps the ring newest-first from pos
        ch.pos = if ch.pos == 0 { taps - 1 } else { ch.pos - 1 };
        ch.history[ch.pos] = input;
        let x = input as f64;
        ch.power = POWER_SMOOTHING * ch.power + (1.0 - POWER_SMOOTHING) * x * x;

        // Gather the ring into newest-first order before the dot. The
        // accumulation order then depends only on the tap count, never on
        // the physical rotation, so a restored filter reproduces the live
        // filter's rounding bit for bit.
        let run = taps - ch.pos;
        self.scratch[..run].copy_from_slice(&ch.history[ch.pos..]);
        self.scratch[run..].copy_from_slice(&ch.history[..ch.pos]);
        let output = kernel::dot(&ch.weights, &self.scratch) as f32;
        let error = desired - output;

        if adapt {
            let step = if self.normalized {
                (self.mu as f64 / (NORMALIZATION_EPSILON + ch.power * taps as f64)) as f32
            } else {
                self.mu
            };
            let gain = step * error;
            if self.leakage == 0.0 {
                kernel::scaled_add(&mut ch.weights, &self.scratch, gain);
            } else {
                let decay = 1.0 - self.mu * self.leakage;
                for (w, &u) in ch.weights.iter_mut().zip(&self.scratch) {
                    *w = decay * *w + gain * u;
                }
            }
        }

        AdaptiveOutput { output, error }
    }

    /// Clears input history and power estimates, preserving the learned
    /// weights. Use when a new signal segment is independent of the
    /// previous one.
    pub fn reset(&mut self) {
        for ch in &mut self.state {
            ch.history.fill(0.0);
            ch.pos = 0;
            ch.power = 0.0;
        }
    }

    /// Zeroes the adaptive weights, preserving history. Use when
    /// restarting adaptation from scratch.
    pub fn reset_weights(&mut self) {
        for ch in &mut self.state {
            ch.weights.fill(0.0);
        }
    }

    /// The weight vector of one channel, `weights(ch)[0]` applied to the
    /// newest sample.
    ///
    /// # Panics
    ///
    /// Panics if `channel` is out of range.
    pub fn weights(&self, channel: usize) -> &[f32] {
        &self.state[channel].weights
    }

    /// Replaces one channel's weights; the length must equal the tap
    /// count.
    pub fn set_weights(&mut self, channel: usize, weights: &[f32]) -> Result<(), FilterError> {
        if channel >= self.channels {
            return Err(FilterError::Contract(format!(
                "channel {channel} out of range for {} channels",
                self.channels
            )));
        }
        if weights.len() != self.taps {
            return Err(FilterError::Contract(format!(
                "weight count {} does not match {} taps",
                weights.len(),
                self.taps
            )));
        }
        self.state[channel].weights.copy_from_slice(weights);
        Ok(())
    }

    /// The configured step size.
    pub fn mu(&self) -> f32 {
        self.mu
    }

    /// The configured leakage factor (0 for the standard rule).
    pub fn leakage(&self) -> f32 {
        self.leakage
    }

    /// Whether the normalized update rule is active.
    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    /// Channel count.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Taps per channel.
    pub fn num_taps(&self) -> usize {
        self.taps
    }

    /// Exports configuration, weights, history and power estimates.
    pub fn state(&self) -> LmsState {
        let mut weights = Vec::with_capacity(self.channels);
        let mut history = Vec::with_capacity(self.channels);
        let mut power = Vec::with_capacity(self.channels);
        for ch in &self.state {
            weights.push(ch.weights.clone());
            // Canonical export is oldest to newest
            let mut h: Vec<f32> = ch.history[ch.pos..]
                .iter()
                .chain(&ch.history[..ch.pos])
                .copied()
                .collect();
            h.reverse();
            history.push(h);
            power.push(ch.power);
        }
        LmsState {
            normalized: self.normalized,
            channels: self.channels,
            taps: self.taps,
            mu: self.mu,
            leakage: self.leakage,
            weights,
            history,
            power,
        }
    }

    /// Restores a previously exported state.
    ///
    /// Every configuration field (channel count, taps, update rule, step
    /// size, leakage) must match the live filter, and the per-channel
    /// vectors must have the declared dimensions; any disagreement is a
    /// [`FilterError::StateMismatch`].
    pub fn set_state(&mut self, state: LmsState) -> Result<(), FilterError> {
        if state.channels != self.channels || state.taps != self.taps {
            return Err(FilterError::StateMismatch(format!(
                "restored dimensions {}x{} do not match configured {}x{}",
                state.channels, state.taps, self.channels, self.taps
            )));
        }
        if state.normalized != self.normalized {
            return Err(FilterError::StateMismatch(
                "restored update rule does not match the live filter".into(),
            ));
        }
        if state.mu != self.mu || state.leakage != self.leakage {
            return Err(FilterError::StateMismatch(
                "restored step configuration does not match the live filter".into(),
            ));
        }
        if state.weights.len() != self.channels
            || state.history.len() != self.channels
            || state.power.len() != self.channels
        {
            return Err(FilterError::StateMismatch(
                "per-channel state does not cover every channel".into(),
            ));
        }
        for c in 0..self.channels {
            if state.weights[c].len() != self.taps || state.history[c].len() != self.taps {
                return Err(FilterError::StateMismatch(format!(
                    "channel {c} state does not match {} taps",
                    self.taps
                )));
            }
        }
        for (ch, c) in self.state.iter_mut().zip(0..self.channels) {
            ch.weights.copy_from_slice(&state.weights[c]);
            // Newest-first layout with pos pinned at the start
            for (i, &s) in state.history[c].iter().rev().enumerate() {
                ch.history[i] = s;
            }
            ch.pos = 0;
            ch.power = state.power[c];
        }
        Ok(())
    }
}
