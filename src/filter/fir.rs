//! Direct-form FIR filter with an engine chosen by tap count.

use serde::{Deserialize, Serialize};

use crate::error::FilterError;
use crate::filter::design;
use crate::kernel;
use crate::window::WindowType;

/// Tap-count band where the shifted delay line beats the ring.
///
/// Below 8 taps the per-sample shift is not amortized by the contiguous
/// dot; above 128 the O(1) ring update wins over the O(taps) shift.
const SHIFTED_MIN_TAPS: usize = 8;
const SHIFTED_MAX_TAPS: usize = 128;

/// Shift with a plain indexed loop up to this many taps, `copy_within`
/// beyond.
const SHIFT_UNROLL_MAX: usize = 16;

/// FIR (Finite Impulse Response) filter over a single channel.
///
/// Implements `y[n] = sum(b[k] * x[n-k])` for k = 0 to taps-1. FIR
/// filters have linear phase response (for symmetric kernels) and
/// guaranteed stability.
///
/// Two interchangeable engines with identical semantics, picked by tap
/// count at construction:
///
/// - **ring**: circular history sized to the next power of two, masked
///   indexing, O(1) insertion; the dot steps backward through the ring.
/// - **shifted**: linear delay line in chronological order, shifted one
///   element per sample, so the dot is a single contiguous SIMD kernel
///   call against the pre-reversed coefficients. Used for 8 to 128 taps.
///
/// # Example
///
/// ```
/// use millrace::FirFilter;
///
/// // 5-tap moving average filter
/// let mut filter = FirFilter::moving_average(5).unwrap();
///
/// let output = filter.process_sample(1.0);
/// assert!((output - 0.2).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct FirFilter {
    coeffs: Vec<f32>,
    /// Coefficients reversed once at construction, the contiguous-dot
    /// operand for the shifted engine and the stateless path
    coeffs_rev: Vec<f32>,
    engine: FirEngine,
}

#[derive(Debug, Clone)]
enum FirEngine {
    Ring {
        /// Power-of-two history, `mask = len - 1`
        history: Vec<f32>,
        mask: usize,
        /// Next write slot
        pos: usize,
    },
    Shifted {
        /// Last `taps` inputs in chronological order, newest last
        line: Vec<f32>,
    },
}

impl FirEngine {
    fn for_taps(taps: usize) -> Self {
        if (SHIFTED_MIN_TAPS..=SHIFTED_MAX_TAPS).contains(&taps) {
            FirEngine::Shifted {
                line: vec![0.0; taps],
            }
        } else {
            let cap = taps.next_power_of_two();
            FirEngine::Ring {
                history: vec![0.0; cap],
                mask: cap - 1,
                pos: 0,
            }
        }
    }
}

/// Serializable snapshot of a [`FirFilter`].
///
/// The history is exported oldest to newest regardless of the active
/// engine, so a state survives restore into either layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirState {
    /// Tap coefficients, `b[0]` applied to the newest sample.
    pub coefficients: Vec<f32>,
    /// The last `taps` inputs, oldest to newest.
    pub history: Vec<f32>,
}

impl FirFilter {
    /// Creates a FIR filter from tap coefficients. Empty coefficients are
    /// a configuration error.
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::FirFilter;
    ///
    /// // 3-tap moving average
    /// let filter = FirFilter::new(vec![1.0 / 3.0; 3]).unwrap();
    /// assert_eq!(filter.num_taps(), 3);
    /// ```
    pub fn new(coeffs: Vec<f32>) -> Result<Self, FilterError> {
        if coeffs.is_empty() {
            return Err(FilterError::Configuration(
                "FIR filter needs at least one coefficient".into(),
            ));
        }
        let coeffs_rev: Vec<f32> = coeffs.iter().rev().copied().collect();
        let engine = FirEngine::for_taps(coeffs.len());
        Ok(Self {
            coeffs,
            coeffs_rev,
            engine,
        })
    }

    /// Creates a moving average filter with equal weights.
    pub fn moving_average(taps: usize) -> Result<Self, FilterError> {
        if taps == 0 {
            return Err(FilterError::Configuration(
                "moving average needs at least one tap".into(),
            ));
        }
        Self::new(vec![1.0 / taps as f32; taps])
    }

    /// Creates a windowed-sinc low-pass filter. See [`design::low_pass`].
    pub fn low_pass(
        cutoff: f64,
        taps: usize,
        window: WindowType,
    ) -> Result<Self, FilterError> {
        Self::new(design::low_pass(cutoff, taps, window)?)
    }

    /// Creates a windowed-sinc high-pass filter. See [`design::high_pass`].
    pub fn high_pass(
        cutoff: f64,
        taps: usize,
        window: WindowType,
    ) -> Result<Self, FilterError> {
        Self::new(design::high_pass(cutoff, taps, window)?)
    }

    /// Creates a windowed-sinc band-pass filter. See [`design::band_pass`].
    pub fn band_pass(
        low: f64,
        high: f64,
        taps: usize,
        window: WindowType,
    ) -> Result<Self, FilterError> {
        Self::new(design::band_pass(low, high, taps, window)?)
    }

    /// Creates a windowed-sinc band-stop filter. See [`design::band_stop`].
    pub fn band_stop(
        low: f64,
        high: f64,
        taps: usize,
        window: WindowType,
    ) -> Result<Self, FilterError> {
        Self::new(design::band_stop(low, high, taps, window)?)
    }

    /// Processes a single sample through the filter.
    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        match &mut self.engine {
            FirEngine::Ring {
                history,
                mask,
                pos,
            } => {
                history[*pos] = input;
                let newest = *pos;
                *pos = (*pos + 1) & *mask;

                // Four independent accumulators, summed at the end
                let taps = self.coeffs.len();
                let mut acc = [0.0f64; 4];
                let mut tap = 0;
                while tap + 4 <= taps {
                    for lane in 0..4 {
                        let idx = newest.wrapping_sub(tap + lane) & *mask;
                        acc[lane] +=
                            self.coeffs[tap + lane] as f64 * history[idx] as f64;
                    }
                    tap += 4;
                }
                while tap < taps {
                    let idx = newest.wrapping_sub(tap) & *mask;
                    acc[0] += self.coeffs[tap] as f64 * history[idx] as f64;
                    tap += 1;
                }
                ((acc[0] + acc[1]) + (acc[2] + acc[3])) as f32
            }
            FirEngine::Shifted { line } => {
                shift_in(line, input);
                kernel::dot(&self.coeffs_rev, line) as f32
            }
        }
    }

    /// Processes a block of samples in place.
    pub fn process_block(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    /// Causal convolution of a whole block with no cross-call memory:
    /// every call behaves as if the filter history were all zeros.
    ///
    /// The first `taps - 1` outputs are scalar partial sums; from there
    /// each output is one contiguous SIMD dot against the input window.
    /// Input and output must have equal length.
    pub fn process_stateless(
        &self,
        input: &[f32],
        output: &mut [f32],
    ) -> Result<(), FilterError> {
        if input.len() != output.len() {
            return Err(FilterError::Contract(format!(
                "input length {} does not match output length {}",
                input.len(),
                output.len()
            )));
        }
        let taps = self.coeffs.len();
        for (i, out) in output.iter_mut().enumerate() {
            if i + 1 >= taps {
                *out = kernel::dot(&self.coeffs_rev, &input[i + 1 - taps..=i]) as f32;
            } else {
                let mut acc = 0.0f64;
                for (k, &c) in self.coeffs.iter().take(i + 1).enumerate() {
                    acc += c as f64 * input[i - k] as f64;
                }
                *out = acc as f32;
            }
        }
        Ok(())
    }

    /// Resets the filter state (clears the delay line).
    pub fn reset(&mut self) {
        match &mut self.engine {
            FirEngine::Ring { history, pos, .. } => {
                history.fill(0.0);
                *pos = 0;
            }
            FirEngine::Shifted { line } => line.fill(0.0),
        }
    }

    /// The filter coefficients.
    pub fn coefficients(&self) -> &[f32] {
        &self.coeffs
    }

    /// Number of taps.
    pub fn num_taps(&self) -> usize {
        self.coeffs.len()
    }

    /// Replaces the coefficients, clearing the delay line and re-deriving
    /// the engine for the new tap count.
    pub fn set_coefficients(&mut self, coeffs: Vec<f32>) -> Result<(), FilterError> {
        *self = Self::new(coeffs)?;
        Ok(())
    }

    /// Exports coefficients and canonical history for serialization.
    pub fn state(&self) -> FirState {
        let taps = self.coeffs.len();
        let history = match &self.engine {
            FirEngine::Ring { history, mask, pos } => (0..taps)
                .map(|j| history[pos.wrapping_sub(taps - j) & mask])
                .collect(),
            FirEngine::Shifted { line } => line.clone(),
        };
        FirState {
            coefficients: self.coeffs.clone(),
            history,
        }
    }

    /// Restores a previously exported state.
    ///
    /// The tap count must match this filter (`StateMismatch` otherwise);
    /// the restored coefficients and history then replace the live ones,
    /// and continued processing is bit-identical to the exporting filter.
    pub fn set_state(&mut self, state: FirState) -> Result<(), FilterError> {
        if state.coefficients.len() != self.coeffs.len() {
            return Err(FilterError::StateMismatch(format!(
                "restored tap count {} does not match configured {}",
                state.coefficients.len(),
                self.coeffs.len()
            )));
        }
        if state.history.len() != state.coefficients.len() {
            return Err(FilterError::StateMismatch(format!(
                "history length {} does not match tap count {}",
                state.history.len(),
                state.coefficients.len()
            )));
        }
        self.coeffs_rev = state.coefficients.iter().rev().copied().collect();
        self.coeffs = state.coefficients;
        match &mut self.engine {
            FirEngine::Ring { history, mask, pos } => {
                history.fill(0.0);
                history[..state.history.len()].copy_from_slice(&state.history);
                *pos = state.history.len() & *mask;
            }
            FirEngine::Shifted { line } => line.copy_from_slice(&state.history),
        }
        Ok(())
    }
}

#[inline]
fn shift_in(line: &mut [f32], x: f32) {
    let n = line.len();
    if n <= SHIFT_UNROLL_MAX {
        for i in 0..n - 1 {
            line[i] = line[i + 1];
        }
    } else {
        line.copy_within(1.., 0);
    }
    line[n - 1] = x;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct f64 reference convolution with zero initial state.
    fn scalar_fir(coeffs: &[f32], input: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(input.len());
        for i in 0..input.len() {
            let mut acc = 0.0f64;
            for (k, &c) in coeffs.iter().enumerate() {
                if i >= k {
                    acc += c as f64 * input[i - k] as f64;
                }
            }
            out.push(acc as f32);
        }
        out
    }

    fn test_signal(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i % 17) as f32 / 17.0 - 0.5).collect()
    }

    #[test]
    fn test_fir_moving_average() {
        let mut filter = FirFilter::moving_average(5).unwrap();

        // Feed 5 ones
        for _ in 0..5 {
            filter.process_sample(1.0);
        }

        // After 5 samples of 1.0, moving average should output 1.0
        let output = filter.process_sample(1.0);
        assert!(
            (output - 1.0).abs() < 0.001,
            "Moving average of ones should be 1.0"
        );
    }

    #[test]
    fn test_fir_impulse_response_ring() {
        // 5 taps selects the ring engine
        let coeffs = vec![1.0, 2.0, 3.0, 2.0, 1.0];
        let mut filter = FirFilter::new(coeffs.clone()).unwrap();

        // An impulse plays the coefficients back in order
        for (i, &c) in coeffs.iter().enumerate() {
            let x = if i == 0 { 1.0 } else { 0.0 };
            assert_eq!(filter.process_sample(x), c, "tap {i}");
        }
        assert_eq!(filter.process_sample(0.0), 0.0);
    }

    #[test]
    fn test_fir_impulse_response_shifted() {
        // 9 taps selects the shifted engine
        let coeffs: Vec<f32> = (1..=9).map(|i| i as f32).collect();
        let mut filter = FirFilter::new(coeffs.clone()).unwrap();

        for (i, &c) in coeffs.iter().enumerate() {
            let x = if i == 0 { 1.0 } else { 0.0 };
            let out = filter.process_sample(x);
            assert!((out - c).abs() < 1e-6, "tap {i}: {out} vs {c}");
        }
    }

    #[test]
    fn test_fir_dc_gain() {
        let coeffs = vec![0.2; 5];
        let mut filter = FirFilter::new(coeffs).unwrap();

        for _ in 0..10 {
            filter.process_sample(1.0);
        }

        // DC gain should be the sum of coefficients = 1.0
        let output = filter.process_sample(1.0);
        assert!((output - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_all_engines_match_reference() {
        let input = test_signal(300);
        // Tap counts spanning ring, shifted, and ring-again selection
        for taps in [1, 4, 7, 8, 16, 64, 128, 129, 200] {
            let coeffs: Vec<f32> =
                (0..taps).map(|k| ((k * 13 % 7) as f32 - 3.0) * 0.1).collect();
            let mut filter = FirFilter::new(coeffs.clone()).unwrap();
            let expected = scalar_fir(&coeffs, &input);

            for (i, &x) in input.iter().enumerate() {
                let out = filter.process_sample(x);
                assert!(
                    (out - expected[i]).abs() < 1e-4,
                    "taps {taps} sample {i}: {out} vs {}",
                    expected[i]
                );
            }
        }
    }

    #[test]
    fn test_stateless_matches_stateful() {
        let input = test_signal(200);
        for taps in [3, 16, 100] {
            let coeffs: Vec<f32> = (0..taps).map(|k| 1.0 / (k + 1) as f32).collect();
            let filter = FirFilter::new(coeffs.clone()).unwrap();

            let mut stateless = vec![0.0f32; input.len()];
            filter.process_stateless(&input, &mut stateless).unwrap();

            let mut stateful_filter = FirFilter::new(coeffs).unwrap();
            let mut stateful = input.clone();
            stateful_filter.process_block(&mut stateful);

            for i in 0..input.len() {
                assert!(
                    (stateless[i] - stateful[i]).abs() < 1e-5,
                    "taps {taps} sample {i}"
                );
            }
        }
    }

    #[test]
    fn test_stateless_has_no_memory() {
        let filter = FirFilter::moving_average(4).unwrap();
        let input = [4.0, 4.0, 4.0, 4.0];
        let mut first = [0.0; 4];
        let mut second = [0.0; 4];
        filter.process_stateless(&input, &mut first).unwrap();
        filter.process_stateless(&input, &mut second).unwrap();
        assert_eq!(first, second);
        // Head outputs see zero history
        assert!((first[0] - 1.0).abs() < 1e-6);
        assert!((first[3] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_stateless_length_mismatch() {
        let filter = FirFilter::moving_average(4).unwrap();
        let input = [1.0; 8];
        let mut output = [0.0; 7];
        assert!(matches!(
            filter.process_stateless(&input, &mut output),
            Err(FilterError::Contract(_))
        ));
    }

    #[test]
    fn test_fir_reset() {
        let mut filter = FirFilter::moving_average(3).unwrap();

        for i in 0..5 {
            filter.process_sample(i as f32);
        }
        filter.reset();

        // Should produce the same output as a fresh filter
        let mut fresh = FirFilter::moving_average(3).unwrap();
        assert_eq!(filter.process_sample(10.0), fresh.process_sample(10.0));
    }

    #[test]
    fn test_fir_process_block() {
        let mut filter = FirFilter::new(vec![1.0, 0.0, 0.0]).unwrap();

        let mut samples = [1.0, 2.0, 3.0, 4.0, 5.0];
        filter.process_block(&mut samples);

        // With coeffs [1,0,0] the filter is an identity
        assert_eq!(samples, [1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_fir_coefficients_access() {
        let mut filter = FirFilter::new(vec![0.5, 0.3, 0.2]).unwrap();
        assert_eq!(filter.coefficients(), &[0.5, 0.3, 0.2]);
        assert_eq!(filter.num_taps(), 3);

        // Updating coefficients may change the engine
        filter.set_coefficients(vec![0.1; 16]).unwrap();
        assert_eq!(filter.num_taps(), 16);
        assert!(filter.set_coefficients(vec![]).is_err());
    }

    #[test]
    fn test_fir_single_tap() {
        // A single tap is just a gain
        let mut filter = FirFilter::new(vec![2.0]).unwrap();
        assert_eq!(filter.process_sample(1.0), 2.0);
        assert_eq!(filter.process_sample(3.0), 6.0);
    }

    #[test]
    fn test_empty_coefficients_rejected() {
        assert!(matches!(
            FirFilter::new(vec![]),
            Err(FilterError::Configuration(_))
        ));
        assert!(FirFilter::moving_average(0).is_err());
    }

    #[test]
    fn test_low_pass_constructor_attenuates_high_frequency() {
        let mut filter = FirFilter::low_pass(0.1, 51, WindowType::Hamming).unwrap();

        // Pure Nyquist tone: alternating +-1
        let mut peak = 0.0f32;
        for i in 0..300 {
            let x = if i % 2 == 0 { 1.0 } else { -1.0 };
            let out = filter.process_sample(x);
            if i > 100 {
                peak = peak.max(out.abs());
            }
        }
        assert!(peak < 0.01, "Nyquist leak was {peak}");

        // DC passes at unit gain
        filter.reset();
        let mut out = 0.0;
        for _ in 0..100 {
            out = filter.process_sample(1.0);
        }
        assert!((out - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_high_pass_constructor_blocks_dc() {
        let mut filter = FirFilter::high_pass(0.25, 31, WindowType::Hamming).unwrap();
        let mut out = 1.0;
        for _ in 0..100 {
            out = filter.process_sample(1.0);
        }
        assert!(out.abs() < 1e-3, "DC leak was {out}");
    }

    #[test]
    fn test_state_round_trip_bit_identical() {
        let input = test_signal(120);
        for taps in [5, 16, 200] {
            let coeffs: Vec<f32> = (0..taps).map(|k| (k as f32 * 0.7).sin()).collect();
            let mut live = FirFilter::new(coeffs.clone()).unwrap();
            for &x in &input[..70] {
                live.process_sample(x);
            }

            let mut restored = FirFilter::new(coeffs).unwrap();
            restored.set_state(live.state()).unwrap();

            for &x in &input[70..] {
                assert_eq!(
                    live.process_sample(x),
                    restored.process_sample(x),
                    "taps {taps}"
                );
            }
        }
    }

    #[test]
    fn test_state_tap_mismatch_rejected() {
        let donor = FirFilter::moving_average(8).unwrap();
        let mut target = FirFilter::moving_average(4).unwrap();
        assert!(matches!(
            target.set_state(donor.state()),
            Err(FilterError::StateMismatch(_))
        ));
    }

    #[test]
    fn test_state_history_oldest_to_newest() {
        let mut filter = FirFilter::moving_average(4).unwrap();
        for x in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0] {
            filter.process_sample(x);
        }
        assert_eq!(filter.state().history, vec![3.0, 4.0, 5.0, 6.0]);
    }
}
