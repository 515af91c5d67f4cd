//! Real-valued FFT plumbing on top of `realfft`.
//!
//! Wraps a fixed-size forward/inverse plan pair with owned scratch so the
//! frequency-domain convolution paths never allocate per call. For a real
//! input of length `N` the spectrum holds `N/2 + 1` complex bins. The
//! forward transform is unnormalized; the inverse applies the `1/N`
//! factor, so a forward/inverse round trip reproduces the input.

use std::fmt;
use std::sync::Arc;

use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::error::FilterError;
use crate::kernel;

/// Fixed-size real FFT plan pair.
///
/// Plans are built once at construction; both directions reuse internal
/// scratch, so transforms never allocate. Sizes are restricted to powers
/// of two, which is all the convolution paths ever request.
///
/// # Example
///
/// ```
/// use millrace::{Complex32, FftEngine};
///
/// let mut fft = FftEngine::new(8).unwrap();
///
/// let mut signal = [0.0f32; 8];
/// signal[0] = 1.0;
/// let mut spectrum = vec![Complex32::new(0.0, 0.0); fft.spectrum_len()];
/// fft.rfft(&mut signal, &mut spectrum).unwrap();
///
/// // An impulse has a flat spectrum
/// for bin in &spectrum {
///     assert!((bin.re - 1.0).abs() < 1e-6);
///     assert!(bin.im.abs() < 1e-6);
/// }
/// ```
#[derive(Clone)]
pub struct FftEngine {
    size: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    scratch_forward: Vec<Complex32>,
    scratch_inverse: Vec<Complex32>,
}

impl FftEngine {
    /// Plans a forward/inverse pair for transforms of length `size`.
    ///
    /// `size` must be a power of two, at least 2.
    pub fn new(size: usize) -> Result<Self, FilterError> {
        if size < 2 || !size.is_power_of_two() {
            return Err(FilterError::Configuration(format!(
                "FFT size must be a power of two >= 2, got {size}"
            )));
        }
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_forward = forward.make_scratch_vec();
        let scratch_inverse = inverse.make_scratch_vec();
        Ok(Self {
            size,
            forward,
            inverse,
            scratch_forward,
            scratch_inverse,
        })
    }

    /// Transform length.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of complex bins a forward transform produces: `N/2 + 1`.
    pub fn spectrum_len(&self) -> usize {
        self.size / 2 + 1
    }

    /// Forward transform: real time-domain input to complex spectrum.
    ///
    /// `input` must hold `size()` samples and `spectrum` must hold
    /// `spectrum_len()` bins. The input buffer doubles as working storage
    /// and holds unspecified contents afterwards.
    pub fn rfft(
        &mut self,
        input: &mut [f32],
        spectrum: &mut [Complex32],
    ) -> Result<(), FilterError> {
        self.check_len("input", input.len(), self.size)?;
        self.check_len("spectrum", spectrum.len(), self.spectrum_len())?;
        self.forward
            .process_with_scratch(input, spectrum, &mut self.scratch_forward)
            .map_err(|e| FilterError::Contract(e.to_string()))
    }

    /// Inverse transform: complex spectrum to real time-domain output,
    /// scaled by `1/N`.
    ///
    /// `spectrum` must hold `spectrum_len()` bins and `output` must hold
    /// `size()` samples. The spectrum buffer doubles as working storage
    /// and holds unspecified contents afterwards. The DC and Nyquist bins
    /// must have zero imaginary parts, which spectra produced by [`rfft`]
    /// always satisfy.
    ///
    /// [`rfft`]: FftEngine::rfft
    pub fn irfft(
        &mut self,
        spectrum: &mut [Complex32],
        output: &mut [f32],
    ) -> Result<(), FilterError> {
        self.check_len("spectrum", spectrum.len(), self.spectrum_len())?;
        self.check_len("output", output.len(), self.size)?;
        self.inverse
            .process_with_scratch(spectrum, output, &mut self.scratch_inverse)
            .map_err(|e| FilterError::Contract(e.to_string()))?;
        kernel::scale_in_place(output, 1.0 / self.size as f32);
        Ok(())
    }

    fn check_len(&self, what: &str, got: usize, want: usize) -> Result<(), FilterError> {
        if got != want {
            return Err(FilterError::Contract(format!(
                "{what} length {got} does not match FFT size {} (expected {want})",
                self.size
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for FftEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftEngine")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn zero_spectrum(fft: &FftEngine) -> Vec<Complex32> {
        vec![Complex32::new(0.0, 0.0); fft.spectrum_len()]
    }

    #[test]
    fn test_rejects_invalid_sizes() {
        for size in [0, 1, 3, 6, 100] {
            assert!(
                matches!(FftEngine::new(size), Err(FilterError::Configuration(_))),
                "size {size} should be rejected"
            );
        }
        assert!(FftEngine::new(2).is_ok());
        assert!(FftEngine::new(1024).is_ok());
    }

    #[test]
    fn test_spectrum_len() {
        assert_eq!(FftEngine::new(8).unwrap().spectrum_len(), 5);
        assert_eq!(FftEngine::new(256).unwrap().spectrum_len(), 129);
    }

    #[test]
    fn test_impulse_has_flat_spectrum() {
        let mut fft = FftEngine::new(16).unwrap();
        let mut signal = [0.0f32; 16];
        signal[0] = 1.0;
        let mut spectrum = zero_spectrum(&fft);

        fft.rfft(&mut signal, &mut spectrum).unwrap();

        for (k, bin) in spectrum.iter().enumerate() {
            assert!((bin.re - 1.0).abs() < 1e-6, "bin {k} re {}", bin.re);
            assert!(bin.im.abs() < 1e-6, "bin {k} im {}", bin.im);
        }
    }

    #[test]
    fn test_dc_signal_concentrates_in_bin_zero() {
        let mut fft = FftEngine::new(8).unwrap();
        let mut signal = [1.0f32; 8];
        let mut spectrum = zero_spectrum(&fft);

        fft.rfft(&mut signal, &mut spectrum).unwrap();

        assert!((spectrum[0].re - 8.0).abs() < 1e-5);
        assert!(spectrum[0].im.abs() < 1e-5);
        for bin in &spectrum[1..] {
            assert!(bin.norm() < 1e-5);
        }
    }

    #[test]
    fn test_sine_concentrates_in_one_bin() {
        let mut fft = FftEngine::new(16).unwrap();
        let mut signal = [0.0f32; 16];
        for (i, s) in signal.iter_mut().enumerate() {
            *s = (2.0 * PI * 2.0 * i as f32 / 16.0).sin();
        }
        let mut spectrum = zero_spectrum(&fft);

        fft.rfft(&mut signal, &mut spectrum).unwrap();

        // A bin-2 sine carries magnitude N/2 in bin 2 and nothing elsewhere
        assert!((spectrum[2].norm() - 8.0).abs() < 1e-4);
        for (k, bin) in spectrum.iter().enumerate() {
            if k != 2 {
                assert!(bin.norm() < 1e-4, "bin {k} magnitude {}", bin.norm());
            }
        }
    }

    #[test]
    fn test_round_trip_recovers_signal() {
        let mut fft = FftEngine::new(32).unwrap();
        let original: Vec<f32> = (0..32).map(|i| (i % 17) as f32 / 17.0 - 0.5).collect();

        let mut time = original.clone();
        let mut spectrum = zero_spectrum(&fft);
        fft.rfft(&mut time, &mut spectrum).unwrap();

        let mut recovered = vec![0.0f32; 32];
        fft.irfft(&mut spectrum, &mut recovered).unwrap();

        for (i, (&a, &b)) in original.iter().zip(&recovered).enumerate() {
            assert!((a - b).abs() < 1e-5, "sample {i}: {a} vs {b}");
        }
    }

    #[test]
    fn test_length_contracts() {
        let mut fft = FftEngine::new(8).unwrap();
        let mut spectrum = zero_spectrum(&fft);

        let mut short_input = [0.0f32; 7];
        assert!(matches!(
            fft.rfft(&mut short_input, &mut spectrum),
            Err(FilterError::Contract(_))
        ));

        let mut input = [0.0f32; 8];
        let mut short_spectrum = vec![Complex32::new(0.0, 0.0); 4];
        assert!(matches!(
            fft.rfft(&mut input, &mut short_spectrum),
            Err(FilterError::Contract(_))
        ));

        let mut short_output = [0.0f32; 7];
        assert!(matches!(
            fft.irfft(&mut spectrum, &mut short_output),
            Err(FilterError::Contract(_))
        ));
    }
}
