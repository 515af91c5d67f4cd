//! Windowed-sinc FIR kernel design.
//!
//! The classic design flow: sample the ideal brick-wall impulse response
//! (a sinc), taper it with a window function to contain the truncation
//! ripple, then normalize. All arithmetic runs in `f64`; kernels are
//! delivered as `f32` coefficient vectors ready for [`FirFilter`].
//!
//! Frequencies are normalized to the sample rate, so a cutoff of 0.25
//! means half of Nyquist. Tap counts must be odd so every kernel has a
//! center tap (type-I linear phase); spectral inversion for the high-pass
//! and band-stop responses is exact only around that center.
//!
//! [`FirFilter`]: crate::FirFilter

use std::f64::consts::PI;

use crate::error::FilterError;
use crate::window::{window_coefficient_f64, WindowType};

fn validate(cutoff: f64, taps: usize) -> Result<(), FilterError> {
    if !cutoff.is_finite() || cutoff <= 0.0 || cutoff >= 0.5 {
        return Err(FilterError::Configuration(format!(
            "normalized cutoff must lie in (0, 0.5), got {cutoff}"
        )));
    }
    if taps == 0 || taps % 2 == 0 {
        return Err(FilterError::Configuration(format!(
            "tap count must be odd, got {taps}"
        )));
    }
    Ok(())
}

/// Designs a windowed-sinc low-pass kernel with unit DC gain.
///
/// # Example
///
/// ```
/// use millrace::{filter::design, WindowType};
///
/// let kernel = design::low_pass(0.25, 31, WindowType::Hamming).unwrap();
///
/// // Unit gain at DC
/// let dc: f32 = kernel.iter().sum();
/// assert!((dc - 1.0).abs() < 1e-4);
/// ```
pub fn low_pass(
    cutoff: f64,
    taps: usize,
    window: WindowType,
) -> Result<Vec<f32>, FilterError> {
    validate(cutoff, taps)?;

    let center = (taps / 2) as isize;
    let mut kernel = vec![0.0f64; taps];
    for (i, c) in kernel.iter_mut().enumerate() {
        let n = i as isize - center;
        // h[n] = sin(2*pi*fc*n) / (pi*n), h[0] = 2*fc
        let sinc = if n == 0 {
            2.0 * cutoff
        } else {
            let x = PI * n as f64;
            (2.0 * cutoff * x).sin() / x
        };
        *c = sinc * window_coefficient_f64(window, i, taps);
    }

    // Windowing perturbs the DC gain; rescale so the taps sum to one
    let sum: f64 = kernel.iter().sum();
    Ok(kernel.iter().map(|&c| (c / sum) as f32).collect())
}

/// Designs a high-pass kernel by spectral inversion of the matching
/// low-pass: negate every tap and add a unit impulse at the center.
pub fn high_pass(
    cutoff: f64,
    taps: usize,
    window: WindowType,
) -> Result<Vec<f32>, FilterError> {
    let mut kernel = low_pass(cutoff, taps, window)?;
    for c in kernel.iter_mut() {
        *c = -*c;
    }
    kernel[taps / 2] += 1.0;
    Ok(kernel)
}

/// Designs a band-pass kernel as the difference of two low-passes with
/// cutoffs at the band edges. Requires `low < high`, both in (0, 0.5).
pub fn band_pass(
    low: f64,
    high: f64,
    taps: usize,
    window: WindowType,
) -> Result<Vec<f32>, FilterError> {
    if !(low < high) {
        return Err(FilterError::Configuration(format!(
            "band edges must satisfy low < high, got {low} and {high}"
        )));
    }
    let wide = low_pass(high, taps, window)?;
    let narrow = low_pass(low, taps, window)?;
    Ok(wide.iter().zip(&narrow).map(|(w, n)| w - n).collect())
}

/// Designs a band-stop kernel by spectral inversion of the matching
/// band-pass.
pub fn band_stop(
    low: f64,
    high: f64,
    taps: usize,
    window: WindowType,
) -> Result<Vec<f32>, FilterError> {
    let mut kernel = band_pass(low, high, taps, window)?;
    for c in kernel.iter_mut() {
        *c = -*c;
    }
    kernel[taps / 2] += 1.0;
    Ok(kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Magnitude response at normalized frequency `f`.
    fn gain_at(kernel: &[f32], f: f64) -> f64 {
        let mut re = 0.0f64;
        let mut im = 0.0f64;
        for (n, &c) in kernel.iter().enumerate() {
            let phase = 2.0 * PI * f * n as f64;
            re += c as f64 * phase.cos();
            im -= c as f64 * phase.sin();
        }
        (re * re + im * im).sqrt()
    }

    #[test]
    fn test_low_pass_unit_dc_gain() {
        let kernel = low_pass(0.25, 31, WindowType::Hamming).unwrap();
        let dc: f32 = kernel.iter().sum();
        assert!((dc - 1.0).abs() < 1e-4, "DC gain was {dc}");
    }

    #[test]
    fn test_low_pass_symmetric() {
        let kernel = low_pass(0.2, 41, WindowType::Blackman).unwrap();
        for i in 0..kernel.len() / 2 {
            let mirror = kernel[kernel.len() - 1 - i];
            assert!(
                (kernel[i] - mirror).abs() < 1e-7,
                "linear phase requires a symmetric kernel"
            );
        }
    }

    #[test]
    fn test_low_pass_attenuates_nyquist() {
        let kernel = low_pass(0.1, 51, WindowType::Hamming).unwrap();
        assert!(gain_at(&kernel, 0.0) > 0.999);
        assert!(gain_at(&kernel, 0.5) < 0.01, "Nyquist should be stopped");
    }

    #[test]
    fn test_high_pass_blocks_dc() {
        let kernel = high_pass(0.25, 31, WindowType::Hamming).unwrap();
        assert!(gain_at(&kernel, 0.0) < 1e-4, "DC should be blocked");
        assert!(
            (gain_at(&kernel, 0.5) - 1.0).abs() < 0.05,
            "Nyquist should pass"
        );
    }

    #[test]
    fn test_band_pass_response() {
        let kernel = band_pass(0.1, 0.3, 63, WindowType::Hamming).unwrap();
        assert!(gain_at(&kernel, 0.0) < 1e-3, "DC should be stopped");
        assert!(gain_at(&kernel, 0.45) < 0.02, "high stopband");
        assert!(
            (gain_at(&kernel, 0.2) - 1.0).abs() < 0.05,
            "band center should pass"
        );
    }

    #[test]
    fn test_band_stop_response() {
        let kernel = band_stop(0.1, 0.3, 63, WindowType::Hamming).unwrap();
        assert!((gain_at(&kernel, 0.0) - 1.0).abs() < 1e-3, "DC should pass");
        assert!(gain_at(&kernel, 0.2) < 0.02, "notch center should be stopped");
    }

    #[test]
    fn test_invalid_cutoffs_rejected() {
        assert!(low_pass(0.0, 31, WindowType::Hann).is_err());
        assert!(low_pass(0.5, 31, WindowType::Hann).is_err());
        assert!(low_pass(0.7, 31, WindowType::Hann).is_err());
        assert!(low_pass(-0.1, 31, WindowType::Hann).is_err());
        assert!(low_pass(f64::NAN, 31, WindowType::Hann).is_err());
    }

    #[test]
    fn test_even_or_zero_taps_rejected() {
        assert!(low_pass(0.25, 30, WindowType::Hann).is_err());
        assert!(low_pass(0.25, 0, WindowType::Hann).is_err());
        assert!(high_pass(0.25, 10, WindowType::Hann).is_err());
    }

    #[test]
    fn test_band_edges_order_enforced() {
        assert!(band_pass(0.3, 0.1, 31, WindowType::Hann).is_err());
        assert!(band_pass(0.2, 0.2, 31, WindowType::Hann).is_err());
        assert!(band_stop(0.3, 0.1, 31, WindowType::Hann).is_err());
        assert!(band_pass(f64::NAN, 0.2, 31, WindowType::Hann).is_err());
    }

    #[test]
    fn test_all_windows_design_cleanly() {
        for window in [
            WindowType::Rectangular,
            WindowType::Bartlett,
            WindowType::Hann,
            WindowType::Hamming,
            WindowType::Blackman,
        ] {
            let kernel = low_pass(0.2, 21, window).unwrap();
            let dc: f32 = kernel.iter().sum();
            assert!((dc - 1.0).abs() < 1e-4, "{window:?} DC gain was {dc}");
        }
    }
}
