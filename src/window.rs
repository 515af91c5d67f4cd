//! Window functions for FIR design and frame tapering.
//!
//! Window functions shape the truncated ideal impulse response of a
//! windowed-sinc FIR design, trading main-lobe width (transition sharpness)
//! against sidelobe level (stopband leakage). They are computed on-the-fly
//! with zero allocation.
//!
//! # Window Types
//!
//! | Window | Main Lobe Width | Sidelobe Level | Use Case |
//! |--------|-----------------|----------------|----------|
//! | Rectangular | Narrowest | -13 dB | Maximum frequency resolution |
//! | Bartlett | Moderate | -27 dB | Simple linear taper |
//! | Hann | Moderate | -31 dB | General purpose |
//! | Hamming | Moderate | -42 dB | Sharper transition bands |
//! | Blackman | Wide | -58 dB | Deep stopband attenuation |
//!
//! # Example
//!
//! ```
//! use millrace::{apply_window, WindowType};
//!
//! // Taper a frame before overlap processing
//! let mut frame = [1.0f32; 256];
//! apply_window(&mut frame, WindowType::Hann);
//!
//! assert!(frame[0] < 0.01);
//! assert!(frame[255] < 0.01);
//! ```
//!
//! # On-the-fly Computation
//!
//! For streaming applications where you need individual coefficients:
//!
//! ```
//! use millrace::{window_coefficient, WindowType};
//!
//! // Window coefficient for sample 10 of a 256-point window
//! let coeff = window_coefficient(WindowType::Hamming, 10, 256);
//! assert!(coeff > 0.0 && coeff <= 1.0);
//! ```

use std::f64::consts::PI;

/// Window function types for FIR design.
///
/// Each window type provides a different trade-off between main lobe width
/// (transition band sharpness) and sidelobe level (stopband attenuation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WindowType {
    /// Rectangular window (no windowing).
    ///
    /// Provides the sharpest transition but the worst stopband (-13 dB).
    /// Equivalent to plain truncation of the ideal impulse response.
    Rectangular,

    /// Bartlett window (triangular).
    ///
    /// Linear taper to zero at both endpoints, -27 dB sidelobes.
    /// The simplest window that avoids truncation discontinuities.
    Bartlett,

    /// Hann window (raised cosine).
    ///
    /// Good general-purpose window with -31 dB sidelobe level.
    /// Also known as "Hanning" window.
    Hann,

    /// Hamming window.
    ///
    /// Similar to Hann but with better sidelobe suppression (-42 dB).
    /// Does not taper to zero at the endpoints.
    Hamming,

    /// Blackman window.
    ///
    /// Three-term window with excellent sidelobe suppression (-58 dB).
    /// Wider main lobe than Hann/Hamming but much lower leakage.
    Blackman,
}

/// Computes a single window coefficient in `f64` precision.
///
/// The FIR designer accumulates its kernels in double precision, so the
/// window is evaluated there too; [`window_coefficient`] is the `f32` cast
/// of this value.
///
/// # Panics
///
/// Panics if `index >= length` or `length == 0`.
#[inline]
pub fn window_coefficient_f64(window: WindowType, index: usize, length: usize) -> f64 {
    assert!(length > 0, "Window length must be positive");
    assert!(index < length, "Index must be less than length");

    if length == 1 {
        return 1.0;
    }

    let n = index as f64;
    let len = (length - 1) as f64;
    let ratio = n / len;

    let value = match window {
        WindowType::Rectangular => 1.0,

        // Bartlett: 1 - |2n/(N-1) - 1|
        WindowType::Bartlett => 1.0 - (2.0 * ratio - 1.0).abs(),

        // Hann: 0.5 * (1 - cos(2*pi*n/(N-1)))
        WindowType::Hann => 0.5 * (1.0 - (2.0 * PI * ratio).cos()),

        // Hamming: 0.54 - 0.46 * cos(2*pi*n/(N-1))
        WindowType::Hamming => 0.54 - 0.46 * (2.0 * PI * ratio).cos(),

        // Blackman: 0.42 - 0.5*cos(2*pi*n/(N-1)) + 0.08*cos(4*pi*n/(N-1))
        WindowType::Blackman => {
            0.42 - 0.5 * (2.0 * PI * ratio).cos() + 0.08 * (4.0 * PI * ratio).cos()
        }
    };

    // Clamp to non-negative (some windows can dip fractionally below zero
    // at the endpoints due to floating point rounding)
    value.max(0.0)
}

/// Computes a single window coefficient.
///
/// Enables on-the-fly evaluation without storing the whole window.
///
/// # Arguments
///
/// * `window` - The window type to compute
/// * `index` - Sample index (0 to length-1)
/// * `length` - Total window length
///
/// # Panics
///
/// Panics if `index >= length` or `length == 0`.
///
/// # Example
///
/// ```
/// use millrace::{window_coefficient, WindowType};
///
/// // Hann window is symmetric and zero at endpoints
/// let n = 64;
/// let first = window_coefficient(WindowType::Hann, 0, n);
/// let last = window_coefficient(WindowType::Hann, n - 1, n);
/// let middle = window_coefficient(WindowType::Hann, n / 2, n);
///
/// assert!(first < 0.01);
/// assert!(last < 0.01);
/// assert!(middle > 0.99);
/// ```
#[inline]
pub fn window_coefficient(window: WindowType, index: usize, length: usize) -> f32 {
    window_coefficient_f64(window, index, length) as f32
}

/// Applies a window function to a frame in-place.
///
/// Each sample is multiplied by the corresponding window coefficient.
/// O(N), zero allocation.
///
/// # Example
///
/// ```
/// use millrace::{apply_window, WindowType};
///
/// let mut frame = [1.0f32; 128];
/// apply_window(&mut frame, WindowType::Hann);
///
/// assert!(frame[0] < 0.01);
/// assert!(frame[127] < 0.01);
/// ```
#[inline]
pub fn apply_window(frame: &mut [f32], window: WindowType) {
    let len = frame.len();
    if len == 0 {
        return;
    }

    for (i, sample) in frame.iter_mut().enumerate() {
        *sample *= window_coefficient(window, i, len);
    }
}
