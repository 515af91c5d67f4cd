//! Streaming multi-channel DSP filter substrate.
//!
//! millrace provides the numeric core of a streaming filter graph:
//! sliding-window statistics over a bounded sample buffer, FIR filtering
//! with windowed-sinc design, adaptive LMS/NLMS interference cancellation
//! and a direct/FFT convolution orchestrator, all backed by SIMD kernels
//! that accumulate in double precision.
//!
//! Every stage follows the same conventions: runtime-validated
//! construction, per-sample and per-block processing of interleaved `f32`
//! frames, `reset`, and a serializable state snapshot whose restore
//! reproduces bit-identical subsequent output.

pub mod buffer;
pub mod convolve;
pub mod error;
pub mod fft;
pub mod filter;
pub mod kernel;
pub mod rolling;
pub mod window;

pub use buffer::{CircularBuffer, CircularBufferState};
pub use convolve::{ConvMethod, ConvMode, Convolver, ConvolverState};
pub use error::FilterError;
pub use fft::FftEngine;
pub use filter::{AdaptiveOutput, FirFilter, FirState, LmsFilter, LmsState};
pub use num_complex::Complex32;
pub use rolling::{
    Cma, Convolution, Counter, Ema, Mean, MeanAbsoluteValue, MovingAverage, MovingConvolution,
    MovingMav, MovingRms, MovingSum, MovingVariance, MovingZScore, RollingFilter, RollingPolicy,
    RollingState, Rms, Sum, Variance, ZScore,
};
pub use window::{apply_window, window_coefficient, window_coefficient_f64, WindowType};
