//! Multi-channel convolution orchestrator.
//!
//! This module provides [`Convolver`], which applies one FIR kernel to an
//! interleaved multi-channel stream and picks the execution strategy along
//! two independent axes:
//!
//! - **Method**: `Direct` evaluates the time-domain dot product per output
//!   sample, `Fft` multiplies spectra via overlap-add, and `Auto` chooses
//!   between them from the kernel length.
//! - **Mode**: `Moving` carries per-channel history across calls for
//!   streaming use, `Batch` treats every call as an isolated buffer with
//!   zero pre-history.
//!
//! # Strategy Matrix
//!
//! | | Direct | FFT |
//! |---|---|---|
//! | **Moving** | linear delay line per channel, SIMD dot per sample | overlap-add in kernel-sized chunks, `kernel_len - 1` samples of output delay |
//! | **Batch** | causal convolution per output index | one transform sized to the whole buffer, kernel spectrum cached |
//!
//! Direct wins for short kernels where the O(K) dot is cheap; FFT wins once
//! O(K) per sample outgrows O(log N) per sample. `Auto` switches at 64 taps.
//!
//! All four cells compute the same causal convolution
//! `y[n] = sum(h[k] * x[n-k])` with zeros before the first sample; only the
//! moving FFT cell delays its output, by a fixed `kernel_len - 1` samples,
//! because results leave in whole chunks.
//!
//! # Example
//!
//! ```
//! use millrace::{ConvMethod, ConvMode, Convolver};
//!
//! // 3-tap smoothing kernel over a mono stream
//! let mut conv = Convolver::new(
//!     vec![0.25, 0.5, 0.25],
//!     1,
//!     ConvMode::Moving,
//!     ConvMethod::Auto,
//! )
//! .unwrap();
//!
//! let mut block = [1.0f32, 1.0, 1.0, 1.0];
//! conv.process(&mut block).unwrap();
//!
//! // Once the delay line is full the smoothed value settles at 1.0
//! assert!((block[3] - 1.0).abs() < 1e-6);
//! ```

use std::collections::VecDeque;

use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::error::FilterError;
use crate::fft::FftEngine;
use crate::kernel;

/// Kernel length at or below which `Auto` resolves to the direct method.
const AUTO_DIRECT_MAX: usize = 64;

/// Delay lines at or below this tap count shift with an indexed loop, which
/// the compiler unrolls; longer lines use `copy_within`.
const SHIFT_UNROLL_MAX: usize = 16;

/// Execution method for the convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvMethod {
    /// Pick direct for kernels up to 64 taps, FFT above.
    Auto,
    /// Time-domain dot product per output sample.
    Direct,
    /// Frequency-domain multiplication.
    Fft,
}

/// Processing mode for the convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvMode {
    /// Streaming: per-channel history persists across calls.
    Moving,
    /// One-shot: every call starts from zero pre-history.
    Batch,
}

/// Overlap-add streaming state for the moving FFT strategy.
///
/// Input collects per channel in kernel-sized chunks. A full chunk is
/// zero-padded, transformed, multiplied by the cached kernel spectrum and
/// inverse-transformed; the first `chunk` output samples merge with the
/// tail saved from the previous chunk and join the ready queue, the
/// remaining `chunk - 1` samples become the new tail.
#[derive(Debug, Clone)]
struct OverlapAdd {
    fft: FftEngine,
    kernel_spectrum: Vec<Complex32>,
    chunk: usize,
    pending: Vec<Vec<f32>>,
    tails: Vec<Vec<f32>>,
    ready: Vec<VecDeque<f32>>,
    time: Vec<f32>,
    spectrum: Vec<Complex32>,
    product: Vec<Complex32>,
    synth: Vec<f32>,
}

impl OverlapAdd {
    fn new(kernel: &[f32], channels: usize) -> Result<Self, FilterError> {
        let chunk = kernel.len();
        let fft_size = (2 * chunk).next_power_of_two();
        let mut fft = FftEngine::new(fft_size)?;
        let bins = fft.spectrum_len();

        let mut time = vec![0.0; fft_size];
        let mut kernel_spectrum = vec![Complex32::new(0.0, 0.0); bins];
        time[..chunk].copy_from_slice(kernel);
        fft.rfft(&mut time, &mut kernel_spectrum)?;

        Ok(Self {
            fft,
            kernel_spectrum,
            chunk,
            pending: (0..channels).map(|_| Vec::with_capacity(chunk)).collect(),
            tails: vec![vec![0.0; chunk - 1]; channels],
            ready: vec![VecDeque::new(); channels],
            time,
            spectrum: vec![Complex32::new(0.0, 0.0); bins],
            product: vec![Complex32::new(0.0, 0.0); bins],
            synth: vec![0.0; fft_size],
        })
    }

    /// Feeds one sample and returns the delayed output for its position,
    /// zero while the first chunk is still filling.
    fn push(&mut self, channel: usize, x: f32) -> Result<f32, FilterError> {
        self.pending[channel].push(x);
        if self.pending[channel].len() == self.chunk {
            self.flush(channel)?;
        }
        Ok(self.ready[channel].pop_front().unwrap_or(0.0))
    }

    fn flush(&mut self, channel: usize) -> Result<(), FilterError> {
        let chunk = self.chunk;
        self.time[..chunk].copy_from_slice(&self.pending[channel]);
        self.time[chunk..].fill(0.0);
        self.fft.rfft(&mut self.time, &mut self.spectrum)?;
        kernel::complex_multiply(&self.spectrum, &self.kernel_spectrum, &mut self.product);
        self.fft.irfft(&mut self.product, &mut self.synth)?;

        // The chunk's own span is final once the saved overlap is added
        let tail = &mut self.tails[channel];
        for i in 0..chunk {
            let mut y = self.synth[i];
            if i < tail.len() {
                y += tail[i];
            }
            self.ready[channel].push_back(y);
        }
        // The span past the chunk boundary overlaps the next chunk
        for (i, t) in tail.iter_mut().enumerate() {
            *t = self.synth[chunk + i];
        }
        self.pending[channel].clear();
        Ok(())
    }

    fn reset(&mut self) {
        for p in &mut self.pending {
            p.clear();
        }
        for t in &mut self.tails {
            t.fill(0.0);
        }
        for r in &mut self.ready {
            r.clear();
        }
    }
}

/// Whole-buffer FFT state for the batch strategy.
///
/// The plan and the kernel spectrum depend on the transform size, which
/// tracks the caller's buffer length; both are rebuilt only when that size
/// actually changes.
#[derive(Debug, Clone)]
struct BatchFft {
    fft: FftEngine,
    kernel_spectrum: Vec<Complex32>,
    time: Vec<f32>,
    spectrum: Vec<Complex32>,
    product: Vec<Complex32>,
    synth: Vec<f32>,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
}

impl BatchFft {
    fn new(kernel: &[f32], channels: usize) -> Result<Self, FilterError> {
        let size = (2 * kernel.len()).next_power_of_two().max(2);
        let mut this = Self {
            fft: FftEngine::new(size)?,
            kernel_spectrum: Vec::new(),
            time: Vec::new(),
            spectrum: Vec::new(),
            product: Vec::new(),
            synth: Vec::new(),
            input: vec![Vec::new(); channels],
            output: vec![Vec::new(); channels],
        };
        this.rebuild_buffers(kernel)?;
        Ok(this)
    }

    /// Sizes the working buffers to the current plan and caches the kernel
    /// spectrum.
    fn rebuild_buffers(&mut self, kernel: &[f32]) -> Result<(), FilterError> {
        let size = self.fft.size();
        let bins = self.fft.spectrum_len();
        self.time = vec![0.0; size];
        self.kernel_spectrum = vec![Complex32::new(0.0, 0.0); bins];
        self.time[..kernel.len()].copy_from_slice(kernel);
        self.fft.rfft(&mut self.time, &mut self.kernel_spectrum)?;
        self.spectrum = vec![Complex32::new(0.0, 0.0); bins];
        self.product = vec![Complex32::new(0.0, 0.0); bins];
        self.synth = vec![0.0; size];
        Ok(())
    }

    /// Replans for the linear convolution length `frames + kernel_len - 1`
    /// if the current plan does not match.
    fn ensure_plan(&mut self, frames: usize, kernel: &[f32]) -> Result<(), FilterError> {
        let needed = (frames + kernel.len() - 1).next_power_of_two().max(2);
        if self.fft.size() != needed {
            self.fft = FftEngine::new(needed)?;
            self.rebuild_buffers(kernel)?;
        }
        Ok(())
    }

    fn process(
        &mut self,
        data: &mut [f32],
        channels: usize,
        frames: usize,
    ) -> Result<(), FilterError> {
        kernel::deinterleave(data, channels, &mut self.input);
        for c in 0..channels {
            self.time[..frames].copy_from_slice(&self.input[c]);
            self.time[frames..].fill(0.0);
            self.fft.rfft(&mut self.time, &mut self.spectrum)?;
            kernel::complex_multiply(&self.spectrum, &self.kernel_spectrum, &mut self.product);
            self.fft.irfft(&mut self.product, &mut self.synth)?;
            // Causal part only; the final kernel_len - 1 samples are the
            // response past the buffer end
            self.output[c].clear();
            self.output[c].extend_from_slice(&self.synth[..frames]);
        }
        kernel::interleave(&self.output, data);
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum ConvEngine {
    MovingDirect {
        lines: Vec<Vec<f32>>,
    },
    MovingFft(OverlapAdd),
    BatchDirect {
        input: Vec<Vec<f32>>,
        output: Vec<Vec<f32>>,
    },
    BatchFft(BatchFft),
}

/// Multi-channel FIR convolution with selectable strategy.
///
/// One kernel is applied to every channel of an interleaved buffer.
/// Channels never mix; each carries its own history in moving mode.
///
/// # Example
///
/// ```
/// use millrace::{ConvMethod, ConvMode, Convolver};
///
/// // Batch mode: each call convolves an isolated buffer
/// let mut conv = Convolver::new(vec![1.0, 1.0], 1, ConvMode::Batch, ConvMethod::Direct).unwrap();
///
/// let mut block = [1.0f32, 2.0, 3.0];
/// conv.process(&mut block).unwrap();
/// assert_eq!(block, [1.0, 3.0, 5.0]);
/// ```
#[derive(Debug, Clone)]
pub struct Convolver {
    kernel: Vec<f32>,
    kernel_rev: Vec<f32>,
    channels: usize,
    mode: ConvMode,
    method: ConvMethod,
    engine: ConvEngine,
}

/// Serializable snapshot of a [`Convolver`].
///
/// Field order is the emission order: mode flags, configuration, then the
/// per-channel streaming state. Batch instances have no streaming state,
/// so their per-channel vectors are empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvolverState {
    /// Processing mode of the exporting instance.
    pub mode: ConvMode,
    /// Whether the resolved method was FFT.
    pub fft: bool,
    /// Kernel length at export time.
    pub kernel_len: usize,
    /// Channel count.
    pub channels: usize,
    /// Per-channel delay lines, oldest to newest (moving direct).
    pub histories: Vec<Vec<f32>>,
    /// Per-channel partial input chunks (moving FFT).
    pub pending: Vec<Vec<f32>>,
    /// Per-channel saved overlap tails (moving FFT).
    pub tails: Vec<Vec<f32>>,
    /// Per-channel queued output samples (moving FFT).
    pub ready: Vec<Vec<f32>>,
}

impl Convolver {
    /// Creates a convolver for `channels`-channel interleaved input.
    ///
    /// The kernel must be non-empty and `channels` at least 1. The kernel
    /// is stored both in natural and reversed order; the direct paths dot
    /// the reversed copy against chronological windows.
    pub fn new(
        kernel: Vec<f32>,
        channels: usize,
        mode: ConvMode,
        method: ConvMethod,
    ) -> Result<Self, FilterError> {
        if kernel.is_empty() {
            return Err(FilterError::Configuration(
                "convolution kernel must not be empty".into(),
            ));
        }
        if channels == 0 {
            return Err(FilterError::Configuration(
                "convolver needs at least one channel".into(),
            ));
        }
        let use_fft = match method {
            ConvMethod::Direct => false,
            ConvMethod::Fft => true,
            ConvMethod::Auto => kernel.len() > AUTO_DIRECT_MAX,
        };
        let engine = match (mode, use_fft) {
            (ConvMode::Moving, false) => ConvEngine::MovingDirect {
                lines: vec![vec![0.0; kernel.len()]; channels],
            },
            (ConvMode::Moving, true) => ConvEngine::MovingFft(OverlapAdd::new(&kernel, channels)?),
            (ConvMode::Batch, false) => ConvEngine::BatchDirect {
                input: vec![Vec::new(); channels],
                output: vec![Vec::new(); channels],
            },
            (ConvMode::Batch, true) => ConvEngine::BatchFft(BatchFft::new(&kernel, channels)?),
        };
        let kernel_rev: Vec<f32> = kernel.iter().rev().copied().collect();
        Ok(Self {
            kernel,
            kernel_rev,
            channels,
            mode,
            method,
            engine,
        })
    }

    /// Convolves an interleaved buffer in place.
    ///
    /// The buffer length must be a whole number of frames; anything else
    /// is a contract violation and no samples are consumed. In moving mode
    /// the per-channel history carries over to the next call.
    pub fn process(&mut self, data: &mut [f32]) -> Result<(), FilterError> {
        if data.len() % self.channels != 0 {
            return Err(FilterError::Contract(format!(
                "buffer length {} is not a whole number of {}-channel frames",
                data.len(),
                self.channels
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        let frames = data.len() / self.channels;
        match &mut self.engine {
            ConvEngine::MovingDirect { lines } => {
                for (i, slot) in data.iter_mut().enumerate() {
                    let line = &mut lines[i % self.channels];
                    shift_in(line, *slot);
                    *slot = kernel::dot(&self.kernel_rev, line) as f32;
                }
            }
            ConvEngine::MovingFft(ola) => {
                for (i, slot) in data.iter_mut().enumerate() {
                    *slot = ola.push(i % self.channels, *slot)?;
                }
            }
            ConvEngine::BatchDirect { input, output } => {
                kernel::deinterleave(data, self.channels, input);
                for (src, dst) in input.iter().zip(output.iter_mut()) {
                    dst.resize(frames, 0.0);
                    convolve_causal(&self.kernel, &self.kernel_rev, src, dst);
                }
                kernel::interleave(output, data);
            }
            ConvEngine::BatchFft(batch) => {
                batch.ensure_plan(frames, &self.kernel)?;
                batch.process(data, self.channels, frames)?;
            }
        }
        Ok(())
    }

    /// Clears all per-channel streaming state. A no-op in batch mode,
    /// which carries none.
    pub fn reset(&mut self) {
        match &mut self.engine {
            ConvEngine::MovingDirect { lines } => {
                for line in lines {
                    line.fill(0.0);
                }
            }
            ConvEngine::MovingFft(ola) => ola.reset(),
            ConvEngine::BatchDirect { .. } | ConvEngine::BatchFft(_) => {}
        }
    }

    /// Replaces the kernel, re-resolving the method, rebuilding spectra
    /// and clearing all streaming state.
    pub fn set_kernel(&mut self, kernel: Vec<f32>) -> Result<(), FilterError> {
        *self = Self::new(kernel, self.channels, self.mode, self.method)?;
        Ok(())
    }

    /// The kernel in natural order.
    pub fn kernel(&self) -> &[f32] {
        &self.kernel
    }

    /// Channel count.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// The configured processing mode.
    pub fn mode(&self) -> ConvMode {
        self.mode
    }

    /// The method as requested at construction, `Auto` included.
    pub fn method(&self) -> ConvMethod {
        self.method
    }

    /// The method actually in use: `Direct` or `Fft`, never `Auto`.
    pub fn resolved_method(&self) -> ConvMethod {
        match self.engine {
            ConvEngine::MovingDirect { .. } | ConvEngine::BatchDirect { .. } => ConvMethod::Direct,
            ConvEngine::MovingFft(_) | ConvEngine::BatchFft(_) => ConvMethod::Fft,
        }
    }

    /// Output delay in samples: `kernel_len - 1` for the moving FFT
    /// strategy, zero everywhere else.
    pub fn latency(&self) -> usize {
        match self.engine {
            ConvEngine::MovingFft(_) => self.kernel.len() - 1,
            _ => 0,
        }
    }

    /// Exports configuration and per-channel streaming state.
    pub fn state(&self) -> ConvolverState {
        let mut state = ConvolverState {
            mode: self.mode,
            fft: matches!(self.resolved_method(), ConvMethod::Fft),
            kernel_len: self.kernel.len(),
            channels: self.channels,
            histories: Vec::new(),
            pending: Vec::new(),
            tails: Vec::new(),
            ready: Vec::new(),
        };
        match &self.engine {
            ConvEngine::MovingDirect { lines } => {
                state.histories = lines.clone();
            }
            ConvEngine::MovingFft(ola) => {
                state.pending = ola.pending.clone();
                state.tails = ola.tails.clone();
                state.ready = ola
                    .ready
                    .iter()
                    .map(|q| q.iter().copied().collect())
                    .collect();
            }
            ConvEngine::BatchDirect { .. } | ConvEngine::BatchFft(_) => {}
        }
        state
    }

    /// Restores a previously exported state.
    ///
    /// Kernel length, channel count, mode and resolved method must all
    /// match the live instance, and the per-channel vectors must have the
    /// dimensions the strategy requires; any disagreement is a
    /// [`FilterError::StateMismatch`] and leaves the instance untouched.
    pub fn set_state(&mut self, state: ConvolverState) -> Result<(), FilterError> {
        if state.kernel_len != self.kernel.len() {
            return Err(FilterError::StateMismatch(format!(
                "restored kernel length {} does not match configured {}",
                state.kernel_len,
                self.kernel.len()
            )));
        }
        if state.channels != self.channels {
            return Err(FilterError::StateMismatch(format!(
                "restored channel count {} does not match configured {}",
                state.channels, self.channels
            )));
        }
        if state.mode != self.mode {
            return Err(FilterError::StateMismatch(
                "restored mode does not match the live instance".into(),
            ));
        }
        if state.fft != matches!(self.resolved_method(), ConvMethod::Fft) {
            return Err(FilterError::StateMismatch(
                "restored method does not match the live instance".into(),
            ));
        }
        match &mut self.engine {
            ConvEngine::MovingDirect { lines } => {
                if state.histories.len() != self.channels {
                    return Err(FilterError::StateMismatch(format!(
                        "restored history covers {} channels, expected {}",
                        state.histories.len(),
                        self.channels
                    )));
                }
                for (c, h) in state.histories.iter().enumerate() {
                    if h.len() != self.kernel.len() {
                        return Err(FilterError::StateMismatch(format!(
                            "channel {c} history length {} does not match kernel length {}",
                            h.len(),
                            self.kernel.len()
                        )));
                    }
                }
                for (line, h) in lines.iter_mut().zip(&state.histories) {
                    line.copy_from_slice(h);
                }
            }
            ConvEngine::MovingFft(ola) => {
                if state.pending.len() != self.channels
                    || state.tails.len() != self.channels
                    || state.ready.len() != self.channels
                {
                    return Err(FilterError::StateMismatch(
                        "restored streaming state does not cover every channel".into(),
                    ));
                }
                for (c, p) in state.pending.iter().enumerate() {
                    if p.len() >= ola.chunk {
                        return Err(FilterError::StateMismatch(format!(
                            "channel {c} pending chunk of {} is not smaller than {}",
                            p.len(),
                            ola.chunk
                        )));
                    }
                }
                for (c, t) in state.tails.iter().enumerate() {
                    if t.len() != ola.chunk - 1 {
                        return Err(FilterError::StateMismatch(format!(
                            "channel {c} tail length {} does not match {}",
                            t.len(),
                            ola.chunk - 1
                        )));
                    }
                }
                for c in 0..self.channels {
                    ola.pending[c].clear();
                    ola.pending[c].extend_from_slice(&state.pending[c]);
                    ola.tails[c].copy_from_slice(&state.tails[c]);
                    ola.ready[c] = state.ready[c].iter().copied().collect();
                }
            }
            ConvEngine::BatchDirect { .. } | ConvEngine::BatchFft(_) => {}
        }
        Ok(())
    }
}

/// Shifts a chronological delay line left by one and appends `x`.
fn shift_in(line: &mut [f32], x: f32) {
    let n = line.len();
    if n <= SHIFT_UNROLL_MAX {
        for i in 1..n {
            line[i - 1] = line[i];
        }
    } else {
        line.copy_within(1.., 0);
    }
    line[n - 1] = x;
}

/// Causal convolution of one contiguous channel, zeros before the start.
///
/// Short kernels run a fixed-reach scalar loop; longer kernels collect the
/// forward-order window and hand it to the SIMD dot.
fn convolve_causal(kernel: &[f32], kernel_rev: &[f32], input: &[f32], output: &mut [f32]) {
    let taps = kernel.len();
    if taps <= SHIFT_UNROLL_MAX {
        for (i, out) in output.iter_mut().enumerate() {
            let reach = taps.min(i + 1);
            let mut acc = 0.0f64;
            for (j, &k) in kernel.iter().take(reach).enumerate() {
                acc += k as f64 * input[i - j] as f64;
            }
            *out = acc as f32;
        }
    } else {
        for (i, out) in output.iter_mut().enumerate() {
            *out = if i + 1 >= taps {
                kernel::dot(kernel_rev, &input[i + 1 - taps..=i]) as f32
            } else {
                let mut acc = 0.0f64;
                for (j, &k) in kernel.iter().take(i + 1).enumerate() {
                    acc += k as f64 * input[i - j] as f64;
                }
                acc as f32
            };
        }
    }
}
