//! Policy-driven sliding-window statistics.
//!
//! One engine, [`RollingFilter`], owns the window storage and the slide
//! bookkeeping; what it computes is decided by a [`RollingPolicy`] chosen at
//! construction and monomorphized in, so a moving average and a moving RMS
//! share every line of windowing code with no dispatch cost in the hot loop.
//!
//! Windows are bounded by sample count, optionally also by age: a filter
//! built with [`RollingFilter::with_duration`] stamps every sample and drops
//! those older than the window duration before each insertion.
//!
//! # Example
//!
//! ```
//! use millrace::{Mean, MovingAverage};
//!
//! let mut avg = MovingAverage::new(4, Mean::new()).unwrap();
//!
//! avg.add_sample(1.0);
//! avg.add_sample(2.0);
//! let out = avg.add_sample(3.0);
//!
//! // Mean over the samples seen so far
//! assert!((out - 2.0).abs() < 1e-6);
//! ```

pub mod policy;

pub use policy::{
    Cma, Convolution, Counter, Ema, Mean, MeanAbsoluteValue, RollingPolicy, Rms, Sum, Variance,
    ZScore,
};

use serde::{Deserialize, Serialize};

use crate::buffer::{CircularBuffer, CircularBufferState};
use crate::error::FilterError;

/// Sliding-window statistic engine over a single channel.
///
/// Owns one [`CircularBuffer`] and one policy value. Every insertion is one
/// atomic slide: evict-if-full, insert, then a single
/// `advance(evicted, incoming)` call to the policy, so incremental
/// statistics update in O(1) and never observe a half-slid window.
///
/// # Algorithm
///
/// ```text
/// add_sample(x):
///   evicted = buffer.push_overwrite(x)    // None until the window fills
///   policy.advance(evicted, x)
///   return policy.value(buffer)
///
/// add_sample_at(x, t):                    // time-aware instances
///   if buffer.expire_older_than(t) > 0:
///     policy.rebuild(buffer)              // replay the survivors
///   ...same slide as above, with t stamped onto x
/// ```
///
/// The expiry rebuild is O(window): statistics like variance cannot
/// subtract a batch of departures in closed form, and replaying the
/// survivors keeps every policy exact.
///
/// # Example
///
/// ```
/// use millrace::{Counter, RollingFilter};
///
/// // How many events arrived in the last second?
/// let mut rate = RollingFilter::with_duration(1024, 1.0, Counter::new()).unwrap();
///
/// rate.add_sample_at(1.0, 0.00);
/// rate.add_sample_at(1.0, 0.40);
/// assert_eq!(rate.add_sample_at(1.0, 0.80), 3.0);
///
/// // 1.6 s later the first two samples have aged out
/// assert_eq!(rate.add_sample_at(1.0, 1.60), 2.0);
/// ```
#[derive(Debug, Clone)]
pub struct RollingFilter<P: RollingPolicy> {
    buffer: CircularBuffer,
    policy: P,
}

/// Serializable snapshot of a [`RollingFilter`].
///
/// Field order is the emission order: configuration first, then window
/// contents, then the policy's running statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingState<P> {
    /// Window capacity in samples.
    pub window: usize,
    /// Window duration for time-aware instances, `None` in count mode.
    pub duration: Option<f64>,
    /// Live samples, oldest to newest.
    pub samples: Vec<f32>,
    /// Per-sample timestamps, present exactly when `duration` is.
    pub timestamps: Option<Vec<f64>>,
    /// The policy with its accumulated statistic.
    pub policy: P,
}

impl<P: RollingPolicy> RollingFilter<P> {
    /// Creates a count-bounded filter: the window holds the most recent
    /// `window` samples. A zero window is a configuration error.
    pub fn new(window: usize, policy: P) -> Result<Self, FilterError> {
        Ok(Self {
            buffer: CircularBuffer::new(window)?,
            policy,
        })
    }

    /// Creates a time-aware filter: the window holds at most `window`
    /// samples and drops any sample older than `duration` (same unit as
    /// the timestamps fed to [`add_sample_at`](Self::add_sample_at)).
    pub fn with_duration(window: usize, duration: f64, policy: P) -> Result<Self, FilterError> {
        Ok(Self {
            buffer: CircularBuffer::with_duration(window, duration)?,
            policy,
        })
    }

    /// Slides the window by one sample and returns the updated statistic.
    /// Count-mode instances only.
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::{MovingRms, Rms};
    ///
    /// let mut rms = MovingRms::new(4, Rms::new()).unwrap();
    /// for _ in 0..4 {
    ///     rms.add_sample(2.0);
    /// }
    /// assert!((rms.value() - 2.0).abs() < 1e-6);
    /// ```
    #[inline]
    pub fn add_sample(&mut self, x: f32) -> f32 {
        let evicted = self.buffer.push_overwrite(x);
        self.policy.advance(evicted, x);
        self.policy.value(&self.buffer)
    }

    /// Slides the window by one stamped sample and returns the updated
    /// statistic. Time-aware instances only.
    ///
    /// Expiry runs first: every sample older than `timestamp` minus the
    /// window duration is dropped and the policy is rebuilt from the
    /// survivors before the new sample enters. Timestamps are expected to
    /// be nondecreasing.
    pub fn add_sample_at(&mut self, x: f32, timestamp: f64) -> f32 {
        if self.buffer.expire_older_than(timestamp) > 0 {
            self.policy.rebuild(&self.buffer);
        }
        let evicted = self.buffer.push_overwrite_at(x, timestamp);
        self.policy.advance(evicted, x);
        self.policy.value(&self.buffer)
    }

    /// Processes a block in place, replacing each sample with the
    /// statistic after that sample entered the window.
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::{Mean, MovingAverage};
    ///
    /// let mut avg = MovingAverage::new(2, Mean::new()).unwrap();
    /// let mut block = [2.0, 4.0, 6.0];
    /// avg.process_block(&mut block);
    /// assert_eq!(block, [2.0, 3.0, 5.0]);
    /// ```
    pub fn process_block(&mut self, block: &mut [f32]) {
        for sample in block.iter_mut() {
            *sample = self.add_sample(*sample);
        }
    }

    /// The current statistic, without inserting anything.
    pub fn value(&self) -> f32 {
        self.policy.value(&self.buffer)
    }

    /// Read access to the policy and its accumulated statistic.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Window capacity in samples.
    pub fn window(&self) -> usize {
        self.buffer.capacity()
    }

    /// Window duration, `None` in count mode.
    pub fn duration(&self) -> Option<f64> {
        self.buffer.duration()
    }

    /// Number of samples currently in the window.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drops all samples and accumulated statistics, keeping the
    /// configuration.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.policy.clear();
    }

    /// Exports configuration, window contents and the running statistic.
    pub fn state(&self) -> RollingState<P>
    where
        P: Clone,
    {
        let buf = self.buffer.state();
        RollingState {
            window: buf.capacity,
            duration: buf.duration,
            samples: buf.samples,
            timestamps: buf.timestamps,
            policy: self.policy.clone(),
        }
    }

    /// Restores a previously exported state.
    ///
    /// Window size, mode and policy configuration must match this
    /// instance, and the restored running statistic must agree with a
    /// recomputation over the restored samples; any disagreement is a
    /// [`FilterError::StateMismatch`] and leaves the filter untouched.
    pub fn set_state(&mut self, state: RollingState<P>) -> Result<(), FilterError> {
        if !self.policy.config_matches(&state.policy) {
            return Err(FilterError::StateMismatch(
                "policy configuration does not match the live filter".into(),
            ));
        }
        let mut restored = self.buffer.clone();
        restored.set_state(CircularBufferState {
            capacity: state.window,
            duration: state.duration,
            samples: state.samples,
            timestamps: state.timestamps,
        })?;
        if !state.policy.consistent_with(&restored) {
            return Err(FilterError::StateMismatch(
                "policy statistic disagrees with the restored samples".into(),
            ));
        }
        self.buffer = restored;
        self.policy = state.policy;
        Ok(())
    }
}

/// Sliding arithmetic mean over the last `window` samples.
pub type MovingAverage = RollingFilter<Mean>;
/// Sliding RMS over the last `window` samples.
pub type MovingRms = RollingFilter<Rms>;
/// Sliding mean absolute value over the last `window` samples.
pub type MovingMav = RollingFilter<MeanAbsoluteValue>;
/// Sliding population variance over the last `window` samples.
pub type MovingVariance = RollingFilter<Variance>;
/// Standard score of each new sample against its own window.
pub type MovingZScore = RollingFilter<ZScore>;
/// Sliding sum over the last `window` samples.
pub type MovingSum = RollingFilter<Sum>;
/// Per-sample causal convolution against a fixed kernel.
pub type MovingConvolution = RollingFilter<Convolution>;
