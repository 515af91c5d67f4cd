//! Fixed-capacity sample ring with optional timestamp-based expiry.

use serde::{Deserialize, Serialize};

use crate::error::FilterError;

/// Fixed-capacity circular buffer of samples, the state store behind every
/// sliding-window filter.
///
/// Two mutually exclusive modes, chosen at construction:
///
/// - **count mode** ([`CircularBuffer::new`]): a plain overwrite ring.
///   Once full, every push evicts exactly one oldest sample.
/// - **time-aware mode** ([`CircularBuffer::with_duration`]): each slot
///   additionally carries an `f64` timestamp, and
///   [`expire_older_than`](CircularBuffer::expire_older_than) evicts every
///   sample older than the window duration. Expiry runs before any
///   insertion; the push itself still evicts the oldest sample when the
///   ring is full.
///
/// Samples are always observed oldest-to-newest: [`peek`](Self::peek)
/// returns the oldest live sample, [`iter`](Self::iter) and
/// [`to_vec`](Self::to_vec) walk from oldest to newest, and
/// [`as_slices`](Self::as_slices) exposes the same order as at most two
/// contiguous runs for vectorized consumers.
///
/// # Example
///
/// ```
/// use millrace::CircularBuffer;
///
/// let mut buf = CircularBuffer::new(3).unwrap();
/// buf.push_overwrite(1.0);
/// buf.push_overwrite(2.0);
/// buf.push_overwrite(3.0);
///
/// // Full: the next push evicts the oldest sample.
/// assert_eq!(buf.push_overwrite(4.0), Some(1.0));
/// assert_eq!(buf.peek(), Some(2.0));
/// assert_eq!(buf.to_vec(), vec![2.0, 3.0, 4.0]);
/// ```
#[derive(Debug, Clone)]
pub struct CircularBuffer {
    data: Vec<f32>,
    stamps: Vec<f64>,
    duration: Option<f64>,
    head: usize,
    len: usize,
}

/// Serializable snapshot of a [`CircularBuffer`].
///
/// Field order is the emission order: configuration first, contents after.
/// Expiry compares timestamps exactly, so a transport must round-trip the
/// `f64` values bit for bit (for JSON that means an exact float parser).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircularBufferState {
    /// Configured capacity in samples.
    pub capacity: usize,
    /// Window duration for time-aware instances, `None` in count mode.
    pub duration: Option<f64>,
    /// Live samples, oldest to newest.
    pub samples: Vec<f32>,
    /// Per-sample timestamps, present exactly when `duration` is.
    pub timestamps: Option<Vec<f64>>,
}

impl CircularBuffer {
    /// Creates a count-mode ring holding up to `capacity` samples.
    ///
    /// A zero capacity is rejected as a configuration error.
    pub fn new(capacity: usize) -> Result<Self, FilterError> {
        if capacity == 0 {
            return Err(FilterError::Configuration(
                "buffer capacity must be at least 1".into(),
            ));
        }
        Ok(Self {
            data: vec![0.0; capacity],
            stamps: Vec::new(),
            duration: None,
            head: 0,
            len: 0,
        })
    }

    /// Creates a time-aware ring: up to `capacity` samples, each stamped,
    /// expirable against a window of `duration` (same unit as the stamps).
    pub fn with_duration(capacity: usize, duration: f64) -> Result<Self, FilterError> {
        if capacity == 0 {
            return Err(FilterError::Configuration(
                "buffer capacity must be at least 1".into(),
            ));
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(FilterError::Configuration(format!(
                "window duration must be positive and finite, got {duration}"
            )));
        }
        Ok(Self {
            data: vec![0.0; capacity],
            stamps: vec![0.0; capacity],
            duration: Some(duration),
            head: 0,
            len: 0,
        })
    }

    /// Inserts a sample, evicting and returning the oldest one when full.
    /// Count-mode instances only.
    #[inline]
    pub fn push_overwrite(&mut self, value: f32) -> Option<f32> {
        debug_assert!(self.duration.is_none());
        let cap = self.data.len();
        if self.len == cap {
            let evicted = self.data[self.head];
            self.data[self.head] = value;
            self.head = (self.head + 1) % cap;
            Some(evicted)
        } else {
            self.data[(self.head + self.len) % cap] = value;
            self.len += 1;
            None
        }
    }

    /// Inserts a stamped sample, evicting and returning the oldest one when
    /// full. Time-aware instances only; callers are expected to run
    /// [`expire_older_than`](Self::expire_older_than) first.
    #[inline]
    pub fn push_overwrite_at(&mut self, value: f32, timestamp: f64) -> Option<f32> {
        debug_assert!(self.duration.is_some());
        let cap = self.data.len();
        if self.len == cap {
            let evicted = self.data[self.head];
            self.data[self.head] = value;
            self.stamps[self.head] = timestamp;
            self.head = (self.head + 1) % cap;
            Some(evicted)
        } else {
            let slot = (self.head + self.len) % cap;
            self.data[slot] = value;
            self.stamps[slot] = timestamp;
            self.len += 1;
            None
        }
    }

    /// Evicts every sample whose timestamp is older than `now` minus the
    /// window duration, returning how many were removed. Time-aware
    /// instances only; count-mode instances never expire anything.
    pub fn expire_older_than(&mut self, now: f64) -> usize {
        let Some(duration) = self.duration else {
            return 0;
        };
        let cutoff = now - duration;
        let cap = self.data.len();
        let mut evicted = 0;
        while self.len > 0 && self.stamps[self.head] < cutoff {
            self.head = (self.head + 1) % cap;
            self.len -= 1;
            evicted += 1;
        }
        evicted
    }

    /// The oldest live sample, or `None` when empty.
    #[inline]
    pub fn peek(&self) -> Option<f32> {
        if self.len == 0 {
            None
        } else {
            Some(self.data[self.head])
        }
    }

    /// The newest live sample, or `None` when empty.
    #[inline]
    pub fn newest(&self) -> Option<f32> {
        if self.len == 0 {
            None
        } else {
            Some(self.data[(self.head + self.len - 1) % self.data.len()])
        }
    }

    /// The `i`-th live sample counting from the oldest.
    #[inline]
    pub fn get(&self, i: usize) -> Option<f32> {
        if i < self.len {
            Some(self.data[(self.head + i) % self.data.len()])
        } else {
            None
        }
    }

    /// Iterates the live samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        let (a, b) = self.as_slices();
        a.iter().chain(b.iter()).copied()
    }

    /// The live samples as at most two contiguous runs, oldest-to-newest:
    /// every sample of the first slice precedes every sample of the second.
    #[inline]
    pub fn as_slices(&self) -> (&[f32], &[f32]) {
        let cap = self.data.len();
        let first = self.len.min(cap - self.head);
        (
            &self.data[self.head..self.head + first],
            &self.data[..self.len - first],
        )
    }

    /// Copies the live samples out, oldest to newest.
    pub fn to_vec(&self) -> Vec<f32> {
        let (a, b) = self.as_slices();
        let mut out = Vec::with_capacity(self.len);
        out.extend_from_slice(a);
        out.extend_from_slice(b);
        out
    }

    /// Replaces the contents with `samples` (oldest first). Longer inputs
    /// are truncated to the most recent `capacity` elements, order
    /// preserved; shorter inputs leave the ring partially filled.
    /// Count-mode instances only.
    pub fn load(&mut self, samples: &[f32]) {
        debug_assert!(self.duration.is_none());
        let cap = self.data.len();
        let keep = if samples.len() > cap {
            &samples[samples.len() - cap..]
        } else {
            samples
        };
        self.data[..keep.len()].copy_from_slice(keep);
        self.head = 0;
        self.len = keep.len();
    }

    /// Time-aware twin of [`load`](Self::load): replaces samples and their
    /// timestamps together. Both slices must have equal length.
    pub fn load_timestamped(&mut self, samples: &[f32], timestamps: &[f64]) {
        debug_assert!(self.duration.is_some());
        debug_assert_eq!(samples.len(), timestamps.len());
        let cap = self.data.len();
        let skip = samples.len().saturating_sub(cap);
        let keep = samples.len() - skip;
        self.data[..keep].copy_from_slice(&samples[skip..]);
        self.stamps[..keep].copy_from_slice(&timestamps[skip..]);
        self.head = 0;
        self.len = keep;
    }

    /// Number of live samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the ring holds no samples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the next push will evict.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    /// Configured capacity in samples.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Window duration, `None` in count mode.
    #[inline]
    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Whether this instance is time-aware.
    #[inline]
    pub fn is_time_aware(&self) -> bool {
        self.duration.is_some()
    }

    /// Drops all samples, keeping the configuration.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Exports contents and configuration for serialization.
    pub fn state(&self) -> CircularBufferState {
        let timestamps = self.duration.map(|_| {
            let cap = self.data.len();
            (0..self.len)
                .map(|i| self.stamps[(self.head + i) % cap])
                .collect()
        });
        CircularBufferState {
            capacity: self.data.len(),
            duration: self.duration,
            samples: self.to_vec(),
            timestamps,
        }
    }

    /// Restores a previously exported state.
    ///
    /// The declared capacity and mode must agree with this instance;
    /// anything else is a [`FilterError::StateMismatch`]. A successful
    /// restore reproduces contents, order, count, and eviction order.
    pub fn set_state(&mut self, state: CircularBufferState) -> Result<(), FilterError> {
        if state.capacity != self.data.len() {
            return Err(FilterError::StateMismatch(format!(
                "buffer capacity {} does not match configured capacity {}",
                state.capacity,
                self.data.len()
            )));
        }
        if state.duration != self.duration {
            return Err(FilterError::StateMismatch(format!(
                "buffer window mode {:?} does not match configured mode {:?}",
                state.duration, self.duration
            )));
        }
        if state.samples.len() > state.capacity {
            return Err(FilterError::StateMismatch(format!(
                "restored sample count {} exceeds capacity {}",
                state.samples.len(),
                state.capacity
            )));
        }
        match (&state.timestamps, self.duration) {
            (Some(stamps), Some(_)) => {
                if stamps.len() != state.samples.len() {
                    return Err(FilterError::StateMismatch(format!(
                        "restored timestamp count {} does not match sample count {}",
                        stamps.len(),
                        state.samples.len()
                    )));
                }
                self.load_timestamped(&state.samples, stamps);
            }
            (None, None) => self.load(&state.samples),
            _ => {
                return Err(FilterError::StateMismatch(
                    "timestamp presence does not match buffer mode".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_until_full_then_evict_oldest() {
        let mut buf = CircularBuffer::new(3).unwrap();
        assert_eq!(buf.push_overwrite(1.0), None);
        assert_eq!(buf.push_overwrite(2.0), None);
        assert_eq!(buf.push_overwrite(3.0), None);
        assert!(buf.is_full());

        // Each further push evicts exactly one oldest sample.
        assert_eq!(buf.push_overwrite(4.0), Some(1.0));
        assert_eq!(buf.push_overwrite(5.0), Some(2.0));
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.to_vec(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_peek_and_newest() {
        let mut buf = CircularBuffer::new(4).unwrap();
        assert_eq!(buf.peek(), None);
        assert_eq!(buf.newest(), None);

        buf.push_overwrite(1.0);
        buf.push_overwrite(2.0);
        assert_eq!(buf.peek(), Some(1.0));
        assert_eq!(buf.newest(), Some(2.0));

        for i in 3..10 {
            buf.push_overwrite(i as f32);
        }
        assert_eq!(buf.peek(), Some(6.0));
        assert_eq!(buf.newest(), Some(9.0));
    }

    #[test]
    fn test_get_indexes_oldest_first() {
        let mut buf = CircularBuffer::new(3).unwrap();
        for i in 0..5 {
            buf.push_overwrite(i as f32);
        }
        assert_eq!(buf.get(0), Some(2.0));
        assert_eq!(buf.get(1), Some(3.0));
        assert_eq!(buf.get(2), Some(4.0));
        assert_eq!(buf.get(3), None);
    }

    #[test]
    fn test_as_slices_order_across_wrap() {
        let mut buf = CircularBuffer::new(4).unwrap();
        for i in 0..6 {
            buf.push_overwrite(i as f32);
        }
        let (a, b) = buf.as_slices();
        let mut joined = a.to_vec();
        joined.extend_from_slice(b);
        assert_eq!(joined, vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(buf.iter().collect::<Vec<_>>(), joined);
    }

    #[test]
    fn test_load_round_trip() {
        let mut buf = CircularBuffer::new(5).unwrap();
        for i in 0..7 {
            buf.push_overwrite(i as f32);
        }
        let exported = buf.to_vec();

        let mut restored = CircularBuffer::new(5).unwrap();
        restored.load(&exported);
        assert_eq!(restored.to_vec(), exported);
        assert_eq!(restored.len(), 5);

        // Eviction order is preserved after the restore.
        assert_eq!(restored.push_overwrite(99.0), Some(2.0));
    }

    #[test]
    fn test_load_truncates_to_most_recent() {
        let mut buf = CircularBuffer::new(3).unwrap();
        buf.load(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(buf.to_vec(), vec![3.0, 4.0, 5.0]);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_load_shorter_than_capacity() {
        let mut buf = CircularBuffer::new(8).unwrap();
        buf.load(&[1.0, 2.0]);
        assert_eq!(buf.len(), 2);
        assert!(!buf.is_full());
        assert_eq!(buf.to_vec(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            CircularBuffer::new(0),
            Err(FilterError::Configuration(_))
        ));
        assert!(matches!(
            CircularBuffer::with_duration(0, 1.0),
            Err(FilterError::Configuration(_))
        ));
        assert!(matches!(
            CircularBuffer::with_duration(4, 0.0),
            Err(FilterError::Configuration(_))
        ));
        assert!(matches!(
            CircularBuffer::with_duration(4, f64::NAN),
            Err(FilterError::Configuration(_))
        ));
    }

    #[test]
    fn test_expiry_keeps_only_window() {
        // 1-second window; samples every 0.25 s.
        let mut buf = CircularBuffer::with_duration(16, 1.0).unwrap();
        for i in 0..12 {
            let t = i as f64 * 0.25;
            buf.expire_older_than(t);
            buf.push_overwrite_at(i as f32, t);
        }
        // At t = 2.75 the cutoff is 1.75. Eviction is strictly older-than,
        // so the sample stamped exactly 1.75 stays: 1.75..=2.75 remain.
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.to_vec(), vec![7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_expiry_cutoff_is_exclusive() {
        let mut buf = CircularBuffer::with_duration(4, 1.0).unwrap();
        buf.push_overwrite_at(1.0, 0.0);
        buf.push_overwrite_at(2.0, 1.0);
        // The cutoff lands exactly on the oldest stamp; only stamps
        // strictly below it go.
        assert_eq!(buf.expire_older_than(1.0), 0);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.expire_older_than(1.0 + 1e-9), 1);
        assert_eq!(buf.to_vec(), vec![2.0]);
    }

    #[test]
    fn test_expiry_reports_eviction_count() {
        let mut buf = CircularBuffer::with_duration(8, 1.0).unwrap();
        for i in 0..4 {
            buf.push_overwrite_at(i as f32, i as f64 * 0.1);
        }
        // Jump far ahead: everything is stale.
        assert_eq!(buf.expire_older_than(10.0), 4);
        assert!(buf.is_empty());
        assert_eq!(buf.expire_older_than(10.0), 0);
    }

    #[test]
    fn test_count_mode_never_expires() {
        let mut buf = CircularBuffer::new(4).unwrap();
        buf.push_overwrite(1.0);
        assert_eq!(buf.expire_older_than(1e9), 0);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut buf = CircularBuffer::new(4).unwrap();
        for i in 0..4 {
            buf.push_overwrite(i as f32);
        }
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.peek(), None);
        buf.push_overwrite(7.0);
        assert_eq!(buf.to_vec(), vec![7.0]);
    }

    #[test]
    fn test_state_round_trip_count_mode() {
        let mut buf = CircularBuffer::new(4).unwrap();
        for i in 0..6 {
            buf.push_overwrite(i as f32);
        }
        let state = buf.state();
        assert_eq!(state.capacity, 4);
        assert_eq!(state.duration, None);
        assert_eq!(state.timestamps, None);

        let mut restored = CircularBuffer::new(4).unwrap();
        restored.set_state(state).unwrap();
        assert_eq!(restored.to_vec(), buf.to_vec());
        assert_eq!(restored.push_overwrite(9.0), buf.push_overwrite(9.0));
    }

    #[test]
    fn test_state_round_trip_time_aware() {
        let mut buf = CircularBuffer::with_duration(4, 2.0).unwrap();
        for i in 0..3 {
            buf.push_overwrite_at(i as f32, i as f64);
        }
        let state = buf.state();
        let mut restored = CircularBuffer::with_duration(4, 2.0).unwrap();
        restored.set_state(state).unwrap();

        // Expiry behaves identically after the restore.
        assert_eq!(restored.expire_older_than(3.5), buf.expire_older_than(3.5));
        assert_eq!(restored.to_vec(), buf.to_vec());
    }

    #[test]
    fn test_json_state_preserves_timestamp_bits() {
        // Stamps at 0.05 steps are mostly not exactly representable; the
        // JSON transport must hand back identical bit patterns, or a
        // stamp landing exactly on a later cutoff flips its eviction.
        let mut buf = CircularBuffer::with_duration(80, 4.0).unwrap();
        for i in 0..80 {
            buf.push_overwrite_at(i as f32, i as f64 * 0.05);
        }

        let state = buf.state();
        let json = serde_json::to_string(&state).unwrap();
        let decoded: CircularBufferState = serde_json::from_str(&json).unwrap();

        let original = state.timestamps.as_ref().unwrap();
        let reparsed = decoded.timestamps.as_ref().unwrap();
        assert_eq!(original.len(), reparsed.len());
        for (i, (a, b)) in original.iter().zip(reparsed).enumerate() {
            assert_eq!(a.to_bits(), b.to_bits(), "stamp {i}: {a} vs {b}");
        }
    }

    #[test]
    fn test_state_capacity_mismatch_rejected() {
        let buf = CircularBuffer::new(4).unwrap();
        let state = buf.state();
        let mut other = CircularBuffer::new(8).unwrap();
        assert!(matches!(
            other.set_state(state),
            Err(FilterError::StateMismatch(_))
        ));
    }

    #[test]
    fn test_state_mode_mismatch_rejected() {
        let buf = CircularBuffer::new(4).unwrap();
        let mut timed = CircularBuffer::with_duration(4, 1.0).unwrap();
        assert!(matches!(
            timed.set_state(buf.state()),
            Err(FilterError::StateMismatch(_))
        ));

        let timed2 = CircularBuffer::with_duration(4, 1.0).unwrap();
        let mut plain = CircularBuffer::new(4).unwrap();
        assert!(matches!(
            plain.set_state(timed2.state()),
            Err(FilterError::StateMismatch(_))
        ));

        // Same mode but a different window duration is still a mismatch.
        let timed3 = CircularBuffer::with_duration(4, 1.0).unwrap();
        let mut other_duration = CircularBuffer::with_duration(4, 2.0).unwrap();
        assert!(matches!(
            other_duration.set_state(timed3.state()),
            Err(FilterError::StateMismatch(_))
        ));
    }

    #[test]
    fn test_state_oversized_contents_rejected() {
        let mut buf = CircularBuffer::new(4).unwrap();
        let state = CircularBufferState {
            capacity: 4,
            duration: None,
            samples: vec![0.0; 5],
            timestamps: None,
        };
        assert!(matches!(
            buf.set_state(state),
            Err(FilterError::StateMismatch(_))
        ));
    }
}
