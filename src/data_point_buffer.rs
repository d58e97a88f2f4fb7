//! A bounded, time-ordered window of samples for one named data point.
//!
//! The buffer is a cheap handle around shared state: the connection's reader
//! thread appends while the display side takes snapshots, so clones of a
//! [`DataPointBuffer`] all see the same samples.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// One `(time, value)` pair. Time is in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Seconds since the start of the run, as reported by the bench.
    pub time: f64,
    /// Measured value.
    pub value: f64,
}

#[derive(Debug)]
struct Window {
    samples: VecDeque<Sample>,
    capacity: usize,
}

/// Thread-safe ring of the most recent samples of a data point.
#[derive(Debug, Clone)]
pub struct DataPointBuffer {
    name: Arc<str>,
    inner: Arc<Mutex<Window>>,
}

impl DataPointBuffer {
    /// An empty buffer keeping at most `capacity` samples (at least one).
    pub fn new(name: &str, capacity: usize) -> Self {
        DataPointBuffer {
            name: Arc::from(name),
            inner: Arc::new(Mutex::new(Window {
                samples: VecDeque::with_capacity(capacity.clamp(1, 4096)),
                capacity: capacity.max(1),
            })),
        }
    }

    /// Builds a buffer holding `samples`, keeping only the newest `capacity`.
    /// Samples that go back in time are skipped, the same as with
    /// [`DataPointBuffer::add_value`].
    pub fn from_samples(name: &str, capacity: usize, samples: &[Sample]) -> Self {
        let buffer = Self::new(name, capacity);
        for s in samples {
            buffer.add_value(s.time, s.value);
        }
        buffer
    }

    fn window(&self) -> MutexGuard<'_, Window> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name of the data point this buffer holds.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a sample, evicting the oldest one once full. A sample older
    /// than the newest one already stored is rejected and `false` returned.
    pub fn add_value(&self, time: f64, value: f64) -> bool {
        let mut window = self.window();
        if let Some(last) = window.samples.back() {
            if time < last.time {
                return false;
            }
        }
        if window.samples.len() == window.capacity {
            window.samples.pop_front();
        }
        window.samples.push_back(Sample { time, value });
        true
    }

    /// Drops every sample.
    pub fn clear_buffer(&self) {
        self.window().samples.clear();
    }

    /// Changes the capacity, discarding the oldest samples if it shrinks.
    pub fn set_capacity(&self, capacity: usize) {
        let mut window = self.window();
        window.capacity = capacity.max(1);
        while window.samples.len() > window.capacity {
            window.samples.pop_front();
        }
    }

    /// Maximum number of samples kept.
    pub fn capacity(&self) -> usize {
        self.window().capacity
    }

    /// Number of samples currently stored.
    pub fn len(&self) -> usize {
        self.window().samples.len()
    }

    /// Whether no sample is stored.
    pub fn is_empty(&self) -> bool {
        self.window().samples.is_empty()
    }

    /// The newest sample, if any.
    pub fn latest(&self) -> Option<Sample> {
        self.window().samples.back().copied()
    }

    /// A copy of the samples, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.window().samples.iter().copied().collect()
    }

    /// Iterates over a snapshot, so the lock is not held while iterating.
    pub fn iter(&self) -> std::vec::IntoIter<Sample> {
        self.snapshot().into_iter()
    }

    /// Sample times, oldest first.
    pub fn times(&self) -> Vec<f64> {
        self.window().samples.iter().map(|s| s.time).collect()
    }

    /// Sample values, oldest first.
    pub fn values(&self) -> Vec<f64> {
        self.window().samples.iter().map(|s| s.value).collect()
    }
}
