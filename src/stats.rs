//! Sampled statistics published by the stages.

use serde::{Deserialize, Serialize};

/// Number of samples kept by the rolling statistics of a stage.
pub const STATISTICS_WINDOW_SIZE: usize = 128;

/// Rolling window over the most recent `N` samples.
#[derive(Debug, Clone)]
pub struct AverageWindow<const N: usize> {
    samples: [f64; N],
    next: usize,
    count: usize,
    total: f64,
    most_recent: f64,
}

impl<const N: usize> AverageWindow<N> {
    /// Create an empty window.
    pub fn new() -> Self {
        Self { samples: [0.0; N], next: 0, count: 0, total: 0.0, most_recent: 0.0 }
    }

    /// Add a sample, dropping the oldest one once the window is full.
    pub fn push_sample(&mut self, value: f64) {
        if N == 0 {
            return;
        }
        if self.count == N {
            self.total -= self.samples[self.next];
        } else {
            self.count += 1;
        }
        self.samples[self.next] = value;
        self.total += value;
        self.most_recent = value;
        self.next = (self.next + 1) % N;
    }

    /// Number of samples in the window.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no samples have been pushed.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Sum of the samples in the window.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Average of the samples in the window, or 0.0 when empty.
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }

    /// Smallest sample in the window, or 0.0 when empty.
    pub fn minimum(&self) -> f64 {
        self.window().iter().copied().reduce(f64::min).unwrap_or(0.0)
    }

    /// Largest sample in the window, or 0.0 when empty.
    pub fn maximum(&self) -> f64 {
        self.window().iter().copied().reduce(f64::max).unwrap_or(0.0)
    }

    /// The last pushed sample.
    pub fn most_recent_sample(&self) -> f64 {
        self.most_recent
    }

    fn window(&self) -> &[f64] {
        &self.samples[..self.count]
    }
}

impl<const N: usize> Default for AverageWindow<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Value of a published statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatisticValue {
    /// Plain count or gauge.
    Integer(i64),
    /// Number of bytes.
    ByteSize(u64),
    /// Fraction in [0, 1] with the window's extremes.
    PercentageRange {
        /// Average over the window.
        average: f64,
        /// Smallest sample.
        minimum: f64,
        /// Largest sample.
        maximum: f64,
    },
    /// On/off setting.
    Boolean(bool),
    /// Free text.
    Text(String),
}

/// A named value reported by a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    /// Name of the stage that owns the value.
    pub owner: String,
    /// Name of the value.
    pub name: String,
    /// The value itself.
    pub value: StatisticValue,
}

impl Statistic {
    /// Create a statistic.
    pub fn new(owner: impl Into<String>, name: impl Into<String>, value: StatisticValue) -> Self {
        Self { owner: owner.into(), name: name.into(), value }
    }

    /// Create an integer statistic.
    pub fn integer(owner: impl Into<String>, name: impl Into<String>, value: i64) -> Self {
        Self::new(owner, name, StatisticValue::Integer(value))
    }

    /// Create a byte size statistic.
    pub fn byte_size(owner: impl Into<String>, name: impl Into<String>, value: u64) -> Self {
        Self::new(owner, name, StatisticValue::ByteSize(value))
    }

    /// Create a boolean statistic.
    pub fn boolean(owner: impl Into<String>, name: impl Into<String>, value: bool) -> Self {
        Self::new(owner, name, StatisticValue::Boolean(value))
    }

    /// Create a text statistic.
    pub fn text(owner: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(owner, name, StatisticValue::Text(value.into()))
    }

    /// Create a percentage statistic from a rolling window.
    pub fn percentage<const N: usize>(
        owner: impl Into<String>,
        name: impl Into<String>,
        window: &AverageWindow<N>,
    ) -> Self {
        Self::new(
            owner,
            name,
            StatisticValue::PercentageRange {
                average: window.average(),
                minimum: window.minimum(),
                maximum: window.maximum(),
            },
        )
    }
}

/// Find a statistic by owner and name.
pub fn find<'a>(statistics: &'a [Statistic], owner: &str, name: &str) -> Option<&'a Statistic> {
    statistics.iter().find(|s| s.owner == owner && s.name == name)
}
