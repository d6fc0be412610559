//! Per-stream progress suppression

use std::collections::{HashMap, HashSet};

/// What a progress line changed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// A new percentage for this stream
    Advanced(f32),
    /// The stream reached completion just now
    StreamCompleted,
    /// Same percentage as last time, or the stream already completed
    Repeated,
}

impl Observation {
    /// Whether the line is worth logging
    pub fn is_news(&self) -> bool {
        !matches!(self, Observation::Repeated)
    }
}

/// Tracks the last percentage seen per stream
///
/// The fetch tool redraws its progress bars many times per second; only changes are
/// reported, and each stream completes at most once.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: HashMap<String, f32>,
    completed: HashSet<String>,
}

impl ProgressTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one progress reading into the tracker
    ///
    /// # Arguments
    ///
    /// * `stream` - Stream key (kind plus label)
    /// * `percent` - Percentage printed on the line
    /// * `segments` - Completed and total segments, when printed
    pub fn observe(&mut self, stream: &str, percent: f32, segments: Option<(u64, u64)>) -> Observation {
        if self.completed.contains(stream) {
            return Observation::Repeated;
        }

        let done = percent >= 100.0 || segments.is_some_and(|(n, total)| total > 0 && n >= total);
        if done {
            self.last.insert(stream.to_string(), 100.0);
            self.completed.insert(stream.to_string());
            return Observation::StreamCompleted;
        }

        match self.last.insert(stream.to_string(), percent) {
            Some(previous) if (previous - percent).abs() < f32::EPSILON => Observation::Repeated,
            _ => Observation::Advanced(percent),
        }
    }

    /// Lowest percentage over all streams seen so far
    pub fn overall(&self) -> Option<f32> {
        self.last.values().copied().reduce(f32::min)
    }

    /// Number of streams that reached completion
    pub fn completed_streams(&self) -> usize {
        self.completed.len()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::line::{Line, classify_line};

    #[test]
    fn repeated_completion_is_suppressed() {
        let raw = "Vid 1920x1080 | 4500 Kbps ━━━━━━━━━━ 240/240 100.00%";
        let mut tracker = ProgressTracker::new();

        let mut observations = Vec::new();
        for _ in 0..2 {
            let line = classify_line(raw).unwrap();
            let key = line.stream_key().unwrap();
            let Line::Progress { percent, segments, .. } = line else {
                panic!("expected a progress line");
            };
            observations.push(tracker.observe(&key, percent, segments));
        }

        assert_eq!(observations[0], Observation::StreamCompleted);
        assert_eq!(observations[1], Observation::Repeated, "second identical line is suppressed");
        assert_eq!(tracker.completed_streams(), 1);
    }

    #[test]
    fn only_changes_are_news() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.observe("Vid a", 10.0, None), Observation::Advanced(10.0));
        assert_eq!(tracker.observe("Vid a", 10.0, None), Observation::Repeated);
        assert_eq!(tracker.observe("Aud ko", 10.0, None), Observation::Advanced(10.0), "streams are independent");
        assert_eq!(tracker.observe("Vid a", 12.5, None), Observation::Advanced(12.5));
        assert!(!Observation::Repeated.is_news());
    }

    #[test]
    fn segment_counts_complete_a_stream() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.observe("Sub ko", 99.9, Some((12, 12))), Observation::StreamCompleted);
        assert_eq!(tracker.observe("Sub ko", 100.0, Some((12, 12))), Observation::Repeated);
        assert_eq!(tracker.observe("Vid b", 0.0, Some((0, 0))), Observation::Advanced(0.0), "0/0 is not done");
    }

    #[test]
    fn overall_is_the_slowest_stream() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.overall(), None);
        tracker.observe("Vid a", 40.0, None);
        tracker.observe("Aud ko", 90.0, None);
        assert_eq!(tracker.overall(), Some(40.0));
    }
}
