//! Per-source rate limiting for outbound data streams.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::client::SubscriptionHandle;

/// One configured data stream.
///
/// `stream_id` is unique per subscription ever created, so samples queued by
/// a subscription that has since been replaced can be told apart from the
/// live one even when both share a `source`.
#[derive(Debug, Clone)]
pub struct DataSubscription {
    pub source: String,
    pub message_type: String,
    pub rate_hz: f64,
    /// Minimum spacing between forwarded samples.
    pub period: Duration,
    pub stream_id: u64,
    pub handle: Option<SubscriptionHandle>,
    pub last_sent: Option<Instant>,
}

/// Spacing for a rate in Hz, or `None` when the rate is not positive or its
/// period does not fit in a [`Duration`].
pub fn period_for(rate_hz: f64) -> Option<Duration> {
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / rate_hz).ok()
}

/// Table of active data streams keyed by source.
#[derive(Debug, Default)]
pub struct DataStreamThrottle {
    streams: HashMap<String, DataSubscription>,
}

impl DataStreamThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stream, returning the one it displaced for the same source.
    pub fn insert(&mut self, subscription: DataSubscription) -> Option<DataSubscription> {
        self.streams
            .insert(subscription.source.clone(), subscription)
    }

    /// Remove every stream, handing them back so the caller can unsubscribe.
    pub fn drain(&mut self) -> Vec<DataSubscription> {
        self.streams.drain().map(|(_, s)| s).collect()
    }

    /// Decide whether a sample from `source` received at `now` is forwarded.
    ///
    /// The first sample always passes.  Later samples pass only when
    /// strictly more than one period has elapsed since the last forwarded
    /// one.  Samples from an unknown source or a stale `stream_id` are
    /// dropped.
    pub fn admit(&mut self, source: &str, stream_id: u64, now: Instant) -> bool {
        let Some(stream) = self.streams.get_mut(source) else {
            return false;
        };
        if stream.stream_id != stream_id {
            return false;
        }
        let due = match stream.last_sent {
            None => true,
            Some(last) => now.saturating_duration_since(last) > stream.period,
        };
        if due {
            stream.last_sent = Some(now);
        }
        due
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataSubscription> {
        self.streams.values()
    }

    pub fn get(&self, source: &str) -> Option<&DataSubscription> {
        self.streams.get(source)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(source: &str, hz: f64, stream_id: u64) -> DataSubscription {
        DataSubscription {
            source: source.into(),
            message_type: "sensor_msgs/msg/Temperature".into(),
            rate_hz: hz,
            period: period_for(hz).unwrap(),
            stream_id,
            handle: None,
            last_sent: None,
        }
    }

    #[test]
    fn forwards_at_most_once_per_period() {
        let mut throttle = DataStreamThrottle::new();
        throttle.insert(stream("/temp", 2.0, 1));
        let t0 = Instant::now();

        let forwarded: Vec<u64> = [0u64, 100, 400, 600, 1200]
            .into_iter()
            .filter(|ms| throttle.admit("/temp", 1, t0 + Duration::from_millis(*ms)))
            .collect();
        assert_eq!(forwarded, [0, 600, 1200]);
    }

    #[test]
    fn exactly_one_period_is_not_enough() {
        let mut throttle = DataStreamThrottle::new();
        throttle.insert(stream("/temp", 2.0, 1));
        let t0 = Instant::now();
        assert!(throttle.admit("/temp", 1, t0));
        assert!(!throttle.admit("/temp", 1, t0 + Duration::from_millis(500)));
        assert!(throttle.admit("/temp", 1, t0 + Duration::from_millis(501)));
    }

    #[test]
    fn unknown_and_stale_sources_are_dropped() {
        let mut throttle = DataStreamThrottle::new();
        throttle.insert(stream("/temp", 1.0, 7));
        let now = Instant::now();
        assert!(!throttle.admit("/other", 7, now));
        assert!(!throttle.admit("/temp", 6, now));
        assert!(throttle.admit("/temp", 7, now));
    }

    #[test]
    fn insert_reports_displaced_stream() {
        let mut throttle = DataStreamThrottle::new();
        assert!(throttle.insert(stream("/a", 1.0, 1)).is_none());
        let old = throttle.insert(stream("/a", 5.0, 2)).unwrap();
        assert_eq!(old.stream_id, 1);
        assert_eq!(throttle.len(), 1);
        assert_eq!(throttle.get("/a").unwrap().rate_hz, 5.0);
    }

    #[test]
    fn rates_without_a_representable_period_are_refused() {
        assert_eq!(period_for(4.0), Some(Duration::from_millis(250)));
        assert_eq!(period_for(0.0), None);
        assert_eq!(period_for(-1.0), None);
        assert_eq!(period_for(f64::NAN), None);
        assert_eq!(period_for(f64::INFINITY), None);
        assert_eq!(period_for(1e-20), None);
    }

    #[test]
    fn drain_empties_the_table() {
        let mut throttle = DataStreamThrottle::new();
        throttle.insert(stream("/a", 1.0, 1));
        throttle.insert(stream("/b", 1.0, 2));
        let drained = throttle.drain();
        assert_eq!(drained.len(), 2);
        assert!(throttle.is_empty());
    }
}
