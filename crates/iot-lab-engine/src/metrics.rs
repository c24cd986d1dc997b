//! Aggregation of per-message samples into counters and a bounded latency
//! window.
//!
//! Counters are exact for the whole run. The latency window keeps only the
//! most recent `capacity` values, so eviction affects percentile precision
//! and nothing else.

use iot_lab_abstract::{ClientId, Outcome, Sample, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Fixed-capacity FIFO buffer; the oldest value is evicted on overflow.
#[derive(Debug, Clone)]
pub struct MetricWindow<T> {
    values: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T> MetricWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            evicted: 0,
        }
    }

    /// Append `value`, returning the evicted entry if the window was full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.values.len() == self.capacity {
            self.evicted += 1;
            self.values.pop_front()
        } else {
            None
        };
        self.values.push_back(value);
        evicted
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of values dropped because the window was full.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.values.iter()
    }
}

/// Per-client ordering bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientTally {
    pub recorded: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    /// Sequence numbers skipped between consecutive samples.
    pub gaps: u64,
    /// Samples whose sequence was not above the previous one.
    pub regressions: u64,
}

impl ClientTally {
    fn observe(&mut self, sequence: u64) {
        if self.recorded == 0 {
            self.first_sequence = sequence;
        } else if sequence <= self.last_sequence {
            self.regressions += 1;
        } else {
            self.gaps += sequence - self.last_sequence - 1;
        }
        if self.recorded == 0 || sequence > self.last_sequence {
            self.last_sequence = sequence;
        }
        self.recorded += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Number of window entries the summary was computed from.
    pub samples: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p75_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencySummary {
    fn from_unsorted(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        let sum: f64 = values.iter().sum();
        Some(Self {
            samples: values.len(),
            min_ms: values[0],
            max_ms: values[values.len() - 1],
            mean_ms: sum / values.len() as f64,
            p50_ms: nearest_rank(&values, 50.0),
            p75_ms: nearest_rank(&values, 75.0),
            p90_ms: nearest_rank(&values, 90.0),
            p95_ms: nearest_rank(&values, 95.0),
            p99_ms: nearest_rank(&values, 99.0),
        })
    }
}

/// Nearest-rank percentile: `index = ceil(p/100 * n) - 1`, clamped to the slice.
///
/// `sorted` must be non-empty and ascending.
pub fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    let n = sorted.len();
    let rank = (percentile / 100.0 * n as f64).ceil() as i64 - 1;
    let index = rank.clamp(0, n as i64 - 1) as usize;
    sorted[index]
}

/// Point-in-time view of everything recorded so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub attempted: u64,
    pub succeeded: u64,
    pub errors: u64,
    pub injected_losses: u64,
    pub organic_losses: u64,
    /// Payload bytes handed to the adapter (injected drops excluded).
    pub bytes_sent: u64,
    /// Share of attempts that were not delivered, in percent.
    pub loss_percent: Option<f64>,
    /// Delivered messages per second over the observed span.
    pub throughput_per_sec: Option<f64>,
    pub latency: Option<LatencySummary>,
    pub window_capacity: usize,
    pub window_evictions: u64,
    pub first_sent_at: Option<Timestamp>,
    pub last_event_at: Option<Timestamp>,
    pub clients: BTreeMap<ClientId, ClientTally>,
}

impl Stats {
    /// Errors plus organic losses.
    pub fn failed(&self) -> u64 {
        self.errors + self.organic_losses
    }
}

#[derive(Debug, Default)]
struct Counters {
    attempted: u64,
    succeeded: u64,
    errors: u64,
    injected_losses: u64,
    organic_losses: u64,
    bytes_sent: u64,
}

#[derive(Debug)]
struct CollectorInner {
    counters: Counters,
    latency_ms: MetricWindow<f64>,
    first_sent_at: Option<Timestamp>,
    last_event_at: Option<Timestamp>,
    clients: HashMap<ClientId, ClientTally>,
}

/// Thread-safe sink shared by every client task.
///
/// Window and counters sit behind one mutex, so a snapshot never observes a
/// half-applied record.
#[derive(Debug)]
pub struct MetricsCollector {
    inner: Mutex<CollectorInner>,
}

impl MetricsCollector {
    pub fn new(window_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CollectorInner {
                counters: Counters::default(),
                latency_ms: MetricWindow::new(window_capacity),
                first_sent_at: None,
                last_event_at: None,
                clients: HashMap::new(),
            }),
        }
    }

    pub fn record(&self, sample: Sample) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let counters = &mut inner.counters;
        counters.attempted += 1;
        match sample.outcome() {
            Outcome::Ok => counters.succeeded += 1,
            Outcome::Error => counters.errors += 1,
            Outcome::InjectedLoss => counters.injected_losses += 1,
            Outcome::OrganicLoss => counters.organic_losses += 1,
        }
        if sample.outcome() != Outcome::InjectedLoss {
            counters.bytes_sent += sample.payload_len() as u64;
        }

        if let Some(latency) = sample.latency_ms() {
            inner.latency_ms.push(latency);
        }

        let sent = sample.sent_at();
        let last = sample.received_at().map_or(sent, |recv| recv.max(sent));
        inner.first_sent_at = Some(inner.first_sent_at.map_or(sent, |t| t.min(sent)));
        inner.last_event_at = Some(inner.last_event_at.map_or(last, |t| t.max(last)));

        let tally = inner.clients.entry(sample.client()).or_default();
        let regressions = tally.regressions;
        tally.observe(sample.sequence());
        if tally.regressions > regressions {
            warn!(
                client = %sample.client(),
                sequence = sample.sequence(),
                "sample recorded out of sequence order"
            );
        }
    }

    pub fn snapshot(&self) -> Stats {
        let (mut stats, window) = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let c = &inner.counters;
            let stats = Stats {
                attempted: c.attempted,
                succeeded: c.succeeded,
                errors: c.errors,
                injected_losses: c.injected_losses,
                organic_losses: c.organic_losses,
                bytes_sent: c.bytes_sent,
                loss_percent: None,
                throughput_per_sec: None,
                latency: None,
                window_capacity: inner.latency_ms.capacity(),
                window_evictions: inner.latency_ms.evicted(),
                first_sent_at: inner.first_sent_at,
                last_event_at: inner.last_event_at,
                clients: inner.clients.iter().map(|(k, v)| (*k, *v)).collect(),
            };
            let window: Vec<f64> = inner.latency_ms.iter().copied().collect();
            (stats, window)
        };

        // Sorting happens outside the lock so producers are not held up.
        stats.latency = LatencySummary::from_unsorted(window);

        if stats.attempted > 0 {
            let undelivered = stats.attempted - stats.succeeded;
            stats.loss_percent = Some(undelivered as f64 / stats.attempted as f64 * 100.0);
        }

        if stats.succeeded > 0
            && let (Some(first), Some(last)) = (stats.first_sent_at, stats.last_event_at)
            && let Some(span) = last.checked_since(first)
        {
            stats.throughput_per_sec = Some(stats.succeeded as f64 / span.as_secs_f64());
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ok_sample(client: u32, sequence: u64, sent_us: u64, latency_us: u64) -> Sample {
        Sample::new(
            ClientId(client),
            sequence,
            Timestamp::from_micros(sent_us),
            Some(Timestamp::from_micros(sent_us + latency_us)),
            Outcome::Ok,
            16,
        )
    }

    #[test]
    fn window_evicts_oldest() {
        let mut window = MetricWindow::new(3);
        assert_eq!(window.push(1), None);
        assert_eq!(window.push(2), None);
        assert_eq!(window.push(3), None);
        assert_eq!(window.push(4), Some(1));
        assert_eq!(window.len(), 3);
        assert_eq!(window.evicted(), 1);
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn nearest_rank_matches_definition() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_eq!(nearest_rank(&values, 50.0), 5.0);
        assert_eq!(nearest_rank(&values, 75.0), 8.0);
        assert_eq!(nearest_rank(&values, 90.0), 9.0);
        assert_eq!(nearest_rank(&values, 95.0), 10.0);
        assert_eq!(nearest_rank(&values, 99.0), 10.0);
        assert_eq!(nearest_rank(&values, 0.0), 1.0);

        let hundred: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(nearest_rank(&hundred, 50.0), 50.0);
        assert_eq!(nearest_rank(&hundred, 95.0), 95.0);
        assert_eq!(nearest_rank(&hundred, 99.0), 99.0);
    }

    #[test]
    fn single_sample_collapses_percentiles() {
        let collector = MetricsCollector::new(16);
        collector.record(ok_sample(0, 0, 1_000_000, 12_500));

        let latency = collector.snapshot().latency.unwrap();
        assert_eq!(latency.samples, 1);
        assert_eq!(latency.p50_ms, 12.5);
        assert_eq!(latency.p95_ms, 12.5);
        assert_eq!(latency.p99_ms, 12.5);
        assert_eq!(latency.min_ms, latency.max_ms);
    }

    #[test]
    fn eviction_never_touches_totals() {
        let collector = MetricsCollector::new(4);
        for seq in 0..10 {
            collector.record(ok_sample(0, seq, 1_000_000 + seq * 1000, (seq + 1) * 1000));
        }

        let stats = collector.snapshot();
        assert_eq!(stats.attempted, 10);
        assert_eq!(stats.succeeded, 10);
        assert_eq!(stats.window_evictions, 6);
        let latency = stats.latency.unwrap();
        assert_eq!(latency.samples, 4);
        // only the last four latencies (7..=10 ms) survive
        assert_eq!(latency.min_ms, 7.0);
        assert_eq!(latency.max_ms, 10.0);
    }

    #[test]
    fn snapshot_is_idempotent() {
        let collector = MetricsCollector::new(64);
        for seq in 0..20 {
            collector.record(ok_sample(seq as u32 % 3, seq / 3, 2_000_000 + seq * 500, 3_000));
        }
        assert_eq!(collector.snapshot(), collector.snapshot());
    }

    #[test]
    fn outcomes_feed_the_right_counters() {
        let collector = MetricsCollector::new(8);
        let t = Timestamp::from_micros(5_000_000);
        collector.record(ok_sample(0, 0, 4_000_000, 1_000));
        collector.record(Sample::new(ClientId(0), 1, t, None, Outcome::Error, 10));
        collector.record(Sample::new(ClientId(0), 2, t, None, Outcome::InjectedLoss, 10));
        collector.record(Sample::new(ClientId(0), 3, t, None, Outcome::OrganicLoss, 10));

        let stats = collector.snapshot();
        assert_eq!(stats.attempted, 4);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.injected_losses, 1);
        assert_eq!(stats.organic_losses, 1);
        assert_eq!(stats.failed(), 2);
        // injected drops never reach the adapter
        assert_eq!(stats.bytes_sent, 16 + 10 + 10);
        assert_eq!(stats.loss_percent, Some(75.0));
        assert_eq!(stats.latency.unwrap().samples, 1);
    }

    #[test]
    fn empty_collector_reports_no_derived_values() {
        let stats = MetricsCollector::new(8).snapshot();
        assert_eq!(stats.attempted, 0);
        assert!(stats.loss_percent.is_none());
        assert!(stats.throughput_per_sec.is_none());
        assert!(stats.latency.is_none());
    }

    #[test]
    fn throughput_spans_first_send_to_last_event() {
        let collector = MetricsCollector::new(8);
        // 5 deliveries between t=1.0s (first send) and t=2.0s (last receive)
        for seq in 0..5 {
            collector.record(ok_sample(0, seq, 1_000_000 + seq * 200_000, 200_000));
        }
        let stats = collector.snapshot();
        let throughput = stats.throughput_per_sec.unwrap();
        assert!((throughput - 5.0).abs() < 1e-9, "{throughput}");
    }

    #[test]
    fn tallies_track_gaps_and_regressions() {
        let collector = MetricsCollector::new(8);
        for seq in [0, 1, 2, 5, 4] {
            collector.record(ok_sample(1, seq, 1_000_000, 100));
        }
        let tally = collector.snapshot().clients[&ClientId(1)];
        assert_eq!(tally.recorded, 5);
        assert_eq!(tally.first_sequence, 0);
        assert_eq!(tally.last_sequence, 5);
        assert_eq!(tally.gaps, 2);
        assert_eq!(tally.regressions, 1);
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let collector = Arc::new(MetricsCollector::new(128));
        let handles: Vec<_> = (0..8)
            .map(|client| {
                let collector = Arc::clone(&collector);
                std::thread::spawn(move || {
                    for seq in 0..500 {
                        collector.record(ok_sample(client, seq, 1_000_000 + seq, 250));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = collector.snapshot();
        assert_eq!(stats.attempted, 4000);
        assert_eq!(stats.latency.as_ref().unwrap().samples, 128);
        for tally in stats.clients.values() {
            assert_eq!(tally.recorded, 500);
            assert_eq!(tally.gaps, 0);
            assert_eq!(tally.regressions, 0);
        }
    }
}
