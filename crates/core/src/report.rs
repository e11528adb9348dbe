//! Per-interval latency summary of a drained simulation.

use std::{collections::BTreeMap, path::Path, time::Duration};

use serde::{Serialize, Serializer};

use crate::event::EventResult;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed writing report: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed serializing report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Latency statistics of the events emitted during one interval step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntervalLatency {
    pub interval: usize,
    pub count: usize,
    #[serde(rename = "mean_ns", serialize_with = "as_nanos")]
    pub mean: Duration,
    #[serde(rename = "median_ns", serialize_with = "as_nanos")]
    pub median: Duration,
    #[serde(rename = "p95_ns", serialize_with = "as_nanos")]
    pub p95: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LatencyReport {
    pub events: usize,
    /// Sorted by interval index.
    pub intervals: Vec<IntervalLatency>,
}

impl LatencyReport {
    pub fn from_results(results: &[EventResult]) -> Self {
        let mut by_interval: BTreeMap<usize, Vec<Duration>> = BTreeMap::new();
        for result in results {
            by_interval
                .entry(result.event.interval)
                .or_default()
                .push(result.latency());
        }

        let intervals = by_interval
            .into_iter()
            .map(|(interval, mut latencies)| {
                latencies.sort_unstable();
                IntervalLatency {
                    interval,
                    count: latencies.len(),
                    mean: mean(&latencies),
                    median: median(&latencies),
                    p95: percentile_95(&latencies),
                }
            })
            .collect();

        Self {
            events: results.len(),
            intervals,
        }
    }
}

/// Summarizes `results` and writes the report to `path` as JSON.
pub fn write_report(results: &[EventResult], path: impl AsRef<Path>) -> Result<(), ReportError> {
    let report = LatencyReport::from_results(results);
    let file = std::io::BufWriter::new(std::fs::File::create(path.as_ref())?);
    serde_json::to_writer_pretty(file, &report)?;
    tracing::info!(
        path = %path.as_ref().display(),
        events = report.events,
        intervals = report.intervals.len(),
        "latency report written"
    );
    Ok(())
}

fn mean(sorted: &[Duration]) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let sum: u128 = sorted.iter().map(Duration::as_nanos).sum();
    Duration::from_nanos(u64::try_from(sum / sorted.len() as u128).unwrap_or(u64::MAX))
}

fn median(sorted: &[Duration]) -> Duration {
    let middle = sorted.len() / 2;
    match sorted.len() {
        0 => Duration::ZERO,
        n if n % 2 == 0 => (sorted[middle - 1] + sorted[middle]) / 2,
        _ => sorted[middle],
    }
}

fn percentile_95(sorted: &[Duration]) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let index = (0.95 * (sorted.len() - 1) as f64) as usize;
    sorted[index]
}

fn as_nanos<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::event::Event;

    fn result(interval: usize, latency_us: u64) -> EventResult {
        let created_at = Instant::now();
        EventResult {
            event: Event {
                created_at,
                interval,
                source: 0,
                sequence: 0,
            },
            handled_at: created_at + Duration::from_micros(latency_us),
        }
    }

    #[test]
    fn statistics_of_sorted_samples() {
        let odd: Vec<_> = [1, 3, 8].map(Duration::from_micros).to_vec();
        assert_eq!(mean(&odd), Duration::from_micros(4));
        assert_eq!(median(&odd), Duration::from_micros(3));
        // truncated to whole nanoseconds
        let thirds: Vec<_> = [1, 3, 9].map(Duration::from_micros).to_vec();
        assert_eq!(mean(&thirds), Duration::from_nanos(4_333));

        let even: Vec<_> = [1, 2, 4, 10].map(Duration::from_micros).to_vec();
        assert_eq!(median(&even), Duration::from_micros(3));

        let hundred: Vec<_> = (1..=100).map(Duration::from_micros).collect();
        // floor(0.95 * 99) = 94
        assert_eq!(percentile_95(&hundred), Duration::from_micros(95));

        assert_eq!(mean(&[]), Duration::ZERO);
        assert_eq!(median(&[]), Duration::ZERO);
        assert_eq!(percentile_95(&[]), Duration::ZERO);
    }

    #[test]
    fn groups_by_interval_in_order() {
        let results = [
            result(2, 40),
            result(0, 10),
            result(2, 20),
            result(0, 30),
            result(1, 5),
        ];
        let report = LatencyReport::from_results(&results);

        assert_eq!(report.events, 5);
        let intervals: Vec<_> = report.intervals.iter().map(|i| i.interval).collect();
        assert_eq!(intervals, vec![0, 1, 2]);

        let first = report.intervals[0];
        assert_eq!(first.count, 2);
        assert_eq!(first.mean, Duration::from_micros(20));
        assert_eq!(first.median, Duration::from_micros(20));
        assert_eq!(first.p95, Duration::from_micros(10));

        let last = report.intervals[2];
        assert_eq!(last.count, 2);
        assert_eq!(last.mean, Duration::from_micros(30));
    }

    #[test]
    fn empty_results_give_empty_report() {
        assert_eq!(LatencyReport::from_results(&[]), LatencyReport::default());
    }

    #[test]
    fn report_is_written_as_json() -> testresult::TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("report.json");
        write_report(&[result(0, 10), result(0, 30)], &path)?;

        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(written["events"], 2);
        assert_eq!(written["intervals"][0]["interval"], 0);
        assert_eq!(written["intervals"][0]["mean_ns"], 20_000);
        assert_eq!(written["intervals"][0]["median_ns"], 20_000);
        Ok(())
    }

    #[test]
    fn unwritable_destination_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("report.json");
        assert!(matches!(
            write_report(&[result(0, 1)], path),
            Err(ReportError::Io(_))
        ));
    }
}
