use std::time::Duration;

use crate::config::{ConfigError, SimulatorConfig};

/// Upper bound for a single source's channel buffer.
const MAX_CHANNEL_CAPACITY: u64 = 1 << 20;

/// Closed-form estimate of a simulation's size, derived from its configuration.
///
/// Only used to size channel buffers; jitter can push the real event count
/// above these numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Number of interval decays a source goes through before retiring.
    pub step_count: u64,
    /// Events per update period at the slowest (initial) interval.
    pub min_samples_per_step: u64,
    /// Events per update period at the fastest (final) interval.
    pub max_samples_per_step: u64,
    pub events_per_source: u64,
    pub total_events: u64,
    pub estimated_runtime: Duration,
}

impl Stats {
    pub fn estimate(config: &SimulatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let min_interval = config.min_interval.as_nanos();
        let max_interval = config.max_interval.as_nanos();
        let update_rate = config.update_rate.as_nanos();

        let step_count = (max_interval - min_interval) / config.interval_step.as_nanos();
        let min_samples_per_step = update_rate / max_interval;
        let max_samples_per_step = update_rate / min_interval;
        let events_per_source = step_count
            .saturating_mul(min_samples_per_step.saturating_add(max_samples_per_step))
            / 2;
        let total_events = events_per_source.saturating_mul(config.source_count as u128);
        let runtime_nanos = step_count.saturating_mul(update_rate);

        Ok(Self {
            step_count: saturate(step_count),
            min_samples_per_step: saturate(min_samples_per_step),
            max_samples_per_step: saturate(max_samples_per_step),
            events_per_source: saturate(events_per_source),
            total_events: saturate(total_events),
            estimated_runtime: Duration::from_nanos(saturate(runtime_nanos)),
        })
    }

    /// Buffer size for each source channel, never zero.
    pub fn channel_capacity(&self) -> usize {
        self.events_per_source.clamp(1, MAX_CHANNEL_CAPACITY) as usize
    }
}

fn saturate(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
