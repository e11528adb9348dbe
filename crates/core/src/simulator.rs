//! Simulated population of independent event sources.
//!
//! Each source runs as its own task with two timers: a decay timer shrinking
//! its emission interval every `update_rate`, and an emission timer firing one
//! event every `interval + jitter`. A source retires once its interval decays
//! below `min_interval`, or stops early when the shutdown signal fires. Either
//! way it closes its channel on the way out.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use futures::future::join_all;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    config::{format_duration, ConfigError, SimulatorConfig, TIMER_RESOLUTION},
    event::{EventReceiver, EventSender},
    shutdown::ShutdownSignal,
};

mod source;
mod stats;

pub use source::ExitReason;
pub use stats::Stats;

use source::Source;

/// Shared, monotonically increasing count of events delivered into source channels.
#[derive(Clone, Debug, Default)]
pub struct EventCounter(Arc<AtomicU64>);

impl EventCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// How the source tasks of a finished simulation ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceExits {
    pub retired: usize,
    pub cancelled: usize,
    pub disconnected: usize,
    /// Tasks that panicked or were aborted.
    pub failed: usize,
}

impl SourceExits {
    fn record(&mut self, reason: ExitReason) {
        match reason {
            ExitReason::Retired => self.retired += 1,
            ExitReason::Cancelled => self.cancelled += 1,
            ExitReason::Disconnected => self.disconnected += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.retired + self.cancelled + self.disconnected + self.failed
    }
}

pub struct Simulator {
    config: SimulatorConfig,
    stats: Stats,
    shutdown: ShutdownSignal,
    senders: Vec<EventSender>,
    receivers: Vec<EventReceiver>,
    tasks: Vec<JoinHandle<ExitReason>>,
    counter: EventCounter,
}

impl Simulator {
    /// Creates `config.source_count` buffered channels, sized from the capacity estimate.
    pub fn new(shutdown: ShutdownSignal, config: SimulatorConfig) -> Result<Self, ConfigError> {
        let stats = Stats::estimate(&config)?;
        let capacity = stats.channel_capacity();
        let (senders, receivers) = (0..config.source_count)
            .map(|_| mpsc::channel(capacity))
            .unzip();
        Ok(Self {
            config,
            stats,
            shutdown,
            senders,
            receivers,
            tasks: Vec::new(),
            counter: EventCounter::default(),
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Hands out the receiving end of every source, in source order.
    ///
    /// Must be called before [`Simulator::start`]; later calls return an empty set.
    pub fn sources(&mut self) -> Vec<EventReceiver> {
        std::mem::take(&mut self.receivers)
    }

    /// Spawns one task per source. Must be called from within a tokio runtime.
    ///
    /// Single use: calling it a second time is a caller error (it starts nothing).
    /// Sources whose receivers were not taken with [`Simulator::sources`] are closed
    /// right away, since nobody could ever read them.
    pub fn start(&mut self) {
        if !self.receivers.is_empty() {
            tracing::warn!(
                sources = self.receivers.len(),
                "starting with unclaimed sources, their events are discarded"
            );
            self.receivers.clear();
        }
        tracing::info!(sources = self.senders.len(), "starting simulation");
        let tasks = self.senders.drain(..).enumerate().map(|(index, tx)| {
            let source = Source::new(
                index,
                self.config,
                tx,
                self.shutdown.clone(),
                self.counter.0.clone(),
            );
            tokio::spawn(source.run())
        });
        self.tasks.extend(tasks);
    }

    /// Waits for every source task to finish.
    pub async fn wait(&mut self) -> SourceExits {
        let mut exits = SourceExits::default();
        for result in join_all(self.tasks.drain(..)).await {
            match result {
                Ok(reason) => exits.record(reason),
                Err(err) => {
                    tracing::error!(%err, "source task failed");
                    exits.failed += 1;
                }
            }
        }
        if exits.cancelled > 0 {
            tracing::info!(
                cancelled = exits.cancelled,
                events = self.live_event_count(),
                reason = "shutdown signal",
                "simulation stopped early"
            );
        } else {
            tracing::info!(
                retired = exits.retired,
                events = self.live_event_count(),
                "simulation finished"
            );
        }
        exits
    }

    /// Events successfully delivered so far. Safe to read while the simulation runs.
    pub fn live_event_count(&self) -> u64 {
        self.counter.get()
    }

    /// A handle to the live event count that outlives borrows of the simulator.
    pub fn event_counter(&self) -> EventCounter {
        self.counter.clone()
    }

    /// Dumps the configuration and the capacity estimate to the log.
    pub fn log_config(&self) {
        let config = &self.config;
        let stats = &self.stats;
        tracing::info!(sources = config.source_count, "simulator");
        tracing::info!(total_intervals = stats.step_count, "simulator");
        tracing::info!(
            min_samples_per_interval = stats.min_samples_per_step,
            starting_at = %format_duration(config.max_interval),
            "simulator"
        );
        tracing::info!(
            max_samples_per_interval = stats.max_samples_per_step,
            ending_at = %format_duration(config.min_interval),
            "simulator"
        );
        tracing::info!(
            update_rate = %format_duration(config.update_rate),
            interval_step = %format_duration(config.interval_step),
            max_jitter = %format_duration(config.max_jitter),
            "simulator"
        );
        tracing::info!(estimated_events_per_source = stats.events_per_source, "simulator");
        tracing::info!(estimated_total_events = stats.total_events, "simulator");
        tracing::info!(estimated_runtime = ?stats.estimated_runtime, "simulator");
        if config.below_timer_resolution() {
            tracing::warn!(
                min_interval = %format_duration(config.min_interval),
                resolution = %format_duration(TIMER_RESOLUTION),
                "intervals below the timer resolution are rounded up, the event rate will not track the decay"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::shutdown::shutdown_channel;

    fn config(sources: usize) -> SimulatorConfig {
        SimulatorConfig {
            source_count: sources,
            max_interval: Duration::from_millis(10),
            min_interval: Duration::from_millis(5),
            interval_step: Duration::from_millis(1),
            update_rate: Duration::from_millis(50),
            max_jitter: Duration::from_micros(500),
            seed: Some(42),
        }
    }

    #[test]
    fn one_channel_per_source() {
        let mut sim = Simulator::new(ShutdownSignal::never(), config(7)).unwrap();
        let sources = sim.sources();
        assert_eq!(sources.len(), 7);
        assert!(sim.sources().is_empty());
        // 5 steps * (5 + 10) / 2
        assert_eq!(sim.stats().events_per_source, 37);
        assert!(sources.iter().all(|rx| rx.max_capacity() == 37));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut bad = config(1);
        bad.interval_step = Duration::ZERO;
        assert!(Simulator::new(ShutdownSignal::never(), bad).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn counter_matches_received_events() {
        let mut sim = Simulator::new(ShutdownSignal::never(), config(4)).unwrap();
        let sources = sim.sources();
        let counter = sim.event_counter();
        sim.start();

        let mut received = 0u64;
        for mut rx in sources {
            while rx.recv().await.is_some() {
                received += 1;
            }
        }
        let exits = sim.wait().await;
        assert_eq!(exits.retired, 4);
        assert_eq!(exits.total(), 4);
        assert_eq!(received, sim.live_event_count());
        assert_eq!(counter.get(), received);
    }

    #[tokio::test(start_paused = true)]
    async fn unclaimed_sources_are_closed_on_start() {
        let mut sim = Simulator::new(ShutdownSignal::never(), config(3)).unwrap();
        sim.start();
        let exits = sim.wait().await;
        assert_eq!(exits.disconnected, 3);
        assert_eq!(sim.live_event_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_all_sources() {
        let (handle, signal) = shutdown_channel();
        let mut sim = Simulator::new(signal, config(5)).unwrap();
        let _sources = sim.sources();
        sim.start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.shutdown();

        let exits = tokio::time::timeout(Duration::from_millis(100), sim.wait())
            .await
            .expect("sources released");
        assert_eq!(exits.cancelled, 5);
        assert!(sim.live_event_count() > 0);
    }
}
