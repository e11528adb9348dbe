use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use tokio::time::{Instant, MissedTickBehavior};

use crate::{
    config::SimulatorConfig,
    event::{Event, EventSender},
    shutdown::ShutdownSignal,
};

/// Why a source task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The interval decayed below the configured minimum.
    Retired,
    /// The shutdown signal fired.
    Cancelled,
    /// Nobody is reading the source anymore.
    Disconnected,
}

enum Emit {
    Sent,
    Cancelled,
    Disconnected,
}

/// A single event source. Owns the only sender of its channel, so the channel
/// closes exactly once, when [`Source::run`] returns.
pub(super) struct Source {
    index: usize,
    config: SimulatorConfig,
    tx: EventSender,
    shutdown: ShutdownSignal,
    emitted: Arc<AtomicU64>,
    rng: SmallRng,
}

impl Source {
    pub fn new(
        index: usize,
        config: SimulatorConfig,
        tx: EventSender,
        shutdown: ShutdownSignal,
        emitted: Arc<AtomicU64>,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(derive_seed(seed, index)),
            None => SmallRng::from_entropy(),
        };
        Self {
            index,
            config,
            tx,
            shutdown,
            emitted,
            rng,
        }
    }

    pub async fn run(mut self) -> ExitReason {
        let config = self.config;
        let mut current_interval = config.max_interval;
        let mut step = 0usize;
        let mut sequence = 0u64;

        let start = Instant::now();
        let mut decay =
            tokio::time::interval_at(deadline_after(start, config.update_rate), config.update_rate);
        decay.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let emission = tokio::time::sleep(current_interval);
        tokio::pin!(emission);

        let reason = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break ExitReason::Cancelled,
                _ = decay.tick() => {
                    step += 1;
                    current_interval = match current_interval.checked_sub(config.interval_step) {
                        Some(next) if next >= config.min_interval => next,
                        _ => break ExitReason::Retired,
                    };
                    emission
                        .as_mut()
                        .reset(deadline_after(Instant::now(), current_interval));
                }
                _ = &mut emission => {
                    let event = Event {
                        created_at: Instant::now(),
                        interval: step,
                        source: self.index,
                        sequence,
                    };
                    match self.emit(event).await {
                        Emit::Sent => sequence += 1,
                        Emit::Cancelled => break ExitReason::Cancelled,
                        Emit::Disconnected => break ExitReason::Disconnected,
                    }
                    let next = current_interval.saturating_add(self.jitter());
                    emission.as_mut().reset(deadline_after(Instant::now(), next));
                }
            }
        };

        tracing::debug!(
            source = self.index,
            ?reason,
            events = sequence,
            interval = step,
            "source finished"
        );
        reason
    }

    /// Sends one event unless shutdown wins the race. Dropped events are not counted.
    async fn emit(&self, event: Event) -> Emit {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Emit::Cancelled,
            sent = self.tx.send(event) => match sent {
                Ok(()) => {
                    self.emitted.fetch_add(1, Ordering::Relaxed);
                    Emit::Sent
                }
                Err(_) => Emit::Disconnected,
            },
        }
    }

    fn jitter(&mut self) -> Duration {
        let max = u64::try_from(self.config.max_jitter.as_nanos()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.rng.gen_range(0..max))
    }
}

/// Roughly 30 years, far enough to never fire during a run.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after`, clamped to a far future deadline instead of overflowing.
fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after).unwrap_or(now + FAR_FUTURE)
}

fn derive_seed(seed: u64, index: usize) -> u64 {
    seed.wrapping_mul(0x517cc1b727220a95)
        .wrapping_add(index as u64)
}
