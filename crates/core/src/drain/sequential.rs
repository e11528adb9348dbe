use tokio::task::JoinHandle;

use crate::{
    event::{handle_event, EventReceiver, EventResult},
    shutdown::ShutdownSignal,
};

use super::RapidIo;

/// Drains all sources from a single task.
///
/// Every open source gets exactly one blocking receive per rotation; a source
/// observed closed is dropped from the rotation and never polled again. Results
/// are ordered by rotation, not by creation time.
#[derive(Debug, Default)]
pub struct Sequential {
    task: Option<JoinHandle<Rotations>>,
    results: Vec<EventResult>,
    rotations: usize,
    retired: usize,
}

#[derive(Debug)]
struct Rotations {
    results: Vec<EventResult>,
    completed: usize,
    retired: usize,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full passes over the active sources. Available after `wait`.
    pub fn rotations(&self) -> usize {
        self.rotations
    }

    /// Sources observed closed. Available after `wait`.
    pub fn retired(&self) -> usize {
        self.retired
    }
}

impl RapidIo for Sequential {
    fn accept_sources(&mut self, shutdown: ShutdownSignal, sources: Vec<EventReceiver>) {
        debug_assert!(self.task.is_none(), "sources already accepted");
        self.task = Some(tokio::spawn(rotate(shutdown, sources)));
    }

    async fn wait(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        match task.await {
            Ok(rotations) => {
                self.results = rotations.results;
                self.rotations = rotations.completed;
                self.retired = rotations.retired;
            }
            Err(err) => tracing::error!(%err, "sequential drain task failed"),
        }
    }

    fn results(&self) -> &[EventResult] {
        &self.results
    }
}

async fn rotate(shutdown: ShutdownSignal, sources: Vec<EventReceiver>) -> Rotations {
    let mut active = sources;
    let mut next_round = Vec::with_capacity(active.len());
    let mut rotations = Rotations {
        results: Vec::new(),
        completed: 0,
        retired: 0,
    };

    while !active.is_empty() {
        for mut source in active.drain(..) {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!(
                        reason = "shutdown signal",
                        events = rotations.results.len(),
                        "sequential drain stopped"
                    );
                    return rotations;
                }
                event = source.recv() => match event {
                    Some(event) => {
                        rotations.results.push(handle_event(event));
                        next_round.push(source);
                    }
                    None => rotations.retired += 1,
                },
            }
        }
        std::mem::swap(&mut active, &mut next_round);
        rotations.completed += 1;
    }

    tracing::debug!(
        events = rotations.results.len(),
        rotations = rotations.completed,
        "sequential drain finished"
    );
    rotations
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{sync::mpsc, time::Instant};

    use super::*;
    use crate::{event::Event, shutdown::shutdown_channel};

    fn event(source: usize, sequence: u64) -> Event {
        Event {
            created_at: Instant::now(),
            interval: 0,
            source,
            sequence,
        }
    }

    /// Channels already holding `counts[i]` events and closed afterwards.
    async fn closed_sources(counts: &[u64]) -> Vec<EventReceiver> {
        let mut sources = Vec::new();
        for (source, &count) in counts.iter().enumerate() {
            let (tx, rx) = mpsc::channel(8);
            for sequence in 0..count {
                tx.send(event(source, sequence)).await.unwrap();
            }
            sources.push(rx);
        }
        sources
    }

    fn order(drain: &Sequential) -> Vec<(usize, u64)> {
        drain
            .results()
            .iter()
            .map(|r| (r.event.source, r.event.sequence))
            .collect()
    }

    #[tokio::test]
    async fn empty_source_set_exits_immediately() {
        let mut drain = Sequential::new();
        drain.accept_sources(ShutdownSignal::never(), Vec::new());
        drain.wait().await;
        assert!(drain.results().is_empty());
        assert_eq!(drain.rotations(), 0);
    }

    #[tokio::test]
    async fn one_event_per_source_fits_in_one_rotation() {
        let mut drain = Sequential::new();
        drain.accept_sources(ShutdownSignal::never(), closed_sources(&[1, 1, 1]).await);
        drain.wait().await;

        assert_eq!(order(&drain), vec![(0, 0), (1, 0), (2, 0)]);
        // second pass only observes the closures
        assert_eq!(drain.rotations(), 2);
        assert_eq!(drain.retired(), 3);
    }

    #[tokio::test]
    async fn busy_source_cannot_starve_the_others() {
        let mut drain = Sequential::new();
        drain.accept_sources(ShutdownSignal::never(), closed_sources(&[3, 1, 2]).await);
        drain.wait().await;

        assert_eq!(
            order(&drain),
            vec![(0, 0), (1, 0), (2, 0), (0, 1), (2, 1), (0, 2)]
        );
        assert_eq!(drain.retired(), 3);
    }

    #[tokio::test]
    async fn closed_source_is_dropped_without_results() {
        let mut drain = Sequential::new();
        drain.accept_sources(ShutdownSignal::never(), closed_sources(&[0, 2, 0]).await);
        drain.wait().await;
        assert_eq!(order(&drain), vec![(1, 0), (1, 1)]);
        assert_eq!(drain.retired(), 3);
    }

    #[tokio::test]
    async fn already_closed_source_does_not_stall_rotation() {
        let (tx_open, rx_open) = mpsc::channel(4);
        let (tx_closing, rx_closing) = mpsc::channel::<Event>(4);
        drop(tx_closing);

        let mut drain = Sequential::new();
        drain.accept_sources(ShutdownSignal::never(), vec![rx_closing, rx_open]);
        tx_open.send(event(1, 0)).await.unwrap();
        drop(tx_open);
        drain.wait().await;

        assert_eq!(order(&drain), vec![(1, 0)]);
        assert_eq!(drain.retired(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_idle_sources() {
        let (handle, signal) = shutdown_channel();
        let (tx, rx) = mpsc::channel(4);
        tx.send(event(0, 0)).await.unwrap();

        let mut drain = Sequential::new();
        drain.accept_sources(signal, vec![rx]);
        handle.shutdown_after(Duration::from_millis(10));

        tokio::time::timeout(Duration::from_millis(20), drain.wait())
            .await
            .expect("drain released by shutdown");
        assert_eq!(order(&drain), vec![(0, 0)]);
        assert_eq!(drain.retired(), 0);
        drop(tx);
    }

    #[tokio::test]
    async fn results_are_empty_before_wait() {
        let mut drain = Sequential::new();
        drain.accept_sources(ShutdownSignal::never(), closed_sources(&[2]).await);
        assert!(drain.results().is_empty());
        drain.wait().await;
        assert_eq!(drain.results().len(), 2);
    }
}
