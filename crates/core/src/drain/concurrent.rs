use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::{
    event::{handle_event, EventReceiver, EventResult},
    shutdown::ShutdownSignal,
};

use super::RapidIo;

/// Drains every source from its own reader task into one shared log.
///
/// No source waits behind another, but the log interleaves sources
/// arbitrarily; only the order within a single source is kept.
#[derive(Debug, Default)]
pub struct Concurrent {
    log: Arc<Mutex<Vec<EventResult>>>,
    readers: Vec<JoinHandle<ReaderExit>>,
    results: Vec<EventResult>,
    retired: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderExit {
    Closed,
    Cancelled,
}

impl Concurrent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Readers that ended because their source closed. Available after `wait`.
    pub fn retired(&self) -> usize {
        self.retired
    }
}

impl RapidIo for Concurrent {
    fn accept_sources(&mut self, shutdown: ShutdownSignal, sources: Vec<EventReceiver>) {
        debug_assert!(self.readers.is_empty(), "sources already accepted");
        let readers = sources.into_iter().enumerate().map(|(index, source)| {
            tokio::spawn(read_source(
                index,
                source,
                shutdown.clone(),
                self.log.clone(),
            ))
        });
        self.readers.extend(readers);
    }

    async fn wait(&mut self) {
        let mut cancelled = 0;
        for exit in join_all(self.readers.drain(..)).await {
            match exit {
                Ok(ReaderExit::Closed) => self.retired += 1,
                Ok(ReaderExit::Cancelled) => cancelled += 1,
                Err(err) => tracing::error!(%err, "source reader failed"),
            }
        }
        self.results = std::mem::take(&mut *self.log.lock());
        if cancelled > 0 {
            tracing::info!(
                reason = "shutdown signal",
                readers = cancelled,
                events = self.results.len(),
                "concurrent drain stopped"
            );
        }
    }

    fn results(&self) -> &[EventResult] {
        &self.results
    }
}

async fn read_source(
    index: usize,
    mut source: EventReceiver,
    shutdown: ShutdownSignal,
    log: Arc<Mutex<Vec<EventResult>>>,
) -> ReaderExit {
    let mut handled = 0usize;
    let exit = loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break ReaderExit::Cancelled,
            event = source.recv() => match event {
                Some(event) => {
                    let result = handle_event(event);
                    log.lock().push(result);
                    handled += 1;
                }
                None => break ReaderExit::Closed,
            },
        }
    };
    tracing::trace!(source = index, events = handled, ?exit, "reader finished");
    exit
}
