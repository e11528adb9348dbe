//! Consumers draining every source of a simulation.
//!
//! Both variants only read: closing a source is always left to the source itself.
//! Results become available once [`RapidIo::wait`] has returned.

use std::{fmt::Display, future::Future};

use crate::{
    event::{EventReceiver, EventResult},
    shutdown::ShutdownSignal,
};

mod concurrent;
mod sequential;

pub use concurrent::Concurrent;
pub use sequential::Sequential;

/// Common contract of the drain variants.
pub trait RapidIo {
    /// Takes over consumption of `sources` and starts reading right away.
    ///
    /// Single use: the sources of a drain cannot be replaced once accepted.
    fn accept_sources(&mut self, shutdown: ShutdownSignal, sources: Vec<EventReceiver>);

    /// Waits until every accepted source is closed or the shutdown signal fires.
    fn wait(&mut self) -> impl Future<Output = ()> + Send;

    /// Handled events. Empty until [`RapidIo::wait`] returns.
    fn results(&self) -> &[EventResult];
}

/// Selects a drain implementation.
#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DrainKind {
    /// Single task rotating over the open sources.
    #[default]
    Sequential,
    /// One reader task per source.
    Concurrent,
}

impl Display for DrainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrainKind::Sequential => write!(f, "sequential"),
            DrainKind::Concurrent => write!(f, "concurrent"),
        }
    }
}
