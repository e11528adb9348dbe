//! High-rate event simulation drained by a single consumer.
//!
//! A [`simulator::Simulator`] runs a population of sources whose emission rate keeps
//! increasing until they retire; a [`drain::RapidIo`] implementation consumes all of
//! them and stamps every event with the time it was handled.

/// Simulator configuration, command line arguments and logger setup.
pub mod config;

/// Sequential and concurrent consumers of the simulated sources.
pub mod drain;

/// Events flowing from sources to drains.
mod event;
pub use event::{handle_event, Event, EventReceiver, EventResult};

/// Per-interval latency summaries.
pub mod report;

/// Glue running a simulator against a drain.
mod runner;
pub use runner::{simulate, SimulationRun};

/// Cooperative cancellation.
pub mod shutdown;

/// Decaying-rate event sources.
pub mod simulator;

/// Logging infrastructure.
mod tracing;
