use crate::{
    config::{ConfigError, SimulatorConfig},
    drain::RapidIo,
    shutdown::ShutdownSignal,
    simulator::{SourceExits, Simulator, Stats},
};

/// Outcome of a simulation drained to completion.
#[derive(Debug)]
pub struct SimulationRun<D> {
    /// The drain, holding the handled events.
    pub drain: D,
    /// Events the sources delivered into their channels.
    pub emitted: u64,
    pub exits: SourceExits,
    pub stats: Stats,
}

impl<D: RapidIo> SimulationRun<D> {
    /// Whether the drain handled as many events as the sources delivered.
    pub fn is_complete(&self) -> bool {
        self.drain.results().len() as u64 == self.emitted
    }
}

/// Runs one simulation with `config`, draining it with `drain`.
///
/// The drain takes over the sources before any of them starts, so no event is
/// emitted without a reader. Returns once both the sources and the drain are done,
/// either because every source retired or because `shutdown` fired.
pub async fn simulate<D: RapidIo>(
    shutdown: ShutdownSignal,
    config: SimulatorConfig,
    mut drain: D,
) -> Result<SimulationRun<D>, ConfigError> {
    let mut sim = Simulator::new(shutdown.clone(), config)?;
    sim.log_config();

    drain.accept_sources(shutdown, sim.sources());
    sim.start();

    let exits = sim.wait().await;
    drain.wait().await;

    Ok(SimulationRun {
        emitted: sim.live_event_count(),
        stats: *sim.stats(),
        exits,
        drain,
    })
}
