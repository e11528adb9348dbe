use std::{path::PathBuf, time::Duration};

use anyhow::bail;
use clap::Parser;
use rapidio::{
    config::{parse_duration, ConfigArgs},
    drain::{Concurrent, DrainKind, RapidIo, Sequential},
    report::write_report,
    shutdown::{shutdown_channel, ShutdownHandle},
    simulate, SimulationRun,
};
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "rapidio", version, about)]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,

    /// Drain implementation consuming the sources.
    #[arg(long, value_enum, default_value_t)]
    drain: DrainKind,

    /// Cancel the run after this long.
    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Write a per-interval latency report (JSON) to this path.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log level, overridden by `RUST_LOG`.
    #[arg(long)]
    log_level: Option<LevelFilter>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    rapidio::config::set_logger(args.log_level)?;
    let tokio_rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    tokio_rt.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.config.build()?;
    let (handle, signal) = shutdown_channel();

    if let Some(timeout) = args.timeout {
        handle.shutdown_after(timeout);
    }
    let ctrl_c = {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, shutting down");
                handle.shutdown();
            }
        })
    };

    tracing::info!(drain = %args.drain, "starting run");
    let outcome = match args.drain {
        DrainKind::Sequential => {
            let run = simulate(signal, config, Sequential::new()).await?;
            tracing::info!(
                rotations = run.drain.rotations(),
                retired = run.drain.retired(),
                "sequential drain done"
            );
            finish(&handle, run, args.report)
        }
        DrainKind::Concurrent => {
            let run = simulate(signal, config, Concurrent::new()).await?;
            tracing::info!(retired = run.drain.retired(), "concurrent drain done");
            finish(&handle, run, args.report)
        }
    };
    ctrl_c.abort();
    outcome
}

fn finish<D: RapidIo>(
    handle: &ShutdownHandle,
    run: SimulationRun<D>,
    report: Option<PathBuf>,
) -> anyhow::Result<()> {
    let handled = run.drain.results().len();
    tracing::info!(
        emitted = run.emitted,
        handled,
        estimated = run.stats.total_events,
        "run finished"
    );
    if let Some(path) = report {
        write_report(run.drain.results(), path)?;
    }

    if handle.is_shutdown() {
        tracing::info!(reason = "shutdown signal", "run cancelled, skipping completeness check");
        return Ok(());
    }
    if !run.is_complete() {
        bail!(
            "drain handled {handled} events but the sources delivered {}",
            run.emitted
        );
    }
    Ok(())
}
