use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Default number of simulated sources.
pub const DEFAULT_SOURCE_COUNT: usize = 100;
/// Interval between events when a source starts.
///
/// Below [`TIMER_RESOLUTION`]: with the defaults every emission is rounded up to
/// one millisecond, so the decay is not observable in the event rate.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_micros(1000);
/// A source retires once its interval decays below this value.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_micros(500);
/// How often every source shrinks its interval.
pub const DEFAULT_UPDATE_RATE: Duration = Duration::from_millis(50);
/// Amount removed from the interval on every update.
pub const DEFAULT_INTERVAL_STEP: Duration = Duration::from_micros(2);
/// Upper bound (exclusive) of the random delay added to each emission.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_nanos(100);
/// Granularity of the tokio timers driving the sources. Deadlines round up to it.
pub const TIMER_RESOLUTION: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("`{0}` must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("min interval ({min:?}) is larger than max interval ({max:?})")]
    InvertedIntervals { min: Duration, max: Duration },
    #[error("invalid duration `{0}`, expected a number followed by ns, us, ms or s")]
    InvalidDuration(String),
    #[error("failed reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed parsing config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Parameters of a simulation run.
///
/// Immutable once handed to a [`Simulator`](crate::simulator::Simulator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SimulatorConfig {
    /// Number of independent sources (channels).
    pub source_count: usize,
    #[serde(with = "serde_duration")]
    pub min_interval: Duration,
    #[serde(with = "serde_duration")]
    pub max_interval: Duration,
    #[serde(with = "serde_duration")]
    pub update_rate: Duration,
    #[serde(with = "serde_duration")]
    pub interval_step: Duration,
    #[serde(with = "serde_duration")]
    pub max_jitter: Duration,
    /// Seed for the per-source jitter generators. Random when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            source_count: DEFAULT_SOURCE_COUNT,
            min_interval: DEFAULT_MIN_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            update_rate: DEFAULT_UPDATE_RATE,
            interval_step: DEFAULT_INTERVAL_STEP,
            max_jitter: DEFAULT_MAX_JITTER,
            seed: None,
        }
    }
}

impl SimulatorConfig {
    /// Reads a TOML config file.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Whether some emission intervals are finer than the timers can fire.
    pub fn below_timer_resolution(&self) -> bool {
        self.min_interval < TIMER_RESOLUTION
    }

    /// Rejects configurations the capacity estimate cannot be computed for.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_step.is_zero() {
            return Err(ConfigError::ZeroDuration("interval-step"));
        }
        if self.update_rate.is_zero() {
            return Err(ConfigError::ZeroDuration("update-rate"));
        }
        if self.min_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("min-interval"));
        }
        if self.max_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("max-interval"));
        }
        if self.min_interval > self.max_interval {
            return Err(ConfigError::InvertedIntervals {
                min: self.min_interval,
                max: self.max_interval,
            });
        }
        Ok(())
    }
}

#[derive(clap::Parser, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Load the simulator configuration from a TOML file. Flags take precedence over its values.
    #[arg(long, env = "RAPIDIO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of simulated sources.
    #[arg(long)]
    pub sources: Option<usize>,

    /// Sources retire once their interval drops below this value.
    #[arg(long, value_parser = parse_duration)]
    pub min_interval: Option<Duration>,

    /// Initial interval between two events of a source.
    #[arg(long, value_parser = parse_duration)]
    pub max_interval: Option<Duration>,

    /// How often sources shrink their interval.
    #[arg(long, value_parser = parse_duration)]
    pub update_rate: Option<Duration>,

    /// Amount the interval shrinks by on every update.
    #[arg(long, value_parser = parse_duration)]
    pub interval_step: Option<Duration>,

    /// Maximum random delay added to each emission.
    #[arg(long, value_parser = parse_duration)]
    pub max_jitter: Option<Duration>,

    /// Seed for the jitter generators.
    #[arg(long, env = "RAPIDIO_SEED")]
    pub seed: Option<u64>,
}

impl ConfigArgs {
    /// Merge the optional config file with the command line overrides and validate the result.
    pub fn build(self) -> Result<SimulatorConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => SimulatorConfig::load(path)?,
            None => SimulatorConfig::default(),
        };
        if let Some(sources) = self.sources {
            config.source_count = sources;
        }
        if let Some(min_interval) = self.min_interval {
            config.min_interval = min_interval;
        }
        if let Some(max_interval) = self.max_interval {
            config.max_interval = max_interval;
        }
        if let Some(update_rate) = self.update_rate {
            config.update_rate = update_rate;
        }
        if let Some(interval_step) = self.interval_step {
            config.interval_step = interval_step;
        }
        if let Some(max_jitter) = self.max_jitter {
            config.max_jitter = max_jitter;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Parses durations such as `500us`, `50ms`, `100ns` or `2s`.
pub fn parse_duration(src: &str) -> Result<Duration, ConfigError> {
    let src = src.trim();
    let split = src
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| ConfigError::InvalidDuration(src.to_owned()))?;
    let (value, unit) = src.split_at(split);
    let value: u64 = value
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(src.to_owned()))?;
    match unit.trim() {
        "ns" => Ok(Duration::from_nanos(value)),
        "us" | "µs" => Ok(Duration::from_micros(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(ConfigError::InvalidDuration(src.to_owned())),
    }
}

/// Formats a duration with the coarsest unit that represents it exactly.
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        "0ns".to_owned()
    } else if nanos % 1_000_000_000 == 0 {
        format!("{}s", nanos / 1_000_000_000)
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!("{}us", nanos / 1_000)
    } else {
        format!("{nanos}ns")
    }
}

mod serde_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        super::parse_duration(&value).map_err(serde::de::Error::custom)
    }
}

/// Installs the global tracing subscriber. Only the first call has any effect.
pub fn set_logger(level: Option<tracing::level_filters::LevelFilter>) -> anyhow::Result<()> {
    #[cfg(feature = "trace")]
    {
        static LOGGER_SET: std::sync::atomic::AtomicBool =
            std::sync::atomic::AtomicBool::new(false);
        if LOGGER_SET
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::Release,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(());
        }

        crate::tracing::tracer::init_tracer(level)?;
    }
    #[cfg(not(feature = "trace"))]
    let _ = level;
    Ok(())
}
