use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime knobs, all overridable via `WEATHERHUB_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub data_dir: PathBuf,
    /// How often the durability worker writes a checkpoint when idle; accepted
    /// PUTs additionally nudge it out of band.
    pub checkpoint_interval: Duration,
    /// How often the eviction monitor scans for silent stations.
    pub eviction_interval: Duration,
    /// Maximum silence before a station is dropped from the aggregate.
    pub liveness_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 4567)),
            data_dir: PathBuf::from("data"),
            checkpoint_interval: Duration::from_secs(10),
            eviction_interval: Duration::from_secs(5),
            liveness_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Build from the environment, falling back to defaults for anything
    /// absent or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen_addr: env_parse("WEATHERHUB_ADDR", defaults.listen_addr),
            data_dir: std::env::var("WEATHERHUB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            checkpoint_interval: env_secs(
                "WEATHERHUB_CHECKPOINT_INTERVAL_SECS",
                defaults.checkpoint_interval,
            ),
            eviction_interval: env_secs(
                "WEATHERHUB_EVICTION_INTERVAL_SECS",
                defaults.eviction_interval,
            ),
            liveness_timeout: env_secs(
                "WEATHERHUB_LIVENESS_TIMEOUT_SECS",
                defaults.liveness_timeout,
            ),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
