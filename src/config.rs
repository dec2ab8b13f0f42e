// src/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::energy::{Signal, ROLLUP_WINDOW_SECS};
use crate::meter::{Channel, ShellyModel};

pub const ENV_CONFIG_PATH: &str = "ENERGY_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/energy.toml";

pub const ENV_LISTEN_ADDR: &str = "ENERGY_LISTEN_ADDR";
pub const ENV_DATA_DIR: &str = "ENERGY_DATA_DIR";
pub const ENV_PROVIDER_ADDR: &str = "ENERGY_PROVIDER_ADDR";
pub const ENV_PV_ADDR: &str = "ENERGY_PV_ADDR";

fn default_listen_addr() -> String {
    "0.0.0.0:8744".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_aggregate_interval_secs() -> u64 {
    1
}
fn default_rollup_interval_secs() -> u64 {
    60
}
fn default_horizon_minutes() -> u32 {
    65
}
fn default_channel_horizon_minutes() -> u32 {
    20
}
fn default_poll_interval_secs() -> u64 {
    1
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_true() -> bool {
    true
}

/// One Shelly meter to poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MeterConfig {
    /// Base address, e.g. `http://10.1.1.20` (scheme optional).
    #[serde(default)]
    pub addr: String,
    pub model: ShellyModel,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Channels tracked as separate signals (PV meter only).
    #[serde(default)]
    pub channels: Vec<Channel>,
}

impl MeterConfig {
    fn provider_default() -> Self {
        Self::with_model(ShellyModel::Shelly3em)
    }

    fn pv_default() -> Self {
        Self::with_model(ShellyModel::Shelly1pro)
    }

    fn with_model(model: ShellyModel) -> Self {
        Self {
            addr: String::new(),
            model,
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_timeout_secs(),
            channels: Vec::new(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnergyConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Directory of the rollup store files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// How often current readings are pushed into the recorders.
    #[serde(default = "default_aggregate_interval_secs")]
    pub aggregate_interval_secs: u64,
    /// How often 1-minute averages are fed into the rollups.
    #[serde(default = "default_rollup_interval_secs")]
    pub rollup_interval_secs: u64,
    #[serde(default = "default_horizon_minutes")]
    pub horizon_minutes: u32,
    /// Per-channel PV signals only answer 1-minute windows.
    #[serde(default = "default_channel_horizon_minutes")]
    pub channel_horizon_minutes: u32,
    #[serde(default = "default_true")]
    pub metrics: bool,
    #[serde(default = "MeterConfig::provider_default")]
    pub provider_meter: MeterConfig,
    #[serde(default = "MeterConfig::pv_default")]
    pub pv_meter: MeterConfig,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            data_dir: default_data_dir(),
            aggregate_interval_secs: default_aggregate_interval_secs(),
            rollup_interval_secs: default_rollup_interval_secs(),
            horizon_minutes: default_horizon_minutes(),
            channel_horizon_minutes: default_channel_horizon_minutes(),
            metrics: true,
            provider_meter: MeterConfig::provider_default(),
            pv_meter: MeterConfig::pv_default(),
        }
    }
}

impl EnergyConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing energy config toml")
    }

    /// Parse the TOML file at `path` (no env overrides, no validation).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading energy config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    /// Load configuration using env var + fallbacks, then apply env overrides:
    /// 1) $ENERGY_CONFIG_PATH
    /// 2) config/energy.toml
    /// 3) built-in defaults (meter addresses must then come from env)
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_p.exists() {
                Self::load_from(&default_p)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_nonempty(ENV_LISTEN_ADDR) {
            self.listen_addr = v;
        }
        if let Some(v) = env_nonempty(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env_nonempty(ENV_PROVIDER_ADDR) {
            self.provider_meter.addr = v;
        }
        if let Some(v) = env_nonempty(ENV_PV_ADDR) {
            self.pv_meter.addr = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (role, meter) in [("provider_meter", &self.provider_meter), ("pv_meter", &self.pv_meter)] {
            if meter.addr.trim().is_empty() {
                bail!("{role}.addr is not set");
            }
            if meter.poll_interval_secs == 0 {
                bail!("{role}.poll_interval_secs must be > 0");
            }
        }
        if self.aggregate_interval_secs == 0 || self.rollup_interval_secs == 0 {
            bail!("aggregate_interval_secs and rollup_interval_secs must be > 0");
        }
        let core_secs = longest_window_secs(&Signal::CORE);
        if u64::from(self.horizon_minutes) * 60 < core_secs {
            bail!("horizon_minutes must cover the longest window ({core_secs}s)");
        }
        let channel_secs = longest_window_secs(&[Signal::PvChannel(Channel::A)]);
        if u64::from(self.channel_horizon_minutes) * 60 < channel_secs {
            bail!("channel_horizon_minutes must cover the longest channel window ({channel_secs}s)");
        }
        Ok(())
    }

    pub fn aggregate_interval(&self) -> Duration {
        Duration::from_secs(self.aggregate_interval_secs)
    }

    pub fn rollup_interval(&self) -> Duration {
        Duration::from_secs(self.rollup_interval_secs)
    }
}

/// Longest history any of `signals` needs, rollup feed included.
fn longest_window_secs(signals: &[Signal]) -> u64 {
    signals
        .iter()
        .flat_map(|s| s.windows())
        .map(|w| w.secs)
        .chain([ROLLUP_WINDOW_SECS])
        .max()
        .map_or(0, u64::from)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
