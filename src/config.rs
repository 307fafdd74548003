use std::sync::LazyLock;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use jiff::SignedDuration;
use serde::Deserialize;

use crate::sync::SyncConfig;

static CONFIG: LazyLock<Config> = LazyLock::new(|| {
    let config = Figment::new()
        .merge(Toml::file("loopcast.toml"))
        .merge(Env::prefixed("LOOPCAST_"))
        .extract::<Config>();
    match config {
        Ok(config) => config,
        Err(err) => {
            panic!("CONFIG ERROR: {err}");
        }
    }
});

#[derive(Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_channels_dir")]
    pub channels_dir: String,
    #[serde(default)]
    pub sync: SyncSettings,
}

#[derive(Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold_secs: f64,
    #[serde(default = "default_correction_cooldown")]
    pub correction_cooldown_secs: f64,
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            drift_threshold_secs: default_drift_threshold(),
            correction_cooldown_secs: default_correction_cooldown(),
            max_consecutive_failures: default_max_failures(),
        }
    }
}

impl SyncSettings {
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            drift_threshold: SignedDuration::from_secs_f64(self.drift_threshold_secs),
            correction_cooldown: SignedDuration::from_secs_f64(self.correction_cooldown_secs),
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_channels_dir() -> String {
    "channels".to_string()
}

fn default_poll_interval() -> u64 {
    7
}

fn default_drift_threshold() -> f64 {
    3.0
}

fn default_correction_cooldown() -> f64 {
    5.0
}

fn default_max_failures() -> u32 {
    3
}

pub fn get_config() -> &'static Config {
    &*CONFIG
}
