use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    log_warn,
    sound::{crossfade::millis, AmbientSound, CrossfadeConfig},
};

const ENABLE_LOGS: bool = true;

pub const DEBUG_ENV: &str = "FOCUSJOURNAL_DEBUG";
pub const DATA_DIR_ENV: &str = "FOCUSJOURNAL_DATA_DIR";
pub const DEFAULT_DATA_DIR: &str = "focusjournal-data";

/// Timing knobs for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    #[serde(with = "millis")]
    pub tick_interval: Duration,
    /// Persist the running session's elapsed time every this many ticks.
    pub heartbeat_every_ticks: u32,
    pub crossfade: CrossfadeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            heartbeat_every_ticks: 10,
            crossfade: CrossfadeConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::with_debug_flag(std::env::var(DEBUG_ENV).ok().as_deref())
    }

    /// Debug builds of the journal write the ledger on every tick.
    pub fn with_debug_flag(flag: Option<&str>) -> Self {
        let mut config = Self::default();
        if matches!(flag.map(str::trim), Some("1") | Some("true")) {
            config.heartbeat_every_ticks = 1;
        }
        config
    }
}

/// Where the journal keeps its database, settings and sound assets.
pub fn resolve_data_dir(cli_arg: Option<String>) -> PathBuf {
    std::env::var(DATA_DIR_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or(cli_arg)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundSettings {
    pub sound: AmbientSound,
    pub volume: f32,
}

impl Default for SoundSettings {
    fn default() -> Self {
        Self {
            sound: AmbientSound::None,
            volume: CrossfadeConfig::default().target_volume,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UserSettings {
    sound: SoundSettings,
}

/// User settings persisted as JSON. Every update is written straight away.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log_warn!("Ignoring malformed settings at {}: {}", path.display(), err);
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sound(&self) -> Result<SoundSettings> {
        let guard = self
            .data
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        Ok(guard.sound)
    }

    pub fn update_sound(&self, settings: SoundSettings) -> Result<()> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        guard.sound = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
