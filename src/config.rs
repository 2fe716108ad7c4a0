/*!
 # Configuration

 [`Config`] holds the global preferences the engine reads (alarm enable
 flags, idle light appearance). [`Settings`] wraps it with the paths and
 timing the host binaries need and is read from a TOML file.
*/

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::hardware::Rgb;
use crate::schedule::ALARM_SLOTS;
use crate::{Error, Result};

/// Global device preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-slot alarm enable flags
    pub alarm_enabled: [bool; ALARM_SLOTS],
    /// Strip brightness when no effect runs
    pub idle_brightness: u8,
    /// Strip colour when no effect runs
    pub idle_color: Rgb,
    pub use_24h: bool,
    /// Byte-store address of the first profile record
    pub alarm_profile_base: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alarm_enabled: [true, false],
            idle_brightness: 30,
            idle_color: (255, 120, 40),
            use_24h: true,
            alarm_profile_base: 64,
        }
    }
}

impl Config {
    /// Whether slot `index` is switched on in the menu
    pub fn is_alarm_enabled(&self, index: usize) -> bool {
        self.alarm_enabled.get(index).copied().unwrap_or(false)
    }

    pub fn set_alarm_enabled(&mut self, index: usize, enabled: bool) -> Result<()> {
        let flag = self
            .alarm_enabled
            .get_mut(index)
            .ok_or(Error::ProfileIndex(index))?;
        *flag = enabled;
        Ok(())
    }
}

/// Host runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Image file holding the persistent byte store
    pub store_path: PathBuf,
    pub store_size: usize,
    /// Directory standing in for the removable card
    pub media_dir: PathBuf,
    /// Polling period of the main loop
    pub tick_ms: u64,
    /// Output device name filter; `None` uses the default device
    pub audio_device: Option<String>,
    pub config: Config,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("alarm-store.bin"),
            store_size: 1024,
            media_dir: PathBuf::from("media"),
            tick_ms: 10,
            audio_device: None,
            config: Config::default(),
        }
    }
}

impl Settings {
    /// Reads settings from `path`; a missing file gives the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let settings: Self = toml::from_str(&text)?;
        settings.validate()?;
        debug!("Loaded settings from {}: {:?}", path.display(), settings);
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = toml::to_string(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let needed = self.config.alarm_profile_base
            + ALARM_SLOTS * crate::profile::layout::RECORD_SIZE;
        if self.store_size < needed {
            return Err(Error::Config(format!(
                "store_size {} too small, profiles need {} bytes",
                self.store_size, needed
            )));
        }
        if self.tick_ms == 0 {
            return Err(Error::Config("tick_ms must be positive".into()));
        }
        Ok(())
    }
}
