/*!
 # Alarm Clock Playback Engine

 The alarm-triggering and playback core of a standalone clock appliance.
 It decides when an alarm fires, what it plays (a file from removable
 storage, a built-in fallback tone, and a light effect) and how it reacts to
 the physical alarm switch, storage removal, snooze and power-saving modes.

 ## Features

 * Two alarm slots with day-of-week schedules
 * Fixed-layout profile records in a byte-addressable store
 * Debounced removable-storage detection and audio file selection
 * Cooperative playback: audio chunk feed, snooze, startup delay
 * Flashing, fading and rainbow light effects plus night-lamp hand-off
 * Power-mode aware amplifier/decoder lifecycle

 Everything is driven from a single polling tick. Hardware is reached only
 through the capability traits in [`hardware`] and [`storage`], so the
 engine runs the same against real drivers, the host stand-ins in [`device`]
 and [`audio`], or test fakes.

 ## Example

 ```rust,no_run
 use alarm_clock_engine::*;

 fn main() -> Result<()> {
     let settings = Settings::default();
     let (devices, _controls) = device::host_devices(&settings);
     let mut engine = AlarmEngine::new(
         devices,
         Box::new(DirStorage::new(&settings.media_dir)),
         Box::new(MemoryStore::new(settings.store_size)),
         settings.config.clone(),
     );

     loop {
         let now = engine.now();
         engine.check_for_alarms(now);
         engine.process_alarm_events();
         std::thread::sleep(std::time::Duration::from_millis(settings.tick_ms));
     }
 }
 ```
*/

use thiserror::Error;

/// Error types for the alarm engine
#[derive(Error, Debug)]
pub enum Error {
    /// Profile slot outside the fixed slot range
    #[error("Profile index {0} out of range")]
    ProfileIndex(usize),

    /// Byte store access past the end of the medium
    #[error("Address {addr} out of range (store size {len})")]
    AddressOutOfRange { addr: usize, len: usize },

    /// Removable storage could not be mounted or read
    #[error("Storage error: {0}")]
    Storage(String),

    /// No storage card is inserted
    #[error("No storage card present")]
    NoCardPresent,

    /// Named file does not exist on the card
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Audio output could not be set up
    #[error("Audio error: {0}")]
    Audio(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error from a host driver
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed settings file
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod audio;
pub mod config;
pub mod device;
pub mod effects;
pub mod engine;
pub mod hardware;
pub mod playback;
pub mod power;
pub mod profile;
pub mod schedule;
pub mod storage;

#[cfg(test)]
pub(crate) mod fakes;

// Re-export key types
pub use config::{Config, Settings};
pub use effects::{EffectStepper, VisualMode};
pub use engine::AlarmEngine;
pub use hardware::{Devices, PowerMode, Rgb};
pub use playback::{Outputs, PlayKind, PlayMode, PlayState};
pub use profile::{AlarmProfile, ByteStore, FileStore, LampSettings, MemoryStore, ProfileStore};
pub use schedule::{Days, WEEK_DAYS};
pub use storage::{DirStorage, StorageDriver, StorageMonitor};
