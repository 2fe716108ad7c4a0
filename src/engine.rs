/*!
 # Alarm engine

 [`AlarmEngine`] is the surface the menu layer and the host binaries talk
 to. It owns every component plus the injected devices and lends them to
 the playback controller one call at a time.
*/

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::hardware::Devices;
use crate::playback::{Context, PlayMode, PlayState, PlaybackController};
use crate::power::PowerLifecycle;
use crate::profile::{AlarmProfile, ByteStore, ProfileStore};
use crate::schedule::{self, Schedule, ALARM_SLOTS};
use crate::storage::{StorageDriver, StorageEvent, StorageMonitor};

/// Minute in which a slot last fired
type TriggerMark = (usize, NaiveDate, u32, u32);

pub struct AlarmEngine {
    devices: Devices,
    storage: StorageMonitor,
    profiles: ProfileStore,
    playback: PlaybackController,
    power: PowerLifecycle,
    config: Config,
    profile: AlarmProfile,
    last_trigger: Option<TriggerMark>,
}

impl std::fmt::Debug for AlarmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmEngine")
            .field("devices", &self.devices)
            .field("storage", &self.storage)
            .field("playback", &self.playback)
            .field("power", &self.power)
            .finish_non_exhaustive()
    }
}

impl AlarmEngine {
    /// Builds the engine and loads slot 0 as the current profile
    pub fn new(
        devices: Devices,
        storage: Box<dyn StorageDriver>,
        store: Box<dyn ByteStore>,
        config: Config,
    ) -> Self {
        let profiles = ProfileStore::new(store, config.alarm_profile_base);
        let profile = profiles.load(0).unwrap_or_else(|e| {
            warn!("Cannot load profile 0, using defaults: {}", e);
            AlarmProfile::default()
        });
        let power = PowerLifecycle::new(devices.power.mode());
        let mut storage = StorageMonitor::new(storage);
        storage.remember(&profile.filename);
        Self {
            devices,
            storage,
            profiles,
            playback: PlaybackController::new(),
            power,
            config,
            profile,
            last_trigger: None,
        }
    }

    fn parts(&mut self) -> (Context<'_>, &mut PlaybackController, &mut PowerLifecycle) {
        (
            Context {
                devices: &mut self.devices,
                storage: &mut self.storage,
                profile: &self.profile,
                config: &self.config,
            },
            &mut self.playback,
            &mut self.power,
        )
    }

    pub fn now(&self) -> NaiveDateTime {
        self.devices.clock.now()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn profile(&self) -> &AlarmProfile {
        &self.profile
    }

    /// Menu edits go here and are persisted with [`save_profile`](Self::save_profile)
    pub fn profile_mut(&mut self) -> &mut AlarmProfile {
        &mut self.profile
    }

    /// Starts a session immediately, ignoring the alarm switch
    pub fn play(&mut self, mode: PlayMode) {
        self.play_delayed(mode, 0);
    }

    pub fn play_delayed(&mut self, mode: PlayMode, startup_delay_ms: u64) {
        let (mut ctx, playback, _) = self.parts();
        playback.play(&mut ctx, mode, startup_delay_ms);
    }

    /// Starts a session unless the alarm switch is off and the mode is not
    /// a test preview. Returns whether playback started.
    pub fn play_alarm(&mut self, mode: PlayMode, startup_delay_ms: u64) -> bool {
        let (mut ctx, playback, _) = self.parts();
        playback.play_checked(&mut ctx, mode, startup_delay_ms)
    }

    pub fn stop(&mut self) {
        let (mut ctx, playback, _) = self.parts();
        playback.stop(&mut ctx);
    }

    pub fn snooze(&mut self) {
        let (mut ctx, playback, _) = self.parts();
        playback.snooze(&mut ctx);
    }

    pub fn resume(&mut self) {
        let (mut ctx, playback, _) = self.parts();
        playback.resume(&mut ctx);
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    pub fn is_snoozing(&self) -> bool {
        self.playback.is_snoozing()
    }

    pub fn play_state(&self) -> PlayState {
        self.playback.state()
    }

    /// Seconds until a snoozed alarm resumes, 0 when not snoozing
    pub fn snooze_time_remaining(&self) -> u64 {
        self.playback
            .snooze_time_remaining(self.devices.clock.epoch())
    }

    /// Sets the current profile's volume and applies it to running audio
    pub fn set_volume(&mut self, volume: u8) {
        self.profile.volume = volume.min(100);
        let (mut ctx, playback, _) = self.parts();
        playback.apply_volume(&mut ctx);
    }

    /// Opens the next audio file on the card and selects it for the profile
    pub fn open_next_file(&mut self) -> bool {
        if !self.storage.open_next_file() {
            return false;
        }
        if let Some(name) = self.storage.current_file() {
            self.profile.filename = name.to_string();
        }
        true
    }

    pub fn open_file(&mut self, name: &str) -> bool {
        if !self.storage.open_file(name) {
            return false;
        }
        self.profile.filename = name.to_string();
        true
    }

    /// Replaces the current profile with slot `index`. A bad slot is a no-op.
    #[instrument(skip(self))]
    pub fn load_profile(&mut self, index: usize) -> bool {
        match self.profiles.load(index) {
            Ok(profile) => {
                self.storage.remember(&profile.filename);
                self.profile = profile;
                true
            }
            Err(e) => {
                warn!("Profile {} not loaded: {}", index, e);
                false
            }
        }
    }

    /// Persists the current profile into slot `index`. A bad slot is a no-op.
    #[instrument(skip(self))]
    pub fn save_profile(&mut self, index: usize) -> bool {
        match self.profiles.save(index, &self.profile) {
            Ok(_) => true,
            Err(e) => {
                warn!("Profile {} not saved: {}", index, e);
                false
            }
        }
    }

    pub fn is_sd_card_present(&self) -> bool {
        self.storage.is_present()
    }

    pub fn is_alarm_switch_on(&self) -> bool {
        self.devices.switch.is_on()
    }

    pub fn is_alarm_enabled(&self, index: usize) -> bool {
        self.config.is_alarm_enabled(index)
    }

    pub fn set_alarm_enabled(&mut self, index: usize, enabled: bool) -> bool {
        match self.config.set_alarm_enabled(index, enabled) {
            Ok(()) => {
                info!("Alarm {} {}", index, if enabled { "enabled" } else { "disabled" });
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    fn schedules(&self) -> [Schedule; ALARM_SLOTS] {
        let mut schedules = [Schedule::default(); ALARM_SLOTS];
        for (slot, schedule) in schedules.iter_mut().enumerate() {
            match self.profiles.load_schedule(slot) {
                Ok(s) => *schedule = s,
                Err(e) => warn!("Schedule {} unreadable: {}", slot, e),
            }
        }
        schedules
    }

    /// Slot that fires soonest, if any enabled slot has days set
    pub fn next_alarm_id(&self, now: &NaiveDateTime) -> Option<usize> {
        schedule::next_alarm_id(now, self.config.alarm_enabled, &self.schedules())
    }

    /// Minutes until the soonest alarm
    pub fn next_alarm_offset(&self, now: &NaiveDateTime) -> Option<i32> {
        let id = self.next_alarm_id(now)?;
        self.schedules()[id].offset_from(now, false)
    }

    /// Starts a scheduled alarm whose time is `now`. Each slot fires at most
    /// once per minute and nothing fires while a session is running.
    pub fn check_for_alarms(&mut self, now: NaiveDateTime) -> Option<usize> {
        if self.playback.is_playing() {
            return None;
        }
        let schedules = self.schedules();
        for (slot, schedule) in schedules.iter().enumerate() {
            if !self.config.is_alarm_enabled(slot) || schedule.offset_from(&now, true) != Some(0) {
                continue;
            }
            let mark = (slot, now.date(), now.hour(), now.minute());
            if self.last_trigger == Some(mark) {
                continue;
            }
            self.last_trigger = Some(mark);

            info!("Alarm {} due at {}", slot, now.format("%H:%M"));
            if !self.load_profile(slot) {
                continue;
            }
            if self.play_alarm(PlayMode::normal(), 0) {
                return Some(slot);
            }
        }
        None
    }

    /// One polling tick: power signal, storage presence, then playback
    pub fn process_alarm_events(&mut self) {
        let (mut ctx, playback, power) = self.parts();
        power.poll(&mut ctx, playback);

        let mode = ctx.devices.power.mode();
        let now_ms = ctx.devices.clock.millis();
        match ctx.storage.poll(mode, now_ms) {
            Some(StorageEvent::Removed) => match playback.state() {
                PlayState::Active(m) | PlayState::Snoozing(m) if m.is_test() => {
                    info!("Storage removed during preview, stopping");
                    playback.stop(&mut ctx);
                }
                PlayState::Active(_) => {
                    let minutes = (ctx.profile.snooze_delay as u64).max(1);
                    info!("Storage removed during alarm, snoozing");
                    playback.snooze_for(&mut ctx, minutes);
                }
                _ => {}
            },
            Some(event) => debug!("Storage event: {:?}", event),
            None => {}
        }

        playback.tick(&mut ctx);
    }
}
