//! Recording fakes for every hardware capability.
//!
//! Each fake is a cheap handle over shared state, so a test keeps one clone
//! for inspection while the engine owns another inside [`Devices`].

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::config::Config;
use crate::hardware::{
    registers, AlarmSwitch, Amplifier, AudioDecoder, Devices, PowerControl, PowerMode, Rgb,
    Screen, TimeSource, VisualOutput,
};
use crate::playback::Context;
use crate::profile::{AlarmProfile, LampSettings};
use crate::storage::{DirEntry, StorageDriver, StorageMonitor, DEBOUNCE_MS};
use crate::{Error, Result};

/// Monday 2024-06-03 06:00
pub fn monday_morning() -> NaiveDateTime {
    at(2024, 6, 3, 6, 0)
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

#[derive(Debug, Clone)]
pub struct ClockState {
    pub now: NaiveDateTime,
    pub millis: u64,
}

#[derive(Debug, Clone)]
pub struct FakeClock(Rc<RefCell<ClockState>>);

impl Default for FakeClock {
    fn default() -> Self {
        Self(Rc::new(RefCell::new(ClockState {
            now: monday_morning(),
            millis: 10_000,
        })))
    }
}

impl FakeClock {
    pub fn advance_ms(&self, ms: u64) {
        let mut state = self.0.borrow_mut();
        state.millis += ms;
        state.now += Duration::milliseconds(ms as i64);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance_ms(secs * 1000);
    }

    /// Jumps the wall clock without touching the millisecond counter
    pub fn set_now(&self, now: NaiveDateTime) {
        self.0.borrow_mut().now = now;
    }

    pub fn epoch(&self) -> u64 {
        TimeSource::epoch(self)
    }
}

impl TimeSource for FakeClock {
    fn now(&self) -> NaiveDateTime {
        self.0.borrow().now
    }

    fn millis(&self) -> u64 {
        self.0.borrow().millis
    }

    fn epoch(&self) -> u64 {
        self.0.borrow().now.and_utc().timestamp() as u64
    }
}

#[derive(Debug, Clone, Default)]
pub struct PowerState {
    pub mode: PowerMode,
    pub requests: Vec<PowerMode>,
}

#[derive(Debug, Clone, Default)]
pub struct FakePower(Rc<RefCell<PowerState>>);

impl FakePower {
    /// Changes the reported mode as if the system moved on its own
    pub fn set_mode(&self, mode: PowerMode) {
        self.0.borrow_mut().mode = mode;
    }

    pub fn state(&self) -> PowerState {
        self.0.borrow().clone()
    }
}

impl PowerControl for FakePower {
    fn mode(&self) -> PowerMode {
        self.0.borrow().mode
    }

    fn request(&mut self, mode: PowerMode) {
        let mut state = self.0.borrow_mut();
        state.requests.push(mode);
        state.mode = mode;
    }
}

#[derive(Debug, Clone)]
pub struct FakeSwitch(Rc<RefCell<bool>>);

impl Default for FakeSwitch {
    fn default() -> Self {
        Self(Rc::new(RefCell::new(true)))
    }
}

impl FakeSwitch {
    pub fn set(&self, on: bool) {
        *self.0.borrow_mut() = on;
    }
}

impl AlarmSwitch for FakeSwitch {
    fn is_on(&self) -> bool {
        *self.0.borrow()
    }
}

#[derive(Debug, Clone)]
pub struct DecoderState {
    pub ready: bool,
    pub attenuation: u8,
    pub registers: Vec<(u8, u16)>,
    pub data: Vec<u8>,
    pub pushes: usize,
    pub max_push: usize,
    pub begins: usize,
    pub ends: usize,
}

impl DecoderState {
    /// How many decodes were cancelled through the mode register
    pub fn cancels(&self) -> usize {
        self.registers
            .iter()
            .filter(|(reg, value)| *reg == registers::MODE && value & registers::SM_CANCEL != 0)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct FakeDecoder(Rc<RefCell<DecoderState>>);

impl Default for FakeDecoder {
    fn default() -> Self {
        Self(Rc::new(RefCell::new(DecoderState {
            ready: true,
            attenuation: 0,
            registers: Vec::new(),
            data: Vec::new(),
            pushes: 0,
            max_push: 0,
            begins: 0,
            ends: 0,
        })))
    }
}

impl FakeDecoder {
    pub fn set_ready(&self, ready: bool) {
        self.0.borrow_mut().ready = ready;
    }

    pub fn state(&self) -> DecoderState {
        self.0.borrow().clone()
    }
}

impl AudioDecoder for FakeDecoder {
    fn begin(&mut self) -> Result<()> {
        self.0.borrow_mut().begins += 1;
        Ok(())
    }

    fn end(&mut self) {
        self.0.borrow_mut().ends += 1;
    }

    fn set_attenuation(&mut self, attenuation: u8) {
        self.0.borrow_mut().attenuation = attenuation;
    }

    fn write_register(&mut self, register: u8, value: u16) {
        self.0.borrow_mut().registers.push((register, value));
    }

    fn ready_for_data(&self) -> bool {
        self.0.borrow().ready
    }

    fn push_chunk(&mut self, data: &[u8]) {
        let mut state = self.0.borrow_mut();
        state.data.extend_from_slice(data);
        state.pushes += 1;
        state.max_push = state.max_push.max(data.len());
    }
}

#[derive(Debug, Clone, Default)]
pub struct AmpState {
    pub enabled: bool,
    pub toggles: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeAmp(Rc<RefCell<AmpState>>);

impl FakeAmp {
    pub fn state(&self) -> AmpState {
        self.0.borrow().clone()
    }
}

impl Amplifier for FakeAmp {
    fn enable(&mut self) {
        let mut state = self.0.borrow_mut();
        state.enabled = true;
        state.toggles += 1;
    }

    fn disable(&mut self) {
        let mut state = self.0.borrow_mut();
        state.enabled = false;
        state.toggles += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct VisualState {
    pub brightness: u8,
    pub color: Rgb,
    pub shows: usize,
    pub lamp_active: bool,
    pub lamp: Option<LampSettings>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeVisual(Rc<RefCell<VisualState>>);

impl FakeVisual {
    pub fn state(&self) -> VisualState {
        self.0.borrow().clone()
    }
}

impl VisualOutput for FakeVisual {
    fn set_brightness(&mut self, value: u8) {
        self.0.borrow_mut().brightness = value;
    }

    fn set_color(&mut self, color: Rgb) {
        self.0.borrow_mut().color = color;
    }

    fn show(&mut self) {
        self.0.borrow_mut().shows += 1;
    }

    fn activate_lamp(&mut self, lamp: &LampSettings) {
        let mut state = self.0.borrow_mut();
        state.lamp_active = true;
        state.lamp = Some(*lamp);
    }

    fn deactivate_lamp(&mut self) {
        self.0.borrow_mut().lamp_active = false;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScreenState {
    pub message: Option<String>,
    pub takeovers: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeScreen(Rc<RefCell<ScreenState>>);

impl FakeScreen {
    pub fn state(&self) -> ScreenState {
        self.0.borrow().clone()
    }
}

impl Screen for FakeScreen {
    fn take_over(&mut self, message: &str) {
        let mut state = self.0.borrow_mut();
        state.message = Some(message.to_string());
        state.takeovers += 1;
    }

    fn release(&mut self) {
        self.0.borrow_mut().message = None;
    }
}

#[derive(Debug, Clone, Default)]
pub struct StorageState {
    pub detected: bool,
    pub mount_fails: bool,
    pub read_fails: bool,
    pub mounted: bool,
    pub mounts: usize,
    pub entries: Vec<DirEntry>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub cursor: usize,
    pub file_open: bool,
    pub open_name: Option<String>,
    pub position: usize,
    pub seeks: usize,
}

/// In-memory card with a flat root directory
#[derive(Debug, Clone, Default)]
pub struct FakeStorage(Rc<RefCell<StorageState>>);

impl FakeStorage {
    /// Root directory listing follows the slice order
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let storage = Self::default();
        for (name, content) in files {
            storage.add_file(name, content);
        }
        storage
    }

    pub fn add_file(&self, name: &str, content: &str) {
        let mut state = self.0.borrow_mut();
        state.entries.push(DirEntry::file(name));
        state
            .files
            .insert(name.to_string(), content.as_bytes().to_vec());
    }

    pub fn set_detected(&self, detected: bool) {
        self.0.borrow_mut().detected = detected;
    }

    pub fn state(&self) -> Ref<'_, StorageState> {
        self.0.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, StorageState> {
        self.0.borrow_mut()
    }
}

impl StorageDriver for FakeStorage {
    fn card_detected(&self) -> bool {
        self.0.borrow().detected
    }

    fn mount(&mut self) -> Result<()> {
        let mut state = self.0.borrow_mut();
        state.mounts += 1;
        if state.mount_fails {
            return Err(Error::Storage("mount failed".into()));
        }
        state.mounted = true;
        Ok(())
    }

    fn unmount(&mut self) {
        let mut state = self.0.borrow_mut();
        state.mounted = false;
        state.file_open = false;
        state.open_name = None;
    }

    fn open_root(&mut self) -> Result<()> {
        self.0.borrow_mut().cursor = 0;
        Ok(())
    }

    fn next_entry(&mut self) -> Option<DirEntry> {
        let mut state = self.0.borrow_mut();
        let entry = state.entries.get(state.cursor).cloned();
        if entry.is_some() {
            state.cursor += 1;
        }
        entry
    }

    fn rewind_dir(&mut self) {
        self.0.borrow_mut().cursor = 0;
    }

    fn open(&mut self, name: &str) -> Result<()> {
        let mut state = self.0.borrow_mut();
        if !state.mounted {
            return Err(Error::NoCardPresent);
        }
        if !state.files.contains_key(name) {
            return Err(Error::FileNotFound(name.to_string()));
        }
        state.file_open = true;
        state.open_name = Some(name.to_string());
        state.position = 0;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.0.borrow_mut();
        let Some(name) = state.open_name.clone() else {
            return Ok(0);
        };
        if state.read_fails {
            return Err(Error::Storage("read failed".into()));
        }
        let data = state.files.get(&name).cloned().unwrap_or_default();
        let start = state.position.min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        state.position = start + n;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        let mut state = self.0.borrow_mut();
        state.position = pos as usize;
        state.seeks += 1;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.0.borrow_mut();
        state.file_open = false;
        state.open_name = None;
    }
}

/// Inspection handles for a fake [`Devices`] bundle
#[derive(Debug, Clone, Default)]
pub struct Handles {
    pub clock: FakeClock,
    pub power: FakePower,
    pub switch: FakeSwitch,
    pub decoder: FakeDecoder,
    pub amp: FakeAmp,
    pub visual: FakeVisual,
    pub screen: FakeScreen,
    pub card: FakeStorage,
}

impl Handles {
    pub fn devices(&self) -> Devices {
        Devices {
            clock: Box::new(self.clock.clone()),
            power: Box::new(self.power.clone()),
            switch: Box::new(self.switch.clone()),
            decoder: Box::new(self.decoder.clone()),
            amplifier: Box::new(self.amp.clone()),
            visual: Box::new(self.visual.clone()),
            screen: Box::new(self.screen.clone()),
        }
    }

}

/// Drives a storage monitor through the debounce until the card is up
pub fn insert_card(card: &FakeStorage, now_ms: u64, monitor: &mut StorageMonitor) {
    card.set_detected(true);
    monitor.poll(PowerMode::Normal, now_ms);
    monitor.poll(PowerMode::Normal, now_ms + DEBOUNCE_MS);
    assert!(monitor.is_present());
}

/// Test config with an idle look distinct from everything the effects produce
pub fn test_config() -> Config {
    Config {
        idle_brightness: 40,
        idle_color: (0, 0, 200),
        ..Config::default()
    }
}

/// Everything a playback call borrows, held together for a test
pub struct Rig {
    pub devices: Devices,
    pub storage: StorageMonitor,
    pub profile: AlarmProfile,
    pub config: Config,
    pub clock: FakeClock,
    pub power: FakePower,
    pub switch: FakeSwitch,
    pub decoder: FakeDecoder,
    pub amp: FakeAmp,
    pub visual: FakeVisual,
    pub screen: FakeScreen,
    pub card: FakeStorage,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_files(&[])
    }

    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let handles = Handles {
            card: FakeStorage::with_files(files),
            ..Handles::default()
        };
        let Handles {
            clock,
            power,
            switch,
            decoder,
            amp,
            visual,
            screen,
            card,
        } = handles.clone();
        Self {
            devices: handles.devices(),
            storage: StorageMonitor::new(Box::new(card.clone())),
            profile: AlarmProfile::default(),
            config: test_config(),
            clock,
            power,
            switch,
            decoder,
            amp,
            visual,
            screen,
            card,
        }
    }

    pub fn insert_card(&mut self) {
        let now = TimeSource::millis(&self.clock);
        insert_card(&self.card, now, &mut self.storage);
    }

    pub fn ctx(&mut self) -> Context<'_> {
        Context {
            devices: &mut self.devices,
            storage: &mut self.storage,
            profile: &self.profile,
            config: &self.config,
        }
    }
}
