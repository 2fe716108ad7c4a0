/*!
 # Alarm profiles

 Per-slot alarm settings and their fixed-layout record in a byte-addressable
 persistent store. A record lives at `base + index * RECORD_SIZE`; field
 offsets are listed in [`layout`]. The schedule fields come first so the
 scheduler can read them without decoding the whole record.
*/

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, trace, warn};

use crate::effects::VisualMode;
use crate::hardware::Rgb;
use crate::schedule::{Schedule, ALARM_SLOTS};
use crate::{Error, Result};

/// Byte offsets of every field inside a profile record
pub mod layout {
    pub const HOUR: usize = 0;
    pub const MINUTE: usize = 1;
    pub const DAYS: usize = 2;
    pub const SNOOZE_DELAY: usize = 3;
    pub const VOLUME: usize = 4;
    pub const VISUAL_MODE: usize = 5;
    pub const EFFECT_SPEED: usize = 6;
    pub const LAMP_MODE: usize = 7;
    /// Three bytes: red, green, blue
    pub const LAMP_COLOR: usize = 8;
    pub const LAMP_BRIGHTNESS: usize = LAMP_COLOR + 3;
    /// Two bytes, little endian
    pub const LAMP_DURATION: usize = LAMP_BRIGHTNESS + 1;
    pub const FILENAME: usize = LAMP_DURATION + 2;
    /// NUL padded, so at most `FILENAME_LEN - 1` bytes of name
    pub const FILENAME_LEN: usize = 32;
    pub const MESSAGE: usize = FILENAME + FILENAME_LEN;
    pub const MESSAGE_LEN: usize = 32;
    pub const RECORD_SIZE: usize = MESSAGE + MESSAGE_LEN;
}

use layout::RECORD_SIZE;

/// Longest snooze a record may hold, in minutes
pub const MAX_SNOOZE_DELAY: u8 = 60;
/// Fastest effect speed
pub const MAX_EFFECT_SPEED: u8 = 10;
/// Highest night-lamp mode the lamp driver knows
pub const MAX_LAMP_MODE: u8 = 8;

/// Night-lamp settings attached to an alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LampSettings {
    /// 0 = lamp off, other values select the lamp driver's mode
    pub mode: u8,
    pub color: Rgb,
    pub brightness: u8,
    /// Minutes the lamp stays on once activated
    pub duration: u16,
}

impl Default for LampSettings {
    fn default() -> Self {
        Self {
            mode: 0,
            color: (255, 160, 60),
            brightness: 40,
            duration: 30,
        }
    }
}

impl LampSettings {
    pub fn is_enabled(&self) -> bool {
        self.mode != 0
    }
}

/// Settings for one alarm slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmProfile {
    /// Audio file on removable storage; empty plays the built-in tone
    pub filename: String,
    /// Text shown while ringing; empty derives a greeting from the time
    pub message: String,
    /// Snooze length in minutes; 0 turns snooze into stop
    pub snooze_delay: u8,
    /// Logical volume 0-100
    pub volume: u8,
    pub visual_mode: VisualMode,
    pub effect_speed: u8,
    pub hour: u8,
    pub minute: u8,
    /// Day-of-week mask, bit 0 = Sunday
    pub days: u8,
    pub lamp: LampSettings,
}

impl Default for AlarmProfile {
    fn default() -> Self {
        Self {
            filename: String::new(),
            message: String::new(),
            snooze_delay: 9,
            volume: 70,
            visual_mode: VisualMode::Fading,
            effect_speed: 5,
            hour: 7,
            minute: 0,
            days: 0,
            lamp: LampSettings::default(),
        }
    }
}

impl AlarmProfile {
    pub fn schedule(&self) -> Schedule {
        Schedule::new(self.hour, self.minute, self.days)
    }

    /// Serializes into the fixed record layout
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut record = [0u8; RECORD_SIZE];
        record[layout::HOUR] = self.hour;
        record[layout::MINUTE] = self.minute;
        record[layout::DAYS] = self.days;
        record[layout::SNOOZE_DELAY] = self.snooze_delay;
        record[layout::VOLUME] = self.volume.min(100);
        record[layout::VISUAL_MODE] = self.visual_mode as u8;
        record[layout::EFFECT_SPEED] = self.effect_speed;
        record[layout::LAMP_MODE] = self.lamp.mode;
        record[layout::LAMP_COLOR] = self.lamp.color.0;
        record[layout::LAMP_COLOR + 1] = self.lamp.color.1;
        record[layout::LAMP_COLOR + 2] = self.lamp.color.2;
        record[layout::LAMP_BRIGHTNESS] = self.lamp.brightness;
        record[layout::LAMP_DURATION..layout::LAMP_DURATION + 2]
            .copy_from_slice(&self.lamp.duration.to_le_bytes());
        encode_str(
            &self.filename,
            &mut record[layout::FILENAME..layout::FILENAME + layout::FILENAME_LEN],
        );
        encode_str(
            &self.message,
            &mut record[layout::MESSAGE..layout::MESSAGE + layout::MESSAGE_LEN],
        );
        record
    }

    /// Deserializes a record, replacing garbled fields with safe defaults
    pub fn decode(record: &[u8; RECORD_SIZE]) -> Self {
        let defaults = Self::default();
        let schedule = decode_schedule(&record[layout::HOUR..layout::DAYS + 1]);

        let snooze_delay = match record[layout::SNOOZE_DELAY] {
            delay if delay <= MAX_SNOOZE_DELAY => delay,
            delay => {
                warn!(
                    "Stored snooze delay {} is invalid, using {}",
                    delay, defaults.snooze_delay
                );
                defaults.snooze_delay
            }
        };
        let effect_speed = match record[layout::EFFECT_SPEED] {
            speed @ 1..=MAX_EFFECT_SPEED => speed,
            speed => {
                warn!(
                    "Stored effect speed {} is invalid, using {}",
                    speed, defaults.effect_speed
                );
                defaults.effect_speed
            }
        };

        Self {
            filename: decode_str(&record[layout::FILENAME..layout::FILENAME + layout::FILENAME_LEN]),
            message: decode_str(&record[layout::MESSAGE..layout::MESSAGE + layout::MESSAGE_LEN]),
            snooze_delay,
            volume: record[layout::VOLUME].min(100),
            visual_mode: VisualMode::from(record[layout::VISUAL_MODE]),
            effect_speed,
            hour: schedule.hour,
            minute: schedule.minute,
            days: schedule.days,
            lamp: decode_lamp(&record[layout::LAMP_MODE..layout::FILENAME]),
        }
    }
}

/// Mode, colour, brightness, duration. An unknown mode (erased cells read
/// 0xff) leaves the lamp off with default settings.
fn decode_lamp(bytes: &[u8]) -> LampSettings {
    let mode = bytes[0];
    if mode > MAX_LAMP_MODE {
        warn!("Stored lamp mode {} is invalid, lamp off", mode);
        return LampSettings::default();
    }
    LampSettings {
        mode,
        color: (bytes[1], bytes[2], bytes[3]),
        brightness: bytes[4],
        duration: u16::from_le_bytes([bytes[5], bytes[6]]),
    }
}

/// Hour, minute, days. An impossible time disables the slot.
fn decode_schedule(bytes: &[u8]) -> Schedule {
    let (hour, minute, days) = (bytes[0], bytes[1], bytes[2] & 0x7f);
    if hour > 23 || minute > 59 {
        warn!("Stored alarm time {}:{} is invalid, disabling slot", hour, minute);
        return Schedule::default();
    }
    Schedule::new(hour, minute, days)
}

/// Copies as much of `value` as fits, keeping a NUL terminator and char boundaries
fn encode_str(value: &str, field: &mut [u8]) {
    let mut end = value.len().min(field.len() - 1);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    field[..end].copy_from_slice(&value.as_bytes()[..end]);
}

fn decode_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    match std::str::from_utf8(&field[..end]) {
        Ok(s) if s.chars().all(|c| !c.is_control()) => s.to_string(),
        _ => {
            debug!("Discarding garbled string field");
            String::new()
        }
    }
}

/// Byte-addressable persistent medium (EEPROM-like)
pub trait ByteStore {
    fn len(&self) -> usize;
    fn read_byte(&self, addr: usize) -> Result<u8>;
    fn write_byte(&mut self, addr: usize, value: u8) -> Result<()>;

    /// Writes only when the stored byte differs. Returns whether it wrote.
    fn update_byte(&mut self, addr: usize, value: u8) -> Result<bool> {
        if self.read_byte(addr)? == value {
            return Ok(false);
        }
        self.write_byte(addr, value)?;
        Ok(true)
    }

    /// Flushes buffered writes to the medium
    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ByteStore for Box<dyn ByteStore> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn read_byte(&self, addr: usize) -> Result<u8> {
        (**self).read_byte(addr)
    }

    fn write_byte(&mut self, addr: usize, value: u8) -> Result<()> {
        (**self).write_byte(addr, value)
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }
}

/// In-memory store, erased to 0xFF, counting physical writes
#[derive(Debug, Clone)]
pub struct MemoryStore {
    bytes: Vec<u8>,
    writes: usize,
}

impl MemoryStore {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0xff; size],
            writes: 0,
        }
    }

    /// Number of physical byte writes so far
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl ByteStore for MemoryStore {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read_byte(&self, addr: usize) -> Result<u8> {
        self.bytes
            .get(addr)
            .copied()
            .ok_or(Error::AddressOutOfRange {
                addr,
                len: self.bytes.len(),
            })
    }

    fn write_byte(&mut self, addr: usize, value: u8) -> Result<()> {
        let len = self.bytes.len();
        let byte = self
            .bytes
            .get_mut(addr)
            .ok_or(Error::AddressOutOfRange { addr, len })?;
        *byte = value;
        self.writes += 1;
        Ok(())
    }
}

/// Store backed by a fixed-size image file, written back on commit
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    image: MemoryStore,
    dirty: bool,
}

impl FileStore {
    /// Opens the image, creating an erased one of `size` bytes if missing
    pub fn open(path: impl AsRef<Path>, size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut image = MemoryStore::new(size);
        match fs::read(&path) {
            Ok(bytes) => {
                let n = bytes.len().min(size);
                image.bytes[..n].copy_from_slice(&bytes[..n]);
                debug!("Loaded {} byte store image from {}", n, path.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Creating new store image at {}", path.display());
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, &image.bytes)?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            path,
            image,
            dirty: false,
        })
    }
}

impl ByteStore for FileStore {
    fn len(&self) -> usize {
        self.image.len()
    }

    fn read_byte(&self, addr: usize) -> Result<u8> {
        self.image.read_byte(addr)
    }

    fn write_byte(&mut self, addr: usize, value: u8) -> Result<()> {
        self.image.write_byte(addr, value)?;
        self.dirty = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.dirty {
            fs::write(&self.path, &self.image.bytes)?;
            self.dirty = false;
            trace!("Store image written to {}", self.path.display());
        }
        Ok(())
    }
}

/// Reads and writes profile records. Stateless apart from the store itself.
pub struct ProfileStore<S: ByteStore = Box<dyn ByteStore>> {
    store: S,
    base: usize,
}

impl<S: ByteStore> ProfileStore<S> {
    pub fn new(store: S, base: usize) -> Self {
        Self { store, base }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Address of `field` in slot `index`, or an error for a bad slot
    pub fn address(&self, index: usize, field: usize) -> Result<usize> {
        if index >= ALARM_SLOTS {
            return Err(Error::ProfileIndex(index));
        }
        Ok(self.base + index * RECORD_SIZE + field)
    }

    #[instrument(skip(self))]
    pub fn load(&self, index: usize) -> Result<AlarmProfile> {
        let start = self.address(index, 0)?;
        let mut record = [0u8; RECORD_SIZE];
        for (i, byte) in record.iter_mut().enumerate() {
            *byte = self.store.read_byte(start + i)?;
        }
        let profile = AlarmProfile::decode(&record);
        debug!("Loaded profile {}: {:?}", index, profile);
        Ok(profile)
    }

    /// Reads only the time and day mask of a slot
    pub fn load_schedule(&self, index: usize) -> Result<Schedule> {
        let start = self.address(index, layout::HOUR)?;
        let mut bytes = [0u8; 3];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.store.read_byte(start + i)?;
        }
        Ok(decode_schedule(&bytes))
    }

    /// Writes a profile, skipping bytes that already match. Returns the
    /// number of bytes physically written.
    #[instrument(skip(self, profile))]
    pub fn save(&mut self, index: usize, profile: &AlarmProfile) -> Result<usize> {
        let start = self.address(index, 0)?;
        let mut written = 0;
        for (i, byte) in profile.encode().iter().enumerate() {
            if self.store.update_byte(start + i, *byte)? {
                written += 1;
            }
        }
        self.store.commit()?;
        info!("Saved profile {} ({} bytes changed)", index, written);
        Ok(written)
    }
}
