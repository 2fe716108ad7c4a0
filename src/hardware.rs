/*!
 # Hardware capabilities

 Interfaces to every external collaborator the engine drives. Nothing in
 the core touches a global: the concrete drivers are bundled into
 [`Devices`] once and handed to the engine at construction.
*/

use chrono::NaiveDateTime;

use crate::profile::LampSettings;
use crate::Result;

/// Colour as (R, G, B), each 0-255
pub type Rgb = (u8, u8, u8);

/// Power state reported by the power-management collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerMode {
    /// Fully awake, millisecond clock available
    #[default]
    Normal,
    /// Reduced power, millisecond clock still usable
    LowPower,
    /// Deepest saving mode; only the epoch clock and periodic wake events run
    Suspend,
}

impl PowerMode {
    /// Whether the millisecond clock can be trusted in this mode
    pub fn has_millis(self) -> bool {
        self != PowerMode::Suspend
    }
}

/// Wall clock plus the two monotonic counters the engine needs
pub trait TimeSource {
    /// Current local date and time (weekday included)
    fn now(&self) -> NaiveDateTime;
    /// Milliseconds since start-up; unusable in [`PowerMode::Suspend`]
    fn millis(&self) -> u64;
    /// Seconds counter that keeps running in every power mode
    fn epoch(&self) -> u64;
}

/// Power-mode signal and transition requests
pub trait PowerControl {
    fn mode(&self) -> PowerMode;
    fn request(&mut self, mode: PowerMode);
}

/// Physical alarm on/off switch
pub trait AlarmSwitch {
    fn is_on(&self) -> bool;
}

/// Register addresses and bits understood by the audio decoder
pub mod registers {
    /// Mode control register
    pub const MODE: u8 = 0x00;
    /// Decode time register (seconds played)
    pub const DECODE_TIME: u8 = 0x04;
    /// Software reset
    pub const SM_RESET: u16 = 0x0004;
    /// Cancel the current decode
    pub const SM_CANCEL: u16 = 0x0008;
    /// Native SPI mode, always set
    pub const SM_SDINEW: u16 = 0x0800;
}

/// Audio decoder chip
///
/// Attenuation is the chip's own inverted scale: 0 is loudest, 100 silent.
pub trait AudioDecoder {
    /// Power up and reset the decoder
    fn begin(&mut self) -> Result<()>;
    /// Power the decoder down
    fn end(&mut self);
    fn set_attenuation(&mut self, attenuation: u8);
    fn write_register(&mut self, register: u8, value: u16);
    /// Whether the decoder can accept another chunk
    fn ready_for_data(&self) -> bool;
    /// Push at most [`crate::playback::DECODER_CHUNK`] bytes
    fn push_chunk(&mut self, data: &[u8]);
}

/// Output amplifier stage. Implementations may stall briefly to settle.
pub trait Amplifier {
    fn enable(&mut self);
    fn disable(&mut self);
}

/// Light strip and night lamp
pub trait VisualOutput {
    fn set_brightness(&mut self, value: u8);
    fn set_color(&mut self, color: Rgb);
    /// Commit pending colour/brightness changes to the strip
    fn show(&mut self);
    fn activate_lamp(&mut self, lamp: &LampSettings);
    fn deactivate_lamp(&mut self);
}

/// Character display takeover during an alarm
pub trait Screen {
    fn take_over(&mut self, message: &str);
    fn release(&mut self);
}

/// Every driver the engine needs, injected once at construction
pub struct Devices {
    pub clock: Box<dyn TimeSource>,
    pub power: Box<dyn PowerControl>,
    pub switch: Box<dyn AlarmSwitch>,
    pub decoder: Box<dyn AudioDecoder>,
    pub amplifier: Box<dyn Amplifier>,
    pub visual: Box<dyn VisualOutput>,
    pub screen: Box<dyn Screen>,
}

impl std::fmt::Debug for Devices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Devices")
            .field("power", &self.power.mode())
            .field("switch", &self.switch.is_on())
            .finish_non_exhaustive()
    }
}
