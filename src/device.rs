use chrono::{Local, NaiveDateTime};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument, trace, warn};

use crate::audio::{PcmDecoder, SilentDecoder};
use crate::config::Settings;
use crate::hardware::{
    AlarmSwitch, AudioDecoder, Devices, PowerControl, PowerMode, Rgb, Screen, TimeSource,
    VisualOutput,
};
use crate::profile::LampSettings;

/// Local wall clock with a millisecond counter from process start
#[derive(Debug, Clone)]
pub struct SystemClock {
    started: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn millis(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn epoch(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

/// Alarm switch that another task can flip while the engine owns a clone
#[derive(Debug, Clone)]
pub struct SharedSwitch(Arc<AtomicBool>);

impl SharedSwitch {
    pub fn new(on: bool) -> Self {
        Self(Arc::new(AtomicBool::new(on)))
    }

    pub fn set(&self, on: bool) {
        if self.0.swap(on, Ordering::Relaxed) != on {
            info!("Alarm switch turned {}", if on { "on" } else { "off" });
        }
    }
}

impl AlarmSwitch for SharedSwitch {
    fn is_on(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Power-mode signal shared the same way as [`SharedSwitch`]
#[derive(Debug, Clone, Default)]
pub struct SharedPower(Arc<AtomicU8>);

impl SharedPower {
    fn encode(mode: PowerMode) -> u8 {
        match mode {
            PowerMode::Normal => 0,
            PowerMode::LowPower => 1,
            PowerMode::Suspend => 2,
        }
    }

    /// Sets the mode as the power manager would
    pub fn set(&self, mode: PowerMode) {
        self.0.store(Self::encode(mode), Ordering::Relaxed);
    }
}

impl PowerControl for SharedPower {
    fn mode(&self) -> PowerMode {
        match self.0.load(Ordering::Relaxed) {
            0 => PowerMode::Normal,
            1 => PowerMode::LowPower,
            _ => PowerMode::Suspend,
        }
    }

    fn request(&mut self, mode: PowerMode) {
        info!("Power mode {:?} requested", mode);
        self.set(mode);
    }
}

/// Light strip stand-in that logs every committed frame
#[derive(Debug, Clone, Default)]
pub struct TracingLamp {
    brightness: u8,
    color: Rgb,
    lamp: Option<LampSettings>,
}

impl VisualOutput for TracingLamp {
    fn set_brightness(&mut self, value: u8) {
        self.brightness = value;
    }

    fn set_color(&mut self, color: Rgb) {
        self.color = color;
    }

    fn show(&mut self) {
        let (r, g, b) = self.color;
        trace!(
            "Strip: #{:02x}{:02x}{:02x} at brightness {}",
            r,
            g,
            b,
            self.brightness
        );
    }

    fn activate_lamp(&mut self, lamp: &LampSettings) {
        info!(
            "Night lamp on: mode {}, colour {:?}, brightness {}, {} min",
            lamp.mode, lamp.color, lamp.brightness, lamp.duration
        );
        self.lamp = Some(*lamp);
    }

    fn deactivate_lamp(&mut self) {
        if self.lamp.take().is_some() {
            info!("Night lamp off");
        }
    }
}

/// Screen stand-in that logs the takeover message
#[derive(Debug, Clone, Default)]
pub struct TracingScreen {
    message: Option<String>,
}

impl Screen for TracingScreen {
    fn take_over(&mut self, message: &str) {
        info!("Screen: {}", message);
        self.message = Some(message.to_string());
    }

    fn release(&mut self) {
        if self.message.take().is_some() {
            debug!("Screen released");
        }
    }
}

/// Handles a host binary keeps to drive the inputs the engine only reads
#[derive(Debug, Clone)]
pub struct HostControls {
    pub switch: SharedSwitch,
    pub power: SharedPower,
}

/// Builds the host device bundle. Without a usable audio output the decoder
/// falls back to a silent one so alarms still run.
#[instrument(skip(settings))]
pub fn host_devices(settings: &Settings) -> (Devices, HostControls) {
    let switch = SharedSwitch::new(true);
    let power = SharedPower::default();

    let (decoder, amplifier) = match PcmDecoder::new(settings.audio_device.clone()) {
        Ok(decoder) => {
            let amp = decoder.amplifier();
            (Box::new(decoder) as Box<dyn AudioDecoder>, amp)
        }
        Err(e) => {
            warn!("Audio output unavailable, running silent: {}", e);
            let decoder = SilentDecoder::new();
            let amp = decoder.amplifier();
            (Box::new(decoder) as Box<dyn AudioDecoder>, amp)
        }
    };

    let devices = Devices {
        clock: Box::new(SystemClock::default()),
        power: Box::new(power.clone()),
        switch: Box::new(switch.clone()),
        decoder,
        amplifier: Box::new(amplifier),
        visual: Box::new(TracingLamp::default()),
        screen: Box::new(TracingScreen::default()),
    };
    (devices, HostControls { switch, power })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_switch_is_seen_by_clones() {
        let switch = SharedSwitch::new(true);
        let engine_side = switch.clone();
        switch.set(false);
        assert!(!engine_side.is_on());
    }

    #[test]
    fn shared_power_round_trips_modes() {
        let power = SharedPower::default();
        let mut engine_side = power.clone();
        assert_eq!(engine_side.mode(), PowerMode::Normal);
        power.set(PowerMode::Suspend);
        assert_eq!(engine_side.mode(), PowerMode::Suspend);
        engine_side.request(PowerMode::LowPower);
        assert_eq!(power.mode(), PowerMode::LowPower);
    }

    #[test]
    fn system_clock_counts_up() {
        let clock = SystemClock::default();
        let first = clock.millis();
        assert!(clock.millis() >= first);
        assert!(clock.epoch() > 1_600_000_000);
    }
}
