/*!
 # Effect modes for the light strip

 This module defines the visual effects shown while an alarm rings and the
 stepper that advances them. Steps are paced by a deadline checked on each
 tick, never by sleeping.
*/

use tracing::trace;

use crate::hardware::{Rgb, VisualOutput};

/// Brightness added on top of the idle baseline while an effect is lit
pub const EFFECT_BOOST: u8 = 25;
/// Fading swing above the baseline
pub const FADE_SPAN: u8 = 20;
/// Fading moves this much per step
pub const FADE_STEP: u8 = 5;
/// Rainbow phase advance per step
pub const RAINBOW_STEP: u8 = 5;

const RED: Rgb = (255, 0, 0);
const WHITE: Rgb = (255, 255, 255);

/// Available visual effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum VisualMode {
    /// Leave the strip alone
    #[default]
    None = 0,
    /// Blink the idle colour
    Flashing = 1,
    /// Blink in red
    RedFlash = 2,
    /// Alternate white and the idle colour
    WhiteFlash = 3,
    /// Breathe the brightness up and down
    Fading = 4,
    /// Cycle through the colour wheel
    Rainbow = 5,
}

impl From<u8> for VisualMode {
    fn from(value: u8) -> Self {
        match value {
            1 => VisualMode::Flashing,
            2 => VisualMode::RedFlash,
            3 => VisualMode::WhiteFlash,
            4 => VisualMode::Fading,
            5 => VisualMode::Rainbow,
            _ => VisualMode::None,
        }
    }
}

impl std::fmt::Display for VisualMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VisualMode::None => write!(f, "none"),
            VisualMode::Flashing => write!(f, "flashing"),
            VisualMode::RedFlash => write!(f, "red_flash"),
            VisualMode::WhiteFlash => write!(f, "white_flash"),
            VisualMode::Fading => write!(f, "fading"),
            VisualMode::Rainbow => write!(f, "rainbow"),
        }
    }
}

impl VisualMode {
    /// Milliseconds between steps. Higher speed means shorter delay;
    /// [`VisualMode::None`] is never stepped.
    pub fn step_delay_ms(self, speed: u8) -> u64 {
        let speed = speed.max(1) as u64;
        match self {
            VisualMode::None => 0,
            VisualMode::Fading | VisualMode::Rainbow => 250 / speed,
            VisualMode::Flashing | VisualMode::RedFlash | VisualMode::WhiteFlash => 2000 / speed,
        }
    }
}

/// Colour wheel: red to green, green to blue, blue back to red
pub fn wheel(pos: u8) -> Rgb {
    let pos = pos as u16;
    let (r, g, b) = match pos {
        0..=84 => (255 - pos * 3, pos * 3, 0),
        85..=169 => {
            let p = pos - 85;
            (0, 255 - p * 3, p * 3)
        }
        _ => {
            let p = pos - 170;
            (p * 3, 0, 255 - p * 3)
        }
    };
    (r as u8, g as u8, b as u8)
}

/// Idle appearance the strip returns to when no effect runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    pub brightness: u8,
    pub color: Rgb,
}

/// Stepping state of the running effect
#[derive(Debug, Clone)]
pub struct EffectStepper {
    mode: VisualMode,
    /// Brightness for fading, wheel phase for rainbow
    value: u8,
    rising: bool,
    lit: bool,
    next_step_ms: u64,
}

impl EffectStepper {
    /// Resets phase and direction. Fading starts at the baseline brightness,
    /// everything else at zero. The first step happens on the next tick.
    pub fn start(mode: VisualMode, baseline: Baseline, now_ms: u64) -> Self {
        let value = if mode == VisualMode::Fading {
            baseline.brightness
        } else {
            0
        };
        Self {
            mode,
            value,
            rising: true,
            lit: false,
            next_step_ms: now_ms,
        }
    }

    pub fn mode(&self) -> VisualMode {
        self.mode
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    /// Advances one step if the deadline has passed. Returns whether it stepped.
    pub fn step(
        &mut self,
        now_ms: u64,
        speed: u8,
        baseline: Baseline,
        out: &mut dyn VisualOutput,
    ) -> bool {
        if self.mode == VisualMode::None || now_ms < self.next_step_ms {
            return false;
        }

        let lit_brightness = baseline.brightness.saturating_add(EFFECT_BOOST);
        match self.mode {
            VisualMode::None => {}
            VisualMode::Flashing | VisualMode::RedFlash => {
                self.lit = !self.lit;
                if self.mode == VisualMode::RedFlash {
                    out.set_color(RED);
                } else {
                    out.set_color(baseline.color);
                }
                out.set_brightness(if self.lit { lit_brightness } else { 0 });
            }
            VisualMode::WhiteFlash => {
                self.lit = !self.lit;
                out.set_color(if self.lit { WHITE } else { baseline.color });
                out.set_brightness(lit_brightness);
            }
            VisualMode::Fading => {
                let (low, high) = fade_bounds(baseline.brightness);
                if self.rising {
                    self.value = self.value.saturating_add(FADE_STEP).min(high);
                    if self.value >= high {
                        self.rising = false;
                    }
                } else {
                    self.value = self.value.saturating_sub(FADE_STEP).max(low);
                    if self.value <= low {
                        self.rising = true;
                    }
                }
                out.set_color(baseline.color);
                out.set_brightness(self.value);
            }
            VisualMode::Rainbow => {
                self.value = ((self.value as u16 + RAINBOW_STEP as u16) % 255) as u8;
                out.set_color(wheel(self.value));
                out.set_brightness(lit_brightness);
            }
        }
        out.show();

        self.next_step_ms = now_ms + self.mode.step_delay_ms(speed);
        trace!(
            "Effect {} stepped to value {} (next at {} ms)",
            self.mode,
            self.value,
            self.next_step_ms
        );
        true
    }
}

/// Fading swings between these brightness levels
pub fn fade_bounds(baseline: u8) -> (u8, u8) {
    let low = if baseline >= 25 { baseline - FADE_SPAN } else { 5 };
    (low, baseline.saturating_add(FADE_SPAN))
}
