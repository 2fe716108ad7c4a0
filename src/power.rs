/*!
 # Power lifecycle

 Follows the external power-mode signal and powers the amplifier and
 decoder down or up as the device enters or leaves suspend.
*/

use tracing::{debug, error, info, warn};

use crate::hardware::PowerMode;
use crate::playback::{Context, PlaybackController};

/// Mode change observed by [`PowerLifecycle::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerTransition {
    pub from: PowerMode,
    pub to: PowerMode,
}

/// Remembers the last seen power mode and whether the decoder is powered
#[derive(Debug, Clone)]
pub struct PowerLifecycle {
    last: PowerMode,
    decoder_powered: bool,
}

impl PowerLifecycle {
    pub fn new(initial: PowerMode) -> Self {
        Self {
            last: initial,
            decoder_powered: true,
        }
    }

    pub fn mode(&self) -> PowerMode {
        self.last
    }

    pub fn decoder_powered(&self) -> bool {
        self.decoder_powered
    }

    /// Samples the power signal and reacts to a change since the last call
    pub fn poll(
        &mut self,
        ctx: &mut Context<'_>,
        playback: &mut PlaybackController,
    ) -> Option<PowerTransition> {
        let mode = ctx.devices.power.mode();
        if mode == self.last {
            return None;
        }
        let transition = PowerTransition {
            from: self.last,
            to: mode,
        };
        self.last = mode;
        debug!("Power mode {:?} -> {:?}", transition.from, transition.to);

        if mode == PowerMode::Suspend {
            self.enter_suspend(ctx, playback);
        } else if transition.from == PowerMode::Suspend {
            self.leave_suspend(ctx, playback);
        }
        Some(transition)
    }

    fn enter_suspend(&mut self, ctx: &mut Context<'_>, playback: &PlaybackController) {
        if playback.audio_running() {
            warn!("Suspend requested while audio is playing, staying in low power");
            ctx.devices.power.request(PowerMode::LowPower);
            self.last = PowerMode::LowPower;
            return;
        }
        info!("Entering suspend, powering down audio");
        ctx.devices.amplifier.disable();
        ctx.devices.decoder.end();
        self.decoder_powered = false;
    }

    fn leave_suspend(&mut self, ctx: &mut Context<'_>, playback: &mut PlaybackController) {
        if self.decoder_powered {
            return;
        }
        info!("Leaving suspend, powering up audio");
        if let Err(e) = ctx.devices.decoder.begin() {
            error!("Decoder failed to start: {}", e);
            return;
        }
        self.decoder_powered = true;
        playback.restart_audio(ctx);
    }
}
