/*!
 # Alarm playback

 The play-mode state machine. A session is created by `play`, torn down by
 `stop`, and paused in place by `snooze`. Every tick feeds at most one
 storage-sized chunk to the decoder and advances the light effect; work that
 is not due yet waits for a later tick.
*/

use chrono::{NaiveDateTime, Timelike};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::Config;
use crate::effects::{Baseline, EffectStepper};
use crate::hardware::{registers, Devices, PowerMode};
use crate::profile::AlarmProfile;
use crate::storage::StorageMonitor;

/// Bytes read from storage per refill
pub const READ_CHUNK: usize = 512;
/// Bytes the decoder accepts per push
pub const DECODER_CHUNK: usize = 32;
/// Length of the built-in fallback tone
pub const FALLBACK_LEN: usize = 16 * 1024;

/// Built-in tone: 16-bit little-endian mono PCM at 22 050 Hz, a square-wave
/// beep followed by an equal pause
pub static FALLBACK_TONE: [u8; FALLBACK_LEN] = build_tone();

const fn build_tone() -> [u8; FALLBACK_LEN] {
    const PERIOD: usize = 25; // ~880 Hz
    const GATE: usize = FALLBACK_LEN / 4; // samples per beep or pause
    let mut out = [0u8; FALLBACK_LEN];
    let mut i = 0;
    while i < FALLBACK_LEN / 2 {
        let sample: i16 = if (i / GATE) % 2 == 1 {
            0
        } else if i % PERIOD < PERIOD / 2 {
            6000
        } else {
            -6000
        };
        let bytes = sample.to_le_bytes();
        out[2 * i] = bytes[0];
        out[2 * i + 1] = bytes[1];
        i += 1;
    }
    out
}

/// Maps the 0-100 logical volume onto the decoder's inverted attenuation
pub fn attenuation_for(volume: u8) -> u8 {
    100 - volume.min(100)
}

/// Text for the screen: the profile's message, or a greeting for the hour
pub fn alarm_message(profile: &AlarmProfile, now: &NaiveDateTime) -> String {
    if !profile.message.is_empty() {
        return profile.message.clone();
    }
    match now.hour() {
        0..=11 => "Good Morning",
        12..=17 => "Good Afternoon",
        _ => "Good Evening",
    }
    .to_string()
}

/// Why a session is playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayKind {
    /// Scheduled alarm
    Normal,
    /// Menu preview of the audio only
    TestAudio,
    /// Menu preview of the light effect only
    TestVisual,
    /// Menu preview of a whole profile
    TestProfile,
}

/// Outputs a session drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outputs {
    pub audio: bool,
    pub visual: bool,
    pub lamp: bool,
    pub screen: bool,
}

/// What is playing and why
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayMode {
    pub kind: PlayKind,
    pub outputs: Outputs,
}

impl PlayMode {
    pub fn normal() -> Self {
        Self {
            kind: PlayKind::Normal,
            outputs: Outputs {
                audio: true,
                visual: true,
                lamp: true,
                screen: true,
            },
        }
    }

    pub fn test_audio() -> Self {
        Self {
            kind: PlayKind::TestAudio,
            outputs: Outputs {
                audio: true,
                ..Outputs::default()
            },
        }
    }

    pub fn test_visual() -> Self {
        Self {
            kind: PlayKind::TestVisual,
            outputs: Outputs {
                visual: true,
                lamp: true,
                ..Outputs::default()
            },
        }
    }

    pub fn test_profile() -> Self {
        Self {
            kind: PlayKind::TestProfile,
            ..Self::normal()
        }
    }

    pub fn is_test(&self) -> bool {
        self.kind != PlayKind::Normal
    }
}

/// Externally visible playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Off,
    Active(PlayMode),
    Snoozing(PlayMode),
}

/// Everything a playback operation may touch, lent for one call
pub struct Context<'a> {
    pub devices: &'a mut Devices,
    pub storage: &'a mut StorageMonitor,
    pub profile: &'a AlarmProfile,
    pub config: &'a Config,
}

impl Context<'_> {
    fn baseline(&self) -> Baseline {
        Baseline {
            brightness: self.config.idle_brightness,
            color: self.config.idle_color,
        }
    }
}

/// One storage chunk in flight plus the fallback tone cursor
struct AudioFeed {
    buffer: [u8; READ_CHUNK],
    len: usize,
    pos: usize,
    fallback_cursor: usize,
    /// The open file sits at offset zero
    file_at_start: bool,
}

impl AudioFeed {
    fn new() -> Self {
        Self {
            buffer: [0; READ_CHUNK],
            len: 0,
            pos: 0,
            fallback_cursor: 0,
            file_at_start: true,
        }
    }

    /// Loads the next chunk. Returns false when nothing is available this tick.
    fn refill(&mut self, storage: &mut StorageMonitor) -> bool {
        self.pos = 0;
        if storage.is_file_open() {
            match storage.read_chunk(&mut self.buffer) {
                Some(0) if self.file_at_start => {
                    warn!("Audio file is empty, using built-in tone");
                    storage.close_file();
                }
                None => {
                    warn!("Audio file unreadable, using built-in tone");
                    storage.close_file();
                }
                Some(n) => {
                    self.file_at_start = false;
                    if n < READ_CHUNK {
                        trace!("End of file after {} bytes, looping", n);
                        if storage.rewind() {
                            self.file_at_start = true;
                        } else {
                            warn!("Cannot loop audio file, using built-in tone");
                            storage.close_file();
                        }
                    }
                    self.len = n;
                    if n > 0 || storage.is_file_open() {
                        return n > 0;
                    }
                }
            }
        }

        if self.fallback_cursor >= FALLBACK_LEN {
            self.fallback_cursor = 0;
        }
        let n = READ_CHUNK.min(FALLBACK_LEN - self.fallback_cursor);
        self.buffer[..n]
            .copy_from_slice(&FALLBACK_TONE[self.fallback_cursor..self.fallback_cursor + n]);
        self.fallback_cursor += n;
        self.len = n;
        true
    }

    fn feed(&mut self, ctx: &mut Context<'_>) {
        if !ctx.devices.decoder.ready_for_data() {
            return;
        }
        if self.pos >= self.len && !self.refill(ctx.storage) {
            return;
        }
        while self.pos < self.len && ctx.devices.decoder.ready_for_data() {
            let end = (self.pos + DECODER_CHUNK).min(self.len);
            ctx.devices.decoder.push_chunk(&self.buffer[self.pos..end]);
            self.pos = end;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    /// Start time is in epoch seconds, which keep counting in suspend
    Snoozing { since: u64, delay_secs: u64 },
}

struct Session {
    mode: PlayMode,
    started_ms: u64,
    /// Outputs start once this many ms have passed; cleared when they do
    startup_delay_ms: u64,
    phase: Phase,
    audio: Option<AudioFeed>,
    effect: Option<EffectStepper>,
    lamp_active: bool,
    screen_taken: bool,
}

impl Session {
    fn start_outputs(&mut self, ctx: &mut Context<'_>) {
        let outputs = self.mode.outputs;
        if outputs.audio {
            self.start_audio(ctx);
        }
        if outputs.visual {
            let now_ms = ctx.devices.clock.millis();
            self.effect = Some(EffectStepper::start(
                ctx.profile.visual_mode,
                ctx.baseline(),
                now_ms,
            ));
        }
        if outputs.lamp && ctx.profile.lamp.is_enabled() {
            ctx.devices.visual.activate_lamp(&ctx.profile.lamp);
            self.lamp_active = true;
        }
        if outputs.screen && !self.screen_taken {
            let message = alarm_message(ctx.profile, &ctx.devices.clock.now());
            ctx.devices.screen.take_over(&message);
            self.screen_taken = true;
        }
    }

    fn start_audio(&mut self, ctx: &mut Context<'_>) {
        if ctx.devices.power.mode() == PowerMode::Suspend {
            info!("Leaving suspend for audio playback");
            ctx.devices.power.request(PowerMode::LowPower);
        }
        ctx.devices
            .decoder
            .set_attenuation(attenuation_for(ctx.profile.volume));

        let filename = ctx.profile.filename.as_str();
        if filename.is_empty() {
            ctx.storage.close_file();
            debug!("No file configured, using built-in tone");
        } else if !ctx.storage.open_file(filename) {
            warn!("Cannot open {}, using built-in tone", filename);
        }

        // decode time must be written twice to stick
        ctx.devices.decoder.write_register(registers::DECODE_TIME, 0);
        ctx.devices.decoder.write_register(registers::DECODE_TIME, 0);
        ctx.devices.amplifier.enable();
        self.audio = Some(AudioFeed::new());
    }

    /// Mutes first, then cancels the decode if audio was running
    fn stop_audio(&mut self, ctx: &mut Context<'_>) {
        ctx.devices.amplifier.disable();
        if self.audio.take().is_some() {
            ctx.devices
                .decoder
                .write_register(registers::MODE, registers::SM_SDINEW | registers::SM_CANCEL);
        }
        ctx.storage.close_file();
    }

    /// Restores the idle colour and brightness and drops the night lamp
    fn stop_visual(&mut self, ctx: &mut Context<'_>) {
        self.effect = None;
        let baseline = ctx.baseline();
        ctx.devices.visual.set_color(baseline.color);
        ctx.devices.visual.set_brightness(baseline.brightness);
        ctx.devices.visual.show();
        if self.lamp_active {
            ctx.devices.visual.deactivate_lamp();
            self.lamp_active = false;
        }
    }
}

/// Owns the single playback session
#[derive(Default)]
pub struct PlaybackController {
    session: Option<Session>,
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("state", &self.state())
            .finish()
    }
}

impl PlaybackController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlayState {
        match &self.session {
            None => PlayState::Off,
            Some(s) if matches!(s.phase, Phase::Snoozing { .. }) => PlayState::Snoozing(s.mode),
            Some(s) => PlayState::Active(s.mode),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_snoozing(&self) -> bool {
        matches!(self.state(), PlayState::Snoozing(_))
    }

    pub fn audio_running(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.audio.is_some())
    }

    /// Seconds until the snooze ends, 0 when not snoozing
    pub fn snooze_time_remaining(&self, epoch: u64) -> u64 {
        match self.session.as_ref().map(|s| s.phase) {
            Some(Phase::Snoozing { since, delay_secs }) => {
                delay_secs.saturating_sub(epoch.saturating_sub(since))
            }
            _ => 0,
        }
    }

    /// Starts a session, replacing any running one. With a startup delay the
    /// outputs start on the first tick after the delay has passed.
    #[instrument(skip(self, ctx))]
    pub fn play(&mut self, ctx: &mut Context<'_>, mode: PlayMode, startup_delay_ms: u64) {
        if self.session.is_some() {
            self.stop(ctx);
        }
        let mut session = Session {
            mode,
            started_ms: ctx.devices.clock.millis(),
            startup_delay_ms,
            phase: Phase::Running,
            audio: None,
            effect: None,
            lamp_active: false,
            screen_taken: false,
        };
        if startup_delay_ms == 0 {
            session.start_outputs(ctx);
        }
        info!("Playback started: {:?}", mode);
        self.session = Some(session);
    }

    /// Like [`play`](Self::play) but refused when the alarm switch is off,
    /// unless the mode is a test preview
    pub fn play_checked(
        &mut self,
        ctx: &mut Context<'_>,
        mode: PlayMode,
        startup_delay_ms: u64,
    ) -> bool {
        if !mode.is_test() && !ctx.devices.switch.is_on() {
            info!("Alarm switch is off, not playing");
            return false;
        }
        self.play(ctx, mode, startup_delay_ms);
        true
    }

    #[instrument(skip(self, ctx))]
    pub fn stop(&mut self, ctx: &mut Context<'_>) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.stop_audio(ctx);
        session.stop_visual(ctx);
        if session.screen_taken {
            ctx.devices.screen.release();
        }
        info!("Playback stopped");
    }

    /// Pauses outputs for the profile's snooze delay; a zero delay stops
    #[instrument(skip(self, ctx))]
    pub fn snooze(&mut self, ctx: &mut Context<'_>) {
        if !self.is_playing() || self.is_snoozing() {
            return;
        }
        if ctx.profile.snooze_delay == 0 {
            debug!("Snooze disabled, stopping instead");
            self.stop(ctx);
            return;
        }
        let minutes = ctx.profile.snooze_delay as u64;
        self.snooze_for(ctx, minutes);
    }

    /// Snoozes for an explicit number of minutes
    pub fn snooze_for(&mut self, ctx: &mut Context<'_>, minutes: u64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if matches!(session.phase, Phase::Snoozing { .. }) {
            return;
        }
        session.phase = Phase::Snoozing {
            since: ctx.devices.clock.epoch(),
            delay_secs: minutes * 60,
        };
        session.stop_audio(ctx);
        session.stop_visual(ctx);
        info!("Snoozing for {} minutes", minutes);
    }

    #[instrument(skip(self, ctx))]
    pub fn resume(&mut self, ctx: &mut Context<'_>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.phase == Phase::Running {
            return;
        }
        session.phase = Phase::Running;
        session.startup_delay_ms = 0;
        session.start_outputs(ctx);
        info!("Snooze over, playback resumed");
    }

    /// Re-applies the profile volume to running audio
    pub fn apply_volume(&mut self, ctx: &mut Context<'_>) {
        if self.audio_running() {
            ctx.devices
                .decoder
                .set_attenuation(attenuation_for(ctx.profile.volume));
        }
    }

    /// Restarts running audio from scratch, e.g. after the decoder was power-cycled
    pub fn restart_audio(&mut self, ctx: &mut Context<'_>) {
        if let Some(session) = self.session.as_mut() {
            if session.audio.is_some() {
                session.stop_audio(ctx);
                session.start_audio(ctx);
            }
        }
    }

    /// One cooperative step; call once per loop iteration
    pub fn tick(&mut self, ctx: &mut Context<'_>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if !session.mode.is_test() && !ctx.devices.switch.is_on() {
            info!("Alarm switch turned off");
            self.stop(ctx);
            return;
        }

        if let Phase::Snoozing { since, delay_secs } = session.phase {
            if ctx.devices.clock.epoch().saturating_sub(since) >= delay_secs {
                self.resume(ctx);
            }
            return;
        }

        if session.startup_delay_ms > 0 {
            let elapsed = ctx.devices.clock.millis().saturating_sub(session.started_ms);
            if elapsed < session.startup_delay_ms {
                return;
            }
            debug!("Startup delay of {} ms elapsed", session.startup_delay_ms);
            session.startup_delay_ms = 0;
            session.start_outputs(ctx);
        }

        if let Some(feed) = session.audio.as_mut() {
            feed.feed(ctx);
        }
        if let Some(effect) = session.effect.as_mut() {
            let now_ms = ctx.devices.clock.millis();
            let baseline = ctx.baseline();
            effect.step(
                now_ms,
                ctx.profile.effect_speed,
                baseline,
                &mut *ctx.devices.visual,
            );
        }
    }

    #[cfg(test)]
    fn fallback_cursor(&self) -> Option<usize> {
        self.session
            .as_ref()
            .and_then(|s| s.audio.as_ref())
            .map(|feed| feed.fallback_cursor)
    }
}
