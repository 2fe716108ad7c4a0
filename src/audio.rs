use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::hardware::{registers, Amplifier, AudioDecoder};
use crate::{Error, Result};

/// Rate the pushed PCM data is interpreted at
pub const SAMPLE_RATE: u32 = 22_050;
/// Queued bytes above which the decoder stops asking for data
pub const QUEUE_LIMIT: usize = 8 * 1024;
/// Settling time of the output stage after switching it
pub const AMP_SETTLE_MS: u64 = 20;

/// Sample queue shared between the engine thread and the output callback
#[derive(Debug)]
struct PcmQueue {
    samples: VecDeque<i16>,
    /// Low byte of a sample split across two pushes
    carry: Option<u8>,
    gain: f32,
    /// Input samples consumed per output frame
    step: f32,
    phase: f32,
    /// Samples played since the last decode time reset
    played: u64,
}

impl PcmQueue {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            carry: None,
            gain: 1.0,
            step: 1.0,
            phase: 0.0,
            played: 0,
        }
    }

    fn queued_bytes(&self) -> usize {
        self.samples.len() * 2 + self.carry.map_or(0, |_| 1)
    }

    fn push_bytes(&mut self, data: &[u8]) {
        let mut bytes = data.iter().copied();
        if let Some(low) = self.carry.take() {
            match bytes.next() {
                Some(high) => self.samples.push_back(i16::from_le_bytes([low, high])),
                None => self.carry = Some(low),
            }
        }
        while let Some(low) = bytes.next() {
            match bytes.next() {
                Some(high) => self.samples.push_back(i16::from_le_bytes([low, high])),
                None => self.carry = Some(low),
            }
        }
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.carry = None;
        self.phase = 0.0;
    }

    /// Next output value in -1.0..=1.0; silence when starved
    fn next_frame(&mut self) -> f32 {
        let Some(&sample) = self.samples.front() else {
            return 0.0;
        };
        self.phase += self.step;
        while self.phase >= 1.0 {
            self.phase -= 1.0;
            if self.samples.pop_front().is_some() {
                self.played += 1;
            }
        }
        sample as f32 / i16::MAX as f32 * self.gain
    }
}

/// Output-stage gate shared with the stream callback. Disabled means silence.
#[derive(Debug, Clone, Default)]
pub struct AmpGate {
    enabled: Arc<AtomicBool>,
    settle: bool,
}

impl AmpGate {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn switch(&mut self, on: bool) {
        if self.enabled.swap(on, Ordering::Relaxed) == on {
            return;
        }
        debug!("Amplifier {}", if on { "enabled" } else { "disabled" });
        if self.settle {
            std::thread::sleep(Duration::from_millis(AMP_SETTLE_MS));
        }
    }
}

impl Amplifier for AmpGate {
    fn enable(&mut self) {
        self.switch(true);
    }

    fn disable(&mut self) {
        self.switch(false);
    }
}

/// Host stand-in for the decoder chip: 16-bit little-endian mono PCM played
/// through a cpal output stream
pub struct PcmDecoder {
    device_name: Option<String>,
    queue: Arc<Mutex<PcmQueue>>,
    gate: AmpGate,
    mode: u16,
    /// Kept alive while the decoder is powered
    stream: Option<cpal::Stream>,
}

impl std::fmt::Debug for PcmDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmDecoder")
            .field("device_name", &self.device_name)
            .field("powered", &self.stream.is_some())
            .field("mode", &self.mode)
            .finish()
    }
}

impl PcmDecoder {
    /// Opens the named output device (substring match) or the default one
    pub fn new(device_name: Option<String>) -> Result<Self> {
        let mut decoder = Self {
            device_name,
            queue: Arc::new(Mutex::new(PcmQueue::new())),
            gate: AmpGate {
                enabled: Arc::new(AtomicBool::new(false)),
                settle: true,
            },
            mode: registers::SM_SDINEW,
            stream: None,
        };
        decoder.begin()?;
        Ok(decoder)
    }

    /// Amplifier handle gating this decoder's output
    pub fn amplifier(&self) -> AmpGate {
        self.gate.clone()
    }

    fn output_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        if let Some(name) = &self.device_name {
            info!("Searching for audio output device with name: {}", name);
            let devices = host.output_devices().map_err(|e| {
                error!("Failed to enumerate audio output devices: {}", e);
                Error::Audio(format!("Failed to enumerate output devices: {}", e))
            })?;
            for device in devices {
                if let Ok(device_name) = device.name() {
                    if device_name.contains(name.as_str()) {
                        info!("Found matching audio output device: {}", device_name);
                        return Ok(device);
                    }
                }
            }
            return Err(Error::Audio(format!(
                "Could not find audio output device: {}",
                name
            )));
        }

        let device = host.default_output_device().ok_or_else(|| {
            error!("No default audio output device available");
            Error::Audio("No default audio output device found".into())
        })?;
        info!(
            "Using default audio output device: {}",
            device.name().unwrap_or_default()
        );
        Ok(device)
    }

    #[instrument(skip(self))]
    fn open_stream(&self) -> Result<cpal::Stream> {
        let device = self.output_device()?;
        let supported = device.default_output_config().map_err(|e| {
            error!("Failed to get default output config: {}", e);
            Error::Audio(format!("Failed to get default output config: {}", e))
        })?;
        let rate = supported.sample_rate().0;
        debug!("Audio output rate: {} Hz, resampling from {} Hz", rate, SAMPLE_RATE);
        self.queue.lock().step = SAMPLE_RATE as f32 / rate as f32;

        let config: cpal::StreamConfig = supported.config();
        let stream = match supported.sample_format() {
            SampleFormat::F32 => self.build_output_stream::<f32>(&device, &config),
            SampleFormat::I16 => self.build_output_stream::<i16>(&device, &config),
            SampleFormat::U16 => self.build_output_stream::<u16>(&device, &config),
            other => {
                error!("Unsupported sample format {:?}", other);
                return Err(Error::Audio("Unsupported sample format".into()));
            }
        }?;
        stream
            .play()
            .map_err(|e| Error::Audio(format!("Stream play error: {}", e)))?;
        Ok(stream)
    }

    fn build_output_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32> + Send + 'static,
    {
        let queue = self.queue.clone();
        let gate = self.gate.enabled.clone();
        let channels = config.channels.max(1) as usize;
        debug!("Stream config: {:?}", config);

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let mut queue = queue.lock();
                    let audible = gate.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        // the queue drains even while muted so the feed never stalls
                        let value = queue.next_frame();
                        let value = if audible { value } else { 0.0 };
                        for out in frame.iter_mut() {
                            *out = T::from_sample(value);
                        }
                    }
                },
                |err| error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| Error::Audio(format!("Stream build error: {}", e)))
    }
}

impl AudioDecoder for PcmDecoder {
    fn begin(&mut self) -> Result<()> {
        if self.stream.is_none() {
            self.stream = Some(self.open_stream()?);
            info!("Audio decoder powered up");
        }
        self.queue.lock().clear();
        self.mode = registers::SM_SDINEW;
        Ok(())
    }

    fn end(&mut self) {
        if self.stream.take().is_some() {
            info!("Audio decoder powered down");
        }
        self.queue.lock().clear();
    }

    fn set_attenuation(&mut self, attenuation: u8) {
        let attenuation = attenuation.min(100);
        self.queue.lock().gain = (100 - attenuation) as f32 / 100.0;
        debug!("Attenuation set to {}", attenuation);
    }

    fn write_register(&mut self, register: u8, value: u16) {
        trace!("Register {:#04x} <- {:#06x}", register, value);
        match register {
            registers::MODE => {
                if value & (registers::SM_CANCEL | registers::SM_RESET) != 0 {
                    debug!("Decode cancelled");
                    self.queue.lock().clear();
                }
                self.mode = value & !(registers::SM_CANCEL | registers::SM_RESET);
            }
            registers::DECODE_TIME => self.queue.lock().played = value as u64,
            _ => warn!("Write to unsupported register {:#04x}", register),
        }
    }

    fn ready_for_data(&self) -> bool {
        self.stream.is_some() && self.queue.lock().queued_bytes() < QUEUE_LIMIT
    }

    fn push_chunk(&mut self, data: &[u8]) {
        self.queue.lock().push_bytes(data);
    }
}

/// Decoder for machines without audio output: accepts and discards data
#[derive(Debug, Default)]
pub struct SilentDecoder {
    powered: bool,
    bytes: u64,
}

impl SilentDecoder {
    pub fn new() -> Self {
        Self {
            powered: true,
            bytes: 0,
        }
    }

    /// Bytes discarded so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn amplifier(&self) -> AmpGate {
        AmpGate::default()
    }
}

impl AudioDecoder for SilentDecoder {
    fn begin(&mut self) -> Result<()> {
        self.powered = true;
        Ok(())
    }

    fn end(&mut self) {
        self.powered = false;
    }

    fn set_attenuation(&mut self, _attenuation: u8) {}

    fn write_register(&mut self, register: u8, value: u16) {
        trace!("Register {:#04x} <- {:#06x} (silent)", register, value);
    }

    fn ready_for_data(&self) -> bool {
        self.powered
    }

    fn push_chunk(&mut self, data: &[u8]) {
        self.bytes += data.len() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_pushes_carry_the_low_byte() {
        let mut queue = PcmQueue::new();
        queue.push_bytes(&[0x34]);
        assert_eq!(queue.queued_bytes(), 1);
        queue.push_bytes(&[0x12, 0xff, 0x7f]);
        assert_eq!(queue.samples, VecDeque::from(vec![0x1234, i16::MAX]));
        assert_eq!(queue.carry, None);
    }

    #[test]
    fn frames_follow_gain_and_rate() {
        let mut queue = PcmQueue::new();
        queue.push_bytes(&i16::MAX.to_le_bytes());
        queue.push_bytes(&0i16.to_le_bytes());
        queue.gain = 0.5;
        queue.step = 0.5;
        assert_eq!(queue.next_frame(), 0.5);
        assert_eq!(queue.next_frame(), 0.5);
        assert_eq!(queue.next_frame(), 0.0);
        assert_eq!(queue.played, 1);
        queue.next_frame();
        assert_eq!(queue.next_frame(), 0.0);
        assert!(queue.samples.is_empty());
    }

    #[test]
    fn clear_drops_pending_audio() {
        let mut queue = PcmQueue::new();
        queue.push_bytes(&[1, 2, 3]);
        queue.clear();
        assert_eq!(queue.queued_bytes(), 0);
    }

    #[test]
    fn gate_tracks_state_without_settling() {
        let mut gate = AmpGate::default();
        let probe = gate.clone();
        gate.enable();
        assert!(probe.is_enabled());
        gate.disable();
        assert!(!probe.is_enabled());
    }

    #[test]
    fn silent_decoder_drains_while_powered() {
        let mut decoder = SilentDecoder::new();
        assert!(decoder.ready_for_data());
        decoder.push_chunk(&[0; 32]);
        assert_eq!(decoder.bytes(), 32);
        decoder.end();
        assert!(!decoder.ready_for_data());
    }
}
