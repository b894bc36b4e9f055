//! Microphone capture via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not block or perform I/O, so it only down-mixes to mono and pushes
//! into the SPSC ring buffer from [`crate::buffering`].
//!
//! # Resource ownership
//!
//! A [`Microphone`] is the only handle to an open input stream. It is acquired
//! per capture call and released when dropped, on every exit path (deadline,
//! cancellation, recognizer error, panic unwinding). There is no process-wide
//! audio state.
//!
//! `cpal::Stream` is `!Send` on Windows/macOS, so a `Microphone` must be
//! opened and dropped on the same thread. The capture loops run entirely on
//! the worker's blocking thread, which satisfies that.

pub mod device;
pub mod resample;
pub mod stub;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use crate::{
    buffering::{AudioConsumer, AudioProducer, Consumer},
    error::{Result, VoteError},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{info, warn};
#[cfg(feature = "audio-cpal")]
use tracing::error;

/// Which input device a capture should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Position in the host's input device enumeration.
    Index(usize),
    /// Exact device name as reported by the OS.
    Name(String),
}

impl DeviceSelector {
    /// Parse a user-supplied selector: all digits selects by index,
    /// anything else by name. Blank input means "system default".
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("default") {
            return None;
        }
        match trimmed.parse::<usize>() {
            Ok(index) => Some(Self::Index(index)),
            Err(_) => Some(Self::Name(trimmed.to_string())),
        }
    }
}

/// A pull-based stream of mono f32 samples.
///
/// `read` never blocks: it returns however many samples are currently
/// buffered (possibly zero). Callers sleep briefly on zero.
pub trait AudioSource {
    /// Actual sample rate of the samples returned by `read`.
    fn sample_rate(&self) -> u32;

    /// Copy up to `out.len()` buffered samples into `out`, returning the count.
    fn read(&mut self, out: &mut [f32]) -> usize;
}

/// Opens audio sources for a capture attempt.
pub trait AudioOpener {
    /// Open `device` (or the default input) at `preferred_rate`, retrying at
    /// `fallback_rate` if the device rejects the first.
    fn open(
        &self,
        device: Option<&DeviceSelector>,
        preferred_rate: u32,
        fallback_rate: u32,
    ) -> Result<Box<dyn AudioSource>>;
}

/// Handle to an active cpal input stream.
///
/// Not `Send`; create and drop on the same OS thread.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Set to `false` to make the callback no-op.
    running: Arc<AtomicBool>,
    /// Sample rate the stream was actually opened at (Hz).
    pub sample_rate: u32,
}

impl AudioCapture {
    /// Open an input device at exactly `sample_rate`.
    ///
    /// Device resolution: selector by index or name if given and found,
    /// otherwise the default input device, otherwise the first input.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        selector: Option<&DeviceSelector>,
        sample_rate: u32,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(selector) = selector {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = match selector {
                        DeviceSelector::Index(index) => devices.nth(*index),
                        DeviceSelector::Name(wanted) => devices.find(|device| {
                            device.name().map(|name| &name == wanted).unwrap_or(false)
                        }),
                    };
                    if selected_device.is_none() {
                        warn!(?selector, "requested input device not found, falling back");
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving selector: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_input_device() {
            default
        } else {
            let mut devices = host
                .input_devices()
                .map_err(|e| VoteError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(VoteError::NoDefaultInputDevice)?;
            warn!("no default input device, falling back to first available input");
            fallback
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate,
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| VoteError::AudioDevice(e.to_string()))?;
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => mixing_stream::<f32>(&device, &config, producer, Arc::clone(&running)),
            SampleFormat::I16 => mixing_stream::<i16>(&device, &config, producer, Arc::clone(&running)),
            SampleFormat::U16 => mixing_stream::<u16>(&device, &config, producer, Arc::clone(&running)),
            SampleFormat::I32 => mixing_stream::<i32>(&device, &config, producer, Arc::clone(&running)),
            SampleFormat::U8 => mixing_stream::<u8>(&device, &config, producer, Arc::clone(&running)),
            fmt => {
                return Err(VoteError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| VoteError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| VoteError::AudioStream(e.to_string()))?;

        info!(sample_rate, channels = config.channels, "audio stream opened");

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Stop: signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _selector: Option<&DeviceSelector>,
        _sample_rate: u32,
    ) -> Result<Self> {
        Err(VoteError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build an input stream that down-mixes `T` frames to mono f32.
#[cfg(feature = "audio-cpal")]
fn mixing_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    use crate::buffering::Producer;
    use cpal::Sample;

    let ch = config.channels.max(1) as usize;
    let mut mix_buf: Vec<f32> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _info: &cpal::InputCallbackInfo| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            let frames = data.len() / ch;
            mix_buf.resize(frames, 0.0);
            for (f, slot) in mix_buf.iter_mut().enumerate() {
                let base = f * ch;
                let sum: f32 = data[base..base + ch]
                    .iter()
                    .map(|s| f32::from_sample(*s))
                    .sum();
                *slot = sum / ch as f32;
            }
            let written = producer.push_slice(&mix_buf);
            if written < mix_buf.len() {
                warn!("ring buffer full: dropped {} frames", mix_buf.len() - written);
            }
        },
        |err| error!("audio stream error: {err}"),
        None,
    )
}

/// An open microphone: the capture stream plus the consumer end of its ring.
///
/// Dropping it stops the callback and releases the device.
pub struct Microphone {
    capture: AudioCapture,
    consumer: AudioConsumer,
}

impl Microphone {
    /// Open at `preferred_rate`, retrying once at `fallback_rate` with a
    /// fresh ring if the device rejects the first rate.
    pub fn open(
        selector: Option<&DeviceSelector>,
        preferred_rate: u32,
        fallback_rate: u32,
    ) -> Result<Self> {
        match Self::open_at(selector, preferred_rate) {
            Ok(mic) => Ok(mic),
            Err(e) if fallback_rate != preferred_rate => {
                warn!(
                    preferred_rate,
                    fallback_rate, "device rejected preferred sample rate: {e}"
                );
                Self::open_at(selector, fallback_rate)
            }
            Err(e) => Err(e),
        }
    }

    fn open_at(selector: Option<&DeviceSelector>, sample_rate: u32) -> Result<Self> {
        let (producer, consumer) = crate::buffering::create_audio_ring();
        let running = Arc::new(AtomicBool::new(true));
        let capture = AudioCapture::open(producer, running, selector, sample_rate)?;
        Ok(Self { capture, consumer })
    }
}

impl AudioSource for Microphone {
    fn sample_rate(&self) -> u32 {
        self.capture.sample_rate
    }

    fn read(&mut self, out: &mut [f32]) -> usize {
        self.consumer.pop_slice(out)
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        info!("releasing microphone");
    }
}

/// [`AudioOpener`] backed by real input devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct MicrophoneOpener;

impl AudioOpener for MicrophoneOpener {
    fn open(
        &self,
        device: Option<&DeviceSelector>,
        preferred_rate: u32,
        fallback_rate: u32,
    ) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(Microphone::open(device, preferred_rate, fallback_rate)?))
    }
}
