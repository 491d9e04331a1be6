//! Audio output
//!
//! The engine exposes a pull side ([`AudioPump`]); sinks drive it at a
//! fixed rate and block size. [`CpalOutput`] wires the pump to a hardware
//! device via cpal, preferring 44.1 kHz stereo f32 and converting where the
//! device wants integers. [`NullOutput`] paces the same pull path from a
//! plain thread for headless rendering and tests.

use crate::error::{EngineError, Result};
use crate::mixer::Mixer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Stream parameters a sink prepared the pump for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub block_size: usize,
    pub channels: u16,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            block_size: 1024,
            channels: 2,
        }
    }
}

/// The pull side of the engine. Obtained once from the engine and moved
/// into a sink; `pull` is the only entry point on the audio thread.
pub struct AudioPump {
    mixer: Mixer,
}

impl AudioPump {
    pub(crate) fn new(mixer: Mixer) -> Self {
        Self { mixer }
    }

    /// Size the engine's audio path for the sink's stream parameters.
    /// Must be called before the first `pull`.
    pub fn prepare(&mut self, spec: OutputSpec) {
        self.mixer.prepare(spec);
    }

    /// Fill an interleaved stereo float block. Never blocks or allocates.
    pub fn pull(&mut self, out: &mut [f32]) {
        self.mixer.pull(out);
    }
}

/// Hardware output via cpal
pub struct CpalOutput {
    stream: Option<Stream>,
    spec: OutputSpec,
    device_name: String,
}

impl CpalOutput {
    /// Names of the available output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| EngineError::Device(format!("failed to enumerate devices: {e}")))?
            .filter_map(|device| device.name().ok())
            .collect::<Vec<_>>();
        debug!("found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open the device (default when `None`), prepare the pump, and start
    /// the stream.
    pub fn start(mut pump: AudioPump, device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| EngineError::Device(format!("failed to enumerate devices: {e}")))?
                .find(|d| d.name().ok().as_deref() == Some(name))
                .ok_or_else(|| EngineError::Device(format!("device '{name}' not found")))?,
            None => host
                .default_output_device()
                .ok_or_else(|| EngineError::Device("no default output device".into()))?,
        };

        let device_name = device.name().unwrap_or_else(|_| "unknown".into());
        info!("using audio device: {device_name}");

        let (config, sample_format) = Self::best_config(&device)?;
        let spec = OutputSpec {
            sample_rate: config.sample_rate.0,
            block_size: 1024,
            channels: config.channels,
        };
        pump.prepare(spec);

        let stream = match sample_format {
            SampleFormat::F32 => Self::build_stream_f32(&device, &config, pump)?,
            SampleFormat::I16 => Self::build_stream_i16(&device, &config, pump)?,
            SampleFormat::U16 => Self::build_stream_u16(&device, &config, pump)?,
            other => {
                return Err(EngineError::Device(format!(
                    "unsupported sample format: {other:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| EngineError::Device(format!("failed to start stream: {e}")))?;

        info!(
            "audio stream started: {} Hz, {} channels, {:?}",
            spec.sample_rate, spec.channels, sample_format
        );

        Ok(Self {
            stream: Some(stream),
            spec,
            device_name,
        })
    }

    /// Prefer 44.1 kHz stereo f32; fall back to the device default
    fn best_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
        let mut supported = device
            .supported_output_configs()
            .map_err(|e| EngineError::Device(format!("failed to query configs: {e}")))?;

        let preferred = supported.find(|config| {
            config.channels() == 2
                && config.min_sample_rate().0 <= 44100
                && config.max_sample_rate().0 >= 44100
                && config.sample_format() == SampleFormat::F32
        });

        if let Some(config) = preferred {
            let sample_format = config.sample_format();
            let config = config.with_sample_rate(cpal::SampleRate(44100)).config();
            return Ok((config, sample_format));
        }

        let config = device
            .default_output_config()
            .map_err(|e| EngineError::Device(format!("failed to get default config: {e}")))?;
        let sample_format = config.sample_format();
        Ok((config.config(), sample_format))
    }

    fn build_stream_f32(
        device: &Device,
        config: &StreamConfig,
        mut pump: AudioPump,
    ) -> Result<Stream> {
        let channels = config.channels as usize;
        let mut scratch = vec![0.0f32; 8192];

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if channels == 2 {
                        pump.pull(data);
                    } else {
                        pull_mapped(&mut pump, &mut scratch, data, channels);
                    }
                },
                |err| warn!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| EngineError::Device(format!("failed to build stream: {e}")))?;

        Ok(stream)
    }

    fn build_stream_i16(
        device: &Device,
        config: &StreamConfig,
        mut pump: AudioPump,
    ) -> Result<Stream> {
        let channels = config.channels as usize;
        let mut scratch = vec![0.0f32; 8192];

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    for data in data.chunks_mut(4096 * channels) {
                        let frames = data.len() / channels;
                        let stereo = &mut scratch[..frames * 2];
                        pump.pull(stereo);
                        for i in 0..frames {
                            let l = (stereo[i * 2].clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                            let r = (stereo[i * 2 + 1].clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                            write_frame_i(data, i, channels, l, r);
                        }
                    }
                },
                |err| warn!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| EngineError::Device(format!("failed to build stream: {e}")))?;

        Ok(stream)
    }

    fn build_stream_u16(
        device: &Device,
        config: &StreamConfig,
        mut pump: AudioPump,
    ) -> Result<Stream> {
        let channels = config.channels as usize;
        let mut scratch = vec![0.0f32; 8192];

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    for data in data.chunks_mut(4096 * channels) {
                        let frames = data.len() / channels;
                        let stereo = &mut scratch[..frames * 2];
                        pump.pull(stereo);
                        for i in 0..frames {
                            let l = ((stereo[i * 2].clamp(-1.0, 1.0) + 1.0) * 32767.5) as u16;
                            let r = ((stereo[i * 2 + 1].clamp(-1.0, 1.0) + 1.0) * 32767.5) as u16;
                            data[i * channels] = l;
                            if channels > 1 {
                                data[i * channels + 1] = r;
                            }
                        }
                    }
                },
                |err| warn!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| EngineError::Device(format!("failed to build stream: {e}")))?;

        Ok(stream)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn spec(&self) -> OutputSpec {
        self.spec
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
            info!("audio stream stopped");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pull stereo then map onto a non-stereo device layout
fn pull_mapped(pump: &mut AudioPump, scratch: &mut [f32], data: &mut [f32], channels: usize) {
    for data in data.chunks_mut(4096 * channels) {
        let frames = data.len() / channels;
        let stereo = &mut scratch[..frames * 2];
        pump.pull(stereo);

        for i in 0..frames {
            let l = stereo[i * 2];
            let r = stereo[i * 2 + 1];
            match channels {
                1 => data[i] = (l + r) * 0.5,
                _ => {
                    data[i * channels] = l;
                    data[i * channels + 1] = r;
                    for ch in 2..channels {
                        data[i * channels + ch] = 0.0;
                    }
                }
            }
        }
    }
}

fn write_frame_i(data: &mut [i16], frame: usize, channels: usize, l: i16, r: i16) {
    data[frame * channels] = l;
    if channels > 1 {
        data[frame * channels + 1] = r;
    }
}

/// Headless sink: pulls blocks at wall-clock pace from a plain thread.
/// Useful for streaming hosts without a sound card and for tests.
pub struct NullOutput {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
    spec: OutputSpec,
}

impl NullOutput {
    pub fn start(mut pump: AudioPump, spec: OutputSpec) -> Self {
        pump.prepare(spec);

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("null-output".into())
            .spawn(move || {
                let block_duration =
                    Duration::from_secs_f64(spec.block_size as f64 / spec.sample_rate as f64);
                let mut block = vec![0.0f32; spec.block_size * 2];
                let mut next_deadline = Instant::now();

                while !stop_flag.load(Ordering::Acquire) {
                    pump.pull(&mut block);
                    next_deadline += block_duration;
                    let now = Instant::now();
                    if next_deadline > now {
                        std::thread::sleep(next_deadline - now);
                    } else {
                        // fell behind; drop the backlog rather than spin
                        next_deadline = now;
                    }
                }
            })
            .expect("failed to spawn null output thread");

        info!(
            "null output started: {} Hz, {} frame blocks",
            spec.sample_rate, spec.block_size
        );

        Self {
            stop,
            handle: Some(handle),
            spec,
        }
    }

    pub fn spec(&self) -> OutputSpec {
        self.spec
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NullOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
