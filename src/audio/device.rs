//! # Audio Device Abstraction
//!
//! Trait seams between the pipelines and real hardware. The capture and
//! playback pipelines only ever talk to `AudioSource`/`AudioSink`, so every
//! ordering property is testable with in-memory fakes and the server builds
//! headless by default.
//!
//! Backends:
//! - **cpal** (feature `native-audio`): real microphone and speaker devices
//! - **null** (always available): capture produces nothing, playback paces
//!   itself by sleeping for the nominal frame duration
//!
//! Device handles are not `Send` on every platform, so constructors are
//! passed around as factories and each pipeline creates its device on the
//! thread that will use it.

use crate::error::AppResult;

#[cfg(not(feature = "native-audio"))]
use tracing::warn;

/// Fixed parameters a source is opened with.
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per delivered block; one block becomes one wire frame.
    pub block_size: usize,
}

/// Callback invoked with each captured block of mono samples.
pub type BlockCallback = Box<dyn FnMut(Vec<f32>) + Send + 'static>;

/// A capture device delivering fixed-size blocks of normalized samples.
///
/// `stop` must be idempotent and must not fail when capture never started;
/// after it returns the callback is not invoked again.
pub trait AudioSource {
    fn start(&mut self, spec: &DeviceSpec, on_block: BlockCallback) -> AppResult<()>;
    fn stop(&mut self);
}

/// An output device that renders one buffer of samples and returns only when
/// playback of that buffer has finished. The blocking contract is what gives
/// the playback pipeline its strict sequential rendering.
pub trait AudioSink {
    fn play(&mut self, samples: &[f32], sample_rate: u32) -> AppResult<()>;
}

/// Deferred constructor so a non-`Send` device can be built on its pipeline
/// thread.
pub type SourceFactory = Box<dyn FnOnce() -> AppResult<Box<dyn AudioSource>> + Send + 'static>;
pub type SinkFactory = Box<dyn FnOnce() -> AppResult<Box<dyn AudioSink>> + Send + 'static>;

/// Factory for the best available capture backend.
pub fn default_source_factory() -> SourceFactory {
    #[cfg(feature = "native-audio")]
    {
        Box::new(|| Ok(Box::new(cpal_backend::CpalSource::new()) as Box<dyn AudioSource>))
    }
    #[cfg(not(feature = "native-audio"))]
    {
        Box::new(|| Ok(Box::new(NullSource::default()) as Box<dyn AudioSource>))
    }
}

/// Factory for the best available playback backend.
pub fn default_sink_factory() -> SinkFactory {
    #[cfg(feature = "native-audio")]
    {
        Box::new(|| Ok(Box::new(cpal_backend::CpalSink::new()) as Box<dyn AudioSink>))
    }
    #[cfg(not(feature = "native-audio"))]
    {
        Box::new(|| Ok(Box::new(NullSink::default()) as Box<dyn AudioSink>))
    }
}

/// Fallback source when no native audio backend is compiled in. Starting it
/// succeeds but no blocks are ever produced.
#[derive(Default)]
pub struct NullSource {
    active: bool,
}

impl AudioSource for NullSource {
    fn start(&mut self, spec: &DeviceSpec, _on_block: BlockCallback) -> AppResult<()> {
        #[cfg(not(feature = "native-audio"))]
        warn!(
            sample_rate = spec.sample_rate,
            "no native audio backend compiled in, capture will produce no frames"
        );
        let _ = spec;
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.active = false;
    }
}

/// Fallback sink: sleeps for the nominal duration of the buffer so playback
/// pacing (and therefore queue backpressure) behaves like a real device.
#[derive(Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn play(&mut self, samples: &[f32], sample_rate: u32) -> AppResult<()> {
        if sample_rate > 0 && !samples.is_empty() {
            let secs = samples.len() as f64 / sample_rate as f64;
            std::thread::sleep(std::time::Duration::from_secs_f64(secs));
        }
        Ok(())
    }
}

#[cfg(feature = "native-audio")]
mod cpal_backend {
    //! Real devices via cpal. Capture accumulates callback data into
    //! fixed-size blocks and downmixes to mono by taking the first channel
    //! of each interleaved chunk.

    use super::{AudioSink, AudioSource, BlockCallback, DeviceSpec};
    use crate::error::{AppError, AppResult};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Condvar, Mutex};
    use tracing::{info, warn};

    pub struct CpalSource {
        stream: Option<Stream>,
        running: Arc<AtomicBool>,
    }

    impl CpalSource {
        pub fn new() -> Self {
            Self {
                stream: None,
                running: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl AudioSource for CpalSource {
        fn start(&mut self, spec: &DeviceSpec, mut on_block: BlockCallback) -> AppResult<()> {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| AppError::DeviceAccess("no input device found".to_string()))?;

            let supported = device
                .default_input_config()
                .map_err(|e| AppError::DeviceAccess(format!("input config: {}", e)))?;
            let device_channels = supported.channels() as usize;
            let sample_format = supported.sample_format();

            let config = StreamConfig {
                channels: supported.channels(),
                sample_rate: SampleRate(spec.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            info!(
                device = %device.name().unwrap_or_default(),
                sample_rate = spec.sample_rate,
                channels = device_channels,
                "opening capture device"
            );

            let running = self.running.clone();
            running.store(true, Ordering::SeqCst);

            let block_size = spec.block_size;
            let mut pending: Vec<f32> = Vec::with_capacity(block_size);
            let err_fn = |err| warn!("capture stream error: {}", err);

            // Accumulate into fixed blocks, first channel only
            let mut push_samples = move |mono: &mut dyn Iterator<Item = f32>| {
                for sample in mono {
                    pending.push(sample);
                    if pending.len() == block_size {
                        on_block(std::mem::replace(
                            &mut pending,
                            Vec::with_capacity(block_size),
                        ));
                    }
                }
            };

            let stream = match sample_format {
                SampleFormat::F32 => {
                    let running = running.clone();
                    device
                        .build_input_stream(
                            &config,
                            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                                if !running.load(Ordering::Relaxed) {
                                    return;
                                }
                                push_samples(
                                    &mut data.chunks(device_channels).map(|c| c[0]),
                                );
                            },
                            err_fn,
                            None,
                        )
                        .map_err(|e| AppError::DeviceAccess(e.to_string()))?
                }
                SampleFormat::I16 => {
                    let running = running.clone();
                    device
                        .build_input_stream(
                            &config,
                            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                                if !running.load(Ordering::Relaxed) {
                                    return;
                                }
                                push_samples(
                                    &mut data
                                        .chunks(device_channels)
                                        .map(|c| c[0] as f32 / 32768.0),
                                );
                            },
                            err_fn,
                            None,
                        )
                        .map_err(|e| AppError::DeviceAccess(e.to_string()))?
                }
                format => {
                    return Err(AppError::DeviceAccess(format!(
                        "unsupported sample format: {:?}",
                        format
                    )));
                }
            };

            stream
                .play()
                .map_err(|e| AppError::DeviceAccess(e.to_string()))?;
            self.stream = Some(stream);
            Ok(())
        }

        fn stop(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(stream) = self.stream.take() {
                let _ = stream.pause();
            }
        }
    }

    /// Shared state between `play` and the output callback.
    struct SinkShared {
        queue: Mutex<VecDeque<f32>>,
        drained: Condvar,
    }

    pub struct CpalSink {
        stream: Option<(Stream, u32)>,
        shared: Arc<SinkShared>,
    }

    impl CpalSink {
        pub fn new() -> Self {
            Self {
                stream: None,
                shared: Arc::new(SinkShared {
                    queue: Mutex::new(VecDeque::new()),
                    drained: Condvar::new(),
                }),
            }
        }

        fn ensure_stream(&mut self, sample_rate: u32) -> AppResult<()> {
            if let Some((_, rate)) = &self.stream {
                if *rate == sample_rate {
                    return Ok(());
                }
                self.stream = None;
            }

            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| AppError::DeviceAccess("no output device found".to_string()))?;

            let config = StreamConfig {
                channels: 1,
                sample_rate: SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let shared = self.shared.clone();
            let err_fn = |err| warn!("playback stream error: {}", err);

            let stream = device
                .build_output_stream(
                    &config,
                    move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut queue = shared.queue.lock().unwrap();
                        for slot in out.iter_mut() {
                            *slot = queue.pop_front().unwrap_or(0.0);
                        }
                        if queue.is_empty() {
                            shared.drained.notify_all();
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AppError::DeviceAccess(e.to_string()))?;

            stream
                .play()
                .map_err(|e| AppError::DeviceAccess(e.to_string()))?;
            self.stream = Some((stream, sample_rate));
            Ok(())
        }
    }

    impl AudioSink for CpalSink {
        fn play(&mut self, samples: &[f32], sample_rate: u32) -> AppResult<()> {
            self.ensure_stream(sample_rate)?;

            let mut queue = self.shared.queue.lock().unwrap();
            queue.extend(samples.iter().copied());
            while !queue.is_empty() {
                queue = self.shared.drained.wait(queue).unwrap();
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_null_source_start_stop() {
        let mut source = NullSource::default();
        let spec = DeviceSpec {
            sample_rate: 16_000,
            channels: 1,
            block_size: 4096,
        };
        assert!(source.start(&spec, Box::new(|_| {})).is_ok());
        source.stop();
        // Stopping again must be harmless
        source.stop();
    }

    #[test]
    fn test_null_sink_paces_playback() {
        let mut sink = NullSink;
        let samples = vec![0.0f32; 2400]; // 100ms at 24kHz
        let start = Instant::now();
        sink.play(&samples, 24_000).unwrap();
        assert!(start.elapsed().as_millis() >= 90);
    }
}
