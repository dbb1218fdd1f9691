//! Audio engine - manages the device streams and cpal integration.
//!
//! The input stream writes interleaved samples into a lock-free ring; the
//! output stream's callback reads them and drives the [`AudioProcessor`].
//! Both callbacks only touch pre-allocated memory.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use loopstack_comms::rtrb::{self, RingBuffer};
use loopstack_core::{ChannelCount, Frames, Sample, SampleRate};

use crate::config::EngineConfig;
use crate::device::{find_input_device, find_output_device};
use crate::error::EngineError;
use crate::graph::InputSpec;
use crate::looper::LoopEngine;
use crate::processor::AudioProcessor;

/// Input latency kept in the ring, in blocks. Anything beyond is skipped.
const MAX_BUFFERED_BLOCKS: usize = 4;

/// Largest output callback handled in one pass, in blocks
const SCRATCH_BLOCKS: usize = 8;

/// An opened, not yet running, input device
pub struct InputDevice {
    device: cpal::Device,
    config: StreamConfig,
    name: String,
}

impl InputDevice {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stream shape the looper graph is built for
    pub fn spec(&self) -> InputSpec {
        InputSpec {
            channels: ChannelCount::from(self.config.channels),
            sample_rate: self.config.sample_rate.0,
        }
    }
}

struct Streams {
    input: Stream,
    output: Stream,
    input_name: String,
}

/// The audio engine owns the cpal host and the running streams
pub struct AudioEngine {
    sample_rate: SampleRate,
    block_size: Frames,
    host: cpal::Host,
    output_id: Option<String>,
    streams: Option<Streams>,
}

impl AudioEngine {
    /// Create a new audio engine for the given configuration
    pub fn new(settings: &EngineConfig) -> Self {
        let host = cpal::default_host();
        tracing::debug!("Using audio host: {}", host.id().name());
        Self {
            sample_rate: settings.sample_rate,
            block_size: settings.block_size,
            host,
            output_id: None,
            streams: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.streams.is_some()
    }

    /// Name of the input device currently streaming
    pub fn input_name(&self) -> Option<&str> {
        self.streams.as_ref().map(|s| s.input_name.as_str())
    }

    /// Acquire an input device by name, or the default one.
    ///
    /// The device must support the engine sample rate.
    pub fn open_input(&self, device_id: Option<&str>) -> Result<InputDevice, EngineError> {
        let device = find_input_device(&self.host, device_id).ok_or_else(|| {
            EngineError::Acquisition(match device_id {
                Some(id) => format!("no input device named {id}"),
                None => "no default input device".to_string(),
            })
        })?;
        let name = device.name().unwrap_or_else(|_| "Unknown".into());

        let channels = device
            .supported_input_configs()
            .map_err(|e| EngineError::Acquisition(e.to_string()))?
            .filter(|range| {
                range.min_sample_rate().0 <= self.sample_rate
                    && range.max_sample_rate().0 >= self.sample_rate
            })
            .map(|range| range.channels())
            .min_by_key(|&channels| if channels >= 2 { channels - 2 } else { u16::MAX })
            .ok_or_else(|| {
                EngineError::Acquisition(format!(
                    "{name} does not support {} Hz",
                    self.sample_rate
                ))
            })?;

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        tracing::info!("Opened input device {} ({} channels)", name, channels);
        Ok(InputDevice {
            device,
            config,
            name,
        })
    }

    /// Start streaming `input` through `processor` to the output device.
    ///
    /// Running streams are replaced only once the new ones play; if the new
    /// ones cannot be started the running ones are left alone.
    pub fn start(
        &mut self,
        input: InputDevice,
        processor: AudioProcessor,
    ) -> Result<(), EngineError> {
        let streams = self.open_streams(input, processor)?;
        self.replace_streams(streams);
        Ok(())
    }

    /// Build and play an input/output stream pair around `processor`
    fn open_streams(
        &self,
        input: InputDevice,
        mut processor: AudioProcessor,
    ) -> Result<Streams, EngineError> {
        let output_device = find_output_device(&self.host, self.output_id.as_deref())
            .ok_or_else(|| EngineError::Acquisition("no output device available".into()))?;
        let output_name = output_device.name().unwrap_or_else(|_| "Unknown".into());
        let output_channels = output_device
            .default_output_config()
            .map_err(|e| EngineError::Acquisition(e.to_string()))?
            .channels();

        let in_channels = usize::from(input.config.channels).max(1);
        let out_channels = usize::from(output_channels).max(1);
        let block = self.block_size;

        let capacity = (block * MAX_BUFFERED_BLOCKS * 2 * in_channels).max(4096);
        let (mut producer, mut consumer) = RingBuffer::<Sample>::new(capacity);
        let max_buffered = block * MAX_BUFFERED_BLOCKS * in_channels;
        let scratch_frames = block * SCRATCH_BLOCKS;
        let mut scratch: Vec<Sample> = vec![0.0; scratch_frames * in_channels];

        let input_stream = input
            .device
            .build_input_stream(
                &input.config,
                move |data: &[Sample], _: &cpal::InputCallbackInfo| {
                    // Whole frames only; what does not fit is lost
                    let n = producer.slots().min(data.len());
                    let n = n - n % in_channels;
                    if let Ok(chunk) = producer.write_chunk_uninit(n) {
                        chunk.fill_from_iter(data.iter().copied());
                    }
                },
                |err| tracing::error!("Input stream error: {}", err),
                None,
            )
            .map_err(|e| EngineError::Acquisition(e.to_string()))?;

        let output_callback = move |data: &mut [Sample], _: &cpal::OutputCallbackInfo| {
            // Keep input latency bounded
            let excess = consumer.slots().saturating_sub(max_buffered);
            if excess > 0 {
                skip(&mut consumer, excess - excess % in_channels);
            }

            for piece in data.chunks_mut(scratch_frames * out_channels) {
                let frames = piece.len() / out_channels;
                let wanted = frames * in_channels;
                let got = read_into(&mut consumer, &mut scratch[..wanted]);
                scratch[got..wanted].fill(0.0);
                processor.render(&scratch[..wanted], piece, out_channels);
            }
        };

        let output_config = StreamConfig {
            channels: output_channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: self.output_buffer_size(&output_device),
        };
        let output_stream = output_device
            .build_output_stream(
                &output_config,
                output_callback,
                |err| tracing::error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| EngineError::Acquisition(e.to_string()))?;

        input_stream
            .play()
            .map_err(|e| EngineError::Acquisition(e.to_string()))?;
        output_stream
            .play()
            .map_err(|e| EngineError::Acquisition(e.to_string()))?;

        tracing::info!(
            "Audio streams started: {} -> {} at {} Hz",
            input.name,
            output_name,
            self.sample_rate
        );
        Ok(Streams {
            input: input_stream,
            output: output_stream,
            input_name: input.name,
        })
    }

    fn replace_streams(&mut self, streams: Streams) {
        if let Some(previous) = self.streams.replace(streams) {
            if let Err(e) = halt(previous) {
                tracing::warn!("Previous streams did not stop cleanly: {}", e);
            }
        }
    }

    /// Move the looper onto another input device.
    ///
    /// Loops are kept. The looper moves over only once the new streams play;
    /// if they cannot be started nothing changes and the current streams
    /// keep running.
    pub fn switch_input(
        &mut self,
        looper: &mut LoopEngine,
        device_id: Option<&str>,
    ) -> Result<(), EngineError> {
        let input = self.open_input(device_id)?;
        let spec = input.spec();
        let engine = &*self;
        let streams =
            looper.attach_with(spec, |processor| engine.open_streams(input, processor))?;
        self.replace_streams(streams);
        Ok(())
    }

    /// Route output to another device. Returns false if it is unavailable;
    /// the previous routing and streams are then kept.
    pub fn set_output_device(&mut self, looper: &mut LoopEngine, device_id: &str) -> bool {
        if find_output_device(&self.host, Some(device_id)).is_none() {
            tracing::warn!("No output device named {}", device_id);
            return false;
        }

        let previous = self.output_id.replace(device_id.to_string());
        if !self.is_running() {
            return true;
        }

        let input_name = self.input_name().map(str::to_string);
        match self.switch_input(looper, input_name.as_deref()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Cannot route output to {}: {}", device_id, e);
                self.output_id = previous;
                false
            }
        }
    }

    /// Fixed block-sized buffers when the device allows them, else its default
    fn output_buffer_size(&self, device: &cpal::Device) -> cpal::BufferSize {
        let block = u32::try_from(self.block_size).unwrap_or(u32::MAX);
        let fits = device.supported_output_configs().is_ok_and(|mut ranges| {
            ranges.any(|range| {
                range.min_sample_rate().0 <= self.sample_rate
                    && range.max_sample_rate().0 >= self.sample_rate
                    && matches!(
                        range.buffer_size(),
                        cpal::SupportedBufferSize::Range { min, max }
                            if (*min..=*max).contains(&block)
                    )
            })
        });
        if fits {
            cpal::BufferSize::Fixed(block)
        } else {
            tracing::debug!("Device refuses {}-frame buffers, using its default", block);
            cpal::BufferSize::Default
        }
    }

    /// Stop the audio streams
    pub fn stop(&mut self) -> Result<(), EngineError> {
        if let Some(streams) = self.streams.take() {
            tracing::info!("Audio engine stopping");
            halt(streams)?;
            tracing::info!("Audio streams stopped");
        }
        Ok(())
    }
}

fn halt(streams: Streams) -> Result<(), EngineError> {
    streams
        .input
        .pause()
        .map_err(|e| EngineError::Acquisition(e.to_string()))?;
    streams
        .output
        .pause()
        .map_err(|e| EngineError::Acquisition(e.to_string()))?;
    Ok(())
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("Error stopping audio engine: {}", e);
        }
    }
}

/// Read up to `dst.len()` samples. Returns how many were read.
fn read_into(consumer: &mut rtrb::Consumer<Sample>, dst: &mut [Sample]) -> usize {
    let n = consumer.slots().min(dst.len());
    let Ok(chunk) = consumer.read_chunk(n) else {
        return 0;
    };
    let (first, second) = chunk.as_slices();
    dst[..first.len()].copy_from_slice(first);
    dst[first.len()..n].copy_from_slice(second);
    chunk.commit_all();
    n
}

fn skip(consumer: &mut rtrb::Consumer<Sample>, n: usize) {
    if let Ok(chunk) = consumer.read_chunk(n) {
        chunk.commit_all();
    }
}
