// Audio output using cpal
// The stream lives on its own thread; samples reach it through a ring buffer

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::{HeapRb, traits::{Consumer, Observer, Producer, Split}};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::context::{AudioContext, ContextState, SourceNode};
use super::decoder::resample_mono;
use super::pcm::DecodedAudio;
use crate::error::PlaybackError;

const RING_BUFFER_SIZE: usize = 48000 * 2 / 4; // ~250ms of stereo audio at 48kHz

type RingProducer = ringbuf::HeapProd<f32>;
type RingConsumer = ringbuf::HeapCons<f32>;

enum StreamCommand {
    Play,
    Pause,
    Close,
}

/// State shared between the context, its source nodes and the audio callback
struct OutputShared {
    producer: Mutex<RingProducer>,
    volume: Mutex<f32>,
    clear_flag: AtomicBool,
    frames_rendered: AtomicU64,
}

impl OutputShared {
    fn queued_samples(&self) -> usize {
        self.producer.lock().occupied_len()
    }
}

/// Audio context backed by the default cpal output device
pub struct CpalContext {
    shared: Arc<OutputShared>,
    commands: Mutex<mpsc::Sender<StreamCommand>>,
    state: Mutex<ContextState>,
    sample_rate: u32,
    channels: u16,
}

impl CpalContext {
    /// Open the default output device and start its stream
    pub fn new() -> Result<Arc<Self>, PlaybackError> {
        let rb = HeapRb::<f32>::new(RING_BUFFER_SIZE);
        let (producer, consumer) = rb.split();

        let shared = Arc::new(OutputShared {
            producer: Mutex::new(producer),
            volume: Mutex::new(1.0),
            clear_flag: AtomicBool::new(false),
            frames_rendered: AtomicU64::new(0),
        });

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(u32, u16), String>>();
        let (command_tx, command_rx) = mpsc::channel::<StreamCommand>();
        let thread_shared = shared.clone();

        std::thread::Builder::new()
            .name("narration-audio".to_string())
            .spawn(move || {
                let stream = match Self::open_stream(consumer, thread_shared) {
                    Ok((stream, sample_rate, channels)) => {
                        let _ = ready_tx.send(Ok((sample_rate, channels)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // The stream is not Send, so it stays here until closed
                while let Ok(command) = command_rx.recv() {
                    match command {
                        StreamCommand::Play => {
                            if let Err(e) = stream.play() {
                                tracing::error!("[Audio] Failed to resume stream: {}", e);
                            }
                        }
                        StreamCommand::Pause => {
                            if let Err(e) = stream.pause() {
                                tracing::error!("[Audio] Failed to pause stream: {}", e);
                            }
                        }
                        StreamCommand::Close => break,
                    }
                }
            })
            .map_err(|e| PlaybackError::ContextUnavailable(format!("failed to spawn audio thread: {}", e)))?;

        let (sample_rate, channels) = ready_rx
            .recv()
            .map_err(|_| PlaybackError::ContextUnavailable("audio thread exited".to_string()))?
            .map_err(PlaybackError::ContextUnavailable)?;

        tracing::info!(
            "[Audio] Output stream open: {} Hz, {} channels",
            sample_rate,
            channels
        );

        Ok(Arc::new(Self {
            shared,
            commands: Mutex::new(command_tx),
            state: Mutex::new(ContextState::Running),
            sample_rate,
            channels,
        }))
    }

    fn open_stream(
        consumer: RingConsumer,
        shared: Arc<OutputShared>,
    ) -> Result<(Stream, u32, u16), String> {
        let host = cpal::default_host();

        let device = host.default_output_device()
            .ok_or("No output device available")?;

        let config = device.default_output_config()
            .map_err(|e| format!("Failed to get default output config: {}", e))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config.into(), consumer, shared)?
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config.into(), consumer, shared)?
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config.into(), consumer, shared)?
            }
            format => return Err(format!("Unsupported sample format: {:?}", format)),
        };

        stream.play().map_err(|e| format!("Failed to start stream: {}", e))?;

        Ok((stream, sample_rate, channels))
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut consumer: RingConsumer,
        shared: Arc<OutputShared>,
    ) -> Result<Stream, String> {
        let channels = config.channels.max(1) as usize;

        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                // A disconnected node leaves samples behind; drop them unheard
                if shared.clear_flag.swap(false, Ordering::SeqCst) {
                    while consumer.try_pop().is_some() {}
                }

                let vol = *shared.volume.lock();
                for sample in data.iter_mut() {
                    let value = consumer.try_pop().unwrap_or(0.0) * vol;
                    *sample = T::from_sample(value);
                }

                shared
                    .frames_rendered
                    .fetch_add((data.len() / channels) as u64, Ordering::Relaxed);
            },
            move |err| {
                tracing::error!("[Audio] Output stream error: {}", err);
            },
            None,
        ).map_err(|e| format!("Failed to build output stream: {}", e))?;

        Ok(stream)
    }

    /// Set the output volume (0.0 to 1.0)
    pub fn set_volume(&self, vol: f32) {
        *self.shared.volume.lock() = vol.clamp(0.0, 1.0);
    }

    fn send(&self, command: StreamCommand) -> Result<(), PlaybackError> {
        self.commands
            .lock()
            .send(command)
            .map_err(|_| PlaybackError::ContextClosed)
    }
}

impl AudioContext for CpalContext {
    fn state(&self) -> ContextState {
        *self.state.lock()
    }

    fn resume(&self) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        match *state {
            ContextState::Closed => Err(PlaybackError::ContextClosed),
            ContextState::Running => Ok(()),
            ContextState::Suspended => {
                self.send(StreamCommand::Play)
                    .map_err(|e| PlaybackError::ResumeFailed(e.to_string()))?;
                *state = ContextState::Running;
                Ok(())
            }
        }
    }

    fn suspend(&self) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        match *state {
            ContextState::Closed => Err(PlaybackError::ContextClosed),
            ContextState::Suspended => Ok(()),
            ContextState::Running => {
                self.send(StreamCommand::Pause)?;
                *state = ContextState::Suspended;
                Ok(())
            }
        }
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if *state != ContextState::Closed {
            let _ = self.send(StreamCommand::Close);
            *state = ContextState::Closed;
        }
    }

    fn current_time(&self) -> f64 {
        self.shared.frames_rendered.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    fn create_source(&self, audio: Arc<DecodedAudio>) -> Result<Box<dyn SourceNode>, PlaybackError> {
        if self.state() == ContextState::Closed {
            return Err(PlaybackError::ContextClosed);
        }
        Ok(Box::new(CpalSourceNode {
            shared: self.shared.clone(),
            audio,
            output_rate: self.sample_rate,
            output_channels: self.channels,
            cancel: Arc::new(AtomicBool::new(false)),
            fed_all: Arc::new(AtomicBool::new(false)),
            feeder: None,
            started: false,
            stopped: false,
        }))
    }
}

impl Drop for CpalContext {
    fn drop(&mut self) {
        self.close();
    }
}

/// Streams one narration buffer into the output ring from a feeder thread
struct CpalSourceNode {
    shared: Arc<OutputShared>,
    audio: Arc<DecodedAudio>,
    output_rate: u32,
    output_channels: u16,
    cancel: Arc<AtomicBool>,
    fed_all: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
    started: bool,
    stopped: bool,
}

impl CpalSourceNode {
    /// Resample and spread the mono narration over every output channel
    fn render_from(&self, offset: f64) -> Result<Vec<f32>, PlaybackError> {
        let first = self.audio.frame_at(offset);
        let mono = resample_mono(
            &self.audio.samples()[first..],
            self.audio.sample_rate(),
            self.output_rate,
        )
        .map_err(|e| PlaybackError::StartFailed(e.to_string()))?;

        let channels = self.output_channels.max(1) as usize;
        let mut interleaved = Vec::with_capacity(mono.len() * channels);
        for sample in mono {
            interleaved.extend(std::iter::repeat(sample).take(channels));
        }
        Ok(interleaved)
    }
}

impl SourceNode for CpalSourceNode {
    fn start(&mut self, offset: f64) -> Result<(), PlaybackError> {
        if self.started {
            return Err(PlaybackError::StartFailed("source node already started".to_string()));
        }
        let samples = self.render_from(offset)?;

        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        let fed_all = self.fed_all.clone();

        let feeder = std::thread::Builder::new()
            .name("narration-feeder".to_string())
            .spawn(move || {
                // Let the callback drop what the previous node left queued
                while shared.clear_flag.load(Ordering::SeqCst) {
                    if cancel.load(Ordering::SeqCst) {
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }

                let mut remaining = &samples[..];
                while !remaining.is_empty() {
                    if cancel.load(Ordering::SeqCst) {
                        return;
                    }
                    let written = shared.producer.lock().push_slice(remaining);
                    if written > 0 {
                        remaining = &remaining[written..];
                    } else {
                        // Buffer full, wait a bit
                        std::thread::sleep(Duration::from_millis(2));
                    }
                }
                fed_all.store(true, Ordering::SeqCst);
            })
            .map_err(|e| PlaybackError::StartFailed(format!("failed to spawn feeder: {}", e)))?;

        self.feeder = Some(feeder);
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PlaybackError> {
        if !self.started || self.stopped {
            return Err(PlaybackError::AlreadyStopped);
        }
        self.stopped = true;
        self.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(feeder) = self.feeder.take() {
            let _ = feeder.join();
            self.shared.clear_flag.store(true, Ordering::SeqCst);
        }
    }

    fn has_ended(&self) -> bool {
        !self.stopped
            && self.fed_all.load(Ordering::SeqCst)
            && self.shared.queued_samples() == 0
    }
}

impl Drop for CpalSourceNode {
    fn drop(&mut self) {
        self.disconnect();
    }
}
