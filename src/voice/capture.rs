//! Audio capture from microphone

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};
use tokio::sync::mpsc;

use super::frame::{AudioFormat, AudioFrame, f32_to_i16};
use super::resample::RateConverter;
use crate::{Error, Result};

/// How often the capture thread checks its stop flag
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A microphone-like stream of fixed-size PCM frames
///
/// Only one consumer reads from a source at a time. Frames come out in
/// arrival order; nothing is skipped or reordered between `flush` calls.
#[async_trait]
pub trait AudioSource: Send {
    /// Format of the frames this source produces
    fn format(&self) -> AudioFormat;

    /// Wait for the next full frame
    ///
    /// # Errors
    ///
    /// Returns `Error::Stream` on device dropout or if the source is closed
    async fn read_frame(&mut self) -> Result<AudioFrame>;

    /// Discard everything captured before this call
    fn flush(&mut self);

    /// Close and reopen the underlying device with the same format
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the device cannot be reopened
    async fn reopen(&mut self) -> Result<()>;

    /// Release the device. Idempotent.
    fn close(&mut self);
}

/// Message from the capture thread
enum CaptureEvent {
    Samples(Vec<f32>),
    Failed(String),
}

/// Captures audio from the default input device
///
/// The cpal stream lives on a dedicated `audio-capture` thread; samples are
/// forwarded over a channel so the source itself can move between tasks.
pub struct CpalSource {
    format: AudioFormat,
    rx: Option<mpsc::UnboundedReceiver<CaptureEvent>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    converter: Option<RateConverter>,
    pending: Vec<i16>,
    deferred_failure: Option<String>,
}

impl CpalSource {
    /// Open the default input device in the requested format
    ///
    /// Blocks briefly while the capture thread negotiates the stream.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no input device is available or the
    /// requested channel count is unsupported
    pub fn open(format: AudioFormat) -> Result<Self> {
        if format.sample_rate == 0 || format.frame_size == 0 || format.channels == 0 {
            return Err(Error::Device(format!("unsupported format: {format:?}")));
        }

        let mut source = Self {
            format,
            rx: None,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
            converter: None,
            pending: Vec::with_capacity(format.frame_len() * 2),
            deferred_failure: None,
        };
        source.start()?;
        Ok(source)
    }

    /// Check if the device is currently held
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.rx.is_some()
    }

    fn start(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let stop = Arc::new(AtomicBool::new(false));

        let format = self.format;
        let stop_thread = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || run_capture_thread(format, tx, ready_tx, &stop_thread))
            .map_err(|e| Error::Device(format!("failed to spawn capture thread: {e}")))?;

        let device_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(Error::Device(
                    "capture thread exited during setup".to_string(),
                ));
            }
        };

        self.converter = if device_rate == format.sample_rate {
            None
        } else {
            tracing::info!(
                device_rate,
                target_rate = format.sample_rate,
                "device rate differs, converting"
            );
            Some(RateConverter::new(
                device_rate,
                format.sample_rate,
                format.channels,
            )?)
        };

        self.rx = Some(rx);
        self.stop = stop;
        self.thread = Some(thread);
        self.pending.clear();
        self.deferred_failure = None;

        tracing::debug!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            frame_size = format.frame_size,
            "audio capture started"
        );
        Ok(())
    }

    fn ingest(&mut self, data: &[f32]) -> Result<()> {
        match self.converter.as_mut() {
            Some(converter) => {
                let converted = converter.push(data)?;
                self.pending
                    .extend(converted.iter().map(|&s| f32_to_i16(s)));
            }
            None => self.pending.extend(data.iter().map(|&s| f32_to_i16(s))),
        }
        Ok(())
    }
}

#[async_trait]
impl AudioSource for CpalSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    async fn read_frame(&mut self) -> Result<AudioFrame> {
        if let Some(msg) = self.deferred_failure.take() {
            return Err(Error::Stream(msg));
        }

        let needed = self.format.frame_len();
        while self.pending.len() < needed {
            let rx = self
                .rx
                .as_mut()
                .ok_or_else(|| Error::Stream("audio source is closed".to_string()))?;

            match rx.recv().await {
                Some(CaptureEvent::Samples(data)) => self.ingest(&data)?,
                Some(CaptureEvent::Failed(msg)) => return Err(Error::Stream(msg)),
                None => return Err(Error::Stream("capture stream ended".to_string())),
            }
        }

        let samples: Vec<i16> = self.pending.drain(..needed).collect();
        Ok(AudioFrame::new(
            samples,
            self.format.sample_rate,
            self.format.channels,
        ))
    }

    fn flush(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            while let Ok(event) = rx.try_recv() {
                if let CaptureEvent::Failed(msg) = event {
                    self.deferred_failure = Some(msg);
                }
            }
        }
        self.pending.clear();
        if let Some(converter) = self.converter.as_mut()
            && let Err(e) = converter.reset()
        {
            tracing::warn!(error = %e, "failed to reset rate converter");
        }
    }

    async fn reopen(&mut self) -> Result<()> {
        self.close();
        self.start()
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.rx = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("audio capture thread panicked");
            }
            tracing::debug!("audio capture closed");
        }
        self.pending.clear();
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Body of the capture thread: own the stream until asked to stop
fn run_capture_thread(
    format: AudioFormat,
    tx: mpsc::UnboundedSender<CaptureEvent>,
    ready: std::sync::mpsc::Sender<Result<u32>>,
    stop: &AtomicBool,
) {
    let stream = match build_input_stream(&format, tx) {
        Ok((stream, rate)) => {
            let _ = ready.send(Ok(rate));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(STOP_POLL_INTERVAL);
    }

    drop(stream);
}

/// Negotiate and start an input stream, returning it with the device rate
fn build_input_stream(
    format: &AudioFormat,
    tx: mpsc::UnboundedSender<CaptureEvent>,
) -> Result<(Stream, u32)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Device("no input device available".to_string()))?;

    let wanted = SampleRate(format.sample_rate);
    let candidates: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .filter(|c| c.channels() == format.channels)
        .collect();

    let supported = candidates
        .iter()
        .find(|c| c.min_sample_rate() <= wanted && c.max_sample_rate() >= wanted)
        .map(|c| c.clone().with_sample_rate(wanted))
        .or_else(|| {
            // Fallback: highest native rate, converted in software
            candidates
                .iter()
                .max_by_key(|c| c.max_sample_rate())
                .map(|c| c.clone().with_max_sample_rate())
        })
        .ok_or_else(|| {
            Error::Device(format!(
                "no input config with {} channel(s)",
                format.channels
            ))
        })?;

    let config = supported.config();
    let device_rate = config.sample_rate.0;

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        device_rate,
        channels = config.channels,
        "audio capture initialized"
    );

    let err_tx = tx.clone();
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = tx.send(CaptureEvent::Samples(data.to_vec()));
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                let _ = err_tx.send(CaptureEvent::Failed(err.to_string()));
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))?;

    stream.play().map_err(|e| Error::Device(e.to_string()))?;

    Ok((stream, device_rate))
}
