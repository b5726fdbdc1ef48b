//! Local playback: relay download, symphonia decode and cpal output.

mod decoder;
mod stream_source;

use crate::api::models::StreamDescriptor;
use crate::audio::engine::{EngineEvent, EngineEventSender, MediaEngine};
use crate::error::{AppError, AppResult};
use crate::relay::Relay;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use decoder::{container_hint, AudioDecoder};
use futures_util::StreamExt;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stream_source::{stream_buffer, StreamCloser, StreamReader, StreamWriter};

/// Sentinel meaning "no seek requested".
const NO_SEEK: u64 = u64::MAX;
/// Roughly two seconds of stereo 44.1kHz audio.
const MAX_RING_SAMPLES: usize = 176_400;
const WRITER_BACKOFF: Duration = Duration::from_millis(20);

/// State shared by the engine, its decode thread and the output callback.
struct Playback {
    ring: Mutex<VecDeque<f32>>,
    ring_changed: Condvar,
    playing: AtomicBool,
    stop: AtomicBool,
    samples_played: AtomicU64,
    sample_rate: AtomicU32,
    channels: AtomicU32,
    volume: Mutex<f32>,
    seek_target_ms: AtomicU64,
    duration: f64,
}

impl Playback {
    fn new(volume: f32, duration: f64) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(88_200)),
            ring_changed: Condvar::new(),
            playing: AtomicBool::new(true),
            stop: AtomicBool::new(false),
            samples_played: AtomicU64::new(0),
            sample_rate: AtomicU32::new(44_100),
            channels: AtomicU32::new(2),
            volume: Mutex::new(volume),
            seek_target_ms: AtomicU64::new(NO_SEEK),
            duration,
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn samples_per_second(&self) -> f64 {
        self.sample_rate.load(Ordering::Relaxed) as f64 * self.channels.load(Ordering::Relaxed) as f64
    }

    fn position_seconds(&self) -> f64 {
        let rate = self.samples_per_second();
        if rate > 0.0 {
            self.samples_played.load(Ordering::Relaxed) as f64 / rate
        } else {
            0.0
        }
    }
}

struct ActivePlayback {
    shared: Arc<Playback>,
    closer: StreamCloser,
    decode_thread: Option<std::thread::JoinHandle<()>>,
    download: tokio::task::JoinHandle<()>,
}

/// [`MediaEngine`] playing through the default output device.
pub struct NativeEngine {
    relay: Arc<Relay>,
    runtime: tokio::runtime::Handle,
    events: EngineEventSender,
    volume: f32,
    active: Option<ActivePlayback>,
}

impl NativeEngine {
    /// Must be called from within a tokio runtime; downloads run on it.
    pub fn new(relay: Arc<Relay>, events: EngineEventSender) -> AppResult<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AppError::Audio(format!("No async runtime: {}", e)))?;
        Ok(Self {
            relay,
            runtime,
            events,
            volume: 1.0,
            active: None,
        })
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn stop_internal(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.shared.stop.store(true, Ordering::SeqCst);
        active.shared.playing.store(false, Ordering::SeqCst);
        active.shared.ring_changed.notify_all();
        active.closer.close();
        active.download.abort();
        if let Some(handle) = active.decode_thread.take() {
            let _ = handle.join();
        }
    }
}

impl MediaEngine for NativeEngine {
    fn start(&mut self, descriptor: &StreamDescriptor) -> AppResult<()> {
        self.stop_internal();

        let (reader, writer) = stream_buffer();
        let closer = reader.closer();
        let shared = Arc::new(Playback::new(
            self.volume,
            descriptor.duration_seconds as f64,
        ));

        let download = self.runtime.spawn(download(
            Arc::clone(&self.relay),
            descriptor.stream_url.clone(),
            writer,
        ));

        let extension = container_hint(&descriptor.mime_type, &descriptor.codec_tag);
        let thread_shared = Arc::clone(&shared);
        let events = self.events.clone();
        let decode_thread = std::thread::Builder::new()
            .name("ytbg-decode".to_string())
            .spawn(move || run_playback(thread_shared, reader, extension, events))
            .map_err(|e| {
                download.abort();
                AppError::Audio(format!("Failed to spawn decode thread: {}", e))
            })?;

        self.active = Some(ActivePlayback {
            shared,
            closer,
            decode_thread: Some(decode_thread),
            download,
        });
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(active) = &self.active {
            active.shared.playing.store(false, Ordering::SeqCst);
            self.emit(EngineEvent::Paused);
        }
    }

    fn resume(&mut self) -> AppResult<()> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| AppError::Audio("Nothing loaded".into()))?;
        if active
            .decode_thread
            .as_ref()
            .map_or(true, |t| t.is_finished())
        {
            return Err(AppError::Audio("Playback has ended".into()));
        }
        active.shared.playing.store(true, Ordering::SeqCst);
        self.emit(EngineEvent::Playing);
        Ok(())
    }

    fn seek(&mut self, position_seconds: f64) {
        let Some(active) = &self.active else {
            return;
        };
        let shared = &active.shared;
        shared
            .seek_target_ms
            .store((position_seconds * 1000.0) as u64, Ordering::SeqCst);
        shared.ring_changed.notify_all();
        shared.samples_played.store(
            (position_seconds * shared.samples_per_second()) as u64,
            Ordering::SeqCst,
        );
    }

    fn stop(&mut self) {
        self.stop_internal();
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(active) = &self.active {
            *active.shared.volume.lock() = self.volume;
        }
    }

    fn position_seconds(&self) -> f64 {
        self.active
            .as_ref()
            .map_or(0.0, |a| a.shared.position_seconds())
    }

    fn duration_seconds(&self) -> f64 {
        self.active.as_ref().map_or(0.0, |a| a.shared.duration)
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        self.stop_internal();
    }
}

async fn download(relay: Arc<Relay>, url: String, writer: StreamWriter) {
    let response = match relay.fetch(&url, None).await {
        Ok(response) => response,
        Err(e) => {
            log::error!("[native] Download failed: {}", e);
            writer.set_error(format!("Download failed: {}", e));
            return;
        }
    };
    log::info!(
        "[native] Download started: status={} type={:?} length={:?}",
        response.status,
        response.headers.content_type,
        response.headers.content_length
    );

    let mut body = response.into_body().bytes_stream();
    let mut total_bytes = 0u64;
    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("[native] Download error after {} bytes: {}", total_bytes, e);
                writer.set_error(format!("Download error: {}", e));
                return;
            }
        };
        while !writer.has_room() {
            tokio::time::sleep(WRITER_BACKOFF).await;
        }
        if writer.write_bytes(&bytes).is_err() {
            log::debug!("[native] Reader closed after {} bytes", total_bytes);
            return;
        }
        total_bytes += bytes.len() as u64;
    }
    log::info!("[native] Download complete: {} bytes", total_bytes);
    writer.finish();
}

/// Decode thread body. Owns the output stream so it is created and dropped
/// on one thread.
fn run_playback(
    shared: Arc<Playback>,
    reader: StreamReader,
    extension: Option<&'static str>,
    events: EngineEventSender,
) {
    let report = |event: EngineEvent| {
        if !shared.stopped() {
            let _ = events.send(event);
        }
    };

    report(EngineEvent::Buffering);
    let mut decoder = match AudioDecoder::new(reader, extension) {
        Ok(decoder) => decoder,
        Err(e) => {
            report(EngineEvent::Error(e.to_string()));
            return;
        }
    };
    shared.sample_rate.store(decoder.sample_rate(), Ordering::SeqCst);
    shared
        .channels
        .store(decoder.channels() as u32, Ordering::SeqCst);

    let _stream = match open_output(&shared, decoder.sample_rate(), decoder.channels()) {
        Ok(stream) => stream,
        Err(e) => {
            report(EngineEvent::Error(e.to_string()));
            return;
        }
    };
    report(EngineEvent::Playing);

    loop {
        if shared.stopped() {
            return;
        }

        let pending_seek = shared.seek_target_ms.swap(NO_SEEK, Ordering::SeqCst);
        if pending_seek != NO_SEEK {
            let seconds = pending_seek as f64 / 1000.0;
            shared.ring.lock().clear();
            shared.ring_changed.notify_all();
            if let Err(e) = decoder.seek(seconds) {
                log::warn!("[native] {}", e);
            }
            shared.samples_played.store(
                (seconds * shared.samples_per_second()) as u64,
                Ordering::SeqCst,
            );
            continue;
        }

        {
            let mut ring = shared.ring.lock();
            while ring.len() >= MAX_RING_SAMPLES
                && !shared.stopped()
                && shared.seek_target_ms.load(Ordering::Relaxed) == NO_SEEK
            {
                shared.ring_changed.wait(&mut ring);
            }
        }
        if shared.stopped() || shared.seek_target_ms.load(Ordering::Relaxed) != NO_SEEK {
            continue;
        }

        match decoder.decode_next() {
            Ok(Some(samples)) => {
                shared.ring.lock().extend(samples);
                shared.ring_changed.notify_all();
            }
            Ok(None) => break,
            Err(e) => {
                report(EngineEvent::Error(e.to_string()));
                return;
            }
        }
    }

    // Let the output callback drain what is left before reporting the end.
    {
        let mut ring = shared.ring.lock();
        while !ring.is_empty() && !shared.stopped() {
            shared
                .ring_changed
                .wait_for(&mut ring, Duration::from_millis(100));
        }
    }
    report(EngineEvent::Ended);
}

fn open_output(shared: &Arc<Playback>, sample_rate: u32, channels: usize) -> AppResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AppError::Audio("No output device available".into()))?;

    let config = cpal::StreamConfig {
        channels: channels as u16,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let callback_shared = Arc::clone(shared);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let shared = &callback_shared;
                if !shared.playing.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }

                let volume = *shared.volume.lock();
                let mut ring = shared.ring.lock();
                let available = ring.len().min(data.len());
                for sample in data.iter_mut() {
                    *sample = ring.pop_front().map_or(0.0, |s| s * volume);
                }
                shared
                    .samples_played
                    .fetch_add(available as u64, Ordering::Relaxed);
                shared.ring_changed.notify_all();
            },
            |err| log::error!("[native] Output error: {}", err),
            None,
        )
        .map_err(|e| AppError::Audio(format!("Failed to build output stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| AppError::Audio(format!("Failed to start playback: {}", e)))?;
    Ok(stream)
}
