//! Playback session actor driven by a fake engine and a fake upstream.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use ytbg::api::models::{PlayerResponse, StreamDescriptor, Track};
use ytbg::api::profiles::ClientProfile;
use ytbg::api::resolver::{PlayerApi, ResolverSettings, StreamResolver};
use ytbg::audio::cache::ResolutionCache;
use ytbg::audio::engine::{engine_channel, EngineEvent, EngineEventSender, MediaEngine};
use ytbg::audio::queue::PlaybackQueue;
use ytbg::audio::session::{PlaybackSession, SessionHandle, SessionParts, SessionSettings};
use ytbg::bridge::LogNowPlaying;
use ytbg::clock::SystemClock;
use ytbg::error::{AppError, AppResult};
use ytbg::events::{SessionSnapshot, SessionState};
use ytbg::history::PlayHistory;

const A: &str = "aaaaaaaaaaa";
const B: &str = "bbbbbbbbbbb";
const C: &str = "ccccccccccc";

fn stream_url(id: &str) -> String {
    format!("https://rr1.googlevideo.com/videoplayback?id={}", id)
}

#[derive(Default)]
struct FakeApi {
    delays: HashMap<String, Duration>,
    unplayable: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeApi {
    fn with_delay(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(id.to_string(), delay);
        self
    }

    fn call_count(&self, id: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == id).count()
    }
}

impl PlayerApi for FakeApi {
    fn fetch_player<'a>(
        &'a self,
        _profile: &'a ClientProfile,
        video_id: &'a str,
    ) -> BoxFuture<'a, AppResult<PlayerResponse>> {
        Box::pin(async move {
            self.calls.lock().push(video_id.to_string());
            if let Some(delay) = self.delays.get(video_id) {
                tokio::time::sleep(*delay).await;
            }
            let body = if self.unplayable {
                json!({ "playabilityStatus": { "status": "UNPLAYABLE", "reason": "Not here" } })
            } else {
                json!({
                    "playabilityStatus": { "status": "OK" },
                    "streamingData": {
                        "adaptiveFormats": [{
                            "url": stream_url(video_id),
                            "mimeType": "audio/mp4; codecs=\"mp4a.40.2\"",
                            "bitrate": 128000,
                            "approxDurationMs": "200000"
                        }]
                    },
                    "videoDetails": { "title": video_id, "author": "Someone" }
                })
            };
            serde_json::from_value(body).map_err(AppError::from)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Start(String),
    Pause,
    Resume,
    Seek(f64),
    Stop,
    Volume(f32),
}

/// Engine that records calls and plays instantly.
struct FakeEngine {
    calls: Arc<Mutex<Vec<Call>>>,
    position: Arc<Mutex<f64>>,
    events: EngineEventSender,
    /// Emit an error while stopping, like a decoder torn down mid-read.
    error_on_stop: bool,
}

impl MediaEngine for FakeEngine {
    fn start(&mut self, descriptor: &StreamDescriptor) -> AppResult<()> {
        self.calls.lock().push(Call::Start(descriptor.stream_url.clone()));
        *self.position.lock() = 0.0;
        let _ = self.events.send(EngineEvent::Playing);
        Ok(())
    }

    fn pause(&mut self) {
        self.calls.lock().push(Call::Pause);
        let _ = self.events.send(EngineEvent::Paused);
    }

    fn resume(&mut self) -> AppResult<()> {
        self.calls.lock().push(Call::Resume);
        let _ = self.events.send(EngineEvent::Playing);
        Ok(())
    }

    fn seek(&mut self, position_seconds: f64) {
        self.calls.lock().push(Call::Seek(position_seconds));
        *self.position.lock() = position_seconds;
    }

    fn stop(&mut self) {
        self.calls.lock().push(Call::Stop);
        if self.error_on_stop {
            let _ = self.events.send(EngineEvent::Error("read after close".to_string()));
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.calls.lock().push(Call::Volume(volume));
    }

    fn position_seconds(&self) -> f64 {
        *self.position.lock()
    }

    fn duration_seconds(&self) -> f64 {
        200.0
    }
}

#[derive(Default)]
struct RecordingHistory {
    played: Mutex<Vec<String>>,
}

impl PlayHistory for RecordingHistory {
    fn record_play<'a>(&'a self, track: &'a Track) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(async move {
            self.played.lock().push(track.id.clone());
            Ok(())
        })
    }
}

struct Harness {
    session: SessionHandle,
    task: JoinHandle<()>,
    api: Arc<FakeApi>,
    calls: Arc<Mutex<Vec<Call>>>,
    position: Arc<Mutex<f64>>,
    events: EngineEventSender,
    history: Arc<RecordingHistory>,
}

impl Harness {
    fn new(api: FakeApi) -> Self {
        Self::build(api, false)
    }

    fn build(api: FakeApi, error_on_stop: bool) -> Self {
        let api = Arc::new(api);
        let resolver = StreamResolver::new(
            api.clone(),
            vec![ClientProfile::android_vr()],
            ResolverSettings::default(),
            Arc::new(SystemClock),
        );
        let cache = ResolutionCache::new(100, chrono::Duration::seconds(60), Arc::new(SystemClock));

        let (events, events_rx) = engine_channel();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let position = Arc::new(Mutex::new(0.0));
        let engine = FakeEngine {
            calls: calls.clone(),
            position: position.clone(),
            events: events.clone(),
            error_on_stop,
        };
        let history = Arc::new(RecordingHistory::default());

        let (session, task) = PlaybackSession::spawn(
            SessionSettings::default(),
            PlaybackQueue::with_seed(3),
            SessionParts {
                resolver: Arc::new(resolver),
                cache: Arc::new(cache),
                engine: Box::new(engine),
                engine_events: events_rx,
                history: history.clone(),
                now_playing: Arc::new(LogNowPlaying),
            },
        );

        Self {
            session,
            task,
            api,
            calls,
            position,
            events,
            history,
        }
    }

    async fn wait(&self, predicate: impl FnMut(&SessionSnapshot) -> bool) -> SessionSnapshot {
        tokio::time::timeout(Duration::from_secs(30), self.session.wait_for(predicate))
            .await
            .expect("timed out waiting for session state")
            .unwrap()
    }

    async fn wait_playing(&self, id: &str) -> SessionSnapshot {
        self.wait(|s| s.state == SessionState::Playing && s.current_id() == Some(id))
            .await
    }

    fn starts(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Start(url) => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    fn fail(&self) {
        self.events
            .send(EngineEvent::Error("decode failed".to_string()))
            .unwrap();
    }
}

fn queue(ids: &[&str]) -> Vec<Track> {
    ids.iter().map(|id| Track::from_id(*id)).collect()
}

#[tokio::test(start_paused = true)]
async fn plays_queue_and_records_history() {
    let h = Harness::new(FakeApi::default());
    h.session.play_queue(queue(&[A, B]), 0).unwrap();

    let snapshot = h.wait_playing(A).await;
    assert_eq!(snapshot.duration, 200.0);
    assert_eq!(snapshot.current_track.unwrap().duration_seconds, 200);
    assert_eq!(h.starts(), vec![stream_url(A)]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*h.history.played.lock(), vec![A.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn superseded_load_is_discarded() {
    let api = FakeApi::default()
        .with_delay(A, Duration::from_millis(500))
        .with_delay(B, Duration::from_millis(10));
    let h = Harness::new(api);

    h.session.play_queue(queue(&[A, B]), 0).unwrap();
    h.session.play_index(1).unwrap();
    h.wait_playing(B).await;

    // Let the slow resolution for A land.
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.api.call_count(A), 1);
    assert_eq!(h.starts(), vec![stream_url(B)]);
    assert_eq!(h.session.snapshot().current_id(), Some(B));
    assert_eq!(h.session.snapshot().state, SessionState::Playing);
}

#[tokio::test(start_paused = true)]
async fn error_from_stopped_stream_is_not_charged_to_next_track() {
    let h = Harness::build(FakeApi::default(), true);
    h.session.play_queue(queue(&[A, B]), 0).unwrap();
    h.wait_playing(A).await;

    h.session.next().unwrap();
    h.wait_playing(B).await;
    // A is cached, so its resolution returns right behind the stop.
    h.session.previous().unwrap();
    h.wait_playing(A).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.state, SessionState::Playing);
    assert_eq!(snapshot.current_id(), Some(A));
    assert_eq!(snapshot.consecutive_failures, 0);
    assert_eq!(h.api.call_count(A), 1);
}

#[tokio::test(start_paused = true)]
async fn two_failures_wait_for_retry() {
    let h = Harness::new(FakeApi::default());
    h.session.play_queue(queue(&[A, B]), 0).unwrap();
    h.wait_playing(A).await;

    h.fail();
    h.wait(|s| s.consecutive_failures == 1).await;
    h.fail();
    let snapshot = h.wait(|s| s.consecutive_failures == 2).await;
    assert!(snapshot.state.is_error());

    tokio::time::sleep(Duration::from_secs(5)).await;
    let snapshot = h.session.snapshot();
    assert!(snapshot.state.is_error());
    assert_eq!(snapshot.current_id(), Some(A));

    h.session.retry().unwrap();
    let snapshot = h.wait_playing(A).await;
    assert_eq!(snapshot.consecutive_failures, 0);
    assert!(h.calls.lock().contains(&Call::Resume));
}

#[tokio::test(start_paused = true)]
async fn third_failure_advances_after_delay() {
    let h = Harness::new(FakeApi::default());
    h.session.play_queue(queue(&[A, B, C]), 0).unwrap();
    h.wait_playing(A).await;

    h.fail();
    h.wait(|s| s.consecutive_failures == 1).await;
    h.fail();
    h.wait(|s| s.consecutive_failures == 2).await;

    let before = tokio::time::Instant::now();
    h.fail();
    let snapshot = h.wait_playing(B).await;

    assert!(before.elapsed() >= Duration::from_millis(1000));
    assert_eq!(snapshot.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn manual_skip_cancels_pending_advance() {
    let h = Harness::new(FakeApi::default());
    h.session.play_queue(queue(&[A, B, C]), 0).unwrap();
    h.wait_playing(A).await;

    for n in 1..=2 {
        h.fail();
        h.wait(|s| s.consecutive_failures == n).await;
    }
    h.fail();
    h.wait(|s| s.state.is_error() && s.consecutive_failures == 0)
        .await;

    h.session.next().unwrap();
    h.wait_playing(B).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.session.snapshot().current_id(), Some(B));
    assert_eq!(h.starts(), vec![stream_url(A), stream_url(B)]);
}

#[tokio::test(start_paused = true)]
async fn end_of_queue_goes_idle() {
    let h = Harness::new(FakeApi::default());
    h.session.play_queue(queue(&[A]), 0).unwrap();
    h.wait_playing(A).await;

    h.events.send(EngineEvent::Ended).unwrap();
    let snapshot = h
        .wait(|s| s.state == SessionState::Idle && s.current_track.is_none())
        .await;
    assert_eq!(snapshot.queue.tracks.len(), 1);
    assert_eq!(h.calls.lock().last(), Some(&Call::Stop));
}

#[tokio::test(start_paused = true)]
async fn ended_advances_through_queue() {
    let h = Harness::new(FakeApi::default());
    h.session.play_queue(queue(&[A, B]), 0).unwrap();
    h.wait_playing(A).await;

    h.events.send(EngineEvent::Ended).unwrap();
    h.wait_playing(B).await;
    assert_eq!(h.starts(), vec![stream_url(A), stream_url(B)]);
}

#[tokio::test(start_paused = true)]
async fn previous_restarts_or_goes_back() {
    let h = Harness::new(FakeApi::default());
    h.session.play_queue(queue(&[A, B, C]), 0).unwrap();
    h.wait_playing(A).await;

    *h.position.lock() = 10.0;
    h.session.previous().unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !h.calls.lock().contains(&Call::Seek(0.0)) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("restart seek");
    assert_eq!(h.session.snapshot().current_id(), Some(A));

    *h.position.lock() = 1.0;
    h.session.previous().unwrap();
    h.wait_playing(C).await;
}

#[tokio::test(start_paused = true)]
async fn resolution_failure_is_not_retried() {
    let h = Harness::new(FakeApi {
        unplayable: true,
        ..FakeApi::default()
    });
    h.session.play_queue(queue(&[A, B]), 0).unwrap();

    let snapshot = h.wait(|s| s.state.is_error()).await;
    assert_eq!(snapshot.state, SessionState::Error("No stream available".into()));
    assert_eq!(snapshot.consecutive_failures, 0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.api.call_count(A), 1);
    assert!(h.starts().is_empty());
    assert_eq!(h.session.snapshot().current_id(), Some(A));
}

#[tokio::test(start_paused = true)]
async fn replaying_a_track_hits_the_cache() {
    let h = Harness::new(FakeApi::default());
    h.session.play_queue(queue(&[A, B]), 0).unwrap();
    h.wait_playing(A).await;

    h.session.next().unwrap();
    h.wait_playing(B).await;
    h.session.play_index(0).unwrap();
    h.wait_playing(A).await;

    assert_eq!(h.api.call_count(A), 1);
    assert_eq!(h.starts().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn pause_and_toggle() {
    let h = Harness::new(FakeApi::default());
    h.session.play_queue(queue(&[A]), 0).unwrap();
    h.wait_playing(A).await;

    h.session.pause().unwrap();
    h.wait(|s| s.state == SessionState::Paused).await;

    h.session.toggle_play().unwrap();
    h.wait_playing(A).await;
    let calls = h.calls.lock().clone();
    assert!(calls.contains(&Call::Pause));
    assert!(calls.contains(&Call::Resume));
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_the_handle() {
    let h = Harness::new(FakeApi::default());
    h.session.play_queue(queue(&[A]), 0).unwrap();
    h.wait_playing(A).await;

    h.session.shutdown().unwrap();
    h.task.await.unwrap();

    assert!(matches!(h.session.play(), Err(AppError::SessionClosed)));
    assert_eq!(h.session.snapshot().state, SessionState::Idle);
}
