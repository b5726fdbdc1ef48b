use crate::api::models::{StreamDescriptor, Track};
use crate::api::resolver::StreamResolver;
use crate::audio::cache::ResolutionCache;
use crate::audio::engine::{EngineEvent, EngineEventReceiver, MediaEngine};
use crate::audio::queue::{PlaybackQueue, RepeatMode};
use crate::bridge::{NowPlaying, NowPlayingMetadata, RemoteIntent};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::events::{PlaybackState, SessionSnapshot, SessionState};
use crate::history::PlayHistory;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Consecutive playback failures on which the session gives up on a
    /// track and advances.
    pub failure_threshold: u32,
    pub advance_delay: Duration,
    /// Past this position, "previous" restarts the current track.
    pub restart_threshold_secs: f64,
    pub seek_step_secs: f64,
    pub progress_interval: Duration,
    pub volume: f32,
    pub muted: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            advance_delay: Duration::from_millis(1000),
            restart_threshold_secs: 3.0,
            seek_step_secs: 10.0,
            progress_interval: Duration::from_millis(500),
            volume: 1.0,
            muted: false,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            advance_delay: Duration::from_millis(config.advance_delay_ms),
            restart_threshold_secs: config.restart_threshold_secs,
            seek_step_secs: config.seek_step_secs,
            volume: config.volume.clamp(0.0, 1.0),
            muted: config.muted,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    PlayQueue { tracks: Vec<Track>, start_index: usize },
    PlayIndex(usize),
    AddToQueue(Track),
    RemoveFromQueue(usize),
    ClearQueue,
    Play,
    Pause,
    TogglePlay,
    Next,
    Previous,
    Retry,
    SeekTo(f64),
    SeekRelative(f64),
    SetVolume(f32),
    ToggleMute,
    SetShuffle(bool),
    SetRepeat(RepeatMode),
    CycleRepeat,
    Stop,
    Shutdown,
}

/// Engine clock read at the moment an input is dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnginePosition {
    pub position: f64,
    pub duration: f64,
}

#[derive(Debug, Clone)]
pub enum SessionInput {
    Command(SessionCommand, EnginePosition),
    Engine(EngineEvent),
    Resolved {
        generation: u64,
        result: Result<StreamDescriptor, String>,
    },
    StartFailed {
        generation: u64,
        reason: String,
    },
    AdvanceDue {
        token: u64,
    },
    Progress(EnginePosition),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Resolve { generation: u64, track: Track },
    StartEngine { generation: u64, descriptor: StreamDescriptor },
    PauseEngine,
    ResumeEngine,
    SeekEngine(f64),
    StopEngine,
    SetVolume(f32),
    ScheduleAdvance { token: u64, delay: Duration },
    CancelAdvance,
    RecordPlay(Track),
    Announce(Track),
    ClearAnnouncement,
}

/// Playback state machine. Every input is turned into a list of effects for
/// the actor to carry out; nothing here touches the engine or the network.
///
/// Each load bumps `load_generation`; resolution results and start failures
/// carrying an older generation are dropped. Engine events are only honoured
/// while a descriptor is loaded, so stragglers from a stopped stream cannot
/// move the session.
pub struct SessionCore {
    settings: SessionSettings,
    queue: PlaybackQueue,
    state: SessionState,
    current_track: Option<Track>,
    descriptor: Option<StreamDescriptor>,
    load_generation: u64,
    consecutive_failures: u32,
    recorded_generation: Option<u64>,
    advance_token: u64,
    pending_advance: Option<u64>,
    position: f64,
    duration: f64,
    volume: f32,
    muted: bool,
}

impl SessionCore {
    pub fn new(settings: SessionSettings, queue: PlaybackQueue) -> Self {
        Self {
            volume: settings.volume,
            muted: settings.muted,
            settings,
            queue,
            state: SessionState::Idle,
            current_track: None,
            descriptor: None,
            load_generation: 0,
            consecutive_failures: 0,
            recorded_generation: None,
            advance_token: 0,
            pending_advance: None,
            position: 0.0,
            duration: 0.0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current_track.as_ref()
    }

    pub fn descriptor(&self) -> Option<&StreamDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn load_generation(&self) -> u64 {
        self.load_generation
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state.clone(),
            current_track: self.current_track.clone(),
            queue: self.queue.state(),
            position: self.position,
            duration: self.duration,
            volume: self.volume,
            muted: self.muted,
            consecutive_failures: self.consecutive_failures,
            load_generation: self.load_generation,
        }
    }

    pub fn handle(&mut self, input: SessionInput) -> Vec<Effect> {
        match input {
            SessionInput::Command(command, at) => self.on_command(command, at),
            SessionInput::Engine(event) => self.on_engine(event),
            SessionInput::Resolved { generation, result } => self.on_resolved(generation, result),
            SessionInput::StartFailed { generation, reason } => {
                if generation != self.load_generation {
                    return Vec::new();
                }
                self.descriptor = None;
                self.on_failure(reason)
            }
            SessionInput::AdvanceDue { token } => {
                if self.pending_advance != Some(token) {
                    log::debug!("[session] Ignoring cancelled advance {}", token);
                    return Vec::new();
                }
                self.pending_advance = None;
                self.advance()
            }
            SessionInput::Progress(at) => {
                self.position = at.position;
                if at.duration > 0.0 {
                    self.duration = at.duration;
                }
                Vec::new()
            }
        }
    }

    fn on_command(&mut self, command: SessionCommand, at: EnginePosition) -> Vec<Effect> {
        match command {
            SessionCommand::PlayQueue {
                tracks,
                start_index,
            } => {
                self.queue.set_queue(tracks, start_index);
                self.load_current_or_idle()
            }
            SessionCommand::PlayIndex(index) => {
                if index >= self.queue.len() {
                    return Vec::new();
                }
                match self.queue.set_current(index).cloned() {
                    Some(track) => self.load(track),
                    None => Vec::new(),
                }
            }
            SessionCommand::AddToQueue(track) => {
                self.queue.append(track);
                Vec::new()
            }
            SessionCommand::RemoveFromQueue(index) => {
                let removing_current = self.queue.current_index() == Some(index);
                self.queue.remove_at(index);
                if removing_current {
                    self.load_current_or_idle()
                } else {
                    Vec::new()
                }
            }
            SessionCommand::ClearQueue => {
                self.queue.clear();
                self.go_idle()
            }
            SessionCommand::Play => self.play(),
            SessionCommand::Pause => self.pause(),
            SessionCommand::TogglePlay => {
                if self.state == SessionState::Playing {
                    self.pause()
                } else {
                    self.play()
                }
            }
            SessionCommand::Next => self.advance(),
            SessionCommand::Previous => self.previous(at),
            SessionCommand::Retry => self.retry(),
            SessionCommand::SeekTo(target) => self.seek(target, at),
            SessionCommand::SeekRelative(offset) => self.seek(at.position + offset, at),
            SessionCommand::SetVolume(volume) => {
                self.volume = volume.clamp(0.0, 1.0);
                self.muted = self.volume == 0.0;
                vec![Effect::SetVolume(self.effective_volume())]
            }
            SessionCommand::ToggleMute => {
                self.muted = !self.muted;
                if !self.muted && self.volume == 0.0 {
                    self.volume = 1.0;
                }
                vec![Effect::SetVolume(self.effective_volume())]
            }
            SessionCommand::SetShuffle(enabled) => {
                self.queue.set_shuffle(enabled);
                Vec::new()
            }
            SessionCommand::SetRepeat(mode) => {
                self.queue.set_repeat(mode);
                Vec::new()
            }
            SessionCommand::CycleRepeat => {
                let mode = self.queue.cycle_repeat();
                log::debug!("[session] Repeat mode now {:?}", mode);
                Vec::new()
            }
            SessionCommand::Stop => self.go_idle(),
            // The actor stops its loop on shutdown.
            SessionCommand::Shutdown => Vec::new(),
        }
    }

    fn on_engine(&mut self, event: EngineEvent) -> Vec<Effect> {
        if self.descriptor.is_none() {
            log::debug!("[session] Ignoring {:?}: no stream loaded", event);
            return Vec::new();
        }

        match event {
            EngineEvent::Playing => {
                self.consecutive_failures = 0;
                self.state = SessionState::Playing;
                if self.recorded_generation == Some(self.load_generation) {
                    return Vec::new();
                }
                self.recorded_generation = Some(self.load_generation);
                self.current_track
                    .clone()
                    .map(|track| vec![Effect::RecordPlay(track)])
                    .unwrap_or_default()
            }
            EngineEvent::Paused => {
                if matches!(self.state, SessionState::Playing | SessionState::Loading) {
                    self.state = SessionState::Paused;
                }
                Vec::new()
            }
            EngineEvent::Buffering => {
                self.state = SessionState::Loading;
                Vec::new()
            }
            EngineEvent::Error(reason) => self.on_failure(reason),
            EngineEvent::Ended => {
                log::info!("[session] Track ended");
                self.advance()
            }
        }
    }

    fn on_resolved(&mut self, generation: u64, result: Result<StreamDescriptor, String>) -> Vec<Effect> {
        if generation != self.load_generation {
            log::debug!(
                "[session] Discarding resolution for generation {} (current {})",
                generation,
                self.load_generation
            );
            return Vec::new();
        }

        match result {
            Ok(descriptor) => {
                if let Some(track) = self.current_track.as_mut() {
                    if track.duration_seconds == 0 {
                        track.duration_seconds = descriptor.duration_seconds;
                    }
                    let id = track.id.clone();
                    self.queue.enrich_duration(&id, descriptor.duration_seconds);
                }
                if descriptor.duration_seconds > 0 {
                    self.duration = descriptor.duration_seconds as f64;
                }
                self.descriptor = Some(descriptor.clone());
                vec![
                    Effect::SetVolume(self.effective_volume()),
                    Effect::StartEngine {
                        generation,
                        descriptor,
                    },
                ]
            }
            Err(reason) => {
                log::warn!("[session] Resolution failed: {}", reason);
                self.state = SessionState::Error(reason);
                Vec::new()
            }
        }
    }

    fn on_failure(&mut self, reason: String) -> Vec<Effect> {
        self.consecutive_failures += 1;
        log::warn!(
            "[session] Playback error ({}/{}): {}",
            self.consecutive_failures,
            self.settings.failure_threshold,
            reason
        );
        self.state = SessionState::Error(reason);

        if self.consecutive_failures < self.settings.failure_threshold {
            return Vec::new();
        }

        self.consecutive_failures = 0;
        self.advance_token += 1;
        self.pending_advance = Some(self.advance_token);
        log::info!(
            "[session] Giving up on track, advancing in {:?}",
            self.settings.advance_delay
        );
        vec![Effect::ScheduleAdvance {
            token: self.advance_token,
            delay: self.settings.advance_delay,
        }]
    }

    fn load(&mut self, track: Track) -> Vec<Effect> {
        let mut effects = self.cancel_advance();
        self.load_generation += 1;
        let generation = self.load_generation;
        log::info!(
            "[session] Loading {} \"{}\" (generation {})",
            track.id,
            track.title,
            generation
        );

        self.state = SessionState::Loading;
        self.descriptor = None;
        self.position = 0.0;
        self.duration = track.duration_seconds as f64;
        self.current_track = Some(track.clone());

        effects.push(Effect::StopEngine);
        effects.push(Effect::Announce(track.clone()));
        effects.push(Effect::Resolve { generation, track });
        effects
    }

    fn load_current_or_idle(&mut self) -> Vec<Effect> {
        match self.queue.current_track().cloned() {
            Some(track) => self.load(track),
            None => self.go_idle(),
        }
    }

    fn advance(&mut self) -> Vec<Effect> {
        match self.queue.next_index() {
            Some(index) => match self.queue.set_current(index).cloned() {
                Some(track) => self.load(track),
                None => self.go_idle(),
            },
            None => {
                log::info!("[session] End of queue");
                self.go_idle()
            }
        }
    }

    fn previous(&mut self, at: EnginePosition) -> Vec<Effect> {
        if self.descriptor.is_some() && at.position > self.settings.restart_threshold_secs {
            self.position = 0.0;
            return vec![Effect::SeekEngine(0.0)];
        }
        match self.queue.previous_index() {
            Some(index) => match self.queue.set_current(index).cloned() {
                Some(track) => self.load(track),
                None => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    fn play(&mut self) -> Vec<Effect> {
        if self.descriptor.is_some() {
            return vec![Effect::ResumeEngine];
        }
        if self.state == SessionState::Loading {
            return Vec::new();
        }
        match self.current_track.clone() {
            Some(track) => self.load(track),
            None => Vec::new(),
        }
    }

    fn pause(&mut self) -> Vec<Effect> {
        if self.descriptor.is_none() {
            return Vec::new();
        }
        if matches!(self.state, SessionState::Playing | SessionState::Loading) {
            self.state = SessionState::Paused;
        }
        vec![Effect::PauseEngine]
    }

    fn retry(&mut self) -> Vec<Effect> {
        let Some(track) = self.current_track.clone() else {
            return Vec::new();
        };
        if self.descriptor.is_none() {
            return self.load(track);
        }
        log::info!("[session] Retrying {}", track.id);
        self.state = SessionState::Loading;
        vec![Effect::ResumeEngine]
    }

    fn seek(&mut self, target: f64, at: EnginePosition) -> Vec<Effect> {
        if self.descriptor.is_none() {
            return Vec::new();
        }
        let duration = if at.duration > 0.0 {
            at.duration
        } else {
            self.duration
        };
        let mut target = target.max(0.0);
        if duration > 0.0 {
            target = target.min(duration);
        }
        self.position = target;
        vec![Effect::SeekEngine(target)]
    }

    fn go_idle(&mut self) -> Vec<Effect> {
        let mut effects = self.cancel_advance();
        // In-flight resolutions are stale from here on.
        self.load_generation += 1;
        self.state = SessionState::Idle;
        self.current_track = None;
        self.descriptor = None;
        self.position = 0.0;
        self.duration = 0.0;
        effects.push(Effect::StopEngine);
        effects.push(Effect::ClearAnnouncement);
        effects
    }

    fn cancel_advance(&mut self) -> Vec<Effect> {
        if self.pending_advance.take().is_some() {
            vec![Effect::CancelAdvance]
        } else {
            Vec::new()
        }
    }
}

/// Collaborators a session actor runs against.
pub struct SessionParts {
    pub resolver: Arc<StreamResolver>,
    pub cache: Arc<ResolutionCache>,
    pub engine: Box<dyn MediaEngine>,
    pub engine_events: EngineEventReceiver,
    pub history: Arc<dyn PlayHistory>,
    pub now_playing: Arc<dyn NowPlaying>,
}

enum Wake {
    Command(Option<SessionCommand>),
    Input(SessionInput),
    Progress,
}

/// Actor owning a [`SessionCore`] and the engine. All inputs are serialized
/// through its loop.
pub struct PlaybackSession {
    core: SessionCore,
    engine: Box<dyn MediaEngine>,
    engine_events: EngineEventReceiver,
    resolver: Arc<StreamResolver>,
    cache: Arc<ResolutionCache>,
    history: Arc<dyn PlayHistory>,
    now_playing: Arc<dyn NowPlaying>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    inputs_tx: mpsc::UnboundedSender<SessionInput>,
    inputs_rx: mpsc::UnboundedReceiver<SessionInput>,
    snapshots: watch::Sender<SessionSnapshot>,
    advance_timer: Option<JoinHandle<()>>,
}

impl PlaybackSession {
    /// Spawn the actor on the current runtime.
    pub fn spawn(
        settings: SessionSettings,
        queue: PlaybackQueue,
        parts: SessionParts,
    ) -> (SessionHandle, JoinHandle<()>) {
        let seek_step_secs = settings.seek_step_secs;
        let core = SessionCore::new(settings, queue);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (snapshots, snapshots_rx) = watch::channel(core.snapshot());

        let mut session = Self {
            core,
            engine: parts.engine,
            engine_events: parts.engine_events,
            resolver: parts.resolver,
            cache: parts.cache,
            history: parts.history,
            now_playing: parts.now_playing,
            commands,
            inputs_tx,
            inputs_rx,
            snapshots,
            advance_timer: None,
        };
        session.engine.set_volume(session.core.effective_volume());

        let task = tokio::spawn(session.run());
        let handle = SessionHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
            seek_step_secs,
        };
        (handle, task)
    }

    async fn run(mut self) {
        let mut progress = tokio::time::interval(self.core.settings().progress_interval);
        progress.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("[session] Started");

        loop {
            // Engine events first: anything a stopped stream emitted is queued by
            // the time `stop` returns, so it drains while no descriptor is
            // loaded instead of racing the next track's resolution.
            let wake = tokio::select! {
                biased;
                Some(event) = self.engine_events.recv() => Wake::Input(SessionInput::Engine(event)),
                command = self.commands.recv() => Wake::Command(command),
                Some(input) = self.inputs_rx.recv() => Wake::Input(input),
                _ = progress.tick() => Wake::Progress,
            };

            match wake {
                Wake::Command(None) | Wake::Command(Some(SessionCommand::Shutdown)) => break,
                Wake::Command(Some(command)) => {
                    let at = self.engine_position();
                    self.dispatch(SessionInput::Command(command, at));
                }
                Wake::Input(input) => self.dispatch(input),
                Wake::Progress => {
                    if self.core.state() == &SessionState::Playing {
                        let at = self.engine_position();
                        self.dispatch(SessionInput::Progress(at));
                    }
                }
            }
        }

        let at = self.engine_position();
        self.dispatch(SessionInput::Command(SessionCommand::Stop, at));
        log::info!("[session] Shut down");
    }

    fn engine_position(&self) -> EnginePosition {
        EnginePosition {
            position: self.engine.position_seconds(),
            duration: self.engine.duration_seconds(),
        }
    }

    fn dispatch(&mut self, input: SessionInput) {
        let mut pending = VecDeque::from([input]);
        while let Some(input) = pending.pop_front() {
            for effect in self.core.handle(input) {
                if let Some(follow_up) = self.execute(effect) {
                    pending.push_back(follow_up);
                }
            }
        }
        self.publish();
    }

    /// Carry out one effect. Engine calls that fail synchronously come back
    /// as a follow-up input.
    fn execute(&mut self, effect: Effect) -> Option<SessionInput> {
        match effect {
            Effect::Resolve { generation, track } => self.spawn_resolution(generation, track),
            Effect::StartEngine {
                generation,
                descriptor,
            } => {
                if let Err(e) = self.engine.start(&descriptor) {
                    return Some(SessionInput::StartFailed {
                        generation,
                        reason: e.to_string(),
                    });
                }
            }
            Effect::PauseEngine => self.engine.pause(),
            Effect::ResumeEngine => {
                if let Err(e) = self.engine.resume() {
                    return Some(SessionInput::Engine(EngineEvent::Error(e.to_string())));
                }
            }
            Effect::SeekEngine(position) => self.engine.seek(position),
            Effect::StopEngine => self.engine.stop(),
            Effect::SetVolume(volume) => self.engine.set_volume(volume),
            Effect::ScheduleAdvance { token, delay } => self.arm_advance(token, delay),
            Effect::CancelAdvance => self.disarm_advance(),
            Effect::RecordPlay(track) => self.spawn_record(track),
            Effect::Announce(track) => {
                self.now_playing.set_metadata(&NowPlayingMetadata::from(&track))
            }
            Effect::ClearAnnouncement => self.now_playing.clear(),
        }
        None
    }

    fn spawn_resolution(&self, generation: u64, track: Track) {
        let resolver = Arc::clone(&self.resolver);
        let cache = Arc::clone(&self.cache);
        let inputs = self.inputs_tx.clone();

        tokio::spawn(async move {
            let result = match cache.get(&track.id) {
                Some(descriptor) => {
                    log::debug!("[session] Cache hit for {}", track.id);
                    Ok(descriptor)
                }
                None => resolver.resolve(&track.id).await.map(|descriptor| {
                    cache.put(&track.id, descriptor.clone());
                    descriptor
                }),
            };
            let result = result.map_err(|e| {
                log::warn!("[session] Could not resolve {}: {}", track.id, e);
                e.user_message()
            });
            let _ = inputs.send(SessionInput::Resolved { generation, result });
        });
    }

    fn spawn_record(&self, track: Track) {
        let history = Arc::clone(&self.history);
        tokio::spawn(async move {
            if let Err(e) = history.record_play(&track).await {
                log::warn!("[session] Failed to record play of {}: {}", track.id, e);
            }
        });
    }

    fn arm_advance(&mut self, token: u64, delay: Duration) {
        self.disarm_advance();
        let inputs = self.inputs_tx.clone();
        self.advance_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inputs.send(SessionInput::AdvanceDue { token });
        }));
    }

    fn disarm_advance(&mut self) {
        if let Some(timer) = self.advance_timer.take() {
            timer.abort();
        }
    }

    fn publish(&mut self) {
        let snapshot = self.core.snapshot();
        self.now_playing.set_playback(
            PlaybackState::from(&snapshot.state),
            snapshot.position,
            snapshot.duration,
        );
        self.snapshots.send_replace(snapshot);
    }
}

/// Cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
    seek_step_secs: f64,
}

impl SessionHandle {
    pub fn send(&self, command: SessionCommand) -> AppResult<()> {
        self.commands
            .send(command)
            .map_err(|_| AppError::SessionClosed)
    }

    pub fn play_queue(&self, tracks: Vec<Track>, start_index: usize) -> AppResult<()> {
        self.send(SessionCommand::PlayQueue {
            tracks,
            start_index,
        })
    }

    pub fn play_index(&self, index: usize) -> AppResult<()> {
        self.send(SessionCommand::PlayIndex(index))
    }

    pub fn add_to_queue(&self, track: Track) -> AppResult<()> {
        self.send(SessionCommand::AddToQueue(track))
    }

    pub fn remove_from_queue(&self, index: usize) -> AppResult<()> {
        self.send(SessionCommand::RemoveFromQueue(index))
    }

    pub fn play(&self) -> AppResult<()> {
        self.send(SessionCommand::Play)
    }

    pub fn pause(&self) -> AppResult<()> {
        self.send(SessionCommand::Pause)
    }

    pub fn toggle_play(&self) -> AppResult<()> {
        self.send(SessionCommand::TogglePlay)
    }

    pub fn next(&self) -> AppResult<()> {
        self.send(SessionCommand::Next)
    }

    pub fn previous(&self) -> AppResult<()> {
        self.send(SessionCommand::Previous)
    }

    pub fn retry(&self) -> AppResult<()> {
        self.send(SessionCommand::Retry)
    }

    pub fn seek_to(&self, position: f64) -> AppResult<()> {
        self.send(SessionCommand::SeekTo(position))
    }

    pub fn seek_relative(&self, offset: f64) -> AppResult<()> {
        self.send(SessionCommand::SeekRelative(offset))
    }

    pub fn seek_forward(&self) -> AppResult<()> {
        self.seek_relative(self.seek_step_secs)
    }

    pub fn seek_backward(&self) -> AppResult<()> {
        self.seek_relative(-self.seek_step_secs)
    }

    pub fn set_volume(&self, volume: f32) -> AppResult<()> {
        self.send(SessionCommand::SetVolume(volume))
    }

    pub fn toggle_mute(&self) -> AppResult<()> {
        self.send(SessionCommand::ToggleMute)
    }

    pub fn set_shuffle(&self, enabled: bool) -> AppResult<()> {
        self.send(SessionCommand::SetShuffle(enabled))
    }

    pub fn set_repeat(&self, mode: RepeatMode) -> AppResult<()> {
        self.send(SessionCommand::SetRepeat(mode))
    }

    pub fn cycle_repeat(&self) -> AppResult<()> {
        self.send(SessionCommand::CycleRepeat)
    }

    pub fn stop(&self) -> AppResult<()> {
        self.send(SessionCommand::Stop)
    }

    pub fn shutdown(&self) -> AppResult<()> {
        self.send(SessionCommand::Shutdown)
    }

    /// Translate an intent from the OS media-session surface.
    pub fn apply_intent(&self, intent: RemoteIntent) -> AppResult<()> {
        let command = match intent {
            RemoteIntent::Play => SessionCommand::Play,
            RemoteIntent::Pause => SessionCommand::Pause,
            RemoteIntent::Next => SessionCommand::Next,
            RemoteIntent::Previous => SessionCommand::Previous,
            RemoteIntent::SeekRelative(offset) => SessionCommand::SeekRelative(offset),
            RemoteIntent::SeekTo(position) => SessionCommand::SeekTo(position),
        };
        self.send(command)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&self, predicate: F) -> AppResult<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| AppError::SessionClosed)?;
        Ok(snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tracks(n: usize) -> Vec<Track> {
        (0..n)
            .map(|i| Track::new(format!("track{:06}", i), format!("Track {}", i)))
            .collect()
    }

    fn descriptor(id: &str) -> StreamDescriptor {
        StreamDescriptor {
            stream_url: format!("https://rr1.googlevideo.com/videoplayback?id={}", id),
            mime_type: "audio/mp4".to_string(),
            codec_tag: "mp4a.40.2".to_string(),
            bitrate_bps: 128_000,
            duration_seconds: 200,
            expires_at: Utc::now() + chrono::Duration::hours(6),
            title: String::new(),
            author: String::new(),
            profile: "ANDROID_VR".to_string(),
        }
    }

    fn core_with(n: usize) -> SessionCore {
        let mut core = SessionCore::new(SessionSettings::default(), PlaybackQueue::with_seed(7));
        core.handle(command(SessionCommand::PlayQueue {
            tracks: tracks(n),
            start_index: 0,
        }));
        core
    }

    fn command(command: SessionCommand) -> SessionInput {
        SessionInput::Command(command, EnginePosition::default())
    }

    fn resolve_target(effects: &[Effect]) -> Option<(u64, String)> {
        effects.iter().find_map(|e| match e {
            Effect::Resolve { generation, track } => Some((*generation, track.id.clone())),
            _ => None,
        })
    }

    /// Resolve the current load and report the engine as playing.
    fn start_playing(core: &mut SessionCore) {
        let generation = core.load_generation();
        let id = core.current_track().map(|t| t.id.clone()).unwrap_or_default();
        core.handle(SessionInput::Resolved {
            generation,
            result: Ok(descriptor(&id)),
        });
        core.handle(SessionInput::Engine(EngineEvent::Playing));
    }

    fn engine_error(core: &mut SessionCore) -> Vec<Effect> {
        core.handle(SessionInput::Engine(EngineEvent::Error("decode failed".to_string())))
    }

    #[test]
    fn play_queue_resolves_start_track() {
        let mut core = SessionCore::new(SessionSettings::default(), PlaybackQueue::with_seed(1));
        let effects = core.handle(command(SessionCommand::PlayQueue {
            tracks: tracks(3),
            start_index: 1,
        }));

        assert_eq!(core.state(), &SessionState::Loading);
        assert_eq!(resolve_target(&effects), Some((1, "track000001".to_string())));
    }

    #[test]
    fn stale_resolution_is_discarded() {
        let mut core = core_with(3);
        let first = core.load_generation();
        let effects = core.handle(command(SessionCommand::PlayIndex(1)));
        let (second, id) = resolve_target(&effects).unwrap();
        assert_eq!(id, "track000001");

        let effects = core.handle(SessionInput::Resolved {
            generation: first,
            result: Ok(descriptor("track000000")),
        });
        assert!(effects.is_empty());
        assert!(core.descriptor().is_none());
        assert_eq!(core.state(), &SessionState::Loading);

        let effects = core.handle(SessionInput::Resolved {
            generation: second,
            result: Ok(descriptor("track000001")),
        });
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::StartEngine { descriptor, .. } if descriptor.stream_url.ends_with("track000001")
        )));
    }

    #[test]
    fn resolution_enriches_unknown_duration() {
        let mut core = core_with(2);
        start_playing(&mut core);
        assert_eq!(core.current_track().unwrap().duration_seconds, 200);
        assert_eq!(core.queue().track_at(0).unwrap().duration_seconds, 200);
    }

    #[test]
    fn resolution_failure_is_error_without_counting() {
        let mut core = core_with(2);
        let generation = core.load_generation();
        let effects = core.handle(SessionInput::Resolved {
            generation,
            result: Err("No stream available".to_string()),
        });

        assert!(effects.is_empty());
        assert_eq!(
            core.state(),
            &SessionState::Error("No stream available".to_string())
        );
        assert_eq!(core.consecutive_failures(), 0);
        assert_eq!(core.current_track().unwrap().id, "track000000");
    }

    #[test]
    fn playing_records_once_per_load() {
        let mut core = core_with(1);
        let generation = core.load_generation();
        core.handle(SessionInput::Resolved {
            generation,
            result: Ok(descriptor("track000000")),
        });

        let first = core.handle(SessionInput::Engine(EngineEvent::Playing));
        assert!(matches!(first.as_slice(), [Effect::RecordPlay(t)] if t.id == "track000000"));

        core.handle(SessionInput::Engine(EngineEvent::Paused));
        let second = core.handle(SessionInput::Engine(EngineEvent::Playing));
        assert!(second.is_empty());
    }

    #[test]
    fn two_failures_wait_for_retry() {
        let mut core = core_with(3);
        start_playing(&mut core);

        assert!(engine_error(&mut core).is_empty());
        assert!(engine_error(&mut core).is_empty());
        assert!(core.state().is_error());
        assert_eq!(core.consecutive_failures(), 2);
        assert_eq!(core.current_track().unwrap().id, "track000000");

        let effects = core.handle(command(SessionCommand::Retry));
        assert_eq!(effects, vec![Effect::ResumeEngine]);
        assert_eq!(core.state(), &SessionState::Loading);

        core.handle(SessionInput::Engine(EngineEvent::Playing));
        assert_eq!(core.consecutive_failures(), 0);
    }

    #[test]
    fn third_failure_schedules_advance() {
        let mut core = core_with(3);
        start_playing(&mut core);

        engine_error(&mut core);
        engine_error(&mut core);
        let effects = engine_error(&mut core);

        let token = match effects.as_slice() {
            [Effect::ScheduleAdvance { token, delay }] => {
                assert_eq!(*delay, Duration::from_millis(1000));
                *token
            }
            other => panic!("unexpected effects {:?}", other),
        };
        assert!(core.state().is_error());
        assert_eq!(core.consecutive_failures(), 0);

        let effects = core.handle(SessionInput::AdvanceDue { token });
        assert_eq!(
            resolve_target(&effects).map(|(_, id)| id),
            Some("track000001".to_string())
        );
    }

    #[test]
    fn manual_skip_cancels_pending_advance() {
        let mut core = core_with(3);
        start_playing(&mut core);
        engine_error(&mut core);
        engine_error(&mut core);
        let token = match engine_error(&mut core).as_slice() {
            [Effect::ScheduleAdvance { token, .. }] => *token,
            other => panic!("unexpected effects {:?}", other),
        };

        let effects = core.handle(command(SessionCommand::Next));
        assert_eq!(effects.first(), Some(&Effect::CancelAdvance));
        assert_eq!(core.current_track().unwrap().id, "track000001");

        assert!(core.handle(SessionInput::AdvanceDue { token }).is_empty());
        assert_eq!(core.current_track().unwrap().id, "track000001");
    }

    #[test]
    fn buffering_keeps_failure_count() {
        let mut core = core_with(2);
        start_playing(&mut core);
        engine_error(&mut core);

        core.handle(SessionInput::Engine(EngineEvent::Buffering));
        assert_eq!(core.state(), &SessionState::Loading);
        assert_eq!(core.consecutive_failures(), 1);
    }

    #[test]
    fn start_failure_counts_as_playback_error() {
        let mut core = core_with(2);
        let generation = core.load_generation();
        core.handle(SessionInput::Resolved {
            generation,
            result: Ok(descriptor("track000000")),
        });

        core.handle(SessionInput::StartFailed {
            generation,
            reason: "no output device".to_string(),
        });
        assert_eq!(core.consecutive_failures(), 1);
        assert!(core.descriptor().is_none());

        // Without a descriptor, retry goes back through resolution.
        let effects = core.handle(command(SessionCommand::Retry));
        assert!(resolve_target(&effects).is_some());
    }

    #[test]
    fn engine_events_ignored_while_resolving() {
        let mut core = core_with(2);
        assert!(core
            .handle(SessionInput::Engine(EngineEvent::Ended))
            .is_empty());
        assert_eq!(core.current_track().unwrap().id, "track000000");
        assert_eq!(core.state(), &SessionState::Loading);
    }

    #[test]
    fn ended_on_last_track_goes_idle() {
        let mut core = core_with(1);
        start_playing(&mut core);

        let effects = core.handle(SessionInput::Engine(EngineEvent::Ended));
        assert!(effects.contains(&Effect::StopEngine));
        assert_eq!(core.state(), &SessionState::Idle);
        assert!(core.current_track().is_none());
    }

    #[test]
    fn ended_advances_to_next_track() {
        let mut core = core_with(3);
        start_playing(&mut core);

        let effects = core.handle(SessionInput::Engine(EngineEvent::Ended));
        assert_eq!(
            resolve_target(&effects).map(|(_, id)| id),
            Some("track000001".to_string())
        );
    }

    #[test]
    fn previous_restarts_past_threshold() {
        let mut core = core_with(3);
        start_playing(&mut core);

        let late = EnginePosition {
            position: 5.0,
            duration: 200.0,
        };
        let effects = core.handle(SessionInput::Command(SessionCommand::Previous, late));
        assert_eq!(effects, vec![Effect::SeekEngine(0.0)]);
        assert_eq!(core.current_track().unwrap().id, "track000000");

        let early = EnginePosition {
            position: 1.0,
            duration: 200.0,
        };
        let effects = core.handle(SessionInput::Command(SessionCommand::Previous, early));
        assert_eq!(
            resolve_target(&effects).map(|(_, id)| id),
            Some("track000002".to_string())
        );
    }

    #[test]
    fn seek_relative_is_clamped() {
        let mut core = core_with(1);
        start_playing(&mut core);
        let at = EnginePosition {
            position: 195.0,
            duration: 200.0,
        };

        let effects = core.handle(SessionInput::Command(SessionCommand::SeekRelative(10.0), at));
        assert_eq!(effects, vec![Effect::SeekEngine(200.0)]);

        let at = EnginePosition {
            position: 4.0,
            duration: 200.0,
        };
        let effects = core.handle(SessionInput::Command(SessionCommand::SeekRelative(-10.0), at));
        assert_eq!(effects, vec![Effect::SeekEngine(0.0)]);
    }

    #[test]
    fn stop_discards_in_flight_resolution() {
        let mut core = core_with(2);
        let generation = core.load_generation();
        core.handle(command(SessionCommand::Stop));

        let effects = core.handle(SessionInput::Resolved {
            generation,
            result: Ok(descriptor("track000000")),
        });
        assert!(effects.is_empty());
        assert_eq!(core.state(), &SessionState::Idle);
    }

    #[test]
    fn removing_current_track_loads_its_replacement() {
        let mut core = core_with(3);
        start_playing(&mut core);

        let effects = core.handle(command(SessionCommand::RemoveFromQueue(0)));
        assert_eq!(
            resolve_target(&effects).map(|(_, id)| id),
            Some("track000001".to_string())
        );
        assert_eq!(core.queue().len(), 2);
    }

    #[test]
    fn mute_toggles_effective_volume() {
        let mut core = core_with(1);
        core.handle(command(SessionCommand::SetVolume(0.4)));

        let effects = core.handle(command(SessionCommand::ToggleMute));
        assert_eq!(effects, vec![Effect::SetVolume(0.0)]);
        let effects = core.handle(command(SessionCommand::ToggleMute));
        assert_eq!(effects, vec![Effect::SetVolume(0.4)]);
    }

    #[test]
    fn pause_without_stream_does_nothing() {
        let mut core = core_with(1);
        assert!(core.handle(command(SessionCommand::Pause)).is_empty());
        assert_eq!(core.state(), &SessionState::Loading);
    }
}
