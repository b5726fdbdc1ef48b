use crate::api::models::StreamDescriptor;
use crate::error::AppResult;
use tokio::sync::mpsc;

/// What a media engine reports back about the stream it is playing.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Audio is actually coming out.
    Playing,
    Paused,
    /// Waiting on data; transient.
    Buffering,
    Error(String),
    /// The stream reached its natural end.
    Ended,
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

pub fn engine_channel() -> (EngineEventSender, EngineEventReceiver) {
    mpsc::unbounded_channel()
}

/// A single playback engine. Starting a stream replaces whatever was
/// playing before. Progress and failures arrive as [`EngineEvent`]s on the
/// channel the engine was built with. `stop` is silent: it emits nothing.
pub trait MediaEngine: Send {
    fn start(&mut self, descriptor: &StreamDescriptor) -> AppResult<()>;
    fn pause(&mut self);
    fn resume(&mut self) -> AppResult<()>;
    fn seek(&mut self, position_seconds: f64);
    fn stop(&mut self);
    fn set_volume(&mut self, volume: f32);
    fn position_seconds(&self) -> f64;
    fn duration_seconds(&self) -> f64;
}
