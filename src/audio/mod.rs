pub mod cache;
pub mod engine;
#[cfg(feature = "native-audio")]
pub mod native;
pub mod queue;
pub mod session;
