//! Study-session monitoring engine: samples a pen-holding signal on a fixed
//! wall-clock cadence, folds the verdicts into session efficiency, alerts on
//! sustained attention lapses and persists a record when the session stops.

#[cfg(feature = "chime")]
pub mod audio;
pub mod db;
pub mod error;
pub mod models;
pub mod monitor;
pub mod sensing;
pub mod settings;
mod utils;

#[cfg(test)]
mod testing;

pub use db::{Database, Label, SessionStore};
pub use error::{EngineError, EngineResult};
pub use models::{
    ActiveCheckpoint, Judgment, Outcome, RecordStatus, RecordUpdate, Session, SessionCounters,
    SessionRecord,
};
pub use monitor::{
    AlertKind, AlertSink, Collaborators, FanoutAlertSink, LogAlertSink, MonitorEvent,
    MonitorSnapshot, MonitorStatus, SessionController, StopOutcome,
};
pub use sensing::{
    CaptureError, ClassificationError, Classifier, CommandClassifier, CommandImageSource,
    FileImageSource, Frame, ImageSource,
};
pub use settings::{EngineConfig, SettingsStore};

/// Initializes logging from `RUST_LOG`, defaulting to `info`.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
