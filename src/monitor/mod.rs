pub mod aggregator;
pub mod alert;
pub mod controller;
pub mod state;

pub use aggregator::{AlertTrigger, ClassificationAggregator};
pub use alert::{AlertDispatcher, AlertKind, AlertSink, FanoutAlertSink, LogAlertSink};
pub use controller::{Collaborators, SessionController};
pub use state::{MonitorEvent, MonitorSnapshot, MonitorStatus, StopOutcome};
