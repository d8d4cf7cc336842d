pub mod outcome;
pub mod record;
pub mod session;

pub use outcome::{Judgment, Outcome, TaggedOutcome};
pub use record::{ActiveCheckpoint, RecordStatus, RecordUpdate, SessionRecord};
pub use session::{efficiency_percent, ticks_to_minutes, Session, SessionCounters};
