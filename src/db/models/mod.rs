pub mod label;

pub use label::Label;
pub use crate::models::{ActiveCheckpoint, RecordUpdate, SessionRecord};
