pub mod checkpoints;
pub mod labels;
pub mod records;
