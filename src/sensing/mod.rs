pub mod classifier;
pub mod controller;
pub mod loop_worker;
pub mod source;

pub use classifier::{ClassificationError, Classifier, CommandClassifier};
pub use controller::SamplingScheduler;
pub use loop_worker::CycleRunner;
pub use source::{CaptureError, CommandImageSource, FileImageSource, Frame, ImageSource};
