mod backend;
pub mod backends;
mod lazy;
mod result;

pub use backend::{Classifier, DetectionCapability, Detector};
pub use backends::{ScriptedClassifier, ScriptedDetector};
pub use lazy::LazyDetector;
pub use result::{Classification, DetectionBox};
