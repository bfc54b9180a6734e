pub mod scripted;

pub use scripted::{ScriptStep, ScriptedClassifier, ScriptedDetector};
