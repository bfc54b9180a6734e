use anyhow::{anyhow, Result};

use super::backend::Detector;

type DetectorFactory = Box<dyn FnOnce() -> Result<Box<dyn Detector>> + Send>;

/// A detector that is only built the first time it is needed.
///
/// Loading happens at most once. A failed load consumes the factory, so later
/// calls keep failing instead of retrying an expensive model load per frame.
pub struct LazyDetector {
    label: &'static str,
    factory: Option<DetectorFactory>,
    loaded: Option<Box<dyn Detector>>,
}

impl LazyDetector {
    pub fn new<F>(label: &'static str, factory: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn Detector>> + Send + 'static,
    {
        Self {
            label,
            factory: Some(Box::new(factory)),
            loaded: None,
        }
    }

    /// Wraps an already constructed detector.
    pub fn ready(detector: Box<dyn Detector>) -> Self {
        let label = detector.name();
        Self {
            label,
            factory: None,
            loaded: Some(detector),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Loads the detector if needed and returns it.
    pub fn get(&mut self) -> Result<&mut dyn Detector> {
        if self.loaded.is_none() {
            let factory = self
                .factory
                .take()
                .ok_or_else(|| anyhow!("{} detector failed to load earlier", self.label))?;
            log::info!("loading {} detector", self.label);
            let mut detector = factory()?;
            detector.warm_up()?;
            self.loaded = Some(detector);
        }
        match self.loaded.as_deref_mut() {
            Some(detector) => Ok(detector),
            None => Err(anyhow!("{} detector unavailable", self.label)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ScriptedDetector;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn factory_runs_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let mut lazy = LazyDetector::new("defect", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedDetector::empty()) as Box<dyn Detector>)
        });
        assert!(!lazy.is_loaded());
        lazy.get().expect("first load");
        lazy.get().expect("cached");
        assert!(lazy.is_loaded());
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_load_is_not_retried() {
        let mut lazy = LazyDetector::new("defect", || Err(anyhow!("weights missing")));
        let first = lazy.get().err().expect("first load fails");
        assert!(first.to_string().contains("weights missing"));
        let second = lazy.get().err().expect("second load fails");
        assert!(second.to_string().contains("failed to load earlier"));
    }
}
