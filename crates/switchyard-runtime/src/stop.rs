use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Registry of cooperative stop requests, keyed by run id.
///
/// Stops are checked at step boundaries only; an in-flight engine call
/// always runs to completion before a stop takes effect.
#[derive(Debug, Default)]
pub struct StopRegistry {
    flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl StopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, run_id: &str) -> Arc<AtomicBool> {
        let mut flags = self.flags.lock().expect("stop registry poisoned");
        flags
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    /// Request a graceful stop. Effective at the next step boundary.
    pub fn request_stop(&self, run_id: &str) -> bool {
        self.flag(run_id).store(true, Ordering::SeqCst);
        log::info!("Stop requested for run {run_id}");
        true
    }

    pub fn clear_stop_request(&self, run_id: &str) {
        self.flag(run_id).store(false, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self, run_id: &str) -> bool {
        let flags = self.flags.lock().expect("stop registry poisoned");
        flags
            .get(run_id)
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Drop the registration for a finished run.
    pub fn release(&self, run_id: &str) {
        let mut flags = self.flags.lock().expect("stop registry poisoned");
        flags.remove(run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_request_lifecycle() {
        let registry = StopRegistry::new();
        assert!(!registry.is_stop_requested("run-1"));

        registry.request_stop("run-1");
        assert!(registry.is_stop_requested("run-1"));
        assert!(!registry.is_stop_requested("run-2"));

        registry.clear_stop_request("run-1");
        assert!(!registry.is_stop_requested("run-1"));

        registry.request_stop("run-1");
        registry.release("run-1");
        assert!(!registry.is_stop_requested("run-1"));
    }
}
