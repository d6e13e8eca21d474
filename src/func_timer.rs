use log::debug;
use std::time::{Duration, Instant};

/// Logs how long a refresh pass (or any scope) took when it is dropped
pub struct FunctionTimer {
    name: &'static str,
    start: Instant,
}

impl FunctionTimer {
    pub fn new(name: &'static str) -> Self {
        FunctionTimer {
            name,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for FunctionTimer {
    fn drop(&mut self) {
        debug!("{} took {:?}", self.name, self.start.elapsed());
    }
}
