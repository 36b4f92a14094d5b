//! Attachment settings

use crate::devices::DEFAULT_CANDIDATES;
use std::time::Duration;

/// Interval between device-appearance checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct AttachConfig {
    pub poll_interval: Duration,
    /// `None` waits for the device forever
    pub device_timeout: Option<Duration>,
    pub candidates: Vec<String>,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            device_timeout: None,
            candidates: DEFAULT_CANDIDATES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl AttachConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_device_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.device_timeout = timeout;
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = candidates;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AttachConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert!(config.device_timeout.is_none());
        assert_eq!(config.candidates.first().map(String::as_str), Some("/dev/sdf"));
        assert_eq!(config.candidates.last().map(String::as_str), Some("/dev/sdl"));
    }
}
