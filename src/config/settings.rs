//! Process-level timing settings
//!
//! These do not travel with snapshots; they are fixed for the lifetime of the
//! process and come from the command line or environment.

use std::time::Duration;

use crate::{Error, Result};

/// Default interval between heartbeats to the parent
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default interval between registry sweeps
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Default age after which a silent child is evicted
pub const DEFAULT_MAX_LIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Default TCP connect timeout for outbound calls
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default total timeout for outbound calls
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Liveness and transport timings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Child role: time between liveness probes
    pub heartbeat_interval: Duration,
    /// Parent role: time between sweeps
    pub check_interval: Duration,
    /// Parent role: eviction age
    pub max_live_interval: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            check_interval: DEFAULT_CHECK_INTERVAL,
            max_live_interval: DEFAULT_MAX_LIVE_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl MonitorSettings {
    /// Check that the timings are usable
    ///
    /// Sweeps must run at least twice per eviction window, and a heartbeat must
    /// fit inside one.
    ///
    /// # Errors
    ///
    /// Returns a config error describing the violation
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("heartbeat interval", self.heartbeat_interval),
            ("check interval", self.check_interval),
            ("max live interval", self.max_live_interval),
            ("connect timeout", self.connect_timeout),
            ("request timeout", self.request_timeout),
        ];
        if let Some((name, _)) = named.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::Config(format!("{name} must be positive")));
        }

        if self.check_interval > self.max_live_interval / 2 {
            return Err(Error::Config(format!(
                "check interval ({:?}) must be at most half the max live interval ({:?})",
                self.check_interval, self.max_live_interval
            )));
        }

        if self.heartbeat_interval >= self.max_live_interval {
            return Err(Error::Config(format!(
                "heartbeat interval ({:?}) must be shorter than the max live interval ({:?})",
                self.heartbeat_interval, self.max_live_interval
            )));
        }

        Ok(())
    }
}
