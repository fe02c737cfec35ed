//! Harness configuration
//!
//! Every timing magnitude is a parameter: rollout speed depends on the
//! environment, so nothing here is a hard-coded constant. Defaults mirror
//! a three-replica cluster restarting one member at a time.

use crate::error::ConfigError;
use crate::types::Mode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Harness configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Per-attempt probe timeout in milliseconds
    pub probe_timeout_ms: u64,
    /// Spacing between background probes in milliseconds
    pub background_interval_ms: u64,
    /// Spacing between convergence observations in milliseconds
    pub poll_interval_ms: u64,
    /// Budget for a rollout to report ready, in seconds
    pub readiness_timeout_secs: u64,
    /// Spacing between readiness observations in milliseconds
    pub readiness_poll_interval_ms: u64,
    /// Budget for reaching `optional`, in seconds
    pub optional_convergence_timeout_secs: u64,
    /// Budget for reaching `required`, in seconds
    pub required_convergence_timeout_secs: u64,
    /// Replicas expected to participate in internal authentication
    pub replicas: usize,
    /// Keep running later phases after a phase fails
    pub continue_after_failure: bool,
}

impl HarnessConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text and validate
    ///
    /// # Errors
    /// Parse or validation failure
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate
    ///
    /// # Errors
    /// I/O, parse or validation failure
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Serialization failure
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject zero intervals and budgets shorter than their poll interval
    ///
    /// # Errors
    /// `ConfigError::InvalidValue` naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("background_interval_ms", self.background_interval_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("readiness_poll_interval_ms", self.readiness_poll_interval_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }

        let budgets = [
            ("readiness_timeout_secs", self.readiness_timeout(), self.readiness_poll_interval()),
            (
                "optional_convergence_timeout_secs",
                self.convergence_timeout(Mode::Optional),
                self.poll_interval(),
            ),
            (
                "required_convergence_timeout_secs",
                self.convergence_timeout(Mode::Required),
                self.poll_interval(),
            ),
        ];
        for (field, budget, interval) in budgets {
            if budget < interval {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!(
                        "{}ms is shorter than its poll interval of {}ms",
                        budget.as_millis(),
                        interval.as_millis()
                    ),
                });
            }
        }

        if self.replicas == 0 {
            return Err(ConfigError::InvalidValue {
                field: "replicas",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Per-attempt probe timeout
    #[inline]
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Background probe spacing
    #[inline]
    #[must_use]
    pub fn background_interval(&self) -> Duration {
        Duration::from_millis(self.background_interval_ms)
    }

    /// Convergence observation spacing
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Readiness budget
    #[inline]
    #[must_use]
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    /// Readiness observation spacing
    #[inline]
    #[must_use]
    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_interval_ms)
    }

    /// Convergence budget towards `target`
    #[must_use]
    pub fn convergence_timeout(&self, target: Mode) -> Duration {
        match target {
            Mode::Required => Duration::from_secs(self.required_convergence_timeout_secs),
            Mode::None | Mode::Optional => {
                Duration::from_secs(self.optional_convergence_timeout_secs)
            }
        }
    }

    /// With background probe spacing
    #[inline]
    #[must_use]
    pub fn with_background_interval(mut self, interval: Duration) -> Self {
        self.background_interval_ms = duration_ms(interval);
        self
    }

    /// With convergence and readiness observation spacing
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(interval);
        self.readiness_poll_interval_ms = duration_ms(interval);
        self
    }

    /// With per-attempt probe timeout
    #[inline]
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout_ms = duration_ms(timeout);
        self
    }

    /// With expected replica count
    #[inline]
    #[must_use]
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    /// With failure policy
    #[inline]
    #[must_use]
    pub fn with_continue_after_failure(mut self, enabled: bool) -> Self {
        self.continue_after_failure = enabled;
        self
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5_000,
            background_interval_ms: 10_000,
            poll_interval_ms: 1_000,
            readiness_timeout_secs: 300,
            readiness_poll_interval_ms: 1_000,
            optional_convergence_timeout_secs: 60,
            required_convergence_timeout_secs: 120,
            replicas: 3,
            continue_after_failure: false,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
