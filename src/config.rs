use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_API_BASE: &str = "http://localhost:8080";
pub const API_BASE_ENV: &str = "THERMAL_API_URL";

/// Tunables for the capture and presentation controllers.
///
/// Defaults reproduce the timing the operators are used to: the progress bar
/// stays up for at least 2.2s and the success state is held for 0.9s before
/// leaving the page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub api_base: String,
    pub min_visible_duration_ms: u64,
    pub simulated_tick_ms: u64,
    pub simulated_target: u8,
    pub simulated_damping: f64,
    pub real_signal_cap: u8,
    pub ramp_target: u8,
    pub ramp_tick_ms: u64,
    pub finish_grace_ms: u64,
    pub success_hold_ms: u64,
    pub fallback_uploader: String,
    pub request_timeout_ms: u64,
    pub max_upload_bytes: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            min_visible_duration_ms: 2_200,
            simulated_tick_ms: 180,
            simulated_target: 95,
            simulated_damping: 0.06,
            real_signal_cap: 98,
            ramp_target: 99,
            ramp_tick_ms: 90,
            finish_grace_ms: 80,
            success_hold_ms: 900,
            fallback_uploader: "admin".to_string(),
            request_timeout_ms: 120_000,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl ControllerConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `THERMAL_API_URL` when it is set and non-blank.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(base) = std::env::var(API_BASE_ENV) {
            if !base.trim().is_empty() {
                self.api_base = base.trim().to_string();
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = Url::parse(&self.api_base).map_err(|e| ConfigError::InvalidValue {
            field: "api_base",
            reason: e.to_string(),
        })?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(invalid("api_base", "scheme must be http or https"));
        }
        if self.simulated_tick_ms == 0 {
            return Err(invalid("simulated_tick_ms", "must be > 0"));
        }
        if self.ramp_tick_ms == 0 {
            return Err(invalid("ramp_tick_ms", "must be > 0"));
        }
        if !(self.simulated_damping > 0.0 && self.simulated_damping <= 1.0) {
            return Err(invalid("simulated_damping", "must be in (0, 1]"));
        }
        if self.simulated_target == 0 || self.simulated_target > self.real_signal_cap {
            return Err(invalid(
                "simulated_target",
                "must be > 0 and not above real_signal_cap",
            ));
        }
        if self.real_signal_cap > self.ramp_target || self.ramp_target >= 100 {
            return Err(invalid(
                "ramp_target",
                "must be at least real_signal_cap and below 100",
            ));
        }
        if self.fallback_uploader.trim().is_empty() {
            return Err(invalid("fallback_uploader", "must not be blank"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be > 0"));
        }
        if self.max_upload_bytes == 0 {
            return Err(invalid("max_upload_bytes", "must be > 0"));
        }
        Ok(())
    }

    pub fn min_visible_duration(&self) -> Duration {
        Duration::from_millis(self.min_visible_duration_ms)
    }

    pub fn simulated_tick(&self) -> Duration {
        Duration::from_millis(self.simulated_tick_ms)
    }

    pub fn ramp_tick(&self) -> Duration {
        Duration::from_millis(self.ramp_tick_ms)
    }

    pub fn finish_grace(&self) -> Duration {
        Duration::from_millis(self.finish_grace_ms)
    }

    pub fn success_hold(&self) -> Duration {
        Duration::from_millis(self.success_hold_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_visible_duration(), Duration::from_millis(2_200));
        assert_eq!(config.success_hold(), Duration::from_millis(900));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config =
            ControllerConfig::from_json_str(r#"{"min_visible_duration_ms": 1000}"#).unwrap();
        assert_eq!(config.min_visible_duration_ms, 1_000);
        assert_eq!(config.simulated_tick_ms, 180);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn rejects_zero_ticks() {
        let config = ControllerConfig {
            ramp_tick_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "ramp_tick_ms", .. })
        ));
    }

    #[test]
    fn rejects_out_of_order_targets() {
        let config = ControllerConfig {
            simulated_target: 99,
            real_signal_cap: 98,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ControllerConfig {
            ramp_target: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_damping_and_base() {
        let config = ControllerConfig {
            simulated_damping: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ControllerConfig {
            api_base: "ftp://files.example.com".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            ControllerConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
