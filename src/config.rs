//! Process configuration.
//!
//! Mirrors the teacher's `tools::configuration` module in spirit (load, validate,
//! expose typed values) but trades its generic `ConfigValue` bag for a small fixed
//! struct: this SDK's configuration surface is known ahead of time.

use std::time::Duration;

use crate::error::FlowError;

/// Environment variable carrying the Flow service's base URL. Mandatory.
pub const COMPLETER_BASE_URL_VAR: &str = "COMPLETER_BASE_URL";

/// Header prefix used for all Flow protocol headers, matching the source's
/// `FnProject-` prefix.
pub const HEADER_PREFIX: &str = "FnProject-";

/// Resolved, validated configuration for a single FaaS process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root URL of the Flow service (and, absent a split configuration, the blob
    /// store too — see SPEC_FULL.md section 10 on the blob store's base URL).
    pub base_url: String,
    /// Connect timeout for outbound HTTP calls.
    pub connect_timeout: Duration,
    /// Read timeout for outbound HTTP calls (except long-polling awaits, which are
    /// intentionally unbounded per SPEC_FULL.md section 5).
    pub read_timeout: Duration,
}

impl Config {
    /// Load configuration from the process environment. Fatal (returns
    /// `FlowError::Config`) if `COMPLETER_BASE_URL` is unset, matching the source's
    /// "absence is fatal" contract.
    pub fn from_env() -> Result<Self, FlowError> {
        let base_url = std::env::var(COMPLETER_BASE_URL_VAR).map_err(|_| {
            FlowError::Config(format!("missing {COMPLETER_BASE_URL_VAR} in environment"))
        })?;
        if base_url.trim().is_empty() {
            return Err(FlowError::Config(format!(
                "{COMPLETER_BASE_URL_VAR} is set but empty"
            )));
        }
        Ok(Self {
            base_url,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
        })
    }

    /// Build a configuration directly, bypassing the environment. Used by tests
    /// and by embedders that resolve the base URL themselves.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_var_is_a_config_error() {
        // SAFETY: single-threaded test, no concurrent env mutation in this process.
        unsafe {
            std::env::remove_var(COMPLETER_BASE_URL_VAR);
        }
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }

    #[test]
    fn empty_env_var_is_a_config_error() {
        unsafe {
            std::env::set_var(COMPLETER_BASE_URL_VAR, "");
        }
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
        unsafe {
            std::env::remove_var(COMPLETER_BASE_URL_VAR);
        }
    }

    #[test]
    fn present_env_var_loads() {
        unsafe {
            std::env::set_var(COMPLETER_BASE_URL_VAR, "http://localhost:8081");
        }
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.base_url, "http://localhost:8081");
        unsafe {
            std::env::remove_var(COMPLETER_BASE_URL_VAR);
        }
    }
}
