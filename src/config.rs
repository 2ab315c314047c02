//! Startup configuration.
//!
//! No configuration files are read and no state is persisted across
//! restarts (§1, §6 of the bus contract this crate implements) — the only
//! tunable inputs are environment variables, read once at process start.
//! Shaped like the teacher's settings module (`features::settings`) but
//! with no serialization or file I/O: there is nothing to load or save.

use std::env;

/// Default well-known service name suffix. The full name served on the bus
/// is `core.ubuntu.media.Service`; this suffix lets several instances run
/// side by side (used by the test harness) by appending `.<suffix>`.
const SERVICE_NAME_ENV: &str = "MEDIA_HUB_SERVICE_SUFFIX";

#[derive(Debug, Clone)]
pub struct Config {
    pub service_name_suffix: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            service_name_suffix: env::var(SERVICE_NAME_ENV).ok().filter(|s| !s.is_empty()),
        }
    }

    pub fn service_name(&self) -> String {
        match &self.service_name_suffix {
            Some(suffix) => format!("core.ubuntu.media.Service.{suffix}"),
            None => "core.ubuntu.media.Service".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            service_name_suffix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_service_name_matches_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.service_name(), "core.ubuntu.media.Service");
    }

    #[test]
    fn suffix_is_appended() {
        let cfg = Config {
            service_name_suffix: Some("test123".to_string()),
        };
        assert_eq!(cfg.service_name(), "core.ubuntu.media.Service.test123");
    }
}
