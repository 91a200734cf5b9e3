//! Engine configuration
//!
//! Configuration can be built programmatically, loaded from a JSON file, or
//! overridden from environment variables:
//!
//! | variable | field |
//! |---|---|
//! | `ZONEFIT_HIGHLIGHT_MODE` | `highlight_mode` (`redaction` or `highlight_text`) |
//! | `ZONEFIT_OCR_TRADEOFF` | `ocr.tradeoff` (`fast`, `balanced` or `accurate`) |
//! | `ZONEFIT_OCR_MAX_ATTEMPTS` | `ocr.max_attempts` |
//! | `ZONEFIT_AUTOFIT_PADDING` | `auto_fit.padding` |
//! | `ZONEFIT_RETIRE_TIMEOUT_MS` | `worker.retire_timeout_ms` |

use crate::auto_fit::AutoFitConfig;
use crate::error::ConfigError;
use crate::highlight::HighlightMode;
use crate::host::OcrTradeoff;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use zonefit_cache::OcrCacheConfig;
use zonefit_scheduler::WorkerConfig;

/// OCR settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Speed/accuracy tradeoff passed to the engine
    pub tradeoff: OcrTradeoff,

    /// Recognitions per request for a page that keeps coming back empty
    pub max_attempts: u32,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            tradeoff: OcrTradeoff::default(),
            max_attempts: 3,
        }
    }
}

impl OcrSettings {
    /// Cache configuration for these settings
    pub fn cache_config(&self) -> OcrCacheConfig {
        OcrCacheConfig::new().with_max_attempts(self.max_attempts)
    }
}

/// Worker and UI bridge timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// How long a new unit waits for stale UI closures to retire
    pub retire_timeout_ms: u64,

    /// Poll interval while waiting for stale UI closures
    pub retire_poll_ms: u64,

    /// How often a blocked UI call re-checks cancellation
    pub bridge_poll_ms: u64,

    /// Worker thread name
    pub thread_name: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            retire_timeout_ms: 1000,
            retire_poll_ms: 10,
            bridge_poll_ms: 5,
            thread_name: "zonefit-worker".to_string(),
        }
    }
}

impl WorkerSettings {
    /// Worker configuration for these settings
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::new()
            .with_retire_timeout(Duration::from_millis(self.retire_timeout_ms))
            .with_retire_poll(Duration::from_millis(self.retire_poll_ms.max(1)))
            .with_thread_name(self.thread_name.clone())
    }

    /// Bridge poll interval
    pub fn bridge_poll(&self) -> Duration {
        Duration::from_millis(self.bridge_poll_ms.max(1))
    }
}

/// Configuration for the highlight engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub highlight_mode: HighlightMode,
    pub ocr: OcrSettings,
    pub auto_fit: AutoFitConfig,
    pub worker: WorkerSettings,
}

impl EngineConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the highlight mode
    pub fn with_highlight_mode(mut self, mode: HighlightMode) -> Self {
        self.highlight_mode = mode;
        self
    }

    /// Set the OCR tradeoff
    pub fn with_ocr_tradeoff(mut self, tradeoff: OcrTradeoff) -> Self {
        self.ocr.tradeoff = tradeoff;
        self
    }

    /// Set the retry bound for empty OCR results
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.ocr.max_attempts = attempts.max(1);
        self
    }

    /// Replace the auto-fit settings
    pub fn with_auto_fit(mut self, auto_fit: AutoFitConfig) -> Self {
        self.auto_fit = auto_fit;
        self
    }

    /// Set the stale-closure retire timeout
    pub fn with_retire_timeout(mut self, timeout: Duration) -> Self {
        self.worker.retire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Loads configuration from environment variables on top of defaults.
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Apply environment variable overrides to this configuration
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(mode) = env_value::<HighlightMode>("ZONEFIT_HIGHLIGHT_MODE")? {
            self.highlight_mode = mode;
        }
        if let Some(tradeoff) = env_value::<OcrTradeoff>("ZONEFIT_OCR_TRADEOFF")? {
            self.ocr.tradeoff = tradeoff;
        }
        if let Some(attempts) = env_value::<u32>("ZONEFIT_OCR_MAX_ATTEMPTS")? {
            if attempts == 0 {
                return Err(ConfigError::InvalidValue("ZONEFIT_OCR_MAX_ATTEMPTS".to_string()));
            }
            self.ocr.max_attempts = attempts;
        }
        if let Some(padding) = env_value::<i32>("ZONEFIT_AUTOFIT_PADDING")? {
            self.auto_fit.padding = padding;
        }
        if let Some(timeout) = env_value::<u64>("ZONEFIT_RETIRE_TIMEOUT_MS")? {
            self.worker.retire_timeout_ms = timeout;
        }
        Ok(self)
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_json(&contents)
    }

    /// Saves configuration to a JSON file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }
}

/// Parse `key` if it is set
fn env_value<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ENV_KEYS: [&str; 5] = [
        "ZONEFIT_HIGHLIGHT_MODE",
        "ZONEFIT_OCR_TRADEOFF",
        "ZONEFIT_OCR_MAX_ATTEMPTS",
        "ZONEFIT_AUTOFIT_PADDING",
        "ZONEFIT_RETIRE_TIMEOUT_MS",
    ];

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in var_names {
                env::remove_var(name);
            }
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.highlight_mode, HighlightMode::Redaction);
        assert_eq!(config.ocr.max_attempts, 3);
        assert_eq!(config.auto_fit.padding, 2);
        assert_eq!(config.worker.retire_timeout_ms, 1000);
        assert_eq!(
            config.worker.worker_config().retire_timeout,
            Duration::from_secs(1)
        );
        assert_eq!(config.ocr.cache_config().max_attempts, 3);
    }

    #[test]
    fn test_builder_methods() {
        let config = EngineConfig::new()
            .with_highlight_mode(HighlightMode::HighlightText)
            .with_ocr_tradeoff(OcrTradeoff::Accurate)
            .with_max_attempts(0)
            .with_auto_fit(AutoFitConfig::default().with_padding(5))
            .with_retire_timeout(Duration::from_millis(250));

        assert_eq!(config.highlight_mode, HighlightMode::HighlightText);
        assert_eq!(config.ocr.tradeoff, OcrTradeoff::Accurate);
        assert_eq!(config.ocr.max_attempts, 1);
        assert_eq!(config.auto_fit.padding, 5);
        assert_eq!(config.worker.retire_timeout_ms, 250);
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(
            r#"{ "highlight_mode": "highlight_text", "ocr": { "tradeoff": "fast" } }"#,
        )
        .unwrap();
        assert_eq!(config.highlight_mode, HighlightMode::HighlightText);
        assert_eq!(config.ocr.tradeoff, OcrTradeoff::Fast);
        assert_eq!(config.ocr.max_attempts, 3);
        assert_eq!(config.auto_fit, AutoFitConfig::default());
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(matches!(
            EngineConfig::from_json(r#"{ "highlight_mode": "paint" }"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zonefit.json");
        let config = EngineConfig::new()
            .with_ocr_tradeoff(OcrTradeoff::Accurate)
            .with_auto_fit(AutoFitConfig::default().with_padding(3));

        config.save_to_file(&path).unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = EngineConfig::from_file(dir.path().join("missing.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&ENV_KEYS);

        env::set_var("ZONEFIT_HIGHLIGHT_MODE", "highlight_text");
        env::set_var("ZONEFIT_OCR_TRADEOFF", "accurate");
        env::set_var("ZONEFIT_OCR_MAX_ATTEMPTS", "5");
        env::set_var("ZONEFIT_AUTOFIT_PADDING", "4");
        env::set_var("ZONEFIT_RETIRE_TIMEOUT_MS", "300");

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.highlight_mode, HighlightMode::HighlightText);
        assert_eq!(config.ocr.tradeoff, OcrTradeoff::Accurate);
        assert_eq!(config.ocr.max_attempts, 5);
        assert_eq!(config.auto_fit.padding, 4);
        assert_eq!(config.worker.retire_timeout_ms, 300);
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(&ENV_KEYS);

        env::set_var("ZONEFIT_AUTOFIT_PADDING", "0");

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.auto_fit.padding, 0);
        assert_eq!(config.ocr.max_attempts, 3);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&ENV_KEYS);

        env::set_var("ZONEFIT_OCR_MAX_ATTEMPTS", "0");
        assert!(matches!(
            EngineConfig::from_env(),
            Err(ConfigError::InvalidValue(key)) if key == "ZONEFIT_OCR_MAX_ATTEMPTS"
        ));

        env::set_var("ZONEFIT_OCR_MAX_ATTEMPTS", "three");
        assert!(EngineConfig::from_env().is_err());

        env::remove_var("ZONEFIT_OCR_MAX_ATTEMPTS");
        env::set_var("ZONEFIT_HIGHLIGHT_MODE", "paint");
        assert!(EngineConfig::from_env().is_err());
    }
}
