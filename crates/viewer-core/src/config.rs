//! Engine configuration
//!
//! Tuning values for windowing, preloading, navigation and scroll guarding.
//! Configuration can be loaded from a TOML file, overridden from environment
//! variables, or built programmatically.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

/// Configuration for the viewer engine.
///
/// Every field has a default, so a config file only needs the keys it wants
/// to change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of pages mounted at once
    pub max_mounted_pages: usize,
    /// Pages mounted on each side of the center page
    pub buffer_pages: u32,
    /// Coalescing interval for center requests, in milliseconds
    pub debounce_ms: u64,
    /// Lookahead distance outside the visible area that counts as visible
    pub root_margin_px: f32,

    /// Pages measured eagerly before yielding to the host
    pub eager_pages: u32,
    /// Concurrent preload workers
    pub preload_concurrency: usize,
    /// Hard cap on the number of pages the preloader measures
    pub preload_cap: u32,
    /// Bounded wait for a running preload to stop during a document switch
    pub preload_stop_timeout_ms: u64,

    /// Navigation attempts before giving up
    pub nav_max_retries: u32,
    /// Delay before the first navigation retry
    pub nav_base_delay_ms: u64,
    /// Delay added for every further retry
    pub nav_delay_step_ms: u64,
    /// Fraction of the container height the anchor sits below the top edge
    pub nav_offset_factor: f32,
    /// Rendered heights below this are not trusted for navigation
    pub min_rendered_height_px: f32,

    /// Lifetime of the boundary notice
    pub notice_ttl_ms: u64,

    /// Vertical gap between page placeholders
    pub page_gap_px: f32,
    /// Horizontal space reserved around pages when fitting to width
    pub horizontal_padding_px: f32,
    /// Lower bound of the effective scale
    pub min_scale: f32,
    /// Upper bound of the effective scale
    pub max_scale: f32,
    /// Placeholder height used before the first page has been measured
    pub fallback_page_height_px: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_mounted_pages: 8,
            buffer_pages: 2,
            debounce_ms: 300,
            root_margin_px: 200.0,
            eager_pages: 12,
            preload_concurrency: 2,
            preload_cap: 1500,
            preload_stop_timeout_ms: 500,
            nav_max_retries: 12,
            nav_base_delay_ms: 40,
            nav_delay_step_ms: 40,
            nav_offset_factor: 0.22,
            min_rendered_height_px: 24.0,
            notice_ttl_ms: 1500,
            page_gap_px: 16.0,
            horizontal_padding_px: 32.0,
            min_scale: 0.25,
            max_scale: 4.0,
            fallback_page_height_px: 1100.0,
        }
    }
}

impl EngineConfig {
    /// Sets the mounted-page cap.
    pub fn with_max_mounted_pages(mut self, pages: usize) -> Self {
        self.max_mounted_pages = pages;
        self
    }

    /// Sets the window half-width.
    pub fn with_buffer_pages(mut self, pages: u32) -> Self {
        self.buffer_pages = pages;
        self
    }

    /// Sets the debounce interval in milliseconds.
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Sets the preload worker count.
    pub fn with_preload_concurrency(mut self, workers: usize) -> Self {
        self.preload_concurrency = workers;
        self
    }

    /// Sets the navigation retry budget.
    pub fn with_nav_max_retries(mut self, retries: u32) -> Self {
        self.nav_max_retries = retries;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn preload_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.preload_stop_timeout_ms)
    }

    pub fn notice_ttl(&self) -> Duration {
        Duration::from_millis(self.notice_ttl_ms)
    }

    /// Checks values that would break the engine and clamps degenerate ones.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] for non-finite or negative
    /// geometry values.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        let finite = [
            ("root_margin_px", self.root_margin_px),
            ("nav_offset_factor", self.nav_offset_factor),
            ("min_rendered_height_px", self.min_rendered_height_px),
            ("page_gap_px", self.page_gap_px),
            ("horizontal_padding_px", self.horizontal_padding_px),
            ("min_scale", self.min_scale),
            ("max_scale", self.max_scale),
            ("fallback_page_height_px", self.fallback_page_height_px),
        ];
        for (key, value) in finite {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidValue(key.to_string()));
            }
        }
        if self.min_scale == 0.0 {
            return Err(ConfigError::InvalidValue("min_scale".to_string()));
        }
        if self.fallback_page_height_px == 0.0 {
            return Err(ConfigError::InvalidValue("fallback_page_height_px".to_string()));
        }

        self.max_mounted_pages = self.max_mounted_pages.max(1);
        self.preload_concurrency = self.preload_concurrency.max(1);
        self.nav_offset_factor = self.nav_offset_factor.min(1.0);
        if self.max_scale < self.min_scale {
            std::mem::swap(&mut self.min_scale, &mut self.max_scale);
        }
        Ok(self)
    }

    /// Loads configuration from environment variables on top of the defaults.
    ///
    /// Environment variables:
    /// - `PAGEFLOW_MAX_MOUNTED_PAGES`: mounted-page cap (default: 8)
    /// - `PAGEFLOW_BUFFER_PAGES`: window half-width (default: 2)
    /// - `PAGEFLOW_DEBOUNCE_MS`: center debounce (default: 300)
    /// - `PAGEFLOW_PRELOAD_CONCURRENCY`: preload workers (default: 2)
    /// - `PAGEFLOW_NAV_MAX_RETRIES`: navigation attempts (default: 12)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Applies `PAGEFLOW_*` environment overrides to this configuration.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_value("PAGEFLOW_MAX_MOUNTED_PAGES")? {
            self.max_mounted_pages = value;
        }
        if let Some(value) = env_value("PAGEFLOW_BUFFER_PAGES")? {
            self.buffer_pages = value;
        }
        if let Some(value) = env_value("PAGEFLOW_DEBOUNCE_MS")? {
            self.debounce_ms = value;
        }
        if let Some(value) = env_value("PAGEFLOW_PRELOAD_CONCURRENCY")? {
            self.preload_concurrency = value;
        }
        if let Some(value) = env_value("PAGEFLOW_NAV_MAX_RETRIES")? {
            self.nav_max_retries = value;
        }
        Ok(self)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format (any subset of keys):
    /// ```toml
    /// max_mounted_pages = 8
    /// buffer_pages = 2
    /// debounce_ms = 300
    /// nav_offset_factor = 0.22
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(path.as_ref(), toml)?;
        Ok(())
    }
}

fn env_value<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(None),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    /// Malformed configuration file
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Configuration could not be serialized
    #[error("serialize error: {0}")]
    Serialize(String),
    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ENV_KEYS: [&str; 5] = [
        "PAGEFLOW_MAX_MOUNTED_PAGES",
        "PAGEFLOW_BUFFER_PAGES",
        "PAGEFLOW_DEBOUNCE_MS",
        "PAGEFLOW_PRELOAD_CONCURRENCY",
        "PAGEFLOW_NAV_MAX_RETRIES",
    ];

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_mounted_pages, 8);
        assert_eq!(config.buffer_pages, 2);
        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!(config.eager_pages, 12);
        assert_eq!(config.preload_concurrency, 2);
        assert_eq!(config.preload_cap, 1500);
        assert_eq!(config.notice_ttl(), Duration::from_millis(1500));
    }

    #[test]
    fn test_builder_methods() {
        let config = EngineConfig::default()
            .with_max_mounted_pages(12)
            .with_buffer_pages(3)
            .with_debounce_ms(50)
            .with_preload_concurrency(4)
            .with_nav_max_retries(3);

        assert_eq!(config.max_mounted_pages, 12);
        assert_eq!(config.buffer_pages, 3);
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.preload_concurrency, 4);
        assert_eq!(config.nav_max_retries, 3);
    }

    #[test]
    fn test_validate_clamps_degenerate_values() {
        let mut config = EngineConfig::default()
            .with_max_mounted_pages(0)
            .with_preload_concurrency(0);
        config.min_scale = 3.0;
        config.max_scale = 0.5;

        let config = config.validate().unwrap();
        assert_eq!(config.max_mounted_pages, 1);
        assert_eq!(config.preload_concurrency, 1);
        assert_eq!(config.min_scale, 0.5);
        assert_eq!(config.max_scale, 3.0);
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let config = EngineConfig {
            nav_offset_factor: f32::NAN,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(key)) if key == "nav_offset_factor"
        ));
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
            # Only the cap and the offset factor
            max_mounted_pages = 6
            nav_offset_factor = 0.3
        "#;

        let config = EngineConfig::from_toml(toml).unwrap();
        assert_eq!(config.max_mounted_pages, 6);
        assert_eq!(config.nav_offset_factor, 0.3);
        assert_eq!(config.buffer_pages, 2); // default
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(matches!(
            EngineConfig::from_toml("max_mounted_pages = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pageflow.toml");

        let config = EngineConfig::default()
            .with_max_mounted_pages(10)
            .with_buffer_pages(4);
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = EngineConfig::from_file(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&ENV_KEYS);

        env::set_var("PAGEFLOW_MAX_MOUNTED_PAGES", "5");
        env::set_var("PAGEFLOW_BUFFER_PAGES", "1");
        env::set_var("PAGEFLOW_DEBOUNCE_MS", "120");
        env::remove_var("PAGEFLOW_PRELOAD_CONCURRENCY");
        env::remove_var("PAGEFLOW_NAV_MAX_RETRIES");

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.max_mounted_pages, 5);
        assert_eq!(config.buffer_pages, 1);
        assert_eq!(config.debounce_ms, 120);
        assert_eq!(config.preload_concurrency, 2); // default
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&ENV_KEYS);

        env::set_var("PAGEFLOW_DEBOUNCE_MS", "soon");
        assert!(matches!(
            EngineConfig::from_env(),
            Err(ConfigError::InvalidValue(key)) if key == "PAGEFLOW_DEBOUNCE_MS"
        ));
    }

    // Helper to save and restore environment variables
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
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
}
