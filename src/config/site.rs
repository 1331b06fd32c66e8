//! Site configuration (_config.yml)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main site configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    // Site
    pub title: String,
    pub description: String,
    pub url: String,

    // Directory
    pub content_dir: String,
    pub blog_dir: String,
    pub pages_dir: String,
    pub static_dir: String,

    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub highlight: HighlightConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "Folio".to_string(),
            description: String::new(),
            url: "http://localhost:4000".to_string(),

            content_dir: "content".to_string(),
            blog_dir: "blog".to_string(),
            pages_dir: "pages".to_string(),
            static_dir: "static".to_string(),

            watch: WatchConfig::default(),
            highlight: HighlightConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl SiteConfig {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: SiteConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}

/// File watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enable: bool,
    /// Quiet period before a burst of events is acted on
    pub debounce_ms: u64,
    /// Capacity of the raw event channel
    pub queue_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enable: true,
            debounce_ms: 500,
            queue_capacity: 256,
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Code highlighting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    pub theme: String,
    pub line_number: bool,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            theme: "base16-ocean.dark".to_string(),
            line_number: false,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub ip: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: "localhost".to_string(),
            port: 4000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SiteConfig::default();
        assert_eq!(config.title, "Folio");
        assert_eq!(config.content_dir, "content");
        assert_eq!(config.blog_dir, "blog");
        assert_eq!(config.pages_dir, "pages");
        assert_eq!(config.watch.debounce(), Duration::from_millis(500));
        assert!(config.watch.enable);
    }

    #[test]
    fn test_parse_config() {
        let yaml = r#"
title: My Site
content_dir: site
watch:
  debounce_ms: 250
server:
  port: 8080
"#;
        let config: SiteConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.title, "My Site");
        assert_eq!(config.content_dir, "site");
        assert_eq!(config.blog_dir, "blog");
        assert_eq!(config.watch.debounce_ms, 250);
        assert_eq!(config.watch.queue_capacity, 256);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.ip, "localhost");
    }
}
