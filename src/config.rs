use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::constants::DEFAULT_USER_AGENT;
use crate::domain::{Origin, SourceDefinition, TasteEntry, TasteKind};
use crate::error::{DiscoveryError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub taste: TasteConfig,
    #[serde(default)]
    pub curated_sources: Vec<SourceDefinition>,
    #[serde(default)]
    pub taste_overrides: Vec<TasteOverride>,
    #[serde(default)]
    pub venues: Vec<VenueConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub fetch_delay_ms: u64,
    pub fetch_timeout_seconds: u64,
    pub user_agent: String,
    pub database_path: PathBuf,
    pub max_follow_pages: usize,
    pub log_dir: PathBuf,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            fetch_delay_ms: 2000,
            fetch_timeout_seconds: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            database_path: PathBuf::from("data/discovery.db"),
            max_follow_pages: 5,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl DiscoveryConfig {
    pub fn fetch_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

/// Browserless-style rendering service for script-dependent pages.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub script_heavy_hosts: Vec<String>,
}

impl RendererConfig {
    pub fn is_script_heavy(&self, host: &str) -> bool {
        self.script_heavy_hosts
            .iter()
            .any(|h| host == h || host.ends_with(&format!(".{}", h)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TasteConfig {
    pub default_venue_boost: f64,
    pub default_artist_affinity: f64,
}

impl Default for TasteConfig {
    fn default() -> Self {
        Self {
            default_venue_boost: 5.0,
            default_artist_affinity: 0.6,
        }
    }
}

/// A human-curated taste weight; always lands in the store with `manual = true`.
#[derive(Debug, Clone, Deserialize)]
pub struct TasteOverride {
    pub kind: TasteKind,
    pub key: String,
    pub weight: f64,
}

impl From<&TasteOverride> for TasteEntry {
    fn from(o: &TasteOverride) -> Self {
        TasteEntry {
            kind: o.kind,
            key: o.key.clone(),
            weight: o.weight,
            manual: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Config {
    /// Load from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                DiscoveryError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
            })?;
            Self::from_toml(&content)?
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Config::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        // Anything listed in the config file is curated by definition
        for source in &mut config.curated_sources {
            source.origin = Origin::Curated;
        }
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        dotenv::dotenv().ok();

        if let Ok(path) = std::env::var("DISCOVERY_DB_PATH") {
            self.discovery.database_path = PathBuf::from(path);
        }
        if let Ok(delay) = std::env::var("DISCOVERY_FETCH_DELAY_MS") {
            self.discovery.fetch_delay_ms = delay.parse().map_err(|_| {
                DiscoveryError::Config(format!("DISCOVERY_FETCH_DELAY_MS is not a number: {}", delay))
            })?;
        }
        if let Ok(url) = std::env::var("BROWSERLESS_URL") {
            self.renderer.base_url = Some(url);
        }
        if let Ok(token) = std::env::var("BROWSERLESS_TOKEN") {
            self.renderer.token = Some(token);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.discovery.fetch_delay_ms, 2000);
        assert_eq!(config.discovery.max_follow_pages, 5);
        assert_eq!(config.taste.default_venue_boost, 5.0);
        assert_eq!(config.taste.default_artist_affinity, 0.6);
        assert!(config.renderer.base_url.is_none());
    }

    #[test]
    fn parses_sections() {
        let config = Config::from_toml(
            r#"
            [discovery]
            fetch_delay_ms = 500

            [renderer]
            base_url = "http://localhost:3000"
            script_heavy_hosts = ["dice.fm"]

            [[curated_sources]]
            name = "smalls"
            url = "https://www.smallslive.com/events"
            origin = "discovered"

            [[taste_overrides]]
            kind = "venue"
            key = "Village Vanguard"
            weight = 8.0

            [[venues]]
            id = "vanguard"
            name = "Village Vanguard"
            aliases = ["The Village Vanguard"]
            "#,
        )
        .unwrap();

        assert_eq!(config.discovery.fetch_delay_ms, 500);
        assert_eq!(config.discovery.fetch_timeout_seconds, 30);
        assert!(config.renderer.is_script_heavy("www.dice.fm"));
        assert!(!config.renderer.is_script_heavy("example.com"));
        assert_eq!(config.curated_sources[0].origin, Origin::Curated);
        let entry = TasteEntry::from(&config.taste_overrides[0]);
        assert!(entry.manual);
        assert_eq!(config.venues[0].aliases.len(), 1);
    }
}
