use anyhow::{Context, anyhow};
use leasewatch_core::scan::{
    OrchestratorConfig, connectors::HttpFeedConfig,
};
use leasewatch_model::ScanSettings;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// Server configuration: a TOML or JSON file for orchestration and sources,
/// with environment overrides for the listener and database.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    /// Permissive CORS and verbose startup logging.
    pub dev_mode: bool,
    /// Coordinator tuning: concurrency cap, failure threshold, deadlines,
    /// throughput window and history retry backoff.
    pub orchestrator: OrchestratorConfig,
    pub history: HistoryConfig,
    pub sources: SourcesConfig,
    pub scheduler: SchedulerConfig,
    /// Settings the settings store starts with.
    pub settings: ScanSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cors: CorsConfig::default(),
            dev_mode: false,
            orchestrator: OrchestratorConfig::default(),
            history: HistoryConfig::default(),
            sources: SourcesConfig::default(),
            scheduler: SchedulerConfig::default(),
            settings: ScanSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub backend: HistoryBackend,
    /// Required for the postgres backend. `DATABASE_URL` overrides it.
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Scripted demo sources. Defaults to on when no feeds are configured.
    pub demo: Option<bool>,
    /// Delay between items emitted by demo sources.
    pub demo_pace_ms: u64,
    pub feeds: Vec<HttpFeedConfig>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            demo: None,
            demo_pace_ms: 250,
            feeds: Vec::new(),
        }
    }
}

impl SourcesConfig {
    pub fn demo_enabled(&self) -> bool {
        self.demo.unwrap_or(self.feeds.is_empty())
    }

    pub fn demo_pace(&self) -> Duration {
        Duration::from_millis(self.demo_pace_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Start scans automatically at the settings frequency.
    pub enabled: bool,
    /// Minimum pause between runs in continuous mode.
    pub continuous_gap_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            continuous_gap_ms: 60_000,
        }
    }
}

impl SchedulerConfig {
    pub fn continuous_gap(&self) -> Duration {
        Duration::from_millis(self.continuous_gap_ms)
    }
}

/// Where the configuration came from, for startup logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    InlineJson,
    Defaults,
}

impl Config {
    /// Load configuration. Evaluation order:
    /// 1) `explicit` path (the `--config` flag),
    /// 2) `$LEASEWATCH_CONFIG_PATH` (TOML or JSON file),
    /// 3) `$LEASEWATCH_CONFIG_JSON` (inline JSON),
    /// 4) `leasewatch.toml` / `config/leasewatch.toml` in the working dir,
    /// 5) defaults.
    ///
    /// Environment overrides are applied on top.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<(Self, ConfigSource)> {
        let (mut config, source) = Self::load_base(explicit)?;
        config.apply_env_overrides()?;
        Ok((config, source))
    }

    fn load_base(explicit: Option<&Path>) -> anyhow::Result<(Self, ConfigSource)> {
        if let Some(path) = explicit {
            return Ok((
                Self::load_from_file(path)?,
                ConfigSource::File(path.to_path_buf()),
            ));
        }

        if let Ok(path) = env::var("LEASEWATCH_CONFIG_PATH") {
            let path = PathBuf::from(path);
            return Ok((Self::load_from_file(&path)?, ConfigSource::File(path)));
        }

        if let Ok(raw) = env::var("LEASEWATCH_CONFIG_JSON") {
            let config = Self::parse_json(&raw)
                .context("failed to parse LEASEWATCH_CONFIG_JSON")?;
            return Ok((config, ConfigSource::InlineJson));
        }

        if let Some(path) = Self::find_default_file() {
            return Ok((Self::load_from_file(&path)?, ConfigSource::File(path)));
        }

        Ok((Self::default(), ConfigSource::Defaults))
    }

    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("SERVER_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("invalid SERVER_PORT `{port}`"))?;
        }
        if let Ok(url) = env::var("DATABASE_URL") {
            self.history.database_url = Some(url);
        }
        if let Ok(origins) = env::var("CORS_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(dev) = env::var("DEV_MODE") {
            self.dev_mode = dev.parse().unwrap_or(false);
        }
        Ok(())
    }

    /// Rejects combinations the server cannot start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let threshold = self.orchestrator.failure_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "orchestrator.failure_threshold must be within [0, 1], got {threshold}"
            ));
        }
        if self.orchestrator.max_concurrent_connectors == 0 {
            return Err(anyhow!(
                "orchestrator.max_concurrent_connectors must be at least 1"
            ));
        }
        if self.history.backend == HistoryBackend::Postgres
            && self.history.database_url.is_none()
        {
            return Err(anyhow!(
                "history.backend = \"postgres\" requires DATABASE_URL or history.database_url"
            ));
        }
        Ok(())
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read config from {}", path.display())
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid config {}", path.display())),
            Some("toml") => toml::from_str(&contents).map_err(|err| {
                anyhow!("invalid config {}: {}", path.display(), err)
            }),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        // Try TOML first, then JSON for convenience.
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| anyhow!("invalid config json: {err}"))
    }

    fn find_default_file() -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &[
            "leasewatch.toml",
            "leasewatch.json",
            "config/leasewatch.toml",
            "config/leasewatch.json",
        ];

        CANDIDATES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use leasewatch_model::ScanFrequency;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.orchestrator.max_concurrent_connectors, 16);
        assert_eq!(config.orchestrator.failure_threshold, 0.5);
        assert_eq!(config.orchestrator.per_source_timeout(), Duration::from_secs(60));
        assert_eq!(config.orchestrator.scan_timeout(), Duration::from_secs(600));
        assert_eq!(config.history.backend, HistoryBackend::Memory);
        assert!(config.sources.demo_enabled());
        assert!(!config.scheduler.enabled);
        assert_eq!(config.settings.default_lookback_days, 7);
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_fields() {
        let config: Config = toml::from_str(
            r#"
            [orchestrator]
            failure_threshold = 0.75
            scan_timeout_ms = 120000

            [scheduler]
            enabled = true

            [settings]
            frequency = "hourly"
            enabled_sources = ["dnb", "courts"]

            [[sources.feeds]]
            feed_url = "https://feeds.example.com/dnb"
            descriptor = { id = "dnb", name = "D&B", description = "credit" }
            "#,
        )
        .expect("valid toml");

        assert_eq!(config.orchestrator.failure_threshold, 0.75);
        assert_eq!(config.orchestrator.scan_timeout(), Duration::from_secs(120));
        assert_eq!(config.orchestrator.cancel_grace_ms, 5_000);
        assert!(config.scheduler.enabled);
        assert_eq!(config.settings.frequency, ScanFrequency::Hourly);
        assert_eq!(config.settings.enabled_sources.len(), 2);
        assert_eq!(config.sources.feeds.len(), 1);
        assert!(!config.sources.demo_enabled());
    }

    #[test]
    fn files_without_extension_fall_back_to_json() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"server": {{"port": 8088}}, "dev_mode": true}}"#)
            .expect("write");
        let config = Config::load_from_file(file.path()).expect("json config");
        assert_eq!(config.server.port, 8088);
        assert!(config.dev_mode);
    }

    #[test]
    fn validation_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.orchestrator.failure_threshold = 1.5;
        assert!(config.validate().is_err());

        config.orchestrator.failure_threshold = 1.0;
        config.history.backend = HistoryBackend::Postgres;
        assert!(config.validate().is_err());

        config.history.database_url =
            Some("postgres://localhost/leasewatch".into());
        assert!(config.validate().is_ok());
    }
}
