//! Configuration loading for Duologue.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::conversation::{AgentNames, DEFAULT_EXCERPT_CHARS, MAX_CONVERSATION_DEPTH};
use crate::core::dedup::DEFAULT_QUIET_MARKERS;
use crate::core::retry::MAX_RETRIES;
use crate::delivery::pending::DEFAULT_INFORMATIONAL_MARKERS;
use crate::delivery::{PollerConfig, StrategyKind, TimeoutPolicy};
use crate::error::Error;
use crate::heartbeat::LoopOptions;

pub type Result<T> = std::result::Result<T, Error>;

/// Get the Duologue home directory (~/.duologue).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".duologue"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from ~/.duologue/settings.json, falling back to defaults when the file
/// does not exist.
pub fn load_settings() -> Result<Settings> {
    load_settings_from(&get_settings_path()?)
}

pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        tracing::debug!("No settings at {}, using defaults", path.display());
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    validate_settings(&settings)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Write settings as pretty JSON, creating the parent directory.
pub fn save_settings_to(path: &Path, settings: &Settings) -> Result<()> {
    validate_settings(settings)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    tracing::info!("Saved settings to {}", path.display());
    Ok(())
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.agents.a.id == settings.agents.b.id {
        return Err(Error::Config(format!(
            "agents.a.id and agents.b.id must differ (both '{}')",
            settings.agents.a.id
        )));
    }
    if settings.poller.interval_ms == 0 || settings.poller.max_attempts == 0 {
        return Err(Error::Config(
            "poller.interval_ms and poller.max_attempts must be positive".to_string(),
        ));
    }
    if settings.timeouts.informational_secs == 0 || settings.timeouts.conversational_secs == 0 {
        return Err(Error::Config("timeouts must be positive".to_string()));
    }
    if settings.schedule.interval_ms == 0 {
        return Err(Error::Config("loop.interval_ms must be positive".to_string()));
    }
    if settings.dispatch.max_conversation_depth == 0 {
        return Err(Error::Config(
            "dispatch.max_conversation_depth must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// A remote agent endpoint.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AgentConfig {
    /// Agent id on the agent server
    pub id: String,
    /// Display name used in follow-up prompts
    pub name: String,
    /// Central channel id for push delivery
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// Both agents.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Agents {
    #[serde(default = "default_agent_a")]
    pub a: AgentConfig,
    #[serde(default = "default_agent_b")]
    pub b: AgentConfig,
}

fn default_agent_a() -> AgentConfig {
    AgentConfig {
        id: "default-agent".to_string(),
        name: "Skysent".to_string(),
        channel_id: None,
    }
}

fn default_agent_b() -> AgentConfig {
    AgentConfig {
        id: "default-agent-2".to_string(),
        name: "Arcadius".to_string(),
        channel_id: None,
    }
}

impl Default for Agents {
    fn default() -> Self {
        Self {
            a: default_agent_a(),
            b: default_agent_b(),
        }
    }
}

impl Agents {
    pub fn names(&self) -> AgentNames {
        AgentNames::new(&self.a.name, &self.b.name)
    }
}

/// Agent server connection.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Server {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key: Option<String>,
    /// Server id for central channels
    pub server_id: Option<String>,
    /// Author id used when pushing into channels
    pub author_id: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for Server {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            server_id: None,
            author_id: None,
        }
    }
}

/// Dispatcher behaviour.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Dispatch {
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default = "default_max_conversation_depth")]
    pub max_conversation_depth: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_excerpt_chars")]
    pub follow_up_excerpt_chars: usize,
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    #[serde(default = "default_quiet_markers")]
    pub quiet_markers: Vec<String>,
}

fn default_max_conversation_depth() -> u32 {
    MAX_CONVERSATION_DEPTH
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

fn default_excerpt_chars() -> usize {
    DEFAULT_EXCERPT_CHARS
}

fn default_dedup_window_ms() -> u64 {
    5000
}

fn default_quiet_markers() -> Vec<String> {
    DEFAULT_QUIET_MARKERS.iter().map(|m| m.to_string()).collect()
}

impl Default for Dispatch {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            max_conversation_depth: default_max_conversation_depth(),
            max_retries: default_max_retries(),
            follow_up_excerpt_chars: default_excerpt_chars(),
            dedup_window_ms: default_dedup_window_ms(),
            quiet_markers: default_quiet_markers(),
        }
    }
}

impl Dispatch {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}

/// Reply timeouts for push delivery.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Timeouts {
    #[serde(default = "default_informational_secs")]
    pub informational_secs: u64,
    #[serde(default = "default_conversational_secs")]
    pub conversational_secs: u64,
    #[serde(default = "default_informational_markers")]
    pub informational_markers: Vec<String>,
}

fn default_informational_secs() -> u64 {
    30
}

fn default_conversational_secs() -> u64 {
    180
}

fn default_informational_markers() -> Vec<String> {
    DEFAULT_INFORMATIONAL_MARKERS
        .iter()
        .map(|m| m.to_string())
        .collect()
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            informational_secs: default_informational_secs(),
            conversational_secs: default_conversational_secs(),
            informational_markers: default_informational_markers(),
        }
    }
}

impl Timeouts {
    pub fn to_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::new(
            Duration::from_secs(self.informational_secs),
            Duration::from_secs(self.conversational_secs),
            self.informational_markers.clone(),
        )
    }
}

/// Session polling cadence.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Poller {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_poll_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_poll_jitter_ms() -> u64 {
    500
}

fn default_poll_max_attempts() -> u32 {
    20
}

impl Default for Poller {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            jitter_ms: default_poll_jitter_ms(),
            max_attempts: default_poll_max_attempts(),
        }
    }
}

impl Poller {
    pub fn to_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.interval_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            max_attempts: self.max_attempts,
        }
    }
}

/// Prompt loop.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Schedule {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_loop_interval_ms")]
    pub interval_ms: u64,
    pub initial_prompt: Option<String>,
    /// Replaces the built-in prompt corpus when set
    pub prompts: Option<Vec<String>>,
}

fn default_loop_interval_ms() -> u64 {
    300_000
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_loop_interval_ms(),
            initial_prompt: None,
            prompts: None,
        }
    }
}

impl Schedule {
    pub fn to_options(&self) -> LoopOptions {
        LoopOptions {
            interval: Duration::from_millis(self.interval_ms),
            prompts: self.prompts.clone(),
        }
    }
}

/// HTTP surface.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Web {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

fn default_web_host() -> String {
    "0.0.0.0".to_string()
}

fn default_web_port() -> u16 {
    3333
}

impl Default for Web {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

/// Duologue settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub agents: Agents,

    #[serde(default)]
    pub server: Server,

    #[serde(default)]
    pub dispatch: Dispatch,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub poller: Poller,

    #[serde(default, rename = "loop")]
    pub schedule: Schedule,

    #[serde(default)]
    pub web: Web,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from(&dir.path().join("settings.json")).unwrap();

        assert_eq!(settings.dispatch.max_conversation_depth, 2);
        assert_eq!(settings.dispatch.max_retries, 1);
        assert_eq!(settings.dispatch.strategy, StrategyKind::Correlator);
        assert_eq!(settings.timeouts.conversational_secs, 180);
        assert_eq!(settings.poller.max_attempts, 20);
        assert_eq!(settings.schedule.interval_ms, 300_000);
        assert_eq!(settings.agents.a.name, "Skysent");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"dispatch": {"strategy": "poller"}, "loop": {"enabled": true, "interval_ms": 1000}}"#,
        )
        .unwrap();

        let settings = load_settings_from(&path).unwrap();
        assert_eq!(settings.dispatch.strategy, StrategyKind::Poller);
        assert_eq!(settings.dispatch.dedup_window_ms, 5000);
        assert_eq!(settings.dispatch.quiet_markers, default_quiet_markers());
        assert!(settings.schedule.enabled);
        assert_eq!(settings.schedule.to_options().interval, Duration::from_secs(1));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = Settings::default();
        settings.web.port = 4000;
        settings.agents.b.channel_id = Some("chan-b".to_string());

        save_settings_to(&path, &settings).unwrap();
        let loaded = load_settings_from(&path).unwrap();
        assert_eq!(loaded.web.port, 4000);
        assert_eq!(loaded.agents.b.channel_id.as_deref(), Some("chan-b"));
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        settings.agents.b.id = settings.agents.a.id.clone();
        assert!(matches!(validate_settings(&settings), Err(Error::Config(_))));

        let mut settings = Settings::default();
        settings.poller.max_attempts = 0;
        assert!(validate_settings(&settings).is_err());

        assert!(validate_settings(&Settings::default()).is_ok());
    }
}
