//! Server configuration.
//!
//! Loaded from `config.toml` in the platform data directory; every section
//! falls back to its defaults when missing.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Network settings
    pub server: ServerSettings,
    /// Party settings
    pub party: PartySettings,
    /// Matchmaking settings
    pub matchmaking: MatchmakingSettings,
    /// Live match settings
    pub matches: MatchSettings,
    /// Weekly league settings
    pub league: LeagueSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            server: ServerSettings::default(),
            party: PartySettings::default(),
            matchmaking: MatchmakingSettings::default(),
            matches: MatchSettings::default(),
            league: LeagueSettings::default(),
        }
    }
}

impl AppConfig {
    /// Database file inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("matharena.db")
    }
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// WebSocket bind address
    pub bind_addr: String,
    /// Outbound queue length per connection
    pub connection_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9300".to_string(),
            connection_buffer: 256,
        }
    }
}

/// Party settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartySettings {
    /// Party, member list and user pointer lifetime in seconds
    pub party_ttl_secs: u32,
    /// Invite lifetime in seconds
    pub invite_ttl_secs: u32,
    /// Queue state lifetime in seconds
    pub queue_ttl_secs: u32,
    /// Offline leader grace period before leadership moves
    pub leader_disconnect_timeout_secs: u32,
}

impl Default for PartySettings {
    fn default() -> Self {
        Self {
            party_ttl_secs: 4 * 60 * 60,
            invite_ttl_secs: 10 * 60,
            queue_ttl_secs: 5 * 60,
            leader_disconnect_timeout_secs: 60,
        }
    }
}

/// Matchmaking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Interval between matchmaking passes in milliseconds
    pub pass_interval_ms: u64,
    /// Initial rating window
    pub base_rating_window: u32,
    /// Window growth per widening step
    pub window_growth: u32,
    /// Seconds per widening step
    pub window_growth_interval_secs: u32,
    /// Largest rating window
    pub max_rating_window: u32,
    /// Seconds before an AI opponent is assigned
    pub ai_fallback_secs: u32,
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            pass_interval_ms: 1000,
            base_rating_window: 100,
            window_growth: 25,
            window_growth_interval_secs: 5,
            max_rating_window: 400,
            ai_fallback_secs: 30,
        }
    }
}

/// Live match settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    /// Server tick interval in milliseconds
    pub tick_interval_ms: u64,
    pub pre_match_secs: u32,
    pub break_secs: u32,
    pub halftime_secs: u32,
    pub anchor_decision_secs: u32,
    pub handoff_secs: u32,
    /// Relay clock per slot in team modes
    pub team_slot_secs: u32,
    /// Round clock in solo mode
    pub solo_round_secs: u32,
    pub questions_per_slot: u32,
    pub rounds_per_half: u32,
    pub timeouts_per_team: u32,
    pub timeout_extension_secs: u32,
    /// Per-team cap on IGL slot swaps
    pub igl_swaps_per_team: u32,
    /// Per-match cap on anchor double call-ins
    pub anchor_callins_per_match: u32,
    /// Seconds a fully disconnected team is given before forfeiting
    pub forfeit_after_secs: u32,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 250,
            pre_match_secs: 5,
            break_secs: 10,
            halftime_secs: 20,
            anchor_decision_secs: 10,
            handoff_secs: 3,
            team_slot_secs: 30,
            solo_round_secs: 60,
            questions_per_slot: 5,
            rounds_per_half: 2,
            timeouts_per_team: 2,
            timeout_extension_secs: 10,
            igl_swaps_per_team: 2,
            anchor_callins_per_match: 1,
            forfeit_after_secs: 60,
        }
    }
}

/// Weekly league settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeagueSettings {
    /// How often the scheduler checks for a finished week
    pub check_interval_secs: u64,
    /// Base XP for a completed match before the week multiplier
    pub match_base_xp: u32,
}

impl Default for LeagueSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 300,
            match_base_xp: 20,
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "matharena", "MathArena")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&get_config_path(), get_data_dir())
}

/// Load configuration from a file, using defaults when it does not exist.
pub fn load_config_from(path: &PathBuf, data_dir: PathBuf) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig {
            data_dir,
            ..Default::default()
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let mut config: AppConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.data_dir = data_dir;

    Ok(config)
}

/// Save application configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

/// Save configuration to a file.
pub fn save_config_to(config: &AppConfig, path: &PathBuf) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = load_config_from(&path, dir.path().to_path_buf()).unwrap();

        assert_eq!(config.party.party_ttl_secs, 14_400);
        assert_eq!(config.party.invite_ttl_secs, 600);
        assert_eq!(config.party.queue_ttl_secs, 300);
        assert_eq!(config.database_path(), dir.path().join("matharena.db"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.matches.timeouts_per_team = 3;
        config.server.bind_addr = "127.0.0.1:9999".to_string();
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path, dir.path().to_path_buf()).unwrap();
        assert_eq!(loaded.matches.timeouts_per_team, 3);
        assert_eq!(loaded.server.bind_addr, "127.0.0.1:9999");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[matchmaking]\nai_fallback_secs = 45\n").unwrap();

        let loaded = load_config_from(&path, dir.path().to_path_buf()).unwrap();
        assert_eq!(loaded.matchmaking.ai_fallback_secs, 45);
        assert_eq!(loaded.matchmaking.base_rating_window, 100);
        assert_eq!(loaded.league.match_base_xp, 20);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nbind_addr = ").unwrap();

        assert!(matches!(
            load_config_from(&path, dir.path().to_path_buf()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
