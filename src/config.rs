use crate::types::{TierConfig, DEFAULT_BRACKET_SIZE, DEFAULT_RANKING_SIZE, MAX_RANKING_SIZE};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    env,
    fs,
    path::{Path, PathBuf},
};

pub const CONFIG_PATH_ENV: &str = "RANK_BOARD_CONFIG_PATH";

fn default_ranking_size() -> usize {
  DEFAULT_RANKING_SIZE
}

fn default_bracket_size() -> usize {
  DEFAULT_BRACKET_SIZE
}

fn default_snapshot_path() -> String {
  "data/rank-board.json".to_string()
}

fn default_log_dir() -> String {
  "logs".to_string()
}

fn default_persist() -> bool {
  true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
  #[serde(default = "default_ranking_size")]
  pub max_ranking_size: usize,
  #[serde(default)]
  pub tier_config: TierConfig,
  #[serde(default = "default_bracket_size")]
  pub bracket_size: usize,
  #[serde(default = "default_snapshot_path")]
  pub snapshot_path: String,
  #[serde(default = "default_log_dir")]
  pub log_dir: String,
  /// Attach a background snapshot writer.
  #[serde(default = "default_persist")]
  pub persist: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    EngineConfig {
      max_ranking_size: default_ranking_size(),
      tier_config: TierConfig::default(),
      bracket_size: default_bracket_size(),
      snapshot_path: default_snapshot_path(),
      log_dir: default_log_dir(),
      persist: default_persist(),
    }
  }
}

impl EngineConfig {
  pub fn validate(&self) -> Result<(), String> {
    if self.max_ranking_size == 0 {
      return Err("maxRankingSize must be at least 1".to_string());
    }
    if self.max_ranking_size > MAX_RANKING_SIZE {
      return Err(format!("maxRankingSize {} exceeds {MAX_RANKING_SIZE}", self.max_ranking_size));
    }
    if self.bracket_size < 2 || !self.bracket_size.is_power_of_two() {
      return Err(format!("bracketSize {} is not a power of two >= 2", self.bracket_size));
    }
    if self.tier_config.tiers.is_empty() {
      return Err("tierConfig needs at least one tier".to_string());
    }
    let mut seen = HashSet::new();
    for tier in &self.tier_config.tiers {
      if tier.id.trim().is_empty() {
        return Err("tier ids must not be empty".to_string());
      }
      if !seen.insert(tier.id.as_str()) {
        return Err(format!("duplicate tier id {}", tier.id));
      }
    }
    Ok(())
  }

  pub fn snapshot_path_buf(&self) -> PathBuf {
    PathBuf::from(&self.snapshot_path)
  }

  pub fn log_dir_buf(&self) -> PathBuf {
    PathBuf::from(&self.log_dir)
  }
}

pub fn config_path() -> PathBuf {
  env_default(CONFIG_PATH_ENV)
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("rank-board.json"))
}

pub fn env_default(key: &str) -> Option<String> {
  env::var(key)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

fn is_truthy(value: &str) -> bool {
  let value = value.trim().to_ascii_lowercase();
  matches!(value.as_str(), "1" | "true" | "yes" | "on")
}

pub fn apply_env_defaults(config: EngineConfig) -> EngineConfig {
  apply_overrides(config, env_default)
}

/// Overrides are applied from `lookup`, so callers (and tests) can feed
/// something other than the process environment.
pub fn apply_overrides<F>(mut config: EngineConfig, lookup: F) -> EngineConfig
where
  F: Fn(&str) -> Option<String>,
{
  if let Some(value) = lookup("RANK_BOARD_RANKING_SIZE") {
    match value.parse::<usize>() {
      Ok(size) => config.max_ranking_size = size,
      Err(e) => tracing::warn!("ignoring RANK_BOARD_RANKING_SIZE={value}: {e}"),
    }
  }
  if let Some(value) = lookup("RANK_BOARD_BRACKET_SIZE") {
    match value.parse::<usize>() {
      Ok(size) => config.bracket_size = size,
      Err(e) => tracing::warn!("ignoring RANK_BOARD_BRACKET_SIZE={value}: {e}"),
    }
  }
  if let Some(value) = lookup("RANK_BOARD_SNAPSHOT_PATH") {
    config.snapshot_path = value;
  }
  if let Some(value) = lookup("RANK_BOARD_LOG_DIR") {
    config.log_dir = value;
  }
  if let Some(value) = lookup("RANK_BOARD_PERSIST") {
    config.persist = is_truthy(&value);
  }
  config
}

pub fn load_config_from(path: &Path) -> Result<EngineConfig, String> {
  load_config_with(path, env_default)
}

/// Read `path` (defaults when missing), apply overrides from `lookup`, then
/// validate the result either way.
pub fn load_config_with<F>(path: &Path, lookup: F) -> Result<EngineConfig, String>
where
  F: Fn(&str) -> Option<String>,
{
  let config = if path.is_file() {
    let data = fs::read_to_string(path).map_err(|e| format!("read config {}: {e}", path.display()))?;
    serde_json::from_str::<EngineConfig>(&data).map_err(|e| format!("parse config {}: {e}", path.display()))?
  } else {
    EngineConfig::default()
  };
  let config = apply_overrides(config, lookup);
  config.validate().map_err(|e| format!("invalid config {}: {e}", path.display()))?;
  Ok(config)
}

pub fn load_config() -> Result<EngineConfig, String> {
  load_config_from(&config_path())
}

pub fn save_config_to(path: &Path, config: EngineConfig) -> Result<EngineConfig, String> {
  config.validate()?;
  let payload = serde_json::to_string_pretty(&config).map_err(|e| e.to_string())?;
  if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
    fs::create_dir_all(parent).map_err(|e| format!("create config dir {}: {e}", parent.display()))?;
  }
  fs::write(path, payload).map_err(|e| format!("write config {}: {e}", path.display()))?;
  Ok(config)
}

/// Populate unset variables from a dotenv-style file. Missing files are fine.
pub fn load_env_file(env_path: &Path) {
  if !env_path.is_file() {
    return;
  }
  let contents = match fs::read_to_string(env_path) {
    Ok(data) => data,
    Err(_) => return,
  };
  for line in contents.lines() {
    if let Some((key, value)) = parse_env_line(line) {
      if env::var_os(&key).is_none() {
        env::set_var(key, value);
      }
    }
  }
}

pub fn parse_env_line(line: &str) -> Option<(String, String)> {
  let trimmed = line.trim();
  if trimmed.is_empty() || trimmed.starts_with('#') {
    return None;
  }
  let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
  let (key, raw_value) = trimmed.split_once('=')?;
  let key = key.trim();
  if key.is_empty() {
    return None;
  }
  let mut value = raw_value.trim();
  if value.len() >= 2
    && ((value.starts_with('"') && value.ends_with('"')) || (value.starts_with('\'') && value.ends_with('\'')))
  {
    value = &value[1..value.len() - 1];
  } else if let Some(idx) = value.find('#') {
    value = value[..idx].trim_end();
  }
  Some((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::TierDefinition;
  use std::collections::HashMap;

  #[test]
  fn defaults_are_valid() {
    let config = EngineConfig::default();
    assert_eq!(config.max_ranking_size, 10);
    assert_eq!(config.bracket_size, 8);
    assert_eq!(config.tier_config.tiers.len(), 5);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn validate_rejects_bad_shapes() {
    let mut config = EngineConfig::default();
    config.max_ranking_size = 0;
    assert!(config.validate().is_err());

    let mut config = EngineConfig::default();
    config.bracket_size = 12;
    assert!(config.validate().is_err());

    let mut config = EngineConfig::default();
    config.tier_config.tiers.clear();
    assert!(config.validate().is_err());

    let mut config = EngineConfig::default();
    config.tier_config.tiers.push(TierDefinition::new("S", "S again", 9));
    assert!(config.validate().unwrap_err().contains("duplicate"));
  }

  #[test]
  fn overrides_apply_and_ignore_garbage() {
    let vars: HashMap<&str, &str> = [
      ("RANK_BOARD_RANKING_SIZE", "25"),
      ("RANK_BOARD_BRACKET_SIZE", "sixteen"),
      ("RANK_BOARD_LOG_DIR", "/tmp/rb-logs"),
      ("RANK_BOARD_PERSIST", "off"),
    ]
    .into_iter()
    .collect();
    let config = apply_overrides(EngineConfig::default(), |key| vars.get(key).map(|v| v.to_string()));
    assert_eq!(config.max_ranking_size, 25);
    assert_eq!(config.bracket_size, 8);
    assert_eq!(config.log_dir, "/tmp/rb-logs");
    assert!(!config.persist);
  }

  #[test]
  fn missing_fields_take_defaults() {
    let config: EngineConfig = serde_json::from_str(r#"{"maxRankingSize": 3}"#).unwrap();
    assert_eq!(config.max_ranking_size, 3);
    assert_eq!(config.bracket_size, DEFAULT_BRACKET_SIZE);
    assert!(config.persist);
  }

  #[test]
  fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conf").join("rank-board.json");
    let mut config = EngineConfig::default();
    config.bracket_size = 16;
    save_config_to(&path, config).unwrap();
    let loaded = load_config_from(&path).unwrap();
    assert_eq!(loaded.bracket_size, 16);
  }

  #[test]
  fn missing_file_still_validates_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");

    let config = load_config_with(&path, |_| None).unwrap();
    assert_eq!(config, EngineConfig::default());

    let err = load_config_with(&path, |key| (key == "RANK_BOARD_BRACKET_SIZE").then(|| "6".to_string())).unwrap_err();
    assert!(err.contains("invalid config"));
    let err = load_config_with(&path, |key| (key == "RANK_BOARD_RANKING_SIZE").then(|| "0".to_string())).unwrap_err();
    assert!(err.contains("maxRankingSize"));
  }

  #[test]
  fn invalid_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rank-board.json");
    fs::write(&path, r#"{"bracketSize": 6}"#).unwrap();
    let err = load_config_from(&path).unwrap_err();
    assert!(err.contains("invalid config"));
  }

  #[test]
  fn env_lines_parse() {
    assert_eq!(parse_env_line("# comment"), None);
    assert_eq!(
      parse_env_line("export RANK_BOARD_LOG_DIR=\"/var/log/rb\""),
      Some(("RANK_BOARD_LOG_DIR".to_string(), "/var/log/rb".to_string()))
    );
    assert_eq!(
      parse_env_line("RANK_BOARD_RANKING_SIZE=12 # twelve"),
      Some(("RANK_BOARD_RANKING_SIZE".to_string(), "12".to_string()))
    );
    assert_eq!(parse_env_line("=value"), None);
  }
}
