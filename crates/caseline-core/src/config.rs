use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};
use tracing::{
  debug,
  info,
  warn
};

use crate::datetime::parse_timezone;

pub const CONFIG_FILE: &str = "caseline.toml";

#[derive(
  Debug,
  Clone,
  PartialEq,
  Serialize,
  Deserialize,
)]
#[serde(default)]
pub struct SyncSection {
  pub search_debounce_ms:      u64,
  pub aggregate_cooldown_secs: u64,
  pub refresh_delay_ms:        u64,
  pub status_feed_limit:       usize
}

impl Default for SyncSection {
  fn default() -> Self {
    Self {
      search_debounce_ms:      300,
      aggregate_cooldown_secs: 30,
      refresh_delay_ms:        750,
      status_feed_limit:       50
    }
  }
}

#[derive(
  Debug,
  Clone,
  PartialEq,
  Serialize,
  Deserialize,
)]
#[serde(default)]
pub struct TimeSection {
  pub timezone: String
}

impl Default for TimeSection {
  fn default() -> Self {
    Self {
      timezone: "UTC".to_string()
    }
  }
}

#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Serialize,
  Deserialize,
)]
#[serde(default)]
pub struct StorageSection {
  #[serde(
    skip_serializing_if = "Option::is_none"
  )]
  pub data_dir: Option<PathBuf>
}

#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Serialize,
  Deserialize,
)]
#[serde(default)]
pub struct Config {
  pub sync:        SyncSection,
  pub time:        TimeSection,
  pub storage:     StorageSection,
  #[serde(skip)]
  pub loaded_file: Option<PathBuf>
}

impl Config {
  #[tracing::instrument(skip(
    config_override
  ))]
  pub fn load(
    config_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let path = match config_override {
      | Some(path) => {
        Some(path.to_path_buf())
      }
      | None => candidate_config_paths()
        .into_iter()
        .find(|p| p.is_file())
    };

    let Some(path) = path else {
      warn!(
        "no {CONFIG_FILE} found; using \
         defaults"
      );
      return Ok(Self::default());
    };

    info!(config = %path.display(), "loading config");
    let raw = fs::read_to_string(&path)
      .with_context(|| {
        format!(
          "failed to read {}",
          path.display()
        )
      })?;
    let mut cfg = Self::from_toml_str(&raw)
      .with_context(|| {
        format!(
          "failed to parse TOML {}",
          path.display()
        )
      })?;
    cfg.loaded_file = Some(path);
    Ok(cfg)
  }

  pub fn from_toml_str(
    raw: &str
  ) -> anyhow::Result<Self> {
    Ok(toml::from_str::<Self>(raw)?)
  }

  /// Applies `section.key=value` pairs.
  /// Values are read as TOML literals
  /// and fall back to plain strings.
  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) -> anyhow::Result<()>
  where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    let mut doc = toml::Value::try_from(&*self)
      .context("failed to serialize config")?;

    for (key, raw) in overrides {
      let (section, field) = key
        .split_once('.')
        .ok_or_else(|| {
          anyhow!(
            "override key must be \
             section.key: {key}"
          )
        })?;
      let table = doc
        .as_table_mut()
        .ok_or_else(|| {
          anyhow!("config is not a table")
        })?
        .entry(section.to_string())
        .or_insert_with(|| {
          toml::Value::Table(
            toml::Table::new()
          )
        })
        .as_table_mut()
        .ok_or_else(|| {
          anyhow!(
            "{section} is not a config \
             section"
          )
        })?;
      debug!(key = %key, value = %raw, "applying override");
      table.insert(
        field.to_string(),
        parse_literal(&raw)
      );
    }

    let loaded_file = self.loaded_file.take();
    *self = doc.try_into::<Self>().context(
      "override produced an invalid config"
    )?;
    self.loaded_file = loaded_file;
    Ok(())
  }

  pub fn search_debounce(&self) -> Duration {
    Duration::from_millis(
      self.sync.search_debounce_ms
    )
  }

  pub fn aggregate_cooldown(
    &self
  ) -> Duration {
    Duration::from_secs(
      self.sync.aggregate_cooldown_secs
    )
  }

  pub fn refresh_delay(&self) -> Duration {
    Duration::from_millis(
      self.sync.refresh_delay_ms
    )
  }

  pub fn timezone(
    &self
  ) -> anyhow::Result<Tz> {
    parse_timezone(&self.time.timezone)
  }
}

fn parse_literal(raw: &str) -> toml::Value {
  toml::from_str::<toml::Table>(&format!(
    "v = {raw}"
  ))
  .ok()
  .and_then(|mut t| t.remove("v"))
  .unwrap_or_else(|| {
    toml::Value::String(raw.to_string())
  })
}

fn candidate_config_paths() -> Vec<PathBuf>
{
  let mut candidates = Vec::new();

  if let Ok(path) =
    std::env::var("CASELINE_CONFIG")
  {
    let trimmed = path.trim();
    if !trimmed.is_empty() {
      candidates.push(PathBuf::from(trimmed));
    }
  }

  if let Ok(cwd) = std::env::current_dir() {
    let mut cursor = Some(cwd.as_path());
    while let Some(path) = cursor {
      candidates.push(path.join(CONFIG_FILE));
      cursor = path.parent();
    }
  }

  if let Some(dir) = dirs::config_dir() {
    candidates.push(
      dir.join("caseline").join(CONFIG_FILE)
    );
  }

  let mut unique = Vec::<PathBuf>::new();
  for candidate in candidates {
    if !unique.contains(&candidate) {
      unique.push(candidate);
    }
  }
  unique
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let env_dir = std::env::var("CASELINE_DATA")
    .ok()
    .filter(|v| !v.trim().is_empty())
    .map(PathBuf::from);

  let dir = if let Some(path) = override_dir {
    path.to_path_buf()
  } else if let Some(path) = env_dir {
    path
  } else if let Some(path) =
    &cfg.storage.data_dir
  {
    expand_tilde(path)
  } else {
    dirs::data_dir()
      .ok_or_else(|| {
        anyhow!(
          "cannot determine data \
           directory"
        )
      })?
      .join("caseline")
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

fn expand_tilde(path: &Path) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) = text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}
