use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::store::DEFAULT_STORAGE_KEY;
use crate::view::SortOrder;

const RC_ENV_VAR: &str = "TASKDECKRC";
const RC_FILE_NAME: &str = ".taskdeckrc";
const DEFAULT_DATA_DIR: &str =
  "~/.taskdeck";

#[derive(Debug, Clone)]
pub struct Config {
  map:              HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (k, v) in [
      ("data.location", DEFAULT_DATA_DIR),
      ("storage.key", DEFAULT_STORAGE_KEY),
      ("view.sort", "insertion"),
      ("default.command", "upcoming"),
      ("color", "on")
    ] {
      map.insert(
        k.to_string(),
        v.to_string()
      );
    }
    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading taskdeckrc");
      cfg.load_file(&path, &mut Vec::new())?;
    } else {
      debug!(
        "no taskdeckrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn storage_key(&self) -> String {
    self
      .get("storage.key")
      .filter(|k| !k.trim().is_empty())
      .unwrap_or_else(|| {
        DEFAULT_STORAGE_KEY.to_string()
      })
  }

  /// Byte budget for all stored keys; unset or `0` means unlimited.
  pub fn storage_quota(
    &self
  ) -> anyhow::Result<Option<u64>> {
    let Some(raw) =
      self.get("storage.quota")
    else {
      return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
      return Ok(None);
    }
    let quota: u64 =
      raw.parse().with_context(|| {
        format!(
          "invalid storage.quota: {raw}"
        )
      })?;
    Ok((quota > 0).then_some(quota))
  }

  pub fn sort_order(
    &self
  ) -> anyhow::Result<SortOrder> {
    self
      .get("view.sort")
      .map(|raw| raw.parse::<SortOrder>())
      .transpose()
      .map(Option::unwrap_or_default)
  }

  /// Reads one rc file into the map. `stack` holds the files
  /// currently being included, outermost first; a shared file
  /// included from two places is fine, a file including itself
  /// (directly or not) is an error.
  #[tracing::instrument(skip(self, stack))]
  fn load_file(
    &mut self,
    path: &Path,
    stack: &mut Vec<PathBuf>
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    if stack.contains(&path) {
      return Err(anyhow!(
        "include cycle at {}",
        path.display()
      ));
    }

    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;
    if !self.loaded_files.contains(&path)
    {
      self
        .loaded_files
        .push(path.clone());
    }

    stack.push(path.clone());
    let result =
      self.apply_rc_text(&path, &text, stack);
    stack.pop();
    result
  }

  fn apply_rc_text(
    &mut self,
    path: &Path,
    text: &str,
    stack: &mut Vec<PathBuf>
  ) -> anyhow::Result<()> {
    let base_dir = path
      .parent()
      .unwrap_or_else(|| Path::new("."));

    for (idx, raw_line) in
      text.lines().enumerate()
    {
      let at = || {
        format!(
          "{}:{}",
          path.display(),
          idx + 1
        )
      };

      match parse_rc_line(raw_line) {
        | RcLine::Blank => {}
        | RcLine::Include(target) => {
          let target =
            base_dir.join(expand_tilde(
              Path::new(target)
            ));
          if !target.exists() {
            warn!(include = %target.display(), "include file does not exist; skipping");
            continue;
          }
          debug!(at = %at(), include = %target.display(), "following include");
          self.load_file(&target, stack)?;
        }
        | RcLine::Setting(key, value) => {
          trace!(key, value, "loaded config key");
          self.map.insert(
            key.to_string(),
            value.to_string()
          );
        }
        | RcLine::Invalid => {
          return Err(anyhow!(
            "invalid config line {}: {}",
            at(),
            raw_line
          ));
        }
      }
    }

    Ok(())
  }
}

#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
  Blank,
  Include(&'a str),
  Setting(&'a str, &'a str),
  Invalid
}

fn parse_rc_line(raw: &str) -> RcLine<'_> {
  let line = raw
    .split_once('#')
    .map_or(raw, |(before, _)| before)
    .trim();

  if line.is_empty() {
    RcLine::Blank
  } else if let Some(target) =
    line.strip_prefix("include ")
  {
    RcLine::Include(target.trim())
  } else if let Some((key, value)) =
    line.split_once('=')
  {
    RcLine::Setting(key.trim(), value.trim())
  } else {
    RcLine::Invalid
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    expand_tilde(Path::new(
      DEFAULT_DATA_DIR
    ))
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

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping taskdeckrc"
    );
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}
