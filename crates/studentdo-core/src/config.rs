use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow,
  bail
};
use tracing::{
  debug,
  info,
  warn
};

use crate::datetime::{
  DEFAULT_DATE_FORMAT,
  validate_date_format
};

const RC_ENV_VAR: &str = "TODORC";
const RC_FILE_NAME: &str = ".todorc";
const DEFAULT_DATA_DIR: &str =
  "~/.studentdo";

/// Application settings from the rc
/// file. Distinct from the user
/// preferences, which live in the data
/// directory and are changed through
/// the app itself.
#[derive(Debug, Clone)]
pub struct Config {
  pub data_location: String,
  pub color:         bool,
  pub date_format:   String,
  pub loaded_files:  Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      data_location: DEFAULT_DATA_DIR
        .to_string(),
      color:         true,
      date_format:   DEFAULT_DATE_FORMAT
        .to_string(),
      loaded_files:  Vec::new()
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
    let mut cfg = Self::default();
    match resolve_rc_path(rc_override)
    {
      | Some(path) => {
        info!(rc = %path.display(), "loading rc file");
        cfg.read_rc(&path)?;
      }
      | None => {
        debug!("no rc file; defaults")
      }
    }
    Ok(cfg)
  }

  /// `rc.key=value` and `--rc
  /// key=value` pairs, applied after
  /// the file.
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) -> anyhow::Result<()>
  where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (key, value) in overrides {
      let key = key
        .strip_prefix("rc.")
        .unwrap_or(&key);
      debug!(key, value = %value, "rc override");
      self.set(key, &value)?;
    }
    Ok(())
  }

  /// Unknown keys are ignored so rc
  /// files can be shared across
  /// versions.
  pub fn set(
    &mut self,
    key: &str,
    value: &str
  ) -> anyhow::Result<()> {
    match key {
      | "data.location" => {
        self.data_location =
          value.to_string();
      }
      | "color" => {
        self.color =
          parse_bool(key, value)?;
      }
      | "date.format" => {
        validate_date_format(value)?;
        self.date_format =
          value.to_string();
      }
      | other => {
        warn!(key = other, "ignoring unknown rc key")
      }
    }
    Ok(())
  }

  fn read_rc(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    if self.loaded_files.contains(&path)
    {
      bail!(
        "rc include loop through {}",
        path.display()
      );
    }
    let text = fs::read_to_string(&path)
      .with_context(|| {
        format!(
          "cannot read rc file {}",
          path.display()
        )
      })?;
    self.loaded_files.push(path.clone());

    let dir = path
      .parent()
      .unwrap_or_else(|| Path::new("."))
      .to_path_buf();

    for (idx, raw) in
      text.lines().enumerate()
    {
      let line = raw
        .split('#')
        .next()
        .unwrap_or_default()
        .trim();
      if line.is_empty() {
        continue;
      }

      if let Some(target) =
        line.strip_prefix("include ")
      {
        let target = target.trim();
        if target.is_empty() {
          bail!(
            "{}:{}: include needs a path",
            path.display(),
            idx + 1
          );
        }
        let included =
          dir.join(expand_tilde(
            Path::new(target)
          ));
        if included.exists() {
          self.read_rc(&included)?;
        } else {
          warn!(include = %included.display(), "missing rc include skipped");
        }
        continue;
      }

      let Some((key, value)) =
        line.split_once('=')
      else {
        return Err(anyhow!(
          "{}:{}: expected key = \
           value, got `{raw}`",
          path.display(),
          idx + 1
        ));
      };
      self
        .set(key.trim(), value.trim())
        .with_context(|| {
          format!(
            "{}:{}",
            path.display(),
            idx + 1
          )
        })?;
    }
    Ok(())
  }
}

/// `--data` wins over `data.location`.
/// The directory is created on demand.
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match override_dir {
    | Some(path) => path.to_path_buf(),
    | None => {
      expand_tilde(Path::new(
        &cfg.data_location
      ))
    }
  };
  if !dir.is_dir() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "cannot create {}",
          dir.display()
        )
      })?;
  }
  Ok(dir)
}

fn resolve_rc_path(
  rc_override: Option<&Path>
) -> Option<PathBuf> {
  if let Some(path) = rc_override {
    return Some(path.to_path_buf());
  }
  if let Ok(env) =
    std::env::var(RC_ENV_VAR)
  {
    return (env != "/dev/null")
      .then(|| PathBuf::from(env));
  }
  let candidate =
    dirs::home_dir()?.join(RC_FILE_NAME);
  candidate.exists().then_some(candidate)
}

/// Joining an absolute path replaces
/// the base, so expanded home paths
/// survive `dir.join`.
fn expand_tilde(path: &Path) -> PathBuf {
  match (
    path.strip_prefix("~"),
    dirs::home_dir()
  ) {
    | (Ok(rest), Some(home)) => {
      home.join(rest)
    }
    | _ => path.to_path_buf()
  }
}

fn parse_bool(
  key: &str,
  value: &str
) -> anyhow::Result<bool> {
  match value
    .to_ascii_lowercase()
    .as_str()
  {
    | "on" | "yes" | "y" | "true"
    | "1" => Ok(true),
    | "off" | "no" | "n" | "false"
    | "0" => Ok(false),
    | _ => {
      bail!(
        "{key} expects on/off, got \
         `{value}`"
      )
    }
  }
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use super::*;

  #[test]
  fn reads_includes_and_comments() {
    let temp =
      tempdir().expect("tempdir");
    fs::write(
      temp.path().join("extra.rc"),
      "date.format = %Y-%m-%d\n"
    )
    .expect("write include");
    let rc = temp.path().join("todorc");
    fs::write(
      &rc,
      "# comment\ncolor = off # \
       trailing\n\ninclude extra.rc\n"
    )
    .expect("write rc");

    let cfg =
      Config::load(Some(rc.as_path()))
        .expect("load rc");
    assert!(!cfg.color);
    assert_eq!(cfg.date_format, "%Y-%m-%d");
    assert_eq!(cfg.loaded_files.len(), 2);
  }

  #[test]
  fn rejects_line_without_value() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("todorc");
    fs::write(&rc, "color\n")
      .expect("write rc");
    assert!(
      Config::load(Some(rc.as_path()))
        .is_err()
    );
  }

  #[test]
  fn rejects_include_loop() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("todorc");
    fs::write(&rc, "include todorc\n")
      .expect("write rc");
    assert!(
      Config::load(Some(rc.as_path()))
        .is_err()
    );
  }

  #[test]
  fn overrides_apply_with_or_without_prefix()
  {
    let mut cfg = Config::default();
    cfg
      .apply_overrides(vec![
        (
          "rc.color".to_string(),
          "no".to_string()
        ),
        (
          "data.location".to_string(),
          "/tmp/elsewhere".to_string()
        ),
      ])
      .expect("overrides");
    assert!(!cfg.color);
    assert_eq!(
      cfg.data_location,
      "/tmp/elsewhere"
    );
  }

  #[test]
  fn bad_values_are_rejected() {
    let mut cfg = Config::default();
    assert!(
      cfg.set("color", "maybe").is_err()
    );
    assert!(
      cfg.set("date.format", "%Q").is_err()
    );
    assert!(
      cfg.set("unknown.key", "x").is_ok()
    );
  }

  #[test]
  fn data_dir_override_is_created() {
    let temp =
      tempdir().expect("tempdir");
    let target =
      temp.path().join("nested/data");
    let dir = resolve_data_dir(
      &Config::default(),
      Some(target.as_path())
    )
    .expect("resolve");
    assert_eq!(dir, target);
    assert!(dir.is_dir());
  }
}
