//! Invoker configuration, usually `invoker.toml` next to the test tree.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::case::InvocationKind;
use crate::environment::Scope;

/// Invoker configuration (TOML).
///
/// Missing fields take their defaults, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InvokerConfig {
    /// Wall-clock budget for one coroutine call, in milliseconds.
    pub coroutine_timeout_ms: u64,

    /// When false the capture context passes writes through to the process.
    pub capture_output: bool,

    /// Also redirect the process stdout and stderr descriptors while
    /// capturing, so `println!` output is captured. Turn off when another
    /// harness shares the process streams.
    pub redirect_streams: bool,

    /// Captured bytes per Handle beyond this limit are dropped and counted.
    pub output_limit_bytes: usize,

    pub overrides: Vec<OverrideConfig>,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            coroutine_timeout_ms: 30_000,
            capture_output: true,
            redirect_streams: true,
            output_limit_bytes: 100_000,
            overrides: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Global,
    Directory,
    File,
    Test,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinEnvironment {
    Default,
    Coroutine,
}

/// One `[[overrides]]` entry: which built-in environment runs bodies of
/// `kind` inside `scope`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverrideConfig {
    pub scope: ScopeKind,
    /// Directory or file for the `directory` and `file` scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Owning file for the `test` scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Test name for the `test` scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: InvocationKind,
    pub environment: BuiltinEnvironment,
}

impl OverrideConfig {
    pub fn to_scope(&self) -> Result<Scope> {
        match self.scope {
            ScopeKind::Global => Ok(Scope::Global),
            ScopeKind::Directory => self
                .path
                .clone()
                .map(Scope::Directory)
                .ok_or_else(|| anyhow!("directory override requires `path`")),
            ScopeKind::File => self
                .path
                .clone()
                .map(Scope::File)
                .ok_or_else(|| anyhow!("file override requires `path`")),
            ScopeKind::Test => match (&self.file, &self.name) {
                (Some(file), Some(name)) if !name.trim().is_empty() => Ok(Scope::Test {
                    file: file.clone(),
                    name: name.clone(),
                }),
                _ => Err(anyhow!("test override requires `file` and a non-empty `name`")),
            },
        }
    }
}

impl InvokerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.coroutine_timeout_ms == 0 {
            return Err(anyhow!("coroutine_timeout_ms must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        for (index, entry) in self.overrides.iter().enumerate() {
            entry
                .to_scope()
                .with_context(|| format!("overrides[{index}]"))?;
        }
        Ok(())
    }

    pub fn coroutine_timeout(&self) -> Duration {
        Duration::from_millis(self.coroutine_timeout_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `InvokerConfig::default()`.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_config(path: &Path) -> Result<InvokerConfig> {
    if !path.exists() {
        debug!("config missing, using defaults");
        let cfg = InvokerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: InvokerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    debug!(overrides = cfg.overrides.len(), "config loaded");
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &InvokerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, InvokerConfig::default());
        assert_eq!(cfg.coroutine_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("invoker.toml");
        let cfg = InvokerConfig {
            coroutine_timeout_ms: 250,
            overrides: vec![OverrideConfig {
                scope: ScopeKind::Test,
                path: None,
                file: Some(PathBuf::from("tests/io.rs")),
                name: Some("reads".to_string()),
                kind: InvocationKind::Coroutine,
                environment: BuiltinEnvironment::Coroutine,
            }],
            ..InvokerConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        assert!(!path.with_extension("toml.tmp").exists());
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn parses_partial_file_with_overrides() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("invoker.toml");
        fs::write(
            &path,
            r#"
capture_output = false

[[overrides]]
scope = "directory"
path = "tests/async"
kind = "plain"
environment = "coroutine"
"#,
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert!(!cfg.capture_output);
        assert!(cfg.redirect_streams);
        assert_eq!(cfg.output_limit_bytes, 100_000);
        assert_eq!(
            cfg.overrides[0].to_scope().expect("scope"),
            Scope::Directory(PathBuf::from("tests/async"))
        );
    }

    #[test]
    fn rejects_zero_timeout() {
        let cfg = InvokerConfig {
            coroutine_timeout_ms: 0,
            ..InvokerConfig::default()
        };
        let err = cfg.validate().expect_err("invalid");
        assert!(err.to_string().contains("coroutine_timeout_ms"));
    }

    #[test]
    fn rejects_test_override_without_name() {
        let cfg = InvokerConfig {
            overrides: vec![OverrideConfig {
                scope: ScopeKind::Test,
                path: None,
                file: Some(PathBuf::from("tests/io.rs")),
                name: None,
                kind: InvocationKind::Plain,
                environment: BuiltinEnvironment::Default,
            }],
            ..InvokerConfig::default()
        };
        let err = cfg.validate().expect_err("invalid");
        assert!(format!("{err:#}").contains("overrides[0]"));
    }

    #[test]
    fn write_rejects_invalid_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("invoker.toml");
        let cfg = InvokerConfig {
            output_limit_bytes: 0,
            ..InvokerConfig::default()
        };
        assert!(write_config(&path, &cfg).is_err());
        assert!(!path.exists());
    }
}
