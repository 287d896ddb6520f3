//! Scoped environment overrides.
//!
//! The manager is configuration, not logic: a map from (scope, kind) to an
//! environment, consulted most specific first. It is immutable; every
//! `with_override` returns a new manager sharing nothing mutable with the
//! old one.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::case::{InvocationKind, TestCase};
use crate::config::{BuiltinEnvironment, InvokerConfig};
use crate::environment::{CoroutineEnvironment, DefaultEnvironment, Environment};

/// Where an override applies, from least to most specific.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scope {
    Global,
    Directory(PathBuf),
    File(PathBuf),
    Test { file: PathBuf, name: String },
}

#[derive(Clone)]
pub struct EnvironmentManager {
    overrides: Arc<BTreeMap<(Scope, InvocationKind), Arc<dyn Environment>>>,
    default: Arc<dyn Environment>,
    coroutine: Arc<dyn Environment>,
}

impl Default for EnvironmentManager {
    fn default() -> Self {
        Self::with_builtins(DefaultEnvironment, CoroutineEnvironment::default())
    }
}

impl EnvironmentManager {
    pub fn with_builtins(
        default: impl Environment + 'static,
        coroutine: impl Environment + 'static,
    ) -> Self {
        Self {
            overrides: Arc::new(BTreeMap::new()),
            default: Arc::new(default),
            coroutine: Arc::new(coroutine),
        }
    }

    /// Built-ins from the config, plus every `[[overrides]]` entry.
    pub fn from_config(cfg: &InvokerConfig) -> Result<Self> {
        cfg.validate()?;
        let mut manager = Self::with_builtins(
            DefaultEnvironment,
            CoroutineEnvironment::new(cfg.coroutine_timeout()),
        );
        for entry in &cfg.overrides {
            let environment = match entry.environment {
                BuiltinEnvironment::Default => Arc::clone(&manager.default),
                BuiltinEnvironment::Coroutine => Arc::clone(&manager.coroutine),
            };
            manager = manager.with_override(entry.to_scope()?, entry.kind, environment);
        }
        Ok(manager)
    }

    /// A new manager with `environment` running bodies of `kind` in `scope`.
    /// A later override for the same scope and kind replaces the earlier one.
    pub fn with_override(
        &self,
        scope: Scope,
        kind: InvocationKind,
        environment: Arc<dyn Environment>,
    ) -> Self {
        let mut overrides = (*self.overrides).clone();
        overrides.insert((scope, kind), environment);
        Self {
            overrides: Arc::new(overrides),
            default: Arc::clone(&self.default),
            coroutine: Arc::clone(&self.coroutine),
        }
    }

    /// The built-in environment for a kind, ignoring overrides.
    pub fn builtin(&self, kind: InvocationKind) -> Arc<dyn Environment> {
        if kind.is_coroutine() {
            Arc::clone(&self.coroutine)
        } else {
            Arc::clone(&self.default)
        }
    }

    /// Most specific override for the case's body kind: test, file, deepest
    /// enclosing directory, global; then the built-in.
    pub fn get_environment_for(&self, case: &TestCase) -> Arc<dyn Environment> {
        let kind = case.callable().kind();
        let file = case.file().to_path_buf();
        let test = Scope::Test {
            file: file.clone(),
            name: case.name().to_string(),
        };
        let directories = case
            .file()
            .ancestors()
            .skip(1)
            .map(|dir| Scope::Directory(dir.to_path_buf()));
        let candidates = [test, Scope::File(file)]
            .into_iter()
            .chain(directories)
            .chain([Scope::Global]);
        for scope in candidates {
            if let Some(environment) = self.overrides.get(&(scope, kind)) {
                debug!(environment = environment.name(), "environment override applies");
                return Arc::clone(environment);
            }
        }
        self.builtin(kind)
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

impl std::fmt::Debug for EnvironmentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let overrides: Vec<_> = self
            .overrides
            .iter()
            .map(|((scope, kind), env)| (scope, kind, env.name()))
            .collect();
        f.debug_struct("EnvironmentManager")
            .field("overrides", &overrides)
            .field("default", &self.default.name())
            .field("coroutine", &self.coroutine.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::Callable;
    use crate::config::{OverrideConfig, ScopeKind};
    use crate::test_support::NamedEnvironment;
    use futures::FutureExt;
    use serde_json::json;

    fn plain_case(file: &str, name: &str) -> TestCase {
        TestCase::new(name, file, Callable::plain(|_| Ok(json!(null))))
    }

    fn named(name: &'static str) -> Arc<dyn Environment> {
        Arc::new(NamedEnvironment::new(name))
    }

    #[test]
    fn builtins_follow_kind() {
        let manager = EnvironmentManager::default();
        assert_eq!(
            manager.get_environment_for(&plain_case("t.rs", "a")).name(),
            "default"
        );
        let coroutine = TestCase::new(
            "c",
            "t.rs",
            Callable::coroutine(|_| async { Ok(json!(1)) }.boxed_local()),
        );
        assert_eq!(manager.get_environment_for(&coroutine).name(), "coroutine");
    }

    #[test]
    fn most_specific_scope_wins() {
        let kind = InvocationKind::Plain;
        let manager = EnvironmentManager::default()
            .with_override(Scope::Global, kind, named("global"))
            .with_override(Scope::Directory("tests".into()), kind, named("dir"))
            .with_override(Scope::Directory("tests/unit".into()), kind, named("subdir"))
            .with_override(Scope::File("tests/unit/a.rs".into()), kind, named("file"))
            .with_override(
                Scope::Test {
                    file: "tests/unit/a.rs".into(),
                    name: "special".to_string(),
                },
                kind,
                named("test"),
            );
        let pick = |file: &str, name: &str| {
            manager
                .get_environment_for(&plain_case(file, name))
                .name()
                .to_string()
        };
        assert_eq!(pick("tests/unit/a.rs", "special"), "test");
        assert_eq!(pick("tests/unit/a.rs", "other"), "file");
        assert_eq!(pick("tests/unit/b.rs", "other"), "subdir");
        assert_eq!(pick("tests/c.rs", "other"), "dir");
        assert_eq!(pick("src/d.rs", "other"), "global");
    }

    #[test]
    fn overrides_are_per_kind() {
        let manager = EnvironmentManager::default().with_override(
            Scope::Global,
            InvocationKind::Generator,
            named("gen"),
        );
        assert_eq!(
            manager.get_environment_for(&plain_case("t.rs", "a")).name(),
            "default"
        );
    }

    #[test]
    fn with_override_leaves_original_untouched() {
        let base = EnvironmentManager::default();
        let derived = base.with_override(Scope::Global, InvocationKind::Plain, named("x"));
        assert!(base.is_empty());
        assert_eq!(derived.len(), 1);
    }

    #[test]
    fn from_config_maps_builtin_names() {
        let cfg = InvokerConfig {
            coroutine_timeout_ms: 5,
            overrides: vec![OverrideConfig {
                scope: ScopeKind::File,
                path: Some("tests/a.rs".into()),
                file: None,
                name: None,
                kind: InvocationKind::Plain,
                environment: BuiltinEnvironment::Coroutine,
            }],
            ..InvokerConfig::default()
        };
        let manager = EnvironmentManager::from_config(&cfg).expect("manager");
        assert_eq!(
            manager.get_environment_for(&plain_case("tests/a.rs", "t")).name(),
            "coroutine"
        );
        assert_eq!(
            manager.get_environment_for(&plain_case("tests/b.rs", "t")).name(),
            "default"
        );
    }
}
