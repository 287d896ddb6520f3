//! Immutable argument and outcome states threaded through a Handle.
//!
//! Contexts never mutate a state in place: every transformation returns a new
//! value, and the Handle keeps both the original and the final version.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::core::exception::Exception;

/// Accumulated positional and keyword arguments for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallState {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl CallState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self) -> &BTreeMap<String, Value> {
        &self.keyword
    }

    /// True when no arguments have been supplied.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// Merge parameters into a new state.
    ///
    /// Positional arguments are appended after the existing ones; keyword
    /// arguments are a right-biased union (later values win).
    pub fn with_parameters<P, K>(&self, positional: P, keyword: K) -> Self
    where
        P: IntoIterator<Item = Value>,
        K: IntoIterator<Item = (String, Value)>,
    {
        let mut next = self.clone();
        next.positional.extend(positional);
        next.keyword.extend(keyword);
        next
    }
}

/// Raw outcome of an invocation: exactly one of nothing, a returned value, or
/// a raised exception.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", content = "payload", rename_all = "snake_case")]
pub enum ResultState {
    /// Nothing to classify: either the body never ran or its outcome was
    /// already accounted for by a context.
    #[default]
    None,
    Returned(Value),
    Raised(Exception),
}

impl ResultState {
    pub fn returned(value: Value) -> Self {
        Self::Returned(value)
    }

    pub fn raised(exception: Exception) -> Self {
        Self::Raised(exception)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Self::Raised(exc) => Some(exc),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Returned(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Result<Value, Exception>> for ResultState {
    fn from(outcome: Result<Value, Exception>) -> Self {
        match outcome {
            Ok(value) => Self::Returned(value),
            Err(exc) => Self::Raised(exc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kw(key: &str, value: Value) -> Vec<(String, Value)> {
        vec![(key.to_string(), value)]
    }

    #[test]
    fn empty_state_is_empty() {
        assert!(CallState::new().is_empty());
    }

    #[test]
    fn with_no_parameters_is_identity() {
        let state = CallState::new().with_parameters([json!(1)], kw("k", json!(2)));
        assert_eq!(state.with_parameters([], []), state);
        assert_eq!(CallState::new().with_parameters([], []), CallState::new());
    }

    #[test]
    fn positional_appends_and_keyword_later_wins() {
        let state = CallState::new()
            .with_parameters([json!("a")], kw("k", json!(1)))
            .with_parameters([json!("b")], kw("k", json!(2)));
        assert_eq!(state.positional(), &[json!("a"), json!("b")]);
        assert_eq!(state.keyword().get("k"), Some(&json!(2)));
        assert_eq!(state.keyword().len(), 1);
    }

    #[test]
    fn with_parameters_leaves_original_untouched() {
        let original = CallState::new();
        let next = original.with_parameters([json!(1)], []);
        assert!(original.is_empty());
        assert!(!next.is_empty());
    }

    #[test]
    fn converts_from_body_outcome() {
        assert_eq!(
            ResultState::from(Ok(json!(3))),
            ResultState::Returned(json!(3))
        );
        let raised = ResultState::from(Err(Exception::value_error("x")));
        assert!(raised.exception().is_some());
        assert!(raised.value().is_none());
    }
}
