//! Declared parameter shapes and binding of call states against them.
//!
//! Binding exhausts the declared parameters against the supplied arguments
//! and collects whatever is left unsatisfied or unclaimed. A mismatch is
//! reported before the body is invoked.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::call_state::CallState;
use crate::core::exception::Exception;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    PositionalOnly,
    PositionalOrKeyword,
    KeywordOnly,
    VarPositional,
    VarKeyword,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
    pub has_default: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            has_default: false,
        }
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    fn is_required(&self) -> bool {
        !self.has_default
            && !matches!(
                self.kind,
                ParameterKind::VarPositional | ParameterKind::VarKeyword
            )
    }
}

/// Ordered parameter descriptors for a callable. An empty signature accepts
/// no arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Signature {
    params: Vec<Parameter>,
}

impl Signature {
    pub fn new(params: Vec<Parameter>) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Bind a call state to the declared parameters.
    pub fn bind(&self, state: &CallState) -> Result<Arguments, ParameterMismatch> {
        let mut mismatch = ParameterMismatch::default();
        let mut arguments = Arguments::default();

        let mut positional = state.positional().iter();
        for param in &self.params {
            match param.kind {
                ParameterKind::PositionalOnly | ParameterKind::PositionalOrKeyword => {
                    if let Some(value) = positional.next() {
                        arguments.named.insert(param.name.clone(), value.clone());
                    }
                }
                ParameterKind::VarPositional => {
                    arguments.rest.extend(positional.by_ref().cloned());
                }
                ParameterKind::KeywordOnly | ParameterKind::VarKeyword => {}
            }
        }
        let leftover = positional.count();
        if leftover > 0 {
            mismatch
                .unexpected
                .push(format!("{leftover} extra positional argument(s)"));
        }

        let var_keyword = self
            .params
            .iter()
            .any(|param| param.kind == ParameterKind::VarKeyword);
        for (key, value) in state.keyword() {
            let target = self.params.iter().find(|param| {
                param.name == *key
                    && matches!(
                        param.kind,
                        ParameterKind::PositionalOrKeyword | ParameterKind::KeywordOnly
                    )
            });
            match target {
                Some(param) if arguments.named.contains_key(&param.name) => {
                    mismatch.duplicated.push(key.clone());
                }
                Some(param) => {
                    arguments.named.insert(param.name.clone(), value.clone());
                }
                None if var_keyword => {
                    arguments.extra.insert(key.clone(), value.clone());
                }
                None => mismatch.unexpected.push(key.clone()),
            }
        }

        for param in &self.params {
            if param.is_required() && !arguments.named.contains_key(&param.name) {
                mismatch.missing.push(param.name.clone());
            }
        }

        if mismatch.is_empty() {
            Ok(arguments)
        } else {
            Err(mismatch)
        }
    }
}

/// Why a call state could not be bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParameterMismatch {
    /// Required parameters left unsatisfied.
    pub missing: Vec<String>,
    /// Supplied arguments no parameter claims.
    pub unexpected: Vec<String>,
    /// Parameters supplied both positionally and by keyword.
    pub duplicated: Vec<String>,
}

impl ParameterMismatch {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.duplicated.is_empty()
    }
}

impl std::fmt::Display for ParameterMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing: {}", self.missing.join(", ")));
        }
        if !self.unexpected.is_empty() {
            parts.push(format!("unexpected: {}", self.unexpected.join(", ")));
        }
        if !self.duplicated.is_empty() {
            parts.push(format!("multiple values for: {}", self.duplicated.join(", ")));
        }
        f.write_str(&parts.join("; "))
    }
}

/// Arguments bound to a callable's parameters, as seen by the body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Arguments {
    named: BTreeMap<String, Value>,
    rest: Vec<Value>,
    extra: BTreeMap<String, Value>,
}

impl Arguments {
    /// Typed access to a bound parameter. Raises `TypeError` when the
    /// parameter is unbound or the value does not deserialize.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, Exception> {
        let value = self
            .named
            .get(name)
            .ok_or_else(|| Exception::type_error(format!("argument '{name}' is not bound")))?;
        serde_json::from_value(value.clone())
            .map_err(|err| Exception::type_error(format!("argument '{name}': {err}")))
    }

    /// Like [`Arguments::get`], but `None` for an unbound parameter with a default.
    pub fn get_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, Exception> {
        if !self.named.contains_key(name) {
            return Ok(None);
        }
        self.get(name).map(Some)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    /// Values collected by a variadic-positional parameter.
    pub fn rest(&self) -> &[Value] {
        &self.rest
    }

    /// Values collected by a variadic-keyword parameter.
    pub fn extra(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }
}
