//! Declarative modifiers attached to a test case.
//!
//! Modifiers accumulate in a [`ModifierChain`], an ordered set that drops
//! duplicates on append. Conflicts between modifiers are not checked on
//! append; [`ModifierChain::resolve`] checks them once, when the case is
//! about to run.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::core::call_state::CallState;
use crate::core::exception::{Exception, ExceptionType};
use crate::core::resolver::{Resolution, resolve};
use crate::environment::Environment;

pub type SkipPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// One declarative instruction altering how a case runs or is judged.
#[derive(Clone)]
pub enum Modifier {
    Skip {
        reason: Option<String>,
    },
    /// Skip when the predicate holds at query time.
    SkipIf {
        predicate: SkipPredicate,
        reason: Option<String>,
    },
    /// Invert the pass/fail verdict.
    Reverse,
    Calling(Calling),
    /// Run with a specific environment instead of the configured one.
    Environment(Arc<dyn Environment>),
    GarbageCollect {
        before: bool,
        after: bool,
    },
}

impl Modifier {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip {
            reason: Some(reason.into()),
        }
    }

    pub fn skip_if(predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self::SkipIf {
            predicate: Arc::new(predicate),
            reason: None,
        }
    }

    pub fn environment(environment: impl Environment + 'static) -> Self {
        Self::Environment(Arc::new(environment))
    }

    pub fn garbage_collect(before: bool, after: bool) -> Self {
        Self::GarbageCollect { before, after }
    }

    /// True for modifiers that take part in an execution. Skip and Reverse
    /// are queries on the case and never reach a Handle.
    pub fn is_participating(&self) -> bool {
        matches!(
            self,
            Self::Calling(_) | Self::Environment(_) | Self::GarbageCollect { .. }
        )
    }

    /// Exclusive modifiers can never share an execution plan.
    pub fn is_exclusive_with(&self, other: &Modifier) -> bool {
        matches!((self, other), (Self::Calling(_), Self::Calling(_)))
    }

    /// A reason this modifier can never be satisfied on its own.
    pub fn self_conflict(&self) -> Option<String> {
        match self {
            Self::Calling(calling) => calling.self_conflict(),
            Self::GarbageCollect {
                before: false,
                after: false,
            } => Some("garbage collection requested neither before nor after".to_string()),
            _ => None,
        }
    }

    /// A reason this modifier and `other` can never be satisfied together.
    pub fn conflicts_with(&self, other: &Modifier) -> Option<String> {
        match (self, other) {
            (Self::Environment(a), Self::Environment(b)) if !Arc::ptr_eq(a, b) => Some(format!(
                "environments '{}' and '{}' requested for one case",
                a.name(),
                b.name()
            )),
            _ => None,
        }
    }
}

impl PartialEq for Modifier {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Skip { reason: a }, Self::Skip { reason: b }) => a == b,
            (
                Self::SkipIf {
                    predicate: a,
                    reason: ra,
                },
                Self::SkipIf {
                    predicate: b,
                    reason: rb,
                },
            ) => Arc::ptr_eq(a, b) && ra == rb,
            (Self::Reverse, Self::Reverse) => true,
            (Self::Calling(a), Self::Calling(b)) => a == b,
            (Self::Environment(a), Self::Environment(b)) => Arc::ptr_eq(a, b),
            (
                Self::GarbageCollect {
                    before: a,
                    after: aa,
                },
                Self::GarbageCollect {
                    before: b,
                    after: ba,
                },
            ) => a == b && aa == ba,
            _ => false,
        }
    }
}

impl fmt::Debug for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip { reason: None } => f.write_str("skip"),
            Self::Skip {
                reason: Some(reason),
            } => write!(f, "skip({reason:?})"),
            Self::SkipIf { .. } => f.write_str("skip_if(..)"),
            Self::Reverse => f.write_str("reverse"),
            Self::Calling(calling) => write!(f, "{calling}"),
            Self::Environment(env) => write!(f, "environment({})", env.name()),
            Self::GarbageCollect { before, after } => {
                write!(f, "garbage_collect(before={before}, after={after})")
            }
        }
    }
}

impl From<Calling> for Modifier {
    fn from(calling: Calling) -> Self {
        Self::Calling(calling)
    }
}

/// Arguments to inject into a call, with an optional expectation on its
/// outcome.
#[derive(Clone, Default, PartialEq)]
pub struct Calling {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
    returning: Option<Value>,
    raising: Option<ExpectedRaise>,
}

/// What a [`Calling`] modifier expects of the outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expectation<'a> {
    Unchecked,
    Returning(&'a Value),
    Raising(&'a ExpectedRaise),
}

impl Calling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_args(positional: impl IntoIterator<Item = Value>) -> Self {
        Self {
            positional: positional.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, value: Value) -> Self {
        self.positional.push(value);
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.keyword.insert(key.into(), value);
        self
    }

    pub fn returning(mut self, value: Value) -> Self {
        self.returning = Some(value);
        self
    }

    pub fn raising(mut self, expected: ExpectedRaise) -> Self {
        self.raising = Some(expected);
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self) -> &BTreeMap<String, Value> {
        &self.keyword
    }

    /// Merge the declared arguments into `state`.
    pub fn apply(&self, state: &CallState) -> CallState {
        state.with_parameters(
            self.positional.iter().cloned(),
            self.keyword
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        )
    }

    /// Resolved expectation. Only meaningful once [`Modifier::self_conflict`]
    /// returned `None`; returning wins otherwise.
    pub fn expectation(&self) -> Expectation<'_> {
        match (&self.returning, &self.raising) {
            (Some(value), _) => Expectation::Returning(value),
            (None, Some(raise)) => Expectation::Raising(raise),
            (None, None) => Expectation::Unchecked,
        }
    }

    fn self_conflict(&self) -> Option<String> {
        if self.returning.is_some() && self.raising.is_some() {
            return Some("calling expects both a return value and a raised exception".to_string());
        }
        if let Some(raise) = &self.raising
            && raise.types.is_empty()
        {
            return Some("raising expectation names no exception type".to_string());
        }
        None
    }
}

impl fmt::Display for Calling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut args: Vec<String> = self.positional.iter().map(Value::to_string).collect();
        args.extend(
            self.keyword
                .iter()
                .map(|(key, value)| format!("{key}={value}")),
        );
        write!(f, "calling({})", args.join(", "))?;
        match self.expectation() {
            Expectation::Unchecked => Ok(()),
            Expectation::Returning(value) => write!(f, ".returning({value})"),
            Expectation::Raising(raise) => {
                write!(f, ".raising({})", raise.summary().types.join("|"))
            }
        }
    }
}

impl fmt::Debug for Calling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Predicate applied to a raised exception after its type matched.
#[derive(Clone)]
pub enum RaisePredicate {
    Func(Arc<dyn Fn(&Exception) -> bool + Send + Sync>),
    Message(Regex),
}

impl RaisePredicate {
    fn matches(&self, exception: &Exception) -> bool {
        match self {
            Self::Func(func) => func(exception),
            Self::Message(regex) => regex.is_match(exception.message()),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Func(_) => "<predicate>".to_string(),
            Self::Message(regex) => format!("message ~ /{}/", regex.as_str()),
        }
    }
}

impl PartialEq for RaisePredicate {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Func(a), Self::Func(b)) => Arc::ptr_eq(a, b),
            (Self::Message(a), Self::Message(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

/// Expected raised exception: one of `types`, optionally any subtype, and
/// optionally satisfying a predicate.
#[derive(Clone, PartialEq)]
pub struct ExpectedRaise {
    types: Vec<&'static ExceptionType>,
    subtypes: bool,
    predicate: Option<RaisePredicate>,
}

impl ExpectedRaise {
    /// Expect one of `types` or any of their subtypes.
    pub fn of(types: impl IntoIterator<Item = &'static ExceptionType>) -> Self {
        Self {
            types: types.into_iter().collect(),
            subtypes: true,
            predicate: None,
        }
    }

    /// Require an exact type match.
    pub fn exact(mut self) -> Self {
        self.subtypes = false;
        self
    }

    pub fn matching(
        mut self,
        predicate: impl Fn(&Exception) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(RaisePredicate::Func(Arc::new(predicate)));
        self
    }

    pub fn message_matches(mut self, regex: Regex) -> Self {
        self.predicate = Some(RaisePredicate::Message(regex));
        self
    }

    pub fn matches(&self, exception: &Exception) -> bool {
        let type_matches = self.types.iter().any(|ty| {
            if self.subtypes {
                exception.is_instance_of(ty)
            } else {
                exception.ty() == *ty
            }
        });
        type_matches
            && self
                .predicate
                .as_ref()
                .is_none_or(|predicate| predicate.matches(exception))
    }

    pub fn summary(&self) -> ExpectedRaiseSummary {
        ExpectedRaiseSummary {
            types: self.types.iter().map(|ty| ty.name().to_string()).collect(),
            subtypes: self.subtypes,
            predicate: self.predicate.as_ref().map(RaisePredicate::describe),
        }
    }
}

impl fmt::Debug for ExpectedRaise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpectedRaise")
            .field("summary", &self.summary())
            .finish()
    }
}

/// Serializable description of an [`ExpectedRaise`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpectedRaiseSummary {
    pub types: Vec<String>,
    pub subtypes: bool,
    pub predicate: Option<String>,
}

/// Ordered, deduplicated set of modifiers attached to one case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifierChain {
    modifiers: Vec<Modifier>,
}

impl ModifierChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a modifier unless an equal one is already present. Returns
    /// whether it was added.
    pub fn append(&mut self, modifier: Modifier) -> bool {
        if self.modifiers.contains(&modifier) {
            return false;
        }
        self.modifiers.push(modifier);
        true
    }

    pub fn with(mut self, modifier: impl Into<Modifier>) -> Self {
        self.append(modifier.into());
        self
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Modifier> {
        self.modifiers.iter()
    }

    pub fn len(&self) -> usize {
        self.modifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty()
    }

    /// Reason of the first active skip modifier, if any.
    pub fn skip_reason(&self) -> Option<String> {
        self.modifiers.iter().find_map(|modifier| match modifier {
            Modifier::Skip { reason } => {
                Some(reason.clone().unwrap_or_else(|| "skipped".to_string()))
            }
            Modifier::SkipIf { predicate, reason } if predicate() => Some(
                reason
                    .clone()
                    .unwrap_or_else(|| "skip condition met".to_string()),
            ),
            _ => None,
        })
    }

    pub fn is_reversed(&self) -> bool {
        self.modifiers.contains(&Modifier::Reverse)
    }

    /// Check conflicts and partition into execution plans.
    pub fn resolve(&self) -> Resolution {
        resolve(&self.modifiers)
    }
}

impl FromIterator<Modifier> for ModifierChain {
    fn from_iter<I: IntoIterator<Item = Modifier>>(iter: I) -> Self {
        let mut chain = Self::new();
        for modifier in iter {
            chain.append(modifier);
        }
        chain
    }
}

impl<'a> IntoIterator for &'a ModifierChain {
    type Item = &'a Modifier;
    type IntoIter = std::slice::Iter<'a, Modifier>;

    fn into_iter(self) -> Self::IntoIter {
        self.modifiers.iter()
    }
}
