//! Test cases as received from discovery.
//!
//! A case is immutable once built: a name, the file it came from, the
//! callable to invoke, and the modifiers attached to it. The invocation shape
//! is a static property of the [`Body`] variant.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::LocalBoxFuture;
use futures::stream::LocalBoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::exception::Exception;
use crate::core::modifier::{Modifier, ModifierChain};
use crate::core::signature::{Arguments, Parameter, ParameterKind, Signature};

/// What a body produces: a value, or a raised exception.
pub type Outcome = Result<Value, Exception>;

pub type PlainFn = Arc<dyn Fn(&Arguments) -> Outcome + Send + Sync>;
pub type GeneratorFn = Arc<dyn Fn(&Arguments) -> Box<dyn Iterator<Item = Outcome>> + Send + Sync>;
pub type CoroutineFn = Arc<dyn Fn(Arguments) -> LocalBoxFuture<'static, Outcome> + Send + Sync>;
pub type CoroutineGeneratorFn =
    Arc<dyn Fn(Arguments) -> LocalBoxStream<'static, Outcome> + Send + Sync>;

/// Statically known invocation shape of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    Plain,
    Generator,
    Coroutine,
    CoroutineGenerator,
}

impl InvocationKind {
    pub fn is_coroutine(self) -> bool {
        matches!(self, Self::Coroutine | Self::CoroutineGenerator)
    }
}

#[derive(Clone)]
pub enum Body {
    Plain(PlainFn),
    /// Yields values; a drained generator returns the array of its items.
    Generator(GeneratorFn),
    Coroutine(CoroutineFn),
    CoroutineGenerator(CoroutineGeneratorFn),
}

impl Body {
    pub fn kind(&self) -> InvocationKind {
        match self {
            Self::Plain(_) => InvocationKind::Plain,
            Self::Generator(_) => InvocationKind::Generator,
            Self::Coroutine(_) => InvocationKind::Coroutine,
            Self::CoroutineGenerator(_) => InvocationKind::CoroutineGenerator,
        }
    }
}

/// A body plus its declared parameter shape.
#[derive(Clone)]
pub struct Callable {
    signature: Signature,
    body: Body,
    doc: Option<String>,
}

impl Callable {
    pub fn new(body: Body) -> Self {
        Self {
            signature: Signature::default(),
            body,
            doc: None,
        }
    }

    pub fn plain(func: impl Fn(&Arguments) -> Outcome + Send + Sync + 'static) -> Self {
        Self::new(Body::Plain(Arc::new(func)))
    }

    pub fn generator<I>(func: impl Fn(&Arguments) -> I + Send + Sync + 'static) -> Self
    where
        I: Iterator<Item = Outcome> + 'static,
    {
        Self::new(Body::Generator(Arc::new(move |args: &Arguments| {
            Box::new(func(args)) as Box<dyn Iterator<Item = Outcome>>
        })))
    }

    pub fn coroutine(
        func: impl Fn(Arguments) -> LocalBoxFuture<'static, Outcome> + Send + Sync + 'static,
    ) -> Self {
        Self::new(Body::Coroutine(Arc::new(func)))
    }

    pub fn coroutine_generator(
        func: impl Fn(Arguments) -> LocalBoxStream<'static, Outcome> + Send + Sync + 'static,
    ) -> Self {
        Self::new(Body::CoroutineGenerator(Arc::new(func)))
    }

    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    /// Append a positional-or-keyword parameter without a default.
    pub fn param(self, name: impl Into<String>) -> Self {
        self.with_param(Parameter::new(name, ParameterKind::PositionalOrKeyword))
    }

    pub fn with_param(mut self, param: Parameter) -> Self {
        let mut params = self.signature.params().to_vec();
        params.push(param);
        self.signature = Signature::new(params);
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn kind(&self) -> InvocationKind {
        self.body.kind()
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("kind", &self.kind())
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// A discovered test case.
#[derive(Debug, Clone)]
pub struct TestCase {
    name: String,
    file: PathBuf,
    callable: Callable,
    modifier: Option<ModifierChain>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, file: impl Into<PathBuf>, callable: Callable) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            callable,
            modifier: None,
        }
    }

    /// Attach a modifier, merging into the existing chain.
    pub fn with_modifier(mut self, modifier: impl Into<Modifier>) -> Self {
        self.modifier
            .get_or_insert_with(ModifierChain::new)
            .append(modifier.into());
        self
    }

    pub fn with_modifiers(mut self, chain: ModifierChain) -> Self {
        self.modifier = Some(chain);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn callable(&self) -> &Callable {
        &self.callable
    }

    pub fn modifier(&self) -> Option<&ModifierChain> {
        self.modifier.as_ref()
    }

    /// Skip reason, when any skip modifier applies.
    pub fn skip(&self) -> Option<String> {
        self.modifier.as_ref().and_then(ModifierChain::skip_reason)
    }

    pub fn reverse(&self) -> bool {
        self.modifier
            .as_ref()
            .is_some_and(ModifierChain::is_reversed)
    }

    pub fn into_shared(self) -> Arc<TestCase> {
        Arc::new(self)
    }
}
