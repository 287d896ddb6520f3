//! Test-only helpers for building cases, plans and recording contexts.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::case::{Callable, TestCase};
use crate::config::InvokerConfig;
use crate::context::collect::{CollectPoint, Collector, TracingCollector};
use crate::context::{Context, Entered, Exited, Halt};
use crate::core::call_state::{CallState, ResultState};
use crate::core::exception::{Exception, RUNTIME_ERROR};
use crate::core::modifier::Modifier;
use crate::core::outcome::{CaseResult, Report};
use crate::core::resolver::{ExecutionPlan, Resolution, resolve};
use crate::core::signature::Arguments;
use crate::environment::{DefaultEnvironment, Environment};
use crate::handle::{HandleOptions, Phase};

/// Default config without descriptor redirects. Tests run under libtest,
/// which writes its own progress to the process streams concurrently.
pub fn quiet_config() -> InvokerConfig {
    InvokerConfig {
        redirect_streams: false,
        ..InvokerConfig::default()
    }
}

pub fn quiet_options() -> HandleOptions {
    HandleOptions::from_config(&quiet_config(), Rc::new(TracingCollector))
}

/// A shared case whose body returns `value` and takes no arguments.
pub fn returning_case(name: &str, value: Value) -> Arc<TestCase> {
    TestCase::new(
        name,
        "tests/cases.rs",
        Callable::plain(move |_| Ok(value.clone())),
    )
    .into_shared()
}

/// A case whose body takes `x` and returns `x * x`.
pub fn square_case(name: &str) -> TestCase {
    let callable = Callable::plain(|args: &Arguments| {
        let x: i64 = args.get("x")?;
        Ok(json!(x * x))
    })
    .param("x");
    TestCase::new(name, "tests/cases.rs", callable)
}

/// A case whose body raises `exception`.
pub fn raising_case(name: &str, exception: Exception) -> TestCase {
    TestCase::new(
        name,
        "tests/cases.rs",
        Callable::plain(move |_| Err(exception.clone())),
    )
}

/// The first plan for `modifiers`. Panics on a conflict.
pub fn plan(modifiers: &[Modifier]) -> ExecutionPlan {
    match resolve(modifiers) {
        Resolution::Plans(mut plans) => plans.remove(0),
        Resolution::Conflict(conflict) => panic!("unexpected conflict: {conflict}"),
    }
}

#[derive(Debug, Default)]
pub struct RecordingCollector {
    points: RefCell<Vec<CollectPoint>>,
}

impl RecordingCollector {
    pub fn points(&self) -> Vec<CollectPoint> {
        self.points.borrow().clone()
    }
}

impl Collector for RecordingCollector {
    fn collect(&self, point: CollectPoint) {
        self.points.borrow_mut().push(point);
    }
}

/// Shared log of `label:phase` entries.
pub type PhaseLog = Rc<RefCell<Vec<String>>>;

pub fn phase_log() -> PhaseLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// Context that logs every phase it sees, optionally vetoing one phase or
/// panicking in `close`.
pub struct RecordingContext {
    label: &'static str,
    log: PhaseLog,
    veto: Option<Phase>,
    panic_on_close: bool,
}

impl RecordingContext {
    pub fn new(label: &'static str, log: &PhaseLog) -> Self {
        Self {
            label,
            log: Rc::clone(log),
            veto: None,
            panic_on_close: false,
        }
    }

    pub fn vetoing(mut self, phase: Phase) -> Self {
        self.veto = Some(phase);
        self
    }

    pub fn panicking_on_close(mut self) -> Self {
        self.panic_on_close = true;
        self
    }

    pub fn boxed(self) -> Box<dyn Context> {
        Box::new(self)
    }

    fn record(&self, phase: &str) {
        self.log.borrow_mut().push(format!("{}:{phase}", self.label));
    }

    fn halt_if(&self, phase: Phase) -> Option<Halt> {
        (self.veto == Some(phase)).then(|| {
            Halt::report(Report::unexpected(Exception::new(
                &RUNTIME_ERROR,
                format!("vetoed by {}", self.label),
            )))
        })
    }
}

impl Context for RecordingContext {
    fn name(&self) -> &'static str {
        self.label
    }

    fn start(&mut self) -> Option<Halt> {
        self.record("start");
        self.halt_if(Phase::Start)
    }

    fn enter(&mut self, _state: &CallState) -> Entered {
        self.record("enter");
        (self.halt_if(Phase::Enter), None)
    }

    fn exit(&mut self, _state: &ResultState) -> Exited {
        self.record("exit");
        (self.halt_if(Phase::Exit), None)
    }

    fn close(&mut self, result: Option<&mut CaseResult>) {
        let suffix = if result.is_some() { "close" } else { "close(none)" };
        self.record(suffix);
        if self.panic_on_close {
            panic!("{} failed to close", self.label);
        }
    }
}

/// Context that appends keyword arguments on enter.
pub struct InjectingContext {
    keyword: Vec<(String, Value)>,
}

impl InjectingContext {
    pub fn new(keyword: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
        Self {
            keyword: keyword
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        }
    }
}

impl Context for InjectingContext {
    fn name(&self) -> &'static str {
        "injecting"
    }

    fn enter(&mut self, state: &CallState) -> Entered {
        (None, Some(state.with_parameters(Vec::new(), self.keyword.clone())))
    }
}

/// Default behavior under another name, for override and selection tests.
#[derive(Debug)]
pub struct NamedEnvironment {
    name: &'static str,
}

impl NamedEnvironment {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Environment for NamedEnvironment {
    fn name(&self) -> &str {
        self.name
    }

    fn run(&self, callable: &Callable, arguments: Arguments) -> Result<ResultState> {
        DefaultEnvironment.run(callable, arguments)
    }
}

/// Environment whose host always fails.
#[derive(Debug, Default)]
pub struct BrokenEnvironment;

impl Environment for BrokenEnvironment {
    fn name(&self) -> &str {
        "broken"
    }

    fn run(&self, _callable: &Callable, _arguments: Arguments) -> Result<ResultState> {
        Err(anyhow!("host runtime unavailable"))
    }
}
