//! Per-plan orchestration: one Handle drives one invocation of one case.
//!
//! ```text
//! Created -> ContextsCollected -> Started -> Entered -> ParameterChecked
//!         -> Invoked -> Exited -> Closed
//! ```
//!
//! Any of start, enter, the parameter check and exit may veto, ending in
//! `VetoedAt(phase)`. A panicking context or a fatal environment error ends
//! in `Faulted`. Every context whose `start` ran is closed in all cases.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, error, instrument, warn};

use crate::case::TestCase;
use crate::config::InvokerConfig;
use crate::context::{
    CallingContext, Collector, Context, GarbageCollectContext, Halt, OutputCapture,
    TracingCollector,
};
use crate::core::call_state::{CallState, ResultState};
use crate::core::modifier::Modifier;
use crate::core::outcome::{CaseResult, Report};
use crate::core::resolver::ExecutionPlan;
use crate::environment::Environment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Enter,
    ParameterCheck,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    Created,
    ContextsCollected,
    Started,
    Entered,
    ParameterChecked,
    Invoked,
    Exited,
    Closed,
    VetoedAt(Phase),
    Faulted,
}

impl HandleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::VetoedAt(_) | Self::Faulted)
    }
}

/// Settings shared by every Handle of one invoker.
#[derive(Clone)]
pub struct HandleOptions {
    pub capture_output: bool,
    pub redirect_streams: bool,
    pub output_limit_bytes: usize,
    pub collector: Rc<dyn Collector>,
}

impl HandleOptions {
    pub fn from_config(cfg: &InvokerConfig, collector: Rc<dyn Collector>) -> Self {
        Self {
            capture_output: cfg.capture_output,
            redirect_streams: cfg.redirect_streams,
            output_limit_bytes: cfg.output_limit_bytes,
            collector,
        }
    }
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self::from_config(&InvokerConfig::default(), Rc::new(TracingCollector))
    }
}

/// What remains of a Handle after it ran, kept on the result for rendering.
#[derive(Debug, Clone)]
pub struct HandleRecord {
    modifiers: Vec<Modifier>,
    environment: String,
    original_call: CallState,
    final_call: CallState,
    original_result: ResultState,
    final_result: ResultState,
    state: HandleState,
}

impl HandleRecord {
    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Call state before any context entered.
    pub fn original_call(&self) -> &CallState {
        &self.original_call
    }

    /// Call state the body was (or would have been) invoked with.
    pub fn final_call(&self) -> &CallState {
        &self.final_call
    }

    /// Raw outcome from the environment.
    pub fn original_result(&self) -> &ResultState {
        &self.original_result
    }

    /// Outcome after every exit hook rewrote it.
    pub fn final_result(&self) -> &ResultState {
        &self.final_result
    }

    pub fn state(&self) -> HandleState {
        self.state
    }
}

pub struct Handle {
    case: Arc<TestCase>,
    plan: ExecutionPlan,
    environment: Arc<dyn Environment>,
    options: HandleOptions,
    extra: Vec<Box<dyn Context>>,
    contexts: Vec<Box<dyn Context>>,
    state: HandleState,
    original_call: CallState,
    final_call: CallState,
    original_result: ResultState,
    final_result: ResultState,
}

impl Handle {
    pub fn new(
        case: Arc<TestCase>,
        plan: ExecutionPlan,
        environment: Arc<dyn Environment>,
        options: HandleOptions,
    ) -> Self {
        Self {
            case,
            plan,
            environment,
            options,
            extra: Vec::new(),
            contexts: Vec::new(),
            state: HandleState::Created,
            original_call: CallState::new(),
            final_call: CallState::new(),
            original_result: ResultState::None,
            final_result: ResultState::None,
        }
    }

    /// Contexts registered after the modifier contexts.
    pub fn with_contexts(mut self, contexts: Vec<Box<dyn Context>>) -> Self {
        self.extra.extend(contexts);
        self
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Run all four phases and fold the outcome into a result.
    ///
    /// Errors are fatal host failures only; the body's own failures are
    /// reports on the returned result.
    #[instrument(
        skip_all,
        fields(case = %self.case.name(), environment = %self.environment.name())
    )]
    pub fn run(mut self) -> Result<CaseResult> {
        self.collect_contexts();

        let mut started = 0;
        let driven = catch_unwind(AssertUnwindSafe(|| self.drive(&mut started)));
        let mut result = match driven {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                error!(err = %format!("{err:#}"), "invocation faulted");
                self.transition(HandleState::Faulted);
                self.close_started(started, None);
                return Err(err);
            }
            Err(payload) => {
                error!("context panicked during invocation");
                self.transition(HandleState::Faulted);
                self.close_started(started, None);
                resume_unwind(payload);
            }
        };

        if let Some(payload) = self.close_started(started, Some(&mut result)) {
            self.transition(HandleState::Faulted);
            resume_unwind(payload);
        }
        if !self.state.is_terminal() {
            self.transition(HandleState::Closed);
        }

        let continuing = self.plan.is_continuing();
        let reverse = self.case.reverse();
        let mut result = result.with_continuing(continuing).with_reverse(reverse);
        result.set_handle(self.into_record());
        Ok(result)
    }

    fn collect_contexts(&mut self) {
        let capture = OutputCapture::new(
            self.options.capture_output,
            self.options.output_limit_bytes,
        )
        .redirecting_streams(self.options.redirect_streams);
        let mut contexts: Vec<Box<dyn Context>> = vec![Box::new(capture)];
        for modifier in self.plan.modifiers() {
            match modifier {
                Modifier::Calling(calling) => {
                    contexts.push(Box::new(CallingContext::new(calling.clone())));
                }
                Modifier::GarbageCollect { before, after } => {
                    contexts.push(Box::new(GarbageCollectContext::new(
                        *before,
                        *after,
                        Rc::clone(&self.options.collector),
                    )));
                }
                Modifier::Skip { .. }
                | Modifier::SkipIf { .. }
                | Modifier::Reverse
                | Modifier::Environment(_) => {}
            }
        }
        contexts.append(&mut self.extra);
        self.contexts = contexts;
        self.transition(HandleState::ContextsCollected);
    }

    /// Start, enter, check, invoke, exit. `started` counts contexts whose
    /// `start` ran, including one that vetoed.
    fn drive(&mut self, started: &mut usize) -> Result<CaseResult> {
        let result = CaseResult::new(Arc::clone(&self.case));

        let mut vetoed = None;
        for (index, context) in self.contexts.iter_mut().enumerate() {
            *started = index + 1;
            if let Some(halt) = context.start() {
                warn!(context = context.name(), "start vetoed");
                vetoed = Some(halt);
                break;
            }
        }
        if let Some(halt) = vetoed {
            return Ok(self.veto(Phase::Start, result, halt));
        }
        self.transition(HandleState::Started);

        let mut call = self.original_call.clone();
        let mut vetoed = None;
        for context in &mut self.contexts {
            let (halt, next) = context.enter(&call);
            if let Some(next) = next {
                call = next;
            }
            if let Some(halt) = halt {
                warn!(context = context.name(), "enter vetoed");
                vetoed = Some(halt);
                break;
            }
        }
        self.final_call = call;
        if let Some(halt) = vetoed {
            return Ok(self.veto(Phase::Enter, result, halt));
        }
        self.transition(HandleState::Entered);

        let case = Arc::clone(&self.case);
        let callable = case.callable();
        let arguments = match callable.signature().bind(&self.final_call) {
            Ok(arguments) => arguments,
            Err(mismatch) => {
                warn!(mismatch = %mismatch, "parameter check failed");
                let halt = Halt::report(Report::ParameterMismatch(mismatch));
                return Ok(self.veto(Phase::ParameterCheck, result, halt));
            }
        };
        self.transition(HandleState::ParameterChecked);

        let raw = self.environment.run(callable, arguments)?;
        self.original_result = raw.clone();
        self.transition(HandleState::Invoked);

        let mut state = raw;
        let mut vetoed = None;
        for context in self.contexts.iter_mut().rev() {
            let (halt, next) = context.exit(&state);
            if let Some(next) = next {
                state = next;
            }
            if let Some(halt) = halt {
                debug!(context = context.name(), "exit halted");
                vetoed = Some(halt);
                break;
            }
        }
        self.final_result = state;
        if let Some(halt) = vetoed {
            return Ok(self.veto(Phase::Exit, result, halt));
        }
        self.transition(HandleState::Exited);

        Ok(match &self.final_result {
            ResultState::Raised(exc) if exc.is_assertion() => {
                result.with_reports([Report::Asserting {
                    exception: exc.clone(),
                }])
            }
            ResultState::Raised(exc) => result.with_reports([Report::unexpected(exc.clone())]),
            ResultState::None | ResultState::Returned(_) => result,
        })
    }

    fn veto(&mut self, phase: Phase, result: CaseResult, halt: Halt) -> CaseResult {
        self.transition(HandleState::VetoedAt(phase));
        result.with_reports(halt.reports)
    }

    /// Close started contexts in reverse. Each close runs even if an
    /// earlier one panicked; the first panic is returned for resuming.
    fn close_started(
        &mut self,
        started: usize,
        mut result: Option<&mut CaseResult>,
    ) -> Option<Box<dyn Any + Send>> {
        let mut first_panic = None;
        for context in self.contexts[..started].iter_mut().rev() {
            let closing = catch_unwind(AssertUnwindSafe(|| context.close(result.as_deref_mut())));
            if let Err(payload) = closing {
                error!(context = context.name(), "close panicked");
                if first_panic.is_none() {
                    first_panic = Some(payload);
                }
            }
        }
        first_panic
    }

    fn transition(&mut self, next: HandleState) {
        debug!(from = ?self.state, to = ?next, "handle transition");
        self.state = next;
    }

    fn into_record(self) -> HandleRecord {
        HandleRecord {
            modifiers: self.plan.modifiers().to_vec(),
            environment: self.environment.name().to_string(),
            original_call: self.original_call,
            final_call: self.final_call,
            original_result: self.original_result,
            final_result: self.final_result,
            state: self.state,
        }
    }
}
