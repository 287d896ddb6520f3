//! Execution contexts: cross-cutting concerns wrapped around one invocation.
//!
//! A Handle drives every context through four phases:
//!
//! 1. `start` in registration order; a [`Halt`] stops further starts.
//! 2. `enter` in registration order, threading the [`CallState`]; a
//!    [`Halt`] skips the invocation.
//! 3. `exit` in reverse order, threading the [`ResultState`]; a [`Halt`]
//!    stops further exits and becomes the result.
//! 4. `close` in reverse order for every context whose `start` ran,
//!    unconditionally.
//!
//! The [`Context`] trait decouples the Handle from the concerns themselves;
//! tests use recording contexts that log each phase.

pub mod calling;
pub mod capture;
pub mod collect;

use crate::core::call_state::{CallState, ResultState};
use crate::core::outcome::{CaseResult, Report};

pub use calling::CallingContext;
pub use capture::OutputCapture;
pub use collect::{Collector, GarbageCollectContext, TracingCollector};

/// Early termination requested by a context. The Handle turns it into the
/// result for the invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Halt {
    pub reports: Vec<Report>,
}

impl Halt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(report: Report) -> Self {
        Self {
            reports: vec![report],
        }
    }
}

/// What `enter` hands back: an optional halt and an optional rewritten
/// call state. `None` keeps the current state.
pub type Entered = (Option<Halt>, Option<CallState>);

/// What `exit` hands back: an optional halt and an optional replacement
/// result state. `None` keeps the current state.
pub type Exited = (Option<Halt>, Option<ResultState>);

/// Four-phase hooks. Every phase defaults to a no-op.
pub trait Context {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn start(&mut self) -> Option<Halt> {
        None
    }

    fn enter(&mut self, _state: &CallState) -> Entered {
        (None, None)
    }

    fn exit(&mut self, _state: &ResultState) -> Exited {
        (None, None)
    }

    /// Teardown. `result` is `None` when the invocation faulted.
    fn close(&mut self, _result: Option<&mut CaseResult>) {}
}

/// Builds extra contexts for every Handle, after the modifier contexts.
pub trait ContextFactory {
    fn contexts(&self) -> Vec<Box<dyn Context>>;
}

impl<F> ContextFactory for F
where
    F: Fn() -> Vec<Box<dyn Context>>,
{
    fn contexts(&self) -> Vec<Box<dyn Context>> {
        self()
    }
}
