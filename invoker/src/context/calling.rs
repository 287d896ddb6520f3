//! Call-state injection from a `Calling` modifier.
//!
//! On enter the declared arguments are merged into the call state. On exit
//! the outcome is compared against the declared expectation:
//!
//! | expectation | outcome              | effect                          |
//! |-------------|----------------------|---------------------------------|
//! | any         | assertion raised     | none (assertion report wins)    |
//! | unchecked   | anything             | none                            |
//! | returning v | returned v           | none                            |
//! | returning v | anything else        | halt with `Returning`           |
//! | raising E   | raised matching E    | state replaced with `None`      |
//! | raising E   | anything else        | halt with `Raising`             |

use tracing::debug;

use crate::context::{Context, Entered, Exited, Halt};
use crate::core::call_state::{CallState, ResultState};
use crate::core::modifier::{Calling, Expectation};
use crate::core::outcome::Report;

#[derive(Debug)]
pub struct CallingContext {
    calling: Calling,
}

impl CallingContext {
    pub fn new(calling: Calling) -> Self {
        Self { calling }
    }
}

impl Context for CallingContext {
    fn name(&self) -> &'static str {
        "calling"
    }

    fn enter(&mut self, state: &CallState) -> Entered {
        (None, Some(self.calling.apply(state)))
    }

    fn exit(&mut self, state: &ResultState) -> Exited {
        if state.exception().is_some_and(|exc| exc.is_assertion()) {
            return (None, None);
        }
        match self.calling.expectation() {
            Expectation::Unchecked => (None, None),
            Expectation::Returning(expected) => {
                if state.value() == Some(expected) {
                    return (None, None);
                }
                debug!(calling = %self.calling, "return expectation not met");
                let report = Report::Returning {
                    expected: expected.clone(),
                    actual: state.clone(),
                };
                (Some(Halt::report(report)), None)
            }
            Expectation::Raising(expected) => match state.exception() {
                Some(exc) if expected.matches(exc) => {
                    debug!(exception = %exc, "expected exception raised");
                    (None, Some(ResultState::None))
                }
                _ => {
                    debug!(calling = %self.calling, "raise expectation not met");
                    let report = Report::Raising {
                        expected: Some(expected.summary()),
                        actual: state.clone(),
                    };
                    (Some(Halt::report(report)), None)
                }
            },
        }
    }
}
