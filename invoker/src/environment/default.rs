//! Synchronous invocation of plain and generator bodies.

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::case::{Body, Callable};
use crate::core::call_state::ResultState;
use crate::core::exception::Exception;
use crate::core::signature::Arguments;
use crate::environment::{Environment, drain, run_guarded};

/// Calls the body on the current thread. Coroutine shapes raise
/// `TypeError`: there is no loop to drive them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEnvironment;

impl Environment for DefaultEnvironment {
    fn name(&self) -> &str {
        "default"
    }

    #[instrument(skip_all, fields(kind = ?callable.kind()))]
    fn run(&self, callable: &Callable, arguments: Arguments) -> Result<ResultState> {
        let state = match callable.body() {
            Body::Plain(func) => run_guarded(|| func(&arguments)),
            Body::Generator(func) => run_guarded(|| drain(func(&arguments))),
            Body::Coroutine(_) | Body::CoroutineGenerator(_) => {
                warn!("coroutine body selected the default environment");
                ResultState::Raised(Exception::type_error(
                    "coroutine body requires a coroutine environment",
                ))
            }
        };
        debug!(raised = state.exception().is_some(), "body finished");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::exception::VALUE_ERROR;
    use futures::FutureExt;
    use serde_json::json;

    fn run(callable: Callable) -> ResultState {
        DefaultEnvironment
            .run(&callable, Arguments::default())
            .expect("run")
    }

    #[test]
    fn returned_value_is_returned() {
        assert_eq!(
            run(Callable::plain(|_| Ok(json!("ok")))),
            ResultState::Returned(json!("ok"))
        );
    }

    #[test]
    fn raised_exception_is_raised() {
        let state = run(Callable::plain(|_| Err(Exception::value_error("bad"))));
        assert!(state.exception().is_some_and(|exc| exc.is_instance_of(&VALUE_ERROR)));
    }

    #[test]
    fn panic_is_raised_not_propagated() {
        let state = run(Callable::plain(|_| panic!("boom")));
        assert_eq!(state.exception().map(Exception::message), Some("boom"));
    }

    #[test]
    fn generator_is_drained() {
        let state = run(Callable::generator(|_| (1..=3).map(|n| Ok(json!(n)))));
        assert_eq!(state, ResultState::Returned(json!([1, 2, 3])));
    }

    #[test]
    fn coroutine_shape_raises_type_error() {
        let state = run(Callable::coroutine(|_| async { Ok(json!(1)) }.boxed_local()));
        assert_eq!(state.exception().map(|exc| exc.ty().name()), Some("TypeError"));
    }
}
