//! Environment strategies: how a callable of a given shape is invoked.
//!
//! Every environment normalizes the body's outcome into a [`ResultState`].
//! Panics, timeouts and raised exceptions all become `Raised`; the only
//! error an environment may return is a fatal host failure (for example,
//! being unable to build an event loop).

pub mod coroutine;
pub mod default;
pub mod manager;

use std::panic::{AssertUnwindSafe, catch_unwind};

use anyhow::Result;
use serde_json::Value;

use crate::case::{Callable, Outcome};
use crate::core::call_state::ResultState;
use crate::core::exception::Exception;
use crate::core::signature::Arguments;

pub use coroutine::CoroutineEnvironment;
pub use default::DefaultEnvironment;
pub use manager::{EnvironmentManager, Scope};

/// Abstraction over invocation strategies.
pub trait Environment: Send + Sync {
    /// Name used in logs and reports.
    fn name(&self) -> &str;

    /// Invoke `callable` with bound `arguments`. Never lets the body's
    /// failure escape: every outcome is a `ResultState`.
    fn run(&self, callable: &Callable, arguments: Arguments) -> Result<ResultState>;
}

/// Run a synchronous body, converting a panic into a raised exception.
pub(crate) fn run_guarded(body: impl FnOnce() -> Outcome) -> ResultState {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(outcome) => outcome.into(),
        Err(payload) => ResultState::Raised(Exception::from_panic(payload.as_ref())),
    }
}

/// Drain generator items into an array; the first raised item wins.
pub(crate) fn drain(items: impl Iterator<Item = Outcome>) -> Outcome {
    let values = items.collect::<Result<Vec<Value>, Exception>>()?;
    Ok(Value::Array(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::exception::VALUE_ERROR;
    use serde_json::json;

    #[test]
    fn run_guarded_converts_panics() {
        let state = run_guarded(|| panic!("exploded"));
        let exc = state.exception().expect("raised");
        assert_eq!(exc.ty().name(), "PanicError");
        assert_eq!(exc.message(), "exploded");
    }

    #[test]
    fn drain_stops_at_first_raise() {
        let items = vec![
            Ok(json!(1)),
            Err(Exception::value_error("bad")),
            Ok(json!(3)),
        ];
        let err = drain(items.into_iter()).expect_err("raised");
        assert!(err.is_instance_of(&VALUE_ERROR));
        assert_eq!(
            drain(vec![Ok(json!(1)), Ok(json!(2))].into_iter()).expect("drained"),
            json!([1, 2])
        );
    }
}
