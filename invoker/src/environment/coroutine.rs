//! Coroutine bodies on a single-threaded tokio runtime.
//!
//! Each call runs on a current-thread runtime: either an ad hoc one built
//! for the call and shut down afterwards, or a long-lived one supplied by
//! the host. A wall-clock timeout bounds every call; an abandoned body is
//! dropped with its runtime.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context as _, Result};
use futures::future::LocalBoxFuture;
use futures::{FutureExt, TryStreamExt};
use serde_json::Value;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, instrument, warn};

use crate::case::{Body, Callable, Outcome};
use crate::core::call_state::ResultState;
use crate::core::exception::{CANCELLED_ERROR, Exception, TIMEOUT_ERROR};
use crate::core::signature::Arguments;
use crate::environment::{DefaultEnvironment, Environment};

/// Ad hoc runtimes built but not yet shut down, process-wide.
static LIVE_AD_HOC_LOOPS: AtomicUsize = AtomicUsize::new(0);

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CoroutineEnvironment {
    timeout: Duration,
    runtime: Option<Arc<Runtime>>,
}

impl Default for CoroutineEnvironment {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl CoroutineEnvironment {
    /// Build an ad hoc runtime for every call.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            runtime: None,
        }
    }

    /// Reuse a long-lived runtime. It must not be the runtime driving the
    /// calling thread.
    pub fn with_runtime(timeout: Duration, runtime: Arc<Runtime>) -> Self {
        Self {
            timeout,
            runtime: Some(runtime),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of ad hoc runtimes currently alive in this process.
    pub fn live_ad_hoc_loops() -> usize {
        LIVE_AD_HOC_LOOPS.load(Ordering::SeqCst)
    }

    fn drive(&self, runtime: &Runtime, future: LocalBoxFuture<'static, Outcome>) -> ResultState {
        let timeout = self.timeout;
        let guarded = AssertUnwindSafe(future).catch_unwind();
        // The timer must be created inside the runtime.
        let finished =
            runtime.block_on(async move { tokio::time::timeout(timeout, guarded).await });
        match finished {
            Ok(Ok(outcome)) => outcome.into(),
            Ok(Err(payload)) => ResultState::Raised(Exception::from_panic(payload.as_ref())),
            Err(_) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(timeout_ms, "coroutine timed out");
                ResultState::Raised(Exception::new(
                    &TIMEOUT_ERROR,
                    format!("coroutine did not finish within {timeout_ms} ms"),
                ))
            }
        }
    }
}

/// Counts one ad hoc runtime as live until dropped. Declared before the
/// runtime it tracks, so the runtime is gone first on every exit path.
struct LiveLoop;

impl LiveLoop {
    fn register() -> Self {
        LIVE_AD_HOC_LOOPS.fetch_add(1, Ordering::SeqCst);
        Self
    }
}

impl Drop for LiveLoop {
    fn drop(&mut self) {
        LIVE_AD_HOC_LOOPS.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Convert a failed task join into a raised exception. Bodies spawning
/// their own tasks use this to surface cancellation.
pub fn join_error_to_exception(err: tokio::task::JoinError) -> Exception {
    if err.is_cancelled() {
        Exception::new(&CANCELLED_ERROR, "task was cancelled")
    } else {
        match err.try_into_panic() {
            Ok(payload) => Exception::from_panic(payload.as_ref()),
            Err(err) => Exception::from_error(err),
        }
    }
}

impl Environment for CoroutineEnvironment {
    fn name(&self) -> &str {
        "coroutine"
    }

    #[instrument(skip_all, fields(kind = ?callable.kind()))]
    fn run(&self, callable: &Callable, arguments: Arguments) -> Result<ResultState> {
        // Building the future runs caller code too, so it panics like a body.
        // Synchronous bodies hand their arguments back untouched.
        let built = catch_unwind(AssertUnwindSafe(|| match callable.body() {
            Body::Coroutine(func) => Ok(func(arguments)),
            Body::CoroutineGenerator(func) => {
                let items = func(arguments);
                let future: LocalBoxFuture<'static, Outcome> = async move {
                    let values: Vec<Value> = items.try_collect().await?;
                    Ok::<_, Exception>(Value::Array(values))
                }
                .boxed_local();
                Ok(future)
            }
            Body::Plain(_) | Body::Generator(_) => Err(arguments),
        }));
        let future = match built {
            Ok(Ok(future)) => future,
            Ok(Err(arguments)) => {
                debug!("synchronous body, running without a loop");
                return DefaultEnvironment.run(callable, arguments);
            }
            Err(payload) => {
                warn!("coroutine body panicked before returning its future");
                return Ok(ResultState::Raised(Exception::from_panic(payload.as_ref())));
            }
        };

        if let Some(runtime) = &self.runtime {
            return Ok(self.drive(runtime, future));
        }
        let live = LiveLoop::register();
        let runtime = Builder::new_current_thread()
            .enable_time()
            .build()
            .context("build coroutine runtime")?;
        let state = self.drive(&runtime, future);
        // Abandoned tasks are dropped, not awaited.
        runtime.shutdown_background();
        drop(live);
        debug!("ad hoc coroutine runtime stopped");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::exception::PANIC_ERROR;
    use futures::stream::LocalBoxStream;
    use futures::{StreamExt, stream};
    use serde_json::json;

    fn run(env: &CoroutineEnvironment, callable: Callable) -> ResultState {
        env.run(&callable, Arguments::default()).expect("run")
    }

    #[test]
    fn awaits_coroutine_result() {
        let env = CoroutineEnvironment::new(Duration::from_secs(5));
        let callable = Callable::coroutine(|_| {
            async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(json!(42))
            }
            .boxed_local()
        });
        assert_eq!(run(&env, callable), ResultState::Returned(json!(42)));
    }

    #[test]
    fn timeout_is_raised() {
        let env = CoroutineEnvironment::new(Duration::from_millis(20));
        let callable = Callable::coroutine(|_| {
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!(null))
            }
            .boxed_local()
        });
        let state = run(&env, callable);
        let exc = state.exception().expect("raised");
        assert!(exc.is_instance_of(&TIMEOUT_ERROR));
        assert!(exc.message().contains("20 ms"));
    }

    #[test]
    fn panicking_coroutine_is_raised() {
        let env = CoroutineEnvironment::new(Duration::from_secs(5));
        let callable = Callable::coroutine(|_| async { panic!("async boom") }.boxed_local());
        let state = run(&env, callable);
        assert_eq!(state.exception().map(Exception::message), Some("async boom"));
    }

    #[test]
    fn panic_while_building_the_future_is_raised() {
        let env = CoroutineEnvironment::new(Duration::from_secs(5));
        let callable = Callable::coroutine(|_| -> LocalBoxFuture<'static, Outcome> {
            panic!("no future for you")
        });
        let state = run(&env, callable);
        let exc = state.exception().expect("raised");
        assert!(exc.is_instance_of(&PANIC_ERROR));
        assert_eq!(exc.message(), "no future for you");
    }

    #[test]
    fn panic_while_building_a_stream_is_raised() {
        let env = CoroutineEnvironment::new(Duration::from_secs(5));
        let callable = Callable::coroutine_generator(
            |_| -> LocalBoxStream<'static, Outcome> { panic!("no stream") },
        );
        assert_eq!(
            run(&env, callable).exception().map(Exception::message),
            Some("no stream")
        );
    }

    #[test]
    fn coroutine_generator_is_collected() {
        let env = CoroutineEnvironment::new(Duration::from_secs(5));
        let callable = Callable::coroutine_generator(|_| {
            stream::iter(vec![Ok(json!(1)), Ok(json!(2))]).boxed_local()
        });
        assert_eq!(run(&env, callable), ResultState::Returned(json!([1, 2])));
    }

    #[test]
    fn coroutine_generator_stops_at_first_raise() {
        let env = CoroutineEnvironment::new(Duration::from_secs(5));
        let callable = Callable::coroutine_generator(|_| {
            stream::iter(vec![Ok(json!(1)), Err(Exception::value_error("bad"))]).boxed_local()
        });
        assert_eq!(
            run(&env, callable).exception().map(Exception::message),
            Some("bad")
        );
    }

    #[test]
    fn supplied_runtime_is_reused() {
        let runtime = Arc::new(
            Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("runtime"),
        );
        let env = CoroutineEnvironment::with_runtime(Duration::from_secs(5), runtime);
        let callable = Callable::coroutine(|_| async { Ok(json!("shared")) }.boxed_local());
        assert_eq!(run(&env, callable.clone()), ResultState::Returned(json!("shared")));
        assert_eq!(run(&env, callable), ResultState::Returned(json!("shared")));
    }

    #[test]
    fn plain_body_runs_synchronously() {
        let env = CoroutineEnvironment::default();
        assert_eq!(
            run(&env, Callable::plain(|_| Ok(json!(7)))),
            ResultState::Returned(json!(7))
        );
    }

    #[test]
    fn cancelled_join_becomes_cancelled_error() {
        let runtime = Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        let err = runtime.block_on(async {
            let task = tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
            task.abort();
            task.await.expect_err("aborted")
        });
        assert!(join_error_to_exception(err).is_instance_of(&CANCELLED_ERROR));
    }
}
