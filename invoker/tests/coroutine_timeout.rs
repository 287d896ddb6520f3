//! Coroutine timeout handling, in its own test binary: the live-loop count
//! is process-wide and must not see loops from unrelated tests.

use std::time::Duration;

use futures::FutureExt;
use invoker::case::{Callable, TestCase};
use invoker::config::InvokerConfig;
use invoker::core::call_state::ResultState;
use invoker::core::exception::TIMEOUT_ERROR;
use invoker::core::outcome::{Report, ReportKind};
use invoker::environment::CoroutineEnvironment;
use invoker::invoke::Invoker;
use invoker::test_support::quiet_config;
use serde_json::json;

#[test]
fn timed_out_coroutine_is_raised_and_its_loop_stopped() {
    let config = InvokerConfig {
        coroutine_timeout_ms: 50,
        ..quiet_config()
    };
    let invoker = Invoker::new(config).expect("invoker");
    let callable = Callable::coroutine(|_| {
        async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!("too late"))
        }
        .boxed_local()
    });
    let case = TestCase::new("slow", "tests/slow.rs", callable).into_shared();

    let results = invoker.invoke(&case).expect("invoke");

    let result = &results[0];
    assert!(result.is_failed());
    let report = result.failure_report().expect("failure");
    assert_eq!(report.kind(), ReportKind::UnexpectedException);
    let Report::Raising {
        actual: ResultState::Raised(exc),
        ..
    } = report
    else {
        panic!("expected a raised report, got {report:?}");
    };
    assert!(exc.is_instance_of(&TIMEOUT_ERROR));
    assert_eq!(result.handle().expect("record").environment(), "coroutine");
    assert_eq!(CoroutineEnvironment::live_ad_hoc_loops(), 0);
}
