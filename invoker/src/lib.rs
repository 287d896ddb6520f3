//! Invocation core of a test-execution framework.
//!
//! Given a discovered [`case::TestCase`] (a callable plus declarative
//! modifiers), the engine decides how many executions the case needs, runs
//! each inside its own set of contexts and an interchangeable environment,
//! and folds what happened into structured results. The crate keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (outcome model, modifiers,
//!   conflict resolution, parameter binding). No I/O.
//! - **[`context`]** and **[`environment`]**: the cross-cutting concerns
//!   around one call and the strategies that perform it.
//!
//! Orchestration ([`handle`], [`invoke`]) wires them together.
//!
//! ```
//! use invoker::case::{Callable, TestCase};
//! use invoker::config::InvokerConfig;
//! use invoker::core::modifier::Calling;
//! use invoker::invoke::Invoker;
//! use serde_json::json;
//!
//! let square = Callable::plain(|args| {
//!     let x: i64 = args.get("x")?;
//!     Ok(json!(x * x))
//! })
//! .param("x");
//! let case = TestCase::new("square", "tests/math.rs", square)
//!     .with_modifier(Calling::with_args([json!(3)]).returning(json!(9)))
//!     .into_shared();
//!
//! let invoker = Invoker::new(InvokerConfig::default())?;
//! let results = invoker.invoke(&case)?;
//! assert!(results.iter().all(|result| result.is_passed()));
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod case;
pub mod config;
pub mod context;
pub mod core;
pub mod environment;
pub mod handle;
pub mod invoke;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
