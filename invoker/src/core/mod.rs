//! Deterministic, pure logic shared by the invocation engine.
//!
//! Core modules are free of I/O and process-wide state. They operate on
//! in-memory values and return deterministic outputs suitable for tests.

pub mod call_state;
pub mod exception;
pub mod modifier;
pub mod outcome;
pub mod resolver;
pub mod signature;
