//! Garbage-collection bracketing.
//!
//! Collection is a request to the host runtime. The engine itself owns no
//! collector; embedders hosting a collected runtime plug theirs in through
//! [`Collector`].

use std::rc::Rc;

use tracing::debug;

use crate::context::{Context, Halt};
use crate::core::outcome::CaseResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectPoint {
    BeforeStart,
    AfterClose,
}

pub trait Collector {
    /// Request a full collection.
    fn collect(&self, point: CollectPoint);
}

/// Default collector: records the request in the trace log.
#[derive(Debug, Default)]
pub struct TracingCollector;

impl Collector for TracingCollector {
    fn collect(&self, point: CollectPoint) {
        debug!(point = ?point, "collection requested");
    }
}

pub struct GarbageCollectContext {
    before: bool,
    after: bool,
    collector: Rc<dyn Collector>,
}

impl GarbageCollectContext {
    pub fn new(before: bool, after: bool, collector: Rc<dyn Collector>) -> Self {
        Self {
            before,
            after,
            collector,
        }
    }
}

impl Context for GarbageCollectContext {
    fn name(&self) -> &'static str {
        "garbage_collect"
    }

    fn start(&mut self) -> Option<Halt> {
        if self.before {
            self.collector.collect(CollectPoint::BeforeStart);
        }
        None
    }

    fn close(&mut self, _result: Option<&mut CaseResult>) {
        if self.after {
            self.collector.collect(CollectPoint::AfterClose);
        }
    }
}
