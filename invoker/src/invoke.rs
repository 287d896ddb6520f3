//! Entry point: turn one discovered case into its results.
//!
//! Skipped cases yield one skipped result and never resolve. Conflicted
//! cases yield one conflicted result and never run. Otherwise every plan
//! is run by a fresh Handle, strictly one after another.

use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::case::TestCase;
use crate::config::InvokerConfig;
use crate::context::{Collector, ContextFactory, TracingCollector};
use crate::core::modifier::Modifier;
use crate::core::outcome::CaseResult;
use crate::core::resolver::{ExecutionPlan, Resolution, resolve};
use crate::environment::{Environment, EnvironmentManager};
use crate::handle::{Handle, HandleOptions};

pub struct Invoker {
    config: InvokerConfig,
    environments: EnvironmentManager,
    collector: Rc<dyn Collector>,
    factory: Option<Box<dyn ContextFactory>>,
}

impl Invoker {
    /// Invoker with built-in environments and overrides from `config`.
    pub fn new(config: InvokerConfig) -> Result<Self> {
        let environments = EnvironmentManager::from_config(&config)?;
        Ok(Self {
            config,
            environments,
            collector: Rc::new(TracingCollector),
            factory: None,
        })
    }

    pub fn with_environments(mut self, environments: EnvironmentManager) -> Self {
        self.environments = environments;
        self
    }

    /// Host collector receiving garbage-collection requests.
    pub fn with_collector(mut self, collector: Rc<dyn Collector>) -> Self {
        self.collector = collector;
        self
    }

    /// Contexts built fresh for every Handle, after the modifier contexts.
    pub fn with_context_factory(mut self, factory: impl ContextFactory + 'static) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    pub fn environments(&self) -> &EnvironmentManager {
        &self.environments
    }

    /// All results for `case`, in plan order. Every case yields at least
    /// one result; errors are fatal host failures only.
    #[instrument(skip_all, fields(case = %case.name(), file = %case.file().display()))]
    pub fn invoke(&self, case: &Arc<TestCase>) -> Result<Vec<CaseResult>> {
        if let Some(reason) = case.skip() {
            info!(reason = %reason, "case skipped");
            let result = CaseResult::skipped(Arc::clone(case), reason).with_reverse(case.reverse());
            return Ok(vec![result]);
        }

        let resolution = match case.modifier() {
            Some(chain) => chain.resolve(),
            None => resolve(&[]),
        };
        let plans = match resolution {
            Resolution::Conflict(conflict) => {
                warn!(conflict = %conflict, "modifier conflict");
                return Ok(vec![CaseResult::conflicted(Arc::clone(case), conflict)]);
            }
            Resolution::Plans(plans) => plans,
        };
        debug!(plans = plans.len(), "modifiers resolved");

        let options = HandleOptions::from_config(&self.config, Rc::clone(&self.collector));
        let mut results = Vec::with_capacity(plans.len());
        for plan in plans {
            let environment = self.environment_for(case, &plan);
            let contexts = self
                .factory
                .as_ref()
                .map(|factory| factory.contexts())
                .unwrap_or_default();
            let result = Handle::new(Arc::clone(case), plan, environment, options.clone())
                .with_contexts(contexts)
                .run()?;
            debug!(classification = ?result.classification(), "plan finished");
            results.push(result);
        }
        Ok(results)
    }

    /// An Environment modifier in the plan wins over the manager.
    fn environment_for(&self, case: &TestCase, plan: &ExecutionPlan) -> Arc<dyn Environment> {
        plan.modifiers()
            .iter()
            .find_map(|modifier| match modifier {
                Modifier::Environment(environment) => Some(Arc::clone(environment)),
                _ => None,
            })
            .unwrap_or_else(|| self.environments.get_environment_for(case))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{Callable, InvocationKind};
    use crate::context::Context;
    use crate::context::collect::CollectPoint;
    use crate::core::modifier::Calling;
    use crate::core::outcome::Classification;
    use crate::environment::Scope;
    use crate::test_support::{
        NamedEnvironment, RecordingCollector, RecordingContext, phase_log, quiet_config,
        returning_case, square_case,
    };
    use serde_json::json;

    fn invoker() -> Invoker {
        Invoker::new(quiet_config()).expect("invoker")
    }

    #[test]
    fn no_modifiers_yield_one_result() {
        let results = invoker()
            .invoke(&returning_case("t", json!(1)))
            .expect("invoke");
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_continuing());
        assert!(results[0].handle().expect("record").modifiers().is_empty());
    }

    #[test]
    fn skip_wins_over_conflict() {
        let case = TestCase::new("t", "tests/t.rs", Callable::plain(|_| Ok(json!(1))))
            .with_modifier(Modifier::garbage_collect(false, false))
            .with_modifier(Modifier::skip("not today"))
            .into_shared();
        let results = invoker().invoke(&case).expect("invoke");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].skip_reason(), Some("not today"));
        assert!(results[0].handle().is_none());
    }

    #[test]
    fn conflict_yields_one_conflicted_result() {
        let case = TestCase::new("t", "tests/t.rs", Callable::plain(|_| Ok(json!(1))))
            .with_modifier(Modifier::garbage_collect(false, false))
            .into_shared();
        let results = invoker().invoke(&case).expect("invoke");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].classification(), Classification::Conflicted);
    }

    #[test]
    fn one_result_per_calling_with_continuing_flags() {
        let case = square_case("sq")
            .with_modifier(Calling::with_args([json!(1)]).returning(json!(1)))
            .with_modifier(Calling::with_args([json!(2)]).returning(json!(4)))
            .with_modifier(Calling::with_args([json!(3)]).returning(json!(9)))
            .into_shared();
        let results = invoker().invoke(&case).expect("invoke");
        let continuing: Vec<_> = results.iter().map(CaseResult::is_continuing).collect();
        assert_eq!(continuing, vec![true, true, false]);
        assert!(results.iter().all(CaseResult::is_passed));
    }

    #[test]
    fn environment_modifier_beats_manager_override() {
        let manager = EnvironmentManager::default().with_override(
            Scope::Global,
            InvocationKind::Plain,
            Arc::new(NamedEnvironment::new("configured")),
        );
        let invoker = invoker().with_environments(manager);

        let configured = invoker
            .invoke(&returning_case("a", json!(1)))
            .expect("invoke");
        assert_eq!(configured[0].handle().map(|r| r.environment()), Some("configured"));

        let case = TestCase::new("b", "tests/t.rs", Callable::plain(|_| Ok(json!(1))))
            .with_modifier(Modifier::environment(NamedEnvironment::new("chosen")))
            .into_shared();
        let chosen = invoker.invoke(&case).expect("invoke");
        assert_eq!(chosen[0].handle().map(|r| r.environment()), Some("chosen"));
    }

    #[test]
    fn collector_sees_garbage_collect_requests() {
        let collector = Rc::new(RecordingCollector::default());
        let case = TestCase::new("t", "tests/t.rs", Callable::plain(|_| Ok(json!(1))))
            .with_modifier(Modifier::garbage_collect(true, true))
            .into_shared();
        let invoker = invoker().with_collector(collector.clone());
        invoker.invoke(&case).expect("invoke");
        assert_eq!(
            collector.points(),
            vec![CollectPoint::BeforeStart, CollectPoint::AfterClose]
        );
    }

    #[test]
    fn factory_contexts_run_for_every_plan() {
        let log = phase_log();
        let factory_log = Rc::clone(&log);
        let invoker = invoker().with_context_factory(move || {
            vec![Box::new(RecordingContext::new("f", &factory_log)) as Box<dyn Context>]
        });
        let case = square_case("sq")
            .with_modifier(Calling::with_args([json!(1)]))
            .with_modifier(Calling::with_args([json!(2)]))
            .into_shared();
        invoker.invoke(&case).expect("invoke");
        let starts = log.borrow().iter().filter(|entry| *entry == "f:start").count();
        assert_eq!(starts, 2);
    }
}
