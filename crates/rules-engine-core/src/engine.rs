// rules-engine-core/src/engine.rs
// ============================================================================
// Module: Rule Engine Core
// Description: Holds the active rule snapshot, applies priority ordering,
//              orchestrates evaluate-then-act for every point.
// Purpose: The single entry point a southbound adapter calls per point.
// Dependencies: crate::{condition, dispatch, rule, aggregate, filter}, tokio
// ============================================================================

//! ## Overview
//! [`RuleEngine`] is the orchestration seam: for each point it materializes
//! the active [`RuleSet`] snapshot, walks it in `(priority desc, name asc)`
//! order, evaluates each enabled rule's compiled condition tree, and for
//! every match hands the rule to [`crate::dispatch::dispatch_rule`]. A rule
//! whose condition fails to evaluate is recorded as a [`RuleFailure`] and
//! does not stop the rest of the rule set from being tried.
//!
//! [`EngineHandle`] is the cancellation signal: sweeper tasks started from
//! [`RuleEngine::start`] select on it alongside their own tick interval so
//! `cancel` stops them promptly rather than on their next tick.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Instant;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::action::ActionContext;
use crate::aggregate::AggregationManager;
use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::condition;
use crate::config::EngineConfig;
use crate::dispatch::RuleFailure;
use crate::dispatch::dispatch_rule;
use crate::error::ConditionError;
use crate::filter::FilterEngine;
use crate::forward::Publisher;
use crate::metrics::EngineMetrics;
use crate::metrics::MetricsSnapshot;
use crate::point::DataType;
use crate::point::Point;
use crate::regex_cache::RegexCache;
use crate::rule::ActionResult;
use crate::rule::Rule;
use crate::rule::RuleSet;

// ============================================================================
// SECTION: Shutdown Handle
// ============================================================================

/// Cooperative cancellation signal for an engine's background sweepers.
///
/// Cloning shares the same underlying flag and waiter list: cancelling
/// through any clone stops every sweeper task spawned from
/// [`RuleEngine::start`].
#[derive(Clone)]
pub struct EngineHandle {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl EngineHandle {
    /// Builds a handle in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Signals every sweeper watching this handle to stop.
    ///
    /// This only stops background sweepers; the regex cache and any
    /// already-buffered aggregate batches are left intact (batch channels
    /// drain naturally once their shard's sender is dropped alongside the
    /// engine itself).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// `true` once [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves immediately if already cancelled, else waits for the next
    /// [`Self::cancel`] call. Intended for a `tokio::select!` branch
    /// alongside a sweeper's own tick interval.
    async fn cancelled_signal(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for EngineHandle {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SECTION: Process Outcome
// ============================================================================

/// The per-rule result of dispatching a matched rule's actions.
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    /// The rule that matched.
    pub rule_id: String,
    /// One [`ActionResult`] per action attached to the rule, in order.
    pub results: Vec<ActionResult>,
}

/// Everything [`RuleEngine::process`] produces for one point: every rule
/// that matched (with its action results) and every rule whose condition
/// failed to evaluate.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// Rules whose condition matched, in evaluation order.
    pub matched: Vec<RuleOutcome>,
    /// Rules whose condition evaluation raised an error. Evaluation
    /// continues past these; they never abort the rest of the rule set.
    pub failures: Vec<RuleFailure>,
}

impl ProcessOutcome {
    /// `true` when at least one rule matched and every attached action on
    /// every matched rule succeeded, and no rule failed to evaluate.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty() && self.matched.iter().all(|outcome| outcome.results.iter().all(|result| result.success))
    }
}

// ============================================================================
// SECTION: Rule Engine
// ============================================================================

/// Orchestrates evaluate-then-act for every point against the active rule
/// snapshot. Cheap to clone via `Arc<RuleEngine>`; every method takes `&self`
/// so many workers can call [`Self::process`] concurrently.
pub struct RuleEngine {
    rules: RwLock<Arc<RuleSet>>,
    clock: Arc<dyn Clock>,
    regex_cache: Arc<RegexCache>,
    aggregates: Arc<AggregationManager>,
    filters: Arc<FilterEngine>,
    publisher: Option<Arc<dyn Publisher>>,
    metrics: EngineMetrics,
    config: EngineConfig,
    handle: EngineHandle,
    sweeper_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RuleEngine {
    /// Builds an engine with the system clock and no publisher configured
    /// (forwarding actions report `published: false` until one is set via
    /// [`Self::with_collaborators`]).
    #[must_use]
    pub fn new(num_cpus: usize, config: EngineConfig) -> Arc<Self> {
        Self::build(num_cpus, config, Arc::new(SystemClock), None)
    }

    /// Builds an engine with an injected clock and publisher, for tests and
    /// for wiring a concrete sink from `rules-engine-forwarding`.
    #[must_use]
    pub fn with_collaborators(num_cpus: usize, config: EngineConfig, clock: Arc<dyn Clock>, publisher: Option<Arc<dyn Publisher>>) -> Arc<Self> {
        Self::build(num_cpus, config, clock, publisher)
    }

    fn build(num_cpus: usize, config: EngineConfig, clock: Arc<dyn Clock>, publisher: Option<Arc<dyn Publisher>>) -> Arc<Self> {
        let shards = config.shard_bounds.clamp(num_cpus);
        let aggregates = Arc::new(AggregationManager::with_limits(
            shards,
            Arc::clone(&clock),
            config.aggregate.max_states,
            config.aggregate.max_memory_bytes,
            config.aggregate.ttl(),
        ));
        let filters = Arc::new(FilterEngine::new(Arc::clone(&clock)));
        let regex_cache = Arc::new(RegexCache::with_clock(Arc::clone(&clock)));
        Arc::new(Self {
            rules: RwLock::new(Arc::new(RuleSet::empty())),
            clock,
            regex_cache,
            aggregates,
            filters,
            publisher,
            metrics: EngineMetrics::new(),
            config,
            handle: EngineHandle::new(),
            sweeper_tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the aggregate TTL sweeper and the filter TTL sweeper, bound to
    /// this engine's [`EngineHandle`], plus the aggregation manager's
    /// per-shard batch-flush workers. Must be called from within a Tokio
    /// runtime, typically right after construction.
    ///
    /// The sweeper tasks' [`JoinHandle`]s are retained and awaited by
    /// [`Self::shutdown`], forming a join barrier on shutdown.
    pub fn start(self: &Arc<Self>) {
        self.aggregates.spawn_batch_workers();
        let aggregate_sweeper = self.spawn_aggregate_sweeper();
        let filter_sweeper = self.spawn_filter_sweeper();
        self.sweeper_tasks.lock().extend([aggregate_sweeper, filter_sweeper]);
    }

    /// Signals [`EngineHandle::cancel`] and waits for every sweeper task
    /// spawned by [`Self::start`] to observe it and exit, forming a join
    /// barrier on shutdown.
    ///
    /// A sweeper task that panicked is logged and otherwise ignored; a
    /// panicked background sweeper must not itself abort a clean shutdown.
    pub async fn shutdown(&self) {
        self.handle.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.sweeper_tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "sweeper task did not shut down cleanly");
            }
        }
    }

    fn spawn_aggregate_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let tick = engine.config.aggregate.cleanup_tick();
        let handle = engine.handle.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = ticker.tick() => engine.aggregates.sweep_expired(),
                    () = handle.cancelled_signal() => break,
                }
            }
        })
    }

    fn spawn_filter_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let tick = engine.config.filter.tick();
        let ttl = engine.config.filter.ttl();
        let handle = engine.handle.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = ticker.tick() => engine.filters.sweep_expired(ttl),
                    () = handle.cancelled_signal() => break,
                }
            }
        })
    }

    /// Replaces the active rule snapshot wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError`] when any rule's condition tree fails to
    /// parse or compile; the previous snapshot remains active.
    pub fn update_rules(&self, rules: Vec<Rule>) -> Result<(), ConditionError> {
        let compiled = RuleSet::compile(rules)?;
        *self.rules.write() = Arc::new(compiled);
        Ok(())
    }

    /// The currently active rule snapshot.
    #[must_use]
    pub fn rules_snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.rules.read())
    }

    /// The shared aggregation manager, for callers that need direct access
    /// (e.g. an admin surface reporting state counts).
    #[must_use]
    pub fn aggregates(&self) -> &Arc<AggregationManager> {
        &self.aggregates
    }

    /// A snapshot of the engine's point/rule/action counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The engine's shutdown handle; call [`EngineHandle::cancel`] to stop
    /// every sweeper started by [`Self::start`].
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Evaluates every enabled rule in priority order against `point` and
    /// dispatches the actions of every rule that matches.
    ///
    /// An action failure never aborts the rest of that rule's actions, and a
    /// rule's condition failing to evaluate never aborts the rest of the
    /// rule set.
    pub async fn process(&self, point: &Point) -> ProcessOutcome {
        self.metrics.record_point(self.clock.as_ref());
        let snapshot = self.rules_snapshot();
        let mut outcome = ProcessOutcome::default();

        for compiled in snapshot.enabled_in_order() {
            if !data_type_matches(&compiled.rule, point) {
                continue;
            }

            let started = Instant::now();
            match condition::evaluate(&compiled.tree, point, &self.regex_cache) {
                Ok(true) => {
                    self.metrics.record_match();
                    trace!(rule_id = %compiled.rule.id, device_id = %point.device_id, key = %point.key, "rule matched point");
                    let ctx = ActionContext {
                        clock: self.clock.as_ref(),
                        regex_cache: &self.regex_cache,
                        aggregates: &self.aggregates,
                        filters: &self.filters,
                        publisher: self.publisher.as_deref(),
                        observed_tps: self.metrics.observed_tps(),
                    };
                    let results = dispatch_rule(&compiled.rule, point, &ctx).await;
                    for result in &results {
                        self.metrics.record_action(result.success);
                    }
                    debug!(rule_id = %compiled.rule.id, actions = results.len(), "rule dispatched");
                    outcome.matched.push(RuleOutcome { rule_id: compiled.rule.id.clone(), results });
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(rule_id = %compiled.rule.id, error = %err, "rule condition failed to evaluate");
                    outcome.failures.push(RuleFailure {
                        rule_id: compiled.rule.id.clone(),
                        error: err.to_string(),
                        duration: started.elapsed(),
                    });
                }
            }
        }

        outcome
    }
}

/// `true` when `rule` carries no declared `data_type` filter, or when it
/// matches `point.data_type`'s lowercase wire name.
fn data_type_matches(rule: &Rule, point: &Point) -> bool {
    match &rule.data_type {
        None => true,
        Some(declared) => declared.eq_ignore_ascii_case(data_type_name(point.data_type)),
    }
}

const fn data_type_name(data_type: DataType) -> &'static str {
    match data_type {
        DataType::Int => "int",
        DataType::Float => "float",
        DataType::Bool => "bool",
        DataType::String => "string",
        DataType::Composite => "composite",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU64;

    use super::*;
    use crate::point::ScalarValue;
    use crate::rule::Action;
    use crate::rule::ActionKind;

    struct FixedClock(AtomicU64);
    impl Clock for FixedClock {
        fn now_unix_secs(&self) -> f64 {
            f64::from_bits(self.0.load(Ordering::Relaxed))
        }
    }
    impl FixedClock {
        fn new(now: f64) -> Arc<Self> {
            Arc::new(Self(AtomicU64::new(now.to_bits())))
        }
    }

    fn point(value: f64) -> Point {
        Point {
            device_id: "d1".to_string(),
            key: "t".to_string(),
            value: Some(ScalarValue::Float(value)),
            data_type: DataType::Float,
            timestamp: 0.0,
            quality: 0,
            tags: HashMap::new(),
            composite: None,
        }
    }

    fn rule_matching_positive(id: &str, name: &str, priority: i32) -> Rule {
        let conditions = serde_json::from_value(serde_json::json!({
            "type": "simple",
            "field": "value",
            "operator": "gt",
            "value": 0,
        }))
        .expect("well-formed raw condition");
        Rule {
            id: id.to_string(),
            name: name.to_string(),
            priority,
            enabled: true,
            version: 1,
            conditions,
            actions: vec![Action { kind: ActionKind::Alert, config: HashMap::new() }],
            tags: HashMap::new(),
            data_type: None,
        }
    }

    #[tokio::test]
    async fn matching_rules_dispatch_in_priority_order() {
        let engine = RuleEngine::with_collaborators(4, EngineConfig::default(), FixedClock::new(0.0), None);
        engine
            .update_rules(vec![rule_matching_positive("low", "low", 1), rule_matching_positive("high", "high", 10)])
            .expect("valid rules");

        let outcome = engine.process(&point(5.0)).await;
        assert_eq!(outcome.matched.len(), 2);
        assert_eq!(outcome.matched[0].rule_id, "high");
        assert_eq!(outcome.matched[1].rule_id, "low");
        assert!(outcome.failures.is_empty());
        assert_eq!(engine.metrics().rules_matched, 2);
    }

    #[tokio::test]
    async fn non_matching_rule_is_skipped_without_dispatch() {
        let engine = RuleEngine::with_collaborators(4, EngineConfig::default(), FixedClock::new(0.0), None);
        engine.update_rules(vec![rule_matching_positive("r1", "r1", 0)]).expect("valid rules");

        let outcome = engine.process(&point(-5.0)).await;
        assert!(outcome.matched.is_empty());
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn declared_data_type_filters_out_mismatched_points() {
        let engine = RuleEngine::with_collaborators(4, EngineConfig::default(), FixedClock::new(0.0), None);
        let mut rule = rule_matching_positive("r1", "r1", 0);
        rule.data_type = Some("int".to_string());
        engine.update_rules(vec![rule]).expect("valid rules");

        let outcome = engine.process(&point(5.0)).await;
        assert!(outcome.matched.is_empty());
    }

    #[test]
    fn handle_cancel_is_observable_after_the_fact() {
        let handle = EngineHandle::new();
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
    }
}
