//! Performance-profile oracle and task-extraction session.
//!
//! The lowering core only reads from here: it asks the current
//! [`DispatchContext`] for tuned costs and reports workloads to the active
//! [`TraceEnv`].

use std::{
    cell::Cell,
    collections::{HashMap, HashSet},
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use crossbeam::sync::ShardedLock;
use log::debug;

use crate::{
    target::{Target, TargetKind},
    te::Workload,
};

/// Oracle answer for one workload.
#[derive(Clone, Debug, PartialEq)]
pub enum ProfileConfig {
    Tuned { cost: f64, index: usize },
    /// No tuning record exists; the template default would be used.
    Fallback,
}

impl ProfileConfig {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ProfileConfig::Fallback)
    }

    pub fn cost(&self) -> Option<f64> {
        match self {
            ProfileConfig::Tuned { cost, .. } => Some(*cost),
            ProfileConfig::Fallback => None,
        }
    }
}

pub trait DispatchContext: Send + Sync {
    fn query(&self, target: &Target, workload: &Workload) -> ProfileConfig;
}

/// Context with no tuning records at all.
pub struct FallbackContext;

impl DispatchContext for FallbackContext {
    fn query(&self, _target: &Target, _workload: &Workload) -> ProfileConfig {
        ProfileConfig::Fallback
    }
}

/// Best-known configuration per (target kind, workload).
#[derive(Default)]
pub struct ApplyHistoryBest {
    best: HashMap<(TargetKind, Workload), (f64, usize)>,
}

impl ApplyHistoryBest {
    pub fn new() -> Self {
        ApplyHistoryBest::default()
    }

    /// Add a measurement; only the lowest cost per key is kept.
    pub fn record(&mut self, target: TargetKind, workload: Workload, cost: f64, index: usize) {
        let entry = self
            .best
            .entry((target, workload))
            .or_insert((cost, index));
        if cost.total_cmp(&entry.0).is_lt() {
            *entry = (cost, index);
        }
    }

    pub fn len(&self) -> usize {
        self.best.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_empty()
    }
}

impl DispatchContext for ApplyHistoryBest {
    fn query(&self, target: &Target, workload: &Workload) -> ProfileConfig {
        match self.best.get(&(target.kind(), workload.clone())) {
            Some((cost, index)) => ProfileConfig::Tuned {
                cost: *cost,
                index: *index,
            },
            None => ProfileConfig::Fallback,
        }
    }
}

thread_local! {
    static SUSPENDED: Cell<usize> = Cell::new(0);
}

/// Task-extraction session.
///
/// While tracing, every workload seen during implementation selection is
/// recorded as a tuning task. `wanted_ops` restricts tracing to a set of
/// operator names.
pub struct TraceEnv {
    tracing: AtomicBool,
    wanted_ops: Option<HashSet<String>>,
    tasks: Mutex<Vec<(Target, Workload)>>,
}

impl TraceEnv {
    pub fn new(wanted_ops: Option<HashSet<String>>) -> Self {
        TraceEnv {
            tracing: AtomicBool::new(true),
            wanted_ops,
            tasks: Mutex::new(vec![]),
        }
    }

    /// Tracing flag as seen from the calling thread.
    pub fn is_tracing(&self) -> bool {
        self.tracing.load(Ordering::SeqCst) && SUSPENDED.with(|depth| depth.get() == 0)
    }

    pub fn set_tracing(&self, tracing: bool) {
        self.tracing.store(tracing, Ordering::SeqCst);
    }

    pub fn wants(&self, op: &str) -> bool {
        match &self.wanted_ops {
            Some(wanted) => wanted.contains(op),
            None => true,
        }
    }

    /// Suspend tracing on this thread until the guard drops.
    pub fn suspend(&self) -> TracingSuspension {
        SUSPENDED.with(|depth| depth.set(depth.get() + 1));
        TracingSuspension {
            _not_send: PhantomData,
        }
    }

    pub(crate) fn add_task(&self, target: &Target, workload: &Workload) {
        if !self.is_tracing() {
            return;
        }
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !tasks
            .iter()
            .any(|(t, w)| t == target && w == workload)
        {
            debug!("Extracted task {} for target {}", workload, target);
            tasks.push((target.clone(), workload.clone()));
        }
    }

    pub fn tasks(&self) -> Vec<(Target, Workload)> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Restores tracing for the current thread when dropped.
pub struct TracingSuspension {
    _not_send: PhantomData<*const ()>,
}

impl Drop for TracingSuspension {
    fn drop(&mut self) {
        SUSPENDED.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Handle to the oracle and trace session used by one compile engine.
pub struct TuningContext {
    dispatch: ShardedLock<Arc<dyn DispatchContext>>,
    trace: ShardedLock<Option<Arc<TraceEnv>>>,
}

impl Default for TuningContext {
    fn default() -> Self {
        TuningContext::new(Arc::new(FallbackContext))
    }
}

impl TuningContext {
    pub fn new(dispatch: Arc<dyn DispatchContext>) -> Self {
        TuningContext {
            dispatch: ShardedLock::new(dispatch),
            trace: ShardedLock::new(None),
        }
    }

    pub fn dispatch_context(&self) -> Arc<dyn DispatchContext> {
        self.dispatch
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Install a new dispatch context, returning the previous one.
    pub fn set_dispatch_context(&self, dispatch: Arc<dyn DispatchContext>) -> Arc<dyn DispatchContext> {
        let mut current = self
            .dispatch
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *current, dispatch)
    }

    pub fn trace_env(&self) -> Option<Arc<TraceEnv>> {
        self.trace
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Start a task-extraction session with tracing enabled.
    pub fn begin_trace(&self, wanted_ops: Option<HashSet<String>>) -> Arc<TraceEnv> {
        let env = Arc::new(TraceEnv::new(wanted_ops));
        *self
            .trace
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(env.clone());
        env
    }

    pub fn end_trace(&self) -> Option<Arc<TraceEnv>> {
        self.trace
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}
