use std::{
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError, TryLockError,
    },
};

use crossbeam::sync::ShardedLock;
use itertools::Itertools;
use log::debug;

use super::{
    jit::{Build, PackedFunc, SymbolicBuild},
    lower_call::LowerContext,
    lowering::{lower_function, readable_name, CachedFunc, LowerMode},
};
use crate::{
    error::{LowerError, Result},
    ir::{Function, StructuralKey},
    op::StrategyRegistry,
    target::Target,
    tuning::TuningContext,
};

/// Engine-wide settings.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Consult the dispatch context when choosing between implementations.
    /// When off, every call is decided by `plevel` alone.
    pub use_profile: bool,
    /// Longest generated function name before it is shortened with a hash.
    pub max_func_name_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            use_profile: true,
            max_func_name_len: 80,
        }
    }
}

/// Cache key: a source function up to alpha-equivalence, plus the target.
#[derive(Clone, Debug)]
pub struct CCacheKey {
    source_func: Arc<Function>,
    target: Target,
    structural: StructuralKey,
}

impl CCacheKey {
    pub fn new(source_func: Function, target: Target) -> Self {
        let structural = StructuralKey::of(&source_func);
        CCacheKey {
            source_func: Arc::new(source_func),
            target,
            structural,
        }
    }

    pub fn source_func(&self) -> &Function {
        &self.source_func
    }

    pub fn target(&self) -> &Target {
        &self.target
    }
}

impl PartialEq for CCacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.structural == other.structural && self.target == other.target
    }
}

impl Eq for CCacheKey {}

impl Hash for CCacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.structural.hash(state);
        self.target.hash(state);
    }
}

/// Cached artifact of one key.
#[derive(Debug)]
pub struct CacheValue {
    cached_func: Arc<CachedFunc>,
    use_count: AtomicUsize,
    packed_func: Mutex<Option<PackedFunc>>,
}

impl CacheValue {
    fn new(cached_func: CachedFunc) -> Self {
        CacheValue {
            cached_func: Arc::new(cached_func),
            use_count: AtomicUsize::new(0),
            packed_func: Mutex::new(None),
        }
    }

    pub fn cached_func(&self) -> &Arc<CachedFunc> {
        &self.cached_func
    }

    /// Number of requests served by this entry after it was created.
    pub fn use_count(&self) -> usize {
        self.use_count.load(Ordering::SeqCst)
    }

    pub fn packed_func(&self) -> Option<PackedFunc> {
        self.packed_func
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// What to lower: a function (which needs a target) or a ready key.
pub enum LowerSource {
    Function(Function),
    Key(CCacheKey),
}

impl From<Function> for LowerSource {
    fn from(func: Function) -> Self {
        LowerSource::Function(func)
    }
}

impl From<CCacheKey> for LowerSource {
    fn from(key: CCacheKey) -> Self {
        LowerSource::Key(key)
    }
}

pub fn get_cache_key(source: impl Into<LowerSource>, target: Option<&Target>) -> Result<CCacheKey> {
    match source.into() {
        LowerSource::Key(key) => Ok(key),
        LowerSource::Function(func) => match target {
            Some(target) => Ok(CCacheKey::new(func, target.clone())),
            None => Err(LowerError::InvalidKey(
                "Need target when source_func is a Function".to_string(),
            )),
        },
    }
}

type Slot = Arc<Mutex<Option<Arc<CacheValue>>>>;

/// Key to slot map. A slot is created by the first request for a key and
/// filled while its mutex is held, so later requests for the same key wait
/// for that computation instead of starting their own.
#[derive(Default)]
struct CacheTable {
    slots: ShardedLock<HashMap<CCacheKey, Slot>>,
}

impl CacheTable {
    fn slot(&self, key: &CCacheKey) -> Slot {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return slot.clone();
        }
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone()
    }

    fn is_current(&self, key: &CCacheKey, slot: &Slot) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(false, |current| Arc::ptr_eq(current, slot))
    }

    fn remove_if_current(&self, key: &CCacheKey, slot: &Slot) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.get(key).map_or(false, |current| Arc::ptr_eq(current, slot)) {
            slots.remove(key);
        }
    }

    fn get_or_lower<F>(&self, key: &CCacheKey, lower: F) -> Result<Arc<CacheValue>>
    where
        F: Fn() -> Result<CachedFunc>,
    {
        loop {
            let slot = self.slot(key);
            let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(value) = entry.as_ref() {
                value.use_count.fetch_add(1, Ordering::SeqCst);
                debug!(
                    "Cache hit for {} on {}",
                    value.cached_func.func_name, key.target
                );
                return Ok(value.clone());
            }
            // An empty slot that is no longer mapped belonged to a failed
            // computation or to a cleared table.
            if !self.is_current(key, &slot) {
                continue;
            }
            debug!("Cache miss on {}, lowering", key.target);
            return match lower() {
                Ok(func) => {
                    let value = Arc::new(CacheValue::new(func));
                    *entry = Some(value.clone());
                    Ok(value)
                }
                Err(err) => {
                    self.remove_if_current(key, &slot);
                    Err(err)
                }
            };
        }
    }

    /// Filled entries; slots still being computed are skipped.
    fn items(&self) -> Vec<(CCacheKey, Arc<CacheValue>)> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .iter()
            .filter_map(|(key, slot)| {
                let value = match slot.try_lock() {
                    Ok(entry) => entry.clone(),
                    Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().clone(),
                    Err(TryLockError::WouldBlock) => None,
                };
                value.map(|value| (key.clone(), value))
            })
            .sorted_by(|(_, a), (_, b)| a.cached_func.func_name.cmp(&b.cached_func.func_name))
            .collect()
    }

    fn clear(&self) {
        *self.slots.write().unwrap_or_else(PoisonError::into_inner) = HashMap::new();
    }
}

/// Lowers functions for a target and memoizes the results.
///
/// Value lowering and shape-function lowering are cached separately. Each
/// key is lowered at most once at a time; a failed lowering leaves no entry.
pub struct CompileEngine {
    registry: Arc<StrategyRegistry>,
    tuning: Arc<TuningContext>,
    config: EngineConfig,
    builder: Arc<dyn Build>,
    cache: CacheTable,
    shape_func_cache: CacheTable,
    names: Mutex<HashMap<String, usize>>,
}

impl CompileEngine {
    pub fn new(registry: Arc<StrategyRegistry>, tuning: Arc<TuningContext>) -> Self {
        CompileEngine::with_config(registry, tuning, EngineConfig::default())
    }

    pub fn with_config(
        registry: Arc<StrategyRegistry>,
        tuning: Arc<TuningContext>,
        config: EngineConfig,
    ) -> Self {
        CompileEngine {
            registry,
            tuning,
            config,
            builder: Arc::new(SymbolicBuild),
            cache: CacheTable::default(),
            shape_func_cache: CacheTable::default(),
            names: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the builder used by [`CompileEngine::jit`].
    pub fn with_builder(mut self, builder: Arc<dyn Build>) -> Self {
        self.builder = builder;
        self
    }

    pub fn registry(&self) -> &Arc<StrategyRegistry> {
        &self.registry
    }

    pub fn tuning(&self) -> &Arc<TuningContext> {
        &self.tuning
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Lower `source` for `target`, reusing the cached result when the same
    /// function (up to renaming) was lowered before for an equal target.
    pub fn lower(
        &self,
        source: impl Into<LowerSource>,
        target: Option<&Target>,
    ) -> Result<Arc<CachedFunc>> {
        let key = get_cache_key(source, target)?;
        self.lower_value(&key)
            .map(|value| value.cached_func.clone())
            .map_err(|cause| lowering_failure(&key, cause))
    }

    /// Lower the shape function of `source` for `target`.
    pub fn lower_shape_func(
        &self,
        source: impl Into<LowerSource>,
        target: Option<&Target>,
    ) -> Result<Arc<CachedFunc>> {
        let key = get_cache_key(source, target)?;
        self.shape_func_cache
            .get_or_lower(&key, || {
                let walked = lower_function(
                    key.source_func(),
                    key.target(),
                    LowerMode::Shape(&self.registry),
                )?;
                let base = readable_name(&walked.op_names, self.config.max_func_name_len);
                Ok(CachedFunc {
                    target: key.target().clone(),
                    func_name: self.unique_name(format!("{}_shape_func", base)),
                    inputs: walked.inputs,
                    outputs: walked.outputs,
                    lowered: walked.lowered,
                })
            })
            .map(|value| value.cached_func.clone())
            .map_err(|cause| lowering_failure(&key, cause))
    }

    /// Lower `source` and return a callable entry point for it.
    ///
    /// The entry point is built once per cache entry and reused afterwards.
    pub fn jit(&self, source: impl Into<LowerSource>, target: Option<&Target>) -> Result<PackedFunc> {
        let key = get_cache_key(source, target)?;
        self.jit_value(&key)
            .map_err(|cause| lowering_failure(&key, cause))
    }

    fn jit_value(&self, key: &CCacheKey) -> Result<PackedFunc> {
        let value = self.lower_value(key)?;
        let mut packed = value
            .packed_func
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(packed) = packed.as_ref() {
            return Ok(packed.clone());
        }
        let built = self.builder.build(&value.cached_func)?;
        debug!("Built entry point {}", built.name());
        *packed = Some(built.clone());
        Ok(built)
    }

    fn lower_value(&self, key: &CCacheKey) -> Result<Arc<CacheValue>> {
        self.cache.get_or_lower(key, || {
            let ctx = LowerContext {
                registry: &self.registry,
                tuning: &self.tuning,
                use_profile: self.config.use_profile,
            };
            let walked = lower_function(key.source_func(), key.target(), LowerMode::Value(ctx))?;
            let base = readable_name(&walked.op_names, self.config.max_func_name_len);
            Ok(CachedFunc {
                target: key.target().clone(),
                func_name: self.unique_name(base),
                inputs: walked.inputs,
                outputs: walked.outputs,
                lowered: walked.lowered,
            })
        })
    }

    fn unique_name(&self, base: String) -> String {
        let mut names = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        let mut name = base.clone();
        while let Some(count) = names.get_mut(&name) {
            *count += 1;
            name = format!("{}_{}", base, count);
        }
        names.insert(name.clone(), 0);
        name
    }

    /// Drop every cached entry of both namespaces.
    pub fn clear(&self) {
        debug!("Clearing compile engine cache");
        self.cache.clear();
        self.shape_func_cache.clear();
    }

    pub fn items(&self) -> Vec<(CCacheKey, Arc<CacheValue>)> {
        self.cache.items()
    }

    pub fn shape_func_items(&self) -> Vec<(CCacheKey, Arc<CacheValue>)> {
        self.shape_func_cache.items()
    }

    /// Text listing of the value cache.
    pub fn dump(&self) -> String {
        let items = self.items();
        let mut res = String::from("====================================\n");
        res += &format!("CompilerEngine dump, {} items cached\n", items.len());
        for (key, value) in &items {
            res += "------------------------------------\n";
            res += &format!("target={}\n", key.target());
            res += &format!("use_count={}\n", value.use_count());
            res += &format!("func_name={}\n", value.cached_func.func_name);
            res += &key.source_func().to_string();
        }
        res += "===================================\n";
        res
    }
}

impl fmt::Debug for CompileEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileEngine")
            .field("config", &self.config)
            .field("cached", &self.cache.items().len())
            .field("shape_funcs_cached", &self.shape_func_cache.items().len())
            .finish()
    }
}

fn lowering_failure(key: &CCacheKey, cause: LowerError) -> LowerError {
    LowerError::LoweringFailure {
        func_text: key.source_func().to_string(),
        cause: Box::new(cause),
    }
}
