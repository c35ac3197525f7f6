use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crossbeam::channel::{self, Receiver, Sender};

use crate::{
    arith::PrimExpr,
    backend::{self, CompileEngine, EngineConfig},
    dtype::DataType,
    error::{LowerError, Result},
    ir::{Expr, Function, Type, Var},
    op::{Attrs, Op, OpStrategy, StrategyRegistry},
    target::{Target, TargetKind},
    te::{self, Tensor, Workload, WorkloadArg},
    tuning::{ApplyHistoryBest, DispatchContext, TuningContext},
};

/// Elementwise compute shaped like its first input, or like the output type
/// when there are no inputs.
fn elemwise(tag: &str, inputs: &[Tensor], out_type: &Type) -> Result<Vec<Tensor>> {
    let (shape, dtype) = match inputs.first() {
        Some(input) => (input.shape().to_vec(), input.dtype()),
        None => match out_type.flatten_tensors().first() {
            Some(ty) => (ty.shape.clone(), ty.dtype),
            None => return Err(LowerError::compute(tag, "no tensor output")),
        },
    };
    Ok(vec![te::compute(shape, dtype, "T_out", tag, inputs)])
}

/// Registry with `nn.relu` and `add`, each with one implementation whose
/// compute runs bump `computes`.
fn registry(computes: Arc<AtomicUsize>) -> Arc<StrategyRegistry> {
    let registry = StrategyRegistry::new();
    for op in ["nn.relu", "add"] {
        let computes = computes.clone();
        registry.register_strategy(op, move |_, _, _, _| {
            let computes = computes.clone();
            let mut strategy = OpStrategy::new();
            strategy.add_implementation(
                move |_, inputs: &[Tensor], out_type: &Type| {
                    computes.fetch_add(1, Ordering::SeqCst);
                    elemwise("elemwise", inputs, out_type)
                },
                &format!("{}.generic", op),
                10,
            );
            Ok(strategy)
        });
    }
    Arc::new(registry)
}

fn engine(computes: Arc<AtomicUsize>) -> CompileEngine {
    CompileEngine::new(registry(computes), Arc::new(TuningContext::default()))
}

fn tensor_type() -> Type {
    Type::static_tensor(&[4], DataType::float32())
}

fn unary(op: &str, param: &str) -> Function {
    let x = Var::new(param, tensor_type());
    let call = Expr::call(Op::get(op), vec![Expr::var(&x)], Attrs::new(), tensor_type());
    Function::new(vec![x], call)
}

#[test]
fn repeated_lowering_hits_cache() {
    let computes = Arc::new(AtomicUsize::new(0));
    let engine = engine(computes.clone());
    let target = Target::llvm();

    let first = engine.lower(unary("nn.relu", "x"), Some(&target)).unwrap();
    let items = engine.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].1.use_count(), 0);

    let second = engine.lower(unary("nn.relu", "y"), Some(&target)).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    let items = engine.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].1.use_count(), 1);
    assert_eq!(computes.load(Ordering::SeqCst), 1);
    assert_eq!(first.func_name, "fused_nn_relu");
    assert_eq!(first.lowered.len(), 1);
    assert_eq!(first.lowered[0].implementation().name(), "nn.relu.generic");
}

#[test]
fn distinct_functions_and_targets_get_distinct_entries() {
    let engine = engine(Arc::new(AtomicUsize::new(0)));
    let relu = engine.lower(unary("nn.relu", "x"), Some(&Target::llvm())).unwrap();
    let add_like = engine.lower(unary("add", "x"), Some(&Target::llvm())).unwrap();
    let on_gpu = engine.lower(unary("nn.relu", "x"), Some(&Target::cuda())).unwrap();
    assert!(!Arc::ptr_eq(&relu, &add_like));
    assert!(!Arc::ptr_eq(&relu, &on_gpu));
    assert_eq!(engine.items().len(), 3);
    assert_eq!(on_gpu.func_name, "fused_nn_relu_1");
    assert_eq!(on_gpu.target.kind(), TargetKind::Cuda);
}

#[test]
fn clear_forces_fresh_lowering() {
    let computes = Arc::new(AtomicUsize::new(0));
    let engine = engine(computes.clone());
    let before = engine.lower(unary("nn.relu", "x"), Some(&Target::llvm())).unwrap();
    engine.clear();
    assert!(engine.items().is_empty());

    let after = engine.lower(unary("nn.relu", "x"), Some(&Target::llvm())).unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(computes.load(Ordering::SeqCst), 2);
    assert_eq!(engine.items()[0].1.use_count(), 0);
}

#[test]
fn failed_lowering_leaves_no_entry() {
    let engine = engine(Arc::new(AtomicUsize::new(0)));
    let x = Var::new("x", tensor_type());
    let relu = Expr::call(Op::get("nn.relu"), vec![Expr::var(&x)], Attrs::new(), tensor_type());
    let add = Expr::call(Op::get("add"), vec![relu.clone(), relu], Attrs::new(), tensor_type());
    let softmax = Expr::call(Op::get("nn.softmax"), vec![add], Attrs::new(), tensor_type());
    let func = Function::new(vec![x], softmax);
    let text = func.to_string();

    let err = engine.lower(func.clone(), Some(&Target::llvm())).unwrap_err();
    match &err {
        LowerError::LoweringFailure { func_text, cause } => {
            assert_eq!(func_text, &text);
            assert!(matches!(**cause, LowerError::UnregisteredStrategy { ref op } if op == "nn.softmax"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    let message = err.to_string();
    assert!(message.starts_with("nn.softmax doesn't have a strategy registered\nError during compile func\n"));
    assert!(message.contains(&text));
    assert!(engine.items().is_empty());

    engine
        .registry()
        .register_strategy("nn.softmax", |_, _, _, _| {
            let mut strategy = OpStrategy::new();
            strategy.add_implementation(
                |_, inputs: &[Tensor], out_type: &Type| elemwise("softmax", inputs, out_type),
                "softmax.generic",
                10,
            );
            Ok(strategy)
        });
    let lowered = engine.lower(func, Some(&Target::llvm())).unwrap();
    assert_eq!(lowered.func_name, "fused_nn_relu_add_nn_softmax");
    assert_eq!(engine.items().len(), 1);
}

#[test]
fn function_source_without_target_is_invalid() {
    let engine = engine(Arc::new(AtomicUsize::new(0)));
    assert!(matches!(
        engine.lower(unary("nn.relu", "x"), None),
        Err(LowerError::InvalidKey(_))
    ));
    let key = backend::get_cache_key(unary("nn.relu", "x"), Some(&Target::llvm())).unwrap();
    assert!(engine.lower(key, None).is_ok());
}

#[test]
fn dump_lists_entries() {
    let engine = engine(Arc::new(AtomicUsize::new(0)));
    engine.lower(unary("nn.relu", "x"), Some(&Target::llvm())).unwrap();
    let expected = "\
====================================
CompilerEngine dump, 1 items cached
------------------------------------
target=llvm
use_count=0
func_name=fused_nn_relu
fn (%x: Tensor[(4i64), float32]) -> Tensor[(4i64), float32] {
  %0 = nn.relu(%x) /* ty=Tensor[(4i64), float32] */;
  %0
}
===================================
";
    assert_eq!(engine.dump(), expected);
    assert_eq!(engine.items()[0].1.use_count(), 0);
}

#[test]
fn shape_functions_cached_separately() {
    let engine = engine(Arc::new(AtomicUsize::new(0)));
    engine
        .registry()
        .register_shape_func("nn.relu", |_, inputs, _| Ok(inputs.to_vec()));
    let target = Target::llvm();
    let value = engine.lower(unary("nn.relu", "x"), Some(&target)).unwrap();
    let shape = engine.lower_shape_func(unary("nn.relu", "x"), Some(&target)).unwrap();
    assert_eq!(value.func_name, "fused_nn_relu");
    assert_eq!(shape.func_name, "fused_nn_relu_shape_func");
    assert_eq!(shape.inputs[0].dtype(), DataType::int64());
    assert_eq!(engine.items().len(), 1);
    assert_eq!(engine.shape_func_items().len(), 1);

    let missing = engine.lower_shape_func(unary("add", "x"), Some(&target)).unwrap_err();
    assert!(matches!(
        missing,
        LowerError::LoweringFailure { ref cause, .. }
            if matches!(**cause, LowerError::UnregisteredShapeFunc { .. })
    ));
    assert_eq!(engine.shape_func_items().len(), 1);
}

#[test]
fn jit_builds_once_and_binds_dynamic_dims() {
    let computes = Arc::new(AtomicUsize::new(0));
    let engine = engine(computes.clone());
    let dynamic = Type::tensor(vec![PrimExpr::any(), PrimExpr::int(4)], DataType::float32());
    let make = || {
        let x = Var::new("x", dynamic.clone());
        let relu = Expr::call(Op::get("nn.relu"), vec![Expr::var(&x)], Attrs::new(), dynamic.clone());
        Function::new(vec![x], relu)
    };

    let packed = engine.jit(make(), Some(&Target::llvm())).unwrap();
    let again = engine.jit(make(), Some(&Target::llvm())).unwrap();
    assert!(packed.same_entry(&again));
    assert_eq!(packed.name(), "fused_nn_relu");
    assert_eq!(computes.load(Ordering::SeqCst), 1);
    assert!(engine.items()[0].1.packed_func().is_some());

    let arg = te::placeholder(
        vec![PrimExpr::int_typed(7, DataType::int32()), PrimExpr::int_typed(4, DataType::int32())],
        DataType::float32(),
        "arg",
    );
    let outputs = packed.call(&[arg]).unwrap();
    assert_eq!(outputs[0].concrete_shape(), Some(vec![7, 4]));
}

/// Registry for `nn.dense` with two equal-priority implementations that
/// annotate their outputs with a workload named after themselves.
fn dense_registry() -> Arc<StrategyRegistry> {
    let registry = StrategyRegistry::new();
    registry.register_strategy("nn.dense", |_, _, _, _| {
        let mut strategy = OpStrategy::new();
        for name in ["dense.simple", "dense.packed"] {
            strategy.add_implementation(
                move |_, inputs: &[Tensor], out_type: &Type| {
                    let workload = Workload::from_tensors(name, inputs)
                        .unwrap_or_else(|| Workload::new(name, vec![]));
                    Ok(elemwise(name, inputs, out_type)?
                        .iter()
                        .map(|out| out.with_workload(workload.clone()))
                        .collect())
                },
                name,
                10,
            );
        }
        Ok(strategy)
    });
    Arc::new(registry)
}

fn dense_workload(name: &str) -> Workload {
    Workload::new(
        name,
        vec![WorkloadArg::Tensor {
            shape: vec![4],
            dtype: DataType::float32(),
        }],
    )
}

#[test]
fn tuned_costs_pick_implementation_and_tasks_are_traced() {
    let mut history = ApplyHistoryBest::new();
    history.record(TargetKind::Llvm, dense_workload("dense.simple"), 5.0, 0);
    history.record(TargetKind::Llvm, dense_workload("dense.packed"), 3.0, 1);
    let tuning = Arc::new(TuningContext::new(Arc::new(history)));
    let env = tuning.begin_trace(None);
    let engine = CompileEngine::new(dense_registry(), tuning.clone());

    let lowered = engine.lower(unary("nn.dense", "x"), Some(&Target::llvm())).unwrap();
    assert_eq!(lowered.lowered[0].implementation().name(), "dense.packed");
    let traced: Vec<Workload> = env.tasks().into_iter().map(|(_, w)| w).collect();
    assert_eq!(
        traced,
        vec![dense_workload("dense.simple"), dense_workload("dense.packed")]
    );
    assert!(tuning.end_trace().is_some());
}

#[test]
fn swapped_dispatch_context_applies_after_clear() {
    let tuning = Arc::new(TuningContext::default());
    let engine = CompileEngine::new(dense_registry(), tuning.clone());
    let target = Target::llvm();
    let untuned = engine.lower(unary("nn.dense", "x"), Some(&target)).unwrap();
    assert_eq!(untuned.lowered[0].implementation().name(), "dense.simple");

    let mut history = ApplyHistoryBest::new();
    history.record(TargetKind::Llvm, dense_workload("dense.packed"), 2.0, 0);
    let previous = tuning.set_dispatch_context(Arc::new(history));
    assert!(previous.query(&target, &dense_workload("dense.packed")).is_fallback());

    let cached = engine.lower(unary("nn.dense", "y"), Some(&target)).unwrap();
    assert!(Arc::ptr_eq(&untuned, &cached));
    engine.clear();
    let tuned = engine.lower(unary("nn.dense", "x"), Some(&target)).unwrap();
    assert_eq!(tuned.lowered[0].implementation().name(), "dense.packed");
}

#[test]
fn strategies_dispatch_on_target_keys_and_attrs() {
    let registry = StrategyRegistry::new();
    registry.register_strategy("nn.relu", |_, _, _, target: &Target| {
        let mut strategy = OpStrategy::new();
        strategy.add_implementation(
            |_, inputs: &[Tensor], out_type: &Type| elemwise("elemwise", inputs, out_type),
            "relu.generic",
            10,
        );
        if target.keys().iter().any(|key| key == "gpu") {
            strategy.add_implementation(
                |_, inputs: &[Tensor], out_type: &Type| elemwise("elemwise", inputs, out_type),
                "relu.gpu",
                15,
            );
        }
        if target.attr("mcpu") == Some("skylake-avx512") {
            strategy.add_implementation(
                |_, inputs: &[Tensor], out_type: &Type| elemwise("elemwise", inputs, out_type),
                "relu.avx512",
                20,
            );
        }
        Ok(strategy)
    });
    let engine = CompileEngine::new(Arc::new(registry), Arc::new(TuningContext::default()));
    let chosen = |target: Target| {
        let lowered = engine.lower(unary("nn.relu", "x"), Some(&target)).unwrap();
        lowered.lowered[0].implementation().name().to_string()
    };
    assert_eq!(chosen(Target::llvm()), "relu.generic");
    assert_eq!(chosen(Target::cuda()), "relu.gpu");
    assert_eq!(
        chosen(Target::llvm().with_attr("mcpu", "skylake-avx512")),
        "relu.avx512"
    );
}

#[test]
fn profiling_disabled_by_config() {
    let mut history = ApplyHistoryBest::new();
    history.record(TargetKind::Llvm, dense_workload("dense.packed"), 1.0, 0);
    let engine = CompileEngine::with_config(
        dense_registry(),
        Arc::new(TuningContext::new(Arc::new(history))),
        EngineConfig {
            use_profile: false,
            ..EngineConfig::default()
        },
    );
    let lowered = engine.lower(unary("nn.dense", "x"), Some(&Target::llvm())).unwrap();
    assert_eq!(lowered.lowered[0].implementation().name(), "dense.simple");
}

#[test]
fn concurrent_requests_lower_once() {
    let computes = Arc::new(AtomicUsize::new(0));
    let engine = engine(computes.clone());
    let target = Target::llvm();
    let results = crossbeam_utils::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|idx| {
                let engine = &engine;
                let target = &target;
                scope.spawn(move |_| {
                    engine
                        .lower(unary("nn.relu", &format!("x{}", idx)), Some(target))
                        .unwrap()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    })
    .unwrap();

    assert_eq!(computes.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|func| Arc::ptr_eq(func, &results[0])));
    let items = engine.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].1.use_count(), 7);
}

/// Registry whose first `nn.relu` compute reports on `started` and then
/// blocks until `release` fires; it fails afterwards when `fail_first` is set.
fn gated_registry(
    computes: Arc<AtomicUsize>,
    started: Sender<()>,
    release: Receiver<()>,
    fail_first: bool,
) -> Arc<StrategyRegistry> {
    let registry = StrategyRegistry::new();
    registry.register_strategy("nn.relu", move |_, _, _, _| {
        let computes = computes.clone();
        let started = started.clone();
        let release = release.clone();
        let mut strategy = OpStrategy::new();
        strategy.add_implementation(
            move |_, inputs: &[Tensor], out_type: &Type| {
                if computes.fetch_add(1, Ordering::SeqCst) == 0 {
                    started.send(()).unwrap();
                    release.recv().unwrap();
                    if fail_first {
                        return Err(LowerError::compute("nn.relu.gated", "first lowering fails"));
                    }
                }
                elemwise("elemwise", inputs, out_type)
            },
            "nn.relu.gated",
            10,
        );
        Ok(strategy)
    });
    Arc::new(registry)
}

#[test]
fn clear_during_lowering_detaches_result() {
    let computes = Arc::new(AtomicUsize::new(0));
    let (started_tx, started_rx) = channel::unbounded();
    let (release_tx, release_rx) = channel::unbounded();
    let engine = CompileEngine::new(
        gated_registry(computes.clone(), started_tx, release_rx, false),
        Arc::new(TuningContext::default()),
    );
    let target = Target::llvm();

    let in_flight = crossbeam_utils::thread::scope(|scope| {
        let handle = scope.spawn(|_| engine.lower(unary("nn.relu", "x"), Some(&target)).unwrap());
        started_rx.recv().unwrap();
        assert!(engine.items().is_empty());
        engine.clear();
        release_tx.send(()).unwrap();
        handle.join().unwrap()
    })
    .unwrap();

    assert_eq!(in_flight.func_name, "fused_nn_relu");
    assert!(engine.items().is_empty());

    let fresh = engine.lower(unary("nn.relu", "y"), Some(&target)).unwrap();
    assert!(!Arc::ptr_eq(&in_flight, &fresh));
    assert_eq!(computes.load(Ordering::SeqCst), 2);
    let items = engine.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].1.use_count(), 0);
}

#[test]
fn waiters_retry_after_failed_lowering() {
    let computes = Arc::new(AtomicUsize::new(0));
    let (started_tx, started_rx) = channel::unbounded();
    let (release_tx, release_rx) = channel::unbounded();
    let engine = CompileEngine::new(
        gated_registry(computes.clone(), started_tx, release_rx, true),
        Arc::new(TuningContext::default()),
    );
    let target = Target::llvm();

    let (failed, waiters) = crossbeam_utils::thread::scope(|scope| {
        let engine = &engine;
        let target = &target;
        let first = scope.spawn(move |_| engine.lower(unary("nn.relu", "x"), Some(target)));
        started_rx.recv().unwrap();
        let waiters: Vec<_> = (0..3)
            .map(|idx| {
                scope.spawn(move |_| {
                    engine.lower(unary("nn.relu", &format!("w{}", idx)), Some(target))
                })
            })
            .collect();
        // Give the waiters time to queue on the in-flight slot.
        std::thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();
        let failed = first.join().unwrap();
        let waiters = waiters
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .collect::<Vec<_>>();
        (failed, waiters)
    })
    .unwrap();

    match failed {
        Err(LowerError::LoweringFailure { cause, .. }) => {
            assert!(matches!(*cause, LowerError::ComputeFailed { .. }));
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(waiters.iter().all(|func| Arc::ptr_eq(func, &waiters[0])));
    assert_eq!(computes.load(Ordering::SeqCst), 2);
    let items = engine.items();
    assert_eq!(items.len(), 1);
    assert!(Arc::ptr_eq(items[0].1.cached_func(), &waiters[0]));
    assert_eq!(items[0].1.use_count(), 2);
}

#[test]
fn reused_param_node_shares_entry_with_fresh_nodes() {
    let engine = engine(Arc::new(AtomicUsize::new(0)));
    let target = Target::llvm();
    let add = |lhs: Expr, rhs: Expr| Expr::call(Op::get("add"), vec![lhs, rhs], Attrs::new(), tensor_type());

    let x = Var::new("x", tensor_type());
    let fresh = Function::new(vec![x.clone()], add(Expr::var(&x), Expr::var(&x)));
    let y = Var::new("y", tensor_type());
    let yv = Expr::var(&y);
    let reused = Function::new(vec![y], add(yv.clone(), yv));

    let first = engine.lower(fresh, Some(&target)).unwrap();
    let second = engine.lower(reused, Some(&target)).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(engine.items().len(), 1);
}

#[test]
fn global_engine_is_shared() {
    assert!(std::ptr::eq(backend::get(), backend::get()));
    assert!(backend::get().config().use_profile);
}
