use log::debug;

use crate::{
    error::{LowerError, Result},
    ir::Type,
    op::{Attrs, Op, OpImplementation},
    target::Target,
    te::{self, Tensor, Workload},
    tuning::TuningContext,
};

/// The operator call an implementation is being chosen for.
#[derive(Clone, Copy)]
pub struct OpCall<'a> {
    pub op: &'a Op,
    pub attrs: &'a Attrs,
    pub inputs: &'a [Tensor],
    pub out_type: &'a Type,
}

/// Index of the highest `plevel`; the first one wins ties.
fn best_plevel_index(candidates: &[OpImplementation]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, candidate) in candidates.iter().enumerate() {
        match best {
            Some(current) if candidates[current].plevel() >= candidate.plevel() => {}
            _ => best = Some(idx),
        }
    }
    best
}

fn compute_outputs(
    implementation: &OpImplementation,
    call: &OpCall,
    target: &Target,
    tuning: &TuningContext,
) -> Result<(Vec<Tensor>, Option<Workload>)> {
    let outputs = implementation.compute(call.attrs, call.inputs, call.out_type)?;
    let workload = te::get_workload(&outputs);
    if let (Some(env), Some(workload)) = (tuning.trace_env(), workload.as_ref()) {
        env.add_task(target, workload);
    }
    Ok((outputs, workload))
}

/// Pick one implementation out of `candidates` and return it with its outputs.
///
/// Without profiling only the highest-`plevel` candidate is computed. With
/// profiling every candidate is computed so its workload can be looked up;
/// the cheapest tuned candidate wins, and if none is tuned the highest-`plevel`
/// candidate's outputs from the same pass are returned.
pub fn select_implementation(
    candidates: &[OpImplementation],
    call: &OpCall,
    target: &Target,
    tuning: &TuningContext,
    use_profile: bool,
) -> Result<(OpImplementation, Vec<Tensor>)> {
    let best_plevel = best_plevel_index(candidates).ok_or_else(|| LowerError::NoImplementation {
        op: call.op.name().to_string(),
    })?;

    if !use_profile {
        let implementation = &candidates[best_plevel];
        let (outputs, _) = compute_outputs(implementation, call, target, tuning)?;
        return Ok((implementation.clone(), outputs));
    }

    let dispatch = tuning.dispatch_context();
    let mut all_outputs = Vec::with_capacity(candidates.len());
    let mut best_tuned: Option<(usize, f64)> = None;
    for (idx, implementation) in candidates.iter().enumerate() {
        let (outputs, workload) = compute_outputs(implementation, call, target, tuning)?;
        all_outputs.push(outputs);
        let workload = match workload {
            Some(workload) => workload,
            None => continue,
        };
        let cost = match dispatch.query(target, &workload).cost() {
            Some(cost) if cost.is_finite() => cost,
            _ => {
                debug!(
                    "No usable tuned cost for {} ({}) on {}",
                    implementation.name(),
                    workload,
                    target
                );
                continue;
            }
        };
        if best_tuned.map_or(true, |(_, best_cost)| best_cost > cost) {
            best_tuned = Some((idx, cost));
        }
    }

    let chosen = best_tuned.map_or(best_plevel, |(idx, _)| idx);
    let outputs = all_outputs.swap_remove(chosen);
    Ok((candidates[chosen].clone(), outputs))
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::{
        arith::PrimExpr,
        dtype::DataType,
        target::TargetKind,
        te::WorkloadArg,
        tuning::ApplyHistoryBest,
    };

    fn counting_impl(name: &str, plevel: i32, counter: Arc<AtomicUsize>) -> OpImplementation {
        let tag = name.to_string();
        OpImplementation::new(name, plevel, move |_, inputs, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            let out = te::compute(
                vec![PrimExpr::int_typed(4, DataType::int32())],
                DataType::float32(),
                "T_out",
                &tag,
                inputs,
            );
            let workload = Workload::new(&tag, vec![WorkloadArg::Int(4)]);
            Ok(vec![out.with_workload(workload)])
        })
    }

    fn workload(name: &str) -> Workload {
        Workload::new(name, vec![WorkloadArg::Int(4)])
    }

    fn call_parts() -> (Op, Attrs, Type) {
        (
            Op::get("nn.dense"),
            Attrs::new(),
            Type::static_tensor(&[4], DataType::float32()),
        )
    }

    #[test]
    fn highest_plevel_computed_alone() {
        let counters: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let candidates = vec![
            counting_impl("a", 10, counters[0].clone()),
            counting_impl("b", 20, counters[1].clone()),
            counting_impl("c", 5, counters[2].clone()),
        ];
        let (op, attrs, out_type) = call_parts();
        let call = OpCall {
            op: &op,
            attrs: &attrs,
            inputs: &[],
            out_type: &out_type,
        };
        let (chosen, outputs) =
            select_implementation(&candidates, &call, &Target::llvm(), &TuningContext::default(), false)
                .unwrap();
        assert_eq!(chosen.name(), "b");
        assert_eq!(outputs.len(), 1);
        let counts: Vec<usize> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(counts, vec![0, 1, 0]);
    }

    #[test]
    fn plevel_ties_go_to_first() {
        let counter = Arc::new(AtomicUsize::new(0));
        let candidates = vec![
            counting_impl("first", 10, counter.clone()),
            counting_impl("second", 10, counter),
        ];
        assert_eq!(best_plevel_index(&candidates), Some(0));
        assert_eq!(best_plevel_index(&[]), None);
    }

    #[test]
    fn cheapest_tuned_candidate_wins() {
        let counter = Arc::new(AtomicUsize::new(0));
        let candidates = vec![
            counting_impl("a", 10, counter.clone()),
            counting_impl("b", 10, counter.clone()),
        ];
        let mut history = ApplyHistoryBest::new();
        history.record(TargetKind::Llvm, workload("a"), 5.0, 0);
        history.record(TargetKind::Llvm, workload("b"), 3.0, 0);
        let tuning = TuningContext::new(Arc::new(history));
        let (op, attrs, out_type) = call_parts();
        let call = OpCall {
            op: &op,
            attrs: &attrs,
            inputs: &[],
            out_type: &out_type,
        };
        let (chosen, _) =
            select_implementation(&candidates, &call, &Target::llvm(), &tuning, true).unwrap();
        assert_eq!(chosen.name(), "b");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn non_finite_costs_never_win() {
        let counter = Arc::new(AtomicUsize::new(0));
        let candidates = vec![
            counting_impl("nan", 10, counter.clone()),
            counting_impl("finite", 1, counter.clone()),
            counting_impl("inf", 10, counter),
        ];
        let mut history = ApplyHistoryBest::new();
        history.record(TargetKind::Llvm, workload("nan"), f64::NAN, 0);
        history.record(TargetKind::Llvm, workload("finite"), 7.5, 0);
        history.record(TargetKind::Llvm, workload("inf"), f64::INFINITY, 0);
        let tuning = TuningContext::new(Arc::new(history));
        let (op, attrs, out_type) = call_parts();
        let call = OpCall {
            op: &op,
            attrs: &attrs,
            inputs: &[],
            out_type: &out_type,
        };
        let (chosen, outputs) =
            select_implementation(&candidates, &call, &Target::llvm(), &tuning, true).unwrap();
        assert_eq!(chosen.name(), "finite");
        assert_eq!(te::get_workload(&outputs), Some(workload("finite")));
    }

    #[test]
    fn untuned_candidates_fall_back_to_plevel_outputs() {
        let counters: Vec<Arc<AtomicUsize>> = (0..2).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let candidates = vec![
            counting_impl("low", 1, counters[0].clone()),
            counting_impl("high", 9, counters[1].clone()),
        ];
        let (op, attrs, out_type) = call_parts();
        let call = OpCall {
            op: &op,
            attrs: &attrs,
            inputs: &[],
            out_type: &out_type,
        };
        let (chosen, outputs) =
            select_implementation(&candidates, &call, &Target::llvm(), &TuningContext::default(), true)
                .unwrap();
        assert_eq!(chosen.name(), "high");
        assert_eq!(te::get_workload(&outputs), Some(workload("high")));
        let counts: Vec<usize> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(counts, vec![1, 1]);
    }

    #[test]
    fn empty_candidates_fail() {
        let (op, attrs, out_type) = call_parts();
        let call = OpCall {
            op: &op,
            attrs: &attrs,
            inputs: &[],
            out_type: &out_type,
        };
        let err = select_implementation(&[], &call, &Target::llvm(), &TuningContext::default(), true)
            .unwrap_err();
        assert!(matches!(err, LowerError::NoImplementation { op } if op == "nn.dense"));
    }
}
