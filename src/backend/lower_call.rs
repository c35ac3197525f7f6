use log::info;

use super::{
    select::{select_implementation, OpCall},
    shape::normalize_type,
    strategy::get_valid_implementations,
};
use crate::{
    error::Result,
    ir::Call,
    op::{OpImplementation, StrategyRegistry},
    target::Target,
    te::Tensor,
    tuning::TuningContext,
};

/// Collaborators needed to lower one call.
#[derive(Clone, Copy)]
pub struct LowerContext<'a> {
    pub registry: &'a StrategyRegistry,
    pub tuning: &'a TuningContext,
    pub use_profile: bool,
}

/// The implementation chosen for one call and the outputs it produced.
#[derive(Clone, Debug)]
pub struct LoweredOutput {
    implementation: OpImplementation,
    outputs: Vec<Tensor>,
}

impl LoweredOutput {
    pub fn implementation(&self) -> &OpImplementation {
        &self.implementation
    }

    pub fn outputs(&self) -> &[Tensor] {
        &self.outputs
    }
}

fn is_dynamic(call: &Call) -> bool {
    call.checked_type.has_any() || call.args.iter().any(|arg| arg.checked_type().has_any())
}

/// Lower a single primitive call given the tensors of its arguments.
pub fn lower_call(
    call: &Call,
    inputs: &[Tensor],
    target: &Target,
    ctx: &LowerContext,
) -> Result<LoweredOutput> {
    let out_type = normalize_type(&call.checked_type)?;
    let dynamic = is_dynamic(call);

    // Excluded ops are lowered with tracing off on this thread.
    let _suspended = ctx
        .tuning
        .trace_env()
        .filter(|env| env.is_tracing() && !env.wants(call.op.name()))
        .map(|env| env.suspend());

    let candidates = get_valid_implementations(
        ctx.registry,
        &call.op,
        &call.attrs,
        inputs,
        &out_type,
        target,
    )?;
    let op_call = OpCall {
        op: &call.op,
        attrs: &call.attrs,
        inputs,
        out_type: &out_type,
    };
    let use_profile = ctx.use_profile && !dynamic;
    let (implementation, outputs) =
        select_implementation(&candidates, &op_call, target, ctx.tuning, use_profile)?;

    info!(
        "Use implementation {} for op {}",
        implementation.name(),
        call.op
    );
    Ok(LoweredOutput {
        implementation,
        outputs,
    })
}
