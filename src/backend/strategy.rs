use log::debug;

use crate::{
    arith::Analyzer,
    error::Result,
    ir::Type,
    op::{Attrs, Op, OpImplementation, StrategyRegistry},
    target::Target,
    te::Tensor,
};

/// All implementations whose specialization guard holds, in registration order.
///
/// A guard holds only if every clause simplifies to a true constant; clauses
/// that stay symbolic drop the whole specialization.
pub fn get_valid_implementations(
    registry: &StrategyRegistry,
    op: &Op,
    attrs: &Attrs,
    inputs: &[Tensor],
    out_type: &Type,
    target: &Target,
) -> Result<Vec<OpImplementation>> {
    let fstrategy = registry.strategy(op)?;
    let strategy = {
        let _scope = target.enter();
        fstrategy(attrs, inputs, out_type, target)?
    };

    let analyzer = Analyzer::new();
    let mut valid = Vec::new();
    for spec in strategy.specializations {
        if let Some(condition) = &spec.condition {
            if !condition.clauses.iter().all(|clause| analyzer.can_prove(clause)) {
                debug!(
                    "Skipping {} implementation(s) of op {} with unproven condition",
                    spec.implementations.len(),
                    op
                );
                continue;
            }
        }
        valid.extend(spec.implementations);
    }
    Ok(valid)
}
