//! Decision heuristics.

pub mod vsids;

use partial_ref::{partial, PartialRef};

use rand::Rng;

use crate::config::PolarityMode;
use crate::context::{
    AssignmentP, Context, ImplGraphP, SolverConfigP, TrailP, VariablesP, VsidsP,
};
use crate::lit::{Lit, Var};
use crate::prop::{enqueue_assignment, Reason};

/// Make a decision and enqueue it.
///
/// Branches on the unassigned decidable variable with the highest activity, or on a random one
/// with the configured frequency. Returns `false` if no decision was made because all variables
/// are assigned.
pub fn make_decision(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ImplGraphP,
        mut TrailP,
        mut VsidsP,
        SolverConfigP,
        VariablesP,
    ),
) -> bool {
    let decision_var = match pick_decision_var(ctx.borrow()) {
        Some(var) => var,
        None => return false,
    };

    let config = ctx.part(SolverConfigP);
    let polarity = match config.polarity_mode {
        PolarityMode::True => false,
        PolarityMode::False => true,
        PolarityMode::Stored => !ctx.part(AssignmentP).last_var_value(decision_var),
        PolarityMode::Random => ctx.part_mut(VsidsP).rng().gen(),
    };

    let decision = Lit::from_var(decision_var, polarity);

    ctx.part_mut(TrailP).new_decision_level();

    enqueue_assignment(ctx.borrow(), decision, Reason::Unit);

    true
}

/// Pick the next variable to branch on.
fn pick_decision_var(
    mut ctx: partial!(Context, mut VsidsP, AssignmentP, SolverConfigP, VariablesP),
) -> Option<Var> {
    let random_freq = ctx.part(SolverConfigP).random_branch_freq;
    if random_freq > 0.0 && ctx.part_mut(VsidsP).rng().gen_bool(random_freq) {
        if let Some(var) = pick_random_var(ctx.borrow()) {
            return Some(var);
        }
    }

    let (vsids, ctx) = ctx.split_part_mut(VsidsP);

    while let Some(var) = vsids.next() {
        if ctx.part(AssignmentP).var_value(var).is_none()
            && ctx.part(VariablesP).is_decidable(var)
        {
            return Some(var);
        }
    }
    None
}

/// Pick a uniformly random unassigned decidable variable.
fn pick_random_var(
    mut ctx: partial!(Context, mut VsidsP, AssignmentP, VariablesP),
) -> Option<Var> {
    let count = ctx.part(AssignmentP).assignment().len();
    if count == 0 {
        return None;
    }
    let (vsids, ctx) = ctx.split_part_mut(VsidsP);
    let start = vsids.rng().gen_range(0, count);
    for offset in 0..count {
        let var = Var::from_index((start + offset) % count);
        if ctx.part(AssignmentP).var_value(var).is_none()
            && ctx.part(VariablesP).is_decidable(var)
        {
            return Some(var);
        }
    }
    None
}

/// Reinsert a variable into the branching queue after it was unassigned.
pub fn make_available(mut ctx: partial!(Context, mut VsidsP), var: Var) {
    ctx.part_mut(VsidsP).make_available(var);
}
