//! Incremental solving under assumptions.
use partial_ref::{partial, PartialRef};

use rustc_hash::FxHashSet;

use crate::context::{
    AggregatesP, AssignmentP, BusP, ClauseAllocP, ClauseDbP, Context, DefinitionsP, ImplGraphP,
    IncrementalP, IntEngineP, ModalP, SolverStateP, TrailP, VariablesP, VsidsP, WatchlistsP,
};
use crate::analyze_conflict::resolve_reason_lits;
use crate::lit::{Lit, Var};
use crate::prop::{enqueue_assignment, full_restart, Reason};
use crate::state::SatState;

/// Incremental solving.
#[derive(Default)]
pub struct Incremental {
    assumptions: Vec<Lit>,
    failed_core: Vec<Lit>,
    assumption_levels: usize,
}

impl Incremental {
    /// Current number of decision levels used for assumptions.
    pub fn assumption_levels(&self) -> usize {
        self.assumption_levels
    }

    /// Resets assumption_levels to zero on a full restart.
    pub fn full_restart(&mut self) {
        self.assumption_levels = 0;
    }

    /// Subset of assumptions that made the formula unsatisfiable.
    pub fn failed_core(&self) -> &[Lit] {
        &self.failed_core
    }
}

/// Return type of [`enqueue_assumption`].
pub enum EnqueueAssumption {
    Done,
    Enqueued,
    Conflict,
}

/// Change the currently active assumptions.
pub fn set_assumptions(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BusP,
        mut DefinitionsP,
        mut IncrementalP,
        mut IntEngineP,
        mut SolverStateP,
        mut TrailP,
        mut VsidsP,
    ),
    assumptions: &[Lit],
) {
    full_restart(ctx.borrow());

    let state = ctx.part_mut(SolverStateP);

    state.sat_state = match state.sat_state {
        SatState::Unsat => SatState::Unsat,
        _ => SatState::Unknown,
    };

    let incremental = ctx.part_mut(IncrementalP);

    incremental.assumptions.clear();
    incremental.assumptions.extend_from_slice(assumptions);
}

/// Enqueue another assumption if possible.
///
/// Assumptions are pushed as pseudo-decisions at successive levels before any branching happens.
/// Returns whether an assumption was enqueued, whether no assumptions are left or whether the
/// assumptions result in a conflict.
pub fn enqueue_assumption(
    mut ctx: partial!(
        Context,
        mut AggregatesP,
        mut AssignmentP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut IncrementalP,
        mut IntEngineP,
        mut ModalP,
        mut TrailP,
        mut WatchlistsP,
        VariablesP,
    ),
) -> EnqueueAssumption {
    while let Some(&assumption) = ctx
        .part(IncrementalP)
        .assumptions
        .get(ctx.part(TrailP).current_level())
    {
        match ctx.part(AssignmentP).lit_value(assumption) {
            Some(false) => {
                analyze_assumption_conflict(ctx.borrow(), assumption);
                return EnqueueAssumption::Conflict;
            }
            Some(true) => {
                // The assumption is already implied; open an empty level so the next one is
                // considered.
                ctx.part_mut(TrailP).new_decision_level();
                let level = ctx.part(TrailP).current_level();
                ctx.part_mut(IncrementalP).assumption_levels = level;
            }
            None => {
                ctx.part_mut(TrailP).new_decision_level();
                let level = ctx.part(TrailP).current_level();
                ctx.part_mut(IncrementalP).assumption_levels = level;
                enqueue_assignment(ctx.borrow(), assumption, Reason::Unit);
                return EnqueueAssumption::Enqueued;
            }
        }
    }

    EnqueueAssumption::Done
}

/// Compute the subset of assumptions that cause a conflict.
///
/// The failing assumption is false under the previously enqueued assumptions. We walk the
/// implication graph backwards from its negation and collect every assumption reached; theory
/// reasons are materialised on the way, exactly as during regular conflict analysis.
fn analyze_assumption_conflict(
    mut ctx: partial!(
        Context,
        mut AggregatesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut IncrementalP,
        mut IntEngineP,
        mut ModalP,
        mut WatchlistsP,
        AssignmentP,
        TrailP,
        VariablesP,
    ),
    assumption: Lit,
) {
    let mut core = vec![assumption];
    let mut seen: FxHashSet<Var> = FxHashSet::default();
    let mut queue = vec![!assumption];
    let mut reason_lits = vec![];

    while let Some(lit) = queue.pop() {
        if !seen.insert(lit.var()) {
            continue;
        }

        if ctx.part(ImplGraphP).level(lit.var()) == 0 {
            continue;
        }

        if ctx.part(ImplGraphP).reason(lit.var()) == &Reason::Unit {
            // A source assigned above level 0 is an assumption.
            core.push(lit);
            continue;
        }

        resolve_reason_lits(ctx.borrow(), lit.var(), &mut reason_lits);
        for &premise in reason_lits.iter() {
            queue.push(!premise);
        }
    }

    let incremental = ctx.part_mut(IncrementalP);
    incremental.failed_core = core;
}
