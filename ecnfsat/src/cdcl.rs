//! Conflict driven clause learning.

use partial_ref::{partial, split_borrow, PartialRef};

use crate::analyze_conflict::analyze_conflict;
use crate::bus::{final_check, propagate};
use crate::clause::{bump_clause_activity, db, decay_clause_activities, ClauseHeader, Tier};
use crate::context::{
    AggregatesP, AnalyzeConflictP, AssignmentP, BinaryClausesP, BusP, ClauseActivityP,
    ClauseAllocP, ClauseDbP, Context, DefinitionsP, ImplGraphP, IncrementalP, IntEngineP, ModalP,
    SolverConfigP, SolverStateP, TmpDataP, TrailP, VariablesP, VsidsP, WatchlistsP,
};
use crate::decision::make_decision;
use crate::incremental::{enqueue_assumption, EnqueueAssumption};
use crate::lit::Lit;
use crate::prop::{backtrack, enqueue_assignment, Conflict, Reason};
use crate::state::SatState;

/// Find a conflict, learn a clause and backtrack.
pub fn conflict_step(
    mut ctx: partial!(
        Context,
        mut AggregatesP,
        mut AnalyzeConflictP,
        mut AssignmentP,
        mut BinaryClausesP,
        mut BusP,
        mut ClauseActivityP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut DefinitionsP,
        mut ImplGraphP,
        mut IncrementalP,
        mut IntEngineP,
        mut ModalP,
        mut SolverStateP,
        mut TmpDataP,
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
        SolverConfigP,
    ),
) {
    let conflict = find_conflict(ctx.borrow());

    let conflict = match conflict {
        Ok(()) => {
            ctx.part_mut(SolverStateP).sat_state = SatState::Sat;
            return;
        }
        Err(FoundConflict::Stopped) => {
            ctx.part_mut(SolverStateP).sat_state = SatState::Stopped;
            return;
        }
        Err(FoundConflict::Assumption) => {
            ctx.part_mut(SolverStateP).sat_state = SatState::UnsatUnderAssumptions;
            return;
        }
        Err(FoundConflict::Conflict(conflict)) => conflict,
    };

    // Theory engines can report a conflict whose literals all live below the current decision
    // level, e.g. a loop formula discovered late. Analysis requires a current-level literal, so
    // first return to the deepest level the conflict actually involves.
    let conflict_level = {
        split_borrow!(lit_ctx = &(ClauseAllocP) ctx);
        conflict
            .lits(&lit_ctx)
            .iter()
            .map(|&l| ctx.part(ImplGraphP).level(l.var()))
            .max()
            .unwrap_or(0)
    };
    if conflict_level < ctx.part(TrailP).current_level() {
        backtrack(ctx.borrow(), conflict_level);
    }

    let backtrack_to = analyze_conflict(ctx.borrow(), conflict);

    {
        let mut ctx = ctx.borrow();
        let (analyze, mut ctx) = ctx.split_part(AnalyzeConflictP);

        for &cref in analyze.involved() {
            bump_clause_activity(ctx.borrow(), cref);
        }
    }

    decay_clause_activities(ctx.borrow());

    backtrack(ctx.borrow(), backtrack_to);

    let clause = std::mem::take(ctx.part_mut(AnalyzeConflictP).clause_vec());

    let reason = match clause.len() {
        0 => {
            ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
            return;
        }
        1 => Reason::Unit,
        2 => {
            ctx.part_mut(BinaryClausesP)
                .add_binary_clause([clause[0], clause[1]]);
            Reason::Binary([clause[1]])
        }
        _ => {
            let header = assess_learned_clause(ctx.borrow(), &clause);
            let cref = db::add_clause(ctx.borrow(), header, &clause);
            Reason::Long(cref)
        }
    };

    enqueue_assignment(ctx.borrow(), clause[0], reason);

    *ctx.part_mut(AnalyzeConflictP).clause_vec() = clause;
}

/// Pick the database tier of a learned clause from its glue level.
///
/// The glue (literal block distance) is the number of distinct decision levels among the clause's
/// literals.
fn assess_learned_clause(
    ctx: partial!(Context, ImplGraphP, TrailP),
    lits: &[Lit],
) -> ClauseHeader {
    let mut levels: Vec<usize> = lits
        .iter()
        .map(|&lit| ctx.part(ImplGraphP).level(lit.var()))
        .collect();
    levels.sort_unstable();
    levels.dedup();
    let glue = levels.len();

    let mut header = ClauseHeader::new();
    header.set_tier(if glue <= 2 {
        Tier::Core
    } else if glue <= 6 {
        Tier::Mid
    } else {
        Tier::Local
    });
    header
}

/// Return type of [`find_conflict`].
///
/// Specifies whether a conflict was found during propagation, while enqueuing assumptions, or
/// whether the search was cancelled.
enum FoundConflict {
    Conflict(Conflict),
    Assumption,
    Stopped,
}

impl From<Conflict> for FoundConflict {
    fn from(conflict: Conflict) -> FoundConflict {
        FoundConflict::Conflict(conflict)
    }
}

/// Find a conflict.
///
/// Returns `Err` if a conflict was found and `Ok` if a satisfying assignment was found instead.
///
/// A full assignment is only accepted after every engine passed its final consistency check;
/// checks may produce a conflict (e.g. a well-foundedness violation) or extend the problem (a
/// lazy integer variable splitting its domain), in which case the search continues.
fn find_conflict(
    mut ctx: partial!(
        Context,
        mut AggregatesP,
        mut AnalyzeConflictP,
        mut AssignmentP,
        mut BinaryClausesP,
        mut BusP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut DefinitionsP,
        mut ImplGraphP,
        mut IncrementalP,
        mut IntEngineP,
        mut ModalP,
        mut SolverStateP,
        mut TmpDataP,
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
        SolverConfigP,
    ),
) -> Result<(), FoundConflict> {
    loop {
        propagate(ctx.borrow()).map_err(FoundConflict::Conflict)?;

        if ctx.part(SolverStateP).stop.stop_requested() {
            return Err(FoundConflict::Stopped);
        }

        match enqueue_assumption(ctx.borrow()) {
            EnqueueAssumption::Enqueued => continue,
            EnqueueAssumption::Conflict => return Err(FoundConflict::Assumption),
            EnqueueAssumption::Done => (),
        }

        if !make_decision(ctx.borrow()) {
            final_check(ctx.borrow()).map_err(FoundConflict::Conflict)?;

            if ctx.part(AssignmentP).is_total() {
                return Ok(());
            }
            // A final check introduced new atoms; keep searching.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use partial_ref::IntoPartialRefMut;

    use crate::context::set_var_count;
    use crate::load::load_clause;

    use crate::test::{sat_formula, sgen_unsat_formula};

    #[test]
    fn propagation_is_idempotent() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 4);

        load_clause(ctx.borrow(), &lits![1]);
        load_clause(ctx.borrow(), &lits![-1, 2]);
        load_clause(ctx.borrow(), &lits![-2, 3, 4]);

        propagate(ctx.borrow()).unwrap();
        let saturated = ctx.part(TrailP).trail().len();

        // A second run on the saturated state assigns nothing and finds no conflict.
        propagate(ctx.borrow()).unwrap();
        assert_eq!(ctx.part(TrailP).trail().len(), saturated);
    }

    #[test]
    fn level_0_unsat() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        let formula = cnf_formula![
            1, 2, 3;
            -1;
            1, -2;
            2, -3;
        ];

        set_var_count(ctx.borrow(), formula.var_count());

        for clause in formula.iter() {
            load_clause(ctx.borrow(), clause);
        }

        while ctx.part(SolverStateP).sat_state == SatState::Unknown {
            conflict_step(ctx.borrow());
        }

        assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unsat);
    }

    proptest! {
        #[test]
        fn sgen_unsat(formula in sgen_unsat_formula(1..7usize)) {
            let mut ctx = Context::default();
            let mut ctx = ctx.into_partial_ref_mut();

            set_var_count(ctx.borrow(), formula.var_count());

            for clause in formula.iter() {
                load_clause(ctx.borrow(), clause);
            }

            while ctx.part(SolverStateP).sat_state == SatState::Unknown {
                conflict_step(ctx.borrow());
            }

            prop_assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unsat);
        }

        #[test]
        fn sat(formula in sat_formula(4..20usize, 10..100usize, 0.05..0.2, 0.9..1.0)) {
            let mut ctx = Context::default();
            let mut ctx = ctx.into_partial_ref_mut();

            set_var_count(ctx.borrow(), formula.var_count());

            for clause in formula.iter() {
                load_clause(ctx.borrow(), clause);
            }

            while ctx.part(SolverStateP).sat_state == SatState::Unknown {
                conflict_step(ctx.borrow());
            }

            prop_assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Sat);

            for clause in formula.iter() {
                prop_assert!(clause.iter().any(|&lit| ctx.part(AssignmentP).lit_is_true(lit)));
            }
        }

        #[test]
        fn sgen_unsat_incremental_clauses(formula in sgen_unsat_formula(1..7usize)) {
            let mut ctx = Context::default();
            let mut ctx = ctx.into_partial_ref_mut();

            set_var_count(ctx.borrow(), formula.var_count());

            let mut last_state = SatState::Sat;

            for clause in formula.iter() {
                load_clause(ctx.borrow(), clause);
                while ctx.part(SolverStateP).sat_state == SatState::Unknown {
                    conflict_step(ctx.borrow());
                }

                if ctx.part(SolverStateP).sat_state != last_state {
                    prop_assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unsat);
                    prop_assert_eq!(last_state, SatState::Sat);
                    last_state = ctx.part(SolverStateP).sat_state;
                }
            }

            prop_assert_eq!(last_state, SatState::Unsat);
        }
    }
}
