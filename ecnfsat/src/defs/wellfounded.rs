//! Full-model verification of definitions.
//!
//! On every total assignment the engine recomputes, per definition, the set of atoms derivable
//! under the model's reduct. Atoms that are true in the model but not derivable form an
//! unfounded set and yield a loop-formula conflict. Under well-founded semantics, definitions
//! with a mixed loop additionally run the alternating fixpoint: if the well-founded model leaves
//! atoms undefined, no total model agrees with it and the current decisions are refuted.
use partial_ref::{partial, PartialRef};

use rustc_hash::FxHashSet;

use crate::clause::db::store_theory_conflict;
use crate::config::DefSemantics;
use crate::context::{
    AggregatesP, AnalyzeConflictP, AssignmentP, BinaryClausesP, BusP, ClauseAllocP, ClauseDbP,
    Context, DefinitionsP, ImplGraphP, IntEngineP, ModalP, SolverConfigP, SolverStateP, TmpDataP,
    TrailP, VariablesP, VsidsP, WatchlistsP,
};
use crate::lit::{Lit, Var};
use crate::prop::{Assignment, Conflict, Reason};

use super::{DefType, Definitions};

/// Check every definition against the current total assignment.
pub fn check_full_model(
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
        mut IntEngineP,
        mut ModalP,
        mut TmpDataP,
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
        SolverConfigP,
        SolverStateP,
    ),
) -> Result<(), Conflict> {
    if ctx.part(DefinitionsP).defd_vars().is_empty() {
        return Ok(());
    }

    let def_ids: Vec<usize> = {
        let defs = ctx.part(DefinitionsP);
        let mut ids: Vec<usize> = defs
            .defd_vars()
            .iter()
            .map(|var| defs.heads()[var].def_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };

    for def_id in def_ids {
        check_derivability(ctx.borrow(), def_id)?;

        let needs_wf_check = ctx.part(SolverConfigP).def_semantics == DefSemantics::WellFounded
            && ctx.part(DefinitionsP).mixed_defs().contains(&def_id);
        if needs_wf_check {
            check_wellfounded_total(ctx.borrow(), def_id)?;
        }
    }

    Ok(())
}

/// Atoms of one definition under the current model.
fn members(defs: &Definitions, def_id: usize) -> Vec<Var> {
    defs.defd_vars()
        .iter()
        .copied()
        .filter(|var| defs.heads()[var].def_id == def_id)
        .collect()
}

/// Whether one head is derivable given the derived set so far.
fn head_derivable(
    defs: &Definitions,
    aggregates: &crate::aggregate::Aggregates,
    assignment: &Assignment,
    def_id: usize,
    derived: &FxHashSet<Var>,
    possible: Option<&FxHashSet<Var>>,
    var: Var,
) -> bool {
    // A positive literal on a defined atom of this definition must be derived; a negative one is
    // evaluated against `possible` when given (the alternating fixpoint) and against the model
    // otherwise (the reduct).
    let lit_holds = |l: Lit| {
        let defined_here = defs
            .heads()
            .get(&l.var())
            .map(|h| h.def_id == def_id)
            .unwrap_or(false);
        if !defined_here {
            return assignment.lit_is_true(l);
        }
        if l.is_positive() {
            derived.contains(&l.var())
        } else {
            match possible {
                Some(possible) => !possible.contains(&l.var()),
                None => assignment.lit_is_true(l),
            }
        }
    };

    let head = &defs.heads()[&var];
    match head.def_type {
        DefType::Disj => defs.rules()[head.rule as usize]
            .body
            .iter()
            .any(|&l| lit_holds(l)),
        DefType::Conj => defs.rules()[head.rule as usize]
            .body
            .iter()
            .all(|&l| lit_holds(l)),
        DefType::Aggr => aggregates.holds_under(head.rule, lit_holds),
    }
}

/// Least fixpoint of the derivable atoms of one definition.
fn derivable_set(
    defs: &Definitions,
    aggregates: &crate::aggregate::Aggregates,
    assignment: &Assignment,
    def_id: usize,
    atoms: &[Var],
    possible: Option<&FxHashSet<Var>>,
) -> FxHashSet<Var> {
    let mut derived: FxHashSet<Var> = FxHashSet::default();
    loop {
        let mut changed = false;
        for &var in atoms {
            if derived.contains(&var) {
                continue;
            }
            if head_derivable(defs, aggregates, assignment, def_id, &derived, possible, var) {
                derived.insert(var);
                changed = true;
            }
        }
        if !changed {
            return derived;
        }
    }
}

/// Reduct check: every atom that is true in the model must be derivable.
fn check_derivability(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut WatchlistsP,
        AggregatesP,
        DefinitionsP,
    ),
    def_id: usize,
) -> Result<(), Conflict> {
    let unfounded: Vec<Var> = {
        let defs = ctx.part(DefinitionsP);
        let aggregates = ctx.part(AggregatesP);
        let assignment = ctx.part(AssignmentP);
        let atoms = members(defs, def_id);
        let derived = derivable_set(defs, aggregates, assignment, def_id, &atoms, None);

        atoms
            .into_iter()
            .filter(|&var| {
                assignment.lit_is_true(Lit::from_var(var, false)) && !derived.contains(&var)
            })
            .collect()
    };

    if unfounded.is_empty() {
        return Ok(());
    }

    // Loop-formula conflict for the first unfounded atom: it is true, every external support of
    // the set is false.
    let clause = {
        let defs = ctx.part(DefinitionsP);
        let aggregates = ctx.part(AggregatesP);
        let in_set: FxHashSet<Var> = unfounded.iter().copied().collect();
        let var = unfounded[0];

        let mut clause = vec![Lit::from_var(var, true)];
        let head = &defs.heads()[&var];
        match head.def_type {
            DefType::Disj | DefType::Conj => {
                for &l in defs.rules()[head.rule as usize].body.iter() {
                    if l.is_negative() || !in_set.contains(&l.var()) {
                        clause.push(l);
                    }
                }
            }
            DefType::Aggr => {
                let agg = &aggregates.aggs()[head.rule as usize];
                for wl in aggregates.sets()[agg.set].wls.iter() {
                    let l = match agg.sign {
                        crate::aggregate::AggSign::Lower => wl.lit,
                        crate::aggregate::AggSign::Upper => !wl.lit,
                    };
                    if !in_set.contains(&l.var()) {
                        clause.push(l);
                    }
                }
            }
        }
        clause
    };

    // Everything on the right-hand side is false in the current model, so the clause conflicts.
    let conflicting = clause
        .iter()
        .all(|&l| ctx.part(AssignmentP).lit_is_false(l));
    debug_assert!(conflicting, "unfounded atom with a true external support");

    Err(store_theory_conflict(ctx.borrow(), &clause))
}

/// Alternating fixpoint: the well-founded model must be total and equal to the current model.
fn check_wellfounded_total(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut WatchlistsP,
        AggregatesP,
        DefinitionsP,
        ImplGraphP,
        TrailP,
    ),
    def_id: usize,
) -> Result<(), Conflict> {
    let wf_total_and_matching = {
        let defs = ctx.part(DefinitionsP);
        let aggregates = ctx.part(AggregatesP);
        let assignment = ctx.part(AssignmentP);
        let atoms = members(defs, def_id);

        let mut true_set: FxHashSet<Var> = FxHashSet::default();
        let mut possible: FxHashSet<Var> = atoms.iter().copied().collect();

        loop {
            let next_true =
                derivable_set(defs, aggregates, assignment, def_id, &atoms, Some(&possible));
            let next_possible =
                derivable_set(defs, aggregates, assignment, def_id, &atoms, Some(&true_set));

            if next_true == true_set && next_possible == possible {
                break;
            }
            true_set = next_true;
            possible = next_possible;
        }

        true_set == possible
            && atoms.iter().all(|&var| {
                assignment.lit_is_true(Lit::from_var(var, false)) == true_set.contains(&var)
            })
    };

    if wf_total_and_matching {
        return Ok(());
    }

    // No total model extends the current open-atom choices; refute the decisions that led here.
    let mut clause: Vec<Lit> = vec![];
    {
        let trail = ctx.part(TrailP);
        let impl_graph = ctx.part(ImplGraphP);
        for &lit in trail.trail().iter() {
            if impl_graph.level(lit.var()) > 0 && impl_graph.reason(lit.var()) == &Reason::Unit {
                clause.push(!lit);
            }
        }
    }

    if clause.is_empty() {
        // Forced at the root: any conflict value works, analysis at level 0 derives the empty
        // clause.
        let var = ctx.part(DefinitionsP).defd_vars()[0];
        let model_lit = match ctx.part(AssignmentP).var_value(var) {
            Some(true) => Lit::from_var(var, false),
            _ => Lit::from_var(var, true),
        };
        return Err(Conflict::Unit([!model_lit]));
    }

    Err(store_theory_conflict(ctx.borrow(), &clause))
}
