//! Unfounded-set search and loop-formula learning.
//!
//! Starting from each pending cycle source, the search marks the atoms of the source's component
//! whose justification depends on it, then repeatedly re-justifies marked atoms from literals
//! outside the component or already justified. What remains marked is an unfounded set: every
//! rule of its atoms has a false body or a body inside the set. Each such atom learns the loop
//! formula `~a v external(U)` and is propagated false; a currently true atom turns the formula
//! into a conflict.
use partial_ref::{partial, PartialRef};

use rustc_hash::FxHashSet;

use crate::clause::db::store_theory_conflict;
use crate::clause::{db, ClauseHeader, Tier};
use crate::config::UfsAlgo;
use crate::context::{
    AggregatesP, AnalyzeConflictP, AssignmentP, BinaryClausesP, BusP, ClauseAllocP, ClauseDbP,
    Context, DefinitionsP, ImplGraphP, IntEngineP, ModalP, SolverConfigP, SolverStateP, TmpDataP,
    TrailP, VariablesP, VsidsP, WatchlistsP,
};
use crate::context::alloc_internal_var;
use crate::lit::{Lit, Var};
use crate::prop::{enqueue_assignment, Conflict, Reason};

use super::{DefType, Definitions};

/// Search unfounded sets from all pending cycle sources and assert their loop formulas.
///
/// Returns whether any unfounded set was found.
pub fn search_and_assert(
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
) -> Result<bool, Conflict> {
    let sources = ctx.part_mut(DefinitionsP).take_cycle_sources();
    if sources.is_empty() {
        return Ok(false);
    }

    let mut found = false;

    for cs in sources {
        if ctx
            .part(AssignmentP)
            .lit_is_false(Lit::from_var(cs, false))
        {
            continue;
        }

        let ufs = {
            let mut ctx: partial!(Context, mut DefinitionsP, AggregatesP, AssignmentP, SolverConfigP) =
                ctx.borrow();
            let (defs, ctx) = ctx.split_part_mut(DefinitionsP);
            let aggregates = ctx.part(AggregatesP);
            let assignment = ctx.part(AssignmentP);
            let algo = ctx.part(SolverConfigP).ufs_algo;
            unfounded(defs, aggregates, assignment, algo, cs)
        };

        if let Some(ufs) = ufs {
            if !ufs.is_empty() {
                found = true;
                assert_unfounded_set(ctx.borrow(), &ufs)?;
            }
        }
    }

    Ok(found)
}

/// Compute the unfounded set containing the cycle source, if it is in one.
///
/// Returns `None` when the source could be re-justified.
fn unfounded(
    defs: &mut Definitions,
    aggregates: &crate::aggregate::Aggregates,
    assignment: &crate::prop::Assignment,
    algo: UfsAlgo,
    cs: Var,
) -> Option<FxHashSet<Var>> {
    let scc = defs.heads().get(&cs)?.scc;
    if scc == usize::max_value() {
        return None;
    }

    // Mark everything in the component whose justification leads back to the source. Atoms that
    // never had a cycle-free justification are suspicious as well; treating them as justified
    // would let the source justify itself through them.
    let mut marked: FxHashSet<Var> = FxHashSet::default();
    let mut queue: Vec<Var> = vec![cs];
    marked.insert(cs);

    for &var in defs.defd_vars() {
        let head = &defs.heads()[&var];
        if head.scc == scc
            && head.justification.is_empty()
            && head.def_type != DefType::Conj
            && !assignment.lit_is_false(Lit::from_var(var, false))
            && marked.insert(var)
        {
            queue.push(var);
        }
    }

    while let Some(var) = match algo {
        UfsAlgo::Depth => queue.pop(),
        UfsAlgo::Breadth => {
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        }
    } {
        let pos_lit = Lit::from_var(var, false);

        let mut dependents: Vec<Var> = vec![];
        for &head in defs.disj_occurrences(pos_lit) {
            let data = &defs.heads()[&head];
            if data.scc == scc && data.justification.contains(&pos_lit) {
                dependents.push(head);
            }
        }
        for &head in defs.aggr_occurrences(pos_lit) {
            let data = &defs.heads()[&head];
            if data.scc == scc && data.justification.contains(&pos_lit) {
                dependents.push(head);
            }
        }
        // Conjunctive heads depend on every positive body atom.
        for &head in defs.conj_occurrences(pos_lit) {
            let data = &defs.heads()[&head];
            if data.scc == scc {
                dependents.push(head);
            }
        }

        for head in dependents {
            if assignment.lit_is_false(Lit::from_var(head, false)) {
                continue;
            }
            if marked.insert(head) {
                queue.push(head);
            }
        }
    }

    // Re-justify marked atoms from outside the marked set until a fixpoint.
    let mut new_justifications: Vec<(Var, Vec<Lit>)> = vec![];

    loop {
        let mut unmarked: Vec<Var> = vec![];

        for &var in marked.iter() {
            let (def_type, rule_index) = {
                let head = &defs.heads()[&var];
                (head.def_type, head.rule)
            };

            let usable = |l: Lit| {
                !assignment.lit_is_false(l) && (l.is_negative() || !marked.contains(&l.var()))
            };

            match def_type {
                DefType::Disj => {
                    let body = &defs.rules()[rule_index as usize].body;
                    if let Some(&l) = body.iter().find(|&&l| usable(l)) {
                        unmarked.push(var);
                        new_justifications.push((var, vec![l]));
                    }
                }
                DefType::Conj => {
                    let body = &defs.rules()[rule_index as usize].body;
                    if body.iter().all(|&l| usable(l)) {
                        unmarked.push(var);
                    }
                }
                DefType::Aggr => {
                    let mut jstf = vec![];
                    if aggregates.can_justify_head(rule_index, assignment, usable, &mut jstf) {
                        unmarked.push(var);
                        new_justifications.push((var, jstf));
                    }
                }
            }
        }

        if unmarked.is_empty() {
            break;
        }
        for var in unmarked {
            marked.remove(&var);
        }
    }

    // Atoms that found an outside justification keep it for the next search.
    for (var, justification) in new_justifications {
        defs.head_mut(var).justification = justification;
    }

    if !marked.contains(&cs) {
        // The source found a new justification; no propagation needed.
        return None;
    }

    // Only atoms that are not already false need the loop formula.
    let ufs: FxHashSet<Var> = marked
        .into_iter()
        .filter(|&var| !assignment.lit_is_false(Lit::from_var(var, false)))
        .collect();

    Some(ufs)
}

/// Learn the loop formula of an unfounded set and propagate its atoms to false.
fn assert_unfounded_set(
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
    ufs: &FxHashSet<Var>,
) -> Result<(), Conflict> {
    let aux_limit = ctx.part(SolverConfigP).loop_formula_aux_limit;

    // Collect the external disjuncts of all disjunctive and aggregate members.
    let mut atoms: Vec<(Var, Vec<Lit>)> = vec![];
    {
        let mut ctx = ctx.borrow();
        let (defs, ctx) = ctx.split_part(DefinitionsP);
        let aggregates = ctx.part(AggregatesP);

        for &var in ufs.iter() {
            let head = &defs.heads()[&var];
            match head.def_type {
                // Completion falsifies conjunctive members once a body atom of the set falls.
                DefType::Conj => continue,
                DefType::Disj => {
                    let external: Vec<Lit> = defs.rules()[head.rule as usize]
                        .body
                        .iter()
                        .copied()
                        .filter(|&l| l.is_negative() || !ufs.contains(&l.var()))
                        .collect();
                    atoms.push((var, external));
                }
                DefType::Aggr => {
                    let agg = &aggregates.aggs()[head.rule as usize];
                    let set = &aggregates.sets()[agg.set];
                    let external: Vec<Lit> = set
                        .wls
                        .iter()
                        .map(|wl| match agg.sign {
                            crate::aggregate::AggSign::Lower => wl.lit,
                            crate::aggregate::AggSign::Upper => !wl.lit,
                        })
                        .filter(|&l| !ufs.contains(&l.var()))
                        .collect();
                    atoms.push((var, external));
                }
            }
        }
    }

    // A shared long external disjunction is reified once so every stored clause stays small.
    let shared_external: Option<Vec<Lit>> = atoms
        .first()
        .filter(|_| atoms.len() > 1)
        .map(|(_, external)| external.clone())
        .filter(|external| {
            external.len() > aux_limit && atoms.iter().all(|(_, e)| e == external)
        });

    let aux = if let Some(external) = shared_external {
        let v = alloc_internal_var(ctx.borrow()).positive();
        let mut defining = Vec::with_capacity(external.len() + 1);
        defining.push(!v);
        defining.extend_from_slice(&external);
        add_loop_clause(ctx.borrow(), &defining)?;
        Some(v)
    } else {
        None
    };

    for (var, external) in atoms {
        let mut clause = Vec::with_capacity(external.len() + 1);
        clause.push(Lit::from_var(var, true));
        match aux {
            Some(v) => clause.push(v),
            None => clause.extend_from_slice(&external),
        }
        add_loop_clause(ctx.borrow(), &clause)?;
    }

    Ok(())
}

/// Add one loop-formula clause, propagating its first literal or reporting a conflict.
///
/// The first literal is the one the clause is meant to assert; all others are expected to be
/// false or about to be decided.
fn add_loop_clause(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut TrailP,
        mut WatchlistsP,
    ),
    lits: &[Lit],
) -> Result<(), Conflict> {
    let asserted = lits[0];

    let rest_false = lits[1..]
        .iter()
        .all(|&l| ctx.part(AssignmentP).lit_is_false(l));

    if ctx.part(AssignmentP).lit_is_false(asserted) && rest_false {
        return Err(store_theory_conflict(ctx.borrow(), lits));
    }

    match lits.len() {
        1 => {
            if ctx.part(AssignmentP).lit_is_unk(asserted) {
                enqueue_assignment(ctx.borrow(), asserted, Reason::Unit);
            }
        }
        2 => {
            ctx.part_mut(BinaryClausesP)
                .add_binary_clause([lits[0], lits[1]]);
            if rest_false && ctx.part(AssignmentP).lit_is_unk(asserted) {
                enqueue_assignment(ctx.borrow(), asserted, Reason::Binary([lits[1]]));
            }
        }
        _ => {
            let mut header = ClauseHeader::new();
            header.set_tier(Tier::Core);
            let cref = db::add_clause(ctx.borrow(), header, lits);
            if rest_false && ctx.part(AssignmentP).lit_is_unk(asserted) {
                enqueue_assignment(ctx.borrow(), asserted, Reason::Long(cref));
            }
        }
    }

    Ok(())
}
