//! Learns a new clause by analyzing a conflict.
use std::mem::swap;

use partial_ref::{partial, split_borrow, PartialRef};

use crate::clause::{db, ClauseHeader, ClauseRef, Tier};
use crate::context::{
    AggregatesP, AnalyzeConflictP, AssignmentP, ClauseAllocP, ClauseDbP, Context, ImplGraphP,
    IntEngineP, ModalP, TrailP, VsidsP, WatchlistsP,
};
use crate::lit::{Lit, Var};
use crate::prop::{Conflict, EngineTag, Reason};

use vec_mut_scan::VecMutScan;

/// Temporaries for conflict analysis
#[derive(Default)]
pub struct AnalyzeConflict {
    /// This is the learned clause after analysis finishes.
    clause: Vec<Lit>,
    /// Number of literals in the current clause at the current level.
    current_level_count: usize,
    /// Variables in the current clause.
    var_flags: Vec<bool>,
    /// Entries to clean in `var_flags`.
    to_clean: Vec<Var>,
    /// Clauses to bump.
    involved: Vec<ClauseRef>,
    /// Stack for recursive minimization.
    stack: Vec<Lit>,
    /// Premises of the reason currently being resolved.
    reason_lits: Vec<Lit>,
}

impl AnalyzeConflict {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.var_flags.resize(count, false);
    }

    /// The learned clause.
    pub fn clause(&self) -> &[Lit] {
        &self.clause
    }

    /// Long clauses involved in the conflict.
    pub fn involved(&self) -> &[ClauseRef] {
        &self.involved
    }

    /// Mutable access to the learned clause buffer.
    ///
    /// Used by the driver to move the clause out while learning it.
    pub(crate) fn clause_vec(&mut self) -> &mut Vec<Lit> {
        &mut self.clause
    }
}

/// Copy the premises of a variable's reason into `out`, materialising theory reasons.
///
/// A theory reason is resolved by asking the owning engine for a clause with the propagated
/// literal in position 0. The clause is stored in the clause arena and replaces the theory token
/// in the implication graph, so each token is materialised at most once.
pub fn resolve_reason_lits(
    mut ctx: partial!(
        Context,
        mut AggregatesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut IntEngineP,
        mut ModalP,
        mut WatchlistsP,
        AssignmentP,
        TrailP,
    ),
    var: Var,
    out: &mut Vec<Lit>,
) {
    out.clear();

    let reason = *ctx.part(ImplGraphP).reason(var);

    if let Reason::Theory { engine, token } = reason {
        let lit = match ctx.part(AssignmentP).var_value(var) {
            Some(value) => Lit::from_var(var, !value),
            None => unreachable!("reason queried for unassigned variable"),
        };

        let mut clause_lits = vec![];
        match engine {
            EngineTag::Aggregate => {
                crate::aggregate::explain(ctx.borrow(), lit, token, &mut clause_lits)
            }
            EngineTag::IntBound | EngineTag::Constraint => {
                crate::int::explain(ctx.borrow(), lit, token, &mut clause_lits)
            }
            EngineTag::Modal => crate::modal::explain(ctx.borrow(), lit, token, &mut clause_lits),
        }

        debug_assert_eq!(clause_lits.first(), Some(&lit));

        let new_reason = match clause_lits.len() {
            1 => Reason::Unit,
            2 => Reason::Binary([clause_lits[1]]),
            _ => {
                let mut header = ClauseHeader::new();
                header.set_tier(Tier::Core);
                let cref = db::add_clause(ctx.borrow(), header, &clause_lits);
                Reason::Long(cref)
            }
        };
        ctx.part_mut(ImplGraphP).update_reason(var, new_reason);

        out.extend_from_slice(&clause_lits[1..]);
        return;
    }

    split_borrow!(lit_ctx = &(ClauseAllocP) ctx);
    out.extend_from_slice(reason.lits(&lit_ctx));
}

/// Learns a new clause by analyzing a conflict.
///
/// Returns the lowest decision level that makes the learned clause asserting.
pub fn analyze_conflict(
    mut ctx: partial!(
        Context,
        mut AggregatesP,
        mut AnalyzeConflictP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut IntEngineP,
        mut ModalP,
        mut VsidsP,
        mut WatchlistsP,
        AssignmentP,
        TrailP,
    ),
    conflict: Conflict,
) -> usize {
    {
        let analyze = ctx.part_mut(AnalyzeConflictP);

        analyze.clause.clear();
        analyze.involved.clear();
        analyze.current_level_count = 0;
    }

    if ctx.part(TrailP).current_level() == 0 {
        // Conflict with no decisions, generate empty clause
        return 0;
    }

    // We start with all the literals of the conflicted clause
    {
        split_borrow!(lit_ctx = &(ClauseAllocP) ctx);
        let analyze = ctx.part_mut(AnalyzeConflictP);
        analyze.reason_lits.clear();
        analyze.reason_lits.extend_from_slice(conflict.lits(&lit_ctx));
    }

    let mut pending = std::mem::take(&mut ctx.part_mut(AnalyzeConflictP).reason_lits);
    for &lit in pending.iter() {
        add_literal(ctx.borrow(), lit);
    }

    if let Conflict::Long(cref) = conflict {
        ctx.part_mut(AnalyzeConflictP).involved.push(cref);
    }

    // To get rid of all but one literal of the current level, we resolve the clause with the
    // reason for those literals. The correct order for this is reverse chronological.

    let mut trail_pos = ctx.part(TrailP).trail().len();

    loop {
        debug_assert!(trail_pos > 0, "conflict analysis ran past the trail");
        trail_pos -= 1;
        let lit = ctx.part(TrailP).trail()[trail_pos];

        let lit_present = {
            let analyze = ctx.part_mut(AnalyzeConflictP);
            let lit_present = &mut analyze.var_flags[lit.index()];
            // Is the lit present in the current clause?
            if *lit_present {
                *lit_present = false;
                analyze.current_level_count -= 1;
                true
            } else {
                false
            }
        };

        if !lit_present {
            continue;
        }

        if ctx.part(AnalyzeConflictP).current_level_count == 0 {
            // lit is the last literal of the current level present in the current clause,
            // therefore the resulting clause will assert !lit so we put it in position 0
            let analyze = ctx.part_mut(AnalyzeConflictP);
            analyze.clause.push(!lit);
            let end = analyze.clause.len() - 1;
            analyze.clause.swap(0, end);

            break;
        } else {
            // We removed the literal and now add its reason.
            resolve_reason_lits(ctx.borrow(), lit.var(), &mut pending);

            for &reason_lit in pending.iter() {
                add_literal(ctx.borrow(), reason_lit);
            }

            if let &Reason::Long(cref) = ctx.part(ImplGraphP).reason(lit.var()) {
                ctx.part_mut(AnalyzeConflictP).involved.push(cref);
            }
        }
    }

    // This needs var_flags set and keeps some var_flags set.
    minimize_clause(ctx.borrow(), &mut pending);

    ctx.part_mut(AnalyzeConflictP).reason_lits = pending;

    let (analyze, mut ctx) = ctx.split_part_mut(AnalyzeConflictP);

    for var in analyze.to_clean.drain(..) {
        analyze.var_flags[var.index()] = false;
    }

    // We find the highest level literal besides the asserted literal and move it into position 1.
    // This is important to ensure the watchlist constraints are not violated on backtracking.
    let mut backtrack_to = 0;

    if analyze.clause.len() > 1 {
        let (prefix, rest) = analyze.clause.split_at_mut(2);
        let lit_1 = &mut prefix[1];
        backtrack_to = ctx.part(ImplGraphP).level(lit_1.var());
        for lit in rest.iter_mut() {
            let lit_level = ctx.part(ImplGraphP).level(lit.var());
            if lit_level > backtrack_to {
                backtrack_to = lit_level;
                swap(lit_1, lit);
            }
        }
    }

    ctx.part_mut(VsidsP).decay();

    backtrack_to
}

/// Add a literal to the current clause.
fn add_literal(
    mut ctx: partial!(Context, mut AnalyzeConflictP, mut VsidsP, ImplGraphP, TrailP),
    lit: Lit,
) {
    let (analyze, mut ctx) = ctx.split_part_mut(AnalyzeConflictP);
    let lit_level = ctx.part(ImplGraphP).level(lit.var());
    // No need to add literals that are set by unit clauses or already present
    if lit_level > 0 && !analyze.var_flags[lit.index()] {
        ctx.part_mut(VsidsP).bump(lit.var());

        analyze.var_flags[lit.index()] = true;
        if lit_level == ctx.part(TrailP).current_level() {
            analyze.current_level_count += 1;
        } else {
            analyze.clause.push(lit);
            analyze.to_clean.push(lit.var());
        }
    }
}

/// A Bloom filter of levels.
#[derive(Default)]
struct LevelAbstraction {
    bits: u64,
}

impl LevelAbstraction {
    /// Add a level to the Bloom filter.
    pub fn add(&mut self, level: usize) {
        self.bits |= 1 << (level % 64)
    }

    /// Test whether a level could be in the Bloom filter.
    pub fn test(&self, level: usize) -> bool {
        self.bits & (1 << (level % 64)) != 0
    }
}

/// Performs recursive clause minimization.
///
/// **Note:** Requires AnalyzeConflict's var_flags to be set for exactly the variables of the
/// unminimized clause. This also sets some more var_flags, but lists them in to_clean.
///
/// This routine tries to remove some redundant literals of the learned clause. The idea is to
/// detect literals of the learned clause that are already implied by other literals of the
/// clause.
///
/// This is done by performing a DFS in the implication graph (following edges in reverse) for
/// each literal (apart from the asserting one). The search doesn't expand literals already known
/// to be implied by literals of the clause. When a decision literal that is not in the clause is
/// found, it means that the literal is not redundant.
///
/// There are two optimizations used here: The first one is to stop the search as soon as a
/// literal of a decision level not present in the clause is found. If the DFS would be continued
/// it would at some point reach the decision of that level. That decision belongs to a level not
/// in the clause and thus itself can't be in the clause. Checking whether the decision level is
/// among the clause's decision levels is done approximately using a Bloom filter.
///
/// The other optimization is to avoid duplicating work during the DFS searches. When one literal
/// is found to be redundant that means the whole search stayed within the implied literals. We
/// remember this and will not expand any of these literals for the following DFS searches.
fn minimize_clause(
    mut ctx: partial!(
        Context,
        mut AggregatesP,
        mut AnalyzeConflictP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut IntEngineP,
        mut ModalP,
        mut WatchlistsP,
        AssignmentP,
        TrailP,
    ),
    reason_lits: &mut Vec<Lit>,
) {
    let mut involved_levels = LevelAbstraction::default();

    for &lit in ctx.part(AnalyzeConflictP).clause.iter() {
        involved_levels.add(ctx.part(ImplGraphP).level(lit.var()));
    }

    let mut clause = std::mem::take(&mut ctx.part_mut(AnalyzeConflictP).clause);

    let mut scan = VecMutScan::new(&mut clause);

    // we always keep the first literal
    scan.next();

    'next_lit: while let Some(lit) = scan.next() {
        if ctx.part(ImplGraphP).reason(lit.var()) == &Reason::Unit {
            continue;
        }

        // Start the DFS
        ctx.part_mut(AnalyzeConflictP).stack.clear();
        ctx.part_mut(AnalyzeConflictP).stack.push(!*lit);

        // Used to remember which var_flags are set during this DFS
        let top = ctx.part(AnalyzeConflictP).to_clean.len();

        while let Some(dfs_lit) = ctx.part_mut(AnalyzeConflictP).stack.pop() {
            resolve_reason_lits(ctx.borrow(), dfs_lit.var(), reason_lits);

            for &reason_lit in reason_lits.iter() {
                let reason_level = ctx.part(ImplGraphP).level(reason_lit.var());

                let flagged = ctx.part(AnalyzeConflictP).var_flags[reason_lit.index()];
                if !flagged && reason_level > 0 {
                    // We haven't established reason_lit to be redundant, haven't visited it yet
                    // and it's not implied by unit clauses.

                    if ctx.part(ImplGraphP).reason(reason_lit.var()) == &Reason::Unit
                        || !involved_levels.test(reason_level)
                    {
                        // reason_lit is a decision not in the clause or in a decision level known
                        // not to be in the clause. Abort the search.

                        // Reset the var_flags set during _this_ DFS.
                        let analyze = ctx.part_mut(AnalyzeConflictP);
                        for lit in analyze.to_clean.drain(top..) {
                            analyze.var_flags[lit.index()] = false;
                        }
                        continue 'next_lit;
                    } else {
                        let analyze = ctx.part_mut(AnalyzeConflictP);
                        analyze.var_flags[reason_lit.index()] = true;
                        analyze.to_clean.push(reason_lit.var());
                        analyze.stack.push(!reason_lit);
                    }
                }
            }
        }

        lit.remove();
    }

    drop(scan);

    ctx.part_mut(AnalyzeConflictP).clause = clause;
}
