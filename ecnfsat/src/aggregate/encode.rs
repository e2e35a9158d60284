//! Compiling aggregates to clauses.
//!
//! Cardinality and sum aggregates with equivalence semantics can be compiled to CNF with a
//! weighted sequential counter; max aggregates always compile to a disjunction or conjunction of
//! the qualifying set literals. Compilation is skipped when the counter grid would be too large,
//! in which case the partial-watch propagator handles the set.
use log::debug;

use partial_ref::{partial, PartialRef};

use crate::context::{
    AnalyzeConflictP, AssignmentP, BinaryClausesP, BusP, ClauseAllocP, ClauseDbP, Context,
    DefinitionsP, ImplGraphP, IncrementalP, IntEngineP, SolverConfigP, SolverStateP, TmpDataP,
    TrailP, VariablesP, VsidsP, WatchlistsP,
};
use crate::context::alloc_internal_var;
use crate::lit::Lit;
use crate::load::load_clause;

use super::{AggSign, Weight, WL};

/// Counter cells beyond this limit make the clausal encoding unattractive.
const COUNTER_CELL_LIMIT: usize = 50_000;

/// Encode `head <-> (sum of the weighted literals >= bound)` as clauses.
///
/// Uses a weighted sequential counter: cell (i, j) is an atom meaning "the sum of the first i
/// elements is at least j". Returns `false` without adding anything when the counter would
/// exceed the cell limit.
pub fn encode_sum_geq(
    mut ctx: partial!(
        Context,
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
        mut SolverStateP,
        mut TmpDataP,
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
        SolverConfigP,
    ),
    wls: &[WL],
    bound: Weight,
    head: Lit,
) -> bool {
    if bound <= 0 {
        // The empty sum already reaches the bound.
        load_clause(ctx.borrow(), &[head]);
        return true;
    }

    let max_sum: Weight = wls.iter().map(|wl| wl.weight).sum();
    if max_sum < bound {
        load_clause(ctx.borrow(), &[!head]);
        return true;
    }

    let n = wls.len();
    let width = bound as usize;
    if n.saturating_mul(width) > COUNTER_CELL_LIMIT {
        debug!(
            "skipping clausal encoding of a {}x{} counter, using the propagator",
            n, width
        );
        return false;
    }

    // cells[i][j - 1] holds "sum of the first i+1 elements >= j".
    let mut cells: Vec<Vec<Lit>> = Vec::with_capacity(n);

    for i in 0..n {
        let mut row = Vec::with_capacity(width);
        for j in 1..=width {
            let cell = alloc_internal_var(ctx.borrow()).positive();
            row.push(cell);

            let lit_i = wls[i].lit;
            let carry = j as isize - wls[i].weight as isize;

            // cell <-> above v (lit_i ^ carry-cell), where above is "the first i elements alone
            // reach j" and the carry-cell is trivially true when w_i alone covers j.
            if i == 0 {
                if carry <= 0 {
                    // cell <-> lit_i
                    load_clause(ctx.borrow(), &[!lit_i, cell]);
                    load_clause(ctx.borrow(), &[!cell, lit_i]);
                } else {
                    // A single element cannot reach j.
                    load_clause(ctx.borrow(), &[!cell]);
                }
            } else {
                let above = cells[i - 1][j - 1];
                if carry <= 0 {
                    // cell <-> above v lit_i
                    load_clause(ctx.borrow(), &[!above, cell]);
                    load_clause(ctx.borrow(), &[!lit_i, cell]);
                    load_clause(ctx.borrow(), &[!cell, above, lit_i]);
                } else {
                    let carry_cell = cells[i - 1][carry as usize - 1];
                    load_clause(ctx.borrow(), &[!above, cell]);
                    load_clause(ctx.borrow(), &[!lit_i, !carry_cell, cell]);
                    load_clause(ctx.borrow(), &[!cell, above, lit_i]);
                    load_clause(ctx.borrow(), &[!cell, above, carry_cell]);
                }
            }
        }
        cells.push(row);
    }

    let top = cells[n - 1][width - 1];
    load_clause(ctx.borrow(), &[!top, head]);
    load_clause(ctx.borrow(), &[!head, top]);

    true
}

/// Encode a max aggregate as a disjunction or conjunction of the qualifying literals.
///
/// `max(S) >= b` holds iff some literal of weight `>= b` is true; `max(S) <= b` holds iff every
/// literal of weight `> b` is false. With `equivalence` both directions are emitted, with
/// implication only the head-to-aggregate direction.
pub fn encode_max(
    mut ctx: partial!(
        Context,
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
        mut SolverStateP,
        mut TmpDataP,
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
        SolverConfigP,
    ),
    wls: &[WL],
    bound: Weight,
    sign: AggSign,
    head: Lit,
    equivalence: bool,
) {
    match sign {
        AggSign::Lower => {
            let qualifying: Vec<Lit> = wls
                .iter()
                .filter(|wl| wl.weight >= bound)
                .map(|wl| wl.lit)
                .collect();

            let mut forward = vec![!head];
            forward.extend_from_slice(&qualifying);
            load_clause(ctx.borrow(), &forward);

            if equivalence {
                for &lit in qualifying.iter() {
                    load_clause(ctx.borrow(), &[!lit, head]);
                }
            }
        }
        AggSign::Upper => {
            let violating: Vec<Lit> = wls
                .iter()
                .filter(|wl| wl.weight > bound)
                .map(|wl| wl.lit)
                .collect();

            for &lit in violating.iter() {
                load_clause(ctx.borrow(), &[!head, !lit]);
            }

            if equivalence {
                let mut backward = vec![head];
                backward.extend_from_slice(&violating);
                load_clause(ctx.borrow(), &backward);
            }
        }
    }
}
