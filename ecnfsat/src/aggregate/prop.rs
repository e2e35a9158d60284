//! The partial-watch propagator for weighted sets.
//!
//! Each prepared set keeps two disjoint sublists of its weighted literals: the watched list W and
//! the unwatched list NW. The watched side of an element depends on monotonicity: a lower-bound
//! aggregate is threatened when elements become false, an upper-bound aggregate when they become
//! true. W is chosen so that even if every unwatched element takes its worst value, the watched
//! elements alone decide the most stringent aggregate; any assignment that can flip an aggregate
//! therefore wakes the propagator through a watched element.
//!
//! On a wakeup the propagator recomputes the pessimistic value `pess` (only literals assigned
//! true count) and the optimistic value `optim` (everything not false counts) and propagates
//! heads and set literals against every aggregate of the set. Afterwards the watches are rebuilt
//! in weight-sorted order, extending W when assigned elements no longer carry it.
use partial_ref::{partial, PartialRef};

use crate::bus::Bus;
use crate::clause::db::store_theory_conflict;
use crate::context::{
    AggregatesP, AnalyzeConflictP, AssignmentP, BinaryClausesP, BusP, ClauseAllocP, ClauseDbP,
    Context, DefinitionsP, ImplGraphP, IntEngineP, ModalP, SolverConfigP, SolverStateP, TmpDataP,
    TrailP, VariablesP, VsidsP, WatchlistsP,
};
use crate::lit::Lit;
use crate::prop::{enqueue_assignment, Assignment, Conflict, EngineTag, ImplGraph, Reason};

use super::{AggSet, AggSign, AggStatus, AggSem, Aggregates, Weight};

/// What a token of the aggregate engine stands for.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum ExplainKind {
    /// The head was propagated true: the aggregate certainly holds.
    HeadTrue,
    /// The head was propagated false: the aggregate certainly fails.
    HeadFalse,
    /// A set literal was propagated true to keep the aggregate decidable.
    LitTrue,
    /// A set literal was propagated false.
    LitFalse,
}

fn encode_token(agg_index: u32, kind: ExplainKind) -> u32 {
    (agg_index << 2)
        | match kind {
            ExplainKind::HeadTrue => 0,
            ExplainKind::HeadFalse => 1,
            ExplainKind::LitTrue => 2,
            ExplainKind::LitFalse => 3,
        }
}

fn decode_token(token: u32) -> (u32, ExplainKind) {
    let kind = match token & 3 {
        0 => ExplainKind::HeadTrue,
        1 => ExplainKind::HeadFalse,
        2 => ExplainKind::LitTrue,
        _ => ExplainKind::LitFalse,
    };
    (token >> 2, kind)
}

/// Run the propagator of one weighted set.
pub fn run_set_propagator(
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
    set_index: u32,
    dense: u32,
) -> Result<(), Conflict> {
    {
        // The pending literals only served as the wakeup; propagation recomputes the bounds.
        let mut pending = vec![];
        ctx.part_mut(BusP).take_pending(dense, &mut pending);
    }

    let agg_count = {
        let aggregates = ctx.part(AggregatesP);
        aggregates.sets[set_index as usize].aggs.len()
    };

    // Propagate to a local fixpoint; each enqueued set literal changes the bounds.
    loop {
        let mut changed = false;

        for agg_pos in 0..agg_count {
            changed |= propagate_one_aggregate(ctx.borrow(), set_index, agg_pos)?;
        }

        if !changed {
            break;
        }
    }

    let (aggregates, mut ctx) = ctx.split_part_mut(AggregatesP);
    let set = &mut aggregates.sets[set_index as usize];
    choose_watches(set, ctx.part_mut(BusP));

    Ok(())
}

/// Propagate a single aggregate of a set. Returns whether a new assignment was enqueued.
fn propagate_one_aggregate(
    mut ctx: partial!(
        Context,
        mut AggregatesP,
        mut AssignmentP,
        mut BusP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut TrailP,
        mut WatchlistsP,
    ),
    set_index: u32,
    agg_pos: usize,
) -> Result<bool, Conflict> {
    let (agg_index, head, sign, sem, bound) = {
        let aggregates = ctx.part(AggregatesP);
        let set = &aggregates.sets[set_index as usize];
        let agg_index = set.aggs[agg_pos];
        let agg = &aggregates.aggs[agg_index as usize];
        (agg_index, agg.head, agg.sign, agg.sem, agg.bound)
    };

    let (pess, optim, status) = {
        let aggregates = ctx.part(AggregatesP);
        let assignment = ctx.part(AssignmentP);
        let set = &aggregates.sets[set_index as usize];
        let pess = set.pess(assignment);
        let optim = set.optim(assignment);
        let agg = &aggregates.aggs[agg_index as usize];
        (pess, optim, agg.status(pess, optim))
    };

    let head_value = ctx.part(AssignmentP).lit_value(head);

    let mut changed = false;

    // Head propagation from the aggregate's status.
    match sem {
        AggSem::Equivalence | AggSem::Defined => match status {
            AggStatus::CertainlyTrue => {
                changed |= theory_enqueue(
                    ctx.borrow(),
                    head,
                    encode_token(agg_index, ExplainKind::HeadTrue),
                )?;
            }
            AggStatus::CertainlyFalse => {
                changed |= theory_enqueue(
                    ctx.borrow(),
                    !head,
                    encode_token(agg_index, ExplainKind::HeadFalse),
                )?;
            }
            AggStatus::Open => (),
        },
        AggSem::Implication => {
            if status == AggStatus::CertainlyFalse {
                changed |= theory_enqueue(
                    ctx.borrow(),
                    !head,
                    encode_token(agg_index, ExplainKind::HeadFalse),
                )?;
            }
        }
    }

    // Set literal propagation once the head is known.
    let enforce = match (sem, head_value) {
        (AggSem::Equivalence, Some(value)) | (AggSem::Defined, Some(value)) => Some(value),
        (AggSem::Implication, Some(true)) => Some(true),
        _ => None,
    };

    if let Some(must_hold) = enforce {
        let candidates: Vec<(Lit, Weight)> = {
            let aggregates = ctx.part(AggregatesP);
            let assignment = ctx.part(AssignmentP);
            let set = &aggregates.sets[set_index as usize];
            set.wls
                .iter()
                .filter(|wl| assignment.lit_is_unk(wl.lit))
                .map(|wl| (wl.lit, wl.weight))
                .collect()
        };

        let is_prod = {
            let aggregates = ctx.part(AggregatesP);
            aggregates.sets[set_index as usize].ty == super::AggType::Prod
        };

        let without = |total: Weight, w: Weight| if is_prod { total / w } else { total - w };
        let with = |total: Weight, w: Weight| if is_prod { total * w } else { total + w };

        for (lit, weight) in candidates {
            match (must_hold, sign) {
                // value must stay >= bound: a literal whose loss drops optim below it is forced.
                (true, AggSign::Lower) => {
                    if without(optim, weight) < bound {
                        changed |= theory_enqueue(
                            ctx.borrow(),
                            lit,
                            encode_token(agg_index, ExplainKind::LitTrue),
                        )?;
                    }
                }
                // value must stay <= bound: a literal that would push pess past it is forced out.
                (true, AggSign::Upper) => {
                    if with(pess, weight) > bound {
                        changed |= theory_enqueue(
                            ctx.borrow(),
                            !lit,
                            encode_token(agg_index, ExplainKind::LitFalse),
                        )?;
                    }
                }
                // value must end up < bound.
                (false, AggSign::Lower) => {
                    if with(pess, weight) >= bound {
                        changed |= theory_enqueue(
                            ctx.borrow(),
                            !lit,
                            encode_token(agg_index, ExplainKind::LitFalse),
                        )?;
                    }
                }
                // value must end up > bound.
                (false, AggSign::Upper) => {
                    if without(optim, weight) <= bound {
                        changed |= theory_enqueue(
                            ctx.borrow(),
                            lit,
                            encode_token(agg_index, ExplainKind::LitTrue),
                        )?;
                    }
                }
            }
        }
    }

    Ok(changed)
}

/// Enqueue a theory propagation, materialising a conflict clause when the literal is false.
fn theory_enqueue(
    mut ctx: partial!(
        Context,
        mut AggregatesP,
        mut AssignmentP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut TrailP,
        mut WatchlistsP,
    ),
    lit: Lit,
    token: u32,
) -> Result<bool, Conflict> {
    if ctx.part(AssignmentP).lit_is_true(lit) {
        return Ok(false);
    }

    if ctx.part(AssignmentP).lit_is_false(lit) {
        let mut clause_lits = vec![];
        {
            let mut ctx: partial!(Context, AggregatesP, AssignmentP, ImplGraphP) = ctx.borrow();
            let (aggregates, ctx) = ctx.split_part(AggregatesP);
            build_explanation(
                aggregates,
                ctx.part(AssignmentP),
                ctx.part(ImplGraphP),
                lit,
                token,
                usize::max_value(),
                &mut clause_lits,
            );
        }
        return Err(store_theory_conflict(ctx.borrow(), &clause_lits));
    }

    enqueue_assignment(
        ctx.borrow(),
        lit,
        Reason::Theory {
            engine: EngineTag::Aggregate,
            token,
        },
    );
    Ok(true)
}

/// Materialise the reason clause for a propagated literal.
///
/// The propagated literal is placed first; the premises are the negations of the assignment that
/// forced it, replayed in trail order until the bound crossed.
pub fn explain(
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
    lit: Lit,
    token: u32,
    out: &mut Vec<Lit>,
) {
    let (aggregates, ctx) = ctx.split_part(AggregatesP);
    let max_depth = ctx.part(ImplGraphP).depth(lit.var());
    build_explanation(
        aggregates,
        ctx.part(AssignmentP),
        ctx.part(ImplGraphP),
        lit,
        token,
        max_depth,
        out,
    );
}

/// Shared explanation construction for reasons and conflicts.
///
/// Only assignments strictly older than `max_depth` may serve as premises; for conflicts the
/// whole trail is admissible.
fn build_explanation(
    aggregates: &Aggregates,
    assignment: &Assignment,
    impl_graph: &ImplGraph,
    lit: Lit,
    token: u32,
    max_depth: usize,
    out: &mut Vec<Lit>,
) {
    let (agg_index, kind) = decode_token(token);
    let agg = aggregates.aggs[agg_index as usize].clone();
    let set = &aggregates.sets[agg.set];

    out.clear();
    out.push(lit);

    let older = |l: Lit| {
        l.var() != lit.var()
            && !assignment.lit_is_unk(l)
            && impl_graph.depth(l.var()) < max_depth
    };

    // Premises from the set literals, oldest first, until the bound argument is complete.
    let buf = &mut vec![];

    match kind {
        ExplainKind::HeadTrue => {
            match agg.sign {
                // pess >= bound: the true literals carry the value.
                AggSign::Lower => collect_until(set, assignment, impl_graph, buf, older, true, |value| {
                    value >= agg.bound
                }),
                // optim <= bound: the false literals removed the excess.
                AggSign::Upper => collect_until(set, assignment, impl_graph, buf, older, false, |value| {
                    value <= agg.bound
                }),
            };
        }
        ExplainKind::HeadFalse => {
            match agg.sign {
                // optim < bound.
                AggSign::Lower => collect_until(set, assignment, impl_graph, buf, older, false, |value| {
                    value < agg.bound
                }),
                // pess > bound.
                AggSign::Upper => collect_until(set, assignment, impl_graph, buf, older, true, |value| {
                    value > agg.bound
                }),
            };
        }
        ExplainKind::LitTrue | ExplainKind::LitFalse => {
            // The head's value is part of the premise.
            let head_premise = match assignment.lit_value(agg.head) {
                Some(true) => !agg.head,
                Some(false) => agg.head,
                None => !agg.head,
            };
            out.push(head_premise);

            let prop_weight = set
                .wls
                .iter()
                .find(|wl| wl.lit.var() == lit.var())
                .map(|wl| wl.weight)
                .unwrap_or(match set.ty {
                    super::AggType::Prod => 1,
                    _ => 0,
                });

            match (kind, agg.sign) {
                // Forced true: losing it would drop optim below the lower bound.
                (ExplainKind::LitTrue, AggSign::Lower) => {
                    collect_until(set, assignment, impl_graph, buf, older, false, |value| {
                        below_with(set, value, prop_weight, agg.bound)
                    });
                }
                // Forced true: staying out would leave the value at or below the upper bound.
                (ExplainKind::LitTrue, AggSign::Upper) => {
                    collect_until(set, assignment, impl_graph, buf, older, false, |value| {
                        at_most_with(set, value, prop_weight, agg.bound)
                    });
                }
                // Forced false: joining would push pess past the upper bound (or reach the lower
                // bound while the aggregate must fail).
                (ExplainKind::LitFalse, AggSign::Upper) => {
                    collect_until(set, assignment, impl_graph, buf, older, true, |value| {
                        exceeds_with(set, value, prop_weight, agg.bound)
                    });
                }
                (ExplainKind::LitFalse, AggSign::Lower) => {
                    collect_until(set, assignment, impl_graph, buf, older, true, |value| {
                        reaches_with(set, value, prop_weight, agg.bound)
                    });
                }
                (ExplainKind::HeadTrue, _) | (ExplainKind::HeadFalse, _) => {
                    unreachable!("head kinds handled above")
                }
            }
        }
    }

    buf.sort_by_key(|&(depth, _)| depth);
    for &(_, premise) in buf.iter() {
        out.push(premise);
    }
}

fn below_with(set: &AggSet, value: Weight, w: Weight, bound: Weight) -> bool {
    match set.ty {
        super::AggType::Prod => value / w < bound,
        _ => value - w < bound,
    }
}

fn at_most_with(set: &AggSet, value: Weight, w: Weight, bound: Weight) -> bool {
    match set.ty {
        super::AggType::Prod => value / w <= bound,
        _ => value - w <= bound,
    }
}

fn exceeds_with(set: &AggSet, value: Weight, w: Weight, bound: Weight) -> bool {
    match set.ty {
        super::AggType::Prod => value * w > bound,
        _ => value + w > bound,
    }
}

fn reaches_with(set: &AggSet, value: Weight, w: Weight, bound: Weight) -> bool {
    match set.ty {
        super::AggType::Prod => value * w >= bound,
        _ => value + w >= bound,
    }
}

/// Collect premise literals in trail order until `done` holds for the running value.
///
/// With `from_true` the premises are the literals assigned true (the value starts at the neutral
/// element and grows); otherwise they are the false literals (the value starts optimistic and
/// shrinks). The collected premises are the clause literals: a true premise enters negated, a
/// false premise enters as is.
fn collect_until(
    set: &AggSet,
    assignment: &Assignment,
    impl_graph: &ImplGraph,
    buf: &mut Vec<(u32, Lit)>,
    admissible: impl Fn(Lit) -> bool,
    from_true: bool,
    done: impl Fn(Weight) -> bool,
) {
    let mut entries: Vec<(usize, usize)> = vec![]; // (depth, wl index)
    for (index, wl) in set.wls.iter().enumerate() {
        let relevant = if from_true {
            assignment.lit_is_true(wl.lit)
        } else {
            assignment.lit_is_false(wl.lit)
        };
        if relevant && admissible(wl.lit) {
            entries.push((impl_graph.depth(wl.lit.var()), index));
        }
    }
    entries.sort_unstable();

    let mut value = if from_true { set.neutral } else { set.max_possible };

    if done(value) {
        return;
    }

    for (depth, index) in entries {
        let wl = set.wls[index];
        value = match (set.ty, from_true) {
            (super::AggType::Prod, true) => value * wl.weight,
            (super::AggType::Prod, false) => value / wl.weight,
            (_, true) => value + wl.weight,
            (_, false) => value - wl.weight,
        };
        let premise = if from_true { !wl.lit } else { wl.lit };
        buf.push((depth as u32, premise));
        if done(value) {
            return;
        }
    }
}

/// Rebuild the watched/unwatched split of a set and subscribe the watched sides.
///
/// For the most stringent lower bound, enough large elements are watched on their false side
/// that the watched elements alone can still reach the bound. For the most stringent upper
/// bound, elements are watched on their true side until the unwatched remainder can no longer
/// exceed the bound by itself.
pub fn choose_watches(set: &mut AggSet, bus: &mut Bus) {
    set.watched.clear();
    set.unwatched.clear();

    let lower_target = set.lower_watch_target;
    let upper_target = set.upper_watch_target;

    let is_prod = set.ty == super::AggType::Prod;

    let mut lower_watched = vec![false; set.wls.len()];

    if let Some(bound) = lower_target {
        // Largest weights first, one extra element of slack.
        let mut value = set.neutral;
        let mut crossed = false;
        for index in (0..set.wls.len()).rev() {
            let w = set.wls[index].weight;
            lower_watched[index] = true;
            bus.subscribe(!set.wls[index].lit, set.dense);
            if crossed {
                break;
            }
            value = if is_prod { value * w } else { value + w };
            if value >= bound {
                crossed = true;
            }
        }
    }

    let mut upper_watched = vec![false; set.wls.len()];

    if let Some(bound) = upper_target {
        // Watch from the top until the unwatched rest cannot exceed the bound alone.
        let mut rest = set.max_possible;
        for index in (0..set.wls.len()).rev() {
            if rest <= bound {
                break;
            }
            let w = set.wls[index].weight;
            upper_watched[index] = true;
            bus.subscribe(set.wls[index].lit, set.dense);
            rest = if is_prod { rest / w } else { rest - w };
        }
    }

    for index in 0..set.wls.len() {
        if lower_watched[index] || upper_watched[index] {
            set.watched.push(index as u32);
        } else {
            set.unwatched.push(index as u32);
        }
    }
}
