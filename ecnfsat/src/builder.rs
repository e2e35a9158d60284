//! The declaration vocabulary of the solver.
//!
//! Everything a problem consists of enters through these functions: clauses, implications,
//! rules, weighted sets and aggregates, integer variables and constraints, optimisation
//! objectives. Declarations are collected by the engines; [`finish`] runs the structural pass
//! (aggregate normalisation and compilation, rule completion and dependency analysis, order-atom
//! materialisation) exactly once before the first search.
use partial_ref::{partial, PartialRef};

use crate::aggregate::{
    encode, prepare_set, register_set_propagator, AggSem, AggSign, AggType, Aggregate, Weight, WL,
};
use crate::config::AggSaving;
use crate::context::{
    set_var_count, AggregatesP, AnalyzeConflictP, AssignmentP, BinaryClausesP, BusP, ClauseAllocP,
    ClauseDbP, Context, DefinitionsP, ImplGraphP, IncrementalP, IntEngineP, ModalP, OptimizeP,
    SolverConfigP, SolverStateP, TmpDataP, TrailP, VariablesP, VsidsP, WatchlistsP,
};
use crate::defs::{self, Rule};
use crate::error::{Error, Result};
use crate::int::{self, BoundLit, Constraint, IntView, LazyGrounder};
use crate::lit::{Lit, Var};
use crate::load::load_clause;
use crate::optimize::Objective;

/// Direction of a reified implication.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ImplicationKind {
    Equivalent,
    /// The body implies the head.
    ImpliedBy,
    /// The head implies the body.
    Implies,
}

/// Comparison operators over integer terms.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum IntCmp {
    Eq,
    Neq,
    Leq,
    Lt,
    Geq,
    Gt,
}

macro_rules! builder_parts {
    () => {
        partial!(
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
            mut OptimizeP,
            mut SolverStateP,
            mut TmpDataP,
            mut TrailP,
            mut VariablesP,
            mut VsidsP,
            mut WatchlistsP,
            SolverConfigP,
        )
    };
}

/// Fail once the declarations are frozen.
fn check_open(ctx: partial!(Context, SolverStateP)) -> Result<()> {
    if ctx.part(SolverStateP).finished {
        Err(Error::DeclarationAfterFinish)
    } else {
        Ok(())
    }
}

/// Grow the variable tables to cover every literal of a declaration.
fn ensure_lits(mut ctx: builder_parts!(), lits: &[Lit]) {
    let needed = lits.iter().map(|l| l.index() + 1).max().unwrap_or(0);
    if needed > 0 {
        set_var_count(ctx.borrow(), needed);
    }
}

/// Declare a disjunction of literals.
pub fn add_clause(mut ctx: builder_parts!(), lits: &[Lit]) -> Result<()> {
    check_open(ctx.borrow())?;
    ensure_lits(ctx.borrow(), lits);
    load_clause(ctx.borrow(), lits);
    Ok(())
}

/// Declare a reified implication between a head and a conjunctive or disjunctive body.
pub fn add_implication(
    mut ctx: builder_parts!(),
    head: Lit,
    kind: ImplicationKind,
    body: &[Lit],
    conjunctive: bool,
) -> Result<()> {
    check_open(ctx.borrow())?;
    ensure_lits(ctx.borrow(), body);
    ensure_lits(ctx.borrow(), &[head]);

    let forward = kind != ImplicationKind::ImpliedBy;
    let backward = kind != ImplicationKind::Implies;

    if forward {
        // head => body
        if conjunctive {
            for &l in body {
                load_clause(ctx.borrow(), &[!head, l]);
            }
        } else {
            let mut clause = vec![!head];
            clause.extend_from_slice(body);
            load_clause(ctx.borrow(), &clause);
        }
    }

    if backward {
        // body => head
        if conjunctive {
            let mut clause = vec![head];
            clause.extend(body.iter().map(|&l| !l));
            load_clause(ctx.borrow(), &clause);
        } else {
            for &l in body {
                load_clause(ctx.borrow(), &[head, !l]);
            }
        }
    }

    Ok(())
}

/// Declare a rule of an inductive definition.
pub fn add_rule(
    mut ctx: builder_parts!(),
    conjunctive: bool,
    head: Var,
    body: &[Lit],
    def_id: usize,
) -> Result<()> {
    check_open(ctx.borrow())?;
    ensure_lits(ctx.borrow(), body);
    ensure_lits(ctx.borrow(), &[head.positive()]);

    ctx.part_mut(DefinitionsP).push_rule(Rule {
        head,
        body: body.to_vec(),
        conjunctive,
        def_id,
    });
    Ok(())
}

/// Declare a weighted set.
pub fn add_weighted_set(
    mut ctx: builder_parts!(),
    set_id: usize,
    ty: AggType,
    wls: &[WL],
) -> Result<()> {
    check_open(ctx.borrow())?;
    let lits: Vec<Lit> = wls.iter().map(|wl| wl.lit).collect();
    ensure_lits(ctx.borrow(), &lits);

    ctx.part_mut(AggregatesP)
        .declare_set(set_id, ty, wls.to_vec())
}

/// Declare an aggregate over a previously declared set.
pub fn add_aggregate(
    mut ctx: builder_parts!(),
    set_id: usize,
    head: Lit,
    bound: Weight,
    sign: AggSign,
    sem: AggSem,
    def_id: Option<usize>,
) -> Result<()> {
    check_open(ctx.borrow())?;
    ensure_lits(ctx.borrow(), &[head]);

    ctx.part_mut(AggregatesP)
        .declare_aggregate(set_id, head, bound, sign, sem, def_id)
}

/// Declare an integer variable over a contiguous range.
pub fn add_int_range(
    mut ctx: builder_parts!(),
    external_id: usize,
    lo: Weight,
    hi: Weight,
    lazy: bool,
) -> Result<()> {
    check_open(ctx.borrow())?;
    let index = ctx
        .part_mut(IntEngineP)
        .declare_range(external_id, lo, hi, lazy)?;
    int::register_var_propagator(ctx.borrow(), index);
    Ok(())
}

/// Declare an integer variable over an enumerated domain.
pub fn add_int_enum(
    mut ctx: builder_parts!(),
    external_id: usize,
    values: &[Weight],
) -> Result<()> {
    check_open(ctx.borrow())?;
    let index = ctx
        .part_mut(IntEngineP)
        .declare_enum(external_id, values.to_vec())?;
    int::register_var_propagator(ctx.borrow(), index);
    Ok(())
}

/// Reify a clause over a bound-literal answer.
fn reify_bound(mut ctx: builder_parts!(), head: Lit, bound: BoundLit) {
    match bound {
        BoundLit::True => load_clause(ctx.borrow(), &[head]),
        BoundLit::False => load_clause(ctx.borrow(), &[!head]),
        BoundLit::Lit(l) => {
            load_clause(ctx.borrow(), &[!head, l]);
            load_clause(ctx.borrow(), &[head, !l]);
        }
    }
}

/// Declare `head <-> (x cmp c)` for a constant comparison.
pub fn add_int_const_cmp(
    mut ctx: builder_parts!(),
    head: Lit,
    x: usize,
    cmp: IntCmp,
    c: Weight,
) -> Result<()> {
    check_open(ctx.borrow())?;
    ensure_lits(ctx.borrow(), &[head]);
    let x = ctx.part(IntEngineP).lookup(x)?;

    let bound = match cmp {
        IntCmp::Leq => int::leq_lit(ctx.borrow(), x, c),
        IntCmp::Lt => int::leq_lit(ctx.borrow(), x, c.saturating_sub(1)),
        IntCmp::Geq => int::geq_lit(ctx.borrow(), x, c),
        IntCmp::Gt => int::geq_lit(ctx.borrow(), x, c.saturating_add(1)),
        IntCmp::Eq => int::eq_lit(ctx.borrow(), x, c),
        IntCmp::Neq => match int::eq_lit(ctx.borrow(), x, c) {
            BoundLit::True => BoundLit::False,
            BoundLit::False => BoundLit::True,
            BoundLit::Lit(l) => BoundLit::Lit(!l),
        },
    };

    reify_bound(ctx.borrow(), head, bound);
    Ok(())
}

/// Declare `head <-> (x cmp y)` over two integer views.
pub fn add_int_binary(
    mut ctx: builder_parts!(),
    head: Lit,
    x: IntView,
    cmp: IntCmp,
    y: IntView,
) -> Result<()> {
    check_open(ctx.borrow())?;
    ensure_lits(ctx.borrow(), &[head]);
    let terms = [(1, x.var), (-1, y.var)];
    let bound = y
        .offset
        .checked_sub(x.offset)
        .ok_or(Error::WeightOverflow)?;
    linear_internal(ctx.borrow(), head, &terms, cmp, bound)
}

/// Declare `head <-> (sum of w*x cmp bound)` over externally named variables.
pub fn add_int_linear(
    mut ctx: builder_parts!(),
    head: Lit,
    terms: &[(Weight, usize)],
    cmp: IntCmp,
    bound: Weight,
) -> Result<()> {
    check_open(ctx.borrow())?;
    ensure_lits(ctx.borrow(), &[head]);

    let mut internal = Vec::with_capacity(terms.len());
    for &(w, external) in terms {
        internal.push((w, ctx.part(IntEngineP).lookup(external)?));
    }
    linear_internal(ctx.borrow(), head, &internal, cmp, bound)
}

/// Normalise a linear comparison to `<=` constraints over internal variable indices.
fn linear_internal(
    mut ctx: builder_parts!(),
    head: Lit,
    terms: &[(Weight, usize)],
    cmp: IntCmp,
    bound: Weight,
) -> Result<()> {
    let negated = |terms: &[(Weight, usize)]| -> Result<Vec<(Weight, usize)>> {
        terms
            .iter()
            .map(|&(w, v)| w.checked_neg().map(|w| (w, v)).ok_or(Error::WeightOverflow))
            .collect()
    };

    match cmp {
        IntCmp::Leq => {
            let index = int::declare_constraint(
                ctx.part_mut(IntEngineP),
                Constraint::LinearLeq {
                    head,
                    terms: terms.to_vec(),
                    bound,
                },
            );
            int::register_constraint(ctx.borrow(), index);
            Ok(())
        }
        IntCmp::Lt => linear_internal(
            ctx.borrow(),
            head,
            terms,
            IntCmp::Leq,
            bound.checked_sub(1).ok_or(Error::WeightOverflow)?,
        ),
        IntCmp::Geq => {
            let terms = negated(terms)?;
            linear_internal(
                ctx.borrow(),
                head,
                &terms,
                IntCmp::Leq,
                bound.checked_neg().ok_or(Error::WeightOverflow)?,
            )
        }
        IntCmp::Gt => {
            let terms = negated(terms)?;
            linear_internal(
                ctx.borrow(),
                head,
                &terms,
                IntCmp::Leq,
                bound
                    .checked_add(1)
                    .and_then(Weight::checked_neg)
                    .ok_or(Error::WeightOverflow)?,
            )
        }
        IntCmp::Eq => {
            // head <-> (<= ^ >=), through two auxiliary halves.
            let le = crate::context::alloc_internal_var(ctx.borrow()).positive();
            let ge = crate::context::alloc_internal_var(ctx.borrow()).positive();
            linear_internal(ctx.borrow(), le, terms, IntCmp::Leq, bound)?;
            linear_internal(ctx.borrow(), ge, terms, IntCmp::Geq, bound)?;
            load_clause(ctx.borrow(), &[!head, le]);
            load_clause(ctx.borrow(), &[!head, ge]);
            load_clause(ctx.borrow(), &[head, !le, !ge]);
            Ok(())
        }
        IntCmp::Neq => {
            let eq = crate::context::alloc_internal_var(ctx.borrow()).positive();
            linear_internal(ctx.borrow(), eq, terms, IntCmp::Eq, bound)?;
            load_clause(ctx.borrow(), &[!head, !eq]);
            load_clause(ctx.borrow(), &[head, eq]);
            Ok(())
        }
    }
}

/// Declare `factor * product(vars) cmp bound` reified by `head`.
pub fn add_int_product(
    mut ctx: builder_parts!(),
    head: Lit,
    factor: Weight,
    vars: &[usize],
    cmp: IntCmp,
    bound: Weight,
) -> Result<()> {
    check_open(ctx.borrow())?;
    ensure_lits(ctx.borrow(), &[head]);

    let mut internal = Vec::with_capacity(vars.len());
    for &external in vars {
        internal.push(ctx.part(IntEngineP).lookup(external)?);
    }

    let mut declare = |ctx: &mut builder_parts!(), head: Lit, bound: Weight, upper: bool| {
        let index = int::declare_constraint(
            ctx.part_mut(IntEngineP),
            Constraint::Product {
                head,
                factor,
                vars: internal.clone(),
                bound,
                upper,
            },
        );
        int::register_constraint(ctx.borrow(), index);
    };

    match cmp {
        IntCmp::Leq => declare(&mut ctx, head, bound, true),
        IntCmp::Geq => declare(&mut ctx, head, bound, false),
        IntCmp::Lt => declare(
            &mut ctx,
            head,
            bound.checked_sub(1).ok_or(Error::WeightOverflow)?,
            true,
        ),
        IntCmp::Gt => declare(
            &mut ctx,
            head,
            bound.checked_add(1).ok_or(Error::WeightOverflow)?,
            false,
        ),
        IntCmp::Eq | IntCmp::Neq => {
            let le = crate::context::alloc_internal_var(ctx.borrow()).positive();
            let ge = crate::context::alloc_internal_var(ctx.borrow()).positive();
            declare(&mut ctx, le, bound, true);
            declare(&mut ctx, ge, bound, false);
            let eq = if cmp == IntCmp::Eq { head } else { !head };
            load_clause(ctx.borrow(), &[!eq, le]);
            load_clause(ctx.borrow(), &[!eq, ge]);
            load_clause(ctx.borrow(), &[eq, !le, !ge]);
        }
    }

    Ok(())
}

/// Declare the element constraint `a[x] = y` with 1-based positions.
pub fn add_int_element(
    mut ctx: builder_parts!(),
    index_var: usize,
    array: &[Weight],
    result_var: usize,
) -> Result<()> {
    check_open(ctx.borrow())?;
    let x = ctx.part(IntEngineP).lookup(index_var)?;
    let y = ctx.part(IntEngineP).lookup(result_var)?;

    // 1 <= x <= |a|
    match int::geq_lit(ctx.borrow(), x, 1) {
        BoundLit::True => (),
        BoundLit::False => load_clause(ctx.borrow(), &[]),
        BoundLit::Lit(l) => load_clause(ctx.borrow(), &[l]),
    }
    match int::leq_lit(ctx.borrow(), x, array.len() as Weight) {
        BoundLit::True => (),
        BoundLit::False => load_clause(ctx.borrow(), &[]),
        BoundLit::Lit(l) => load_clause(ctx.borrow(), &[l]),
    }

    // x = i implies y = a[i]
    for (offset, &value) in array.iter().enumerate() {
        let position = offset as Weight + 1;
        let xi = int::eq_lit(ctx.borrow(), x, position);
        let yi = int::eq_lit(ctx.borrow(), y, value);
        match (xi, yi) {
            (BoundLit::False, _) | (_, BoundLit::True) => (),
            (BoundLit::True, BoundLit::False) => load_clause(ctx.borrow(), &[]),
            (BoundLit::True, BoundLit::Lit(yl)) => load_clause(ctx.borrow(), &[yl]),
            (BoundLit::Lit(xl), BoundLit::False) => load_clause(ctx.borrow(), &[!xl]),
            (BoundLit::Lit(xl), BoundLit::Lit(yl)) => load_clause(ctx.borrow(), &[!xl, yl]),
        }
    }

    Ok(())
}

/// Declare that all listed variables take pairwise distinct values.
pub fn add_all_different(mut ctx: builder_parts!(), vars: &[usize]) -> Result<()> {
    check_open(ctx.borrow())?;

    let mut internal = Vec::with_capacity(vars.len());
    for &external in vars {
        internal.push(ctx.part(IntEngineP).lookup(external)?);
    }

    for (pos, &x) in internal.iter().enumerate() {
        for &y in internal[pos + 1..].iter() {
            let (lo, hi) = {
                let engine = ctx.part(IntEngineP);
                let (xv, yv) = (engine.var(x), engine.var(y));
                (
                    xv.orig_min().max(yv.orig_min()),
                    xv.orig_max().min(yv.orig_max()),
                )
            };
            let mut value = lo;
            while value <= hi {
                let xe = int::eq_lit(ctx.borrow(), x, value);
                let ye = int::eq_lit(ctx.borrow(), y, value);
                match (xe, ye) {
                    (BoundLit::Lit(xl), BoundLit::Lit(yl)) => {
                        load_clause(ctx.borrow(), &[!xl, !yl]);
                    }
                    (BoundLit::True, BoundLit::Lit(yl)) => load_clause(ctx.borrow(), &[!yl]),
                    (BoundLit::Lit(xl), BoundLit::True) => load_clause(ctx.borrow(), &[!xl]),
                    (BoundLit::True, BoundLit::True) => load_clause(ctx.borrow(), &[]),
                    _ => (),
                }
                value += 1;
            }
        }
    }

    Ok(())
}

/// Declare a lazily grounded predicate instance.
pub fn add_lazy_atom(
    mut ctx: builder_parts!(),
    head: Lit,
    args: &[usize],
    grounder: Box<dyn LazyGrounder>,
) -> Result<()> {
    check_open(ctx.borrow())?;
    ensure_lits(ctx.borrow(), &[head]);

    let mut internal = Vec::with_capacity(args.len());
    for &external in args {
        internal.push(ctx.part(IntEngineP).lookup(external)?);
    }

    let grounder = ctx.part_mut(IntEngineP).add_grounder(grounder);
    let index = int::declare_constraint(
        ctx.part_mut(IntEngineP),
        Constraint::LazyAtom {
            head,
            args: internal,
            grounder,
            done: Default::default(),
        },
    );
    int::register_constraint(ctx.borrow(), index);
    Ok(())
}

/// Minimise the set of true literals among the given ones.
pub fn minimize_subset(mut ctx: builder_parts!(), lits: &[Lit]) -> Result<()> {
    check_open(ctx.borrow())?;
    ensure_lits(ctx.borrow(), lits);
    ctx.part_mut(OptimizeP)
        .set_objective(Objective::Subset { lits: lits.to_vec() });
    Ok(())
}

/// Minimise the position of the first true literal of the list.
pub fn minimize_ordered(mut ctx: builder_parts!(), lits: &[Lit]) -> Result<()> {
    check_open(ctx.borrow())?;
    ensure_lits(ctx.borrow(), lits);
    ctx.part_mut(OptimizeP)
        .set_objective(Objective::OrderedList { lits: lits.to_vec() });
    Ok(())
}

/// Minimise the value of the sum over a declared set.
///
/// Declares a sum aggregate with a pinned-true head; the optimisation driver tightens its bound
/// after every model.
pub fn minimize_agg_sum(mut ctx: builder_parts!(), set_id: usize) -> Result<()> {
    check_open(ctx.borrow())?;

    let head = crate::context::alloc_internal_var(ctx.borrow()).positive();
    ctx.part_mut(AggregatesP).declare_aggregate(
        set_id,
        head,
        Weight::max_value() / 4,
        AggSign::Upper,
        AggSem::Implication,
        None,
    )?;
    load_clause(ctx.borrow(), &[head]);

    ctx.part_mut(OptimizeP).set_objective(Objective::AggSum {
        head,
        set_external: set_id,
    });
    Ok(())
}

/// Run the structural pass over all collected declarations.
pub fn finish(mut ctx: builder_parts!()) -> Result<()> {
    if ctx.part(SolverStateP).finished {
        return Ok(());
    }

    finish_aggregates(ctx.borrow())?;
    defs::finish(ctx.borrow())?;
    int::finish(ctx.borrow());
    crate::modal::register_children(ctx.borrow());

    ctx.part_mut(SolverStateP).finished = true;
    Ok(())
}

/// Normalise all weighted sets, compile what compiles to clauses and instantiate the
/// partial-watch propagators for the rest.
fn finish_aggregates(mut ctx: builder_parts!()) -> Result<()> {
    let (pending_sets, mut pending_aggs) = ctx.part_mut(AggregatesP).take_pending();

    let mut by_set: Vec<Vec<u32>> = vec![vec![]; pending_sets.len()];
    for (index, agg) in pending_aggs.iter().enumerate() {
        by_set[agg.set].push(index as u32);
    }

    let mut final_sets = vec![];
    let mut final_aggs: Vec<Aggregate> = vec![];

    for (set_index, pending) in pending_sets.into_iter().enumerate() {
        let agg_indices = std::mem::take(&mut by_set[set_index]);
        let mut prepared = prepare_set(pending, &mut pending_aggs, &agg_indices)?;

        let to_cnf = ctx.part(SolverConfigP).to_cnf;
        let agg_saving = ctx.part(SolverConfigP).agg_saving;

        let mut kept: Vec<u32> = vec![];

        for &agg_index in agg_indices.iter() {
            let agg = pending_aggs[agg_index as usize].clone();

            if prepared.ty == AggType::Max {
                // Max aggregates always compile: to a rule when defined, to clauses otherwise.
                match agg.sem {
                    AggSem::Defined => {
                        let def_id = agg.def_id.unwrap_or(0);
                        match agg.sign {
                            AggSign::Lower => {
                                let body: Vec<Lit> = prepared
                                    .wls
                                    .iter()
                                    .filter(|wl| wl.weight >= agg.bound)
                                    .map(|wl| wl.lit)
                                    .collect();
                                ctx.part_mut(DefinitionsP).push_rule(Rule {
                                    head: agg.head.var(),
                                    body,
                                    conjunctive: false,
                                    def_id,
                                });
                            }
                            AggSign::Upper => {
                                let body: Vec<Lit> = prepared
                                    .wls
                                    .iter()
                                    .filter(|wl| wl.weight > agg.bound)
                                    .map(|wl| !wl.lit)
                                    .collect();
                                ctx.part_mut(DefinitionsP).push_rule(Rule {
                                    head: agg.head.var(),
                                    body,
                                    conjunctive: true,
                                    def_id,
                                });
                            }
                        }
                    }
                    AggSem::Equivalence => encode::encode_max(
                        ctx.borrow(),
                        &prepared.wls,
                        agg.bound,
                        agg.sign,
                        agg.head,
                        true,
                    ),
                    AggSem::Implication => encode::encode_max(
                        ctx.borrow(),
                        &prepared.wls,
                        agg.bound,
                        agg.sign,
                        agg.head,
                        false,
                    ),
                }
                continue;
            }

            // Card and sum aggregates with equivalence semantics may compile to CNF.
            let compilable = to_cnf
                && agg.sem == AggSem::Equivalence
                && matches!(prepared.ty, AggType::Sum | AggType::Card);
            if compilable {
                let encoded = match agg.sign {
                    AggSign::Lower => {
                        encode::encode_sum_geq(ctx.borrow(), &prepared.wls, agg.bound, agg.head)
                    }
                    AggSign::Upper => {
                        let bound = agg.bound.checked_add(1).ok_or(Error::WeightOverflow)?;
                        encode::encode_sum_geq(ctx.borrow(), &prepared.wls, bound, !agg.head)
                    }
                };
                if encoded {
                    continue;
                }
            }

            // Eager single-literal head implications.
            if agg_saving != AggSaving::PropagatorOnly
                && matches!(prepared.ty, AggType::Sum | AggType::Card)
                && agg.sem != AggSem::Implication
            {
                match agg.sign {
                    AggSign::Lower => {
                        for wl in prepared.wls.iter().filter(|wl| wl.weight >= agg.bound) {
                            load_clause(ctx.borrow(), &[!wl.lit, agg.head]);
                        }
                    }
                    AggSign::Upper => {
                        for wl in prepared.wls.iter().filter(|wl| wl.weight > agg.bound) {
                            load_clause(ctx.borrow(), &[!wl.lit, !agg.head]);
                        }
                    }
                }
            }

            kept.push(agg_index);
        }

        if kept.is_empty() {
            continue;
        }

        let new_set_index = final_sets.len();
        let mut new_agg_indices = vec![];
        for &agg_index in kept.iter() {
            let mut agg = pending_aggs[agg_index as usize].clone();
            agg.set = new_set_index;
            new_agg_indices.push(final_aggs.len() as u32);
            final_aggs.push(agg);
        }
        prepared.aggs = new_agg_indices;
        final_sets.push(prepared);
    }

    // Defined aggregate heads register with the definition engine under their final indices.
    for (index, agg) in final_aggs.iter().enumerate() {
        if agg.sem == AggSem::Defined {
            ctx.part_mut(DefinitionsP).declare_aggregate_head(
                agg.head.var(),
                index as u32,
                agg.def_id.unwrap_or(0),
            )?;
        }
    }

    let set_count = final_sets.len();
    ctx.part_mut(AggregatesP).install(final_sets, final_aggs);

    for index in 0..set_count {
        register_set_propagator(ctx.borrow(), index);
    }

    Ok(())
}
