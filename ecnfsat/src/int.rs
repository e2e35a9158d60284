//! Finite-domain integer variables and constraints.
//!
//! Integer variables are order-encoded: the atom for value v is true iff x <= v, and binary
//! consistency clauses link adjacent atoms. Range variables create all their atoms up front;
//! lazy variables introduce atoms on first use, wiring the neighbour clauses at that point. All
//! constraint propagation goes through the cached current bounds, which are kept on a trail of
//! their own and restored on backtracking.
use std::collections::BTreeMap;

use partial_ref::{partial, PartialRef};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::aggregate::Weight;
use crate::bus::{Priority, PropagatorId};
use crate::clause::db::store_theory_conflict;
use crate::clause::{db, ClauseHeader, Tier};
use crate::context::{
    alloc_internal_var, AggregatesP, AnalyzeConflictP, AssignmentP, BinaryClausesP, BusP,
    ClauseAllocP, ClauseDbP, Context, DefinitionsP, ImplGraphP, IncrementalP, IntEngineP, ModalP,
    SolverConfigP, SolverStateP, TmpDataP, TrailP, VariablesP, VsidsP, WatchlistsP,
};
use crate::error::{Error, Result};
use crate::lit::Lit;
use crate::prop::{enqueue_assignment, Conflict, EngineTag, Reason};

/// A bound query answer: the canonical order atom, or a constant when the bound is outside the
/// variable's original range.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BoundLit {
    True,
    False,
    Lit(Lit),
}

/// An integer variable plus a constant offset; answers bound queries transparently.
#[derive(Copy, Clone, Debug)]
pub struct IntView {
    pub var: usize,
    pub offset: Weight,
}

/// Storage of one integer variable.
pub struct IntVarData {
    pub external_id: usize,
    lo: Weight,
    hi: Weight,
    /// Sorted domain values for enumerated domains; contiguous domains leave this empty.
    values: Vec<Weight>,
    lazy: bool,
    /// Order atoms by value: the atom is true iff the variable is at most the value. The largest
    /// domain value has no atom; that bound holds trivially.
    order: BTreeMap<Weight, Lit>,
    cur_min: Weight,
    cur_max: Weight,
    dense: u32,
    /// Dense bus ids of the constraint propagators watching this variable's bounds.
    watchers: Vec<u32>,
    eq_lits: FxHashMap<Weight, Lit>,
}

impl IntVarData {
    /// Original smallest domain value.
    pub fn orig_min(&self) -> Weight {
        self.lo
    }

    /// Original largest domain value.
    pub fn orig_max(&self) -> Weight {
        self.hi
    }

    /// Current lower bound.
    pub fn min(&self) -> Weight {
        self.cur_min
    }

    /// Current upper bound.
    pub fn max(&self) -> Weight {
        self.cur_max
    }

    /// Whether the variable is fixed to a single value.
    pub fn is_fixed(&self) -> bool {
        self.cur_min == self.cur_max
    }

    /// The order atoms created so far, by value.
    pub fn order_atoms(&self) -> impl Iterator<Item = (Weight, Lit)> + '_ {
        self.order.iter().map(|(&value, &lit)| (value, lit))
    }

    /// Largest domain value at most `v`, if any.
    fn clamp_down(&self, v: Weight) -> Option<Weight> {
        if self.values.is_empty() {
            if v < self.lo {
                None
            } else {
                Some(v.min(self.hi))
            }
        } else {
            self.values.iter().rev().copied().find(|&value| value <= v)
        }
    }

    /// Smallest domain value strictly above `v`.
    fn next_value(&self, v: Weight) -> Weight {
        if self.values.is_empty() {
            v + 1
        } else {
            self.values
                .iter()
                .copied()
                .find(|&value| value > v)
                .unwrap_or(self.hi)
        }
    }
}

/// One finite-domain constraint.
pub enum Constraint {
    /// head <-> sum of w*x (views folded into the bound) <= bound.
    LinearLeq {
        head: Lit,
        terms: Vec<(Weight, usize)>,
        bound: Weight,
    },
    /// head <-> factor * product of the variables compared against the bound; `upper` selects
    /// `<=`, otherwise `>=`.
    Product {
        head: Lit,
        factor: Weight,
        vars: Vec<usize>,
        bound: Weight,
        upper: bool,
    },
    /// Ground the predicate instance once the head and all argument variables are known.
    LazyAtom {
        head: Lit,
        args: Vec<usize>,
        grounder: usize,
        done: FxHashSet<Vec<Weight>>,
    },
}

/// Produces the propositional encoding of one ground instance of a lazily grounded predicate.
pub trait LazyGrounder {
    fn ground(&mut self, head: Lit, args: &[Weight]) -> Vec<Vec<Lit>>;
}

/// Record for undoing a bound-cache update.
struct BoundChange {
    var: usize,
    old_min: Weight,
    old_max: Weight,
    level: usize,
}

/// The finite-domain engine.
#[derive(Default)]
pub struct IntEngine {
    vars: Vec<IntVarData>,
    by_external: FxHashMap<usize, usize>,
    constraints: Vec<Constraint>,
    constraint_dense: Vec<u32>,
    grounders: Vec<Box<dyn LazyGrounder>>,
    bound_trail: Vec<BoundChange>,
}

impl IntEngine {
    /// Declare a contiguous-domain variable.
    pub fn declare_range(&mut self, external_id: usize, lo: Weight, hi: Weight, lazy: bool) -> Result<usize> {
        if self.by_external.contains_key(&external_id) {
            return Err(Error::DuplicateIntVar(external_id));
        }
        if lo > hi {
            return Err(Error::EmptyIntDomain(external_id));
        }
        let index = self.vars.len();
        self.by_external.insert(external_id, index);
        self.vars.push(IntVarData {
            external_id,
            lo,
            hi,
            values: vec![],
            lazy,
            order: BTreeMap::new(),
            cur_min: lo,
            cur_max: hi,
            dense: 0,
            watchers: vec![],
            eq_lits: FxHashMap::default(),
        });
        Ok(index)
    }

    /// Declare an enumerated-domain variable.
    pub fn declare_enum(&mut self, external_id: usize, mut values: Vec<Weight>) -> Result<usize> {
        if self.by_external.contains_key(&external_id) {
            return Err(Error::DuplicateIntVar(external_id));
        }
        values.sort_unstable();
        values.dedup();
        if values.is_empty() {
            return Err(Error::EmptyIntDomain(external_id));
        }
        let (lo, hi) = (values[0], values[values.len() - 1]);
        let index = self.vars.len();
        self.by_external.insert(external_id, index);
        self.vars.push(IntVarData {
            external_id,
            lo,
            hi,
            values,
            lazy: false,
            order: BTreeMap::new(),
            cur_min: lo,
            cur_max: hi,
            dense: 0,
            watchers: vec![],
            eq_lits: FxHashMap::default(),
        });
        Ok(index)
    }

    /// Internal index of an externally declared variable.
    pub fn lookup(&self, external_id: usize) -> Result<usize> {
        self.by_external
            .get(&external_id)
            .copied()
            .ok_or(Error::UndefinedIntVar(external_id))
    }

    pub fn var(&self, index: usize) -> &IntVarData {
        &self.vars[index]
    }

    pub fn vars(&self) -> &[IntVarData] {
        &self.vars
    }

    /// Register a lazy grounder, returning its index for [`Constraint::LazyAtom`].
    pub fn add_grounder(&mut self, grounder: Box<dyn LazyGrounder>) -> usize {
        self.grounders.push(grounder);
        self.grounders.len() - 1
    }

    /// Restore the bound caches after backtracking.
    pub fn on_backtrack(&mut self, level: usize) {
        while let Some(change) = self.bound_trail.last() {
            if change.level <= level {
                break;
            }
            let change = self.bound_trail.pop().unwrap();
            let var = &mut self.vars[change.var];
            var.cur_min = change.old_min;
            var.cur_max = change.old_max;
        }
    }
}

/// Register the bound propagator of a freshly declared variable.
///
/// Runs at declaration time so that order atoms introduced before the search (eq reifications,
/// element decompositions) subscribe to the right propagator.
pub fn register_var_propagator(
    mut ctx: partial!(Context, mut BusP, mut IntEngineP),
    index: usize,
) {
    let dense = ctx
        .part_mut(BusP)
        .register(PropagatorId::IntVar(index as u32), Priority::Fast);
    ctx.part_mut(IntEngineP).vars[index].dense = dense;
}

/// Create the order atoms of all eagerly encoded variables. Runs once at the end of parsing.
///
/// Atoms are introduced through the same path as lazy ones, in ascending value order, which
/// wires the chain of consistency clauses as a side effect.
pub fn finish(
    mut ctx: partial!(
        Context,
        mut AnalyzeConflictP,
        mut AssignmentP,
        mut BinaryClausesP,
        mut BusP,
        mut DefinitionsP,
        mut ImplGraphP,
        mut IntEngineP,
        mut TmpDataP,
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
        SolverConfigP,
    ),
) {
    let var_count = ctx.part(IntEngineP).vars.len();

    for index in 0..var_count {
        let (lazy, domain) = {
            let var = &ctx.part(IntEngineP).vars[index];
            let domain: Vec<Weight> = if var.values.is_empty() {
                (var.lo..var.hi).collect()
            } else {
                var.values[..var.values.len() - 1].to_vec()
            };
            (var.lazy, domain)
        };

        if lazy {
            continue;
        }

        for value in domain {
            leq_lit(ctx.borrow(), index, value);
        }
    }
}

/// Register one constraint's propagator and subscribe it to its head and variables.
pub fn register_constraint(
    mut ctx: partial!(Context, mut BusP, mut IntEngineP),
    index: usize,
) {
    let dense = ctx
        .part_mut(BusP)
        .register(PropagatorId::Constraint(index as u32), Priority::Fast);

    let (engine, mut ctx) = ctx.split_part_mut(IntEngineP);
    while engine.constraint_dense.len() <= index {
        engine.constraint_dense.push(0);
    }
    engine.constraint_dense[index] = dense;

    let (head, vars): (Lit, Vec<usize>) = match &engine.constraints[index] {
        Constraint::LinearLeq { head, terms, .. } => {
            (*head, terms.iter().map(|&(_, v)| v).collect())
        }
        Constraint::Product { head, vars, .. } => (*head, vars.clone()),
        Constraint::LazyAtom { head, args, .. } => (*head, args.clone()),
    };

    let bus = ctx.part_mut(BusP);
    bus.subscribe(head, dense);
    bus.subscribe(!head, dense);
    for var in vars {
        engine.vars[var].watchers.push(dense);
    }
    // Run every propagator once at the start so root-level bounds propagate.
    bus.enqueue(dense);
}

/// Add a constraint declared by the builder.
pub fn declare_constraint(engine: &mut IntEngine, constraint: Constraint) -> usize {
    engine.constraints.push(constraint);
    engine.constraints.len() - 1
}

/// The canonical atom for `x <= v`, introducing it for lazy variables.
pub fn leq_lit(
    mut ctx: partial!(
        Context,
        mut AnalyzeConflictP,
        mut AssignmentP,
        mut BinaryClausesP,
        mut BusP,
        mut DefinitionsP,
        mut ImplGraphP,
        mut IntEngineP,
        mut TmpDataP,
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
        SolverConfigP,
    ),
    var_index: usize,
    v: Weight,
) -> BoundLit {
    let clamped = {
        let var = &ctx.part(IntEngineP).vars[var_index];
        if v >= var.hi {
            return BoundLit::True;
        }
        match var.clamp_down(v) {
            None => return BoundLit::False,
            Some(clamped) => clamped,
        }
    };

    if let Some(&atom) = ctx.part(IntEngineP).vars[var_index].order.get(&clamped) {
        return BoundLit::Lit(atom);
    }

    // Lazy introduction: create the atom and link it to its neighbours.
    let atom = alloc_internal_var(ctx.borrow()).positive();

    let (dense, prev, next) = {
        let var = &mut ctx.part_mut(IntEngineP).vars[var_index];
        let prev = var
            .order
            .range(..clamped)
            .next_back()
            .map(|(_, &lit)| lit);
        let next = var
            .order
            .range((std::ops::Bound::Excluded(clamped), std::ops::Bound::Unbounded))
            .next()
            .map(|(_, &lit)| lit);
        var.order.insert(clamped, atom);
        (var.dense, prev, next)
    };

    ctx.part_mut(BusP).subscribe(atom, dense);
    ctx.part_mut(BusP).subscribe(!atom, dense);

    // x <= prev => x <= clamped and x <= clamped => x <= next; fire any implication that
    // already holds.
    if let Some(prev) = prev {
        ctx.part_mut(BinaryClausesP).add_binary_clause([!prev, atom]);
        if ctx.part(AssignmentP).lit_is_true(prev) && ctx.part(AssignmentP).lit_is_unk(atom) {
            enqueue_assignment(ctx.borrow(), atom, Reason::Binary([!prev]));
        }
    }
    if let Some(next) = next {
        ctx.part_mut(BinaryClausesP).add_binary_clause([!atom, next]);
        if ctx.part(AssignmentP).lit_is_false(next) && ctx.part(AssignmentP).lit_is_unk(atom) {
            enqueue_assignment(ctx.borrow(), !atom, Reason::Binary([next]));
        }
    }

    BoundLit::Lit(atom)
}

/// The canonical atom for `x >= v`.
pub fn geq_lit(
    mut ctx: partial!(
        Context,
        mut AnalyzeConflictP,
        mut AssignmentP,
        mut BinaryClausesP,
        mut BusP,
        mut DefinitionsP,
        mut ImplGraphP,
        mut IntEngineP,
        mut TmpDataP,
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
        SolverConfigP,
    ),
    var_index: usize,
    v: Weight,
) -> BoundLit {
    match leq_lit(ctx.borrow(), var_index, v - 1) {
        BoundLit::True => BoundLit::False,
        BoundLit::False => BoundLit::True,
        BoundLit::Lit(lit) => BoundLit::Lit(!lit),
    }
}

/// The atom for `x = v`: the conjunction of the two bound atoms, reified and memoised.
pub fn eq_lit(
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
    var_index: usize,
    v: Weight,
) -> BoundLit {
    use crate::load::load_clause;

    if let Some(&lit) = ctx.part(IntEngineP).vars[var_index].eq_lits.get(&v) {
        return BoundLit::Lit(lit);
    }

    let le = leq_lit(ctx.borrow(), var_index, v);
    let ge = geq_lit(ctx.borrow(), var_index, v);

    let lit = match (le, ge) {
        (BoundLit::False, _) | (_, BoundLit::False) => return BoundLit::False,
        (BoundLit::True, BoundLit::True) => return BoundLit::True,
        (BoundLit::True, BoundLit::Lit(l)) | (BoundLit::Lit(l), BoundLit::True) => l,
        (BoundLit::Lit(le), BoundLit::Lit(ge)) => {
            let head = alloc_internal_var(ctx.borrow()).positive();
            load_clause(ctx.borrow(), &[!head, le]);
            load_clause(ctx.borrow(), &[!head, ge]);
            load_clause(ctx.borrow(), &[head, !le, !ge]);
            head
        }
    };

    ctx.part_mut(IntEngineP).vars[var_index].eq_lits.insert(v, lit);
    BoundLit::Lit(lit)
}

/// Bound maintenance of one integer variable: recompute the cached bounds from the order atoms
/// and wake the constraint propagators watching them.
pub fn run_var_update(
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
    var_index: u32,
) -> std::result::Result<(), Conflict> {
    let var_index = var_index as usize;
    let level = ctx.part(TrailP).current_level();

    let dense = ctx.part(IntEngineP).vars[var_index].dense;
    {
        let mut pending = vec![];
        ctx.part_mut(BusP).take_pending(dense, &mut pending);
    }

    let (new_min, new_max) = {
        let engine = ctx.part(IntEngineP);
        let assignment = ctx.part(AssignmentP);
        let var = &engine.vars[var_index];

        let mut new_min = var.lo;
        let mut new_max = var.hi;
        for (&value, &atom) in var.order.iter() {
            if assignment.lit_is_false(atom) {
                new_min = var.next_value(value);
            } else if assignment.lit_is_true(atom) {
                new_max = value;
                break;
            }
        }
        (new_min, new_max)
    };

    let changed = {
        let engine = ctx.part_mut(IntEngineP);
        let (old_min, old_max) = {
            let var = &engine.vars[var_index];
            (var.cur_min, var.cur_max)
        };
        if old_min != new_min || old_max != new_max {
            engine.bound_trail.push(BoundChange {
                var: var_index,
                old_min,
                old_max,
                level,
            });
            let var = &mut engine.vars[var_index];
            var.cur_min = new_min;
            var.cur_max = new_max;
            true
        } else {
            false
        }
    };

    if changed {
        let watchers = ctx.part(IntEngineP).vars[var_index].watchers.clone();
        let bus = ctx.part_mut(BusP);
        for watcher in watchers {
            bus.enqueue(watcher);
        }
    }

    Ok(())
}

/// Division rounding towards negative infinity.
fn floor_div(a: i128, b: i128) -> i128 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

/// Division rounding towards positive infinity.
fn ceil_div(a: i128, b: i128) -> i128 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) == (b < 0)) {
        q + 1
    } else {
        q
    }
}

/// Clamp an i128 bound into the weight range.
fn clamp_weight(value: i128) -> Weight {
    if value > Weight::max_value() as i128 {
        Weight::max_value()
    } else if value < Weight::min_value() as i128 {
        Weight::min_value()
    } else {
        value as Weight
    }
}

/// Run one constraint propagator.
pub fn run_constraint(
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
    index: u32,
) -> std::result::Result<(), Conflict> {
    let index = index as usize;

    {
        let dense = ctx.part(IntEngineP).constraint_dense[index];
        let mut pending = vec![];
        ctx.part_mut(BusP).take_pending(dense, &mut pending);
    }

    enum Kind {
        Linear {
            head: Lit,
            terms: Vec<(Weight, usize)>,
            bound: Weight,
        },
        Product {
            head: Lit,
            factor: Weight,
            vars: Vec<usize>,
            bound: Weight,
            upper: bool,
        },
        Lazy,
    }

    let kind = match &ctx.part(IntEngineP).constraints[index] {
        Constraint::LinearLeq { head, terms, bound } => Kind::Linear {
            head: *head,
            terms: terms.clone(),
            bound: *bound,
        },
        Constraint::Product {
            head,
            factor,
            vars,
            bound,
            upper,
        } => Kind::Product {
            head: *head,
            factor: *factor,
            vars: vars.clone(),
            bound: *bound,
            upper: *upper,
        },
        Constraint::LazyAtom { .. } => Kind::Lazy,
    };

    match kind {
        Kind::Linear { head, terms, bound } => {
            propagate_linear(ctx.borrow(), index, head, &terms, bound)
        }
        Kind::Product {
            head,
            factor,
            vars,
            bound,
            upper,
        } => propagate_product(ctx.borrow(), index, head, factor, &vars, bound, upper),
        Kind::Lazy => ground_lazy_atom(ctx.borrow(), index),
    }
}

/// Range propagation for `head <-> sum of w*x <= bound`.
fn propagate_linear(
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
    index: usize,
    head: Lit,
    terms: &[(Weight, usize)],
    bound: Weight,
) -> std::result::Result<(), Conflict> {
    let (min_sum, max_sum) = {
        let engine = ctx.part(IntEngineP);
        let mut min_sum: i128 = 0;
        let mut max_sum: i128 = 0;
        for &(w, v) in terms {
            let var = &engine.vars[v];
            let w = w as i128;
            if w > 0 {
                min_sum += w * var.cur_min as i128;
                max_sum += w * var.cur_max as i128;
            } else {
                min_sum += w * var.cur_max as i128;
                max_sum += w * var.cur_min as i128;
            }
        }
        (min_sum, max_sum)
    };

    let bound = bound as i128;

    if max_sum <= bound {
        theory_enqueue(ctx.borrow(), head, index)?;
    }
    if min_sum > bound {
        theory_enqueue(ctx.borrow(), !head, index)?;
    }

    match ctx.part(AssignmentP).lit_value(head) {
        Some(true) => {
            // The sum must stay at most the bound.
            for &(w, v) in terms {
                let (var_min, var_max) = {
                    let var = &ctx.part(IntEngineP).vars[v];
                    (var.cur_min as i128, var.cur_max as i128)
                };
                let w128 = w as i128;
                let rest_min = min_sum - if w128 > 0 { w128 * var_min } else { w128 * var_max };
                if w128 > 0 {
                    let ub = floor_div(bound - rest_min, w128);
                    if ub < var_max {
                        enqueue_upper(ctx.borrow(), index, v, clamp_weight(ub))?;
                    }
                } else {
                    let lb = ceil_div(bound - rest_min, w128);
                    if lb > var_min {
                        enqueue_lower(ctx.borrow(), index, v, clamp_weight(lb))?;
                    }
                }
            }
        }
        Some(false) => {
            // The sum must exceed the bound.
            for &(w, v) in terms {
                let (var_min, var_max) = {
                    let var = &ctx.part(IntEngineP).vars[v];
                    (var.cur_min as i128, var.cur_max as i128)
                };
                let w128 = w as i128;
                let rest_max = max_sum - if w128 > 0 { w128 * var_max } else { w128 * var_min };
                if w128 > 0 {
                    let lb = ceil_div(bound + 1 - rest_max, w128);
                    if lb > var_min {
                        enqueue_lower(ctx.borrow(), index, v, clamp_weight(lb))?;
                    }
                } else {
                    let ub = floor_div(bound + 1 - rest_max, w128);
                    if ub < var_max {
                        enqueue_upper(ctx.borrow(), index, v, clamp_weight(ub))?;
                    }
                }
            }
        }
        None => (),
    }

    Ok(())
}

/// Propagation for `head <-> factor * product(vars) <= bound` (or `>=` when `upper` is false).
///
/// The product is propagated exactly once all or all-but-one variables are fixed; sets of
/// non-negative variables additionally get bound propagation.
fn propagate_product(
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
    index: usize,
    head: Lit,
    factor: Weight,
    vars: &[usize],
    bound: Weight,
    upper: bool,
) -> std::result::Result<(), Conflict> {
    let bound = bound as i128;

    let (unfixed, fixed_product, all_nonneg) = {
        let engine = ctx.part(IntEngineP);
        let mut unfixed: Option<usize> = None;
        let mut more_than_one = false;
        let mut fixed_product: i128 = factor as i128;
        let mut all_nonneg = factor > 0;
        for &v in vars {
            let var = &engine.vars[v];
            if var.cur_min < 0 {
                all_nonneg = false;
            }
            if var.is_fixed() {
                fixed_product = fixed_product.saturating_mul(var.cur_min as i128);
            } else if unfixed.is_none() {
                unfixed = Some(v);
            } else {
                more_than_one = true;
            }
        }
        (
            if more_than_one { None } else { Some(unfixed) },
            fixed_product,
            all_nonneg,
        )
    };

    let holds = |value: i128| if upper { value <= bound } else { value >= bound };

    match unfixed {
        // Everything fixed: the head mirrors the comparison.
        Some(None) => {
            if holds(fixed_product) {
                theory_enqueue(ctx.borrow(), head, index)?;
            } else {
                theory_enqueue(ctx.borrow(), !head, index)?;
            }
        }
        // One variable open: with a known head its bound follows by division.
        Some(Some(open)) => {
            let head_value = ctx.part(AssignmentP).lit_value(head);
            if let Some(head_value) = head_value {
                let must_hold = head_value;
                if fixed_product == 0 {
                    let truth = holds(0);
                    if truth != must_hold {
                        let lit = if truth { head } else { !head };
                        theory_enqueue(ctx.borrow(), lit, index)?;
                    }
                } else {
                    // factor' * x <= bound or the strict complement.
                    // The remaining factor must satisfy factor' * x <=/>= target, with strict
                    // variants when the head negates the comparison.
                    let (wants_leq, target) = match (must_hold, upper) {
                        (true, true) => (true, bound),
                        (false, false) => (true, bound - 1),
                        (true, false) => (false, bound),
                        (false, true) => (false, bound + 1),
                    };
                    if wants_leq == (fixed_product > 0) {
                        let ub = floor_div(target, fixed_product);
                        enqueue_upper_if_tighter(ctx.borrow(), index, open, ub)?;
                    } else {
                        let lb = ceil_div(target, fixed_product);
                        enqueue_lower_if_tighter(ctx.borrow(), index, open, lb)?;
                    }
                }
            }
        }
        None => {
            // Several variables open: bound propagation for the non-negative case.
            if !all_nonneg {
                return Ok(());
            }
            let (min_val, max_val) = {
                let engine = ctx.part(IntEngineP);
                let mut min_val: i128 = factor as i128;
                let mut max_val: i128 = factor as i128;
                for &v in vars {
                    let var = &engine.vars[v];
                    min_val = min_val.saturating_mul(var.cur_min as i128);
                    max_val = max_val.saturating_mul(var.cur_max as i128);
                }
                (min_val, max_val)
            };

            if upper {
                if max_val <= bound {
                    theory_enqueue(ctx.borrow(), head, index)?;
                }
                if min_val > bound {
                    theory_enqueue(ctx.borrow(), !head, index)?;
                }
            } else {
                if min_val >= bound {
                    theory_enqueue(ctx.borrow(), head, index)?;
                }
                if max_val < bound {
                    theory_enqueue(ctx.borrow(), !head, index)?;
                }
            }

            if let Some(head_value) = ctx.part(AssignmentP).lit_value(head) {
                for &v in vars {
                    let divisor = {
                        let engine = ctx.part(IntEngineP);
                        let mut divisor: i128 = factor as i128;
                        for &other in vars {
                            if other == v {
                                continue;
                            }
                            let var = &engine.vars[other];
                            let contribution = if head_value == upper {
                                var.cur_min
                            } else {
                                var.cur_max
                            };
                            divisor = divisor.saturating_mul(contribution as i128);
                        }
                        divisor
                    };
                    if divisor <= 0 {
                        continue;
                    }
                    match (head_value, upper) {
                        // The product must stay at most the bound.
                        (true, true) => {
                            enqueue_upper_if_tighter(
                                ctx.borrow(),
                                index,
                                v,
                                floor_div(bound, divisor),
                            )?;
                        }
                        // The product must reach the bound.
                        (true, false) => {
                            enqueue_lower_if_tighter(
                                ctx.borrow(),
                                index,
                                v,
                                ceil_div(bound, divisor),
                            )?;
                        }
                        // The product must exceed the bound.
                        (false, true) => {
                            enqueue_lower_if_tighter(
                                ctx.borrow(),
                                index,
                                v,
                                floor_div(bound, divisor) + 1,
                            )?;
                        }
                        // The product must stay below the bound.
                        (false, false) => {
                            enqueue_upper_if_tighter(
                                ctx.borrow(),
                                index,
                                v,
                                ceil_div(bound, divisor) - 1,
                            )?;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Ground a lazy predicate instance once its head and arguments are known.
fn ground_lazy_atom(
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
    index: usize,
) -> std::result::Result<(), Conflict> {
    let (head, values, grounder) = {
        let engine = ctx.part(IntEngineP);
        let (head, args, grounder) = match &engine.constraints[index] {
            Constraint::LazyAtom {
                head,
                args,
                grounder,
                ..
            } => (*head, args.clone(), *grounder),
            _ => unreachable!("not a lazy atom constraint"),
        };
        if args.iter().any(|&v| !engine.vars[v].is_fixed()) {
            return Ok(());
        }
        let values: Vec<Weight> = args.iter().map(|&v| engine.vars[v].cur_min).collect();
        (head, values, grounder)
    };

    if ctx.part(AssignmentP).lit_value(head).is_none() {
        return Ok(());
    }

    {
        let engine = ctx.part_mut(IntEngineP);
        match &mut engine.constraints[index] {
            Constraint::LazyAtom { done, .. } => {
                if !done.insert(values.clone()) {
                    return Ok(());
                }
            }
            _ => unreachable!(),
        }
    }

    let clauses = {
        let engine = ctx.part_mut(IntEngineP);
        engine.grounders[grounder].ground(head, &values)
    };

    for clause in clauses {
        add_clause_during_search(ctx.borrow(), &clause)?;
    }

    Ok(())
}

/// Add a clause in the middle of the search, keeping the watch discipline intact.
///
/// Unlike [`load_clause`](crate::load::load_clause) this neither restarts the search nor drops
/// false literals: the clause must survive backtracking. The first two positions are filled with
/// non-false literals when possible; a unit clause propagates immediately and a fully false one
/// is returned as a conflict.
pub fn add_clause_during_search(
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
) -> std::result::Result<(), Conflict> {
    let mut lits = lits.to_vec();
    lits.sort_unstable();
    lits.dedup();

    // Tautologies are dropped.
    for pair in lits.windows(2) {
        if pair[0] == !pair[1] {
            return Ok(());
        }
    }

    // Move non-false literals to the front.
    lits.sort_by_key(|&l| ctx.part(AssignmentP).lit_is_false(l));
    let nonfalse = lits
        .iter()
        .take_while(|&&l| !ctx.part(AssignmentP).lit_is_false(l))
        .count();

    match (lits.len(), nonfalse) {
        (0, _) => Err(Conflict::Unit([Lit::from_index(0, false)])),
        (1, 0) => Err(Conflict::Unit([lits[0]])),
        (1, _) => {
            if ctx.part(AssignmentP).lit_is_unk(lits[0]) {
                enqueue_assignment(ctx.borrow(), lits[0], Reason::Unit);
            }
            Ok(())
        }
        (2, 0) => {
            ctx.part_mut(BinaryClausesP)
                .add_binary_clause([lits[0], lits[1]]);
            Err(Conflict::Binary([lits[0], lits[1]]))
        }
        (2, _) => {
            ctx.part_mut(BinaryClausesP)
                .add_binary_clause([lits[0], lits[1]]);
            if nonfalse == 1 && ctx.part(AssignmentP).lit_is_unk(lits[0]) {
                enqueue_assignment(ctx.borrow(), lits[0], Reason::Binary([lits[1]]));
            }
            Ok(())
        }
        (_, _) => {
            let mut header = ClauseHeader::new();
            header.set_tier(Tier::Irred);
            let cref = db::add_clause(ctx.borrow(), header, &lits);
            if nonfalse == 0 {
                Err(Conflict::Long(cref))
            } else {
                if nonfalse == 1 && ctx.part(AssignmentP).lit_is_unk(lits[0]) {
                    enqueue_assignment(ctx.borrow(), lits[0], Reason::Long(cref));
                }
                Ok(())
            }
        }
    }
}

/// Enqueue an upper bound if it tightens the current one.
fn enqueue_upper_if_tighter(
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
    index: usize,
    var: usize,
    ub: i128,
) -> std::result::Result<(), Conflict> {
    if ub < ctx.part(IntEngineP).vars[var].cur_max as i128 {
        enqueue_upper(ctx.borrow(), index, var, clamp_weight(ub))?;
    }
    Ok(())
}

/// Enqueue a lower bound if it tightens the current one.
fn enqueue_lower_if_tighter(
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
    index: usize,
    var: usize,
    lb: i128,
) -> std::result::Result<(), Conflict> {
    if lb > ctx.part(IntEngineP).vars[var].cur_min as i128 {
        enqueue_lower(ctx.borrow(), index, var, clamp_weight(lb))?;
    }
    Ok(())
}

fn enqueue_upper(
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
    index: usize,
    var: usize,
    ub: Weight,
) -> std::result::Result<(), Conflict> {
    match leq_lit(ctx.borrow(), var, ub) {
        BoundLit::True => Ok(()),
        BoundLit::False => {
            let mut clause = vec![];
            build_premises(ctx.borrow(), index, usize::max_value(), &mut clause);
            Err(store_theory_conflict(ctx.borrow(), &clause))
        }
        BoundLit::Lit(lit) => theory_enqueue(ctx.borrow(), lit, index),
    }
}

fn enqueue_lower(
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
    index: usize,
    var: usize,
    lb: Weight,
) -> std::result::Result<(), Conflict> {
    match geq_lit(ctx.borrow(), var, lb) {
        BoundLit::True => Ok(()),
        BoundLit::False => {
            let mut clause = vec![];
            build_premises(ctx.borrow(), index, usize::max_value(), &mut clause);
            Err(store_theory_conflict(ctx.borrow(), &clause))
        }
        BoundLit::Lit(lit) => theory_enqueue(ctx.borrow(), lit, index),
    }
}

/// Enqueue a theory propagation for a constraint, or report the conflict when the literal is
/// already false.
fn theory_enqueue(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut IntEngineP,
        mut TrailP,
        mut WatchlistsP,
    ),
    lit: Lit,
    index: usize,
) -> std::result::Result<(), Conflict> {
    if ctx.part(AssignmentP).lit_is_true(lit) {
        return Ok(());
    }

    if ctx.part(AssignmentP).lit_is_false(lit) {
        let mut clause = vec![lit];
        build_premises(ctx.borrow(), index, usize::max_value(), &mut clause);
        return Err(store_theory_conflict(ctx.borrow(), &clause));
    }

    enqueue_assignment(
        ctx.borrow(),
        lit,
        Reason::Theory {
            engine: EngineTag::Constraint,
            token: index as u32,
        },
    );
    Ok(())
}

/// Materialise the reason clause of a constraint propagation.
///
/// The premises cite, for every variable of the constraint, the strongest bound atoms assigned
/// before the propagation, plus the head's value.
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
    let max_depth = ctx.part(ImplGraphP).depth(lit.var());
    out.clear();
    out.push(lit);
    build_premises(ctx.borrow(), token as usize, max_depth, out);
}

/// Append the negated premises of a constraint's current state to `out`.
fn build_premises(
    mut ctx: partial!(
        Context,
        mut IntEngineP,
        AssignmentP,
        ImplGraphP,
    ),
    index: usize,
    max_depth: usize,
    out: &mut Vec<Lit>,
) {
    let (engine, ctx) = ctx.split_part(IntEngineP);
    let assignment = ctx.part(AssignmentP);
    let impl_graph = ctx.part(ImplGraphP);

    let admissible = |l: Lit| {
        assignment.lit_is_true(l) && impl_graph.depth(l.var()) < max_depth
    };

    let (head, vars): (Lit, Vec<usize>) = match &engine.constraints[index] {
        Constraint::LinearLeq { head, terms, .. } => {
            (*head, terms.iter().map(|&(_, v)| v).collect())
        }
        Constraint::Product { head, vars, .. } => (*head, vars.clone()),
        Constraint::LazyAtom { head, args, .. } => (*head, args.clone()),
    };

    for head_lit in [head, !head].iter() {
        if admissible(*head_lit) {
            out.push(!*head_lit);
        }
    }

    for v in vars {
        let var = &engine.vars[v];
        // Strongest upper bound asserted before the propagation.
        if let Some((_, &atom)) = var
            .order
            .iter()
            .find(|&(_, &atom)| admissible(atom))
        {
            out.push(!atom);
        }
        // Strongest lower bound: the largest falsified order atom.
        if let Some((_, &atom)) = var
            .order
            .iter()
            .rev()
            .find(|&(_, &atom)| admissible(!atom))
        {
            out.push(atom);
        }
    }
}

/// Full-assignment duties of the integer engine.
///
/// Lazy variables whose domain is still wide split it by introducing the order atom at the
/// midpoint; the fresh atom keeps the search going. Lazy predicate instances with known heads
/// and arguments are grounded.
pub fn final_check(
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
) -> std::result::Result<(), Conflict> {
    let var_count = ctx.part(IntEngineP).vars.len();
    for index in 0..var_count {
        let split_at = {
            let var = &ctx.part(IntEngineP).vars[index];
            if var.lazy && var.cur_min < var.cur_max {
                Some(var.cur_min + (var.cur_max - var.cur_min) / 2)
            } else {
                debug_assert!(var.lazy || var.is_fixed());
                None
            }
        };
        if let Some(mid) = split_at {
            leq_lit(ctx.borrow(), index, mid);
        }
    }

    let constraint_count = ctx.part(IntEngineP).constraints.len();
    for index in 0..constraint_count {
        if matches!(
            ctx.part(IntEngineP).constraints[index],
            Constraint::LazyAtom { .. }
        ) {
            ground_lazy_atom(ctx.borrow(), index)?;
        }
    }

    Ok(())
}
