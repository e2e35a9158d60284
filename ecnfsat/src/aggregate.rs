//! Reasoning over weighted sets.
//!
//! A weighted set is an immutable multiset of weighted literals identified by a set id.
//! Aggregates (sum, cardinality, product, max) constrain the value of such a set against a bound
//! and reify the result into a head literal. After parsing every set is normalised so that only
//! sum, cardinality and product aggregates with non-negative weights reach the search; min and
//! max aggregates compile to clauses.
pub mod encode;
pub mod prop;

use partial_ref::{partial, PartialRef};

use rustc_hash::FxHashMap;

use crate::bus::{Priority, PropagatorId};
use crate::context::{AggregatesP, BusP};
use crate::error::{Error, Result};
use crate::lit::Lit;
use crate::prop::Assignment;

pub use prop::{explain, run_set_propagator};

/// Weights of set elements and aggregate bounds.
///
/// All bound computations are checked; overflowing ones surface
/// [`Error::WeightOverflow`](crate::error::Error) instead of wrapping.
pub type Weight = i64;

/// A literal paired with a weight.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct WL {
    pub lit: Lit,
    pub weight: Weight,
}

/// Operation applied to the weights of the true literals of a set.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AggType {
    Sum,
    Card,
    Prod,
    Max,
    Min,
}

/// Direction of an aggregate's comparison: the aggregate holds when the set value is `>=` the
/// bound (`Lower`) or `<=` the bound (`Upper`).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AggSign {
    Lower,
    Upper,
}

/// Relation between an aggregate's head and the aggregate's truth.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AggSem {
    /// Head is true iff the aggregate holds.
    Equivalence,
    /// The head implies the aggregate.
    Implication,
    /// Like equivalence, and the head additionally takes part in an inductive definition.
    Defined,
}

/// An aggregate over a weighted set, reified into a head literal.
#[derive(Clone, Debug)]
pub struct Aggregate {
    pub head: Lit,
    pub set: usize,
    pub bound: Weight,
    pub sign: AggSign,
    pub sem: AggSem,
    pub def_id: Option<usize>,
}

/// A weighted set together with the aggregates constraining it.
pub struct AggSet {
    pub external_id: usize,
    pub ty: AggType,
    /// Sorted ascending by weight after preparation.
    pub wls: Vec<WL>,
    /// Indices into [`Aggregates::aggs`].
    pub aggs: Vec<u32>,
    /// Value of the set when no literal is true.
    pub neutral: Weight,
    /// Largest achievable value over the empty interpretation.
    pub max_possible: Weight,
    /// Indices into `wls` of the currently watched elements.
    pub watched: Vec<u32>,
    /// Indices into `wls` of the currently unwatched elements; `watched` and `unwatched`
    /// together tile the set.
    pub unwatched: Vec<u32>,
    /// Most stringent lower bound over this set, if any aggregate has one.
    pub lower_watch_target: Option<Weight>,
    /// Most stringent upper bound over this set, if any aggregate has one.
    pub upper_watch_target: Option<Weight>,
    /// Dense bus index of this set's propagator, once registered.
    pub dense: u32,
}

impl AggSet {
    fn value_fold(&self, lhs: Weight, rhs: Weight) -> Weight {
        match self.ty {
            AggType::Prod => lhs * rhs,
            _ => lhs + rhs,
        }
    }

    /// Set value when exactly the given predicate's literals are true.
    pub fn value_where(&self, mut is_true: impl FnMut(Lit) -> bool) -> Weight {
        let mut value = self.neutral;
        for wl in self.wls.iter() {
            if is_true(wl.lit) {
                value = self.value_fold(value, wl.weight);
            }
        }
        value
    }

    /// Pessimistic set value: counts only literals currently assigned true.
    pub fn pess(&self, assignment: &Assignment) -> Weight {
        self.value_where(|lit| assignment.lit_is_true(lit))
    }

    /// Optimistic set value: counts every literal that is not false.
    pub fn optim(&self, assignment: &Assignment) -> Weight {
        self.value_where(|lit| !assignment.lit_is_false(lit))
    }
}

/// Truth status of an aggregate under a partial assignment.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AggStatus {
    CertainlyTrue,
    CertainlyFalse,
    Open,
}

impl Aggregate {
    /// Whether a set value satisfies the aggregate's comparison.
    pub fn holds_for(&self, value: Weight) -> bool {
        match self.sign {
            AggSign::Lower => value >= self.bound,
            AggSign::Upper => value <= self.bound,
        }
    }

    /// Status of the aggregate given the pessimistic and optimistic set values.
    pub fn status(&self, pess: Weight, optim: Weight) -> AggStatus {
        match self.sign {
            AggSign::Lower => {
                if pess >= self.bound {
                    AggStatus::CertainlyTrue
                } else if optim < self.bound {
                    AggStatus::CertainlyFalse
                } else {
                    AggStatus::Open
                }
            }
            AggSign::Upper => {
                if optim <= self.bound {
                    AggStatus::CertainlyTrue
                } else if pess > self.bound {
                    AggStatus::CertainlyFalse
                } else {
                    AggStatus::Open
                }
            }
        }
    }
}

/// Declarations waiting for the preparation pass.
pub struct PendingSet {
    pub external_id: usize,
    pub ty: AggType,
    pub wls: Vec<WL>,
}

/// The aggregate engine.
#[derive(Default)]
pub struct Aggregates {
    /// Raw declarations, consumed by [`prepare_set`].
    pending_sets: Vec<PendingSet>,
    pending_aggs: Vec<Aggregate>,
    by_external: FxHashMap<usize, usize>,

    sets: Vec<AggSet>,
    aggs: Vec<Aggregate>,
}

impl Aggregates {
    /// Declare a weighted set. Fails if the id is already taken.
    pub fn declare_set(&mut self, external_id: usize, ty: AggType, wls: Vec<WL>) -> Result<()> {
        if self.by_external.contains_key(&external_id) {
            return Err(Error::DuplicateSet(external_id));
        }
        self.by_external
            .insert(external_id, self.pending_sets.len());
        self.pending_sets.push(PendingSet {
            external_id,
            ty,
            wls,
        });
        Ok(())
    }

    /// Declare an aggregate over a previously declared set.
    pub fn declare_aggregate(
        &mut self,
        external_set: usize,
        head: Lit,
        bound: Weight,
        sign: AggSign,
        sem: AggSem,
        def_id: Option<usize>,
    ) -> Result<()> {
        let set = *self
            .by_external
            .get(&external_set)
            .ok_or(Error::UndefinedSet(external_set))?;

        if sem == AggSem::Defined && head.is_negative() {
            return Err(Error::NegativeDefinedHead(head));
        }

        if self.pending_sets[set]
            .wls
            .iter()
            .any(|wl| wl.lit.var() == head.var())
        {
            return Err(Error::HeadInOwnSet(head));
        }

        self.pending_aggs.push(Aggregate {
            head,
            set,
            bound,
            sign,
            sem,
            def_id,
        });
        Ok(())
    }

    /// Prepared sets.
    pub fn sets(&self) -> &[AggSet] {
        &self.sets
    }

    pub fn sets_mut(&mut self) -> &mut [AggSet] {
        &mut self.sets
    }

    /// Prepared aggregates.
    pub fn aggs(&self) -> &[Aggregate] {
        &self.aggs
    }

    /// Take the raw declarations for the preparation pass.
    pub(crate) fn take_pending(&mut self) -> (Vec<PendingSet>, Vec<Aggregate>) {
        (
            std::mem::take(&mut self.pending_sets),
            std::mem::take(&mut self.pending_aggs),
        )
    }

    pub(crate) fn install(&mut self, sets: Vec<AggSet>, aggs: Vec<Aggregate>) {
        self.sets = sets;
        self.aggs = aggs;
    }

    /// Value of the set behind the aggregate with the given head, under an assignment.
    pub fn value_for_head(&self, head: Lit, assignment: &Assignment) -> Option<Weight> {
        let agg = self.aggs.iter().find(|agg| agg.head == head)?;
        Some(self.sets[agg.set].pess(assignment))
    }

    /// Tighten the bound of the aggregate with the given head.
    ///
    /// Only sound between searches and only in the direction that strengthens the aggregate;
    /// the optimisation driver uses this with an upper-bound sum whose head is pinned true.
    pub fn strengthen_bound(&mut self, head: Lit, bound: Weight) {
        if let Some(agg) = self.aggs.iter_mut().find(|agg| agg.head == head) {
            debug_assert!(match agg.sign {
                AggSign::Upper => bound <= agg.bound,
                AggSign::Lower => bound >= agg.bound,
            });
            agg.bound = bound;
            let set = &mut self.sets[agg.set];
            match agg.sign {
                AggSign::Upper => {
                    set.upper_watch_target =
                        Some(set.upper_watch_target.map_or(bound, |e| e.min(bound)));
                }
                AggSign::Lower => {
                    set.lower_watch_target =
                        Some(set.lower_watch_target.map_or(bound, |e| e.max(bound)));
                }
            }
        }
    }

    /// Truth of an aggregate when literal truth is given by a predicate.
    ///
    /// Used by the definition engine's full-model checks, where defined atoms are valued by a
    /// fixpoint instead of the assignment.
    pub fn holds_under(&self, agg_index: u32, lit_holds: impl Fn(Lit) -> bool) -> bool {
        let agg = &self.aggs[agg_index as usize];
        let set = &self.sets[agg.set];
        let value = set.value_where(|lit| lit_holds(lit));
        agg.holds_for(value)
    }

    /// Whether the head of a defined aggregate can currently be justified.
    ///
    /// A literal is usable as part of the justification when the caller's predicate accepts it;
    /// the definition engine passes a predicate that rejects unjustified atoms of the head's
    /// strongly connected component. On success the contributing literals are written to `jstf`.
    pub fn can_justify_head(
        &self,
        agg_index: u32,
        assignment: &Assignment,
        usable: impl Fn(Lit) -> bool,
        jstf: &mut Vec<Lit>,
    ) -> bool {
        let agg = &self.aggs[agg_index as usize];
        let set = &self.sets[agg.set];

        jstf.clear();

        match agg.sign {
            AggSign::Lower => {
                // Accumulate usable non-false literals until the bound is reached.
                let mut value = set.neutral;
                for wl in set.wls.iter().rev() {
                    if !assignment.lit_is_false(wl.lit) && usable(wl.lit) {
                        value = set.value_fold(value, wl.weight);
                        jstf.push(wl.lit);
                        if value >= agg.bound {
                            return true;
                        }
                    }
                }
                false
            }
            AggSign::Upper => {
                // The aggregate holds when enough literals stay false; justification uses the
                // negations of the literals that must remain out.
                let mut value = set.neutral;
                for wl in set.wls.iter() {
                    if assignment.lit_is_true(wl.lit) || !usable(!wl.lit) {
                        value = set.value_fold(value, wl.weight);
                    } else {
                        jstf.push(!wl.lit);
                    }
                }
                value <= agg.bound
            }
        }
    }
}

/// Checked weight addition.
pub fn add_weights(lhs: Weight, rhs: Weight) -> Result<Weight> {
    lhs.checked_add(rhs).ok_or(Error::WeightOverflow)
}

/// Checked weight multiplication.
pub fn mul_weights(lhs: Weight, rhs: Weight) -> Result<Weight> {
    lhs.checked_mul(rhs).ok_or(Error::WeightOverflow)
}

/// Normalise one raw set declaration.
///
/// - duplicate literals are merged,
/// - a literal occurring with both signs in a sum contributes its smaller weight as a constant,
///   which is folded into every aggregate's bound,
/// - negative sum weights move to the negated literal,
/// - weights that are the operation's neutral element are dropped,
/// - the result is sorted ascending by weight.
pub fn prepare_set(
    pending: PendingSet,
    aggs: &mut [Aggregate],
    agg_indices: &[u32],
) -> Result<AggSet> {
    let PendingSet {
        external_id,
        mut ty,
        mut wls,
    } = pending;

    if ty == AggType::Card {
        for wl in wls.iter_mut() {
            wl.weight = 1;
        }
    }

    // Min over a set is max over the negated weights with a flipped comparison.
    if ty == AggType::Min {
        for wl in wls.iter_mut() {
            wl.weight = wl.weight.checked_neg().ok_or(Error::WeightOverflow)?;
        }
        for &agg_index in agg_indices {
            let agg = &mut aggs[agg_index as usize];
            agg.bound = agg.bound.checked_neg().ok_or(Error::WeightOverflow)?;
            agg.sign = match agg.sign {
                AggSign::Lower => AggSign::Upper,
                AggSign::Upper => AggSign::Lower,
            };
        }
        ty = AggType::Max;
    }

    if ty == AggType::Prod {
        for wl in wls.iter() {
            if wl.weight <= 0 {
                return Err(Error::NonPositiveProductWeight(external_id, wl.weight));
            }
        }
    }

    // Merge duplicate literals.
    wls.sort_by_key(|wl| wl.lit.code());
    let mut merged: Vec<WL> = vec![];
    for wl in wls.into_iter() {
        match merged.last_mut() {
            Some(last) if last.lit == wl.lit => {
                last.weight = match ty {
                    AggType::Sum | AggType::Card => add_weights(last.weight, wl.weight)?,
                    AggType::Prod => mul_weights(last.weight, wl.weight)?,
                    AggType::Max | AggType::Min => last.weight.max(wl.weight),
                };
            }
            _ => merged.push(wl),
        }
    }

    // A literal and its negation in one sum contribute the smaller weight unconditionally.
    if ty == AggType::Sum || ty == AggType::Card {
        let mut folded: Vec<WL> = vec![];
        let mut constant: Weight = 0;
        let mut iter = merged.into_iter().peekable();
        while let Some(wl) = iter.next() {
            let complement = iter.peek().copied().filter(|next| next.lit == !wl.lit);
            if let Some(next) = complement {
                iter.next();
                let common = wl.weight.min(next.weight);
                constant = add_weights(constant, common)?;
                let (lit, weight) = if wl.weight >= next.weight {
                    (wl.lit, wl.weight - next.weight)
                } else {
                    (next.lit, next.weight - wl.weight)
                };
                if weight != 0 {
                    folded.push(WL { lit, weight });
                }
            } else {
                folded.push(wl);
            }
        }
        if constant != 0 {
            for &agg_index in agg_indices {
                let agg = &mut aggs[agg_index as usize];
                agg.bound = agg
                    .bound
                    .checked_sub(constant)
                    .ok_or(Error::WeightOverflow)?;
            }
        }
        merged = folded;

        // Negative weights move to the complementary literal: w*l = w + (-w)*(not l).
        let mut rewritten: Vec<WL> = vec![];
        let mut constant: Weight = 0;
        for wl in merged.into_iter() {
            if wl.weight < 0 {
                constant = add_weights(constant, wl.weight)?;
                rewritten.push(WL {
                    lit: !wl.lit,
                    weight: wl.weight.checked_neg().ok_or(Error::WeightOverflow)?,
                });
            } else if wl.weight != 0 {
                rewritten.push(wl);
            }
        }
        if constant != 0 {
            for &agg_index in agg_indices {
                let agg = &mut aggs[agg_index as usize];
                agg.bound = agg
                    .bound
                    .checked_sub(constant)
                    .ok_or(Error::WeightOverflow)?;
            }
        }
        merged = rewritten;
    } else if merged
        .iter()
        .any(|wl| merged.iter().any(|other| other.lit == !wl.lit))
    {
        return Err(Error::Unsupported(
            "complementary literals in a product or max set",
        ));
    }

    if ty == AggType::Prod {
        // The neutral weight never changes the product.
        merged.retain(|wl| wl.weight != 1);
    }

    merged.sort_by_key(|wl| wl.weight);

    let neutral = match ty {
        AggType::Prod => 1,
        _ => 0,
    };

    let mut max_possible = neutral;
    for wl in merged.iter() {
        max_possible = match ty {
            AggType::Sum | AggType::Card => add_weights(max_possible, wl.weight)?,
            AggType::Prod => mul_weights(max_possible, wl.weight)?,
            AggType::Max | AggType::Min => max_possible.max(wl.weight),
        };
    }

    let mut lower_watch_target = None;
    let mut upper_watch_target = None;
    for &agg_index in agg_indices {
        let agg = &aggs[agg_index as usize];
        match agg.sign {
            AggSign::Lower => {
                lower_watch_target = Some(match lower_watch_target {
                    None => agg.bound,
                    Some(bound) => agg.bound.max(bound),
                });
            }
            AggSign::Upper => {
                upper_watch_target = Some(match upper_watch_target {
                    None => agg.bound,
                    Some(bound) => agg.bound.min(bound),
                });
            }
        }
    }

    Ok(AggSet {
        external_id,
        ty,
        wls: merged,
        aggs: agg_indices.to_vec(),
        neutral,
        max_possible,
        watched: vec![],
        unwatched: vec![],
        lower_watch_target,
        upper_watch_target,
        dense: 0,
    })
}

/// Register a prepared set's propagator with the bus and pick the initial watches.
pub fn register_set_propagator(
    mut ctx: partial!(crate::context::Context, mut AggregatesP, mut BusP),
    set_index: usize,
) {
    let dense = ctx
        .part_mut(BusP)
        .register(PropagatorId::AggSet(set_index as u32), Priority::Fast);


    let (aggregates, mut ctx) = ctx.split_part_mut(AggregatesP);
    let heads: Vec<Lit> = aggregates.sets[set_index]
        .aggs
        .iter()
        .map(|&a| aggregates.aggs[a as usize].head)
        .collect();
    let set = &mut aggregates.sets[set_index];
    set.dense = dense;

    {
        let bus = ctx.part_mut(BusP);
        for head in heads {
            bus.subscribe(head, dense);
            bus.subscribe(!head, dense);
        }
    }

    prop::choose_watches(set, ctx.part_mut(BusP));

    // Run once at the start: an aggregate can be decided by its bounds alone.
    ctx.part_mut(BusP).enqueue(dense);
}
