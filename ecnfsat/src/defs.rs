//! Inductive definitions.
//!
//! Rules sharing a definition id form one inductive definition, interpreted under well-founded
//! or stable semantics. The completion of every rule is asserted as clauses at the end of
//! parsing; this engine adds the missing "no cycles" direction: it tracks a justification for
//! every head in a loop, turns heads whose justification collapsed into cycle sources, searches
//! unfounded sets from those sources and learns loop formulas for them.
pub mod scc;
pub mod ufs;
pub mod wellfounded;

use partial_ref::{partial, PartialRef};

use rustc_hash::FxHashMap;

use crate::bus::{Priority, PropagatorId};
use crate::config::DefnStrategy;
use crate::context::{
    AggregatesP, AnalyzeConflictP, AssignmentP, BinaryClausesP, BusP, ClauseAllocP, ClauseDbP,
    Context, DefinitionsP, ImplGraphP, IncrementalP, IntEngineP, ModalP, SolverConfigP,
    SolverStateP, TmpDataP, TrailP, VariablesP, VsidsP, WatchlistsP,
};
use crate::error::{Error, Result};
use crate::lit::{Lit, Var};
use crate::prop::Conflict;

/// One rule of an inductive definition.
#[derive(Clone, Debug)]
pub struct Rule {
    pub head: Var,
    pub body: Vec<Lit>,
    pub conjunctive: bool,
    pub def_id: usize,
}

/// Shape of the definition a head has.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DefType {
    Disj,
    Conj,
    Aggr,
}

/// Loop membership of a defined atom, from the two Tarjan passes.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DefOcc {
    /// Not on any cycle; the completion clauses suffice.
    NoLoop,
    /// On a cycle of the positive dependency graph.
    PosLoop,
    /// On a cycle through a negative edge.
    MixedLoop,
    /// On both kinds of cycles.
    BothLoop,
}

/// Per-head data of the definition engine.
#[derive(Clone)]
pub struct DefHead {
    pub def_type: DefType,
    pub def_id: usize,
    /// Index into `rules`, or the aggregate index for aggregate heads.
    pub rule: u32,
    pub occ: DefOcc,
    /// Strongly connected component of the positive dependency graph; heads outside any
    /// component keep `usize::MAX`.
    pub scc: usize,
    /// Body literals currently certifying the head's truth. Empty for conjunctive heads, whose
    /// whole body is the implicit justification.
    pub justification: Vec<Lit>,
}

/// The inductive-definition engine.
#[derive(Default)]
pub struct Definitions {
    /// Rules as declared; multiple rules per head are merged during the finish pass.
    pending_rules: Vec<Rule>,
    rules: Vec<Rule>,
    heads: FxHashMap<Var, DefHead>,
    /// All defined heads, for iteration.
    defd_vars: Vec<Var>,
    /// Per literal code: disjunctive heads with this literal in their body.
    disj_occurs: Vec<Vec<Var>>,
    /// Per literal code: aggregate heads with this literal in their set.
    aggr_occurs: Vec<Vec<Var>>,
    /// Per literal code: conjunctive heads with this (positive) literal in their body.
    conj_occurs: Vec<Vec<Var>>,
    /// Cycle sources awaiting an unfounded-set search.
    css: Vec<Var>,
    is_cs: Vec<bool>,
    /// Definition ids that contain a mixed loop.
    mixed_defs: Vec<usize>,
    /// Whether any head lies on a positive loop.
    pos_loops: bool,
    dense: u32,
    registered: bool,
    /// Adaptive strategy bookkeeping.
    adaption_total: u32,
    adaption_current: u32,
    /// Scratch for the pending wakeup literals.
    pending: Vec<Lit>,
}

impl Definitions {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.disj_occurs.resize(count * 2, vec![]);
        self.aggr_occurs.resize(count * 2, vec![]);
        self.conj_occurs.resize(count * 2, vec![]);
        self.is_cs.resize(count, false);
    }

    /// Declare a rule; heads may repeat within one definition.
    pub fn push_rule(&mut self, rule: Rule) {
        self.pending_rules.push(rule);
    }

    /// Install a merged rule. At most one per head.
    fn declare_rule(&mut self, rule: Rule) -> Result<()> {
        if self.heads.contains_key(&rule.head) {
            return Err(Error::DuplicateDefinitionHead(rule.head));
        }
        let def_type = if rule.conjunctive {
            DefType::Conj
        } else {
            DefType::Disj
        };
        self.heads.insert(
            rule.head,
            DefHead {
                def_type,
                def_id: rule.def_id,
                rule: self.rules.len() as u32,
                occ: DefOcc::NoLoop,
                scc: usize::max_value(),
                justification: vec![],
            },
        );
        self.defd_vars.push(rule.head);
        self.rules.push(rule);
        Ok(())
    }

    /// Declare the head of a defined aggregate.
    pub fn declare_aggregate_head(
        &mut self,
        head: Var,
        agg_index: u32,
        def_id: usize,
    ) -> Result<()> {
        if self.heads.contains_key(&head) {
            return Err(Error::DuplicateDefinitionHead(head));
        }
        self.heads.insert(
            head,
            DefHead {
                def_type: DefType::Aggr,
                def_id,
                rule: agg_index,
                occ: DefOcc::NoLoop,
                scc: usize::max_value(),
                justification: vec![],
            },
        );
        self.defd_vars.push(head);
        Ok(())
    }

    pub fn is_defined(&self, var: Var) -> bool {
        self.heads.contains_key(&var)
    }

    pub fn heads(&self) -> &FxHashMap<Var, DefHead> {
        &self.heads
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn defd_vars(&self) -> &[Var] {
        &self.defd_vars
    }

    pub(crate) fn head_mut(&mut self, var: Var) -> &mut DefHead {
        self.heads.get_mut(&var).expect("not a defined atom")
    }

    pub(crate) fn set_analysis_results(&mut self, pos_loops: bool, mixed_defs: Vec<usize>) {
        self.pos_loops = pos_loops;
        self.mixed_defs = mixed_defs;
    }

    /// Definition ids containing a mixed loop, relevant for the well-founded check.
    pub fn mixed_defs(&self) -> &[usize] {
        &self.mixed_defs
    }

    /// Whether any head lies on a positive loop.
    pub fn has_pos_loops(&self) -> bool {
        self.pos_loops
    }

    pub(crate) fn add_disj_occurrence(&mut self, lit: Lit, head: Var) {
        self.disj_occurs[lit.code()].push(head);
    }

    pub(crate) fn add_aggr_occurrence(&mut self, lit: Lit, head: Var) {
        self.aggr_occurs[lit.code()].push(head);
    }

    pub(crate) fn add_conj_occurrence(&mut self, lit: Lit, head: Var) {
        self.conj_occurs[lit.code()].push(head);
    }

    pub(crate) fn disj_occurrences(&self, lit: Lit) -> &[Var] {
        &self.disj_occurs[lit.code()]
    }

    pub(crate) fn aggr_occurrences(&self, lit: Lit) -> &[Var] {
        &self.aggr_occurs[lit.code()]
    }

    pub(crate) fn conj_occurrences(&self, lit: Lit) -> &[Var] {
        &self.conj_occurs[lit.code()]
    }

    /// Drain the pending cycle sources for an unfounded-set search.
    pub(crate) fn take_cycle_sources(&mut self) -> Vec<Var> {
        for &var in self.css.iter() {
            self.is_cs[var.index()] = false;
        }
        std::mem::take(&mut self.css)
    }

    fn add_cycle_source(&mut self, var: Var) {
        if !self.is_cs[var.index()] {
            self.is_cs[var.index()] = true;
            self.css.push(var);
        }
    }

    /// Pending cycle sources are meaningless after the trail was rewound.
    pub fn on_backtrack(&mut self) {
        for &var in self.css.iter() {
            self.is_cs[var.index()] = false;
        }
        self.css.clear();
    }
}

/// Structural pass at the end of parsing.
///
/// Merges multi-rule heads into single rules (conjunctive bodies become auxiliary atoms of one
/// disjunction), asserts the completion clauses, runs the two Tarjan passes, initialises the
/// justifications and registers the propagator. Must run before the first search.
pub fn finish(
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
) -> Result<()> {
    use crate::load::load_clause;

    merge_pending_rules(ctx.borrow())?;

    let rule_count = ctx.part(DefinitionsP).rules.len();

    for index in 0..rule_count {
        let (head, body, conjunctive) = {
            let rule = &ctx.part(DefinitionsP).rules[index];
            (rule.head, rule.body.clone(), rule.conjunctive)
        };
        let head_lit = Lit::from_var(head, false);

        if conjunctive {
            // h <-> b1 ^ .. ^ bn
            let mut long = vec![head_lit];
            long.extend(body.iter().map(|&l| !l));
            load_clause(ctx.borrow(), &long);
            for &l in body.iter() {
                load_clause(ctx.borrow(), &[!head_lit, l]);
            }
        } else {
            // h <-> b1 v .. v bn
            let mut long = vec![!head_lit];
            long.extend(body.iter().copied());
            load_clause(ctx.borrow(), &long);
            for &l in body.iter() {
                load_clause(ctx.borrow(), &[head_lit, !l]);
            }
        }
    }

    scc::analyze(ctx.borrow());
    scc::init_justifications(ctx.borrow());
    register_propagator(ctx.borrow());
    kick_initial_search(ctx.borrow());

    Ok(())
}

/// Merge all pending rules so every head keeps exactly one rule.
///
/// A head with several rules becomes one disjunctive rule; each conjunctive body turns into an
/// auxiliary atom defined by equivalence clauses, the way lparse-style programs encode multiple
/// rules per head.
fn merge_pending_rules(
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
) -> Result<()> {
    use crate::context::alloc_internal_var;

    let pending = std::mem::take(&mut ctx.part_mut(DefinitionsP).pending_rules);

    // Group in declaration order.
    let mut heads_in_order: Vec<Var> = vec![];
    let mut grouped: FxHashMap<Var, Vec<Rule>> = FxHashMap::default();
    for rule in pending {
        if !grouped.contains_key(&rule.head) {
            heads_in_order.push(rule.head);
        }
        grouped.entry(rule.head).or_default().push(rule);
    }

    for head in heads_in_order {
        let rules = grouped.remove(&head).expect("grouped above");

        let def_id = rules[0].def_id;
        if rules.iter().any(|rule| rule.def_id != def_id) {
            return Err(Error::DuplicateDefinitionHead(head));
        }

        if rules.len() == 1 {
            let rule = rules.into_iter().next().expect("one rule");
            ctx.part_mut(DefinitionsP).declare_rule(rule)?;
            continue;
        }

        let mut disjuncts: Vec<Lit> = vec![];
        for rule in rules {
            if !rule.conjunctive {
                disjuncts.extend_from_slice(&rule.body);
            } else if rule.body.len() == 1 {
                disjuncts.push(rule.body[0]);
            } else {
                // The conjunctive body becomes a defined auxiliary of the same definition, so
                // positive cycles through it stay visible to the dependency analysis. Its value
                // follows from the body, so it is kept out of branching unless configured
                // otherwise.
                let aux = alloc_internal_var(ctx.borrow()).positive();
                if !ctx.part(SolverConfigP).branch_on_internal {
                    ctx.part_mut(VariablesP).set_decidable(aux.var(), false);
                }
                ctx.part_mut(DefinitionsP).declare_rule(Rule {
                    head: aux.var(),
                    body: rule.body,
                    conjunctive: true,
                    def_id,
                })?;
                disjuncts.push(aux);
            }
        }

        ctx.part_mut(DefinitionsP).declare_rule(Rule {
            head,
            body: disjuncts,
            conjunctive: false,
            def_id,
        })?;
    }

    Ok(())
}

/// Register the engine's propagator once any loop-relevant head exists.
///
/// The engine runs at slow priority: boolean propagation and the fast theory propagators settle
/// before an unfounded-set search starts.
pub fn register_propagator(
    mut ctx: partial!(Context, mut BusP, mut DefinitionsP, AggregatesP),
) {
    let (defs, mut ctx) = ctx.split_part_mut(DefinitionsP);
    if defs.registered {
        return;
    }
    defs.registered = true;
    let dense = ctx
        .part_mut(BusP)
        .register(PropagatorId::Definitions, Priority::Slow);
    defs.dense = dense;

    let (aggregates, mut ctx) = ctx.split_part(AggregatesP);
    let bus = ctx.part_mut(BusP);

    // Wake on every event that can invalidate a justification: a body literal becoming false
    // (its negation becoming true) and heads changing value.
    for (&head_var, head) in defs.heads.iter() {
        if head.occ == DefOcc::NoLoop {
            continue;
        }
        match head.def_type {
            DefType::Disj | DefType::Conj => {
                for &lit in defs.rules[head.rule as usize].body.iter() {
                    bus.subscribe(!lit, dense);
                }
            }
            DefType::Aggr => {
                let agg = &aggregates.aggs()[head.rule as usize];
                for wl in aggregates.sets()[agg.set].wls.iter() {
                    bus.subscribe(wl.lit, dense);
                    bus.subscribe(!wl.lit, dense);
                }
            }
        }
        bus.subscribe(Lit::from_var(head_var, false), dense);
        bus.subscribe(Lit::from_var(head_var, true), dense);
    }
}

/// Wake the engine's slow propagator for all initial cycle sources.
pub fn kick_initial_search(mut ctx: partial!(Context, mut BusP, DefinitionsP)) {
    let (defs, mut ctx) = ctx.split_part(DefinitionsP);
    if defs.registered && !defs.css.is_empty() {
        ctx.part_mut(BusP).enqueue(defs.dense);
    }
}

/// The engine's propagator: refresh justifications, then search unfounded sets.
pub fn run_indirect_propagate(
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
    let dense = ctx.part(DefinitionsP).dense;
    let mut pending = std::mem::take(&mut ctx.part_mut(DefinitionsP).pending);
    ctx.part_mut(BusP).take_pending(dense, &mut pending);

    find_cycle_sources(ctx.borrow(), &pending);

    pending.clear();
    ctx.part_mut(DefinitionsP).pending = pending;

    let run_now = match ctx.part(SolverConfigP).defn_strategy {
        DefnStrategy::Always => true,
        DefnStrategy::Lazy => false,
        DefnStrategy::Adaptive => {
            let defs = ctx.part_mut(DefinitionsP);
            if defs.adaption_current == 0 {
                true
            } else {
                defs.adaption_current -= 1;
                false
            }
        }
    };

    if !run_now {
        return Ok(());
    }

    let found = ufs::search_and_assert(ctx.borrow())?;

    if ctx.part(SolverConfigP).defn_strategy == DefnStrategy::Adaptive {
        let defs = ctx.part_mut(DefinitionsP);
        if found {
            defs.adaption_total = 0;
        } else {
            defs.adaption_total = (defs.adaption_total + 1).min(8);
        }
        defs.adaption_current = defs.adaption_total;
    }

    Ok(())
}

/// Re-justify heads whose justification used a literal that became false; heads that cannot be
/// re-justified from outside their component become cycle sources.
fn find_cycle_sources(
    mut ctx: partial!(
        Context,
        mut DefinitionsP,
        AggregatesP,
        AssignmentP,
    ),
    assigned: &[Lit],
) {
    let (defs, ctx) = ctx.split_part_mut(DefinitionsP);
    let assignment = ctx.part(AssignmentP);
    let aggregates = ctx.part(AggregatesP);

    for &assigned_lit in assigned {
        let became_false = !assigned_lit;

        let disj_heads: Vec<Var> = defs.disj_occurs[became_false.code()].clone();
        for head_var in disj_heads {
            let head = &defs.heads[&head_var];
            if head.occ == DefOcc::NoLoop || !head.justification.contains(&became_false) {
                continue;
            }
            // Prefer a replacement from outside the component.
            let rule = &defs.rules[head.rule as usize];
            let scc = head.scc;
            let replacement = rule.body.iter().copied().find(|&l| {
                !assignment.lit_is_false(l)
                    && (l.is_negative() || !same_scc(defs, scc, l.var()))
            });
            match replacement {
                Some(l) => {
                    defs.heads.get_mut(&head_var).unwrap().justification = vec![l];
                }
                None => defs.add_cycle_source(head_var),
            }
        }

        let aggr_heads: Vec<Var> = defs.aggr_occurs[became_false.code()].clone();
        for head_var in aggr_heads {
            let head = &defs.heads[&head_var];
            if head.occ == DefOcc::NoLoop || !head.justification.contains(&became_false) {
                continue;
            }
            let scc = head.scc;
            let agg_index = head.rule;
            let mut jstf = vec![];
            let ok = aggregates.can_justify_head(
                agg_index,
                assignment,
                |l| l.is_negative() || !same_scc(defs, scc, l.var()),
                &mut jstf,
            );
            if ok {
                defs.heads.get_mut(&head_var).unwrap().justification = jstf;
            } else {
                defs.add_cycle_source(head_var);
            }
        }
    }
}

fn same_scc(defs: &Definitions, scc: usize, var: Var) -> bool {
    scc != usize::max_value()
        && defs
            .heads
            .get(&var)
            .map(|head| head.scc == scc)
            .unwrap_or(false)
}

/// Full-assignment consistency check.
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
    wellfounded::check_full_model(ctx.borrow())
}
