//! The public solver interface.
use partial_ref::{IntoPartialRef, IntoPartialRefMut, PartialRef};

use log::info;

use crate::aggregate::{AggSem, AggSign, AggType, Weight, WL};
use crate::builder::{self, ImplicationKind, IntCmp};
use crate::config::SolverConfig;
use crate::context::{
    config_changed, AggregatesP, AssignmentP, Context, SolverStateP, VariablesP,
};
use crate::error::Result;
use crate::incremental::set_assumptions;
use crate::int::{IntView, LazyGrounder};
use crate::lit::{Lit, Var};
use crate::load::load_clause;
use crate::modal::Quant;
use crate::optimize::{
    ordered_invalidation, subset_assumptions, subset_invalidation, Objective,
};
use crate::schedule::schedule_step;
use crate::state::{SatState, StopHandle};

/// Outcome of a [`Solver::solve`] call.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SolveResult {
    Sat,
    Unsat,
    UnsatUnderAssumptions,
    /// Cooperatively cancelled; a best-so-far model may be available.
    Stopped,
}

/// A solver for extended CNF: clauses plus inductive definitions, weighted aggregates and
/// finite-domain integer constraints.
#[derive(Default)]
pub struct Solver {
    ctx: Box<Context>,
    pending_invalidation: Option<Vec<Lit>>,
}

impl Solver {
    /// Create a new solver with the default configuration.
    pub fn new() -> Solver {
        Solver::default()
    }

    /// Create a new solver with the given configuration.
    pub fn with_config(config: SolverConfig) -> Solver {
        let mut solver = Solver::default();
        let seed = config.random_seed;
        solver.ctx.solver_config = config;
        {
            let mut ctx = solver.ctx.into_partial_ref_mut();
            config_changed(ctx.borrow());
        }
        solver.ctx.vsids.set_seed(seed);
        solver
    }

    /// The solver's configuration.
    pub fn config(&self) -> &SolverConfig {
        &self.ctx.solver_config
    }

    /// Handle used to cancel a running search from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.ctx.solver_state.stop.clone()
    }

    /// Make sure at least `count` user variables exist.
    pub fn ensure_var_count(&mut self, count: usize) {
        let mut ctx = self.ctx.into_partial_ref_mut();
        crate::context::set_var_count(ctx.borrow(), count);
    }

    /// Declare a disjunction of literals.
    pub fn add_clause(&mut self, lits: &[Lit]) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::add_clause(ctx.borrow(), lits)
    }

    /// Declare a reified implication.
    pub fn add_implication(
        &mut self,
        head: Lit,
        kind: ImplicationKind,
        body: &[Lit],
        conjunctive: bool,
    ) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::add_implication(ctx.borrow(), head, kind, body, conjunctive)
    }

    /// Declare a rule of an inductive definition.
    pub fn add_rule(
        &mut self,
        conjunctive: bool,
        head: Var,
        body: &[Lit],
        def_id: usize,
    ) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::add_rule(ctx.borrow(), conjunctive, head, body, def_id)
    }

    /// Declare a weighted set.
    pub fn add_weighted_set(&mut self, set_id: usize, ty: AggType, wls: &[WL]) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::add_weighted_set(ctx.borrow(), set_id, ty, wls)
    }

    /// Declare an aggregate over a declared set.
    pub fn add_aggregate(
        &mut self,
        set_id: usize,
        head: Lit,
        bound: Weight,
        sign: AggSign,
        sem: AggSem,
        def_id: Option<usize>,
    ) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::add_aggregate(ctx.borrow(), set_id, head, bound, sign, sem, def_id)
    }

    /// Declare an integer variable over a contiguous range.
    pub fn add_int_range(&mut self, id: usize, lo: Weight, hi: Weight, lazy: bool) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::add_int_range(ctx.borrow(), id, lo, hi, lazy)
    }

    /// Declare an integer variable over an enumerated domain.
    pub fn add_int_enum(&mut self, id: usize, values: &[Weight]) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::add_int_enum(ctx.borrow(), id, values)
    }

    /// Declare `head <-> (x cmp c)` for a constant comparison.
    pub fn add_int_const_cmp(
        &mut self,
        head: Lit,
        x: usize,
        cmp: IntCmp,
        c: Weight,
    ) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::add_int_const_cmp(ctx.borrow(), head, x, cmp, c)
    }

    /// Declare `head <-> (x cmp y)` over two integer views.
    pub fn add_int_binary(&mut self, head: Lit, x: IntView, cmp: IntCmp, y: IntView) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::add_int_binary(ctx.borrow(), head, x, cmp, y)
    }

    /// Declare a reified weighted sum constraint.
    pub fn add_int_linear(
        &mut self,
        head: Lit,
        terms: &[(Weight, usize)],
        cmp: IntCmp,
        bound: Weight,
    ) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::add_int_linear(ctx.borrow(), head, terms, cmp, bound)
    }

    /// Declare a reified weighted product constraint.
    pub fn add_int_product(
        &mut self,
        head: Lit,
        factor: Weight,
        vars: &[usize],
        cmp: IntCmp,
        bound: Weight,
    ) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::add_int_product(ctx.borrow(), head, factor, vars, cmp, bound)
    }

    /// Declare the element constraint `a[x] = y` with 1-based positions.
    pub fn add_int_element(&mut self, x: usize, array: &[Weight], y: usize) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::add_int_element(ctx.borrow(), x, array, y)
    }

    /// Declare that the listed variables take pairwise distinct values.
    pub fn add_all_different(&mut self, vars: &[usize]) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::add_all_different(ctx.borrow(), vars)
    }

    /// Declare a lazily grounded predicate instance.
    pub fn add_lazy_atom(
        &mut self,
        head: Lit,
        args: &[usize],
        grounder: Box<dyn LazyGrounder>,
    ) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::add_lazy_atom(ctx.borrow(), head, args, grounder)
    }

    /// Attach a child solver under the given head.
    ///
    /// `rigid` pairs parent literals with the child literals naming the same rigid atom. The
    /// child is finalised here; its declarations are frozen afterwards.
    pub fn add_modal_child(
        &mut self,
        head: Lit,
        quant: Quant,
        rigid: Vec<(Lit, Lit)>,
        mut child: Solver,
    ) -> Result<()> {
        child.finish()?;
        child.ctx.solver_state.stop = self.ctx.solver_state.stop.clone();

        let needed = rigid
            .iter()
            .map(|&(parent, _)| parent)
            .chain(std::iter::once(head))
            .map(|l| l.index() + 1)
            .max()
            .unwrap_or(0);
        self.ensure_var_count(needed);

        self.ctx.modal.add_child(head, quant, rigid, child.ctx);
        Ok(())
    }

    /// Minimise the set of true literals among the given ones.
    pub fn minimize_subset(&mut self, lits: &[Lit]) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::minimize_subset(ctx.borrow(), lits)
    }

    /// Minimise the position of the first true literal of the list.
    pub fn minimize_ordered(&mut self, lits: &[Lit]) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::minimize_ordered(ctx.borrow(), lits)
    }

    /// Minimise the value of the sum over a declared set.
    pub fn minimize_agg_sum(&mut self, set_id: usize) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::minimize_agg_sum(ctx.borrow(), set_id)
    }

    /// Run the structural pass; afterwards declarations are frozen.
    pub fn finish(&mut self) -> Result<()> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        builder::finish(ctx.borrow())
    }

    /// Check satisfiability of the declared problem.
    pub fn solve(&mut self) -> Result<SolveResult> {
        self.solve_with_assumptions(&[])
    }

    /// Check satisfiability under the given assumptions.
    pub fn solve_with_assumptions(&mut self, assumptions: &[Lit]) -> Result<SolveResult> {
        self.finish()?;

        if self.ctx.optimize.objective().is_some() {
            return self.solve_optimal(assumptions);
        }

        let mut ctx = self.ctx.into_partial_ref_mut();
        set_assumptions(ctx.borrow(), assumptions);
        while schedule_step(ctx.borrow()) {}

        Ok(map_state(ctx.part(SolverStateP).sat_state))
    }

    /// Find the next model, invalidating the previous one.
    ///
    /// Returns `None` once no further distinct model over the user-declared variables exists.
    /// The assignment (including integer bounds) stays intact until the next call.
    pub fn next_model(&mut self) -> Result<Option<Vec<Lit>>> {
        self.finish()?;

        if let Some(clause) = self.pending_invalidation.take() {
            let mut ctx = self.ctx.into_partial_ref_mut();
            load_clause(ctx.borrow(), &clause);
        }

        match self.solve()? {
            SolveResult::Sat => {
                let model = self.model().expect("sat state has a model");

                // The invalidation also covers the integer order atoms; two models that agree on
                // the propositional vocabulary may still assign different integer values.
                let mut invalidation: Vec<Lit> = model.iter().map(|&l| !l).collect();
                let assignment = &self.ctx.assignment;
                for var_data in self.ctx.int_engine.vars() {
                    for (_, atom) in var_data.order_atoms() {
                        if let Some(value) = assignment.lit_value(atom) {
                            invalidation.push(atom ^ value);
                        }
                    }
                }

                self.pending_invalidation = Some(invalidation);
                Ok(Some(model))
            }
            _ => Ok(None),
        }
    }

    /// Set of user-declared literals that satisfy the formula.
    pub fn model(&self) -> Option<Vec<Lit>> {
        if self.ctx.optimize.objective().is_some() {
            return self.ctx.optimize.best_model().map(<[Lit]>::to_vec);
        }

        let ctx = self.ctx.into_partial_ref();
        if ctx.part(SolverStateP).sat_state != SatState::Sat {
            return None;
        }
        Some(current_model(
            ctx.part(AssignmentP),
            ctx.part(VariablesP).external_count(),
        ))
    }

    /// Value of an integer variable in the current assignment.
    pub fn int_value(&self, id: usize) -> Option<Weight> {
        let index = self.ctx.int_engine.lookup(id).ok()?;
        let var = self.ctx.int_engine.var(index);
        if var.is_fixed() {
            Some(var.min())
        } else {
            None
        }
    }

    /// Subset of assumptions that made the last call unsatisfiable.
    pub fn failed_core(&self) -> &[Lit] {
        self.ctx.incremental.failed_core()
    }

    /// Iterative strengthening until the objective is optimal.
    fn solve_optimal(&mut self, base_assumptions: &[Lit]) -> Result<SolveResult> {
        let objective = self
            .ctx
            .optimize
            .objective()
            .cloned()
            .expect("objective checked by caller");

        self.ctx.optimize.clear_best();

        let mut assumptions: Vec<Lit> = base_assumptions.to_vec();
        let mut models = 0u64;

        loop {
            let state = {
                let mut ctx = self.ctx.into_partial_ref_mut();
                set_assumptions(ctx.borrow(), &assumptions);
                while schedule_step(ctx.borrow()) {}
                ctx.part(SolverStateP).sat_state
            };

            match state {
                SatState::Stopped => {
                    return Ok(SolveResult::Stopped);
                }
                SatState::Unsat | SatState::UnsatUnderAssumptions => break,
                SatState::Sat => {
                    models += 1;
                    let model = {
                        let ctx = self.ctx.into_partial_ref();
                        current_model(
                            ctx.part(AssignmentP),
                            ctx.part(VariablesP).external_count(),
                        )
                    };

                    let truth = {
                        let in_model: rustc_hash::FxHashSet<Lit> = model.iter().copied().collect();
                        move |l: Lit| in_model.contains(&l)
                    };

                    self.ctx.optimize.record_model(model.clone());

                    match &objective {
                        Objective::Subset { lits } => {
                            let invalidation = subset_invalidation(lits, &truth);
                            assumptions = base_assumptions
                                .iter()
                                .copied()
                                .chain(subset_assumptions(lits, &truth))
                                .collect();
                            if invalidation.is_empty() {
                                break;
                            }
                            let mut ctx = self.ctx.into_partial_ref_mut();
                            load_clause(ctx.borrow(), &invalidation);
                        }
                        Objective::OrderedList { lits } => {
                            match ordered_invalidation(lits, &truth) {
                                None => break,
                                Some(clause) => {
                                    let mut ctx = self.ctx.into_partial_ref_mut();
                                    load_clause(ctx.borrow(), &clause);
                                }
                            }
                        }
                        Objective::AggSum { head, .. } => {
                            let value = {
                                let ctx = self.ctx.into_partial_ref();
                                ctx.part(AggregatesP)
                                    .value_for_head(*head, ctx.part(AssignmentP))
                            };
                            let value = match value {
                                Some(value) => value,
                                None => break,
                            };
                            match value.checked_sub(1) {
                                None => break,
                                Some(bound) => {
                                    self.ctx.aggregates.strengthen_bound(*head, bound);
                                    let mut ctx = self.ctx.into_partial_ref_mut();
                                    let dense_ids: Vec<u32> = ctx
                                        .part(AggregatesP)
                                        .sets()
                                        .iter()
                                        .map(|set| set.dense)
                                        .collect();
                                    for dense in dense_ids {
                                        ctx.part_mut(crate::context::BusP).enqueue(dense);
                                    }
                                }
                            }
                        }
                    }
                }
                SatState::Unknown => unreachable!("search left in unknown state"),
            }
        }

        info!("optimisation finished after {} models", models);

        if self.ctx.optimize.best_model().is_some() {
            Ok(SolveResult::Sat)
        } else {
            Ok(SolveResult::Unsat)
        }
    }
}

/// The current assignment restricted to user-declared variables.
fn current_model(assignment: &crate::prop::Assignment, external_count: usize) -> Vec<Lit> {
    (0..external_count)
        .filter_map(|index| {
            let var = Var::from_index(index);
            assignment
                .var_value(var)
                .map(|value| Lit::from_var(var, !value))
        })
        .collect()
}

/// Solve a child context under assumptions, for the second-order driver.
///
/// Returns `None` when the shared stop flag cancelled the subsearch.
pub(crate) fn subsearch(ctx: &mut Context, assumptions: &[Lit]) -> Option<bool> {
    debug_assert!(ctx.solver_state.finished, "modal child not finalised");

    let mut ctx = ctx.into_partial_ref_mut();
    set_assumptions(ctx.borrow(), assumptions);
    while schedule_step(ctx.borrow()) {}

    match ctx.part(SolverStateP).sat_state {
        SatState::Sat => Some(true),
        SatState::Unsat | SatState::UnsatUnderAssumptions => Some(false),
        SatState::Stopped | SatState::Unknown => None,
    }
}

fn map_state(state: SatState) -> SolveResult {
    match state {
        SatState::Sat => SolveResult::Sat,
        SatState::Unsat => SolveResult::Unsat,
        SatState::UnsatUnderAssumptions => SolveResult::UnsatUnderAssumptions,
        SatState::Stopped => SolveResult::Stopped,
        SatState::Unknown => unreachable!("search left in unknown state"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::aggregate::{AggSem, AggSign, AggType, WL};
    use crate::builder::IntCmp;
    use crate::config::{DefSemantics, SolverConfig};

    fn weighted(lit: Lit, weight: Weight) -> WL {
        WL { lit, weight }
    }

    #[test]
    fn unsat_by_unit_propagation() {
        let mut solver = Solver::new();
        solver.add_clause(&lits![1]).unwrap();
        solver.add_clause(&lits![-1]).unwrap();

        assert_eq!(solver.solve().unwrap(), SolveResult::Unsat);
        assert!(solver.model().is_none());
    }

    #[test]
    fn cardinality_at_least_two() {
        let mut solver = Solver::new();
        solver
            .add_weighted_set(
                1,
                AggType::Card,
                &[
                    weighted(lit!(1), 1),
                    weighted(lit!(2), 1),
                    weighted(lit!(3), 1),
                ],
            )
            .unwrap();
        solver
            .add_aggregate(1, lit!(4), 2, AggSign::Lower, AggSem::Equivalence, None)
            .unwrap();
        solver.add_clause(&lits![4]).unwrap();

        let mut count = 0;
        while let Some(model) = solver.next_model().unwrap() {
            let trues = [lit!(1), lit!(2), lit!(3)]
                .iter()
                .filter(|&&l| model.contains(&l))
                .count();
            assert!(trues >= 2, "model with only {} true set literals", trues);
            count += 1;
        }

        assert_eq!(count, 4);
    }

    #[test]
    fn mixed_loop_has_no_wellfounded_model() {
        let mut solver = Solver::new();
        // a <- b and b <- not a; the well-founded model leaves both undefined.
        solver.add_rule(true, var!(1), &lits![2], 0).unwrap();
        solver.add_rule(true, var!(2), &lits![-1], 0).unwrap();

        assert_eq!(solver.solve().unwrap(), SolveResult::Unsat);
    }

    #[test]
    fn positive_loop_defaults_false() {
        let mut solver = Solver::new();
        // a <- b and b <- a without other support.
        solver.add_rule(true, var!(1), &lits![2], 0).unwrap();
        solver.add_rule(true, var!(2), &lits![1], 0).unwrap();

        assert_eq!(solver.solve().unwrap(), SolveResult::Sat);
        let model = solver.model().unwrap();
        assert!(model.contains(&lit!(-1)));
        assert!(model.contains(&lit!(-2)));
    }

    #[test]
    fn even_negative_loop_by_semantics() {
        // a <- not b and b <- not a: two stable models, no total well-founded one.
        for (semantics, expected_models) in [
            (DefSemantics::Stable, 2usize),
            (DefSemantics::WellFounded, 0usize),
        ]
        .iter()
        .copied()
        {
            let mut config = SolverConfig::default();
            config.def_semantics = semantics;
            let mut solver = Solver::with_config(config);
            solver.add_rule(true, var!(1), &lits![-2], 0).unwrap();
            solver.add_rule(true, var!(2), &lits![-1], 0).unwrap();

            let mut count = 0;
            while solver.next_model().unwrap().is_some() {
                count += 1;
            }
            assert_eq!(count, expected_models, "semantics {:?}", semantics);
        }
    }

    #[test]
    fn integer_sum_models() {
        let mut solver = Solver::new();
        solver.add_int_range(0, 0, 3, false).unwrap();
        solver.add_int_range(1, 0, 3, false).unwrap();

        solver
            .add_int_linear(lit!(1), &[(1, 0), (1, 1)], IntCmp::Eq, 5)
            .unwrap();
        solver.add_clause(&lits![1]).unwrap();

        solver.add_int_const_cmp(lit!(2), 0, IntCmp::Eq, 3).unwrap();
        solver.add_int_const_cmp(lit!(3), 1, IntCmp::Eq, 3).unwrap();
        solver.add_clause(&lits![2, 3]).unwrap();

        let mut seen = vec![];
        while solver.next_model().unwrap().is_some() {
            seen.push((solver.int_value(0).unwrap(), solver.int_value(1).unwrap()));
        }
        seen.sort_unstable();

        assert_eq!(seen, vec![(2, 3), (3, 2)]);
    }

    #[test]
    fn subset_minimisation_finds_smallest_cover() {
        let mut solver = Solver::new();
        solver.add_clause(&lits![1, 2]).unwrap();
        solver.add_clause(&lits![2, 3]).unwrap();
        solver.minimize_subset(&lits![1, 2, 3]).unwrap();

        assert_eq!(solver.solve().unwrap(), SolveResult::Sat);
        let model = solver.model().unwrap();
        assert!(model.contains(&lit!(-1)));
        assert!(model.contains(&lit!(2)));
        assert!(model.contains(&lit!(-3)));
    }

    #[test]
    fn ordered_list_minimisation() {
        let mut solver = Solver::new();
        solver.add_clause(&lits![1, 2, 3]).unwrap();
        solver.minimize_ordered(&lits![1, 2, 3]).unwrap();

        assert_eq!(solver.solve().unwrap(), SolveResult::Sat);
        let model = solver.model().unwrap();
        // Each invalidation either makes an earlier listed literal true or pushes the first true
        // one out, so the optimum satisfies the clause through the first list entry.
        assert!(model.contains(&lit!(1)));
    }

    #[test]
    fn aggregate_sum_minimisation() {
        let mut solver = Solver::new();
        solver
            .add_weighted_set(
                7,
                AggType::Sum,
                &[
                    weighted(lit!(1), 3),
                    weighted(lit!(2), 2),
                    weighted(lit!(3), 4),
                ],
            )
            .unwrap();
        // At least one of the three must hold.
        solver.add_clause(&lits![1, 2, 3]).unwrap();
        solver.minimize_agg_sum(7).unwrap();

        assert_eq!(solver.solve().unwrap(), SolveResult::Sat);
        let model = solver.model().unwrap();
        assert!(model.contains(&lit!(2)), "cheapest support is the weight-2 literal");
        assert!(model.contains(&lit!(-1)));
        assert!(model.contains(&lit!(-3)));
    }

    fn count_sum_geq_models(to_cnf: bool) -> usize {
        let mut config = SolverConfig::default();
        config.to_cnf = to_cnf;
        let mut solver = Solver::with_config(config);

        solver
            .add_weighted_set(
                1,
                AggType::Sum,
                &[
                    weighted(lit!(1), 1),
                    weighted(lit!(2), 2),
                    weighted(lit!(3), 3),
                    weighted(lit!(4), 4),
                ],
            )
            .unwrap();
        solver
            .add_aggregate(1, lit!(5), 5, AggSign::Lower, AggSem::Equivalence, None)
            .unwrap();

        let mut count = 0;
        while let Some(model) = solver.next_model().unwrap() {
            let sum: Weight = [(lit!(1), 1), (lit!(2), 2), (lit!(3), 3), (lit!(4), 4)]
                .iter()
                .filter(|(l, _)| model.contains(l))
                .map(|&(_, w)| w)
                .sum();
            assert_eq!(model.contains(&lit!(5)), sum >= 5);
            count += 1;
        }
        count
    }

    #[test]
    fn pseudo_boolean_encoding_matches_propagator() {
        let native = count_sum_geq_models(false);
        let clausal = count_sum_geq_models(true);
        assert_eq!(native, clausal);
        // Every assignment of the four set literals extends to exactly one model.
        assert_eq!(native, 16);
    }

    #[test]
    fn failed_assumption_core() {
        let mut solver = Solver::new();
        solver.add_clause(&lits![-1, -2]).unwrap();

        assert_eq!(
            solver.solve_with_assumptions(&lits![1, 2]).unwrap(),
            SolveResult::UnsatUnderAssumptions
        );
        let core = solver.failed_core().to_vec();
        assert!(!core.is_empty());
        assert!(core.iter().all(|l| lits![1, 2].contains(l)));
    }

    #[test]
    fn product_constraint_fixes_factor() {
        let mut solver = Solver::new();
        solver.add_int_range(0, 1, 4, false).unwrap();
        solver.add_int_range(1, 1, 4, false).unwrap();

        // x * y >= 12 and x <= 3 forces both factors high.
        solver
            .add_int_product(lit!(1), 1, &[0, 1], IntCmp::Geq, 12)
            .unwrap();
        solver.add_clause(&lits![1]).unwrap();
        solver.add_int_const_cmp(lit!(2), 0, IntCmp::Leq, 3).unwrap();
        solver.add_clause(&lits![2]).unwrap();

        assert_eq!(solver.solve().unwrap(), SolveResult::Sat);
        let x = solver.int_value(0).unwrap();
        let y = solver.int_value(1).unwrap();
        assert!(x * y >= 12);
        assert!(x <= 3);
    }

    #[test]
    fn all_different_permutations() {
        let mut solver = Solver::new();
        for id in 0..3 {
            solver.add_int_range(id, 1, 3, false).unwrap();
        }
        solver.add_all_different(&[0, 1, 2]).unwrap();

        let mut count = 0;
        while solver.next_model().unwrap().is_some() {
            let values = [
                solver.int_value(0).unwrap(),
                solver.int_value(1).unwrap(),
                solver.int_value(2).unwrap(),
            ];
            let mut sorted = values;
            sorted.sort_unstable();
            assert_eq!(sorted, [1, 2, 3]);
            count += 1;
        }
        assert_eq!(count, 6);
    }

    #[test]
    fn element_constraint() {
        let mut solver = Solver::new();
        solver.add_int_range(0, 1, 3, false).unwrap();
        solver.add_int_range(1, 0, 9, false).unwrap();
        solver.add_int_element(0, &[5, 7, 5], 1).unwrap();

        let mut pairs = vec![];
        while solver.next_model().unwrap().is_some() {
            pairs.push((solver.int_value(0).unwrap(), solver.int_value(1).unwrap()));
        }
        pairs.sort_unstable();
        pairs.dedup();

        assert_eq!(pairs, vec![(1, 5), (2, 7), (3, 5)]);
    }

    #[test]
    fn modal_child_reifies_subproblem() {
        // Child: rigid atom r forces a contradiction when true.
        let mut child = Solver::new();
        child.add_clause(&lits![-1, 2]).unwrap();
        child.add_clause(&lits![-1, -2]).unwrap();

        let mut solver = Solver::new();
        // Parent atom 1 is rigid and shared with child atom 1; head is parent atom 2.
        solver
            .add_modal_child(lit!(2), Quant::Exists, vec![(lit!(1), lit!(1))], child)
            .unwrap();
        solver.add_clause(&lits![1]).unwrap();
        solver.add_clause(&lits![2]).unwrap();

        // With r true the child is unsatisfiable, so the head cannot hold.
        assert_eq!(solver.solve().unwrap(), SolveResult::Unsat);
    }

    #[test]
    fn stopped_search_reports_status() {
        let mut solver = Solver::new();
        solver.add_clause(&lits![1, 2]).unwrap();
        solver.stop_handle().signal_stop();

        assert_eq!(solver.solve().unwrap(), SolveResult::Stopped);

        solver.stop_handle().reset();
        assert_eq!(solver.solve().unwrap(), SolveResult::Sat);
    }
}
