//! Optimisation by iterative model invalidation.
//!
//! All three modes re-invoke the search and rule out the model just found: subset minimisation
//! forbids any superset of the true literals, ordered-list minimisation forbids the current or a
//! worse first true literal, and aggregate-sum minimisation tightens the bound of a sum
//! aggregate whose head is pinned true. When the strengthened problem becomes unsatisfiable the
//! last model is the optimum.
use crate::lit::Lit;

/// What is being minimised.
#[derive(Clone, Debug)]
pub enum Objective {
    /// Minimise the set of true literals among `lits` under subset inclusion.
    Subset { lits: Vec<Lit> },
    /// Minimise the index of the first true literal of the list (later is better).
    OrderedList { lits: Vec<Lit> },
    /// Minimise the value of the sum aggregate reified by `head`.
    AggSum { head: Lit, set_external: usize },
}

/// Optimisation state.
#[derive(Default)]
pub struct Optimize {
    objective: Option<Objective>,
    /// The best model seen so far, over the user-declared variables.
    best_model: Option<Vec<Lit>>,
}

impl Optimize {
    pub fn set_objective(&mut self, objective: Objective) {
        self.objective = Some(objective);
    }

    pub fn objective(&self) -> Option<&Objective> {
        self.objective.as_ref()
    }

    pub fn record_model(&mut self, model: Vec<Lit>) {
        self.best_model = Some(model);
    }

    pub fn best_model(&self) -> Option<&[Lit]> {
        self.best_model.as_deref()
    }

    pub fn clear_best(&mut self) {
        self.best_model = None;
    }
}

/// The invalidation clause for a subset-minimisation model: some currently true literal must
/// become false.
pub fn subset_invalidation(lits: &[Lit], model_true: impl Fn(Lit) -> bool) -> Vec<Lit> {
    lits.iter()
        .copied()
        .filter(|&l| model_true(l))
        .map(|l| !l)
        .collect()
}

/// Assumptions keeping the currently false literals false while searching for a subset.
pub fn subset_assumptions(lits: &[Lit], model_true: impl Fn(Lit) -> bool) -> Vec<Lit> {
    lits.iter()
        .copied()
        .filter(|&l| !model_true(l))
        .map(|l| !l)
        .collect()
}

/// The invalidation clause for ordered-list minimisation, or `None` when the model is already
/// optimal (no listed literal is true).
///
/// With `l_i` the first true literal, the clause `l_1 v .. v l_(i-1) v ~l_i` forbids every model
/// that is as bad or worse.
pub fn ordered_invalidation(lits: &[Lit], model_true: impl Fn(Lit) -> bool) -> Option<Vec<Lit>> {
    let first_true = lits.iter().position(|&l| model_true(l))?;
    let mut clause: Vec<Lit> = lits[..first_true].to_vec();
    clause.push(!lits[first_true]);
    Some(clause)
}
