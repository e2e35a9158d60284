//! Variable bookkeeping.
use crate::lit::Var;

/// Variable bookkeeping.
///
/// Tracks how many variables exist, which of them were declared by the user
/// (as opposed to auxiliaries introduced by rewrites, loop formulas or lazy
/// integer encodings) and which of them the branching heuristic may pick.
#[derive(Default)]
pub struct Variables {
    count: usize,
    /// Variables below this index are user declared and appear in printed
    /// models and model invalidation clauses.
    external_watermark: usize,
    /// Per variable: whether the decision heuristic may branch on it.
    decidable: Vec<bool>,
}

impl Variables {
    /// Number of variables in use.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of user-declared variables.
    pub fn external_count(&self) -> usize {
        self.external_watermark
    }

    /// Reserve a fresh user-declared variable.
    ///
    /// User variables must be allocated before any internal ones.
    pub fn new_var(&mut self) -> Var {
        debug_assert_eq!(self.external_watermark, self.count);
        let var = self.new_internal_var();
        self.external_watermark = self.count;
        var
    }

    /// Make sure at least `count` user-declared variables exist.
    pub fn ensure_external_vars(&mut self, count: usize) {
        while self.external_watermark < count {
            self.new_var();
        }
    }

    /// Reserve a fresh internal auxiliary variable.
    pub fn new_internal_var(&mut self) -> Var {
        let var = Var::from_index(self.count);
        self.count += 1;
        self.decidable.push(true);
        var
    }

    /// Whether the branching heuristic may pick this variable.
    pub fn is_decidable(&self, var: Var) -> bool {
        self.decidable[var.index()]
    }

    /// Exclude or include a variable from branching.
    pub fn set_decidable(&mut self, var: Var, decidable: bool) {
        self.decidable[var.index()] = decidable;
    }

    /// Whether the variable was declared by the user.
    pub fn is_external(&self, var: Var) -> bool {
        var.index() < self.external_watermark
    }
}
