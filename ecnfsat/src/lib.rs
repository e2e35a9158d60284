//! A CDCL based solver for extended CNF.
//!
//! Besides plain clauses the solver handles inductive definitions under well-founded or stable
//! semantics, weighted-sum/cardinality/product/max aggregates with reified heads, order-encoded
//! finite-domain integer variables with linear, product, element and all-different constraints,
//! pseudo-Boolean compilation to CNF, an optional tree of quantified subsolvers and subset-,
//! list- and aggregate-sum minimisation.
#[macro_use]
pub mod lit;
pub mod cnf;

pub mod aggregate;
pub mod builder;
pub mod config;
pub mod defs;
pub mod int;
pub mod modal;
pub mod solver;

mod analyze_conflict;
mod bus;
mod cdcl;
mod clause;
mod context;
mod decision;
mod error;
mod incremental;
mod load;
mod optimize;
mod prop;
mod schedule;
mod state;
mod tmp;
mod variables;

#[cfg(test)]
mod test;

pub use aggregate::{AggSem, AggSign, AggType, Weight, WL};
pub use builder::{ImplicationKind, IntCmp};
pub use cnf::CnfFormula;
pub use config::{
    AggSaving, DefSemantics, DefnStrategy, PolarityMode, RestartSchedule, SolverConfig, UfsAlgo,
};
pub use error::Error;
pub use int::{IntView, LazyGrounder};
pub use lit::{Lit, Var};
pub use modal::Quant;
pub use solver::{SolveResult, Solver};
pub use state::StopHandle;
