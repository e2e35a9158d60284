//! Error type of the solver library.
use thiserror::Error;

/// Errors reported while declaring or preparing a problem.
#[derive(Debug, Error)]
pub enum Error {
    #[error("weighted set {0} is referenced but was never declared")]
    UndefinedSet(usize),

    #[error("weighted set {0} is declared twice")]
    DuplicateSet(usize),

    #[error("aggregate head {0} occurs as a literal of its own set")]
    HeadInOwnSet(crate::lit::Lit),

    #[error("defined aggregate has a negative head literal {0}")]
    NegativeDefinedHead(crate::lit::Lit),

    #[error("atom {0} is the head of more than one definition")]
    DuplicateDefinitionHead(crate::lit::Var),

    #[error("product set {0} contains the non-positive weight {1}")]
    NonPositiveProductWeight(usize, crate::aggregate::Weight),

    #[error("integer variable {0} is declared twice")]
    DuplicateIntVar(usize),

    #[error("integer variable {0} is referenced but was never declared")]
    UndefinedIntVar(usize),

    #[error("integer variable {0} has an empty domain")]
    EmptyIntDomain(usize),

    #[error("bound computation overflowed the weight type")]
    WeightOverflow,

    #[error("feature not supported by this build: {0}")]
    Unsupported(&'static str),

    #[error("too many variables")]
    TooManyVars,

    #[error("declarations are frozen once the search has started")]
    DeclarationAfterFinish,
}

/// Result alias using the solver error type.
pub type Result<T> = std::result::Result<T, Error>;
