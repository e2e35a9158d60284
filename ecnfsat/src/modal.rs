//! Second-order driver: a tree of subsolvers.
//!
//! Each child wraps a full engine context of its own. Rigidity declarations pair parent atoms
//! with child atoms; parent assignments to rigid atoms are pushed down as assumptions. A child
//! that is unsatisfiable under the pushed assignment turns its head false (existential) or true
//! (universal); once every rigid atom is assigned, a satisfiable child decides the head the
//! other way. Explanations cite the head and the rigid parent literals.
use partial_ref::{partial, PartialRef};

use crate::bus::{Priority, PropagatorId};
use crate::context::{
    AggregatesP, AnalyzeConflictP, AssignmentP, BinaryClausesP, BusP, ClauseAllocP, ClauseDbP,
    Context, DefinitionsP, ImplGraphP, IntEngineP, ModalP, SolverConfigP, SolverStateP, TmpDataP,
    TrailP, VariablesP, VsidsP, WatchlistsP,
};
use crate::clause::db::store_theory_conflict;
use crate::lit::Lit;
use crate::prop::{enqueue_assignment, Conflict, EngineTag, Reason};

/// Quantification of a child solver.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Quant {
    Exists,
    Forall,
}

/// One child solver of the tree.
pub struct ModalChild {
    pub head: Lit,
    pub quant: Quant,
    /// Pairs of (parent literal, child literal) sharing one rigid atom.
    pub rigid: Vec<(Lit, Lit)>,
    child: Box<Context>,
    dense: u32,
}

/// The second-order driver.
#[derive(Default)]
pub struct Modal {
    children: Vec<ModalChild>,
}

impl Modal {
    /// Attach a child context under the given head.
    pub fn add_child(
        &mut self,
        head: Lit,
        quant: Quant,
        rigid: Vec<(Lit, Lit)>,
        child: Box<Context>,
    ) -> usize {
        self.children.push(ModalChild {
            head,
            quant,
            rigid,
            child,
            dense: 0,
        });
        self.children.len() - 1
    }

    pub fn children(&self) -> &[ModalChild] {
        &self.children
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Register every child's propagator; they run at slow priority after the fast engines settle.
pub fn register_children(mut ctx: partial!(Context, mut BusP, mut ModalP)) {
    let (modal, mut ctx) = ctx.split_part_mut(ModalP);
    for (index, child) in modal.children.iter_mut().enumerate() {
        let dense = ctx
            .part_mut(BusP)
            .register(PropagatorId::ModalChild(index as u32), Priority::Slow);
        child.dense = dense;

        let bus = ctx.part_mut(BusP);
        for &(parent_lit, _) in child.rigid.iter() {
            bus.subscribe(parent_lit, dense);
            bus.subscribe(!parent_lit, dense);
        }
        bus.subscribe(child.head, dense);
        bus.subscribe(!child.head, dense);

        // An unconditionally inconsistent child decides its head without any rigid assignment.
        bus.enqueue(dense);
    }
}

/// Run one child after a wakeup.
pub fn run_child(
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
) -> Result<(), Conflict> {
    let index = index as usize;

    {
        let dense = ctx.part(ModalP).children[index].dense;
        let mut pending = vec![];
        ctx.part_mut(BusP).take_pending(dense, &mut pending);
    }

    subsolve(ctx.borrow(), index)
}

/// Solve one child under the parent's rigid assignment and propagate its head.
fn subsolve(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut ModalP,
        mut TrailP,
        mut WatchlistsP,
    ),
    index: usize,
) -> Result<(), Conflict> {
    let (head, quant, verdict, all_rigid_known, premises) = {
        let mut ctx = ctx.borrow();
        let (modal, ctx) = ctx.split_part_mut(ModalP);
        let child_entry = &mut modal.children[index];
        let assignment = ctx.part(AssignmentP);

        let mut assumptions = vec![];
        let mut premises = vec![];
        let mut all_rigid_known = true;
        for &(parent_lit, child_lit) in child_entry.rigid.iter() {
            match assignment.lit_value(parent_lit) {
                Some(true) => {
                    assumptions.push(child_lit);
                    premises.push(!parent_lit);
                }
                Some(false) => {
                    assumptions.push(!child_lit);
                    premises.push(parent_lit);
                }
                None => all_rigid_known = false,
            }
        }

        let verdict = crate::solver::subsearch(&mut child_entry.child, &assumptions);

        (
            child_entry.head,
            child_entry.quant,
            verdict,
            all_rigid_known,
            premises,
        )
    };

    let verdict = match verdict {
        Some(verdict) => verdict,
        // The subsearch was cancelled; the parent notices the stop flag itself.
        None => return Ok(()),
    };

    // UNSAT conclusions are monotone in the assumptions; SAT needs the full rigid assignment.
    let forced = match (verdict, quant) {
        (false, Quant::Exists) => Some(!head),
        (false, Quant::Forall) => Some(head),
        (true, Quant::Exists) if all_rigid_known => Some(head),
        (true, Quant::Forall) if all_rigid_known => Some(!head),
        _ => None,
    };

    if let Some(lit) = forced {
        if ctx.part(AssignmentP).lit_is_true(lit) {
            return Ok(());
        }
        if ctx.part(AssignmentP).lit_is_false(lit) {
            let mut clause = vec![lit];
            clause.extend(premises);
            return Err(store_theory_conflict(ctx.borrow(), &clause));
        }
        enqueue_assignment(
            ctx.borrow(),
            lit,
            Reason::Theory {
                engine: EngineTag::Modal,
                token: index as u32,
            },
        );
    }

    Ok(())
}

/// Materialise the reason for a head propagation: the rigid parent literals pushed down.
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
    let (modal, ctx) = ctx.split_part(ModalP);
    let assignment = ctx.part(AssignmentP);
    let impl_graph = ctx.part(ImplGraphP);

    out.clear();
    out.push(lit);

    for &(parent_lit, _) in modal.children[token as usize].rigid.iter() {
        if let Some(value) = assignment.lit_value(parent_lit) {
            if impl_graph.depth(parent_lit.var()) < max_depth {
                let assigned = parent_lit ^ !value;
                out.push(!assigned);
            }
        }
    }
}

/// On a full parent assignment every child must agree with its head.
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
) -> Result<(), Conflict> {
    let count = ctx.part(ModalP).children.len();
    for index in 0..count {
        subsolve(ctx.borrow(), index)?;
    }
    Ok(())
}
