//! Event dispatch between the SAT core and the theory engines.
//!
//! Every theory propagator registers once, at exactly one priority, and then subscribes to the
//! literals it wants to be woken for. When a subscribed literal is assigned true the propagator
//! is enqueued together with the literal; a propagator that is already enqueued is not enqueued
//! again until it runs, but the triggering literals keep accumulating. The fast queue is drained
//! before the slow queue, and boolean (binary and long clause) propagation runs before either.
//!
//! A propagator that wants to react at both priorities registers two propagators; the registry
//! stores one priority per propagator so a single propagator can never double-fire.
use std::collections::VecDeque;

use partial_ref::{partial, PartialRef};

use crate::context::{
    AggregatesP, AnalyzeConflictP, AssignmentP, BinaryClausesP, BusP, ClauseAllocP, ClauseDbP,
    Context, DefinitionsP, ImplGraphP, IntEngineP, ModalP, SolverConfigP, SolverStateP, TmpDataP,
    TrailP, VariablesP, VsidsP, WatchlistsP,
};
use crate::lit::Lit;
use crate::prop::binary::propagate_binary;
use crate::prop::long::propagate_long;
use crate::prop::Conflict;

/// Queue priority of a propagator.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Priority {
    Fast,
    Slow,
}

/// Identity of a registered propagator.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum PropagatorId {
    /// Bound maintenance of one integer variable.
    IntVar(u32),
    /// One finite-domain constraint.
    Constraint(u32),
    /// The partial-watch propagator of one weighted set.
    AggSet(u32),
    /// The unfounded-set search of the definition engine.
    Definitions,
    /// One child of the second-order driver.
    ModalChild(u32),
}

/// Registered propagator bookkeeping.
struct PropState {
    id: PropagatorId,
    priority: Priority,
    enqueued: bool,
    /// Literals whose assignment triggered the pending wakeup, in trail order.
    pending: Vec<Lit>,
}

/// Subscription registry and run queues of the propagation bus.
#[derive(Default)]
pub struct Bus {
    props: Vec<PropState>,
    /// Per literal code: dense indices of subscribed propagators.
    watches: Vec<Vec<u32>>,
    fast: VecDeque<u32>,
    slow: VecDeque<u32>,
}

impl Bus {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.watches.resize(count * 2, vec![]);
    }

    /// Register a propagator at a fixed priority. Returns its dense index.
    pub fn register(&mut self, id: PropagatorId, priority: Priority) -> u32 {
        let dense = self.props.len() as u32;
        self.props.push(PropState {
            id,
            priority,
            enqueued: false,
            pending: vec![],
        });
        dense
    }

    /// Wake the propagator whenever `lit` is assigned true.
    pub fn subscribe(&mut self, lit: Lit, dense: u32) {
        let watchers = &mut self.watches[lit.code()];
        if !watchers.contains(&dense) {
            watchers.push(dense);
        }
    }

    /// Enqueue all subscribers of a literal that was just assigned true.
    pub fn notify_assign(&mut self, lit: Lit) {
        let watchers = std::mem::take(&mut self.watches[lit.code()]);
        for &dense in watchers.iter() {
            self.enqueue_with_lit(dense, Some(lit));
        }
        self.watches[lit.code()] = watchers;
    }

    /// Enqueue a propagator directly, e.g. from a bound-watcher list.
    pub fn enqueue(&mut self, dense: u32) {
        self.enqueue_with_lit(dense, None);
    }

    fn enqueue_with_lit(&mut self, dense: u32, lit: Option<Lit>) {
        let prop = &mut self.props[dense as usize];
        if let Some(lit) = lit {
            prop.pending.push(lit);
        }
        if !prop.enqueued {
            prop.enqueued = true;
            match prop.priority {
                Priority::Fast => self.fast.push_back(dense),
                Priority::Slow => self.slow.push_back(dense),
            }
        }
    }

    /// Take the next propagator to run, fast queue first.
    pub fn pop_runnable(&mut self) -> Option<u32> {
        let dense = if let Some(dense) = self.fast.pop_front() {
            dense
        } else {
            self.slow.pop_front()?
        };
        self.props[dense as usize].enqueued = false;
        Some(dense)
    }

    /// Identity of a registered propagator.
    pub fn id_of(&self, dense: u32) -> PropagatorId {
        self.props[dense as usize].id
    }

    /// Move the pending trigger literals of a propagator into `out`.
    pub fn take_pending(&mut self, dense: u32, out: &mut Vec<Lit>) {
        out.clear();
        out.append(&mut self.props[dense as usize].pending);
    }

    /// Drop queued work after a conflict; no propagator runs until the driver backtracked.
    pub fn on_backtrack(&mut self) {
        for &dense in self.fast.iter().chain(self.slow.iter()) {
            let prop = &mut self.props[dense as usize];
            prop.enqueued = false;
            prop.pending.clear();
        }
        self.fast.clear();
        self.slow.clear();
    }
}

/// Run boolean propagation and all woken theory propagators to fixpoint.
///
/// Literals are processed strictly in trail order; the fast queue drains before the slow queue.
/// The first conflict stops the loop, as does a raised stop flag.
pub fn propagate(
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
    loop {
        if ctx.part(SolverStateP).stop.stop_requested() {
            return Ok(());
        }

        if let Some(lit) = ctx.part_mut(TrailP).pop_queue() {
            propagate_binary(ctx.borrow(), lit)?;
            propagate_long(ctx.borrow(), lit)?;
            continue;
        }

        if let Some(lit) = ctx.part_mut(TrailP).pop_theory_queue() {
            ctx.part_mut(BusP).notify_assign(lit);
            continue;
        }

        if let Some(dense) = ctx.part_mut(BusP).pop_runnable() {
            run_propagator(ctx.borrow(), dense)?;
            continue;
        }

        return Ok(());
    }
}

/// Dispatch one woken propagator.
///
/// The dispatch is a tagged match instead of a virtual call; this keeps the hot branch
/// predictable.
fn run_propagator(
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
    dense: u32,
) -> Result<(), Conflict> {
    match ctx.part(BusP).id_of(dense) {
        PropagatorId::IntVar(var) => crate::int::run_var_update(ctx.borrow(), var),
        PropagatorId::Constraint(index) => crate::int::run_constraint(ctx.borrow(), index),
        PropagatorId::AggSet(set) => crate::aggregate::run_set_propagator(ctx.borrow(), set, dense),
        PropagatorId::Definitions => crate::defs::run_indirect_propagate(ctx.borrow()),
        PropagatorId::ModalChild(child) => crate::modal::run_child(ctx.borrow(), child),
    }
}

/// Checks run when the trail became total.
///
/// Engines that can only decide consistency on full assignments report their verdict here: the
/// definition engine verifies well-foundedness, the modal driver subsolves its children and the
/// integer engine splits any lazy variable whose domain is still wide.
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
    crate::int::final_check(ctx.borrow())?;
    crate::defs::final_check(ctx.borrow())?;
    crate::modal::final_check(ctx.borrow())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_priority_per_propagator() {
        let mut bus = Bus::default();
        bus.set_var_count(4);

        let fast = bus.register(PropagatorId::Constraint(0), Priority::Fast);
        let slow = bus.register(PropagatorId::Constraint(1), Priority::Slow);

        let lit = crate::lit::Lit::from_index(2, false);
        bus.subscribe(lit, fast);
        bus.subscribe(lit, slow);
        // Subscribing twice must not duplicate the watch entry.
        bus.subscribe(lit, fast);

        bus.notify_assign(lit);
        bus.notify_assign(lit);

        // Each propagator is queued exactly once, fast before slow.
        assert_eq!(bus.pop_runnable(), Some(fast));
        assert_eq!(bus.pop_runnable(), Some(slow));
        assert_eq!(bus.pop_runnable(), None);

        let mut pending = vec![];
        bus.take_pending(fast, &mut pending);
        assert_eq!(pending, vec![lit, lit]);
    }

    #[test]
    fn backtrack_clears_queues() {
        let mut bus = Bus::default();
        bus.set_var_count(2);

        let dense = bus.register(PropagatorId::AggSet(0), Priority::Fast);
        let lit = crate::lit::Lit::from_index(0, false);
        bus.subscribe(lit, dense);
        bus.notify_assign(lit);

        bus.on_backtrack();

        assert_eq!(bus.pop_runnable(), None);
        let mut pending = vec![];
        bus.take_pending(dense, &mut pending);
        assert!(pending.is_empty());
    }
}
